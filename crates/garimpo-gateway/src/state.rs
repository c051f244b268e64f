use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use garimpo_agents::conversation::persona;
use garimpo_agents::{AgentRuntime, LlmProvider, OpenAiProvider, StatusNarrator, ToolRegistry};
use garimpo_common::{Error, Result};
use garimpo_config::{AppConfig, ConfigLoader};
use garimpo_db::{ConversationStore, PreferenceStore};
use tracing::info;

use crate::movie_tools::MovieToolHandler;
use crate::tmdb::TmdbClient;

/// Shared state handed to every request handler.
pub struct AppState {
    pub config: AppConfig,
    pub runtime: Arc<AgentRuntime>,
    pub conversations: Arc<Mutex<ConversationStore>>,
    pub preferences: Arc<Mutex<PreferenceStore>>,
    /// System prompt for every turn, resolved once at startup.
    pub persona: String,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire providers, catalog, tools and stores from a validated config.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let db_path = database_path(&config)?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Database(format!("failed to create {}: {e}", parent.display())))?;
        }
        let conversations = ConversationStore::open(&db_path)?;
        let preferences =
            PreferenceStore::open(&db_path)?.with_max_items(config.preferences.max_items);
        info!(path = %db_path.display(), "opened database");

        let api_key = config.llm.api_key.clone().unwrap_or_default();
        let provider: Arc<dyn LlmProvider> =
            Arc::new(OpenAiProvider::new(api_key, config.llm.base_url.clone()));
        let catalog = Arc::new(TmdbClient::new(&config.catalog)?);

        Ok(Self::with_parts(
            config,
            provider,
            catalog,
            conversations,
            preferences,
        ))
    }

    /// Assemble state from already-built parts.
    pub fn with_parts(
        config: AppConfig,
        provider: Arc<dyn LlmProvider>,
        catalog: Arc<TmdbClient>,
        conversations: ConversationStore,
        preferences: PreferenceStore,
    ) -> Self {
        let preferences = Arc::new(Mutex::new(preferences));
        let handler = Arc::new(MovieToolHandler::new(catalog, Arc::clone(&preferences)));
        let registry = Arc::new(ToolRegistry::new(handler));

        let narrator = StatusNarrator::new(Arc::clone(&provider), config.llm.narrator_model())
            .with_temperatures(config.llm.narrator_temperature, config.llm.title_temperature);

        let mut runtime = AgentRuntime::new(provider, registry, narrator, config.llm.model.clone());
        runtime.set_temperature(config.llm.temperature);
        if let Some(max_tokens) = config.llm.max_tokens {
            runtime.set_max_tokens(max_tokens);
        }
        runtime.set_max_turns(config.agent.max_turns);

        let persona = persona(
            config.agent.persona.as_deref(),
            config.agent.language.as_deref(),
        );

        Self {
            config,
            runtime: Arc::new(runtime),
            conversations: Arc::new(Mutex::new(conversations)),
            preferences,
            persona,
        }
    }
}

fn database_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.database.path {
        Some(path) => Ok(path.clone()),
        None => Ok(ConfigLoader::config_dir()?.join("garimpo.db")),
    }
}

/// Lock a store, mapping a poisoned mutex to a database error.
pub fn lock<T>(store: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    store
        .lock()
        .map_err(|_| Error::Database("store lock poisoned".into()))
}
