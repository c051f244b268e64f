use std::path::PathBuf;

use garimpo_common::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub catalog: CatalogConfig,
    pub database: DatabaseConfig,
    pub preferences: PreferenceConfig,
}

impl AppConfig {
    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Config(
                "missing LLM API key (set llm.api_key or OPENAI_API_KEY)".into(),
            ));
        }
        if self.catalog.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Config(
                "missing catalog API key (set catalog.api_key or TMDB_API_KEY)".into(),
            ));
        }
        if self.agent.max_turns == 0 {
            return Err(Error::Config("agent.max_turns must be at least 1".into()));
        }
        if self.preferences.max_items == 0 {
            return Err(Error::Config("preferences.max_items must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the built web client, served with an `index.html` fallback.
    pub static_dir: Option<PathBuf>,
    pub cors_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            static_dir: None,
            cors_origins: Vec::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_second: u64,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 1,
            burst_size: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub narrator_model: Option<String>,
    pub narrator_temperature: f64,
    pub title_temperature: f64,
}

impl LlmConfig {
    pub fn narrator_model(&self) -> &str {
        self.narrator_model.as_deref().unwrap_or(&self.model)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: "gpt-4o".into(),
            temperature: 0.0,
            max_tokens: None,
            narrator_model: None,
            narrator_temperature: 0.7,
            title_temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_turns: usize,
    /// Replaces the built-in persona text when set.
    pub persona: Option<String>,
    /// Language the assistant answers in, appended to the persona.
    pub language: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 3,
            persona: None,
            language: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub language: String,
    pub region: String,
    pub result_limit: usize,
    pub filmography_limit: usize,
    pub min_vote_count: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.themoviedb.org/3".into(),
            language: "en-US".into(),
            region: "BR".into(),
            result_limit: 5,
            filmography_limit: 10,
            min_vote_count: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to `~/.garimpo/garimpo.db` when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceConfig {
    pub max_items: usize,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            max_items: garimpo_common::DEFAULT_MAX_ITEMS,
        }
    }
}
