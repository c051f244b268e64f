use std::path::{Path, PathBuf};

use garimpo_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_FILE: &str = "config.yml";
const DEFAULT_DB_FILE: &str = "garimpo.db";

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Garimpo configuration.
# API keys may also come from OPENAI_API_KEY and TMDB_API_KEY.

gateway:
  host: 127.0.0.1
  port: 3001
  # static_dir: ./frontend/dist
  rate_limit:
    per_second: 1
    burst_size: 60

llm:
  model: gpt-4o
  temperature: 0.0
  narrator_temperature: 0.7
  title_temperature: 0.3

agent:
  max_turns: 3
  # language: Brazilian Portuguese

catalog:
  base_url: https://api.themoviedb.org/3
  language: en-US
  region: BR
  result_limit: 5

preferences:
  max_items: 10
"#;

/// Resolves `AppConfig` from a YAML file, `.env`, and the process environment.
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Loader rooted at `~/.garimpo/config.yml`.
    pub fn new() -> Result<Self> {
        let dir = Self::config_dir()?;
        Ok(Self {
            config_path: dir.join(CONFIG_FILE),
        })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".garimpo"))
            .ok_or_else(|| Error::Config("could not determine home directory".into()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the file (defaults when absent) and apply environment overrides.
    pub fn load(&self) -> Result<AppConfig> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("loaded environment from {}", path.display());
        }

        let mut config = self.load_file()?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        if config.database.path.is_none() {
            config.database.path = Self::config_dir().ok().map(|d| d.join(DEFAULT_DB_FILE));
        }
        Ok(config)
    }

    fn load_file(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!(
                "no config file at {}, using defaults",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let raw = std::fs::read_to_string(&self.config_path).map_err(|e| {
            Error::Config(format!(
                "failed to read {}: {e}",
                self.config_path.display()
            ))
        })?;
        if raw.trim().is_empty() {
            return Ok(AppConfig::default());
        }

        serde_yaml::from_str(&raw).map_err(|e| {
            Error::Config(format!(
                "failed to parse {}: {e}",
                self.config_path.display()
            ))
        })
    }

    /// Write the commented default config, refusing to overwrite an existing file.
    pub fn write_default(&self) -> Result<PathBuf> {
        if self.config_path.exists() {
            return Err(Error::Config(format!(
                "{} already exists",
                self.config_path.display()
            )));
        }
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("failed to create {}: {e}", parent.display())))?;
        }
        std::fs::write(&self.config_path, DEFAULT_CONFIG_TEMPLATE).map_err(|e| {
            Error::Config(format!(
                "failed to write {}: {e}",
                self.config_path.display()
            ))
        })?;
        Ok(self.config_path.clone())
    }
}

/// Overlay well-known environment variables onto `config`.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty("OPENAI_API_KEY") {
        config.llm.api_key = Some(key);
    }
    if let Some(url) = non_empty("OPENAI_BASE_URL") {
        config.llm.base_url = Some(url);
    }
    if let Some(key) = non_empty("TMDB_API_KEY") {
        config.catalog.api_key = Some(key);
    }
    if let Some(path) = non_empty("GARIMPO_DB_PATH") {
        config.database.path = Some(PathBuf::from(path));
    }

    let port = non_empty("GARIMPO_PORT").or_else(|| non_empty("PORT"));
    if let Some(port) = port.and_then(|p| p.trim().parse::<u16>().ok()) {
        config.gateway.port = port;
    }
}
