/// Errors shared across the Garimpo crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("tool error: {0}")]
    Tool(String),

    /// The model asked for a tool that is not part of the registry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_unknown_tool(&self) -> bool {
        matches!(self, Error::UnknownTool(_))
    }
}
