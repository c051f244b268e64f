pub mod error;
pub mod message;
pub mod preferences;

pub use error::{Error, Result};
pub use message::{LogType, Sender, StoredMessage, ThoughtLogEntry, ToolCallPayload};
pub use preferences::{DEFAULT_MAX_ITEMS, PreferenceCategory, PreferenceSet};
