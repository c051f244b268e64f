pub mod conversation_store;
pub mod preference_store;

pub use conversation_store::{ConversationStore, ConversationSummary};
pub use preference_store::PreferenceStore;

use rusqlite::Connection;
use std::path::Path;
use tracing::{info, warn};

use garimpo_common::{Error, Result};

pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    info!("opening database at {}", db_path.display());
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
    Ok(conn)
}

pub(crate) fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
    Ok(conn)
}

pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> chrono::DateTime<chrono::Utc> {
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&chrono::Utc),
        Err(e) => {
            warn!("invalid stored timestamp '{raw}': {e}, falling back to now");
            chrono::Utc::now()
        }
    }
}
