use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Author of a persisted conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Sender::User),
            "ai" => Ok(Sender::Ai),
            other => Err(Error::Database(format!("unknown message sender '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    ToolCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(rename = "toolArgs")]
    pub tool_args: serde_json::Value,
}

/// One dispatched tool call, kept with the final answer so a client can replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtLogEntry {
    #[serde(rename = "logType")]
    pub log_type: LogType,
    pub payload: ToolCallPayload,
}

impl ThoughtLogEntry {
    pub fn tool_call(tool_name: impl Into<String>, tool_args: serde_json::Value) -> Self {
        Self {
            log_type: LogType::ToolCall,
            payload: ToolCallPayload {
                tool_name: tool_name.into(),
                tool_args,
            },
        }
    }
}

/// Message row as persisted by the conversation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub sender: Sender,
    #[serde(rename = "messageText")]
    pub text: String,
    #[serde(rename = "thoughtLog", default, skip_serializing_if = "Vec::is_empty")]
    pub thought_log: Vec<ThoughtLogEntry>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_round_trips_through_str() {
        assert_eq!("ai".parse::<Sender>().unwrap(), Sender::Ai);
        assert_eq!(Sender::User.as_str(), "user");
        assert!("bot".parse::<Sender>().is_err());
    }

    #[test]
    fn thought_log_entry_uses_client_field_names() {
        let entry = ThoughtLogEntry::tool_call("get_movie_details", serde_json::json!({"title": "Heat"}));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["logType"], "tool_call");
        assert_eq!(json["payload"]["toolName"], "get_movie_details");
        assert_eq!(json["payload"]["toolArgs"]["title"], "Heat");
    }
}
