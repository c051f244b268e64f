use async_trait::async_trait;
use futures::Stream;
use garimpo_common::Result;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Trait for chat-completion model integrations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "openai").
    fn provider_id(&self) -> &str;

    /// Send a completion request and return the whole response.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Send a completion request and stream text and tool-call fragments as they arrive.
    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream>;

    /// Check if the provider is reachable and configured.
    async fn health_check(&self) -> Result<bool>;
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmStreamResponse>> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessagePart,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: MessagePart::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessagePart::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: MessagePart::Text(text.into()),
        }
    }

    /// Result of one tool call, answering the request with id `tool_use_id`.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: MessagePart::Parts(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
            }]),
        }
    }

    /// Concatenated text blocks of this message.
    pub fn text(&self) -> String {
        match &self.content {
            MessagePart::Text(t) => t.clone(),
            MessagePart::Parts(parts) => extract_text(parts),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePart {
    Text(String),
    Parts(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(&self) -> String {
        extract_text(&self.content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmStreamResponse {
    pub delta: StreamContent,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamContent {
    Text(String),
    ToolUse(ToolUseDelta),
}

/// One fragment of a streamed tool call; fragments sharing `index` belong to the same call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub input: String, // Partial JSON
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
