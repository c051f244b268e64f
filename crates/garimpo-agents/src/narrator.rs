use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::providers::{ChatMessage, LlmProvider, LlmRequest};

/// Shown whenever the narration model call fails or returns nothing.
pub const FALLBACK_STATUS: &str = "Digging through the film archives...";

const NARRATION_PROMPT: &str = "You are the voice of Garimpo, a cheerful movie buff. \
Rewrite the technical progress step you are given as ONE short, playful status line \
for the user (at most 12 words, movie-themed, present tense). \
Never mention tools, functions, APIs or identifiers. Reply with the line only.";

const TITLE_PROMPT: &str = "You write short, descriptive titles (at most 5 words) for \
conversations, based on the user's first message. Reply with the title only, \
with no other words or punctuation.";

const MAX_TITLE_WORDS: usize = 5;
const IDENTITY_KEYS: [&str; 4] = ["user_id", "userId", "userid", "user"];

/// Turns technical progress into short user-facing status lines, and titles conversations.
#[derive(Clone)]
pub struct StatusNarrator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    title_temperature: f64,
}

impl StatusNarrator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            title_temperature: 0.3,
        }
    }

    pub fn with_temperatures(mut self, narration: f64, title: f64) -> Self {
        self.temperature = narration;
        self.title_temperature = title;
        self
    }

    /// Describe a progress step. Never fails: errors yield [`FALLBACK_STATUS`].
    pub async fn describe(
        &self,
        technical: &str,
        tool_name: Option<&str>,
        tool_args: Option<&Value>,
    ) -> String {
        let mut details = format!("Step: {technical}");
        if let Some(name) = tool_name {
            details.push_str(&format!("\nAction: {name}"));
        }
        if let Some(args) = tool_args {
            details.push_str(&format!("\nDetails: {}", strip_identity(args)));
        }

        let request = LlmRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(NARRATION_PROMPT), ChatMessage::user(details)],
            max_tokens: Some(40),
            temperature: Some(self.temperature),
            tools: vec![],
        };

        match self.provider.complete(&request).await {
            Ok(response) => {
                let line = clean_line(&response.text());
                if line.is_empty() {
                    debug!("narrator returned an empty line, using fallback");
                    FALLBACK_STATUS.to_string()
                } else {
                    line
                }
            }
            Err(e) => {
                warn!("status narration failed, using fallback: {e}");
                FALLBACK_STATUS.to_string()
            }
        }
    }

    /// Title for a new conversation, falling back to the message's first words.
    pub async fn generate_title(&self, first_message: &str) -> String {
        let request = LlmRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(TITLE_PROMPT),
                ChatMessage::user(format!("User message: \"{first_message}\"")),
            ],
            max_tokens: Some(20),
            temperature: Some(self.title_temperature),
            tools: vec![],
        };

        let generated = match self.provider.complete(&request).await {
            Ok(response) => limit_words(&clean_line(&response.text()), MAX_TITLE_WORDS),
            Err(e) => {
                warn!("title generation failed: {e}");
                String::new()
            }
        };

        if generated.is_empty() {
            fallback_title(first_message)
        } else {
            debug!(title = %generated, "generated conversation title");
            generated
        }
    }
}

/// Copy of `args` with caller-identity fields removed at every depth.
pub fn strip_identity(args: &Value) -> Value {
    match args {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !IDENTITY_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), strip_identity(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_identity).collect()),
        other => other.clone(),
    }
}

fn clean_line(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .replace('"', "")
        .trim()
        .to_string()
}

fn limit_words(text: &str, max: usize) -> String {
    text.split_whitespace().take(max).collect::<Vec<_>>().join(" ")
}

fn fallback_title(first_message: &str) -> String {
    let title = limit_words(first_message, MAX_TITLE_WORDS);
    if title.is_empty() {
        "New conversation".to_string()
    } else {
        title
    }
}
