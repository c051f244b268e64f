use crate::providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, LlmStream,
    LlmStreamResponse, MessagePart, StreamContent, ToolUseDelta, Usage,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use garimpo_common::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider for the OpenAI chat-completions API and compatible servers.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }

    async fn post_completion(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            model = %body.model,
            messages = body.messages.len(),
            stream = body.stream,
            "sending chat completion"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = convert_request(request, false)?;
        let response = self.post_completion(&body).await?;

        let openai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("failed to parse OpenAI response: {e}")))?;

        convert_response(openai_response)
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let body = convert_request(request, true)?;
        let response = self.post_completion(&body).await?;
        Ok(Box::pin(SseParser::new(response.bytes_stream())))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        let response = self.client.get(&url).bearer_auth(&self.api_key).send().await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

fn convert_request(request: &LlmRequest, stream: bool) -> Result<OpenAiRequest> {
    let messages = request
        .messages
        .iter()
        .map(convert_message)
        .collect::<Result<Vec<_>>>()?;

    let tools = (!request.tools.is_empty()).then(|| {
        request
            .tools
            .iter()
            .map(|t| OpenAiTool {
                kind: "function".to_string(),
                function: OpenAiFunctionDefinition {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    });

    Ok(OpenAiRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        tools,
        stream,
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: true,
        }),
    })
}

fn convert_message(msg: &ChatMessage) -> Result<OpenAiMessage> {
    match msg.role {
        ChatRole::System => Ok(OpenAiMessage::System {
            content: msg.text(),
        }),
        ChatRole::User => Ok(OpenAiMessage::User {
            content: msg.text(),
        }),
        ChatRole::Assistant => {
            let (content, tool_calls) = match &msg.content {
                MessagePart::Text(t) => (Some(t.clone()), Vec::new()),
                MessagePart::Parts(parts) => {
                    let mut text_parts = Vec::new();
                    let mut tool_calls = Vec::new();
                    for part in parts {
                        match part {
                            ContentBlock::Text { text } => text_parts.push(text.clone()),
                            ContentBlock::ToolUse { id, name, input } => {
                                tool_calls.push(OpenAiToolCall {
                                    id: id.clone(),
                                    kind: "function".to_string(),
                                    function: OpenAiFunctionCall {
                                        name: name.clone(),
                                        arguments: input.to_string(),
                                    },
                                });
                            }
                            ContentBlock::ToolResult { .. } => {}
                        }
                    }
                    let content = (!text_parts.is_empty()).then(|| text_parts.join("\n"));
                    (content, tool_calls)
                }
            };

            Ok(OpenAiMessage::Assistant {
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            })
        }
        ChatRole::Tool => {
            let MessagePart::Parts(parts) = &msg.content else {
                return Err(Error::Agent(
                    "tool message must carry a tool_result block".to_string(),
                ));
            };
            let (tool_call_id, content) = parts
                .iter()
                .find_map(|p| match p {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } => Some((tool_use_id.clone(), content.clone())),
                    _ => None,
                })
                .ok_or_else(|| Error::Agent("tool message missing tool_result".to_string()))?;

            Ok(OpenAiMessage::Tool {
                tool_call_id,
                content,
            })
        }
    }
}

fn convert_response(response: OpenAiResponse) -> Result<LlmResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Agent("no choices in OpenAI response".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content {
        content.push(ContentBlock::Text { text });
    }
    for tc in choice.message.tool_calls.unwrap_or_default() {
        let input = serde_json::from_str(&tc.function.arguments)
            .unwrap_or(serde_json::Value::String(tc.function.arguments.clone()));
        content.push(ContentBlock::ToolUse {
            id: tc.id,
            name: tc.function.name,
            input,
        });
    }

    Ok(LlmResponse {
        content,
        model: response.model,
        usage: response.usage.map(Usage::from),
        stop_reason: choice.finish_reason,
    })
}

// Request types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }
    }
}

/// Splits an SSE byte stream into events and maps each `data:` payload to stream responses.
struct SseParser {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    queue: VecDeque<Result<LlmStreamResponse>>,
    finished: bool,
}

impl SseParser {
    fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            queue: VecDeque::new(),
            finished: false,
        }
    }

    /// Consume every complete event currently in the buffer.
    fn drain_events(&mut self) {
        while let Some((end, delimiter_len)) = find_event_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end).collect();
            self.buffer.drain(..delimiter_len);
            self.parse_event(&event);
        }
    }

    fn parse_event(&mut self, event: &[u8]) {
        let Ok(text) = std::str::from_utf8(event) else {
            self.queue
                .push_back(Err(Error::Agent("stream event is not UTF-8".to_string())));
            return;
        };

        for line in text.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            match serde_json::from_str::<OpenAiStreamChunk>(data) {
                Ok(chunk) => self.queue.extend(chunk_to_responses(chunk).into_iter().map(Ok)),
                Err(e) => self
                    .queue
                    .push_back(Err(Error::Agent(format!("stream JSON parse error: {e}")))),
            }
        }
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn chunk_to_responses(chunk: OpenAiStreamChunk) -> Vec<LlmStreamResponse> {
    let mut out = Vec::new();

    for choice in chunk.choices {
        let mut yielded = false;

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            out.push(LlmStreamResponse {
                delta: StreamContent::Text(content),
                usage: None,
                stop_reason: choice.finish_reason.clone(),
            });
            yielded = true;
        }

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = tc
                .function
                .map(|f| (f.name, f.arguments.unwrap_or_default()))
                .unwrap_or_default();
            out.push(LlmStreamResponse {
                delta: StreamContent::ToolUse(ToolUseDelta {
                    index: tc.index,
                    id: tc.id,
                    name,
                    input: arguments,
                }),
                usage: None,
                stop_reason: choice.finish_reason.clone(),
            });
            yielded = true;
        }

        if !yielded && choice.finish_reason.is_some() {
            out.push(LlmStreamResponse {
                delta: StreamContent::Text(String::new()),
                usage: None,
                stop_reason: choice.finish_reason,
            });
        }
    }

    if let Some(usage) = chunk.usage {
        out.push(LlmStreamResponse {
            delta: StreamContent::Text(String::new()),
            usage: Some(usage.into()),
            stop_reason: None,
        });
    }
    out
}

impl Stream for SseParser {
    type Item = Result<LlmStreamResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                    self.drain_events();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(Error::Agent(format!("stream error: {e}")))));
                }
                Poll::Ready(None) => {
                    // A final event may arrive without the trailing blank line.
                    self.finished = true;
                    let rest = std::mem::take(&mut self.buffer);
                    if !rest.iter().all(u8::is_ascii_whitespace) {
                        self.parse_event(&rest);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// Stream response types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAiStreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}
