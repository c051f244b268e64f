use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use garimpo_common::{Error, Result, ThoughtLogEntry};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::events::{EventSink, StreamEvent};
use crate::narrator::StatusNarrator;
use crate::providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, MessagePart, StreamContent,
    ToolDefinition,
};
use crate::tool_calls::{ToolCallAssembler, ToolCallRequest};
use crate::tools::{ToolContext, ToolRegistry};

/// Think/act cycles allowed before the loop forces a closing answer.
pub const DEFAULT_MAX_TURNS: usize = 3;

const FIRST_TURN_STATUS: &str = "Grabbing some popcorn and thinking about your request...";
const NEXT_TURN_STEP: &str = "Reviewing what was found and deciding the next step";
const EXHAUSTED_STATUS: &str = "Putting together the best answer I can...";

const EXHAUSTED_INSTRUCTION: &str = "You have used all the research steps available for this \
request. Do not call any tools. Explain briefly and kindly to the user that you could not \
fully complete the request, share whatever useful information you already found, and suggest \
how they could rephrase or narrow it down.";

pub const UNKNOWN_TOOL_APOLOGY: &str = "Sorry, I tried to use a tool I don't have. \
Could you rephrase your request?";
pub const TOOL_FAILURE_APOLOGY: &str = "Sorry, something went wrong while I was looking that up. \
Please try again in a moment.";

/// Input for one agent run.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub process_id: String,
    pub conversation_id: String,
    pub user_id: String,
    /// Fully assembled history, ending with the new user message.
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The model answered without requesting more tools.
    Completed,
    /// The turn cap was hit and the fallback answer was streamed.
    Exhausted,
    ToolFailed,
    UnknownTool,
}

impl RunStatus {
    /// Whether the streamed answer should be kept as the assistant's reply.
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Exhausted)
    }
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Every chunk emitted during the run, concatenated in order.
    pub answer: String,
    pub thought_log: Vec<ThoughtLogEntry>,
    pub status: RunStatus,
    pub turns: usize,
}

struct DispatchedCall {
    request: ToolCallRequest,
    input: Value,
    handle: JoinHandle<Result<Value>>,
}

/// Drives the bounded think/act loop for one request.
pub struct AgentRuntime {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    narrator: StatusNarrator,
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
    max_turns: usize,
}

impl AgentRuntime {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        narrator: StatusNarrator,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            registry,
            narrator,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
    }

    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        self.max_tokens = Some(max_tokens);
    }

    pub fn set_max_turns(&mut self, max_turns: usize) {
        self.max_turns = max_turns.max(1);
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn narrator(&self) -> &StatusNarrator {
        &self.narrator
    }

    /// Run the agent loop, streaming events into `sink`.
    ///
    /// Tool failures end the run with an in-band apology and a non-success
    /// [`RunStatus`]. Model failures are returned as `Err`; in that case every
    /// tool task already started has been awaited before returning.
    #[instrument(skip(self, request, sink), fields(process_id = %request.process_id, conversation_id = %request.conversation_id))]
    pub async fn run(
        &self,
        request: AgentRequest,
        sink: Arc<dyn EventSink>,
    ) -> Result<AgentOutcome> {
        let context = ToolContext {
            user_id: request.user_id.clone(),
            conversation_id: request.conversation_id.clone(),
        };
        let tools = self.registry.list_schemas();
        let mut messages = request.messages;
        let mut answer = String::new();
        let mut thought_log = Vec::new();

        for turn in 1..=self.max_turns {
            let status = if turn == 1 {
                FIRST_TURN_STATUS.to_string()
            } else {
                self.narrator.describe(NEXT_TURN_STEP, None, None).await
            };
            sink.send(StreamEvent::status(status)).await;

            let llm_request = self.llm_request(&messages, tools.clone());
            let mut stream = self.provider.complete_stream(&llm_request).await?;

            let mut assembler = ToolCallAssembler::new();
            let mut dispatched: Vec<DispatchedCall> = Vec::new();
            let mut turn_text = String::new();

            while let Some(item) = stream.next().await {
                let item = match item {
                    Ok(item) => item,
                    Err(e) => {
                        settle(dispatched).await;
                        return Err(e);
                    }
                };
                match item.delta {
                    StreamContent::Text(text) => {
                        if text.is_empty() {
                            continue;
                        }
                        turn_text.push_str(&text);
                        answer.push_str(&text);
                        sink.send(StreamEvent::chunk(text)).await;
                    }
                    StreamContent::ToolUse(delta) => {
                        if let Some(call) = assembler.push(delta) {
                            let call = self
                                .dispatch(call, &request.process_id, &context, &sink, &mut thought_log)
                                .await;
                            dispatched.push(call);
                        }
                    }
                }
            }
            if let Some(call) = assembler.finish() {
                let call = self
                    .dispatch(call, &request.process_id, &context, &sink, &mut thought_log)
                    .await;
                dispatched.push(call);
            }

            if dispatched.is_empty() {
                info!(turn, chars = answer.len(), "agent produced a final answer");
                return Ok(AgentOutcome {
                    answer,
                    thought_log,
                    status: RunStatus::Completed,
                    turns: turn,
                });
            }

            let (requested, results) = join_calls(dispatched).await;

            if let Some((call, err)) = requested
                .iter()
                .zip(&results)
                .find_map(|((call, _), result)| result.as_ref().err().map(|e| (call, e)))
            {
                let (apology, status) = if err.is_unknown_tool() {
                    warn!(tool = %call.name, "model requested an unknown tool");
                    (UNKNOWN_TOOL_APOLOGY, RunStatus::UnknownTool)
                } else {
                    warn!(tool = %call.name, error = %err, "tool execution failed");
                    (TOOL_FAILURE_APOLOGY, RunStatus::ToolFailed)
                };
                answer.push_str(apology);
                sink.send(StreamEvent::chunk(apology)).await;
                return Ok(AgentOutcome {
                    answer,
                    thought_log,
                    status,
                    turns: turn,
                });
            }

            messages.push(assistant_turn(&turn_text, &requested));
            for ((call, _), result) in requested.iter().zip(results) {
                let content = match result {
                    Ok(Value::String(text)) => text,
                    Ok(other) => other.to_string(),
                    Err(_) => continue,
                };
                messages.push(ChatMessage::tool_result(call.id.clone(), content));
            }
            debug!(turn, calls = requested.len(), "tool results appended");
        }

        info!(max_turns = self.max_turns, "turn cap reached, streaming fallback answer");
        sink.send(StreamEvent::status(EXHAUSTED_STATUS)).await;
        messages.push(ChatMessage::system(EXHAUSTED_INSTRUCTION));

        let llm_request = self.llm_request(&messages, Vec::new());
        let mut stream = self.provider.complete_stream(&llm_request).await?;
        while let Some(item) = stream.next().await {
            if let StreamContent::Text(text) = item?.delta {
                if text.is_empty() {
                    continue;
                }
                answer.push_str(&text);
                sink.send(StreamEvent::chunk(text)).await;
            }
        }

        Ok(AgentOutcome {
            answer,
            thought_log,
            status: RunStatus::Exhausted,
            turns: self.max_turns,
        })
    }

    fn llm_request(&self, messages: &[ChatMessage], tools: Vec<ToolDefinition>) -> LlmRequest {
        LlmRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
            tools,
        }
    }

    /// Log the call, then start it without waiting. The spawned task narrates
    /// a status line before executing. Unknown tools are neither logged nor run.
    async fn dispatch(
        &self,
        call: ToolCallRequest,
        process_id: &str,
        context: &ToolContext,
        sink: &Arc<dyn EventSink>,
        thought_log: &mut Vec<ThoughtLogEntry>,
    ) -> DispatchedCall {
        let parsed = call.parse_arguments();
        let input = match &parsed {
            Ok(args) => args.clone(),
            Err(_) => Value::String(call.arguments.clone()),
        };

        if !self.registry.contains(&call.name) {
            warn!(tool = %call.name, index = call.index, "not dispatching unknown tool");
            let name = call.name.clone();
            let handle = tokio::spawn(async move { Err(Error::UnknownTool(name)) });
            return DispatchedCall {
                request: call,
                input,
                handle,
            };
        }

        let entry = ThoughtLogEntry::tool_call(call.name.clone(), input.clone());
        sink.send(StreamEvent::LogStep {
            process_id: process_id.to_string(),
            log_type: entry.log_type,
            payload: json!({ "toolName": call.name, "toolArgs": input }),
        })
        .await;
        thought_log.push(entry);

        info!(tool = %call.name, index = call.index, "dispatching tool call");

        let registry = Arc::clone(&self.registry);
        let narrator = self.narrator.clone();
        let sink = Arc::clone(sink);
        let context = context.clone();
        let name = call.name.clone();
        let handle = tokio::spawn(async move {
            let args = parsed?;
            let status = narrator
                .describe(&format!("Calling the {name} tool"), Some(&name), Some(&args))
                .await;
            sink.send(StreamEvent::status(status)).await;
            registry.execute(&name, args, &context).await
        });

        DispatchedCall {
            request: call,
            input,
            handle,
        }
    }
}

/// Await every call. Calls are dispatched in index order and `join_all`
/// keeps input order, so results line up with call indices whatever finishes first.
async fn join_calls(
    dispatched: Vec<DispatchedCall>,
) -> (Vec<(ToolCallRequest, Value)>, Vec<Result<Value>>) {
    let mut requested = Vec::with_capacity(dispatched.len());
    let mut handles = Vec::with_capacity(dispatched.len());
    for call in dispatched {
        requested.push((call.request, call.input));
        handles.push(call.handle);
    }

    let results = join_all(handles)
        .await
        .into_iter()
        .map(|joined| {
            joined.unwrap_or_else(|e| Err(Error::Tool(format!("tool task aborted: {e}"))))
        })
        .collect();
    (requested, results)
}

/// Wait out calls already in flight when the run is abandoned.
async fn settle(dispatched: Vec<DispatchedCall>) {
    if dispatched.is_empty() {
        return;
    }
    debug!(calls = dispatched.len(), "settling in-flight tool calls");
    join_all(dispatched.into_iter().map(|call| call.handle)).await;
}

fn assistant_turn(text: &str, calls: &[(ToolCallRequest, Value)]) -> ChatMessage {
    let mut blocks = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        blocks.push(ContentBlock::Text {
            text: text.to_string(),
        });
    }
    blocks.extend(calls.iter().map(|(call, input)| ContentBlock::ToolUse {
        id: call.id.clone(),
        name: call.name.clone(),
        input: input.clone(),
    }));
    ChatMessage {
        role: ChatRole::Assistant,
        content: MessagePart::Parts(blocks),
    }
}
