pub mod conversation;
pub mod events;
pub mod narrator;
pub mod openai;
pub mod providers;
pub mod runtime;
pub mod tool_calls;
pub mod tools;
pub mod turn;

pub use events::{ChannelSink, EventSink, StreamEvent};
pub use narrator::{FALLBACK_STATUS, StatusNarrator};
pub use openai::OpenAiProvider;
pub use providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, LlmStream,
    LlmStreamResponse, MessagePart, StreamContent, ToolDefinition, ToolUseDelta, Usage,
};
pub use runtime::{AgentOutcome, AgentRequest, AgentRuntime, RunStatus};
pub use tool_calls::{ToolCallAssembler, ToolCallRequest};
pub use tools::{ToolContext, ToolHandler, ToolInvocation, ToolName, ToolRegistry};
pub use turn::{TranscriptRecorder, TurnReport, drive_turn};
