use garimpo_common::{Error, Result};
use serde_json::Value;
use tracing::warn;

use crate::providers::ToolUseDelta;

/// A tool call whose fragments have all arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub index: u32,
    pub id: String,
    pub name: String,
    /// Raw JSON text as streamed by the model.
    pub arguments: String,
}

impl ToolCallRequest {
    /// Decode the argument text. An empty payload means "no arguments".
    pub fn parse_arguments(&self) -> Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments).map_err(|e| {
            Error::Tool(format!("malformed arguments for {}: {e}", self.name))
        })
    }
}

#[derive(Debug)]
struct PendingCall {
    index: u32,
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn start(delta: ToolUseDelta) -> Self {
        let mut call = Self {
            index: delta.index,
            id: None,
            name: String::new(),
            arguments: String::new(),
        };
        call.absorb(delta);
        call
    }

    fn absorb(&mut self, delta: ToolUseDelta) {
        if self.id.is_none() {
            self.id = delta.id.filter(|id| !id.is_empty());
        }
        if let Some(name) = delta.name {
            self.name.push_str(&name);
        }
        self.arguments.push_str(&delta.input);
    }

    fn into_request(self) -> ToolCallRequest {
        let id = self
            .id
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
        ToolCallRequest {
            index: self.index,
            id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

/// Builds tool calls from streamed fragments keyed by index.
///
/// Call `k` is complete as soon as a fragment for a later index arrives; the
/// last call is only complete when the stream ends and [`finish`](Self::finish) is called.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    current: Option<PendingCall>,
    last_completed: Option<u32>,
    completed: usize,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns the previous call if this fragment completed it.
    pub fn push(&mut self, delta: ToolUseDelta) -> Option<ToolCallRequest> {
        if let Some(current) = self.current.as_mut() {
            if current.index == delta.index {
                current.absorb(delta);
                return None;
            }
            if delta.index < current.index {
                warn!(
                    index = delta.index,
                    current = current.index,
                    "ignoring fragment for an already completed tool call"
                );
                return None;
            }
        } else if self.last_completed.is_some_and(|last| delta.index <= last) {
            warn!(index = delta.index, "ignoring fragment for an already completed tool call");
            return None;
        }

        let completed = self.take_current();
        self.current = Some(PendingCall::start(delta));
        completed
    }

    /// Complete the call still being assembled, if any.
    pub fn finish(&mut self) -> Option<ToolCallRequest> {
        self.take_current()
    }

    /// Number of calls completed so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    fn take_current(&mut self) -> Option<ToolCallRequest> {
        let call = self.current.take()?;
        self.last_completed = Some(call.index);
        self.completed += 1;
        Some(call.into_request())
    }
}
