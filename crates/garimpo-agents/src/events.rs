use async_trait::async_trait;
use garimpo_common::{LogType, ThoughtLogEntry};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Events streamed to the client during one turn, serialized with a `type` discriminant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ProcessStart {
        #[serde(rename = "processId")]
        process_id: String,
    },
    Status {
        message: String,
    },
    Chunk {
        content: String,
    },
    LogStep {
        #[serde(rename = "processId")]
        process_id: String,
        #[serde(rename = "logType")]
        log_type: LogType,
        payload: serde_json::Value,
    },
    ProcessEnd {
        #[serde(rename = "thoughtLog")]
        thought_log: Vec<ThoughtLogEntry>,
    },
    Error {
        message: String,
    },
    Close,
}

impl StreamEvent {
    pub fn status(message: impl Into<String>) -> Self {
        StreamEvent::Status {
            message: message.into(),
        }
    }

    pub fn chunk(content: impl Into<String>) -> Self {
        StreamEvent::Chunk {
            content: content.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::ProcessStart { .. } => "process_start",
            StreamEvent::Status { .. } => "status",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::LogStep { .. } => "log_step",
            StreamEvent::ProcessEnd { .. } => "process_end",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Close => "close",
        }
    }
}

/// Outbound side of one streamed response.
///
/// `send` never fails: once the client is gone, writes are dropped.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: StreamEvent);

    /// Whether the receiving side is still connected.
    fn is_open(&self) -> bool;
}

/// Sink backed by an in-process channel, used by the CLI and tests.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: StreamEvent) {
        if self.tx.is_closed() {
            debug!(kind = event.kind(), "receiver gone, dropping event");
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("receiver dropped while sending event");
        }
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
