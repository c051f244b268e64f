use std::sync::Arc;

use async_trait::async_trait;
use garimpo_common::{Result, ThoughtLogEntry};
use tracing::{error, info, warn};

use crate::events::{EventSink, StreamEvent};
use crate::runtime::{AgentOutcome, AgentRequest, AgentRuntime};

const RUN_FAILED_MESSAGE: &str = "Sorry, I couldn't finish thinking about that. Please try again.";
const SAVE_FAILED_MESSAGE: &str = "Your answer was shown but could not be saved to the conversation.";

/// Stores the assistant's final answer once a run succeeds.
#[async_trait]
pub trait TranscriptRecorder: Send + Sync {
    async fn record_answer(
        &self,
        conversation_id: &str,
        answer: &str,
        thought_log: &[ThoughtLogEntry],
    ) -> Result<()>;
}

/// What happened during one driven turn.
#[derive(Debug)]
pub struct TurnReport {
    pub process_id: String,
    pub outcome: Option<AgentOutcome>,
    pub persisted: bool,
    pub error: Option<String>,
}

/// Run one agent turn end to end: `process_start`, the agent loop,
/// `process_end` or `error`, persistence on success, and always `close` last.
///
/// The loop runs in its own task so a panic inside it still yields `close`.
pub async fn drive_turn(
    runtime: Arc<AgentRuntime>,
    request: AgentRequest,
    sink: Arc<dyn EventSink>,
    recorder: Arc<dyn TranscriptRecorder>,
) -> TurnReport {
    let process_id = request.process_id.clone();
    let conversation_id = request.conversation_id.clone();
    let mut report = TurnReport {
        process_id: process_id.clone(),
        outcome: None,
        persisted: false,
        error: None,
    };

    sink.send(StreamEvent::ProcessStart {
        process_id: process_id.clone(),
    })
    .await;

    let run_sink = Arc::clone(&sink);
    let joined = tokio::spawn(async move { runtime.run(request, run_sink).await }).await;

    match joined {
        Ok(Ok(outcome)) => {
            sink.send(StreamEvent::ProcessEnd {
                thought_log: outcome.thought_log.clone(),
            })
            .await;

            if outcome.status.is_success() && !outcome.answer.is_empty() {
                match recorder
                    .record_answer(&conversation_id, &outcome.answer, &outcome.thought_log)
                    .await
                {
                    Ok(()) => {
                        report.persisted = true;
                        info!(%conversation_id, "assistant answer saved");
                    }
                    Err(e) => {
                        error!(%conversation_id, "failed to save assistant answer: {e}");
                        report.error = Some(e.to_string());
                        sink.send(StreamEvent::Error {
                            message: SAVE_FAILED_MESSAGE.to_string(),
                        })
                        .await;
                    }
                }
            } else {
                info!(status = ?outcome.status, "run ended without an answer to save");
            }
            report.outcome = Some(outcome);
        }
        Ok(Err(e)) => {
            error!(%conversation_id, "agent run failed: {e}");
            report.error = Some(e.to_string());
            sink.send(StreamEvent::Error {
                message: RUN_FAILED_MESSAGE.to_string(),
            })
            .await;
        }
        Err(join_error) => {
            error!(%conversation_id, "agent task aborted: {join_error}");
            report.error = Some(join_error.to_string());
            sink.send(StreamEvent::Error {
                message: RUN_FAILED_MESSAGE.to_string(),
            })
            .await;
        }
    }

    if !sink.is_open() {
        warn!(%process_id, "client disconnected before the turn finished");
    }
    sink.send(StreamEvent::Close).await;
    report
}
