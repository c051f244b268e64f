use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use bytes::Bytes;
use garimpo_agents::conversation::assemble;
use garimpo_agents::{AgentRequest, EventSink, TranscriptRecorder, drive_turn};
use garimpo_common::{Error, Result, Sender, ThoughtLogEntry};
use garimpo_db::ConversationStore;
use garimpo_security::InputValidator;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::caller::Caller;
use crate::error::{ApiError, ApiResult};
use crate::sse::{SseSink, sse_response};
use crate::state::{SharedState, lock};

const STREAM_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(rename = "conversationId", default)]
    pub conversation_id: Option<String>,
}

/// POST /api/chat: store the user's message, creating the conversation on first contact.
pub async fn post_message(
    State(state): State<SharedState>,
    Caller(user_id): Caller,
    Json(body): Json<ChatRequest>,
) -> ApiResult<Json<Value>> {
    let message = InputValidator::chat_message(&body.message)?;

    let conversation_id = match body.conversation_id {
        Some(raw) => {
            let id = InputValidator::identifier(&raw, "conversation id")?;
            ensure_owner(&state, &id, &user_id)?;
            id
        }
        None => {
            let title = state.runtime.narrator().generate_title(&message).await;
            let summary = lock(&state.conversations)?.create_conversation(&user_id, &title)?;
            info!(conversation_id = %summary.id, "created conversation");
            summary.id
        }
    };

    lock(&state.conversations)?.append_message(&conversation_id, Sender::User, &message, &[])?;
    Ok(Json(json!({ "conversationId": conversation_id })))
}

/// GET /api/chat/stream/{conversationId}: answer the latest user message as an SSE stream.
///
/// The agent run is detached from the response, so a client that disconnects
/// mid-stream still gets its answer persisted.
#[instrument(skip_all, fields(conversation_id = %conversation_id))]
pub async fn stream_answer(
    State(state): State<SharedState>,
    Caller(user_id): Caller,
    Path(conversation_id): Path<String>,
) -> ApiResult<Response> {
    let conversation_id = InputValidator::identifier(&conversation_id, "conversation id")?;
    ensure_owner(&state, &conversation_id, &user_id)?;

    let history = lock(&state.conversations)?.get_history(&conversation_id)?;
    match history.last() {
        Some(last) if last.sender == Sender::User => {}
        _ => {
            return Err(
                Error::Validation("conversation has no pending user message".into()).into(),
            );
        }
    }
    let preferences = lock(&state.preferences)?.get(&user_id)?;

    let request = AgentRequest {
        process_id: uuid::Uuid::new_v4().to_string(),
        conversation_id,
        user_id,
        messages: assemble(&state.persona, preferences.as_ref(), &history),
    };

    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_BUFFER);
    let sink: Arc<dyn EventSink> = Arc::new(SseSink::new(tx));
    let recorder: Arc<dyn TranscriptRecorder> =
        Arc::new(StoreRecorder::new(Arc::clone(&state.conversations)));
    let runtime = Arc::clone(&state.runtime);

    tokio::spawn(async move {
        let report = drive_turn(runtime, request, sink, recorder).await;
        info!(
            process_id = %report.process_id,
            persisted = report.persisted,
            failed = report.error.is_some(),
            "turn finished"
        );
    });

    Ok(sse_response(rx))
}

/// 404 unless the conversation exists and belongs to `user_id`.
pub(crate) fn ensure_owner(
    state: &SharedState,
    conversation_id: &str,
    user_id: &str,
) -> std::result::Result<(), ApiError> {
    let owner = lock(&state.conversations)?.conversation_owner(conversation_id)?;
    match owner {
        Some(owner) if owner == user_id => Ok(()),
        _ => Err(ApiError::not_found("conversation")),
    }
}

/// Persists the final answer as an `ai` message in the conversation store.
pub struct StoreRecorder {
    store: Arc<Mutex<ConversationStore>>,
}

impl StoreRecorder {
    pub fn new(store: Arc<Mutex<ConversationStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TranscriptRecorder for StoreRecorder {
    async fn record_answer(
        &self,
        conversation_id: &str,
        answer: &str,
        thought_log: &[ThoughtLogEntry],
    ) -> Result<()> {
        lock(&self.store)?.append_message(conversation_id, Sender::Ai, answer, thought_log)?;
        Ok(())
    }
}
