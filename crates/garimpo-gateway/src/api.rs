use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use garimpo_common::{PreferenceCategory, PreferenceSet, StoredMessage};
use garimpo_db::ConversationSummary;
use garimpo_security::InputValidator;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::caller::Caller;
use crate::chat::ensure_owner;
use crate::error::{ApiError, ApiResult};
use crate::state::{SharedState, lock};

pub async fn list_conversations(
    State(state): State<SharedState>,
    Caller(user_id): Caller,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let conversations = lock(&state.conversations)?.list_conversations(&user_id)?;
    Ok(Json(conversations))
}

pub async fn conversation_messages(
    State(state): State<SharedState>,
    Caller(user_id): Caller,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    let conversation_id = InputValidator::identifier(&conversation_id, "conversation id")?;
    ensure_owner(&state, &conversation_id, &user_id)?;
    let history = lock(&state.conversations)?.get_history(&conversation_id)?;
    Ok(Json(history))
}

pub async fn delete_conversation(
    State(state): State<SharedState>,
    Caller(user_id): Caller,
    Path(conversation_id): Path<String>,
) -> ApiResult<StatusCode> {
    let conversation_id = InputValidator::identifier(&conversation_id, "conversation id")?;
    let deleted = lock(&state.conversations)?.delete_conversation(&conversation_id, &user_id)?;
    if !deleted {
        return Err(ApiError::not_found("conversation"));
    }
    info!(conversation_id = %conversation_id, "deleted conversation");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PreferenceItem {
    pub category: String,
    pub value: String,
}

impl PreferenceItem {
    fn validated(&self) -> garimpo_common::Result<(PreferenceCategory, String)> {
        let category: PreferenceCategory = self.category.parse()?;
        let value = InputValidator::preference_value(&self.value)?;
        Ok((category, value))
    }
}

pub async fn get_preferences(
    State(state): State<SharedState>,
    Caller(user_id): Caller,
) -> ApiResult<Json<PreferenceSet>> {
    let prefs = lock(&state.preferences)?.get(&user_id)?.unwrap_or_default();
    Ok(Json(prefs))
}

pub async fn add_preference(
    State(state): State<SharedState>,
    Caller(user_id): Caller,
    Json(item): Json<PreferenceItem>,
) -> ApiResult<Json<PreferenceSet>> {
    let (category, value) = item.validated()?;
    let prefs = lock(&state.preferences)?.add_item(&user_id, category, &value)?;
    Ok(Json(prefs))
}

#[derive(Debug, Deserialize)]
pub struct PreferenceNotes {
    #[serde(default)]
    pub notes: Option<String>,
}

/// PUT /api/preferences/notes: set the free-text note, or clear it with a blank or missing value.
pub async fn set_preference_notes(
    State(state): State<SharedState>,
    Caller(user_id): Caller,
    Json(body): Json<PreferenceNotes>,
) -> ApiResult<Json<PreferenceSet>> {
    let notes = match body.notes.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(InputValidator::chat_message(raw)?),
        _ => None,
    };
    let prefs = lock(&state.preferences)?.set_notes(&user_id, notes.as_deref())?;
    Ok(Json(prefs))
}

pub async fn remove_preference(
    State(state): State<SharedState>,
    Caller(user_id): Caller,
    Json(item): Json<PreferenceItem>,
) -> ApiResult<Json<Value>> {
    let (category, value) = item.validated()?;
    let removed = lock(&state.preferences)?.remove_item(&user_id, category, &value)?;
    Ok(Json(json!({ "removed": removed })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_item_rejects_unknown_category() {
        let item = PreferenceItem {
            category: "favorite_snacks".into(),
            value: "Popcorn".into(),
        };
        assert!(matches!(
            item.validated(),
            Err(garimpo_common::Error::Validation(_))
        ));
    }

    #[test]
    fn preference_item_trims_value() {
        let item = PreferenceItem {
            category: "favorite_directors".into(),
            value: "  Agnès Varda ".into(),
        };
        let (category, value) = item.validated().unwrap();
        assert_eq!(category, PreferenceCategory::FavoriteDirectors);
        assert_eq!(value, "Agnès Varda");
    }
}
