use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post, put};
use serde_json::{Value, json};
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api;
use crate::caller::USER_ID_HEADER;
use crate::chat;
use crate::state::SharedState;

/// Build the main application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    // Per-IP rate limit from config (default: 1 req/sec, burst 60).
    let rl = &state.config.gateway.rate_limit;
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(rl.per_second.max(1))
        .burst_size(rl.burst_size.max(1))
        .finish()
        .expect("governor config should be valid");
    let governor_limiter = governor_conf.limiter().clone();
    let governor_layer = GovernorLayer::new(governor_conf);

    // Drop rate-limiter state for inactive IPs.
    tokio::spawn(async move {
        let interval = Duration::from_secs(60);
        loop {
            tokio::time::sleep(interval).await;
            governor_limiter.retain_recent();
        }
    });

    let cors = cors_layer(&state.config.gateway.cors_origins);
    let static_dir = state.config.gateway.static_dir.clone();

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/chat", post(chat::post_message))
        .route("/api/chat/stream/{id}", get(chat::stream_answer))
        .route("/api/conversations", get(api::list_conversations))
        .route("/api/conversations/{id}", delete(api::delete_conversation))
        .route(
            "/api/conversations/{id}/messages",
            get(api::conversation_messages),
        )
        .route(
            "/api/preferences",
            get(api::get_preferences)
                .post(api::add_preference)
                .delete(api::remove_preference),
        )
        .route("/api/preferences/notes", put(api::set_preference_notes))
        .with_state(state);

    if let Some(dir) = static_dir {
        let index = dir.join("index.html");
        router = router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
    }
    if let Some(cors) = cors {
        router = router.layer(cors);
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(governor_layer)
}

/// CORS for the configured web-client origins; `None` keeps the API same-origin only.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                HeaderName::from_static(USER_ID_HEADER),
            ]),
    )
}

async fn health() -> &'static str {
    "ok"
}

/// Version, configured model and whether the model provider answers.
async fn status(State(state): State<SharedState>) -> axum::Json<Value> {
    let provider = state.runtime.provider();
    let healthy = provider.health_check().await.unwrap_or(false);
    axum::Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.runtime.model(),
        "provider": provider.provider_id(),
        "providerHealthy": healthy,
        "maxTurns": state.runtime.max_turns(),
    }))
}
