use std::convert::Infallible;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use garimpo_agents::{EventSink, StreamEvent};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Frame one event as a server-sent event line.
pub fn frame(event: &StreamEvent) -> Option<Bytes> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Bytes::from(format!("data: {json}\n\n"))),
        Err(e) => {
            warn!(error = %e, kind = event.kind(), "failed to serialize stream event");
            None
        }
    }
}

/// Event sink writing SSE frames into the response body channel.
///
/// Once the client disconnects the receiver is dropped and every write becomes a no-op.
#[derive(Clone)]
pub struct SseSink {
    tx: mpsc::Sender<Bytes>,
}

impl SseSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for SseSink {
    async fn send(&self, event: StreamEvent) {
        if self.tx.is_closed() {
            debug!(kind = event.kind(), "client gone, dropping event");
            return;
        }
        let Some(chunk) = frame(&event) else {
            return;
        };
        if self.tx.send(chunk).await.is_err() {
            debug!(kind = event.kind(), "client disconnected during write");
        }
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Streaming `text/event-stream` response fed by `rx`. The body ends when every sender is dropped.
pub fn sse_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<Bytes, Infallible>);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}
