use std::net::SocketAddr;
use std::sync::Arc;

use garimpo_common::{Error, Result};
use garimpo_config::AppConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::{AppState, SharedState};

/// HTTP server for the chat API, the event stream and the static web client.
pub struct GatewayServer {
    state: SharedState,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Result<Self> {
        Ok(Self::from_state(Arc::new(AppState::from_config(config)?)))
    }

    pub fn from_state(state: SharedState) -> Self {
        Self { state }
    }

    pub async fn run(self) -> Result<()> {
        let gateway = &self.state.config.gateway;
        let addr = format!("{}:{}", gateway.host, gateway.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Gateway(format!("failed to bind {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until Ctrl-C.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| Error::Gateway(format!("failed to read local address: {e}")))?;
        info!(address = %local, model = %self.state.runtime.model(), "garimpo gateway listening");

        let router = build_router(self.state);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Gateway(format!("server error: {e}")))?;

        info!("gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
