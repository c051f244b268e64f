pub mod api;
pub mod caller;
pub mod chat;
pub mod error;
pub mod movie_tools;
pub mod router;
pub mod server;
pub mod sse;
pub mod state;
pub mod tmdb;

pub use router::build_router;
pub use server::GatewayServer;
pub use state::{AppState, SharedState};
