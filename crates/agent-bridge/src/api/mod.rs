//! HTTP API module.
//!
//! Serves the client WebSocket endpoint and a health check.

mod handlers;
mod routes;
mod state;
mod ws;

pub use handlers::HealthResponse;
pub use routes::create_router;
pub use state::AppState;
