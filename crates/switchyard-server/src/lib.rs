// Switchyard server
// Decision: One pool and one task queue per process, built once at startup and
//           shared with every request handler through axum state.
// Decision: DATABASE_URL is optional; without it the in-memory record store is used.

pub mod app;
pub mod config;
pub mod error;
pub mod processor;
pub mod routes;
pub mod state;

pub use app::{build_state, router, shutdown};
pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;
