//! REST API for the safeguard engine.
//!
//! Exposes monitoring control, risk assessments, alert management,
//! configuration and operation supervision over HTTP.

/// Error types.
pub mod error;
/// Request handlers.
pub mod handlers;
/// API request/response models.
pub mod models;
/// Route definitions.
pub mod routes;
/// Server configuration and startup.
pub mod server;
/// Application state.
pub mod state;

pub use error::ApiError;
pub use routes::build_router;
pub use server::{ApiServer, ServerConfig};
pub use state::AppState;
