//! HTTP adapter over the command surface
//!
//! A thin transport: it decodes [`crate::commands::CommandEnvelope`]s, hands
//! them to the engine and maps the response's status code onto the HTTP
//! status.

pub mod handlers;
pub mod state;

pub use handlers::create_router;
pub use state::AppState;
