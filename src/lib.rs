pub mod cli;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod resolver;
pub mod server;
pub mod store;

pub use commands::{Command, CommandEnvelope, CommandResponse, Engine};
pub use error::{EngineError, EngineResult, ErrorKind};
