use chrono::{DateTime, Utc};

use crate::commands::Engine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            started_at: Utc::now(),
        }
    }

    /// Seconds since the server started
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
