//! Detached pipeline execution
//!
//! Mutating operations acknowledge the caller and then keep running in the
//! background. Every such task is spawned here so that none is left
//! unobserved: the tracker knows what is in flight, and a panicking pipeline
//! is caught and logged instead of disappearing silently.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

#[derive(Clone, Default)]
pub struct PipelineExecutor {
    tracker: TaskTracker,
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `pipeline` in the background. The pipeline must record its own
    /// outcome; a panic is logged under `name`.
    pub fn spawn<F>(&self, name: impl Into<String>, pipeline: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!("Starting pipeline {}", name);

        self.tracker.spawn(async move {
            if let Err(panic) = AssertUnwindSafe(pipeline).catch_unwind().await {
                error!("Pipeline {} panicked: {}", name, panic_message(panic.as_ref()));
            }
        });
    }

    /// Pipelines still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every pipeline spawned so far has finished
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
