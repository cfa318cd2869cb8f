//! # Function and Namespace Orchestrators
//!
//! Every mutating operation runs the same five-step protocol:
//!
//! ```text
//!   validate & load ──► commit intent ──► acknowledge ─┐
//!     (sync, errors        (PENDING)       (record id)  │
//!      go to caller)                                    ▼
//!                                   execute (detached) ──► finalize
//!                                   cluster / worker        SUCCEEDED | FAILED
//! ```
//!
//! Steps one to three happen on the caller's path; four and five run on the
//! [`PipelineExecutor`]. A pipeline failure is never returned to the caller.
//! It is recorded on the record's status and seen on the next status read.
//!
//! The two orchestrators depend on each other only through
//! [`NamespaceDeletionCollaborator`]: deleting a namespace cascades into its
//! functions, and the function side exposes just that one operation.

pub mod function;
pub mod namespace;
pub mod pipeline;

pub use function::{FunctionOrchestrator, FunctionStatusReport, LogWatermark, PodLogs, PodStatusEntry};
pub use namespace::NamespaceOrchestrator;
pub use pipeline::PipelineExecutor;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::cluster::ClusterApi;
use crate::config::MetricsConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics::{MetricsExecutor, TimeWindow};
use crate::model::{CallerIdentity, Namespace, Status, Step};
use crate::resolver::{ClusterConfigResolver, ResolvedCluster};
use crate::store::{LifecycleStore, StoreError};

/// Acknowledgement of an accepted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub id: String,
}

impl Accepted {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The one thing the namespace side needs from the function side
#[async_trait]
pub trait NamespaceDeletionCollaborator: Send + Sync {
    /// Remove every function of `namespace` together with its source.
    /// Returns how many function records were deleted.
    async fn delete_all_in_namespace(&self, namespace: &Namespace) -> EngineResult<usize>;
}

/// Components shared by both orchestrators
#[derive(Clone)]
pub struct Dependencies {
    pub store: Arc<dyn LifecycleStore>,
    pub resolver: Arc<dyn ClusterConfigResolver>,
    pub cluster: Arc<dyn ClusterApi>,
    pub metrics: MetricsExecutor,
    pub metrics_config: MetricsConfig,
    pub pipelines: PipelineExecutor,
}

/// Which kind of record a status write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Record {
    Function,
    Namespace,
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Record::Function => write!(f, "function"),
            Record::Namespace => write!(f, "namespace"),
        }
    }
}

impl Dependencies {
    /// Load a namespace the caller owns. A namespace owned by somebody else
    /// is reported exactly like a missing one.
    pub(crate) async fn owned_namespace(
        &self,
        caller: &CallerIdentity,
        id: &str,
    ) -> EngineResult<Namespace> {
        let namespace = self
            .store
            .get_namespace(id)
            .await
            .map_err(|e| not_found_as("Namespace", id, e))?;

        if !namespace.is_owned_by(&caller.id) {
            return Err(EngineError::NotFound(format!("Namespace '{}'", id)));
        }
        Ok(namespace)
    }

    pub(crate) async fn resolve_cluster(
        &self,
        caller: &CallerIdentity,
        namespace: &Namespace,
    ) -> EngineResult<ResolvedCluster> {
        Ok(self.resolver.resolve(caller, &namespace.id_cluster).await?)
    }

    /// Metrics window ending now; `range` falls back to the configured
    /// default
    pub(crate) fn metrics_window(&self, range: Option<i64>) -> TimeWindow {
        TimeWindow::ending_at(
            Utc::now(),
            range.unwrap_or(self.metrics_config.default_range_secs),
            self.metrics_config.step_secs,
        )
    }

    /// Write a status. A failed write is logged and dropped.
    pub(crate) async fn record_status(&self, record: Record, id: &str, status: Status) {
        let written = match record {
            Record::Function => self.store.update_function_status(id, status).await,
            Record::Namespace => self.store.update_namespace_status(id, status).await,
        };
        if let Err(e) = written {
            error!("Failed to record status of {} {}: {}", record, id, e);
        }
    }

    /// Record the outcome of a pipeline: `success` when it completed,
    /// `failure_step/FAILED` with the error text otherwise
    pub(crate) async fn finalize(
        &self,
        record: Record,
        id: &str,
        operation: &str,
        result: EngineResult<()>,
        success: Status,
        failure_step: Step,
    ) {
        let status = match result {
            Ok(()) => {
                info!("{} {} {} succeeded", operation, record, id);
                success
            }
            Err(e) => {
                error!("{} {} {} failed: {}", operation, record, id, e);
                Status::failed(failure_step, e.to_string())
            }
        };
        self.record_status(record, id, status).await;
    }
}

/// Rewrite a store miss into a caller-facing `NotFound` naming the entity
pub(crate) fn not_found_as(entity: &str, id: &str, err: StoreError) -> EngineError {
    match err {
        StoreError::NotFound(_) => EngineError::NotFound(format!("{} '{}'", entity, id)),
        other => other.into(),
    }
}
