//! # Cluster Interaction Layer
//!
//! Every call the engine makes against a tenant's Kubernetes cluster goes
//! through the [`ClusterApi`] trait. The production implementation,
//! [`KubeCluster`], talks to the API server with kube-rs; orchestrator tests
//! substitute an in-process fake.
//!
//! ## Error model
//!
//! - Bad or unreachable credentials fail fast with [`ClusterError::Unreachable`]
//!   and are never retried.
//! - Reads that race object propagation (a deployment the worker has only
//!   just created) go through [`RetryPolicy`].
//! - Deletes of objects that are already gone succeed.
//!
//! ```text
//!   Orchestrator ──► ClusterApi ──► KubeCluster ──► kube::Client (cached per kubeconfig)
//!                                        │
//!                                        ├── manifests (pure builders)
//!                                        ├── pod      (status derivation)
//!                                        └── logs     (watermark filtering)
//! ```

pub mod k8s;
pub mod logs;
pub mod manifests;
pub mod pod;
pub mod retry;

pub use k8s::KubeCluster;
pub use logs::{parse_log_batch, LogBatch};
pub use pod::{derive_pod_status, log_container_for, PodStatus, PodSummary};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::AutoscalingPolicy;

/// Label the build worker puts on every pod of a function
pub const FUNCTION_LABEL: &str = "function";

/// Errors returned by cluster operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Cluster unreachable: {0}")]
    Unreachable(String),

    #[error("Cluster object not found: {0}")]
    NotFound(String),

    #[error("Cluster object already exists: {0}")]
    AlreadyExists(String),

    #[error("Cluster request failed: {0}")]
    Transient(String),

    #[error("No load balancer address available: {0}")]
    LoadBalancerUnavailable(String),
}

impl ClusterError {
    /// Whether the retry policy may try the call again
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClusterError::NotFound(_) | ClusterError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

/// Access credentials for one cluster
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCredentials {
    /// Kubeconfig document (YAML)
    pub kubeconfig: String,
}

impl ClusterCredentials {
    pub fn new(kubeconfig: impl Into<String>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
        }
    }
}

impl std::fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("kubeconfig", &"<redacted>")
            .finish()
    }
}

/// Operations the engine performs against a cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create a namespace. A repeated create surfaces `AlreadyExists`.
    async fn create_namespace(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
    ) -> Result<(), ClusterError>;

    async fn delete_namespace(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
    ) -> Result<(), ClusterError>;

    /// Pods carrying the function label for `function`, in list order
    async fn list_pods_for_function(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
    ) -> Result<Vec<Pod>, ClusterError>;

    /// Read the deployment status (retried), then patch `spec.replicas`
    async fn scale_deployment(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;

    /// Read the deployment status (retried), then create a horizontal
    /// autoscaler with `max` forced above `min`
    async fn enable_autoscaling(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
        policy: &AutoscalingPolicy,
    ) -> Result<(), ClusterError>;

    /// Remove the function's deployment objects; absent objects are fine
    async fn delete_function(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
    ) -> Result<(), ClusterError>;

    async fn create_api_key_ingress_rule(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        api_key: &str,
    ) -> Result<(), ClusterError>;

    /// External address of the platform's load balancer
    async fn load_balancer_address(&self, creds: &ClusterCredentials)
        -> Result<String, ClusterError>;

    async fn create_metrics_ingress(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        domain: &str,
    ) -> Result<(), ClusterError>;

    /// Log lines strictly after `since`, noise filtered per configuration
    async fn fetch_pod_logs(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogBatch, ClusterError>;
}
