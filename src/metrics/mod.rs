//! Metrics read path
//!
//! Named PromQL queries are run against the tenant's metrics ingress and
//! returned as a name-to-raw-result map. A failing query never fails the
//! batch: it is retried, and if it still fails its slot is filled with an
//! empty-result placeholder.

pub mod prometheus;
pub mod queries;

pub use prometheus::PrometheusClient;
pub use queries::{function_queries, function_selector, namespace_queries, NamedQuery};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MetricsConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Metrics endpoint not found: {0}")]
    NotFound(String),

    #[error("Metrics backend returned {0}: {1}")]
    Http(u16, String),

    #[error("Failed to reach metrics backend: {0}")]
    Transport(String),

    #[error("Failed to decode metrics response: {0}")]
    Decode(String),
}

impl MetricsError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MetricsError::NotFound(_))
    }
}

/// Where a tenant's metrics are served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsTarget {
    /// Host or address of the tenant's ingress
    pub host: String,
    pub api_key: String,
    /// Cluster namespace the queries are scoped to
    pub namespace: String,
}

/// `[start, end]` in unix seconds plus the sample step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl TimeWindow {
    /// Window of `range_secs` ending at the minute boundary at or before `now`
    pub fn ending_at(now: DateTime<Utc>, range_secs: i64, step: i64) -> Self {
        let ts = now.timestamp();
        let end = ts - ts.rem_euclid(60);
        Self {
            start: end - range_secs,
            end,
            step,
        }
    }
}

/// Name-to-raw-result mapping returned for a batch
pub type MetricsResult = BTreeMap<String, Value>;

/// Result stored for a query that could not be answered
pub fn placeholder(error: &MetricsError) -> Value {
    json!({
        "status": error.to_string(),
        "data": { "result": [] }
    })
}

/// Transport for single range queries
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    async fn query_range(
        &self,
        target: &MetricsTarget,
        promql: &str,
        window: &TimeWindow,
    ) -> Result<Value, MetricsError>;
}

/// Runs batches of named queries with per-query retry
#[derive(Clone)]
pub struct MetricsExecutor {
    backend: Arc<dyn MetricsBackend>,
    max_attempts: u32,
    base_delay: Duration,
}

impl MetricsExecutor {
    pub fn new(backend: Arc<dyn MetricsBackend>, config: &MetricsConfig) -> Self {
        Self::with_policy(backend, config.max_attempts, config.base_delay())
    }

    pub fn with_policy(
        backend: Arc<dyn MetricsBackend>,
        max_attempts: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Run every query concurrently; each name maps to its raw result or
    /// to a [`placeholder`]
    pub async fn query_metrics(
        &self,
        target: &MetricsTarget,
        queries: Vec<NamedQuery>,
        window: &TimeWindow,
    ) -> MetricsResult {
        let runs = queries.iter().map(|q| self.load(target, q, window));
        let results = join_all(runs).await;

        queries
            .iter()
            .zip(results)
            .map(|(q, value)| (q.name.to_string(), value))
            .collect()
    }

    /// After failed attempt `k` (1-based) wait `k * base_delay`; not-found
    /// is final
    async fn load(&self, target: &MetricsTarget, query: &NamedQuery, window: &TimeWindow) -> Value {
        let promql = query.promql.trim();
        let mut attempt = 1;

        loop {
            match self.backend.query_range(target, promql, window).await {
                Ok(value) => return value,
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    debug!(
                        "Metrics query {} failed (attempt {}/{}): {}",
                        query.name, attempt, self.max_attempts, e
                    );
                    tokio::time::sleep(self.base_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "Metrics query {} for {} gave up after {} attempt(s): {}",
                        query.name, target.namespace, attempt, e
                    );
                    return placeholder(&e);
                }
            }
        }
    }
}
