//! In-process stand-ins for the cluster, resolver, deploy worker and metrics
//! backend, plus helpers to wire them into an [`Engine`].

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Value};
use tokio::sync::Notify;

use faas_control::cluster::{parse_log_batch, ClusterApi, ClusterCredentials, ClusterError, LogBatch};
use faas_control::commands::Engine;
use faas_control::config::MetricsConfig;
use faas_control::dispatch::{DeployDispatcher, DeployRequest, DispatchError};
use faas_control::metrics::{MetricsBackend, MetricsError, MetricsExecutor, MetricsTarget, TimeWindow};
use faas_control::model::{AutoscalingPolicy, CallerIdentity, FunctionSpec, NamespaceSpec};
use faas_control::orchestrator::{Dependencies, PipelineExecutor};
use faas_control::resolver::{ClusterConfigResolver, ResolvedCluster, ResolverError};
use faas_control::store::MemoryStore;

pub const CLUSTER_ID: &str = "c1";
pub const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\n";

/// Find an available port for testing
pub fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to address")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

// ============================================================================
// Cluster
// ============================================================================

/// Records every call as `"<op> <namespace>[ <function>][ <arg>]"`, fails
/// the operations listed in `failures` and parks the operations listed in
/// `gates` until released
#[derive(Default)]
pub struct FakeCluster {
    pub calls: Mutex<Vec<String>>,
    pub failures: DashMap<&'static str, ClusterError>,
    pub gates: DashMap<&'static str, Arc<Notify>>,
    pub pods: DashMap<String, Vec<Pod>>,
    pub raw_logs: DashMap<String, String>,
}

impl FakeCluster {
    pub fn fail(&self, op: &'static str, err: ClusterError) {
        self.failures.insert(op, err);
    }

    /// Park every later call to `op` until the returned gate is notified
    pub fn hold(&self, op: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.insert(op, gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    async fn record(&self, op: &'static str, detail: String) -> Result<(), ClusterError> {
        self.calls.lock().unwrap().push(format!("{} {}", op, detail));
        let gate = self.gates.get(op).map(|g| g.value().clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create_namespace(
        &self,
        _creds: &ClusterCredentials,
        namespace: &str,
    ) -> Result<(), ClusterError> {
        self.record("create_namespace", namespace.to_string()).await
    }

    async fn delete_namespace(
        &self,
        _creds: &ClusterCredentials,
        namespace: &str,
    ) -> Result<(), ClusterError> {
        self.record("delete_namespace", namespace.to_string()).await
    }

    async fn list_pods_for_function(
        &self,
        _creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
    ) -> Result<Vec<Pod>, ClusterError> {
        self.record("list_pods", format!("{} {}", namespace, function)).await?;
        Ok(self
            .pods
            .get(function)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }

    async fn scale_deployment(
        &self,
        _creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        self.record("scale", format!("{} {} {}", namespace, function, replicas)).await
    }

    async fn enable_autoscaling(
        &self,
        _creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
        policy: &AutoscalingPolicy,
    ) -> Result<(), ClusterError> {
        let (min, max) = policy.replica_bounds();
        self.record(
            "autoscale",
            format!("{} {} {}-{}", namespace, function, min, max),
        )
        .await
    }

    async fn delete_function(
        &self,
        _creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
    ) -> Result<(), ClusterError> {
        self.record("delete_function", format!("{} {}", namespace, function)).await
    }

    async fn create_api_key_ingress_rule(
        &self,
        _creds: &ClusterCredentials,
        namespace: &str,
        _api_key: &str,
    ) -> Result<(), ClusterError> {
        self.record("api_key_rule", namespace.to_string()).await
    }

    async fn load_balancer_address(
        &self,
        _creds: &ClusterCredentials,
    ) -> Result<String, ClusterError> {
        self.record("load_balancer", String::new()).await?;
        Ok("203.0.113.10".to_string())
    }

    async fn create_metrics_ingress(
        &self,
        _creds: &ClusterCredentials,
        namespace: &str,
        domain: &str,
    ) -> Result<(), ClusterError> {
        self.record("metrics_ingress", format!("{} {}", namespace, domain)).await
    }

    async fn fetch_pod_logs(
        &self,
        _creds: &ClusterCredentials,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogBatch, ClusterError> {
        self.record(
            "logs",
            format!("{} {} {}", namespace, pod, container.unwrap_or("-")),
        )
        .await?;
        let raw = self
            .raw_logs
            .get(pod)
            .map(|r| r.value().clone())
            .unwrap_or_default();
        Ok(parse_log_batch(&raw, since, false))
    }
}

// ============================================================================
// Resolver, dispatcher, metrics
// ============================================================================

/// Knows exactly one cluster, open to every user
pub struct FakeResolver;

#[async_trait]
impl ClusterConfigResolver for FakeResolver {
    async fn resolve(
        &self,
        _caller: &CallerIdentity,
        id_cluster: &str,
    ) -> Result<ResolvedCluster, ResolverError> {
        if id_cluster != CLUSTER_ID {
            return Err(ResolverError::UnknownCluster(id_cluster.to_string()));
        }
        Ok(ResolvedCluster {
            credentials: ClusterCredentials::new(KUBECONFIG),
            id_cluster: CLUSTER_ID.to_string(),
            cluster_name: "test-cluster".to_string(),
        })
    }
}

#[derive(Default)]
pub struct FakeDispatcher {
    pub requests: Mutex<Vec<DeployRequest>>,
    pub reject_with: Mutex<Option<String>>,
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeDispatcher {
    /// Park every later dispatch until the returned gate is notified
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn requests(&self) -> Vec<DeployRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeployDispatcher for FakeDispatcher {
    async fn dispatch(&self, request: DeployRequest) -> Result<(), DispatchError> {
        self.requests.lock().unwrap().push(request);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.reject_with.lock().unwrap().clone() {
            Some(reason) => Err(DispatchError::Rejected(reason)),
            None => Ok(()),
        }
    }
}

/// Answers every query with its own PromQL echoed back
pub struct EchoMetrics;

#[async_trait]
impl MetricsBackend for EchoMetrics {
    async fn query_range(
        &self,
        target: &MetricsTarget,
        promql: &str,
        _window: &TimeWindow,
    ) -> Result<Value, MetricsError> {
        Ok(json!({
            "status": "success",
            "data": {"result": [{"namespace": target.namespace, "query": promql}]}
        }))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub engine: Engine,
    pub store: MemoryStore,
    pub cluster: Arc<FakeCluster>,
    pub dispatcher: Arc<FakeDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let cluster = Arc::new(FakeCluster::default());
        let dispatcher = Arc::new(FakeDispatcher::default());

        let deps = Dependencies {
            store: Arc::new(store.clone()),
            resolver: Arc::new(FakeResolver),
            cluster: cluster.clone(),
            metrics: MetricsExecutor::with_policy(
                Arc::new(EchoMetrics),
                5,
                Duration::from_millis(1),
            ),
            metrics_config: MetricsConfig::default(),
            pipelines: PipelineExecutor::new(),
        };

        Self {
            engine: Engine::new(deps, dispatcher.clone()),
            store,
            cluster,
            dispatcher,
        }
    }

    /// Create a namespace and wait for its provisioning pipeline
    pub async fn namespace(&self, caller: &CallerIdentity, name: &str) -> String {
        let accepted = self
            .engine
            .namespaces()
            .create(caller, namespace_spec(name))
            .await
            .expect("namespace accepted");
        self.engine.drain().await;
        accepted.id
    }

    /// Create a function and wait for its deploy pipeline
    pub async fn function(
        &self,
        caller: &CallerIdentity,
        id_namespace: &str,
        spec: FunctionSpec,
    ) -> String {
        let accepted = self
            .engine
            .functions()
            .create(caller, id_namespace, spec)
            .await
            .expect("function accepted");
        self.engine.drain().await;
        accepted.id
    }
}

/// Yield to the runtime until `reached` holds, so a detached pipeline can
/// run up to the gate it is parked on
pub async fn settle(reached: impl Fn() -> bool) {
    for _ in 0..1000 {
        if reached() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("pipeline never reached the expected step");
}

pub fn caller() -> CallerIdentity {
    CallerIdentity::new("user-1")
}

pub fn namespace_spec(name: &str) -> NamespaceSpec {
    NamespaceSpec {
        name: name.to_string(),
        id_cluster: CLUSTER_ID.to_string(),
        host: "fn.example.com".to_string(),
    }
}

pub fn function_spec(name: &str) -> FunctionSpec {
    serde_json::from_value(json!({
        "name": name,
        "executedName": "handler",
        "runtime": "nodejs14",
        "trigger": "http",
        "memory": "128Mi",
        "cpu": "100m",
        "replicas": 2,
        "sourceCode": format!("module.exports = () => '{}'", name),
        "dependencies": "{\"dependencies\": {}}",
        "environments": [{"name": "MODE", "value": "test"}]
    }))
    .expect("valid function spec")
}

/// A pod labelled for a function with the given phase and conditions
pub fn pod(name: &str, phase: &str, conditions: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            conditions: Some(
                conditions
                    .iter()
                    .map(|(kind, status)| PodCondition {
                        type_: kind.to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}
