//! Command surface
//!
//! The routing layer above the engine sends one [`CommandEnvelope`] per
//! request: the caller identity plus a typed [`Command`]. Every command
//! answers with a [`CommandResponse`] carrying an HTTP-style status code.
//!
//! ```json
//! {
//!   "user": {"id": "u-1"},
//!   "cmd": "put-functions-scale",
//!   "payload": {"id": "f-1", "replicas": 3}
//! }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cluster::KubeCluster;
use crate::config::Config;
use crate::dispatch::{DeployDispatcher, HttpDeployDispatcher};
use crate::error::{EngineError, EngineResult};
use crate::metrics::{MetricsExecutor, PrometheusClient};
use crate::model::{CallerIdentity, FunctionSpec, NamespaceSpec};
use crate::orchestrator::{
    Accepted, Dependencies, FunctionOrchestrator, LogWatermark, NamespaceOrchestrator,
    PipelineExecutor,
};
use crate::resolver::StaticClusterResolver;
use crate::store::{LifecycleStore, MemoryStore};

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ById {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByNamespace {
    pub id_namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFunction {
    pub id_namespace: String,
    #[serde(flatten)]
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFunction {
    pub id: String,
    #[serde(flatten)]
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleFunction {
    pub id: String,
    pub replicas: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionLogs {
    pub id: String,
    /// Watermarks per pod from the caller's previous read
    #[serde(default)]
    pub pods: Vec<LogWatermark>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRange {
    pub id: String,
    /// Window length in seconds; the configured default when absent
    #[serde(default)]
    pub range: Option<i64>,
}

/// Every operation the engine exposes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "payload")]
pub enum Command {
    #[serde(rename = "post-function")]
    CreateFunction(CreateFunction),
    #[serde(rename = "put-function")]
    UpdateFunction(UpdateFunction),
    #[serde(rename = "get-function")]
    GetFunction(ById),
    #[serde(rename = "get-functions")]
    ListFunctions(ByNamespace),
    #[serde(rename = "delete-function")]
    DeleteFunction(ById),
    #[serde(rename = "put-functions-scale")]
    ScaleFunction(ScaleFunction),
    #[serde(rename = "functions-stop")]
    StopFunction(ById),
    #[serde(rename = "functions-start")]
    StartFunction(ById),
    #[serde(rename = "get-functions-status")]
    FunctionStatus(ById),
    #[serde(rename = "get-functions-logs")]
    FunctionLogs(FunctionLogs),
    #[serde(rename = "get-functions-metrics")]
    FunctionMetrics(MetricsRange),
    #[serde(rename = "post-namespaces")]
    CreateNamespace(NamespaceSpec),
    #[serde(rename = "get-namespaces")]
    ListNamespaces,
    #[serde(rename = "get-namespaces-id")]
    GetNamespace(ById),
    #[serde(rename = "delete-namespaces-id")]
    DeleteNamespace(ById),
    #[serde(rename = "get-namespace-metrics")]
    NamespaceMetrics(MetricsRange),
}

impl Command {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateFunction(_) => "post-function",
            Command::UpdateFunction(_) => "put-function",
            Command::GetFunction(_) => "get-function",
            Command::ListFunctions(_) => "get-functions",
            Command::DeleteFunction(_) => "delete-function",
            Command::ScaleFunction(_) => "put-functions-scale",
            Command::StopFunction(_) => "functions-stop",
            Command::StartFunction(_) => "functions-start",
            Command::FunctionStatus(_) => "get-functions-status",
            Command::FunctionLogs(_) => "get-functions-logs",
            Command::FunctionMetrics(_) => "get-functions-metrics",
            Command::CreateNamespace(_) => "post-namespaces",
            Command::ListNamespaces => "get-namespaces",
            Command::GetNamespace(_) => "get-namespaces-id",
            Command::DeleteNamespace(_) => "delete-namespaces-id",
            Command::NamespaceMetrics(_) => "get-namespace-metrics",
        }
    }
}

/// A command together with who sent it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub user: CallerIdentity,
    #[serde(flatten)]
    pub command: Command,
}

// ============================================================================
// Responses
// ============================================================================

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_ACCEPTED: u16 = 202;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResponse {
    pub fn accepted(accepted: Accepted) -> Self {
        Self {
            status: STATUS_ACCEPTED,
            message: None,
            id: Some(accepted.id),
            data: None,
        }
    }

    pub fn created(accepted: Accepted) -> Self {
        Self {
            status: STATUS_CREATED,
            ..Self::accepted(accepted)
        }
    }

    pub fn ok<T: Serialize>(data: &T) -> EngineResult<Self> {
        let data = serde_json::to_value(data)
            .map_err(|e| EngineError::Internal(format!("failed to encode response: {}", e)))?;
        Ok(Self {
            status: STATUS_OK,
            message: None,
            id: None,
            data: Some(data),
        })
    }

    pub fn error(err: &EngineError) -> Self {
        Self {
            status: err.status_code(),
            message: Some(err.to_string()),
            id: None,
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Both orchestrators behind one entry point
#[derive(Clone)]
pub struct Engine {
    functions: FunctionOrchestrator,
    namespaces: NamespaceOrchestrator,
    deps: Dependencies,
}

impl Engine {
    pub fn new(deps: Dependencies, dispatcher: Arc<dyn DeployDispatcher>) -> Self {
        let functions = FunctionOrchestrator::new(deps.clone(), dispatcher);
        let namespaces = NamespaceOrchestrator::new(deps.clone(), Arc::new(functions.clone()));
        Self {
            functions,
            namespaces,
            deps,
        }
    }

    /// Wiring from configuration with the in-memory store.
    ///
    /// Records live only as long as the process. Real deployments must
    /// supply a persistent [`LifecycleStore`] through [`Self::with_store`].
    pub fn from_config(config: &Config) -> EngineResult<Self> {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Production wiring: kube-rs clusters, configured cluster list, HTTP
    /// deploy worker and Prometheus metrics around the given store
    pub fn with_store(config: &Config, store: Arc<dyn LifecycleStore>) -> EngineResult<Self> {
        let cluster = KubeCluster::new(
            config.retry.policy(),
            config.ingress.clone(),
            config.logs.clone(),
        );
        let backend = PrometheusClient::new(&config.metrics)?;
        let dispatcher = HttpDeployDispatcher::new(&config.dispatcher)?;

        let deps = Dependencies {
            store,
            resolver: Arc::new(StaticClusterResolver::new(config.clusters.clone())),
            cluster: Arc::new(cluster),
            metrics: MetricsExecutor::new(Arc::new(backend), &config.metrics),
            metrics_config: config.metrics.clone(),
            pipelines: PipelineExecutor::new(),
        };
        Ok(Self::new(deps, Arc::new(dispatcher)))
    }

    pub fn functions(&self) -> &FunctionOrchestrator {
        &self.functions
    }

    pub fn namespaces(&self) -> &NamespaceOrchestrator {
        &self.namespaces
    }

    /// Pipelines still running in the background
    pub fn in_flight(&self) -> usize {
        self.deps.pipelines.in_flight()
    }

    /// Wait for every background pipeline started so far
    pub async fn drain(&self) {
        self.deps.pipelines.drain().await
    }

    /// Run a command; errors become responses with their status code
    pub async fn handle(&self, envelope: CommandEnvelope) -> CommandResponse {
        let name = envelope.command.name();
        debug!("Handling {} for user {}", name, envelope.user.id);

        match self.execute(&envelope.user, envelope.command).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} for user {} failed: {}", name, envelope.user.id, e);
                CommandResponse::error(&e)
            }
        }
    }

    pub async fn execute(
        &self,
        caller: &CallerIdentity,
        command: Command,
    ) -> EngineResult<CommandResponse> {
        let functions = &self.functions;
        let namespaces = &self.namespaces;

        match command {
            Command::CreateFunction(p) => functions
                .create(caller, &p.id_namespace, p.function)
                .await
                .map(CommandResponse::accepted),
            Command::UpdateFunction(p) => functions
                .update(caller, &p.id, p.function)
                .await
                .map(CommandResponse::accepted),
            Command::GetFunction(p) => CommandResponse::ok(&functions.get(caller, &p.id).await?),
            Command::ListFunctions(p) => {
                CommandResponse::ok(&functions.list(caller, &p.id_namespace).await?)
            }
            Command::DeleteFunction(p) => functions
                .delete(caller, &p.id)
                .await
                .map(CommandResponse::accepted),
            Command::ScaleFunction(p) => functions
                .scale(caller, &p.id, p.replicas)
                .await
                .map(CommandResponse::accepted),
            Command::StopFunction(p) => functions
                .stop(caller, &p.id)
                .await
                .map(CommandResponse::accepted),
            Command::StartFunction(p) => functions
                .start(caller, &p.id)
                .await
                .map(CommandResponse::accepted),
            Command::FunctionStatus(p) => {
                CommandResponse::ok(&functions.status(caller, &p.id).await?)
            }
            Command::FunctionLogs(p) => {
                CommandResponse::ok(&functions.logs(caller, &p.id, &p.pods).await?)
            }
            Command::FunctionMetrics(p) => {
                CommandResponse::ok(&functions.metrics(caller, &p.id, p.range).await?)
            }
            Command::CreateNamespace(spec) => namespaces
                .create(caller, spec)
                .await
                .map(CommandResponse::created),
            Command::ListNamespaces => CommandResponse::ok(&namespaces.list(caller).await?),
            Command::GetNamespace(p) => CommandResponse::ok(&namespaces.get(caller, &p.id).await?),
            Command::DeleteNamespace(p) => namespaces
                .delete(caller, &p.id)
                .await
                .map(CommandResponse::accepted),
            Command::NamespaceMetrics(p) => {
                CommandResponse::ok(&namespaces.metrics(caller, &p.id, p.range).await?)
            }
        }
    }
}
