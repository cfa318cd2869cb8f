//! Function Orchestrator
//!
//! Create, update, scale, stop, start and delete run as detached pipelines
//! (see the module docs of [`crate::orchestrator`]). Reads go straight to
//! the store or the cluster and never touch a record's status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{not_found_as, Accepted, Dependencies, NamespaceDeletionCollaborator, Record};
use crate::cluster::{log_container_for, pod, LogBatch, PodSummary};
use crate::dispatch::{DeployDispatcher, DeployRequest};
use crate::error::{EngineError, EngineResult};
use crate::metrics::{function_queries, function_selector, MetricsResult, MetricsTarget};
use crate::model::{
    CallerIdentity, Function, FunctionDetails, FunctionSpec, Namespace, Outcome, Status, Step,
    ValidationError,
};
use crate::resolver::ResolvedCluster;

/// One pod of a function as reported by the status read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatusEntry {
    pub stored_status: Status,
    #[serde(flatten)]
    pub pod: PodSummary,
}

/// Result of a status read: the stored status while no pods exist, one
/// entry per pod otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FunctionStatusReport {
    Stored(Status),
    Pods(Vec<PodStatusEntry>),
}

/// Newest log timestamp a caller has already seen for a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogWatermark {
    pub pod: String,
    #[serde(default)]
    pub logstimestamp: Option<DateTime<Utc>>,
}

/// New log lines for one pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodLogs {
    pub pod: String,
    #[serde(flatten)]
    pub batch: LogBatch,
}

#[derive(Clone)]
pub struct FunctionOrchestrator {
    deps: Dependencies,
    dispatcher: Arc<dyn DeployDispatcher>,
}

impl FunctionOrchestrator {
    pub fn new(deps: Dependencies, dispatcher: Arc<dyn DeployDispatcher>) -> Self {
        Self { deps, dispatcher }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn create(
        &self,
        caller: &CallerIdentity,
        id_namespace: &str,
        spec: FunctionSpec,
    ) -> EngineResult<Accepted> {
        debug!(
            "User {} creating function {} in namespace {}",
            caller.id, spec.name, id_namespace
        );
        spec.validate()?;

        let namespace = self.deps.owned_namespace(caller, id_namespace).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;

        let function = Function::new(&spec, &namespace, &caller.id);
        self.deps.store.insert_function(function.clone()).await?;

        let id = function.id.clone();
        let this = self.clone();
        self.deps
            .pipelines
            .spawn(format!("create-function {}", id), async move {
                let result = this.deploy(&function, spec, &namespace, &cluster).await;
                this.deps
                    .finalize(
                        Record::Function,
                        &function.id,
                        "Create",
                        result,
                        Status::succeeded(Step::Deployed),
                        Step::Deployed,
                    )
                    .await;
            });

        Ok(Accepted::new(id))
    }

    pub async fn update(
        &self,
        caller: &CallerIdentity,
        id: &str,
        spec: FunctionSpec,
    ) -> EngineResult<Accepted> {
        debug!("User {} updating function {}", caller.id, id);
        spec.validate()?;

        let (mut function, namespace) = self.load(caller, id).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;

        function.apply_update(&spec);
        self.deps.store.update_function(function.clone()).await?;

        let this = self.clone();
        self.deps
            .pipelines
            .spawn(format!("update-function {}", id), async move {
                let result = this.deploy(&function, spec, &namespace, &cluster).await;
                this.deps
                    .finalize(
                        Record::Function,
                        &function.id,
                        "Update",
                        result,
                        Status::succeeded(Step::Deployed),
                        Step::Deployed,
                    )
                    .await;
            });

        Ok(Accepted::new(id))
    }

    pub async fn scale(
        &self,
        caller: &CallerIdentity,
        id: &str,
        replicas: i32,
    ) -> EngineResult<Accepted> {
        debug!("User {} scaling function {} to {}", caller.id, id, replicas);
        if replicas < 0 {
            return Err(ValidationError("replicas must not be negative".to_string()).into());
        }

        let (function, namespace) = self.load(caller, id).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;
        self.deps
            .store
            .update_function_status(id, Status::pending(Step::Deployed))
            .await?;

        let this = self.clone();
        self.deps
            .pipelines
            .spawn(format!("scale-function {}", id), async move {
                let result = async {
                    this.deps
                        .cluster
                        .scale_deployment(
                            &cluster.credentials,
                            &namespace.id_namespace,
                            &function.name,
                            replicas,
                        )
                        .await?;
                    this.deps
                        .store
                        .update_function_replicas(&function.id, replicas)
                        .await?;
                    Ok::<(), EngineError>(())
                }
                .await;

                this.deps
                    .finalize(
                        Record::Function,
                        &function.id,
                        "Scale",
                        result,
                        Status::succeeded(Step::Deployed),
                        Step::Deployed,
                    )
                    .await;
            });

        Ok(Accepted::new(id))
    }

    /// Scale to zero; the stored replica count is kept for [`Self::start`]
    pub async fn stop(&self, caller: &CallerIdentity, id: &str) -> EngineResult<Accepted> {
        debug!("User {} stopping function {}", caller.id, id);

        let (function, namespace) = self.load(caller, id).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;
        self.deps
            .store
            .update_function_status(id, Status::pending(Step::Stop))
            .await?;

        let this = self.clone();
        self.deps
            .pipelines
            .spawn(format!("stop-function {}", id), async move {
                let result = this
                    .deps
                    .cluster
                    .scale_deployment(
                        &cluster.credentials,
                        &namespace.id_namespace,
                        &function.name,
                        0,
                    )
                    .await
                    .map_err(EngineError::from);

                this.deps
                    .finalize(
                        Record::Function,
                        &function.id,
                        "Stop",
                        result,
                        Status::new(Step::Stop, Outcome::Stop),
                        Step::Stop,
                    )
                    .await;
            });

        Ok(Accepted::new(id))
    }

    /// Scale back to the stored replica count
    pub async fn start(&self, caller: &CallerIdentity, id: &str) -> EngineResult<Accepted> {
        debug!("User {} starting function {}", caller.id, id);

        let (function, namespace) = self.load(caller, id).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;
        self.deps
            .store
            .update_function_status(id, Status::pending(Step::Deployed))
            .await?;

        let this = self.clone();
        self.deps
            .pipelines
            .spawn(format!("start-function {}", id), async move {
                let result = this
                    .deps
                    .cluster
                    .scale_deployment(
                        &cluster.credentials,
                        &namespace.id_namespace,
                        &function.name,
                        function.replicas,
                    )
                    .await
                    .map_err(EngineError::from);

                this.deps
                    .finalize(
                        Record::Function,
                        &function.id,
                        "Start",
                        result,
                        Status::succeeded(Step::Deployed),
                        Step::Deployed,
                    )
                    .await;
            });

        Ok(Accepted::new(id))
    }

    pub async fn delete(&self, caller: &CallerIdentity, id: &str) -> EngineResult<Accepted> {
        debug!("User {} deleting function {}", caller.id, id);

        let (function, namespace) = self.load(caller, id).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;
        self.deps
            .store
            .update_function_status(id, Status::pending(Step::Removing))
            .await?;

        let this = self.clone();
        self.deps
            .pipelines
            .spawn(format!("delete-function {}", id), async move {
                let result = async {
                    this.deps
                        .cluster
                        .delete_function(
                            &cluster.credentials,
                            &namespace.id_namespace,
                            &function.name,
                        )
                        .await?;
                    this.deps.store.delete_function(&function.id).await?;
                    this.deps.store.delete_source_code(&function.id).await?;
                    Ok::<(), EngineError>(())
                }
                .await;

                // on success there is no record left to finalize
                match result {
                    Ok(()) => info!("Delete function {} succeeded", function.id),
                    Err(e) => {
                        error!("Delete function {} failed: {}", function.id, e);
                        this.deps
                            .record_status(
                                Record::Function,
                                &function.id,
                                Status::failed(Step::Removing, e.to_string()),
                            )
                            .await;
                    }
                }
            });

        Ok(Accepted::new(id))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The function record merged with its source
    pub async fn get(&self, caller: &CallerIdentity, id: &str) -> EngineResult<FunctionDetails> {
        let (function, _) = self.load(caller, id).await?;
        let source = self.deps.store.get_source_code(&function.id).await?;
        Ok(FunctionDetails { function, source })
    }

    /// A namespace's functions, newest first
    pub async fn list(
        &self,
        caller: &CallerIdentity,
        id_namespace: &str,
    ) -> EngineResult<Vec<Function>> {
        let namespace = self.deps.owned_namespace(caller, id_namespace).await?;
        Ok(self
            .deps
            .store
            .find_functions_by_namespace(&namespace.id)
            .await?)
    }

    pub async fn status(
        &self,
        caller: &CallerIdentity,
        id: &str,
    ) -> EngineResult<FunctionStatusReport> {
        let (function, namespace) = self.load(caller, id).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;

        let pods = self
            .deps
            .cluster
            .list_pods_for_function(&cluster.credentials, &namespace.id_namespace, &function.name)
            .await?;

        if pods.is_empty() {
            return Ok(FunctionStatusReport::Stored(function.status));
        }

        Ok(FunctionStatusReport::Pods(
            pods.iter()
                .map(|p| PodStatusEntry {
                    stored_status: function.status.clone(),
                    pod: pod::summarize(p),
                })
                .collect(),
        ))
    }

    /// New log lines per pod. Pods without a watermark get everything the
    /// cluster still has; pods still building are read from their build
    /// container.
    pub async fn logs(
        &self,
        caller: &CallerIdentity,
        id: &str,
        watermarks: &[LogWatermark],
    ) -> EngineResult<Vec<PodLogs>> {
        let (function, namespace) = self.load(caller, id).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;
        let creds = &cluster.credentials;

        let pods = self
            .deps
            .cluster
            .list_pods_for_function(creds, &namespace.id_namespace, &function.name)
            .await?;

        let fetches = pods.iter().map(|p| {
            let name = pod::pod_name(p).to_string();
            let since = watermarks
                .iter()
                .find(|w| w.pod == name)
                .and_then(|w| w.logstimestamp);
            let container = log_container_for(p);
            let namespace = namespace.id_namespace.as_str();

            async move {
                let batch = self
                    .deps
                    .cluster
                    .fetch_pod_logs(creds, namespace, &name, container.as_deref(), since)
                    .await?;
                Ok::<PodLogs, EngineError>(PodLogs { pod: name, batch })
            }
        });

        join_all(fetches).await.into_iter().collect()
    }

    pub async fn metrics(
        &self,
        caller: &CallerIdentity,
        id: &str,
        range: Option<i64>,
    ) -> EngineResult<MetricsResult> {
        let (function, namespace) = self.load(caller, id).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;

        let pods: Vec<String> = self
            .deps
            .cluster
            .list_pods_for_function(&cluster.credentials, &namespace.id_namespace, &function.name)
            .await?
            .iter()
            .map(|p| pod::pod_name(p).to_string())
            .collect();

        let queries = function_queries(
            &namespace.id_namespace,
            &function.name,
            &pods,
            function_selector(range.is_some()),
        );
        let window = self.deps.metrics_window(range);

        Ok(self
            .deps
            .metrics
            .query_metrics(&metrics_target(&namespace), queries, &window)
            .await)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Load a function and its namespace, both owned by the caller
    async fn load(&self, caller: &CallerIdentity, id: &str) -> EngineResult<(Function, Namespace)> {
        let function = self
            .deps
            .store
            .get_function(id)
            .await
            .map_err(|e| not_found_as("Function", id, e))?;

        if function.id_user != caller.id {
            return Err(EngineError::NotFound(format!("Function '{}'", id)));
        }

        let namespace = self
            .deps
            .owned_namespace(caller, &function.id_namespace)
            .await?;
        Ok((function, namespace))
    }

    /// Store the source, hand the build to the worker, then try to enable
    /// autoscaling. Autoscaler failures are logged only.
    async fn deploy(
        &self,
        function: &Function,
        spec: FunctionSpec,
        namespace: &Namespace,
        cluster: &ResolvedCluster,
    ) -> EngineResult<()> {
        self.deps
            .store
            .upsert_source_code(spec.source_code(&function.id))
            .await?;

        let request = DeployRequest {
            function: FunctionSpec {
                name: function.name.clone(),
                replicas: function.replicas,
                ..spec
            },
            namespace: namespace.id_namespace.clone(),
            host: namespace.host.clone(),
            api_key: namespace.api_key.clone(),
            kube_config: cluster.credentials.kubeconfig.clone(),
        };
        self.dispatcher.dispatch(request).await?;
        debug!("Deploy of function {} accepted by worker", function.id);

        if let Some(policy) = function.autoscaler.policy() {
            if let Err(e) = self
                .deps
                .cluster
                .enable_autoscaling(
                    &cluster.credentials,
                    &namespace.id_namespace,
                    &function.name,
                    &policy,
                )
                .await
            {
                warn!(
                    "Failed to enable autoscaling for function {}: {}",
                    function.id, e
                );
            }
        }

        Ok(())
    }
}

pub(crate) fn metrics_target(namespace: &Namespace) -> MetricsTarget {
    MetricsTarget {
        host: namespace.host.clone(),
        api_key: namespace.api_key.clone(),
        namespace: namespace.id_namespace.clone(),
    }
}

#[async_trait]
impl NamespaceDeletionCollaborator for FunctionOrchestrator {
    async fn delete_all_in_namespace(&self, namespace: &Namespace) -> EngineResult<usize> {
        let store = &self.deps.store;

        store
            .set_functions_status_by_namespace(&namespace.id, Status::pending(Step::Removing))
            .await?;

        for function in store.find_functions_by_namespace(&namespace.id).await? {
            store.delete_source_code(&function.id).await?;
        }

        let deleted = store.delete_functions_by_namespace(&namespace.id).await?;
        debug!(
            "Removed {} function(s) of namespace {}",
            deleted, namespace.id_namespace
        );
        Ok(deleted)
    }
}
