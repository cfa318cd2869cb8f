//! Namespace Orchestrator
//!
//! Provisioning a namespace creates the cluster namespace and its ingress
//! plumbing. Deleting one removes the cluster namespace and then every
//! function in it, through the [`NamespaceDeletionCollaborator`].

use std::sync::Arc;

use tracing::{debug, error, info};

use super::function::metrics_target;
use super::{Accepted, Dependencies, NamespaceDeletionCollaborator, Record};
use crate::cluster::ClusterCredentials;
use crate::error::{EngineError, EngineResult};
use crate::metrics::queries::NAMESPACE_SELECTOR;
use crate::metrics::{namespace_queries, MetricsResult};
use crate::model::{CallerIdentity, Namespace, NamespaceSpec, Status, Step};

#[derive(Clone)]
pub struct NamespaceOrchestrator {
    deps: Dependencies,
    functions: Arc<dyn NamespaceDeletionCollaborator>,
}

impl NamespaceOrchestrator {
    pub fn new(deps: Dependencies, functions: Arc<dyn NamespaceDeletionCollaborator>) -> Self {
        Self { deps, functions }
    }

    /// Record a new namespace and provision it in the background
    pub async fn create(
        &self,
        caller: &CallerIdentity,
        spec: NamespaceSpec,
    ) -> EngineResult<Accepted> {
        debug!(
            "User {} creating namespace {} on cluster {}",
            caller.id, spec.name, spec.id_cluster
        );
        spec.validate()?;

        let cluster = self.deps.resolver.resolve(caller, &spec.id_cluster).await?;
        let namespace = Namespace::new(&spec, &caller.id, &cluster.id_cluster, &cluster.cluster_name);
        self.deps.store.insert_namespace(namespace.clone()).await?;

        let id = namespace.id.clone();
        let this = self.clone();
        self.deps
            .pipelines
            .spawn(format!("create-namespace {}", id), async move {
                let result = this.provision(&namespace, &cluster.credentials).await;
                this.deps
                    .finalize(
                        Record::Namespace,
                        &namespace.id,
                        "Create",
                        result,
                        Status::succeeded(Step::Creating),
                        Step::Creating,
                    )
                    .await;
            });

        Ok(Accepted::new(id))
    }

    pub async fn get(&self, caller: &CallerIdentity, id: &str) -> EngineResult<Namespace> {
        self.deps.owned_namespace(caller, id).await
    }

    /// The caller's namespaces, newest first
    pub async fn list(&self, caller: &CallerIdentity) -> EngineResult<Vec<Namespace>> {
        Ok(self.deps.store.list_namespaces(&caller.id).await?)
    }

    /// Remove the cluster namespace, cascade into the functions, then drop
    /// the record. On failure the record stays with `REMOVING/FAILED`.
    pub async fn delete(&self, caller: &CallerIdentity, id: &str) -> EngineResult<Accepted> {
        debug!("User {} deleting namespace {}", caller.id, id);

        let namespace = self.deps.owned_namespace(caller, id).await?;
        let cluster = self.deps.resolve_cluster(caller, &namespace).await?;
        self.deps
            .store
            .update_namespace_status(id, Status::pending(Step::Removing))
            .await?;

        let this = self.clone();
        self.deps
            .pipelines
            .spawn(format!("delete-namespace {}", id), async move {
                let result = this.teardown(&namespace, &cluster.credentials).await;
                match result {
                    Ok(removed) => info!(
                        "Delete namespace {} succeeded ({} function(s) removed)",
                        namespace.id, removed
                    ),
                    Err(e) => {
                        error!("Delete namespace {} failed: {}", namespace.id, e);
                        this.deps
                            .record_status(
                                Record::Namespace,
                                &namespace.id,
                                Status::failed(Step::Removing, e.to_string()),
                            )
                            .await;
                    }
                }
            });

        Ok(Accepted::new(id))
    }

    pub async fn metrics(
        &self,
        caller: &CallerIdentity,
        id: &str,
        range: Option<i64>,
    ) -> EngineResult<MetricsResult> {
        let namespace = self.deps.owned_namespace(caller, id).await?;
        let queries = namespace_queries(&namespace.id_namespace, NAMESPACE_SELECTOR);
        let window = self.deps.metrics_window(range);

        Ok(self
            .deps
            .metrics
            .query_metrics(&metrics_target(&namespace), queries, &window)
            .await)
    }

    // =========================================================================
    // Pipelines
    // =========================================================================

    async fn provision(
        &self,
        namespace: &Namespace,
        creds: &ClusterCredentials,
    ) -> EngineResult<()> {
        let cluster = &self.deps.cluster;
        let slug = namespace.id_namespace.as_str();

        cluster.create_namespace(creds, slug).await?;
        cluster
            .create_api_key_ingress_rule(creds, slug, &namespace.api_key)
            .await?;

        let address = cluster.load_balancer_address(creds).await?;
        debug!("Namespace {} is served through {}", slug, address);

        cluster
            .create_metrics_ingress(creds, slug, &namespace.host)
            .await?;
        Ok(())
    }

    async fn teardown(
        &self,
        namespace: &Namespace,
        creds: &ClusterCredentials,
    ) -> Result<usize, EngineError> {
        self.deps
            .cluster
            .delete_namespace(creds, &namespace.id_namespace)
            .await?;

        let removed = self.functions.delete_all_in_namespace(namespace).await?;
        self.deps.store.delete_namespace(&namespace.id).await?;
        Ok(removed)
    }
}
