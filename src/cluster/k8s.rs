//! [`ClusterApi`] over the Kubernetes API with kube-rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::logs::{parse_log_batch, since_time, LogBatch};
use super::manifests;
use super::{ClusterApi, ClusterCredentials, ClusterError, RetryPolicy, FUNCTION_LABEL};
use crate::config::{IngressConfig, LogsConfig};
use crate::model::AutoscalingPolicy;

/// Map a kube-rs error onto the engine's cluster error classes
pub fn map_kube_error(what: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) => {
            let detail = format!("{}: {}", what, resp.message);
            match resp.code {
                404 => ClusterError::NotFound(detail),
                409 => ClusterError::AlreadyExists(detail),
                401 | 403 => ClusterError::Unreachable(detail),
                _ => ClusterError::Transient(detail),
            }
        }
        // connection resets and timeouts below the API layer
        kube::Error::HyperError(e) => ClusterError::Transient(format!("{}: {}", what, e)),
        kube::Error::Service(e) => ClusterError::Transient(format!("{}: {}", what, e)),
        kube::Error::ReadEvents(e) => ClusterError::Transient(format!("{}: {}", what, e)),
        other => ClusterError::Unreachable(format!("{}: {}", what, other)),
    }
}

/// Treat an already-absent object as deleted
fn ignore_not_found(result: Result<(), ClusterError>) -> Result<(), ClusterError> {
    match result {
        Err(ClusterError::NotFound(what)) => {
            debug!("Skipping delete of absent object: {}", what);
            Ok(())
        }
        other => other,
    }
}

/// Kubernetes-backed cluster layer. Clients are built once per distinct
/// kubeconfig and reused.
#[derive(Clone)]
pub struct KubeCluster {
    /// Clients keyed by kubeconfig digest
    clients: Arc<DashMap<String, Client>>,

    retry: RetryPolicy,

    ingress: IngressConfig,

    logs: LogsConfig,
}

impl KubeCluster {
    pub fn new(retry: RetryPolicy, ingress: IngressConfig, logs: LogsConfig) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            retry,
            ingress,
            logs,
        }
    }

    fn cache_key(creds: &ClusterCredentials) -> String {
        format!("{:x}", Sha256::digest(creds.kubeconfig.as_bytes()))
    }

    /// Client for a kubeconfig; any failure to build one is `Unreachable`
    pub async fn client(&self, creds: &ClusterCredentials) -> Result<Client, ClusterError> {
        let key = Self::cache_key(creds);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.value().clone());
        }

        let kubeconfig = Kubeconfig::from_yaml(&creds.kubeconfig)
            .map_err(|e| ClusterError::Unreachable(format!("invalid kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::Unreachable(format!("invalid kubeconfig: {}", e)))?;
        let client = Client::try_from(config)
            .map_err(|e| ClusterError::Unreachable(format!("failed to build client: {}", e)))?;

        debug!("Created Kubernetes client {}", &key[..12]);
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Read a deployment's status, retrying while it propagates
    async fn await_deployment(
        &self,
        deployments: &Api<Deployment>,
        namespace: &str,
        function: &str,
    ) -> Result<(), ClusterError> {
        let what = format!("deployment {}/{}", namespace, function);
        let what = what.as_str();
        self.retry
            .run(what, || async move {
                deployments
                    .get_status(function)
                    .await
                    .map(|_| ())
                    .map_err(|e| map_kube_error(what, e))
            })
            .await
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_namespace(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
    ) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client(creds).await?);
        api.create(&PostParams::default(), &manifests::namespace(namespace))
            .await
            .map_err(|e| map_kube_error(&format!("namespace {}", namespace), e))?;
        info!("Created namespace {}", namespace);
        Ok(())
    }

    async fn delete_namespace(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
    ) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client(creds).await?);
        ignore_not_found(
            api.delete(namespace, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error(&format!("namespace {}", namespace), e)),
        )?;
        info!("Deleted namespace {}", namespace);
        Ok(())
    }

    async fn list_pods_for_function(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
    ) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client(creds).await?, namespace);
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(&format!("pods in {}", namespace), e))?;

        Ok(pods
            .items
            .into_iter()
            .filter(|pod| {
                pod.metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(FUNCTION_LABEL))
                    .is_some_and(|value| value == function)
            })
            .collect())
    }

    async fn scale_deployment(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client(creds).await?, namespace);
        self.await_deployment(&api, namespace, function).await?;

        api.patch_scale(
            function,
            &PatchParams::default(),
            &Patch::Merge(&manifests::scale_patch(replicas)),
        )
        .await
        .map_err(|e| map_kube_error(&format!("scale {}/{}", namespace, function), e))?;

        info!("Scaled {}/{} to {} replicas", namespace, function, replicas);
        Ok(())
    }

    async fn enable_autoscaling(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
        policy: &AutoscalingPolicy,
    ) -> Result<(), ClusterError> {
        let client = self.client(creds).await?;
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        self.await_deployment(&deployments, namespace, function)
            .await?;

        let hpa = manifests::horizontal_autoscaler(namespace, function, policy);
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(client, namespace);
        api.create(&PostParams::default(), &hpa)
            .await
            .map_err(|e| map_kube_error(&format!("autoscaler {}/{}", namespace, function), e))?;

        let (min, max) = policy.replica_bounds();
        info!(
            "Enabled autoscaling for {}/{} ({}..{} replicas)",
            namespace, function, min, max
        );
        Ok(())
    }

    async fn delete_function(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        function: &str,
    ) -> Result<(), ClusterError> {
        let client = self.client(creds).await?;
        let what = format!("function {}/{}", namespace, function);

        let functions: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), namespace, &manifests::function_resource());
        ignore_not_found(
            functions
                .delete(function, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error(&what, e)),
        )?;

        let autoscalers: Api<HorizontalPodAutoscaler> = Api::namespaced(client, namespace);
        ignore_not_found(
            autoscalers
                .delete(function, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error(&what, e)),
        )?;

        info!("Deleted {}", what);
        Ok(())
    }

    async fn create_api_key_ingress_rule(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        api_key: &str,
    ) -> Result<(), ClusterError> {
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client(creds).await?,
            namespace,
            &manifests::kong_ingress_resource(),
        );
        let rule = manifests::api_key_rule(namespace, api_key, &self.ingress.api_key_header);
        api.create(&PostParams::default(), &rule)
            .await
            .map_err(|e| map_kube_error(&format!("api key rule in {}", namespace), e))?;
        debug!("Created API key rule in {}", namespace);
        Ok(())
    }

    async fn load_balancer_address(
        &self,
        creds: &ClusterCredentials,
    ) -> Result<String, ClusterError> {
        let lb_namespace = &self.ingress.load_balancer_namespace;
        let api: Api<Service> = Api::namespaced(self.client(creds).await?, lb_namespace);
        let services = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(&format!("services in {}", lb_namespace), e))?;

        services
            .items
            .iter()
            .find(|svc| {
                svc.spec
                    .as_ref()
                    .and_then(|spec| spec.type_.as_deref())
                    == Some("LoadBalancer")
            })
            .and_then(|svc| svc.status.as_ref())
            .and_then(|status| status.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|ingress| ingress.first())
            .and_then(|entry| entry.ip.clone().or_else(|| entry.hostname.clone()))
            .ok_or_else(|| ClusterError::LoadBalancerUnavailable(lb_namespace.clone()))
    }

    async fn create_metrics_ingress(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        domain: &str,
    ) -> Result<(), ClusterError> {
        let client = self.client(creds).await?;

        let services: Api<Service> = Api::namespaced(client.clone(), namespace);
        services
            .create(
                &PostParams::default(),
                &manifests::metrics_service(namespace, &self.ingress),
            )
            .await
            .map_err(|e| map_kube_error(&format!("metrics service in {}", namespace), e))?;

        let ingresses: Api<Ingress> = Api::namespaced(client, namespace);
        ingresses
            .create(
                &PostParams::default(),
                &manifests::metrics_ingress(namespace, domain, &self.ingress),
            )
            .await
            .map_err(|e| map_kube_error(&format!("metrics ingress in {}", namespace), e))?;

        debug!("Created metrics ingress for {} on {}", namespace, domain);
        Ok(())
    }

    async fn fetch_pod_logs(
        &self,
        creds: &ClusterCredentials,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogBatch, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client(creds).await?, namespace);
        let params = LogParams {
            container: container.map(str::to_string),
            timestamps: true,
            tail_lines: Some(self.logs.tail_lines),
            since_time: since_time(since),
            ..Default::default()
        };

        let raw = api
            .logs(pod, &params)
            .await
            .map_err(|e| map_kube_error(&format!("logs of {}/{}", namespace, pod), e))?;

        Ok(parse_log_batch(&raw, since, self.logs.show_noise))
    }
}
