//! Kubernetes object builders
//!
//! Everything here is pure: each function returns the object to submit,
//! and [`super::KubeCluster`] does the submitting.

use std::collections::BTreeMap;

use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec,
    MetricTarget, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{Namespace, Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::{json, Value};

use crate::config::IngressConfig;
use crate::model::AutoscalingPolicy;

/// Path the metrics ingress routes to the metrics backend
pub const METRICS_INGRESS_PATH: &str = "/prometheus(/|$)(.*)";

const METRICS_SERVICE_PORT: i32 = 80;

/// Kong's per-route plugin override resource
pub fn kong_ingress_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("configuration.konghq.com", "v1", "KongIngress"),
        "kongingresses",
    )
}

/// Function object the build worker creates for every deployment
pub fn function_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("kubeless.io", "v1beta1", "Function"),
        "functions",
    )
}

/// Name of the KongIngress holding a namespace's API key
pub fn api_key_rule_name(namespace: &str) -> String {
    format!("{}-apikey", namespace)
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// `spec.replicas` merge patch for a deployment
pub fn scale_patch(replicas: i32) -> Value {
    json!({ "spec": { "replicas": replicas } })
}

fn utilization_metric(resource: &str, average: i32) -> MetricSpec {
    MetricSpec {
        type_: "Resource".to_string(),
        resource: Some(ResourceMetricSource {
            name: resource.to_string(),
            target: MetricTarget {
                type_: "Utilization".to_string(),
                average_utilization: Some(average),
                ..Default::default()
            },
        }),
        ..Default::default()
    }
}

/// Horizontal autoscaler targeting the function's deployment
pub fn horizontal_autoscaler(
    namespace: &str,
    function: &str,
    policy: &AutoscalingPolicy,
) -> HorizontalPodAutoscaler {
    let (min_replicas, max_replicas) = policy.replica_bounds();

    HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(function.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            min_replicas: Some(min_replicas),
            max_replicas,
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: function.to_string(),
            },
            metrics: Some(vec![
                utilization_metric("cpu", policy.average_cpu),
                utilization_metric("memory", policy.average_memory),
            ]),
            behavior: None,
        }),
        status: None,
    }
}

/// KongIngress that requires the namespace's API key on every route
pub fn api_key_rule(namespace: &str, api_key: &str, header: &str) -> DynamicObject {
    let mut headers = serde_json::Map::new();
    headers.insert(header.to_string(), json!([api_key]));

    DynamicObject::new(&api_key_rule_name(namespace), &kong_ingress_resource())
        .within(namespace)
        .data(json!({ "route": { "headers": headers } }))
}

/// ExternalName service pointing at the shared metrics backend
pub fn metrics_service(namespace: &str, config: &IngressConfig) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(config.metrics_service_name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some(config.metrics_external_name.clone()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: METRICS_SERVICE_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Ingress routing `/prometheus/...` on the namespace host to the metrics
/// service, guarded by the namespace's API key rule
pub fn metrics_ingress(namespace: &str, domain: &str, config: &IngressConfig) -> Ingress {
    let annotations = BTreeMap::from([
        (
            "kubernetes.io/ingress.class".to_string(),
            config.ingress_class.clone(),
        ),
        (
            "nginx.ingress.kubernetes.io/rewrite-target".to_string(),
            "/$2".to_string(),
        ),
        (
            "konghq.com/override".to_string(),
            api_key_rule_name(namespace),
        ),
    ]);

    Ingress {
        metadata: ObjectMeta {
            name: Some(config.metrics_ingress_name.clone()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(domain.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(METRICS_INGRESS_PATH.to_string()),
                        path_type: "ImplementationSpecific".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: config.metrics_service_name.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(METRICS_SERVICE_PORT),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}
