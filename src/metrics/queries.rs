//! PromQL query sets for function and namespace dashboards

/// A query and the name its result is reported under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedQuery {
    pub name: &'static str,
    pub promql: String,
}

impl NamedQuery {
    fn new(name: &'static str, promql: String) -> Self {
        Self { name, promql }
    }
}

/// Grouping used for function metrics: per pod for the default window,
/// per container when the caller asked for a specific range
pub fn function_selector(range_requested: bool) -> &'static str {
    if range_requested {
        "container, namespace"
    } else {
        "pod, namespace"
    }
}

/// Grouping used for namespace metrics
pub const NAMESPACE_SELECTOR: &str = "namespace";

/// Kong route name for a function
fn route(namespace: &str, function: &str) -> String {
    format!("{}.{}.00", namespace, function)
}

fn count_sent(route: &str, statuses: &str) -> String {
    format!(
        r#"sum(kong_http_status{{code=~"{}",route="{}"}}) by (route)"#,
        statuses, route
    )
}

/// The nine queries shown for a single function.
///
/// `pods` restricts resource queries to the function's pods; request
/// counts and latency come from the ingress route.
pub fn function_queries(
    namespace: &str,
    function: &str,
    pods: &[String],
    selector: &str,
) -> Vec<NamedQuery> {
    let pod = pods.join("|");
    let route = route(namespace, function);

    vec![
        NamedQuery::new(
            "cpuUsage",
            format!(
                r#"sum(rate(container_cpu_usage_seconds_total{{container!="POD",container!="",pod=~"{pod}",namespace="{namespace}"}}[2m])) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "cpuRequests",
            format!(
                r#"sum(kube_pod_container_resource_requests{{pod=~"{pod}",resource="cpu",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "cpuLimits",
            format!(
                r#"sum(kube_pod_container_resource_limits{{pod=~"{pod}",resource="cpu",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "memoryUsage",
            format!(
                r#"sum(container_memory_working_set_bytes{{container!="POD",container!="",pod=~"{pod}",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "memoryRequests",
            format!(
                r#"sum(kube_pod_container_resource_requests{{app_kubernetes_io_name!="kube-state-metrics",pod=~"{pod}",resource="memory",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "memoryLimits",
            format!(
                r#"sum(kube_pod_container_resource_limits{{app_kubernetes_io_name!="kube-state-metrics",pod=~"{pod}",container!="POD",container!="",resource="memory",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "requestTime",
            format!(
                r#"histogram_quantile(0.99, sum(rate(kong_latency_bucket{{type="request",route=~"{route}"}}[15m])) by (route,le))"#
            ),
        ),
        NamedQuery::new("countSentSuccess", count_sent(&route, "2[0-9]{2}")),
        NamedQuery::new("countSentFailure", count_sent(&route, "5[0-9]{2}")),
    ]
}

/// The six resource queries shown for a whole namespace
pub fn namespace_queries(namespace: &str, selector: &str) -> Vec<NamedQuery> {
    vec![
        NamedQuery::new(
            "cpuUsage",
            format!(
                r#"sum(rate(container_cpu_usage_seconds_total{{container!="POD",container!="",namespace="{namespace}"}}[2m])) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "cpuRequests",
            format!(
                r#"sum(kube_pod_container_resource_requests{{resource="cpu",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "cpuLimits",
            format!(
                r#"sum(kube_pod_container_resource_limits{{resource="cpu",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "memoryUsage",
            format!(
                r#"sum(container_memory_working_set_bytes{{container!="POD",container!="",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "memoryRequests",
            format!(
                r#"sum(kube_pod_container_resource_requests{{app_kubernetes_io_name!="kube-state-metrics",container!="POD",container!="",resource="memory",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
        NamedQuery::new(
            "memoryLimits",
            format!(
                r#"sum(kube_pod_container_resource_limits{{app_kubernetes_io_name!="kube-state-metrics",container!="POD",container!="",resource="memory",namespace="{namespace}"}}) by ({selector})"#
            ),
        ),
    ]
}
