//! Pod status derivation
//!
//! Pure functions over `k8s_openapi` Pod objects; nothing here talks to a
//! cluster.

use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use serde::{Deserialize, Serialize};

/// Init containers whose logs are shown while a function is still building
const BUILD_CONTAINERS: [&str; 2] = ["compile", "install"];

const EVICTED_REASON: &str = "Evicted";

/// Status derived from a pod's phase, reason and conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodStatus {
    Running,
    Succeeded,
    Pending,
    Failed,
    Evicted,
}

/// The parts of a pod the status read path reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub pod_name: String,
    #[serde(rename = "derivedPodStatus")]
    pub status: PodStatus,
    pub status_message: String,
    pub status_phase: String,
    pub restart_count: i32,
}

fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("")
}

fn reason(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.reason.as_deref())
        .unwrap_or("")
}

fn condition_true(pod: &Pod, kind: &str) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == kind && c.status == "True")
        })
        .unwrap_or(false)
}

fn main_container_statuses(pod: &Pod) -> &[ContainerStatus] {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or(&[])
}

/// Derive a pod's status.
///
/// Precedence is strict: Evicted, then Failed, then Succeeded, then Running
/// (phase Running with `Initialized` and `Ready` both True), else Pending.
pub fn derive_pod_status(pod: &Pod) -> PodStatus {
    let phase = phase(pod);

    if reason(pod) == EVICTED_REASON {
        return PodStatus::Evicted;
    }
    if phase == "Failed" {
        return PodStatus::Failed;
    }
    if phase == "Succeeded" {
        return PodStatus::Succeeded;
    }
    if phase == "Running" && condition_true(pod, "Initialized") && condition_true(pod, "Ready") {
        return PodStatus::Running;
    }
    PodStatus::Pending
}

/// Container waiting/terminated reason, `Evicted`, or the pod phase
pub fn status_message(pod: &Pod) -> String {
    if reason(pod) == EVICTED_REASON {
        return EVICTED_REASON.to_string();
    }

    let mut message = String::new();
    for status in main_container_statuses(pod) {
        let Some(state) = status.state.as_ref() else {
            continue;
        };
        if let Some(waiting) = &state.waiting {
            message = waiting.reason.clone().unwrap_or_else(|| "Waiting".to_string());
        }
        if let Some(terminated) = &state.terminated {
            message = terminated
                .reason
                .clone()
                .unwrap_or_else(|| "Terminated".to_string());
        }
    }

    if message.is_empty() {
        phase(pod).to_string()
    } else {
        message
    }
}

/// Sum of restarts across the pod's main containers
pub fn restart_count(pod: &Pod) -> i32 {
    main_container_statuses(pod)
        .iter()
        .map(|s| s.restart_count)
        .sum()
}

pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("")
}

pub fn summarize(pod: &Pod) -> PodSummary {
    PodSummary {
        pod_name: pod_name(pod).to_string(),
        status: derive_pod_status(pod),
        status_message: status_message(pod),
        status_phase: phase(pod).to_string(),
        restart_count: restart_count(pod),
    }
}

/// Container to read logs from.
///
/// A pending pod is still building, so its first `compile` or `install`
/// init container is used. `None` means the pod's default container.
pub fn log_container_for(pod: &Pod) -> Option<String> {
    if derive_pod_status(pod) != PodStatus::Pending {
        return None;
    }
    pod.spec
        .as_ref()
        .and_then(|spec| spec.init_containers.as_ref())
        .and_then(|inits| {
            inits
                .iter()
                .find(|c| BUILD_CONTAINERS.contains(&c.name.as_str()))
        })
        .map(|c| c.name.clone())
}
