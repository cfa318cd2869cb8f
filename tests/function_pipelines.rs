//! Function lifecycle pipelines against in-process fakes

mod common;

use chrono::{TimeZone, Utc};
use serde_json::json;

use common::{caller, function_spec, pod, settle, Harness};
use faas_control::cluster::ClusterError;
use faas_control::model::{CallerIdentity, Outcome, Step};
use faas_control::orchestrator::{FunctionStatusReport, LogWatermark};
use faas_control::store::LifecycleStore;
use faas_control::{Command, CommandEnvelope, ErrorKind};

#[tokio::test]
async fn test_create_function_deploys_and_succeeds() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let namespace = h.store.get_namespace(&ns_id).await.unwrap();

    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    let function = h.store.get_function(&id).await.unwrap();
    assert_eq!(function.status.step(), Step::Deployed);
    assert_eq!(function.status.outcome(), Outcome::Succeeded);
    assert_eq!(function.status.message(), "");
    assert_eq!(
        function.url,
        format!("https://fn.example.com/{}/apis/hello", namespace.id_namespace)
    );

    let source = h.store.get_source_code(&id).await.unwrap().unwrap();
    assert_eq!(source.source_code, "module.exports = () => 'hello'");
    assert_eq!(source.environments.len(), 1);

    let requests = h.dispatcher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].namespace, namespace.id_namespace);
    assert_eq!(requests[0].api_key, namespace.api_key);
    assert_eq!(requests[0].kube_config, common::KUBECONFIG);
    assert_eq!(requests[0].function.replicas, 2);
}

#[tokio::test]
async fn test_duplicate_name_conflicts_without_touching_source() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    let mut duplicate = function_spec("hello");
    duplicate.source_code = "overwritten".to_string();
    let err = h
        .engine
        .functions()
        .create(&user, &ns_id, duplicate)
        .await
        .unwrap_err();
    h.engine.drain().await;

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.dispatcher.requests().len(), 1);
    let source = h.store.get_source_code(&id).await.unwrap().unwrap();
    assert_eq!(source.source_code, "module.exports = () => 'hello'");
    assert_eq!(h.store.find_functions_by_namespace(&ns_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_in_foreign_namespace_is_not_found() {
    let h = Harness::new();
    let ns_id = h.namespace(&caller(), "team").await;

    let intruder = CallerIdentity::new("user-2");
    let err = h
        .engine
        .functions()
        .create(&intruder, &ns_id, function_spec("hello"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.store.find_functions_by_namespace(&ns_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_spec_rejected_before_any_write() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;

    let err = h
        .engine
        .functions()
        .create(&user, &ns_id, function_spec("Not_A_Label"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.store.find_functions_by_namespace(&ns_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_worker_rejection_marks_function_failed() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    *h.dispatcher.reject_with.lock().unwrap() = Some("image build failed".to_string());

    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    let function = h.store.get_function(&id).await.unwrap();
    assert_eq!(function.status.step(), Step::Deployed);
    assert_eq!(function.status.outcome(), Outcome::Failed);
    assert!(function.status.message().contains("image build failed"));
}

#[tokio::test]
async fn test_autoscaler_failure_does_not_fail_deploy() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    h.cluster.fail("autoscale", ClusterError::Transient("hpa api down".into()));

    let mut spec = function_spec("hello");
    spec.autoscaler = serde_json::from_value(json!({
        "enabled": true,
        "minReplicas": 3,
        "maxReplicas": 2,
        "averageCpu": 70,
        "averageMemory": 80
    }))
    .unwrap();
    let id = h.function(&user, &ns_id, spec).await;

    let function = h.store.get_function(&id).await.unwrap();
    assert_eq!(function.status.outcome(), Outcome::Succeeded);
    let autoscale_calls: Vec<String> = h
        .cluster
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("autoscale"))
        .collect();
    assert_eq!(autoscale_calls.len(), 1);
    assert!(autoscale_calls[0].ends_with("3-4"));
}

#[tokio::test]
async fn test_update_keeps_name_and_replicas() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    let mut spec = function_spec("renamed");
    spec.replicas = 9;
    spec.memory = "256Mi".to_string();
    spec.source_code = "module.exports = () => 'v2'".to_string();
    h.engine.functions().update(&user, &id, spec).await.unwrap();
    h.engine.drain().await;

    let function = h.store.get_function(&id).await.unwrap();
    assert_eq!(function.name, "hello");
    assert_eq!(function.replicas, 2);
    assert_eq!(function.memory, "256Mi");
    assert_eq!(function.status.outcome(), Outcome::Succeeded);

    let source = h.store.get_source_code(&id).await.unwrap().unwrap();
    assert_eq!(source.source_code, "module.exports = () => 'v2'");

    let last = h.dispatcher.requests().pop().unwrap();
    assert_eq!(last.function.name, "hello");
    assert_eq!(last.function.replicas, 2);
}

#[tokio::test]
async fn test_stop_then_start_restores_replicas() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    h.engine.functions().stop(&user, &id).await.unwrap();
    h.engine.drain().await;

    let stopped = h.store.get_function(&id).await.unwrap();
    assert_eq!(stopped.status.step(), Step::Stop);
    assert_eq!(stopped.status.outcome(), Outcome::Stop);
    assert_eq!(stopped.replicas, 2);

    h.engine.functions().start(&user, &id).await.unwrap();
    h.engine.drain().await;

    let started = h.store.get_function(&id).await.unwrap();
    assert_eq!(started.status.step(), Step::Deployed);
    assert_eq!(started.status.outcome(), Outcome::Succeeded);

    let scales: Vec<String> = h
        .cluster
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("scale"))
        .collect();
    assert_eq!(scales.len(), 2);
    assert!(scales[0].ends_with("hello 0"));
    assert!(scales[1].ends_with("hello 2"));
}

#[tokio::test]
async fn test_scale_persists_replicas() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    h.engine.functions().scale(&user, &id, 5).await.unwrap();
    h.engine.drain().await;

    let function = h.store.get_function(&id).await.unwrap();
    assert_eq!(function.replicas, 5);
    assert_eq!(function.status.outcome(), Outcome::Succeeded);
}

#[tokio::test]
async fn test_failed_scale_keeps_replicas_and_records_failure() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;
    h.cluster.fail(
        "scale",
        ClusterError::NotFound("deployment hello".into()),
    );

    h.engine.functions().scale(&user, &id, 7).await.unwrap();
    h.engine.drain().await;

    let function = h.store.get_function(&id).await.unwrap();
    assert_eq!(function.replicas, 2);
    assert_eq!(function.status.step(), Step::Deployed);
    assert_eq!(function.status.outcome(), Outcome::Failed);
    assert!(function.status.message().contains("deployment hello"));
}

#[tokio::test]
async fn test_negative_scale_rejected() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    let err = h.engine.functions().scale(&user, &id, -1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_delete_removes_function_and_source() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    h.engine.functions().delete(&user, &id).await.unwrap();
    h.engine.drain().await;

    assert!(h.store.get_function(&id).await.is_err());
    assert!(h.store.get_source_code(&id).await.unwrap().is_none());
    assert!(h.cluster.ops().contains(&"delete_function".to_string()));
}

#[tokio::test]
async fn test_failed_cluster_delete_keeps_record() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;
    h.cluster.fail(
        "delete_function",
        ClusterError::Transient("api timeout".into()),
    );

    h.engine.functions().delete(&user, &id).await.unwrap();
    h.engine.drain().await;

    let function = h.store.get_function(&id).await.unwrap();
    assert_eq!(function.status.step(), Step::Removing);
    assert_eq!(function.status.outcome(), Outcome::Failed);
    assert!(h.store.get_source_code(&id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_status_without_pods_reports_stored_status() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    let report = h.engine.functions().status(&user, &id).await.unwrap();
    match report {
        FunctionStatusReport::Stored(status) => {
            assert_eq!(status.step(), Step::Deployed);
            assert_eq!(status.outcome(), Outcome::Succeeded);
        }
        other => panic!("expected stored status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_status_reports_each_pod() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;
    h.cluster.pods.insert(
        "hello".to_string(),
        vec![
            pod("hello-a", "Running", &[("Initialized", "True"), ("Ready", "True")]),
            pod("hello-b", "Running", &[("Initialized", "True"), ("Ready", "False")]),
        ],
    );

    let report = h.engine.functions().status(&user, &id).await.unwrap();
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value[0]["podName"], "hello-a");
    assert_eq!(value[0]["derivedPodStatus"], "RUNNING");
    assert_eq!(value[1]["derivedPodStatus"], "PENDING");
    assert_eq!(value[1]["storedStatus"]["step"], "DEPLOYED");
}

#[tokio::test]
async fn test_logs_respect_watermarks() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;

    h.cluster.pods.insert(
        "hello".to_string(),
        vec![
            pod("hello-a", "Running", &[("Initialized", "True"), ("Ready", "True")]),
            pod("hello-b", "Running", &[("Initialized", "True"), ("Ready", "True")]),
        ],
    );
    let raw = "2024-05-01T10:00:00Z first\n2024-05-01T10:00:05Z second\n2024-05-01T10:00:09Z third\n";
    h.cluster.raw_logs.insert("hello-a".to_string(), raw.to_string());
    h.cluster.raw_logs.insert("hello-b".to_string(), raw.to_string());

    let watermarks = vec![LogWatermark {
        pod: "hello-a".to_string(),
        logstimestamp: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 5).unwrap()),
    }];
    let logs = h
        .engine
        .functions()
        .logs(&user, &id, &watermarks)
        .await
        .unwrap();

    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].pod, "hello-a");
    assert_eq!(logs[0].batch.lines.len(), 1);
    assert!(logs[0].batch.lines[0].ends_with("third"));

    assert_eq!(logs[1].pod, "hello-b");
    assert_eq!(logs[1].batch.lines.len(), 3);
    assert_eq!(
        logs[1].batch.last_timestamp,
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 9).unwrap())
    );
}

#[tokio::test]
async fn test_function_metrics_use_pod_selector() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;
    h.cluster.pods.insert(
        "hello".to_string(),
        vec![pod("hello-a", "Running", &[])],
    );

    let metrics = h.engine.functions().metrics(&user, &id, None).await.unwrap();
    assert_eq!(metrics.len(), 9);
    let cpu = metrics["cpuUsage"]["data"]["result"][0]["query"]
        .as_str()
        .unwrap();
    assert!(cpu.contains("hello-a"));
    assert!(cpu.contains("by (pod, namespace)"));

    let ranged = h
        .engine
        .functions()
        .metrics(&user, &id, Some(600))
        .await
        .unwrap();
    let cpu = ranged["cpuUsage"]["data"]["result"][0]["query"]
        .as_str()
        .unwrap();
    assert!(cpu.contains("by (container, namespace)"));
}

#[tokio::test]
async fn test_command_envelope_round_trip_through_engine() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;

    let envelope: CommandEnvelope = serde_json::from_value(json!({
        "user": {"id": "user-1"},
        "cmd": "post-function",
        "payload": {
            "idNamespace": ns_id,
            "name": "hello",
            "executedName": "handler",
            "runtime": "python3.8",
            "trigger": "http",
            "memory": "128Mi",
            "cpu": "100m",
            "sourceCode": "def handler(e, c): return 'ok'"
        }
    }))
    .unwrap();

    let response = h.engine.handle(envelope).await;
    assert_eq!(response.status, 202);
    let id = response.id.unwrap();
    h.engine.drain().await;

    let response = h
        .engine
        .handle(CommandEnvelope {
            user: user.clone(),
            command: Command::ListFunctions(faas_control::commands::ByNamespace {
                id_namespace: ns_id.clone(),
            }),
        })
        .await;
    assert_eq!(response.status, 200);
    let data = response.data.unwrap();
    assert_eq!(data[0]["id"], id.as_str());
    assert_eq!(data[0]["status"]["status"], "SUCCEEDED");
}

#[tokio::test]
async fn test_create_acknowledges_while_deploy_is_running() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let gate = h.dispatcher.hold();

    let accepted = h
        .engine
        .functions()
        .create(&user, &ns_id, function_spec("hello"))
        .await
        .unwrap();
    settle(|| h.dispatcher.requests().len() == 1).await;

    assert_eq!(h.engine.in_flight(), 1);
    let pending = h.store.get_function(&accepted.id).await.unwrap();
    assert_eq!(pending.status.step(), Step::Creating);
    assert_eq!(pending.status.outcome(), Outcome::Pending);
    assert_eq!(pending.status.message(), "");

    gate.notify_one();
    h.engine.drain().await;

    assert_eq!(h.engine.in_flight(), 0);
    let deployed = h.store.get_function(&accepted.id).await.unwrap();
    assert_eq!(deployed.status.step(), Step::Deployed);
    assert_eq!(deployed.status.outcome(), Outcome::Succeeded);
}

#[tokio::test]
async fn test_stop_records_intent_before_scaling_finishes() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;
    let gate = h.cluster.hold("scale");

    let accepted = h.engine.functions().stop(&user, &id).await.unwrap();
    assert_eq!(accepted.id, id);
    settle(|| h.cluster.ops().contains(&"scale".to_string())).await;

    assert_eq!(h.engine.in_flight(), 1);
    let pending = h.store.get_function(&id).await.unwrap();
    assert_eq!(pending.status.step(), Step::Stop);
    assert_eq!(pending.status.outcome(), Outcome::Pending);

    gate.notify_one();
    h.engine.drain().await;

    let stopped = h.store.get_function(&id).await.unwrap();
    assert_eq!(stopped.status.step(), Step::Stop);
    assert_eq!(stopped.status.outcome(), Outcome::Stop);
}

#[tokio::test]
async fn test_delete_keeps_record_removing_until_cluster_delete_finishes() {
    let h = Harness::new();
    let user = caller();
    let ns_id = h.namespace(&user, "team").await;
    let id = h.function(&user, &ns_id, function_spec("hello")).await;
    let gate = h.cluster.hold("delete_function");

    h.engine.functions().delete(&user, &id).await.unwrap();
    settle(|| h.cluster.ops().contains(&"delete_function".to_string())).await;

    assert_eq!(h.engine.in_flight(), 1);
    let pending = h.store.get_function(&id).await.unwrap();
    assert_eq!(pending.status.step(), Step::Removing);
    assert_eq!(pending.status.outcome(), Outcome::Pending);
    assert!(h.store.get_source_code(&id).await.unwrap().is_some());

    gate.notify_one();
    h.engine.drain().await;

    assert!(h.store.get_function(&id).await.is_err());
    assert!(h.store.get_source_code(&id).await.unwrap().is_none());
}
