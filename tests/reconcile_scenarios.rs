//! # Reconcile Scenario Tests
//!
//! Drives `reconcile` end to end against in-memory sources, destinations and
//! status storage.
//!
//! These tests verify:
//! - Fields are copied into the destination and follow source updates
//! - Required conditions gate every write
//! - Source watch events requeue the bound export
//! - A repeated reconcile with nothing to do writes nothing
//! - Config errors wait for a spec change; transient errors are retried and
//!   eventually reported as Degraded

mod common;

use common::{elasticache_group, export, redis_instance, sql_instance, test_config, Harness};
use field_exporter::config::ControllerConfig;
use field_exporter::constants::{READY_CONDITION, RECONCILE_ANNOTATION};
use field_exporter::controller::reconciler::{reconcile, ReconcilerError};
use field_exporter::crd::{Condition, DestinationType, ResourceFieldExport};
use field_exporter::runtime::error_policy::handle_reconciliation_error;
use field_exporter::runtime::export_watch::release;
use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const NS: &str = "default";

fn ready(h: &Harness, export: &ResourceFieldExport) -> Condition {
    let name = export.metadata.name.as_deref().unwrap();
    h.statuses
        .latest(NS, name)
        .and_then(|s| s.condition(READY_CONDITION).cloned())
        .expect("Ready condition should be reported")
}

fn sql_export() -> ResourceFieldExport {
    export(
        NS,
        "sql-display-name",
        r#"
from:
  apiVersion: sql.cnrm.cloud.google.com/v1beta1
  kind: SQLInstance
  name: testdb
to:
  type: ConfigMap
  name: sql-outputs
outputs:
  - key: display-name
    path: .spec.displayName
"#,
    )
}

async fn run(h: &Harness, export: &ResourceFieldExport) -> Result<Action, ReconcilerError> {
    reconcile(Arc::new(export.clone()), h.ctx.clone()).await
}

#[tokio::test]
async fn test_display_name_copied_to_configmap() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "test-0001-testdb-default"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let export = sql_export();

    let action = run(&h, &export).await.unwrap();

    assert_eq!(action, Action::requeue(test_config().resync_interval()));
    assert_eq!(
        h.destinations
            .value(DestinationType::ConfigMap, NS, "sql-outputs", "display-name")
            .as_deref(),
        Some("test-0001-testdb-default")
    );
    let condition = ready(&h, &export);
    assert_eq!(condition.status, "True");
    assert_eq!(condition.reason.as_deref(), Some("Synced"));
    assert!(condition.last_transition_time.is_some());
}

#[tokio::test]
async fn test_source_update_propagates() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "test-0001-testdb-default"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let mut export = sql_export();
    run(&h, &export).await.unwrap();
    h.refresh(&mut export);

    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "new-display-name"}}),
    );
    run(&h, &export).await.unwrap();

    assert_eq!(
        h.destinations
            .value(DestinationType::ConfigMap, NS, "sql-outputs", "display-name")
            .as_deref(),
        Some("new-display-name")
    );
    assert_eq!(h.destinations.writes(), 2);
}

#[tokio::test]
async fn test_unmet_conditions_block_writes() {
    let h = Harness::new();
    h.sources.put(
        &redis_instance(),
        NS,
        "cache",
        json!({"status": {"host": "10.0.0.3"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "redis-outputs");
    let export = export(
        NS,
        "redis-host",
        r#"
from: { apiVersion: redis.cnrm.cloud.google.com/v1beta1, kind: RedisInstance, name: cache }
to: { type: ConfigMap, name: redis-outputs }
outputs: [{ key: host, path: .status.host }]
requiredFields:
  statusConditions: [{ type: Available, status: "True" }]
"#,
    );

    let action = run(&h, &export).await.unwrap();

    assert_eq!(action, Action::requeue(test_config().resync_interval()));
    let condition = ready(&h, &export);
    assert_eq!(condition.status, "False");
    assert_eq!(condition.reason.as_deref(), Some("ConditionsNotMet"));
    assert!(condition.message.unwrap_or_default().contains("Available=True"));
    assert_eq!(h.destinations.writes(), 0);
    assert_eq!(
        h.destinations
            .value(DestinationType::ConfigMap, NS, "redis-outputs", "host"),
        None
    );
}

#[tokio::test]
async fn test_met_conditions_allow_writes() {
    let h = Harness::new();
    h.sources.put(
        &redis_instance(),
        NS,
        "cache",
        json!({"status": {
            "host": "10.0.0.3",
            "conditions": [{"type": "Ready", "status": "True"}]
        }}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "redis-outputs");
    let export = export(
        NS,
        "redis-host",
        r#"
from: { apiVersion: redis.cnrm.cloud.google.com/v1beta1, kind: RedisInstance, name: cache }
to: { type: ConfigMap, name: redis-outputs }
outputs: [{ key: host, path: .status.host }]
requiredFields:
  statusConditions: [{ type: Ready, status: "True" }]
"#,
    );

    run(&h, &export).await.unwrap();

    assert_eq!(
        h.destinations
            .value(DestinationType::ConfigMap, NS, "redis-outputs", "host")
            .as_deref(),
        Some("10.0.0.3")
    );
}

#[tokio::test]
async fn test_indexed_path_into_secret() {
    let h = Harness::new();
    h.sources.put(
        &elasticache_group(),
        NS,
        "sessions",
        json!({"status": {"nodeGroups": [
            {"primaryEndpoint": {"address": "X", "port": 6379}},
            {"primaryEndpoint": {"address": "Y", "port": 6379}}
        ]}}),
    );
    h.destinations.create_empty(DestinationType::Secret, NS, "sessions-endpoint");
    let export = export(
        NS,
        "sessions-endpoint",
        r#"
from: { apiVersion: elasticache.services.k8s.aws/v1alpha1, kind: ReplicationGroup, name: sessions }
to: { type: Secret, name: sessions-endpoint }
outputs:
  - { key: address, path: ".status.nodeGroups[0].primaryEndpoint.address" }
  - { key: port, path: ".status.nodeGroups[0].primaryEndpoint.port" }
"#,
    );

    run(&h, &export).await.unwrap();

    let value = |key| {
        h.destinations
            .value(DestinationType::Secret, NS, "sessions-endpoint", key)
    };
    assert_eq!(value("address").as_deref(), Some("X"));
    assert_eq!(value("port").as_deref(), Some("6379"));
}

#[tokio::test]
async fn test_unresolved_outputs_are_skipped() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let export = export(
        NS,
        "sql-partial",
        r#"
from: { apiVersion: sql.cnrm.cloud.google.com/v1beta1, kind: SQLInstance, name: testdb }
to: { type: ConfigMap, name: sql-outputs }
outputs:
  - { key: display-name, path: .spec.displayName }
  - { key: ip, path: .status.publicIpAddress }
"#,
    );

    run(&h, &export).await.unwrap();

    assert_eq!(
        h.destinations
            .value(DestinationType::ConfigMap, NS, "sql-outputs", "display-name")
            .as_deref(),
        Some("testdb")
    );
    assert_eq!(
        h.destinations
            .value(DestinationType::ConfigMap, NS, "sql-outputs", "ip"),
        None
    );
    let condition = ready(&h, &export);
    assert_eq!(condition.status, "True");
    assert_eq!(condition.reason.as_deref(), Some("PartiallySynced"));
    assert!(condition.message.unwrap_or_default().contains("ip"));
}

#[tokio::test]
async fn test_unrelated_destination_keys_preserved() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations
        .set(DestinationType::ConfigMap, NS, "sql-outputs", "owner", "team-a");
    let export = sql_export();

    run(&h, &export).await.unwrap();

    assert_eq!(
        h.destinations
            .value(DestinationType::ConfigMap, NS, "sql-outputs", "owner")
            .as_deref(),
        Some("team-a")
    );
}

#[tokio::test]
async fn test_second_reconcile_is_a_no_op() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let mut export = sql_export();

    run(&h, &export).await.unwrap();
    h.refresh(&mut export);
    let writes = h.destinations.writes();
    let patches = h.statuses.patch_count();

    run(&h, &export).await.unwrap();

    assert_eq!(h.destinations.writes(), writes);
    assert_eq!(h.statuses.patch_count(), patches);
}

#[tokio::test]
async fn test_source_event_requeues_export() {
    let mut h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let export = sql_export();
    run(&h, &export).await.unwrap();
    h.sources.wait_for_watch(&sql_instance()).await;

    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "renamed"}}),
    );

    let requeued = tokio::time::timeout(Duration::from_secs(2), h.requeued.next())
        .await
        .expect("source event should requeue the export");
    assert_eq!(requeued, Some(ObjectRef::from_obj(&export)));
}

#[tokio::test]
async fn test_events_for_other_sources_are_ignored() {
    let mut h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    run(&h, &sql_export()).await.unwrap();
    h.sources.wait_for_watch(&sql_instance()).await;

    h.sources.put(
        &sql_instance(),
        NS,
        "otherdb",
        json!({"spec": {"displayName": "other"}}),
    );

    let requeued = tokio::time::timeout(Duration::from_millis(100), h.requeued.next()).await;
    assert!(requeued.is_err(), "unrelated source must not requeue");
}

#[tokio::test]
async fn test_missing_source_is_watched_before_it_exists() {
    let mut h = Harness::new();
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let export = sql_export();

    assert!(run(&h, &export).await.is_err());
    h.sources.wait_for_watch(&sql_instance()).await;

    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "late"}}),
    );
    let requeued = tokio::time::timeout(Duration::from_secs(2), h.requeued.next())
        .await
        .expect("creating the source should requeue the export");
    assert_eq!(requeued, Some(ObjectRef::from_obj(&export)));
}

#[tokio::test]
async fn test_unsupported_api_version_waits_for_change() {
    let h = Harness::new();
    let export = export(
        NS,
        "bad-group",
        r#"
from: { apiVersion: apps/v1, kind: Deployment, name: web }
to: { type: ConfigMap, name: web-outputs }
outputs: [{ key: replicas, path: .spec.replicas }]
"#,
    );

    let action = run(&h, &export).await.unwrap();

    assert_eq!(action, Action::await_change());
    let condition = ready(&h, &export);
    assert_eq!(condition.status, "False");
    assert_eq!(condition.reason.as_deref(), Some("InvalidReference"));
    let message = condition.message.unwrap_or_default();
    assert!(message.contains("apps/v1"), "{message}");
    assert!(message.contains("cnrm.cloud.google.com"), "{message}");
    assert!(message.contains("services.k8s.aws"), "{message}");
    assert_eq!(h.sources.gets.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(h.ctx.watches.active_watches().is_empty());
}

#[tokio::test]
async fn test_spec_becoming_invalid_releases_watch() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let mut export = sql_export();
    run(&h, &export).await.unwrap();
    assert_eq!(h.ctx.watches.refcount(&sql_instance()), 1);

    export.spec.outputs[0].path = "spec.displayName".to_string();
    export.metadata.generation = Some(2);
    let action = run(&h, &export).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(ready(&h, &export).reason.as_deref(), Some("InvalidReference"));
    assert_eq!(h.ctx.watches.refcount(&sql_instance()), 0);
}

#[tokio::test]
async fn test_missing_destination_is_pending_then_degraded() {
    let h = Harness::with_config(ControllerConfig {
        retry_budget: 2,
        ..test_config()
    });
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    let mut export = sql_export();

    let err = run(&h, &export).await.unwrap_err();
    assert!(!err.is_config());
    assert_eq!(ready(&h, &export).status, "Unknown");
    assert_eq!(ready(&h, &export).reason.as_deref(), Some("Pending"));
    let action = handle_reconciliation_error(Arc::new(export.clone()), &err, h.ctx.clone());
    assert_eq!(action, Action::requeue(Duration::from_millis(10)));
    h.refresh(&mut export);

    let err = run(&h, &export).await.unwrap_err();
    assert_eq!(ready(&h, &export).status, "False");
    assert_eq!(ready(&h, &export).reason.as_deref(), Some("Degraded"));
    let action = handle_reconciliation_error(Arc::new(export.clone()), &err, h.ctx.clone());
    assert_eq!(action, Action::requeue(Duration::from_millis(20)));
    assert!(!h.destinations.exists(DestinationType::ConfigMap, NS, "sql-outputs"));
}

#[tokio::test]
async fn test_recovery_resets_retry_state() {
    let h = Harness::new();
    let export = sql_export();
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");

    let err = run(&h, &export).await.unwrap_err();
    handle_reconciliation_error(Arc::new(export.clone()), &err, h.ctx.clone());
    assert_eq!(h.ctx.error_count("default/sql-display-name"), 1);

    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    run(&h, &export).await.unwrap();

    assert_eq!(h.ctx.error_count("default/sql-display-name"), 0);
    assert_eq!(ready(&h, &export).reason.as_deref(), Some("Synced"));
}

#[tokio::test]
async fn test_create_missing_destination_when_enabled() {
    let h = Harness::with_config(ControllerConfig {
        destination_create_missing: true,
        ..test_config()
    });
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );

    run(&h, &sql_export()).await.unwrap();

    assert_eq!(
        h.destinations
            .value(DestinationType::ConfigMap, NS, "sql-outputs", "display-name")
            .as_deref(),
        Some("testdb")
    );
}

#[tokio::test]
async fn test_deleted_export_releases_shared_watch() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let first = sql_export();
    let mut second = sql_export();
    second.metadata.name = Some("sql-display-name-copy".to_string());
    run(&h, &first).await.unwrap();
    run(&h, &second).await.unwrap();
    assert_eq!(h.ctx.watches.refcount(&sql_instance()), 2);
    assert_eq!(h.ctx.watches.active_watches().len(), 1);

    release(&h.ctx, &first);
    assert_eq!(h.ctx.watches.refcount(&sql_instance()), 1);
    release(&h.ctx, &second);
    assert!(h.ctx.watches.active_watches().is_empty());
}

#[tokio::test]
async fn test_repeated_degraded_failures_patch_status_once() {
    let h = Harness::with_config(ControllerConfig {
        retry_budget: 1,
        ..test_config()
    });
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    let mut export = sql_export();

    for _ in 0..5 {
        let err = run(&h, &export).await.unwrap_err();
        handle_reconciliation_error(Arc::new(export.clone()), &err, h.ctx.clone());
        h.refresh(&mut export);
    }

    assert_eq!(h.statuses.patch_count(), 1);
    assert_eq!(ready(&h, &export).reason.as_deref(), Some("Degraded"));
    assert_eq!(h.ctx.error_count("default/sql-display-name"), 5);
}

#[tokio::test]
async fn test_stale_reconcile_after_delete_does_not_rebind() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let mut export = sql_export();
    export.metadata.uid = Some("0b6f8c1e".to_string());
    run(&h, &export).await.unwrap();
    assert_eq!(h.ctx.watches.refcount(&sql_instance()), 1);

    release(&h.ctx, &export);
    // A reconcile queued before the delete still holds the old object
    run(&h, &export).await.unwrap();

    assert_eq!(h.ctx.watches.refcount(&sql_instance()), 0);
    assert!(h.ctx.watches.active_watches().is_empty());
}

#[tokio::test]
async fn test_recreated_export_binds_after_delete() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let mut old = sql_export();
    old.metadata.uid = Some("0b6f8c1e".to_string());
    run(&h, &old).await.unwrap();
    release(&h.ctx, &old);

    let mut recreated = sql_export();
    recreated.metadata.uid = Some("5d2a9f07".to_string());
    run(&h, &recreated).await.unwrap();

    assert_eq!(h.ctx.watches.refcount(&sql_instance()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_source_hits_reconcile_deadline() {
    let h = Harness::with_config(ControllerConfig {
        reconcile_timeout_secs: 1,
        ..test_config()
    });
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    h.sources.set_get_delay(Duration::from_secs(10));
    let export = sql_export();

    let err = run(&h, &export).await.unwrap_err();

    assert!(matches!(err, ReconcilerError::Timeout(d) if d == Duration::from_secs(1)));
    assert!(!err.is_config());
    assert_eq!(ready(&h, &export).status, "Unknown");
    assert_eq!(ready(&h, &export).reason.as_deref(), Some("Pending"));
    assert_eq!(h.destinations.writes(), 0);
}

#[tokio::test]
async fn test_manual_reconcile_request_recorded_once() {
    let h = Harness::new();
    h.sources.put(
        &sql_instance(),
        NS,
        "testdb",
        json!({"spec": {"displayName": "testdb"}}),
    );
    h.destinations.create_empty(DestinationType::ConfigMap, NS, "sql-outputs");
    let mut export = sql_export();
    export.annotations_mut().insert(
        RECONCILE_ANNOTATION.to_string(),
        "2026-10-18T09:00:00Z".to_string(),
    );

    run(&h, &export).await.unwrap();
    h.refresh(&mut export);
    run(&h, &export).await.unwrap();

    assert_eq!(h.statuses.patch_count(), 1);
    let status = h.statuses.latest(NS, "sql-display-name").unwrap();
    assert_eq!(
        status.last_handled_reconcile_at.as_deref(),
        Some("2026-10-18T09:00:00Z")
    );
}
