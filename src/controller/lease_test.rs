//! Tests for the leadership lease controller

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use kube::api::ObjectMeta;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::lease::*;
use super::{Ctx, Options};

fn test_lease(name: &str, namespace: &str, holder: Option<&str>) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: holder.map(str::to_string),
            ..Default::default()
        }),
    }
}

fn vip_lease(holder: Option<&str>) -> Lease {
    test_lease(DEFAULT_LEASE_NAME, DEFAULT_LEASE_NAMESPACE, holder)
}

fn node_json(name: &str, ip: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": name,
            "annotations": {"alpha.kubernetes.io/provided-node-ip": ip},
            "labels": {"kubernetes.io/hostname": name},
        },
        "status": {"conditions": [{"type": "Ready", "status": "True"}]},
    })
}

fn not_found_json(name: &str) -> serde_json::Value {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("nodes {name:?} not found"),
        "reason": "NotFound",
        "code": 404,
    })
}

async fn test_ctx(uri: &str) -> (Arc<Ctx>, futures::channel::mpsc::Receiver<()>) {
    let config = kube::Config::new(uri.parse().expect("mock server uri"));
    let client = kube::Client::try_from(config).expect("client from mock config");
    let (ctx, policy_events) = Ctx::new(client, Options::default());
    ctx.barrier.release();
    (Arc::new(ctx), policy_events)
}

#[tokio::test]
async fn test_new_holder_becomes_leader() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/nodes/n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(node_json("n1", "10.0.0.5")))
        .mount(&server)
        .await;
    let (ctx, mut policy_events) = test_ctx(&server.uri()).await;

    reconcile_lease(Arc::new(vip_lease(Some("n1"))), Arc::clone(&ctx))
        .await
        .expect("reconcile succeeds");

    assert_eq!(ctx.state.leader_ip(), "10.0.0.5");
    assert_eq!(ctx.state.leader_hostname(), "n1");
    // all managed policies were force-requeued
    assert_eq!(policy_events.try_next().ok().flatten(), Some(()));
}

#[tokio::test]
async fn test_unknown_holder_keeps_current_leader() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/nodes/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(not_found_json("gone")))
        .mount(&server)
        .await;
    let (ctx, mut policy_events) = test_ctx(&server.uri()).await;
    ctx.state.set_leader("10.0.0.5", "n1");

    reconcile_lease(Arc::new(vip_lease(Some("gone"))), Arc::clone(&ctx))
        .await
        .expect("unknown holder is a no-op, not an error");

    assert_eq!(ctx.state.leader_ip(), "10.0.0.5");
    assert_eq!(ctx.state.leader_hostname(), "n1");
    assert!(policy_events.try_next().is_err());
}

#[tokio::test]
async fn test_empty_holder_is_ignored() {
    let server = MockServer::start().await;
    let (ctx, mut policy_events) = test_ctx(&server.uri()).await;

    reconcile_lease(Arc::new(vip_lease(None)), Arc::clone(&ctx))
        .await
        .expect("reconcile succeeds");
    reconcile_lease(Arc::new(vip_lease(Some(""))), Arc::clone(&ctx))
        .await
        .expect("reconcile succeeds");

    assert_eq!(ctx.state.leader_hostname(), "");
    assert!(policy_events.try_next().is_err());
}

#[tokio::test]
async fn test_unchanged_holder_is_idempotent() {
    let server = MockServer::start().await;
    // no node mock mounted: a resolution attempt would fail the reconcile
    let (ctx, mut policy_events) = test_ctx(&server.uri()).await;
    ctx.state.set_leader("10.0.0.5", "n1");

    reconcile_lease(Arc::new(vip_lease(Some("n1"))), Arc::clone(&ctx))
        .await
        .expect("reconcile succeeds");

    assert_eq!(ctx.state.leader_ip(), "10.0.0.5");
    assert!(policy_events.try_next().is_err());
}

#[tokio::test]
async fn test_renewal_with_unchanged_resolved_leader_is_idempotent() {
    let server = MockServer::start().await;
    // hostname label differs from the node name, so the holder-name shortcut
    // never matches and every renewal resolves the node
    let node = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": "n1",
            "annotations": {"alpha.kubernetes.io/provided-node-ip": "10.0.0.5"},
            "labels": {"kubernetes.io/hostname": "n1.internal"},
        },
    });
    Mock::given(method("GET"))
        .and(path("/api/v1/nodes/n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(node))
        .mount(&server)
        .await;
    let (ctx, mut policy_events) = test_ctx(&server.uri()).await;
    ctx.state.set_leader("10.0.0.5", "n1.internal");

    reconcile_lease(Arc::new(vip_lease(Some("n1"))), Arc::clone(&ctx))
        .await
        .expect("reconcile succeeds");

    assert_eq!(ctx.state.leader_hostname(), "n1.internal");
    // the leader did not change, so no correction pass was triggered
    assert!(policy_events.try_next().is_err());
}

#[tokio::test]
async fn test_foreign_lease_is_ignored() {
    let server = MockServer::start().await;
    let (ctx, mut policy_events) = test_ctx(&server.uri()).await;

    let foreign = test_lease("some-other-lease", DEFAULT_LEASE_NAMESPACE, Some("n1"));
    reconcile_lease(Arc::new(foreign), Arc::clone(&ctx))
        .await
        .expect("reconcile succeeds");

    let wrong_namespace = test_lease(DEFAULT_LEASE_NAME, "default", Some("n1"));
    reconcile_lease(Arc::new(wrong_namespace), Arc::clone(&ctx))
        .await
        .expect("reconcile succeeds");

    assert_eq!(ctx.state.leader_hostname(), "");
    assert!(policy_events.try_next().is_err());
}

#[tokio::test]
async fn test_holder_without_node_ip_is_ignored() {
    let server = MockServer::start().await;
    let incomplete = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {"name": "n1", "labels": {"kubernetes.io/hostname": "n1"}},
    });
    Mock::given(method("GET"))
        .and(path("/api/v1/nodes/n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(incomplete))
        .mount(&server)
        .await;
    let (ctx, mut policy_events) = test_ctx(&server.uri()).await;

    reconcile_lease(Arc::new(vip_lease(Some("n1"))), Arc::clone(&ctx))
        .await
        .expect("reconcile succeeds");

    // an unresolvable identity never blanks or replaces the leader fact
    assert_eq!(ctx.state.leader_hostname(), "");
    assert!(policy_events.try_next().is_err());
}
