//! Node health controller
//!
//! Tracks readiness of gateway-eligible nodes. A node is eligible only while
//! it hosts a non-terminating kube-vip pod; everything else is ignored
//! entirely. Eligible nodes are recorded in the shared store as they become
//! ready and removed on readiness loss or deletion, and every store mutation
//! fires the policy trigger so pinned policies get re-checked.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::{Api, ListParams},
    runtime::{
        controller::{Action, Config as ControllerConfig, Controller},
        watcher,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::HOSTNAME_LABEL;
use crate::error::{Error, Result};

use super::Ctx;

/// Annotation carrying the IP the kubelet registered the node with.
pub const PROVIDED_NODE_IP_ANNOTATION: &str = "alpha.kubernetes.io/provided-node-ip";

/// Label identifying the gateway-critical workload.
pub const GATEWAY_POD_LABEL_KEY: &str = "app.kubernetes.io/name";
pub const GATEWAY_POD_LABEL_VALUE: &str = "kube-vip";

/// The node's provided IP, if the annotation is present and parses as a real
/// address. A malformed annotation is treated as absent.
pub fn node_ip(node: &Node) -> Option<String> {
    let ip = node.annotations().get(PROVIDED_NODE_IP_ANNOTATION)?;
    ip.parse::<std::net::IpAddr>().ok()?;
    Some(ip.clone())
}

pub fn node_hostname(node: &Node) -> Option<String> {
    node.labels()
        .get(HOSTNAME_LABEL)
        .filter(|h| !h.is_empty())
        .cloned()
}

/// Readiness condition of the node. Absent conditions count as not ready.
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|cond| cond.status == "True")
}

/// Whether some non-terminating gateway pod is scheduled on this node.
pub fn hosts_gateway_pod(node_name: &str, pods: &[Pod]) -> bool {
    if node_name.is_empty() {
        return false;
    }
    pods.iter().any(|pod| {
        pod.metadata.deletion_timestamp.is_none()
            && pod
                .spec
                .as_ref()
                .and_then(|spec| spec.node_name.as_deref())
                == Some(node_name)
            && pod
                .labels()
                .get(GATEWAY_POD_LABEL_KEY)
                .is_some_and(|v| v.as_str() == GATEWAY_POD_LABEL_VALUE)
    })
}

async fn list_gateway_pods(ctx: &Ctx) -> Result<Vec<Pod>> {
    let pods: Api<Pod> = Api::all(ctx.client.clone());
    let selector = format!("{GATEWAY_POD_LABEL_KEY}={GATEWAY_POD_LABEL_VALUE}");
    let listed = pods
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(Error::KubeError)?;
    Ok(listed.items)
}

/// One-shot bulk population of the store, run before any controller starts.
/// Records every eligible, ready node so live events never race an empty
/// baseline.
pub async fn init_store(ctx: &Ctx) -> Result<()> {
    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let listed = nodes
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    let pods = list_gateway_pods(ctx).await?;

    for node in &listed.items {
        if node.metadata.deletion_timestamp.is_some() {
            continue;
        }
        if !hosts_gateway_pod(&node.name_any(), &pods) {
            continue;
        }
        let (Some(ip), Some(hostname)) = (node_ip(node), node_hostname(node)) else {
            continue;
        };
        if is_node_ready(node) {
            debug!("Initial listing: node {:?} ({}) is ready", node.name_any(), ip);
            ctx.state.record_node(&ip, &hostname, true);
        }
    }
    Ok(())
}

#[instrument(skip(node, ctx), fields(node = %node.name_any()))]
pub(crate) async fn reconcile_node(node: Arc<Node>, ctx: Arc<Ctx>) -> Result<Action> {
    ctx.barrier.wait().await;

    let name = node.name_any();
    let pods = list_gateway_pods(&ctx).await?;
    if !hosts_gateway_pod(&name, &pods) {
        return Ok(Action::await_change());
    }
    debug!("Node {:?} hosts the gateway workload", name);

    let (Some(ip), Some(hostname)) = (node_ip(&node), node_hostname(&node)) else {
        warn!("Failed to derive IP/hostname for gateway node {:?}", name);
        return Ok(Action::await_change());
    };

    if node.metadata.deletion_timestamp.is_some() {
        info!("Gateway node {:?} is being deleted", name);
        ctx.state.record_node(&ip, &hostname, false);
    } else if is_node_ready(&node) {
        debug!("Gateway node {:?} ({}) is ready", name, ip);
        ctx.state.record_node(&ip, &hostname, true);
    } else {
        info!("Gateway node {:?} ({}) is not ready", name, ip);
        ctx.state.record_node(&ip, &hostname, false);
    }

    // A node transition can invalidate policies pinned to it; re-check them
    // asynchronously rather than in-line from this handler.
    ctx.policy_trigger.fire();

    Ok(Action::await_change())
}

fn error_policy(node: Arc<Node>, error: &Error, _ctx: Arc<Ctx>) -> Action {
    error!("Node reconciliation error for {:?}: {}", node.name_any(), error);
    Action::requeue(Duration::from_secs(30))
}

/// Run the node controller until shutdown.
pub async fn run_node_controller(ctx: Arc<Ctx>) -> Result<()> {
    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let workers = ctx.options.workers;

    info!("Starting node controller");
    Controller::new(nodes, watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(workers))
        .shutdown_on_signal()
        .run(reconcile_node, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled node {:?}", obj.0.name),
                Err(e) => warn!("Node reconcile failed: {:?}", e),
            }
        })
        .await;
    Ok(())
}
