//! Leadership lease controller
//!
//! Watches the externally-managed kube-vip services lease and resolves its
//! holder to a node identity. Leadership is an input here, never an output:
//! the operator does not elect anything, it only reacts to the lease moving.
//! A holder that cannot be resolved to a fully-specified node identity is
//! ignored so that a stale or not-yet-visible holder never blanks the leader
//! fact.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Config as ControllerConfig, Controller},
        watcher,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{is_not_found, Error, Result};

use super::node::{node_hostname, node_ip};
use super::Ctx;

/// Default identity of the kube-vip services lease.
pub const DEFAULT_LEASE_NAME: &str = "plndr-svcs-lock";
pub const DEFAULT_LEASE_NAMESPACE: &str = "kube-system";

fn holder_identity(lease: &Lease) -> Option<&str> {
    lease
        .spec
        .as_ref()
        .and_then(|spec| spec.holder_identity.as_deref())
        .filter(|holder| !holder.is_empty())
}

#[instrument(skip(lease, ctx), fields(lease = %lease.name_any()))]
pub(crate) async fn reconcile_lease(lease: Arc<Lease>, ctx: Arc<Ctx>) -> Result<Action> {
    ctx.barrier.wait().await;

    // The watch is field-selected to the configured lease, but a cheap
    // identity check keeps a misdelivered event from ever acting.
    if lease.metadata.deletion_timestamp.is_some()
        || lease.name_any() != ctx.options.lease_name
        || lease.namespace().as_deref() != Some(ctx.options.lease_namespace.as_str())
    {
        return Ok(Action::await_change());
    }
    let Some(holder) = holder_identity(&lease) else {
        return Ok(Action::await_change());
    };
    if ctx.state.leader_hostname() == holder {
        debug!("Holder {:?} is already the leader node", holder);
        return Ok(Action::await_change());
    }

    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let node = match nodes.get(holder).await {
        Ok(node) => node,
        Err(err) if is_not_found(&err) => {
            warn!("Lease holder {:?} is not a known node, keeping current leader", holder);
            return Ok(Action::await_change());
        }
        Err(err) => return Err(Error::KubeError(err)),
    };

    let (Some(ip), Some(hostname)) = (node_ip(&node), node_hostname(&node)) else {
        warn!("Failed to get IP/hostname from lease holder node {:?}", holder);
        return Ok(Action::await_change());
    };

    // The holder name and the node's hostname label can differ, in which case
    // the shortcut above never matches. Compare the resolved identity too so
    // a lease renewal with an unchanged leader stays a no-op.
    if ctx.state.leader_ip() == ip && ctx.state.leader_hostname() == hostname {
        debug!("Holder {:?} already resolves to the current leader", holder);
        return Ok(Action::await_change());
    }

    info!("Node {:?} ({}) is the new leader egress node", holder, ip);
    ctx.state.set_leader(&ip, &hostname);

    // Propagate immediately instead of waiting for each policy's own watch
    // stream or resync timer to notice.
    ctx.policy_trigger.fire();

    Ok(Action::await_change())
}

fn error_policy(lease: Arc<Lease>, error: &Error, _ctx: Arc<Ctx>) -> Action {
    error!("Lease reconciliation error for {:?}: {}", lease.name_any(), error);
    Action::requeue(Duration::from_secs(30))
}

/// Run the lease controller until shutdown.
pub async fn run_lease_controller(ctx: Arc<Ctx>) -> Result<()> {
    let leases: Api<Lease> = Api::namespaced(ctx.client.clone(), &ctx.options.lease_namespace);
    let config = watcher::Config::default()
        .fields(&format!("metadata.name={}", ctx.options.lease_name));
    let workers = ctx.options.workers;

    info!(
        "Starting lease controller for {}/{}",
        ctx.options.lease_namespace, ctx.options.lease_name
    );
    Controller::new(leases, config)
        .with_config(ControllerConfig::default().concurrency(workers))
        .shutdown_on_signal()
        .run(reconcile_lease, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled lease {:?}", obj.0.name),
                Err(e) => warn!("Lease reconcile failed: {:?}", e),
            }
        })
        .await;
    Ok(())
}
