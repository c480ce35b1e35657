//! Egress policy controller
//!
//! The authoritative corrective step: compares each managed policy's egress
//! assignment against the store's leader fact and patches it when they
//! differ. Policies are pinned to the leader — an unavailable leader leaves
//! the previous assignment in place until the lease moves, which avoids
//! flapping or ever blanking a policy while no gateway node qualifies.

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Config as ControllerConfig, Controller},
        watcher,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{CiliumEgressGatewayPolicy, LabelSelector, HOSTNAME_LABEL};
use crate::error::Result;

use super::retry::update_with_conflict_retry;
use super::{Ctx, Options};

/// Periodic re-check interval for managed policies, catching drift from
/// external edits that arrive between watch events.
pub const DEFAULT_RESYNC_SECS: u64 = 3 * 60;

/// Field changes required to bring a policy in line with the leader.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Correction {
    pub egress_ip: Option<String>,
    pub hostname: Option<String>,
}

impl Correction {
    pub fn is_empty(&self) -> bool {
        self.egress_ip.is_none() && self.hostname.is_none()
    }
}

/// Diff the policy's current assignment against the leader identity. An
/// empty leader field produces no correction for that half: assignments are
/// only ever moved to a fully-known node, never cleared.
pub fn compute_correction(
    policy: &CiliumEgressGatewayPolicy,
    leader_ip: &str,
    leader_hostname: &str,
    options: &Options,
) -> Correction {
    let mut correction = Correction::default();
    if options.set_egress_ip && !leader_ip.is_empty() && policy.egress_ip() != leader_ip {
        correction.egress_ip = Some(leader_ip.to_string());
    }
    if options.set_node_selector
        && !leader_hostname.is_empty()
        && policy.selector_hostname() != leader_hostname
    {
        correction.hostname = Some(leader_hostname.to_string());
    }
    correction
}

fn apply_correction(policy: &mut CiliumEgressGatewayPolicy, correction: &Correction) {
    let Some(gateway) = policy.spec.egress_gateway.as_mut() else {
        // The gateway spec vanished between read and write; fabricating one
        // is never our call.
        return;
    };
    if let Some(ip) = &correction.egress_ip {
        gateway.egress_ip = Some(ip.clone());
    }
    if let Some(hostname) = &correction.hostname {
        gateway
            .node_selector
            .get_or_insert_with(LabelSelector::default)
            .match_labels
            .get_or_insert_with(Default::default)
            .insert(HOSTNAME_LABEL.to_string(), hostname.clone());
    }
}

#[instrument(skip(policy, ctx), fields(policy = %policy.name_any()))]
pub(crate) async fn reconcile_policy(
    policy: Arc<CiliumEgressGatewayPolicy>,
    ctx: Arc<Ctx>,
) -> Result<Action> {
    ctx.barrier.wait().await;

    if policy.metadata.deletion_timestamp.is_some() || !policy.is_managed() {
        return Ok(Action::await_change());
    }
    if policy.spec.egress_gateway.is_none() {
        debug!("Managed policy {:?} has no egressGateway spec, skipping", policy.name_any());
        return Ok(Action::requeue(ctx.options.resync));
    }

    let leader_ip = ctx.state.leader_ip();
    let leader_hostname = ctx.state.leader_hostname();
    let correction = compute_correction(&policy, &leader_ip, &leader_hostname, &ctx.options);
    if correction.is_empty() {
        debug!(
            "Policy {:?} egressIP {:?} hostname {:?} is up to date",
            policy.name_any(),
            policy.egress_ip(),
            policy.selector_hostname()
        );
        return Ok(Action::requeue(ctx.options.resync));
    }

    let name = policy.name_any();
    let api: Api<CiliumEgressGatewayPolicy> = Api::all(ctx.client.clone());
    match update_with_conflict_retry(&api, "CiliumEgressGatewayPolicy", &name, |fresh| {
        apply_correction(fresh, &correction)
    })
    .await
    {
        Ok(_) => {
            info!(
                "Updated policy {:?}: egressIP -> {:?}, hostname -> {:?}",
                name, correction.egress_ip, correction.hostname
            );
        }
        Err(err) if err.is_not_found() => {
            // Vanished between the event and the correction.
            debug!("Policy {:?} no longer exists, skipping", name);
            return Ok(Action::await_change());
        }
        Err(err) => return Err(err),
    }

    Ok(Action::requeue(ctx.options.resync))
}

fn error_policy(
    policy: Arc<CiliumEgressGatewayPolicy>,
    error: &crate::error::Error,
    _ctx: Arc<Ctx>,
) -> Action {
    error!("Policy reconciliation error for {:?}: {}", policy.name_any(), error);
    let retry = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };
    Action::requeue(retry)
}

/// Run the policy controller until shutdown. `trigger_events` is the
/// receiving end of the cross-controller trigger: each item requeues every
/// watched policy immediately.
pub async fn run_policy_controller(
    ctx: Arc<Ctx>,
    trigger_events: mpsc::Receiver<()>,
) -> Result<()> {
    let policies: Api<CiliumEgressGatewayPolicy> = Api::all(ctx.client.clone());
    let workers = ctx.options.workers;

    info!("Starting egress policy controller");
    Controller::new(policies, watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(workers))
        .reconcile_all_on(trigger_events)
        .shutdown_on_signal()
        .run(reconcile_policy, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled policy {:?}", obj.0.name),
                Err(e) => warn!("Policy reconcile failed: {:?}", e),
            }
        })
        .await;
    Ok(())
}
