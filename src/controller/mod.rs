//! Controllers converging egress policies on the current leader node
//!
//! Three cooperating controllers share one `GatewayState`:
//! - `node` tracks which gateway-eligible nodes are ready,
//! - `lease` resolves the kube-vip lease holder to the leader identity,
//! - `policy` patches managed `CiliumEgressGatewayPolicy` objects so their
//!   egress IP and node selector follow the leader.
//!
//! The node and lease controllers never call into policy correction
//! directly; they fire a non-blocking trigger that requeues every watched
//! policy. All policy writes go through the versioned compare-and-update
//! primitive in `retry`.

mod barrier;
mod lease;
mod node;
mod policy;
mod retry;

#[cfg(test)]
mod lease_test;

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use kube::Client;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::gateway::GatewayState;

pub use barrier::StartupBarrier;
pub use lease::{DEFAULT_LEASE_NAME, DEFAULT_LEASE_NAMESPACE};
pub use node::init_store;
pub use policy::DEFAULT_RESYNC_SECS;
pub use retry::update_with_conflict_retry;

/// Runtime options resolved from the CLI.
#[derive(Clone, Debug)]
pub struct Options {
    /// Reconcile worker concurrency per controller.
    pub workers: u16,
    /// Identity of the externally-managed leadership lease.
    pub lease_name: String,
    pub lease_namespace: String,
    /// Periodic re-check interval for managed policies.
    pub resync: Duration,
    /// Whether to manage `egressGateway.egressIP`.
    pub set_egress_ip: bool,
    /// Whether to manage the node selector hostname label.
    pub set_node_selector: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: 10,
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            lease_namespace: DEFAULT_LEASE_NAMESPACE.to_string(),
            resync: Duration::from_secs(DEFAULT_RESYNC_SECS),
            set_egress_ip: true,
            set_node_selector: true,
        }
    }
}

/// Fire-and-forget trigger that requeues every watched policy. Backed by a
/// single-slot channel: if a requeue-all is already pending, firing again is
/// a no-op, which also keeps the sender from ever blocking a watch handler.
#[derive(Clone, Debug)]
pub struct PolicyTrigger(mpsc::Sender<()>);

impl PolicyTrigger {
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self(tx), rx)
    }

    pub fn fire(&self) {
        let _ = self.0.clone().try_send(());
    }
}

/// Shared state handed to every reconcile call.
pub struct Ctx {
    pub client: Client,
    pub state: GatewayState,
    pub barrier: StartupBarrier,
    pub policy_trigger: PolicyTrigger,
    pub options: Options,
}

impl Ctx {
    /// Build the shared context together with the receiving end of the
    /// policy trigger, which `run` wires into the policy controller.
    pub fn new(client: Client, options: Options) -> (Self, mpsc::Receiver<()>) {
        let (policy_trigger, policy_events) = PolicyTrigger::channel();
        let ctx = Self {
            client,
            state: GatewayState::new(),
            barrier: StartupBarrier::new(),
            policy_trigger,
            options,
        };
        (ctx, policy_events)
    }
}

/// Populate the store from a bulk listing, release the startup barrier, then
/// run the three controllers until shutdown.
pub async fn run(ctx: Arc<Ctx>, policy_events: mpsc::Receiver<()>) -> Result<()> {
    node::init_store(&ctx).await?;
    debug!(
        "Initial available gateway nodes: {:?}",
        ctx.state.available_nodes()
    );
    ctx.barrier.release();
    info!("Initial node listing complete, starting controllers");

    let node = tokio::spawn(node::run_node_controller(Arc::clone(&ctx)));
    let lease = tokio::spawn(lease::run_lease_controller(Arc::clone(&ctx)));
    let policy = tokio::spawn(policy::run_policy_controller(
        Arc::clone(&ctx),
        policy_events,
    ));

    let (node, lease, policy) = tokio::try_join!(node, lease, policy)
        .map_err(|e| Error::ControllerError(format!("controller task panicked: {e}")))?;
    node?;
    lease?;
    policy?;
    Ok(())
}
