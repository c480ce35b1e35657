use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use egress_gateway_operator::controller::{
    self, Ctx, Options, DEFAULT_LEASE_NAME, DEFAULT_LEASE_NAMESPACE, DEFAULT_RESYNC_SECS,
};
use egress_gateway_operator::Error;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of reconcile workers per controller (1-50)
    #[arg(long, env = "WORKERS", default_value_t = 10)]
    workers: u16,

    /// Name of the externally-managed leadership lease
    #[arg(long, env = "LEASE_NAME", default_value = DEFAULT_LEASE_NAME)]
    lease_name: String,

    /// Namespace of the leadership lease
    #[arg(long, env = "LEASE_NAMESPACE", default_value = DEFAULT_LEASE_NAMESPACE)]
    lease_namespace: String,

    /// Periodic policy re-check interval in seconds
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = DEFAULT_RESYNC_SECS)]
    resync_interval_secs: u64,

    /// Manage the egressGateway.egressIP field of opted-in policies
    #[arg(long, env = "SET_EGRESS_IP", default_value_t = true, action = ArgAction::Set)]
    set_egress_ip: bool,

    /// Manage the node selector hostname label of opted-in policies
    #[arg(long, env = "SET_NODE_SELECTOR", default_value_t = true, action = ArgAction::Set)]
    set_node_selector: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!(
                "egress-gateway-operator v{}",
                env!("CARGO_PKG_VERSION")
            );
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    info!(
        "Starting egress-gateway-operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let workers = if (1..=50).contains(&args.workers) {
        args.workers
    } else {
        warn!("Invalid workers {}, should be 1-50, using default 10", args.workers);
        10
    };

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let options = Options {
        workers,
        lease_name: args.lease_name,
        lease_namespace: args.lease_namespace,
        resync: Duration::from_secs(args.resync_interval_secs),
        set_egress_ip: args.set_egress_ip,
        set_node_selector: args.set_node_selector,
    };
    info!(
        "Watching lease {}/{}, resync every {:?}",
        options.lease_namespace, options.lease_name, options.resync
    );

    let (ctx, policy_events) = Ctx::new(client, options);
    controller::run(Arc::new(ctx), policy_events).await
}
