//! Network service client sidecar.
//!
//! Resolves the pod identity, requests the configured network services from
//! the local mesh manager with bounded retries, then holds the connections
//! until a termination signal arrives.

use clap::Parser;
use nsc_client::{
    ClientIdentity, GrpcConnectionRequester, IdentityResolver, LifecycleController, LifecyclePlan,
    MechanismType, NetworkServiceSelector, RetryPolicy, SystemIdentitySource,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod signals;

use config::ClientConfig;
use logging::{SidecarLogFormatter, TracingHandle};
use signals::OsSignals;

/// Network service client sidecar
#[derive(Parser, Debug)]
#[command(name = "nsc-sidecar", version, about = "Requests and holds mesh network service connections")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Control-plane endpoint, e.g. http://127.0.0.1:5001
    #[arg(long)]
    nsm_server: Option<String>,

    /// Network service selector, `service[/interface][?key=value&...]` (repeatable)
    #[arg(long = "network-service")]
    network_service: Vec<String>,

    /// Mechanism type (kernel, memif)
    #[arg(long)]
    mechanism: Option<MechanismType>,

    /// Attempts per network service
    #[arg(long)]
    retry_attempts: Option<u32>,

    /// Delay between attempts, e.g. 5s
    #[arg(long)]
    retry_delay: Option<humantime::Duration>,

    /// Timeout for a single request, e.g. 15s
    #[arg(long)]
    request_timeout: Option<humantime::Duration>,

    /// Pod name (resolved from the hostname when unset)
    #[arg(long)]
    pod_name: Option<String>,

    /// Namespace (resolved from the deployment when unset)
    #[arg(long)]
    namespace: Option<String>,
}

impl Args {
    /// Apply explicitly passed flags on top of file/environment configuration
    fn apply_to(&self, config: &mut ClientConfig) -> anyhow::Result<()> {
        if let Some(nsm_server) = &self.nsm_server {
            config.nsm_server = nsm_server.clone();
        }
        if !self.network_service.is_empty() {
            config.selectors = self
                .network_service
                .iter()
                .map(|s| NetworkServiceSelector::parse(s))
                .collect::<Result<_, _>>()?;
        }
        if let Some(mechanism) = self.mechanism {
            config.mechanism = mechanism;
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry_attempts = attempts;
        }
        if let Some(delay) = &self.retry_delay {
            config.retry_delay = Duration::from(delay.clone());
        }
        if let Some(timeout) = &self.request_timeout {
            config.request_timeout = Duration::from(timeout.clone());
        }
        if let Some(pod_name) = &self.pod_name {
            config.pod_name = pod_name.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        Ok(())
    }
}

fn load_plan(args: &Args) -> anyhow::Result<(ClientConfig, LifecyclePlan)> {
    let mut config = ClientConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config)?;

    let plan = LifecyclePlan {
        identity: ClientIdentity::new(config.pod_name.clone(), config.namespace.clone()),
        selectors: config.selectors(),
        mechanism: config.mechanism,
        interface_prefix: config.interface_prefix.clone(),
        policy: RetryPolicy::new(config.retry_attempts, config.retry_delay)?,
    };
    Ok((config, plan))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let env_filter = match EnvFilter::try_new(format!(
        "info,nsc_sidecar={level},nsc_client={level}",
        level = args.log_level
    )) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid log level {:?}: {}", args.log_level, e);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(SidecarLogFormatter::new("nsc"))
        .init();

    info!("Starting network service client v{}", env!("CARGO_PKG_VERSION"));

    let (config, plan) = match load_plan(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("nsc client: invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let signals = match OsSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!("nsc client: failed to install signal handlers: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tracing_handle = TracingHandle::open("nsc");
    let mut controller = LifecycleController::new(
        IdentityResolver::new(SystemIdentitySource),
        signals,
        tracing_handle,
    );

    let nsm_server = config.nsm_server.clone();
    let request_timeout = config.request_timeout;
    let result = controller
        .run(plan, |_| GrpcConnectionRequester::connect(&nsm_server, request_timeout))
        .await;

    match result {
        Ok(()) => {
            info!("Network service client stopped");
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::FAILURE,
    }
}
