//! floed, the Floe node daemon.
//!
//! Bootstraps one node (identity, discovery, starter cloud) and then runs
//! the discovery agent until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! floed --name MyCloud --port 54321
//! floed --flatfile nodes.txt --network 10.1.2.0/24
//! ```
//!
//! Exit status: 0 on help, version or clean shutdown; otherwise the code
//! from `BootError::exit_code` (2 config, 3 network, 4 discovery,
//! 5 consistency fault, 1 anything else).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use floe_cluster::{BootError, Bootstrap, DiscoveryAgent, Node};
use floe_core::BuildVersion;
use floe_core::config::processor_count;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod cli;

use cli::Cli;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,floed=debug,floe_cluster=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    // Always log the build, whether asked for or not.
    log_version(&BuildVersion::current());

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(BootError::from(e).exit_code());
        }
    };

    let node = match Bootstrap::new(&config).run() {
        Ok(Some(node)) => Arc::new(node),
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, code = e.exit_code(), "bootstrap failed");
            return ExitCode::from(e.exit_code());
        }
    };
    info!(
        identity = %node.identity(),
        ice_root = %node.ice_root().display(),
        nthreads = node.nthreads(),
        "node started"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(node.nthreads())
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let interval = Duration::from_secs(cli.discovery_interval.max(1));
    match runtime.block_on(serve(node, interval)) {
        Ok(()) => {
            info!("floed stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "node failed");
            let code = e.downcast_ref::<BootError>().map_or(1, BootError::exit_code);
            ExitCode::from(code)
        }
    }
}

/// Run the discovery agent until Ctrl-C or until the agent fails.
async fn serve(node: Arc<Node>, interval: Duration) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agent = DiscoveryAgent::new(Arc::clone(&node)).with_interval(interval);
    let mut agent_handle = tokio::spawn(async move { agent.run(shutdown_rx).await });

    info!(identity = %node.identity(), cloud = node.cloud_name(), "node ready");

    tokio::select! {
        result = &mut agent_handle => {
            // The agent only returns on its own when something broke.
            result??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for ctrl-c; shutting down");
            }
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    agent_handle.await??;
    Ok(())
}

fn log_version(version: &BuildVersion) {
    info!("----- floe node starting -----");
    info!(
        branch = version.branch,
        commit = version.commit,
        describe = version.describe,
        version = version.project_version,
        "build"
    );
    if version.semver().is_none() {
        warn!(version = version.project_version, "project version is not valid semver");
    }
    info!(
        compiled_by = version.compiled_by,
        compiled_on = version.compiled_on,
        checksum = %version.checksum_hex(),
        "build origin"
    );
    info!(
        processors = processor_count(),
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        "host"
    );
}
