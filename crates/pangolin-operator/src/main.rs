//! Pangolin Operator - exposes cluster Services through Pangolin tunnels

mod startup;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::Client;

use pangolin_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use pangolin_common::DEFAULT_NEWT_IMAGE;
use pangolin_controller::runner::DEFAULT_WORKERS;
use pangolin_controller::{Context, ControllerRegistry, Runner, RunnerConfig};

/// Pangolin operator - reconciles organizations, tunnels, resources and
/// service bindings against a Pangolin control plane
#[derive(Parser, Debug)]
#[command(name = "pangolin-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Watch a single namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Concurrent reconciles per kind
    #[arg(long, env = "PANGOLIN_WORKERS", default_value_t = DEFAULT_WORKERS, global = true)]
    workers: usize,

    /// Log output format (json or text)
    #[arg(long, env = "LOG_FORMAT", default_value = "json", global = true)]
    log_format: LogFormat,

    /// Do not install CRDs on startup
    #[arg(long, global = true)]
    skip_crd_install: bool,

    /// Default image for managed Newt deployments
    #[arg(long, env = "NEWT_IMAGE", default_value = DEFAULT_NEWT_IMAGE, global = true)]
    newt_image: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", startup::render_crds()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli).await,
    }
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {}", e))?;

    if cli.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        startup::ensure_crds(&client).await?;
    }

    let ctx = Arc::new(
        Context::builder(client.clone())
            .newt_image(cli.newt_image)
            .build(),
    );
    let config = RunnerConfig {
        namespace: cli.namespace,
        workers: cli.workers,
    };

    tracing::info!("Starting Pangolin controllers");
    Runner::new(client, ctx, ControllerRegistry::pangolin(), config)
        .run(shutdown_signal())
        .await?;
    tracing::info!("Pangolin operator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
