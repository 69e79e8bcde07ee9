//! webhook-certs - keeps webhook serving certificates and CA bundles fresh

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::Client;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webhook_certs_operator::certs::{certs_mounted, check_mounted};
use webhook_certs_operator::config::ControllerArgs;
use webhook_certs_operator::controller_runner::build_controllers;
use webhook_certs_operator::kube_client::{KubeClient, KubeClientImpl};
use webhook_certs_pki::RotationEngine;

/// Webhook certificate rotator - issues and rotates webhook serving certificates
#[derive(Parser, Debug)]
#[command(name = "webhook-certs", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches the configured targets, rotates the serving certificates in
    /// the selected secret and injects the CA bundle into every target.
    Controller,

    /// Check the certificates mounted in the cert directory and exit
    ///
    /// Exits non-zero if they are missing or due for rotation.
    Check {
        /// DNS name the leaf certificate must be valid for
        #[arg(long)]
        hostname: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // kube's rustls client needs a process-wide crypto provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check { hostname }) => run_check(&cli.args, &hostname),
        Some(Commands::Controller) | None => run_controller(cli.args).await,
    }
}

/// Check mounted certificates the way the next rotation pass would
fn run_check(args: &ControllerArgs, hostname: &str) -> anyhow::Result<ExitCode> {
    args.validate_durations()?;

    let engine = RotationEngine::new(args.rotation_config());
    let check = check_mounted(&args.cert_dir, &engine, hostname, OffsetDateTime::now_utc())
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to read certificates from {}: {}",
                args.cert_dir.display(),
                e
            )
        })?;

    tracing::info!(
        cert_dir = %args.cert_dir.display(),
        hostname = %hostname,
        mounted = check.mounted,
        ca_valid = check.ca_valid,
        leaf_valid = check.leaf_valid,
        "checked mounted certificates"
    );

    if check.healthy() {
        println!("certificates in {} are valid for {}", args.cert_dir.display(), hostname);
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "certificates in {} need rotation (mounted: {}, CA valid: {}, leaf valid: {})",
            args.cert_dir.display(),
            check.mounted,
            check.ca_valid,
            check.leaf_valid
        );
        Ok(ExitCode::FAILURE)
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<ExitCode> {
    args.validate()?;

    if certs_mounted(&args.cert_dir) {
        tracing::info!(cert_dir = %args.cert_dir.display(), "serving certificates are mounted");
    } else {
        tracing::warn!(
            cert_dir = %args.cert_dir.display(),
            "serving certificates not mounted yet, waiting for the secret to be populated"
        );
    }

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let kube: Arc<dyn KubeClient> = Arc::new(KubeClientImpl::new(client.clone()));
    let restart = CancellationToken::new();

    tracing::info!("Starting webhook certificate controllers:");
    let controllers = build_controllers(client, kube, &args, restart.clone())?;

    tokio::select! {
        _ = futures::future::join_all(controllers) => {
            tracing::info!("Controllers stopped");
        }
        _ = restart.cancelled() => {
            tracing::info!("Certificates refreshed, exiting so the pod restarts with the new secret");
        }
    }

    tracing::info!("webhook-certs shutting down");
    Ok(ExitCode::SUCCESS)
}
