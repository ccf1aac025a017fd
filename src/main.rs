//! Notify Gateway - authenticating front door for notify and webhook registration

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use notify_gateway::{
    auth::ValidatorChain,
    cli::{Cli, Command},
    config::Config,
    gateway::{Authorizer, Gateway},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Check) => run_check(&config).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

fn load_config(cli: &Cli) -> notify_gateway::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    // Apply CLI overrides
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Build the chain exactly as `serve` would, then report and exit
async fn run_check(config: &Config) -> ExitCode {
    let chain = match ValidatorChain::from_config(&config.auth).await {
        Ok(chain) => chain,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    let authorizer = match Authorizer::from_config(chain, &config.auth) {
        Ok(authorizer) => authorizer,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("✅ configuration valid");
    println!("   Header: {}", authorizer.header_name());
    println!("   Rejection status: {}", authorizer.forbidden_status());
    if authorizer.chain().is_empty() {
        println!("   Validators: none (every protected request will be rejected)");
    } else {
        println!("   Validators (in order):");
        for name in authorizer.chain().names() {
            println!("     - {name}");
        }
    }
    ExitCode::SUCCESS
}

/// Run the server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        jwt_validators = config.auth.jwt_validators.len(),
        shared_secrets = config.auth.auth_header.len(),
        "Starting Notify Gateway"
    );

    if let Err(e) = start_metrics_exporter(&config) {
        error!("Failed to start metrics exporter: {e}");
        return ExitCode::FAILURE;
    }

    // Create and run gateway
    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}

#[cfg(feature = "metrics")]
fn start_metrics_exporter(config: &Config) -> notify_gateway::Result<()> {
    let Some(listen) = config.metrics.listen.as_deref() else {
        return Ok(());
    };
    let addr: std::net::SocketAddr = listen
        .parse()
        .map_err(|e| notify_gateway::Error::config(format!("invalid metrics.listen {listen:?}: {e}")))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| notify_gateway::Error::Internal(e.to_string()))?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn start_metrics_exporter(config: &Config) -> notify_gateway::Result<()> {
    if config.metrics.listen.is_some() {
        tracing::warn!("metrics.listen is set but this build has no metrics feature");
    }
    Ok(())
}
