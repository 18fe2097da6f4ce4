//! vmgate - Bearer-token authorization gateway
//!
//! Discovers the identity provider, then serves VM lifecycle operations to
//! callers holding the required role.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vmgate::auth::{discovery, ClaimExtractor, TokenVerifier};
use vmgate::authz::AccessPolicy;
use vmgate::config::Config;
use vmgate::gate::RequestGate;
use vmgate::metrics::server::{MetricsServer, MetricsServerConfig};
use vmgate::platform::InMemoryPlatform;
use vmgate::server::{AppState, Server};

/// vmgate - Bearer-token authorization gateway for VM lifecycle operations
#[derive(Parser, Debug)]
#[command(name = "vmgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A missing .env is fine; variables may come from the environment itself
    let dotenv = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(args.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting vmgate v{}", env!("CARGO_PKG_VERSION"));
    if let Ok(path) = dotenv {
        info!("Loaded environment from {:?}", path);
    }

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    info!("Loaded configuration from {:?}", args.config);

    let client = discovery::http_client(config.oidc.discovery_timeout())?;
    let metadata = discovery::discover(&client, &config.oidc.issuer_url, &config.oidc.client_id)
        .await
        .context("Identity provider discovery failed")?;

    let verifier = Arc::new(TokenVerifier::new(metadata).with_leeway(config.oidc.leeway_seconds));
    if let Some(interval) = config.oidc.jwks_refresh_interval() {
        info!(interval_secs = interval.as_secs(), "Signing key refresh enabled");
        // detached; runs for the life of the process
        let _refresh = verifier.spawn_refresh(client.clone(), interval);
    }

    let mut metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::new(MetricsServerConfig::from(&config.metrics))
            .with_readiness(Arc::clone(&verifier));
        server.start().await?;
        Some(server)
    } else {
        None
    };

    if config.platform.templates.is_empty() {
        warn!("No VM templates configured; create requests will fail");
    }

    let state = AppState {
        gate: RequestGate::new(verifier, ClaimExtractor::new(&config.oidc.roles_claim)),
        policy: AccessPolicy::from_config(&config.policy),
        platform: Arc::new(InMemoryPlatform::with_templates(
            config.platform.templates.iter().cloned(),
        )),
    };

    let server = Server::bind(&config.server.address, state).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    if let Some(server) = metrics_server.as_mut() {
        server.shutdown().await;
    }

    info!("vmgate stopped");
    Ok(())
}
