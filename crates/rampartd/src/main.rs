//! rampartd: the Rampart daemon.
//!
//! Single binary that wires the progressive delivery controllers to
//! their webhooks and serves the REST API:
//! - Blue-green controller (deploy / switch / rollback / monitor)
//! - Canary controller (ramp / pause / resume / complete / rollback)
//! - Health probe against each slot
//! - REST API
//!
//! # Usage
//!
//! ```text
//! rampartd serve --config /etc/rampart/rampart.toml --port 8480
//! rampartd check-config --config /etc/rampart/rampart.toml
//! ```

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rampart_probe::HealthProbe;
use rampart_rollout::{
    BlueGreenController, CanaryController, HttpMetricsSource, WebhookDeployer, WebhookRouter,
};
use tracing::{info, warn};

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "rampartd", about = "Rampart progressive delivery daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controllers and serve the API.
    Serve {
        /// Path to rampart.toml.
        #[arg(long, default_value = "rampart.toml")]
        config: PathBuf,

        /// Port to listen on; overrides `[server] port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Parse and validate a config file, then print the effective config.
    CheckConfig {
        #[arg(long, default_value = "rampart.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rampartd=debug,rampart=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve { config, port } => run_serve(&config, port).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(path)?;
    println!("{}", config.to_toml_string()?);
    info!(path = %path.display(), "config is valid");
    Ok(())
}

/// Build both controllers against the configured webhooks.
fn build_controllers(config: &DaemonConfig) -> anyhow::Result<(BlueGreenController, CanaryController)> {
    let timeout = config.hooks.timeout();
    let deployer = Arc::new(WebhookDeployer::new(&config.hooks.deploy_url, timeout)?);
    let router = Arc::new(WebhookRouter::new(
        &config.hooks.switch_url,
        &config.hooks.split_url,
        timeout,
    )?);
    let metrics = Arc::new(HttpMetricsSource::new(
        &config.canary.metrics_endpoint,
        &config.canary.metrics_path,
        timeout,
    )?);

    let blue_green = BlueGreenController::new(
        config.blue_green.clone(),
        deployer,
        router.clone(),
        Arc::new(HealthProbe::new()),
    )
    .with_state(config.slots.initial_state());
    let canary = CanaryController::new(config.canary.clone(), router, metrics);

    Ok((blue_green, canary))
}

async fn run_serve(path: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(path)?;
    info!(path = %path.display(), "Rampart daemon starting");

    let (blue_green, canary) = build_controllers(&config)?;
    let blue_green = Arc::new(blue_green);
    let canary = Arc::new(canary);

    if config.blue_green.enabled {
        blue_green.start_monitoring();
        info!(slot = ?blue_green.monitored_slot(), "blue-green monitoring started");
    } else {
        warn!("blue-green deployments disabled");
    }
    if !config.canary.enabled {
        warn!("canary deployments disabled");
    }

    let router = rampart_api::build_router(rampart_api::ApiState {
        blue_green: blue_green.clone(),
        canary: canary.clone(),
    });

    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", config.server.host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{port}", config.server.host))?;

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    blue_green.shutdown();
    canary.shutdown();

    info!("Rampart daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_serve() {
        let cli = Cli::parse_from(["rampartd", "serve", "--config", "/tmp/r.toml", "--port", "9000"]);
        match cli.command {
            Command::Serve { config, port } => {
                assert_eq!(config, PathBuf::from("/tmp/r.toml"));
                assert_eq!(port, Some(9000));
            }
            Command::CheckConfig { .. } => panic!("expected serve"),
        }
        assert!(!cli.log_json);
    }

    #[test]
    fn cli_parses_check_config_with_json_logs() {
        let cli = Cli::parse_from(["rampartd", "check-config", "--log-json"]);
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::CheckConfig { .. }));
    }

    #[tokio::test]
    async fn controllers_start_from_config() {
        let mut config = DaemonConfig::default();
        config.slots.active = rampart_rollout::Slot::Green;
        config.slots.green_version = "v3".to_string();

        let (blue_green, canary) = build_controllers(&config).unwrap();

        let state = blue_green.state();
        assert_eq!(state.active_environment, rampart_rollout::Slot::Green);
        assert_eq!(state.green_version, "v3");
        assert_eq!(canary.state().status, rampart_rollout::CanaryStatus::Idle);
    }

    #[tokio::test]
    async fn bad_hook_url_rejected() {
        let mut config = DaemonConfig::default();
        config.hooks.split_url = "not a url".to_string();
        assert!(build_controllers(&config).is_err());
    }
}
