mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use canvas_watch_core::config::Config;
use canvas_watch_gateway::{GatewayState, start_gateway};
use canvas_watch_remote::{HttpRemoteApi, RemoteApi};
use canvas_watch_tracker::{CanvasService, ClientResolver, MatchPolicy, ServiceSettings};

#[derive(Parser)]
#[command(
    name = "canvas-watch",
    about = "Track which canvas a remote client is displaying",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Track the current canvas and serve the HTTP gateway
    Serve {
        /// Port to listen on (default: 18790)
        #[arg(long)]
        port: Option<u16>,

        /// Track this client instead of the local installation
        #[arg(long)]
        client: Option<String>,
    },

    /// List clients known to the remote API
    Clients,

    /// Print the client id for an installation name
    Resolve {
        /// Installation name (default: configured name or host name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Resolve, wait for the first canvas, and print tracking status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose)?;

    match cli.command {
        Commands::Serve { port, client } => serve(config, port, client).await?,
        Commands::Clients => {
            let api = remote_api(&config)?;
            let clients = api.list_clients().await?;
            println!("{}", serde_json::to_string_pretty(&clients)?);
        }
        Commands::Resolve { name } => {
            let api = remote_api(&config)?;
            let resolver = ClientResolver::from_config(&config.tracking());
            // An explicit name behaves like an operator override.
            let (name, policy) = match name {
                Some(name) => (name, MatchPolicy::IgnoreCase),
                None => (resolver.installation_name()?, MatchPolicy::Exact),
            };
            let client_id = resolver.resolve_client_id(&api, &name, policy).await?;
            println!("{client_id}");
        }
        Commands::Status => {
            let service = build_service(&config)?;
            service.start().await?;

            let grace = config.tracking().liveness_grace();
            let tracker = service.tracker();
            let _ = tokio::time::timeout(grace, async {
                while !tracker.has_canvas() {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            })
            .await;

            println!("{}", serde_json::to_string_pretty(&service.status())?);
            service.stop().await;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("Config: {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}

fn remote_api(config: &Config) -> anyhow::Result<HttpRemoteApi> {
    let base_url = config
        .base_url()
        .context("remote.base_url is not configured")?;
    let tracking = config.tracking();
    Ok(HttpRemoteApi::new(base_url, config.auth_token())
        .with_timeouts(tracking.resolve_timeout(), tracking.request_timeout()))
}

fn build_service(config: &Config) -> anyhow::Result<CanvasService> {
    let tracking = config.tracking();
    let api = Arc::new(remote_api(config)?);
    let resolver = ClientResolver::from_config(&tracking);
    let service = CanvasService::new(api, resolver, ServiceSettings::from_config(&tracking))?;
    Ok(service)
}

async fn serve(config: Config, port: Option<u16>, client: Option<String>) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for w in &warnings {
        warn!("{w}");
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }

    let service = build_service(&config)?;
    if let Err(e) = service.start().await {
        warn!(%e, "Automatic tracking unavailable; use /api/canvas/override to pick a client");
    }

    if let Some(name) = client {
        match service.override_client(&name).await {
            Ok(outcome) => info!(client_id = %outcome.client_id, "Tracking client {name}"),
            Err(e) => warn!(%e, "Initial client override failed"),
        }
    }

    let port = port.unwrap_or_else(|| config.gateway_port());
    let bind = config.gateway_bind();
    info!("Starting canvas-watch gateway on {bind}:{port}");

    let state = Arc::new(GatewayState::new(service));
    start_gateway(state, &bind, port).await
}
