use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wsprobe::config::ProbeMode;
use wsprobe::{AppError, Handshake, ProbeClient, Settings, WebSocketServer};

#[derive(Parser, Debug)]
#[command(name = "wsprobe", about = "WebSocket session server and reconnecting probe")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept probe connections and answer session starts
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Probe a server until interrupted
    Probe {
        #[arg(long)]
        url: Option<String>,
        /// Send the legacy plain-text probe instead of a session start
        #[arg(long)]
        text: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::new().context("failed to load configuration")?;
    info!("Configuration loaded ({})", settings.environment);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
            }
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }

            let listener = TcpListener::bind(settings.listen_addr())
                .await
                .with_context(|| format!("failed to bind {}", settings.listen_addr()))?;
            let server = Arc::new(WebSocketServer::new(Handshake::from_config(&settings.session)));
            server.serve(listener, cancel).await;
        }
        Command::Probe { url, text } => {
            if let Some(url) = url {
                settings.client.url = url;
            }
            if text {
                settings.probe.mode = ProbeMode::Text;
            }

            let client = ProbeClient::from_settings(&settings).context("invalid probe settings")?;
            info!(
                "Probing {} every {:?}",
                client.target(),
                settings.client.retry_interval()
            );
            match client.run(cancel).await {
                Err(AppError::Cancelled) => info!("Probe stopped"),
                Err(e) => warn!("Probe ended: {}", e),
                Ok(never) => match never {},
            }
        }
    }

    Ok(())
}
