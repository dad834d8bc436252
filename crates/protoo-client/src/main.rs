//! protoo -- command-line signaling client.
//!
//! Usage:
//!   protoo request getRouterRtpCapabilities             # Send a request, print the response
//!   protoo request join --data '{"displayName":"bob"}'  # Request with payload
//!   protoo notify leave                                 # Fire-and-forget notification
//!   protoo --url wss://host:4443/?roomId=r listen       # Log inbound traffic until Ctrl-C

use std::time::Duration;

use clap::{Parser, Subcommand};
use protoo_client::config::ClientConfig;
use protoo_client::{expand_tilde, CloseCause, Peer, PeerHandlers, Reply};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "protoo", about = "protoo signaling client")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.protoo/config.toml")]
    config: String,

    /// Server URL (overrides [server] url)
    #[arg(short, long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a request and print the response
    Request {
        method: String,
        /// JSON payload
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Send a notification
    Notify {
        method: String,
        /// JSON payload
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Log inbound requests and notifications until Ctrl-C
    Listen,
}

enum Lifecycle {
    Open,
    Closed(CloseCause),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "protoo_client=info,protoo_connection=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = ClientConfig::load_or_default(&expand_tilde(&cli.config))?;
    let url = cli.url.unwrap_or(cfg.server.url);

    let (tx, mut lifecycle) = mpsc::unbounded_channel();
    let mut handlers = lifecycle_handlers(tx);
    if matches!(cli.command, Commands::Listen) {
        handlers = listen_handlers(handlers);
    }

    let peer = Peer::new(url, cfg.retry, handlers);
    peer.open()?;
    wait_open(&mut lifecycle).await?;

    let mut closed = false;
    let outcome = match cli.command {
        Commands::Request { method, data } => run_request(&peer, &method, data).await,
        Commands::Notify { method, data } => run_notify(&peer, &method, data),
        Commands::Listen => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => Ok(()),
                cause = wait_closed(&mut lifecycle) => {
                    closed = true;
                    Err(anyhow::anyhow!("connection closed: {}", cause.as_str()))
                }
            }
        }
    };

    if !closed {
        peer.close();
        if tokio::time::timeout(Duration::from_secs(10), wait_closed(&mut lifecycle))
            .await
            .is_err()
        {
            tracing::warn!("close handshake did not finish");
        }
    }
    outcome
}

fn lifecycle_handlers(tx: mpsc::UnboundedSender<Lifecycle>) -> PeerHandlers {
    let on_close = tx.clone();
    PeerHandlers::new()
        .on_open(move || {
            let _ = tx.send(Lifecycle::Open);
        })
        .on_close(move |cause| {
            let _ = on_close.send(Lifecycle::Closed(cause));
        })
        .on_failed(|attempt, error| {
            tracing::warn!(attempt, %error, "connect attempt failed");
        })
        .on_disconnected(|| tracing::warn!("connection lost, reconnecting"))
}

fn listen_handlers(handlers: PeerHandlers) -> PeerHandlers {
    handlers
        .on_request(|request| async move {
            let data: Value = request.data()?;
            tracing::info!(id = request.id, method = %request.method, %data, "request");
            Ok::<_, anyhow::Error>(Reply::empty())
        })
        .on_notification(|notification| {
            let data: Value = notification.data()?;
            tracing::info!(method = %notification.method, %data, "notification");
            Ok(())
        })
}

async fn wait_open(lifecycle: &mut mpsc::UnboundedReceiver<Lifecycle>) -> anyhow::Result<()> {
    match lifecycle.recv().await {
        Some(Lifecycle::Open) => Ok(()),
        Some(Lifecycle::Closed(cause)) => anyhow::bail!("could not connect: {}", cause.as_str()),
        None => anyhow::bail!("peer session ended"),
    }
}

async fn wait_closed(lifecycle: &mut mpsc::UnboundedReceiver<Lifecycle>) -> CloseCause {
    while let Some(event) = lifecycle.recv().await {
        if let Lifecycle::Closed(cause) = event {
            return cause;
        }
    }
    CloseCause::Cancelled
}

fn parse_data(raw: Option<String>) -> anyhow::Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| anyhow::anyhow!("--data is not valid JSON: {e}"))
}

async fn run_request(peer: &Peer, method: &str, data: Option<String>) -> anyhow::Result<()> {
    let response = match parse_data(data)? {
        Some(data) => peer.request_with(method, &data).await?,
        None => peer.request(method).await?,
    };
    if !response.is_ok() {
        anyhow::bail!(
            "request rejected: {} {}",
            response.error_code().unwrap_or_default(),
            response.error_reason().unwrap_or("")
        );
    }
    let data: Value = response.data()?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

fn run_notify(peer: &Peer, method: &str, data: Option<String>) -> anyhow::Result<()> {
    match parse_data(data)? {
        Some(data) => peer.notify_with(method, &data)?,
        None => peer.notify(method)?,
    }
    println!("sent {method}");
    Ok(())
}
