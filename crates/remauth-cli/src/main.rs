//! remauth - log in by scanning a QR code with an already signed-in device.
//!
//! Prints the login URL (render it as a QR code with any tool), waits for a
//! remote device to approve or deny, and optionally writes the recovered
//! token to a file.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use remauth::{AuthStatus, ClientConfig, RemoteAuthClient, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "remauth")]
#[command(about = "QR code login over the remote auth gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a login session and wait for approval
    Login {
        /// Path to config file (defaults are used when omitted)
        #[arg(short, long, env = "REMAUTH_CONFIG")]
        config: Option<PathBuf>,

        /// Gateway WebSocket URL, overriding the config file
        #[arg(long)]
        gateway: Option<String>,

        /// Fail instead of reconnecting when the connection drops or the code expires
        #[arg(long)]
        no_reconnect: bool,

        /// Write the recovered token to this file
        #[arg(long)]
        token_out: Option<PathBuf>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "remauth.json")]
        output: PathBuf,

        /// Gateway URL
        #[arg(long, default_value = remauth::config::DEFAULT_GATEWAY_URL)]
        gateway: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("remauth=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Login {
            config,
            gateway,
            no_reconnect,
            token_out,
        } => {
            let config = load_config(config.as_deref(), gateway)?;
            login(config, !no_reconnect, token_out).await?;
        }

        Commands::InitConfig { output, gateway } => {
            init_config(&output, gateway)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, gateway: Option<String>) -> anyhow::Result<ClientConfig> {
    let mut config = match path {
        Some(path) => {
            info!(config = %path.display(), "loading config");
            ClientConfig::from_file(path)?
        }
        None => ClientConfig::default(),
    };

    if let Some(gateway) = gateway {
        config.gateway_url = gateway;
    }
    config.validate()?;
    Ok(config)
}

async fn login(
    config: ClientConfig,
    reconnect: bool,
    token_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!(gateway = %config.gateway_url, reconnect, "starting remote login");

    let mut client = RemoteAuthClient::new(config);
    if let Some(path) = token_out {
        client = client.with_login_hook(move |token: String| {
            let path = path.clone();
            async move {
                match write_token(&path, &token).await {
                    Ok(()) => info!(path = %path.display(), "token written"),
                    Err(e) => error!(path = %path.display(), error = %e, "failed to write token"),
                }
            }
        });
    }

    let mut events = client.subscribe();
    client.connect(reconnect).await?;

    let outcome = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Err(anyhow::anyhow!("login interrupted"));
            }
        };

        match event {
            Ok(event) => {
                if let Some(outcome) = report(event) {
                    break outcome;
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "dropped session events"),
            Err(RecvError::Closed) => break Err(anyhow::anyhow!("session ended unexpectedly")),
        }
    };

    client.disconnect().await;
    outcome
}

/// Print a session event. Returns the login outcome once the event is
/// terminal.
fn report(event: SessionEvent) -> Option<anyhow::Result<()>> {
    let terminal = event.is_terminal();
    let outcome = match event {
        SessionEvent::Ready(login) => {
            println!("Scan to log in: {login}");
            println!("Valid for {}s", login.remaining().as_secs());
            Ok(())
        }
        SessionEvent::Scanned(user) => {
            println!("Scanned by {}", user.tag());
            Ok(())
        }
        SessionEvent::Finished(AuthStatus::Success) => {
            println!("Login approved");
            Ok(())
        }
        SessionEvent::Finished(AuthStatus::Cancelled) => {
            println!("Login cancelled");
            Ok(())
        }
        SessionEvent::Closed => Err(anyhow::anyhow!(
            "gateway closed the session before the login concluded"
        )),
        SessionEvent::Failed(err) => Err(err.into()),
        SessionEvent::Reconnecting { attempt, delay } => {
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            Ok(())
        }
        SessionEvent::Connecting { .. } | SessionEvent::Disconnected { .. } => Ok(()),
    };
    terminal.then_some(outcome)
}

async fn write_token(path: &Path, token: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, token).await
}

fn init_config(output: &Path, gateway: String) -> anyhow::Result<()> {
    let config = ClientConfig {
        gateway_url: gateway,
        ..ClientConfig::default()
    };
    config.validate()?;
    config.save(output)?;

    println!("Config written to: {}", output.display());
    Ok(())
}
