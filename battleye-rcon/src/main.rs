//! Entry point for `rcon`.
//!
//! Logs in to a BattlEye RCon server, runs the commands given on the command
//! line and prints their output.  With `--listen` it then stays connected,
//! printing server messages until Ctrl-C.  All protocol work is delegated to
//! the library; `main.rs` owns only process setup (logging, signal handling,
//! argument parsing).

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::Notify;

use battleye_rcon::session::DEFAULT_HEARTBEAT_INTERVAL;
use battleye_rcon::{ConnectionListener, MessageListener, ResendConfig, Session};

/// BattlEye RCon client.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Server RCon address (e.g. 127.0.0.1:2306).
    address: String,

    /// RCon password from the server's BEServer.cfg.
    #[arg(short, long)]
    password: String,

    /// Commands to run after logging in, e.g. "players".
    commands: Vec<String>,

    /// Stay connected and print server messages until Ctrl-C.
    #[arg(short, long)]
    listen: bool,

    /// Milliseconds between resends of an unanswered request.
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    resend_interval_ms: u64,

    /// Resends before the connection is declared lost.
    #[arg(long, default_value_t = 4)]
    max_resends: u32,

    /// Seconds between heartbeats in listen mode.
    #[arg(
        long,
        default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    heartbeat_secs: u64,
}

/// Prints what the server pushes and when the connection drops.
#[derive(Default)]
struct Printer {
    closed: Notify,
}

impl MessageListener for Printer {
    fn on_message_received(&self, message: &str) {
        println!("{message}");
    }
}

impl ConnectionListener for Printer {
    fn on_disconnect(&self, reason: &str) {
        eprintln!("{reason}");
        self.closed.notify_one();
    }
}

fn resolve(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .with_context(|| format!("invalid server address {address:?}"))?
        .next()
        .with_context(|| format!("{address:?} did not resolve"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let remote = resolve(&cli.address)?;
    let config = ResendConfig {
        resend_interval: Duration::from_millis(cli.resend_interval_ms),
        max_resends: cli.max_resends,
        ..ResendConfig::default()
    };

    log::info!("Connecting to {remote}");
    let session = Session::connect(remote, config).await?;
    let printer = Arc::new(Printer::default());
    session.client().message_listeners().add(printer.clone());
    session.client().connection_listeners().add(printer.clone());

    if !session.login(&cli.password).await? {
        session.disconnect(Some("Login rejected.")).await;
        bail!("server rejected the password");
    }

    for command in &cli.commands {
        let output = session.command(command).await?;
        println!("{}", output.trim_end());
    }

    if cli.listen {
        session.enable_heartbeat(Duration::from_secs(cli.heartbeat_secs));
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = printer.closed.notified() => return Ok(()),
        }
    } else if let Err(e) = session.logout().await {
        log::warn!("logout failed: {e}");
    }

    session.disconnect(None).await;
    Ok(())
}
