//! strack CLI - share your location with contacts, or follow theirs.
//!
//! This is the main binary entry point. See the `strack` library for the
//! session core.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use strack::geolocation::{ChannelSource, FixFeed, ReplaySource};
use strack::session::LoggingForeground;
use strack::{
    ChannelListener, CloseKind, Config, GeolocationSource, LocationFix, LocationUpdate,
    ReceiverEvent, ReceiverSession, SenderSession, WsConnector,
};
use tokio::io::AsyncBufReadExt;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "strack")]
#[command(version)]
#[command(about = "Stream your location to contacts, or follow theirs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Share your location until Ctrl-C
    Share {
        /// Own username (defaults to STRACK_USERNAME or the config file)
        #[arg(long)]
        username: Option<String>,
        /// Bearer token (defaults to STRACK_TOKEN)
        #[arg(long)]
        token: Option<String>,
        /// Replay a recorded JSON-lines track instead of reading fixes from stdin
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Replay speed multiplier
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },
    /// Follow a contact's location
    Watch {
        /// Username of the contact
        contact: String,
        /// Bearer token (defaults to STRACK_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file (the token is never written)
        #[arg(long)]
        save: bool,
    },
}

fn resolve_token(config: &Config, flag: Option<String>) -> Result<String> {
    let token = flag.unwrap_or_else(|| config.token.clone());
    if token.trim().is_empty() {
        anyhow::bail!("No token: pass --token or set STRACK_TOKEN");
    }
    Ok(token)
}

fn resolve_username(config: &Config, flag: Option<String>) -> Result<String> {
    let username = flag.unwrap_or_else(|| config.username.clone());
    if username.trim().is_empty() {
        anyhow::bail!("No username: pass --username or set STRACK_USERNAME");
    }
    Ok(username)
}

async fn share(
    config: Config,
    username: String,
    token: String,
    replay: Option<PathBuf>,
    speed: f64,
) -> Result<()> {
    let geolocation: Arc<dyn GeolocationSource> = match replay {
        Some(path) => Arc::new(
            ReplaySource::from_path(&path)?
                .with_speed(speed)
                .with_restamp(true),
        ),
        None => {
            let (source, feed) = ChannelSource::new(true);
            tokio::spawn(read_fixes(feed));
            println!("Reading fixes from stdin (one JSON object per line)");
            Arc::new(source)
        }
    };

    let mut session = SenderSession::new(
        config.sender_config(),
        geolocation,
        Arc::new(LoggingForeground::new()),
        Arc::new(WsConnector),
    );
    session.start(&username, &token).await?;
    println!(
        "Sharing location as {username} via {} (Ctrl-C to stop)",
        config.ws_url
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("Stopping...");
    session.stop().await;
    let stats = session.stats();
    println!(
        "Stopped: {} fixes sent, {} dropped",
        stats.sent, stats.dropped
    );
    Ok(())
}

/// Feed stdin fixes into `feed`, one JSON `LocationFix` per line.
async fn read_fixes(feed: FixFeed) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<LocationFix>(line) {
                    Ok(fix) => {
                        feed.push(fix);
                    }
                    Err(e) => log::warn!("Ignoring stdin line: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
    log::info!("Stdin closed, no more fixes");
}

async fn watch(config: Config, contact: String, token: String) -> Result<()> {
    let (listener, mut events) = ChannelListener::new();
    let mut session = ReceiverSession::new(config.receiver_config(), Arc::new(WsConnector));
    session.start(&contact, &token, listener).await?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Some(ReceiverEvent::Connected) => println!("Connected, following {contact}"),
                Some(ReceiverEvent::Error(error)) => eprintln!("Connection error: {error}"),
                Some(ReceiverEvent::Location(update)) => print_update(&update),
                Some(ReceiverEvent::Closed(status)) => match status.kind {
                    CloseKind::SenderEnded => {
                        println!("{contact}: stream ended");
                        break;
                    }
                    CloseKind::Rejected => {
                        eprintln!("Rejected by server: {}", status.reason);
                        break;
                    }
                    CloseKind::Normal => {
                        println!("Connection closed");
                        break;
                    }
                    CloseKind::Exhausted => {
                        println!("{contact}: stream ended (could not reconnect)");
                        break;
                    }
                    CloseKind::Dropped => {
                        println!("Connection lost ({}), reconnecting...", status.code);
                    }
                },
                None => break,
            },
        }
    }

    session.stop().await;
    Ok(())
}

fn print_update(update: &LocationUpdate) {
    let time = chrono::DateTime::from_timestamp_millis(update.timestamp)
        .map_or_else(|| "--:--:--".to_string(), |t| t.format("%H:%M:%S").to_string());
    let bearing = update
        .bearing
        .map_or_else(|| "    -".to_string(), |b| format!("{b:5.1}"));
    println!(
        "{time}  {:<16} {:>10.6} {:>11.6}  bearing {bearing}",
        update.username, update.latitude, update.longitude
    );
}

fn init_logging() -> Result<()> {
    let filter = strack::env::Environment::current().default_log_filter();
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter));
    builder.format_timestamp_secs();

    // STRACK_LOG_FILE keeps log lines out of the update stream on stdout
    if let Ok(path) = std::env::var("STRACK_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        default_hook(panic_info);
    }));

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Share {
            username,
            token,
            replay,
            speed,
        } => {
            let username = resolve_username(&config, username)?;
            let token = resolve_token(&config, token)?;
            share(config, username, token, replay, speed).await?;
        }
        Commands::Watch { contact, token } => {
            let token = resolve_token(&config, token)?;
            watch(config, contact, token).await?;
        }
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
                println!("Saved to {}", Config::config_dir()?.display());
            }
        }
    }

    Ok(())
}
