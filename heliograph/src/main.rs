//! heliograph - CLI driver for the heliograph telemetry client
//!
//! Opens a session against the configured collector, records any events
//! given on the command line, and keeps the heartbeat running until Ctrl+C
//! in watch mode. Queued requests that cannot be delivered before exit are
//! persisted and retried on the next run.
//!
//! Uses XDG Base Directory specification for file locations:
//! - State: $XDG_DATA_HOME/heliograph/state.json (~/.local/share/heliograph/state.json)
//! - Logs: $XDG_STATE_HOME/heliograph/heliograph.log (~/.local/state/heliograph/heliograph.log)
//! - Config: $XDG_CONFIG_HOME/heliograph/config.toml (~/.config/heliograph/config.toml)

use anyhow::{Context, Result};
use clap::Parser;
use heliograph_core::{Client, Config, EventData};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "heliograph")]
#[command(about = "Send telemetry to a heliograph collector")]
#[command(version)]
struct Args {
    /// Path to a config file (defaults to the XDG location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Record these event keys once the session is open
    #[arg(short, long)]
    event: Vec<String>,

    /// Keep the session open until Ctrl+C instead of exiting immediately
    #[arg(short, long)]
    watch: bool,

    /// Seconds to wait for the queue to drain before exiting
    #[arg(long, default_value = "10")]
    drain_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    // Initialize logging
    let _log_guard =
        heliograph_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("heliograph starting");

    println!("Collector: {}", config.client.server_url);
    println!("State:     {}", config.storage_path().display());

    let client = Client::new(config).context("failed to create client")?;
    println!("Device:    {}", client.device_id());

    // Route panics through the crash path; the synchronous state flush in
    // report_crash is what lets the report survive the process exit.
    let crash_client = client.clone();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        crash_client.report_crash(&info.to_string(), true, None);
        default_hook(info);
    }));

    client.begin_session();

    for key in &args.event {
        client.record_event(EventData::new(key.clone()));
    }
    if !args.event.is_empty() {
        println!("Recorded {} event(s)", args.event.len());
    }

    if args.watch {
        run_watch_mode(&client).await.context("watch mode failed")?;
    }

    client.end_session(None);

    // Give the dispatcher a chance to drain before exiting.
    let deadline = Instant::now() + Duration::from_secs(args.drain_timeout);
    while client.pending_requests() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let pending = client.pending_requests();
    if pending > 0 {
        println!(
            "{} request(s) still queued; they will be retried on the next run.",
            pending
        );
    } else {
        println!("All requests delivered.");
    }

    client.shutdown().await;
    tracing::info!("heliograph exiting");

    Ok(())
}

/// Keep the session open until Ctrl+C, reporting queue depth periodically.
async fn run_watch_mode(client: &Client) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    println!("Session open. Press Ctrl+C to stop.");

    let mut last_pending = 0;
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;

        let pending = client.pending_requests();
        if pending != last_pending && pending > 0 {
            let timestamp = chrono::Local::now().format("%H:%M:%S");
            println!("[{}] {} request(s) pending", timestamp, pending);
        }
        last_pending = pending;
    }

    Ok(())
}
