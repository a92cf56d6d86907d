#![forbid(unsafe_code)]

mod clipboard;
mod codec;
mod config;
mod console;
mod constants;
mod error;
mod ipc;
mod location;
mod persistence;
mod render;
mod sync;

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use clipboard::SystemClipboard;
use config::AppSettings;
use console::{Command, ConsoleSurface};
use constants::timing;
use ipc::{ChannelHub, LocalHub, SocketHub};
use persistence::FileStore;
use sync::{Reconciler, Signal, SyncState};

#[derive(Parser, Debug)]
#[command(name = "streampulse")]
#[command(about = "Stream overlay control panel and capture-ready display view, kept in sync")]
#[command(version)]
struct Cli {
    /// Location to open; a `#/overlay` fragment selects the display view
    #[arg(long)]
    location: Option<String>,

    /// Directory holding the shared config store
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Store poll interval for display views, in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Sync through the store only, without the broadcast relay socket
    #[arg(long)]
    local_only: bool,
}

fn parse_level(level: &str) -> TraceLevel {
    match level.trim().to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

fn init_logging(file_level: Option<&str>) -> Result<()> {
    // LOG_LEVEL wins over the settings file
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| file_level.map(str::to_string))
        .unwrap_or_else(|| "info".to_string());

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&level))
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_level = AppSettings::load_from(&AppSettings::path())
        .ok()
        .flatten()
        .map(|settings| settings.log_level);
    init_logging(file_level.as_deref())?;

    let mut settings = AppSettings::load();
    if let Some(location) = cli.location {
        settings.location = location;
    }
    if let Some(dir) = cli.store_dir {
        settings.store_dir = dir;
    }
    if let Some(ms) = cli.poll_ms {
        settings.poll_interval_ms = ms;
    }
    settings.local_only |= cli.local_only;
    settings.validate_and_clamp();
    info!(settings = ?settings, "Starting StreamPulse");

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("Failed to register signal handler")?;
    }

    if settings.local_only {
        info!("Broadcast relay disabled, syncing through the store only");
        return run(&settings, LocalHub::new(), &shutdown);
    }
    match SocketHub::at_default_location() {
        Ok(hub) => run(&settings, hub, &shutdown),
        Err(e) => {
            warn!(error = ?e, "No socket directory available, syncing through the store only");
            run(&settings, LocalHub::new(), &shutdown)
        }
    }
}

fn run<H: ChannelHub>(settings: &AppSettings, hub: H, shutdown: &AtomicBool) -> Result<()> {
    let store = FileStore::new(
        &settings.store_dir,
        Duration::from_millis(timing::STORE_DEBOUNCE_MS),
    );
    info!(path = %store.path().display(), "Using config store");

    let (signal_tx, signal_rx) = mpsc::channel();
    let (console_tx, console_rx) = mpsc::channel();

    let mut reconciler = Reconciler::new(
        store,
        hub,
        ConsoleSurface::new(io::stdout(), SystemClipboard::new()),
        Duration::from_millis(settings.poll_interval_ms),
        signal_tx,
    );
    reconciler.dispatch(Signal::Init {
        location: settings.location.clone(),
    });
    info!(state = %reconciler.state(), location = %reconciler.location(), "Overlay running (type 'help' for commands)");

    // Never joined: the thread blocks on stdin until the process exits
    let _console = console::spawn_listener(console_tx);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown signal received");
            break;
        }

        // Check for console commands (non-blocking)
        if let Ok(command) = console_rx.try_recv() {
            match command {
                Command::Dispatch(signal) => {
                    if matches!(signal, Signal::Edit(_) | Signal::ExportRequested)
                        && reconciler.state() != SyncState::ControlSynced
                    {
                        warn!(state = %reconciler.state(), "Display view is read-only; 'goto' a control location to edit");
                    }
                    reconciler.dispatch(signal);
                }
                Command::Show => {
                    print!("{}", render::render(reconciler.record()));
                    println!("state: {}  location: {}", reconciler.state(), reconciler.location());
                }
                Command::Help => println!("{}", console::HELP),
                Command::Quit => break,
            }
        }

        match signal_rx.recv_timeout(Duration::from_millis(timing::LOOP_TICK_MS)) {
            Ok(signal) => reconciler.dispatch(signal),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    reconciler.teardown();
    info!("StreamPulse stopped");
    Ok(())
}
