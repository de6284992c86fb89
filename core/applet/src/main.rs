//! crashwatch applet entrypoint.
//!
//! A single-threaded triage loop fed by a Unix-socket listener. Crash events,
//! connectivity changes and notification callbacks arrive as JSON requests,
//! become typed messages, and are handled one at a time by the orchestrator.
//! Notifications are written to stdout as JSON lines for the widget process.

use clap::Parser;
use std::env;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use triage_core::{
    load_config, AppletConfig, Collaborators, LocalOwnership, Orchestrator, SeenSetStore,
    StaticAppCatalog, StorageConfig,
};

mod event_loop;
mod ipc;
mod notifier;
mod signals;

use event_loop::Waker;
use notifier::StdoutNotifier;

#[derive(Parser, Debug)]
#[command(name = "crashwatch-applet")]
#[command(about = "Notifies about crashes and reports them", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file (default: $XDG_CONFIG_HOME/crashwatch/applet.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directories to watch for problem records (replaces the configured ones)
    #[arg(value_name = "DIR")]
    dirs: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let storage = match StorageConfig::from_user_dirs() {
        Ok(storage) => storage,
        Err(err) => {
            error!(error = %err, "Failed to resolve cache directory");
            std::process::exit(1);
        }
    };

    let config_path = cli.config.clone().unwrap_or_else(|| storage.config_file());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            AppletConfig::default()
        }
    };

    let watch_dirs = if cli.dirs.is_empty() {
        config.watch_dirs(&storage)
    } else {
        cli.dirs.clone()
    };

    if let Err(err) = signals::install() {
        warn!(error = %err, "Failed to install signal handlers");
    }

    let socket_path = storage.socket_file();
    let listener = match ipc::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind applet socket");
            std::process::exit(1);
        }
    };

    let (wake_tx, wake_rx) = match UnixStream::pair() {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = %err, "Failed to create wake-up socket");
            std::process::exit(1);
        }
    };
    let waker = Waker::new(wake_tx);

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || ipc::serve(listener, tx, waker));

    info!(
        path = %socket_path.display(),
        watch_dirs = ?watch_dirs,
        auto_reporting = config.triage.auto_reporting,
        handler = %config.handler.program.display(),
        "crashwatch applet started"
    );

    let collaborators = Collaborators {
        notifier: Box::new(StdoutNotifier::new()),
        apps: Box::new(StaticAppCatalog::new(config.applications.clone())),
        ownership: Box::new(LocalOwnership),
    };
    let seen = SeenSetStore::new(storage.seen_list_file());
    let mut orchestrator = Orchestrator::new(config, watch_dirs, seen, collaborators);

    orchestrator.discover_on_startup(chrono::Utc::now());

    if let Err(err) = event_loop::run(&mut orchestrator, &rx, &wake_rx) {
        error!(error = %err, "Event loop failed");
        orchestrator.shutdown();
        std::process::exit(1);
    }

    info!("Shutting down");
    orchestrator.shutdown();
    let _ = fs_err::remove_file(&socket_path);
}

fn init_logging(verbose: bool) {
    let debug_enabled = verbose
        || env::var("CRASHWATCH_DEBUG_LOG")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
            .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // stdout carries notifier records, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
