mod app_dirs;
mod app_log;
mod config;
mod controller;
mod engine;
mod event_log;
mod fault;
mod instance_lock;
mod localization;
mod signals;
mod status;
mod watcher;

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::app_dirs::AppDirs;
use crate::app_log::{ActionLog, FileLog};
use crate::config::ServiceConfig;
use crate::controller::{ControllerParts, ServiceController, ServiceState};
use crate::engine::ProcessEngine;
use crate::event_log::SyslogEventLog;
use crate::fault::{FaultHandler, FAULT_EXIT_CODE};
use crate::instance_lock::InstanceLock;
use crate::localization::{Phrases, TomlDictionaries};
use crate::signals::{HostSignal, HostSignals};
use crate::status::{StatusFile, StatusTracker};

/// Service wrapper for the SCADA-Server core engine: validates the
/// directory layout, starts the engine, and stops it on a host signal or
/// when the stop file appears.
#[derive(Parser, Debug)]
#[command(name = "scada-server-svc", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "ScadaServerSvc.toml")]
    config: PathBuf,

    /// Base directory (overrides config)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Validate config and directories, print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Print the running service's status file and exit
    #[arg(long, conflicts_with = "dry_run")]
    status: bool,

    /// Create the stop file so a running service stops itself
    #[arg(long, conflicts_with_all = ["dry_run", "status"])]
    stop: bool,

    /// Extra logging (state transitions, watcher polls)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match ServiceConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    if let Some(base) = cli.base_dir {
        config.dirs.base = base;
    }

    if cli.stop {
        return request_stop(&config);
    }
    if cli.status {
        return print_status(&config);
    }
    if cli.dry_run {
        return dry_run(&config);
    }

    // Top-level fault boundary: the panic hook has already logged the fault
    match std::panic::catch_unwind(move || run(config)) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "service failed");
            ExitCode::FAILURE
        }
        Err(_) => ExitCode::from(FAULT_EXIT_CODE),
    }
}

fn run(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let dirs = AppDirs::from_config(&config.dirs);
    let phrases = Phrases::new(config.service.language);
    let file_log = Arc::new(FileLog::new(
        dirs.log_dir().join(&config.log.file_name),
        config.log.max_bytes,
    ));
    tracing::debug!(path = %file_log.path().display(), "action log");
    let log: Arc<dyn ActionLog> = file_log;
    FaultHandler::new(log.clone(), phrases.clone()).install();

    let lock = InstanceLock::acquire(&config.lock_file())?;
    tracing::debug!(path = %lock.path().display(), "instance lock acquired");
    let mut signals = HostSignals::install()?;

    let controller = ServiceController::new(ControllerParts {
        engine: Arc::new(ProcessEngine::new(
            config.engine.clone(),
            dirs.clone(),
            log.clone(),
        )),
        localization: Arc::new(TomlDictionaries::new(config.service.language)),
        event_log: Arc::new(SyslogEventLog::new(config.service.name.clone())),
        phrases,
        stop_file: config.stop_file(),
        poll_interval: Duration::from_millis(config.watcher.poll_interval_ms),
    });

    let status_path = dirs.log_dir().join(&config.log.status_file);
    let status_task = dirs
        .log_dir()
        .is_dir()
        .then(|| tokio::spawn(track_status(controller.subscribe(), status_path.clone())));

    let mut ended_rx = controller.subscribe_session_end();
    let args: Vec<String> = std::env::args().collect();
    let starter = controller.clone();
    tokio::task::spawn_blocking(move || starter.on_start(&args)).await?;

    let session_started = controller.sessions_started() > 0;
    if session_started {
        tracing::info!(
            state = ?controller.state(),
            watcher = controller.watcher_active(),
            stop_file = %config.stop_file().display(),
            "service running"
        );
    } else {
        tracing::warn!("service is inert, waiting for a stop signal");
    }

    tokio::select! {
        signal = signals.recv() => {
            let stopper = controller.clone();
            tokio::task::spawn_blocking(move || match signal {
                HostSignal::Stop => stopper.on_stop(),
                HostSignal::Shutdown => stopper.on_shutdown(),
            })
            .await?;
        }
        _ = wait_for_session_end(&mut ended_rx), if session_started => {
            tracing::info!("session ended by stop file");
        }
    }

    if let Some(task) = status_task {
        task.abort();
        StatusFile::new(status_path).remove();
    }
    drop(controller);
    drop(lock);
    tracing::info!("service exited");
    Ok(())
}

/// Resolves once a stop has finished logging, so exiting cannot cut the records short.
async fn wait_for_session_end(rx: &mut watch::Receiver<u64>) {
    if rx.wait_for(|ended| *ended > 0).await.is_err() {
        // Sender gone: nothing left to wait for
        std::future::pending::<()>().await;
    }
}

async fn track_status(mut rx: watch::Receiver<ServiceState>, path: PathBuf) {
    let mut tracker = StatusTracker::new(path);
    let initial = *rx.borrow_and_update();
    tracker.update(initial);
    while rx.changed().await.is_ok() {
        let state = *rx.borrow_and_update();
        tracker.update(state);
    }
}

fn request_stop(config: &ServiceConfig) -> ExitCode {
    let stop_file = config.stop_file();
    match watcher::request_stop(&stop_file) {
        Ok(()) => {
            println!("Stop requested: {}", stop_file.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to create stop file {}: {e}", stop_file.display());
            ExitCode::FAILURE
        }
    }
}

fn print_status(config: &ServiceConfig) -> ExitCode {
    let dirs = AppDirs::from_config(&config.dirs);
    let path = dirs.log_dir().join(&config.log.status_file);
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            println!("{contents}");
            ExitCode::SUCCESS
        }
        Err(_) => {
            println!("No status file at {} (service not running?)", path.display());
            ExitCode::FAILURE
        }
    }
}

fn dry_run(config: &ServiceConfig) -> ExitCode {
    let dirs = AppDirs::from_config(&config.dirs);
    println!("scada-server-svc v{}", env!("CARGO_PKG_VERSION"));
    print_path("Config dir", dirs.config_dir());
    print_path("Lang dir", dirs.lang_dir());
    print_path("Log dir", dirs.log_dir());
    print_path("Module dir", dirs.mod_dir());
    print_path("Stop file", &config.stop_file());
    println!(
        "Engine:      {} {}",
        config.engine.command,
        config.engine.args.join(" ")
    );
    println!("Language:    {}", config.service.language.code());

    let check = dirs.check();
    if check.all_exist() {
        println!("All required directories exist.");
        ExitCode::SUCCESS
    } else {
        for dir in &check.missing {
            println!("Missing:     {}", dir.display());
        }
        ExitCode::FAILURE
    }
}

fn print_path(label: &str, path: &Path) {
    println!("{:<12} {}", format!("{label}:"), path.display());
}
