//! Argus daemon - home-intrusion monitoring controller
//!
//! Scans the sensors, runs the arm/disarm state machine, drives the siren
//! and the keypad, sends notifications and serves the IPC socket.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! argusd start
//!
//! # Start the daemon (background/daemonized)
//! argusd start -d
//!
//! # Use another configuration file
//! argusd --config ./argusd.toml start
//!
//! # Stop the daemon
//! argusd stop
//!
//! # Check daemon status
//! argusd status
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use argusd::config::DEFAULT_CONFIG_PATH;
use argusd::maintenance::CommandMaintenance;
use argusd::storage::JsonFileStore;
use argusd::{DaemonConfig, Hardware, Service};

/// Argus daemon - home-intrusion monitoring controller
#[derive(Parser, Debug)]
#[command(name = "argusd", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("argus")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("argusd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("argusd.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid).context("PID out of range")?;
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'argusd stop' to stop it first.");
                process::exit(1);
            }

            // Read before forking so a broken file is reported on the terminal.
            let config = DaemonConfig::load(&args.config)
                .with_context(|| format!("Failed to load {}", args.config.display()))?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            stop_daemon(pid)?;

            // The siren alert may need a tick to switch off.
            for _ in 0..100 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within 10 seconds.");
            process::exit(1);
        }
        Command::Status => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                process::exit(1);
            };

            println!("Daemon is running (PID {pid})");
            if let Ok(config) = DaemonConfig::load(&args.config) {
                if config.socket.path.exists() {
                    println!("Socket: {}", config.socket.path.display());
                }
            }
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("argusd=info".parse()?)
                .add_directive("argus_hw=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        simulate = config.hardware.simulate,
        "Argus daemon starting"
    );

    let store = open_store(&config.storage.path)?;
    let hardware = Hardware::from_config(&config).context("Failed to set up hardware")?;
    let maintenance = Arc::new(CommandMaintenance::new(config.maintenance.clone()));

    let service = Service::start(&config, hardware, store, maintenance)
        .context("Failed to start services")?;
    info!(socket = %service.socket_path().display(), "Argus daemon running");

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    info!("Shutdown signal received");

    service.shutdown().await;
    info!("Argus daemon stopped");
    Ok(())
}

fn open_store(path: &Path) -> Result<Arc<JsonFileStore>> {
    let store = JsonFileStore::open(path)
        .with_context(|| format!("Failed to open store {}", path.display()))?;
    info!(path = %path.display(), "Store opened");
    Ok(Arc::new(store))
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}
