//! argusctl - command-line client for the Argus daemon socket
//!
//! Sends one request per invocation and prints the JSON reply, or follows
//! the push-event stream with `watch`.
//!
//! # Usage
//!
//! ```text
//! argusctl arm-away
//! argusctl get-state
//! argusctl set-clock --timezone Europe/Budapest --datetime "2024-01-01 10:00"
//! argusctl watch
//! ```

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use argus_protocol::{ClockSettings, Request};
use argusd::config::DEFAULT_SOCKET_PATH;
use argusd::IpcClient;

// ============================================================================
// CLI Arguments
// ============================================================================

/// Control the Argus daemon
#[derive(Parser, Debug)]
#[command(name = "argusctl", version, about)]
struct Args {
    /// Daemon socket (defaults to $ARGUS_SOCKET, then the standard path)
    #[arg(short, long, global = true, env = "ARGUS_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Arm with every zone active
    ArmAway,
    /// Arm with the stay zones only
    ArmStay,
    Disarm,
    /// Show the arm type
    GetArm,
    /// Show the monitoring state
    GetState,
    /// Show the power source
    GetPowerState,
    /// Reload sensors, zones and notification settings
    UpdateConfig,
    /// Reload keypad settings and user codes
    UpdateKeypad,
    UpdateSecureConnection,
    UpdateSsh,
    SyncClock,
    SetClock {
        /// Olson zone name, e.g. Europe/Budapest
        #[arg(long)]
        timezone: Option<String>,
        /// Anything `date --set` accepts
        #[arg(long)]
        datetime: Option<String>,
    },
    /// Print push events until interrupted
    Watch,
}

impl Command {
    fn into_request(self) -> Request {
        match self {
            Self::ArmAway => Request::ArmAway,
            Self::ArmStay => Request::ArmStay,
            Self::Disarm => Request::Disarm,
            Self::GetArm => Request::GetArm,
            Self::GetState => Request::GetState,
            Self::GetPowerState => Request::GetPowerState,
            Self::UpdateConfig => Request::UpdateConfig,
            Self::UpdateKeypad => Request::UpdateKeypad,
            Self::UpdateSecureConnection => Request::UpdateSecureConnection,
            Self::UpdateSsh => Request::UpdateSsh,
            Self::SyncClock => Request::SyncClock,
            Self::SetClock { timezone, datetime } => {
                Request::SetClock(ClockSettings { timezone, datetime })
            }
            Self::Watch => Request::Subscribe,
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = IpcClient::connect(&args.socket)
        .await
        .context("Is argusd running?")?;

    match args.command.into_request() {
        Request::Subscribe => watch(client).await,
        request => {
            let succeeded = send(client, &request).await?;
            if !succeeded {
                process::exit(1);
            }
            Ok(())
        }
    }
}

async fn send(mut client: IpcClient, request: &Request) -> Result<bool> {
    let response = client
        .request(request)
        .await
        .with_context(|| format!("'{}' failed", request.action()))?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.result)
}

async fn watch(client: IpcClient) -> Result<()> {
    let mut events = client.subscribe().await?;
    while let Some(event) = events.next_event().await? {
        println!("{}", serde_json::to_string(&event)?);
    }
    eprintln!("Daemon closed the connection.");
    Ok(())
}
