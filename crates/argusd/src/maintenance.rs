//! System maintenance actions requested over IPC.
//!
//! Certificate renewal, SSH toggling and NTP sync are external tools; the
//! daemon only runs the configured argv and reports whether it exited
//! cleanly. Setting the clock relinks the localtime file and calls `date`.

use std::io;
use std::path::{Component, Path};
use std::process::Output;

use argus_protocol::ClockSettings;
use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to update {path}: {source}")]
    Localtime {
        path: String,
        #[source]
        source: io::Error,
    },
}

pub type MaintenanceResult<T> = Result<T, MaintenanceError>;

#[async_trait]
pub trait Maintenance: Send + Sync {
    async fn update_secure_connection(&self) -> MaintenanceResult<()>;

    async fn update_ssh(&self) -> MaintenanceResult<()>;

    async fn sync_clock(&self) -> MaintenanceResult<()>;

    /// Applies the timezone first, then the datetime. Absent fields are
    /// left alone.
    async fn set_clock(&self, settings: &ClockSettings) -> MaintenanceResult<()>;
}

// ============================================================================
// Command-backed implementation
// ============================================================================

pub struct CommandMaintenance {
    config: MaintenanceConfig,
}

impl CommandMaintenance {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self { config }
    }

    async fn run_configured(
        &self,
        what: &'static str,
        argv: &[String],
    ) -> MaintenanceResult<()> {
        let Some((program, args)) = argv.split_first() else {
            return Err(MaintenanceError::NotConfigured(what));
        };
        info!(action = what, program = %program, "Running maintenance command");
        run(program, args).await
    }

    fn timezone_is_known(&self, timezone: &str) -> bool {
        let relative = Path::new(timezone);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        plain && self.config.zoneinfo_dir.join(relative).is_file()
    }

    async fn relink_localtime(&self, timezone: &str) -> MaintenanceResult<()> {
        let target = self.config.zoneinfo_dir.join(timezone);
        let link = &self.config.localtime_path;
        let localtime_error = |source| MaintenanceError::Localtime {
            path: link.display().to_string(),
            source,
        };

        match tokio::fs::remove_file(link).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(localtime_error(e)),
        }
        tokio::fs::symlink(&target, link)
            .await
            .map_err(localtime_error)?;
        info!(timezone = %timezone, "Timezone changed");
        Ok(())
    }
}

#[async_trait]
impl Maintenance for CommandMaintenance {
    async fn update_secure_connection(&self) -> MaintenanceResult<()> {
        self.run_configured("secure connection update", &self.config.secure_connection_command)
            .await
    }

    async fn update_ssh(&self) -> MaintenanceResult<()> {
        self.run_configured("ssh update", &self.config.ssh_command)
            .await
    }

    async fn sync_clock(&self) -> MaintenanceResult<()> {
        self.run_configured("clock sync", &self.config.sync_clock_command)
            .await
    }

    async fn set_clock(&self, settings: &ClockSettings) -> MaintenanceResult<()> {
        if let Some(timezone) = settings.timezone.as_deref() {
            if !self.timezone_is_known(timezone) {
                warn!(timezone = %timezone, "Rejected unknown timezone");
                return Err(MaintenanceError::UnknownTimezone(timezone.to_string()));
            }
            self.relink_localtime(timezone).await?;
        }

        if let Some(datetime) = settings.datetime.as_deref().filter(|d| !d.is_empty()) {
            let arg = format!("--set={datetime}");
            run(&self.config.date_command, std::slice::from_ref(&arg)).await?;
            info!(datetime = %datetime, "Clock set");
        }
        Ok(())
    }
}

async fn run(program: &str, args: &[String]) -> MaintenanceResult<()> {
    let output: Output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| MaintenanceError::Spawn {
            command: program.to_string(),
            source,
        })?;

    if output.status.success() {
        debug!(program = %program, "Maintenance command finished");
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(MaintenanceError::CommandFailed {
        command: program.to_string(),
        status: output.status.to_string(),
        stderr,
    })
}
