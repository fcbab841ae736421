//! Wiring of the subsystems into one running service.
//!
//! [`Service::start`] creates the queues, the broadcaster and the shared
//! state, spawns the monitor, keypad, notifier and IPC tasks and hands
//! back a handle. [`Service::shutdown`] broadcasts Stop and joins the tasks
//! in dependency order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use argus_hw::{
    AdcPowerSense, GpioPin, GpioSiren, HwResult, IioAdc, LoggingSiren, PowerAdapter,
    SensorAdapter, SimulatedPower, SimulatedSensors, SirenOutput,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alert::{AlertSignal, Escalator, SirenContext, SirenTiming};
use crate::broadcast::{Broadcaster, ControlToken, QueueSink};
use crate::config::{AlertConfig, DaemonConfig};
use crate::events::EventPublisher;
use crate::keypad::{DriverFactory, HardwareDrivers, KeypadController, SimulatedDrivers};
use crate::maintenance::Maintenance;
use crate::monitor::{Monitor, MonitorInputs, MonitorSettings};
use crate::notifier::{
    self, EmailChannel, GsmModem, LoggingMailer, LoggingSms, Notifier, SmsChannel, SmtpMailer,
};
use crate::server::{IpcServer, ServerContext, ServerError};
use crate::state::SharedStateStore;
use crate::storage::Store;

/// Channels of one IIO converter.
const POWER_DEVICE_CHANNELS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("IPC server: {0}")]
    Server(#[from] ServerError),
}

impl From<&AlertConfig> for SirenTiming {
    fn from(config: &AlertConfig) -> Self {
        Self {
            alert_time: Duration::from_secs(config.alert_time_secs),
            suspend_time: Duration::from_secs(config.suspend_time_secs),
            ..Self::default()
        }
    }
}

// ============================================================================
// Hardware
// ============================================================================

/// Everything the service talks to outside the process, apart from
/// storage and maintenance.
pub struct Hardware {
    pub sensors: Arc<dyn SensorAdapter>,
    pub power: Arc<dyn PowerAdapter>,
    pub siren: Arc<dyn SirenOutput>,
    pub keypads: Arc<dyn DriverFactory>,
    pub sms: Box<dyn SmsChannel>,
    pub email: Box<dyn EmailChannel>,
}

impl Hardware {
    /// Real adapters, or the simulated set when `hardware.simulate` is on.
    pub fn from_config(config: &DaemonConfig) -> HwResult<Self> {
        let hw = &config.hardware;
        if hw.simulate {
            info!(inputs = hw.input_count, "Using simulated hardware");
            return Ok(Self::simulated(hw.input_count));
        }

        let siren = GpioSiren::new(GpioPin::output(&hw.gpio_root, hw.siren_pin, false)?);
        let power_adc = IioAdc::new(vec![hw.power_device.clone()], POWER_DEVICE_CHANNELS);
        let smtp = &config.notifier.smtp;

        Ok(Self {
            sensors: Arc::new(IioAdc::new(hw.adc_devices.clone(), hw.input_count)),
            power: Arc::new(AdcPowerSense::new(Arc::new(power_adc), hw.power_channel)),
            siren: Arc::new(siren),
            keypads: Arc::new(HardwareDrivers {
                gpio_root: hw.gpio_root.clone(),
                clock_pin: hw.keypad_clock_pin,
                data_pin: hw.keypad_data_pin,
            }),
            sms: Box::new(GsmModem::new(
                config.notifier.gsm_port.clone(),
                config.notifier.gsm_baud,
            )),
            email: Box::new(SmtpMailer::new(
                smtp.host.clone(),
                smtp.port,
                smtp.sender.clone(),
            )),
        })
    }

    /// In-memory sensors, mains power, logging siren and channels, mock
    /// keypad panel.
    pub fn simulated(input_count: usize) -> Self {
        Self {
            sensors: Arc::new(SimulatedSensors::new(input_count)),
            power: Arc::new(SimulatedPower::default()),
            siren: Arc::new(LoggingSiren::default()),
            keypads: Arc::new(SimulatedDrivers::default()),
            sms: Box::new(LoggingSms),
            email: Box::new(LoggingMailer),
        }
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct Service {
    broadcaster: Broadcaster,
    state: SharedStateStore,
    events: EventPublisher,
    cancel: CancellationToken,
    socket_path: PathBuf,
    keypad: JoinHandle<()>,
    notifier: JoinHandle<()>,
    monitor: JoinHandle<()>,
    ipc: JoinHandle<()>,
}

impl Service {
    /// Binds the IPC socket and spawns every subsystem. Must be called
    /// inside a tokio runtime.
    pub fn start(
        config: &DaemonConfig,
        hardware: Hardware,
        store: Arc<dyn Store>,
        maintenance: Arc<dyn Maintenance>,
    ) -> Result<Self, ServiceError> {
        let state = SharedStateStore::new();
        let events = EventPublisher::new();
        let cancel = CancellationToken::new();

        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();
        let (keypad_tx, keypad_rx) = mpsc::unbounded_channel();
        let (notifier_handle, notifier_rx) = notifier::queue();

        let broadcaster = Broadcaster::new()
            .with_sink(Arc::new(QueueSink::new("monitor", monitor_tx)))
            .with_sink(Arc::new(QueueSink::new("keypad", keypad_tx)))
            .with_sink(Arc::new(notifier_handle.clone()));

        // Bind first so a socket problem leaves nothing running.
        let server = IpcServer::bind(
            &config.socket,
            ServerContext {
                broadcaster: broadcaster.clone(),
                state: state.clone(),
                events: events.clone(),
                maintenance,
            },
            cancel.clone(),
        )?;
        let socket_path = server.socket_path().to_path_buf();

        let escalator = Escalator::new(
            AlertSignal::new(),
            SirenContext {
                siren: hardware.siren,
                store: Arc::clone(&store),
                events: events.clone(),
                state: state.clone(),
                notifier: notifier_handle,
                timing: SirenTiming::from(&config.alert),
                source_name: config.notifier.source_name.clone(),
            },
        );

        let monitor = Monitor::new(
            monitor_rx,
            MonitorInputs {
                sensors: hardware.sensors,
                power: hardware.power,
            },
            Arc::clone(&store),
            state.clone(),
            events.clone(),
            escalator,
            MonitorSettings::from(&config.monitor),
        );

        let keypad = KeypadController::new(
            keypad_rx,
            broadcaster.clone(),
            Arc::clone(&store),
            state.subscribe(),
            hardware.keypads,
            config.security.salt.clone(),
        );

        let notifier = Notifier::new(notifier_rx, store, hardware.sms, hardware.email)
            .with_retry_wait(Duration::from_secs(config.notifier.retry_wait_secs));

        let service = Self {
            broadcaster,
            state,
            events,
            cancel,
            socket_path,
            monitor: tokio::spawn(monitor.run()),
            keypad: tokio::spawn(keypad.run()),
            notifier: tokio::spawn(notifier.run()),
            ipc: tokio::spawn(server.run()),
        };
        info!("Services started");
        Ok(service)
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn state(&self) -> &SharedStateStore {
        &self.state
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stops every subsystem: keypad, notifier, monitor, then the IPC
    /// server.
    pub async fn shutdown(self) {
        info!("Stopping services");
        if let Err(e) = self.broadcaster.send(ControlToken::Stop) {
            // A closed queue means that task has already ended.
            warn!(error = %e, "Stop not delivered everywhere");
        }

        join("keypad", self.keypad).await;
        join("notifier", self.notifier).await;
        join("monitor", self.monitor).await;

        self.cancel.cancel();
        join("ipc", self.ipc).await;
        info!("Services stopped");
    }
}

async fn join(name: &'static str, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        error!(task = name, error = %e, "Task ended abnormally");
    }
}
