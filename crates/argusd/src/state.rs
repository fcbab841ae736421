//! Process-wide shared state: arm type, monitoring state, power source.
//!
//! Backed by a `tokio::sync::watch` channel. The monitor subsystem is the
//! only writer; the IPC server and the keypad controller read snapshots or
//! wait for changes.

use std::sync::Arc;

use argus_core::{ArmType, MonitoringState, PowerSource};
use tokio::sync::watch;
use tracing::debug;

/// One consistent view of the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SharedState {
    pub arm: ArmType,
    pub monitoring: MonitoringState,
    /// `None` until the first power reading.
    pub power: Option<PowerSource>,
}

/// Cheap-to-clone handle to the shared state.
#[derive(Clone)]
pub struct SharedStateStore {
    tx: Arc<watch::Sender<SharedState>>,
}

impl SharedStateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SharedState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SharedState {
        *self.tx.borrow()
    }

    pub fn arm(&self) -> ArmType {
        self.tx.borrow().arm
    }

    pub fn monitoring(&self) -> MonitoringState {
        self.tx.borrow().monitoring
    }

    pub fn power(&self) -> Option<PowerSource> {
        self.tx.borrow().power
    }

    /// Sets the arm type. Returns true if it changed.
    pub fn set_arm(&self, arm: ArmType) -> bool {
        self.update(|s| &mut s.arm, arm)
    }

    /// Sets the monitoring state. Returns true if it changed.
    pub fn set_monitoring(&self, monitoring: MonitoringState) -> bool {
        self.update(|s| &mut s.monitoring, monitoring)
    }

    pub fn set_power(&self, power: PowerSource) -> bool {
        self.update(|s| &mut s.power, Some(power))
    }

    fn update<T, F>(&self, field: F, value: T) -> bool
    where
        T: PartialEq + std::fmt::Debug,
        F: FnOnce(&mut SharedState) -> &mut T,
    {
        self.tx.send_if_modified(|state| {
            let slot = field(state);
            if *slot == value {
                return false;
            }
            debug!(from = ?slot, to = ?value, "Shared state changed");
            *slot = value;
            true
        })
    }

    /// Receiver woken on every change.
    pub fn subscribe(&self) -> watch::Receiver<SharedState> {
        self.tx.subscribe()
    }
}

impl Default for SharedStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let store = SharedStateStore::new();
        let state = store.snapshot();
        assert_eq!(state.arm, ArmType::Disarm);
        assert_eq!(state.monitoring, MonitoringState::Startup);
        assert_eq!(state.power, None);
    }

    #[test]
    fn test_set_reports_change() {
        let store = SharedStateStore::new();
        assert!(store.set_arm(ArmType::Away));
        assert!(!store.set_arm(ArmType::Away));
        assert!(store.set_power(PowerSource::Battery));
        assert_eq!(store.power(), Some(PowerSource::Battery));
    }

    #[tokio::test]
    async fn test_subscriber_sees_changes() {
        let store = SharedStateStore::new();
        let mut rx = store.subscribe();

        let writer = store.clone();
        tokio::spawn(async move {
            writer.set_monitoring(MonitoringState::Ready);
        });

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().monitoring, MonitoringState::Ready);
    }
}
