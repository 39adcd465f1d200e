//! The main interface for bluetooth operations.
//!
//! `BluetoothManager` owns the registry, the scanner, and a [`SessionHost`]
//! holding the single active connection session. Radio callbacks land on
//! worker tasks as [`SessionSignal`]s; the host's event loop is the only
//! place that mutates session state, and it applies a signal only after
//! checking that it belongs to the current session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bluest::{Adapter, Device};
use log::{debug, info};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{EVENT_CHANNEL_DEPTH, SIGNAL_CHANNEL_DEPTH};
use crate::core::bluetooth::link::{
    drive_session, BluestLink, GattLink, GattProfile, SessionSignal,
};
use crate::core::bluetooth::permission::{Capability, PermissionGate};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::scanner::BleScanner;
use crate::core::bluetooth::session::{ConnectionSession, SessionEvent, SessionState};
use crate::core::bluetooth::types::{BleEvent, DiscoveredPeripheral, EventSink, SessionId};
use crate::error::BleError;

/// Holder for the one active session. `id` identifies the session the slot
/// currently belongs to; signals tagged with any other id are stale and
/// must not touch the machine.
pub(crate) struct SessionSlot {
    pub(crate) id: Option<SessionId>,
    pub(crate) machine: Option<ConnectionSession>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl SessionSlot {
    fn empty() -> Self {
        Self {
            id: None,
            machine: None,
            cancel: CancellationToken::new(),
            driver: None,
        }
    }
}

/// Applies a driver signal to the slot, dropping it when it belongs to a
/// superseded session. Returns the consumer events the machine produced.
pub(crate) fn apply_signal(slot: &mut SessionSlot, signal: SessionSignal) -> Vec<BleEvent> {
    if slot.id != Some(signal.session) {
        debug!(
            "dropping stale signal from {} (current: {:?})",
            signal.session, slot.id
        );
        return Vec::new();
    }
    match slot.machine.as_mut() {
        Some(machine) => machine.apply(signal.event),
        None => Vec::new(),
    }
}

/// Owns the single active session: the slot, the signal channel, and the
/// event loop that applies signals to the machine.
///
/// The host enforces the one-session rule: `start_session` tears the
/// previous session down, link release included, before the new one is
/// installed and its driver may speak. It takes any [`GattLink`], which is
/// what keeps that sequence exercisable without a radio.
pub struct SessionHost {
    events: EventSink,
    signals_tx: mpsc::Sender<SessionSignal>,
    slot: Arc<AsyncMutex<SessionSlot>>,
    event_loop: JoinHandle<()>,
    next_session: u64,
}

impl SessionHost {
    pub fn new(events: EventSink) -> Self {
        let (signals_tx, mut signals_rx) = mpsc::channel::<SessionSignal>(SIGNAL_CHANNEL_DEPTH);
        let slot = Arc::new(AsyncMutex::new(SessionSlot::empty()));

        // The event loop is the thread-safety boundary: driver tasks report
        // on the signal channel, and only this task applies them, in
        // arrival order.
        let loop_slot = slot.clone();
        let loop_events = events.clone();
        let event_loop = tokio::spawn(async move {
            while let Some(signal) = signals_rx.recv().await {
                let mut slot = loop_slot.lock().await;
                for event in apply_signal(&mut slot, signal) {
                    loop_events.emit(event);
                }
            }
            debug!("session event loop ended");
        });

        Self {
            events,
            signals_tx,
            slot,
            event_loop,
            next_session: 0,
        }
    }

    /// State of the active session, if any.
    pub async fn session_state(&self) -> Option<SessionState> {
        let slot = self.slot.lock().await;
        slot.machine.as_ref().map(|m| m.state())
    }

    /// Starts a session over `link`, replacing any existing one.
    ///
    /// The previous session is torn down first; its driver has released
    /// its link by the time this returns, and no signal of the new session
    /// is applied before then. Two sessions never coexist.
    pub async fn start_session<L: GattLink>(&mut self, target: DiscoveredPeripheral, link: L) {
        self.teardown().await;

        self.next_session += 1;
        let session_id = SessionId(self.next_session);
        info!("{session_id}: connecting to {}", target.display_name());

        let mut machine = ConnectionSession::new(target);
        let begin_events = machine.begin();
        let cancel = CancellationToken::new();

        // The slot must own the new session before the driver can produce
        // its first signal, or that signal would be dropped as stale.
        {
            let mut slot = self.slot.lock().await;
            *slot = SessionSlot {
                id: Some(session_id),
                machine: Some(machine),
                cancel: cancel.clone(),
                driver: None,
            };
        }
        for event in begin_events {
            self.events.emit(event);
        }

        let driver = tokio::spawn(drive_session(
            link,
            session_id,
            GattProfile::default(),
            self.signals_tx.clone(),
            cancel,
        ));
        self.slot.lock().await.driver = Some(driver);
    }

    /// Cancels the current driver, waits for it to release the link, and
    /// marks the session disconnected. The driver closes the link on every
    /// exit path exactly once, so this never double-releases.
    pub async fn teardown(&mut self) {
        let driver = {
            let mut slot = self.slot.lock().await;
            let driver = slot.driver.take();
            if driver.is_some() {
                slot.cancel.cancel();
            }
            driver
        };
        // Awaiting outside the lock: the driver may still be delivering
        // signals, and the event loop needs the slot to process them.
        let Some(driver) = driver else { return };
        if let Err(e) = driver.await {
            if !e.is_cancelled() {
                debug!("session driver join error: {e:?}");
            }
        }

        let mut slot = self.slot.lock().await;
        if let Some(machine) = slot.machine.as_mut() {
            if !machine.state().is_terminal() {
                for event in machine.apply(SessionEvent::LinkDown) {
                    self.events.emit(event);
                }
            }
        }
        slot.id = None;
    }

    /// Stops the event loop. Call after the last teardown.
    pub fn shutdown(&self) {
        self.event_loop.abort();
    }
}

/// Manages bluetooth operations: discovery, the active session, and event
/// fan-out to the presentation layer.
pub struct BluetoothManager {
    adapter: Adapter,
    registry: Arc<Mutex<DeviceRegistry>>,
    handles: Arc<Mutex<HashMap<String, Device>>>,
    scanner: BleScanner,
    events: EventSink,
    gate: Arc<dyn PermissionGate>,
    host: SessionHost,
}

impl BluetoothManager {
    /// Creates a manager. Fails with `RadioUnavailable` when the host has
    /// no BLE radio at all.
    pub async fn new(gate: Arc<dyn PermissionGate>) -> Result<Self, BleError> {
        let adapter = Adapter::default()
            .await
            .ok_or(BleError::RadioUnavailable)?;
        info!("bluetooth adapter found");

        let registry = Arc::new(Mutex::new(DeviceRegistry::new()));
        let handles = Arc::new(Mutex::new(HashMap::new()));
        let events = EventSink::new(EVENT_CHANNEL_DEPTH);
        let scanner = BleScanner::new(
            adapter.clone(),
            registry.clone(),
            handles.clone(),
            events.clone(),
        );
        let host = SessionHost::new(events.clone());

        Ok(Self {
            adapter,
            registry,
            handles,
            scanner,
            events,
            gate,
            host,
        })
    }

    /// Subscribes to consumer events.
    pub fn events(&self) -> broadcast::Receiver<BleEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the registry, in first-seen order.
    pub fn devices(&self) -> Vec<DiscoveredPeripheral> {
        self.registry.lock().unwrap().all()
    }

    /// State of the active session, if any.
    pub async fn session_state(&self) -> Option<SessionState> {
        self.host.session_state().await
    }

    /// Begins a scan session.
    pub async fn start_scan(&mut self) -> Result<(), BleError> {
        self.gate
            .check(Capability::Scan)
            .await
            .map_err(|e| self.report(e))?;
        self.scanner
            .start_scan()
            .await
            .map_err(|e| self.report(e))
    }

    /// Stops scanning. Safe to call when no scan is running.
    pub async fn stop_scan(&mut self) {
        self.scanner.stop_scan().await;
    }

    /// Connects to a previously discovered device.
    ///
    /// Scanning is stopped first (an active GATT link and discovery compete
    /// for the radio), then the host replaces any existing session with the
    /// new one.
    pub async fn connect(&mut self, device_id: &str) -> Result<(), BleError> {
        self.gate
            .check(Capability::Connect)
            .await
            .map_err(|e| self.report(e))?;

        let device = self
            .handles
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .ok_or_else(|| {
                self.report(BleError::UnknownDevice {
                    id: device_id.to_string(),
                })
            })?;
        let target = self
            .registry
            .lock()
            .unwrap()
            .get_by_id(device_id)
            .cloned()
            .ok_or_else(|| {
                self.report(BleError::UnknownDevice {
                    id: device_id.to_string(),
                })
            })?;

        self.scanner.stop_scan().await;
        let link = BluestLink::new(self.adapter.clone(), device);
        self.host.start_session(target, link).await;
        Ok(())
    }

    /// Disconnects the active session. A no-op when none exists; calling it
    /// twice is safe.
    pub async fn disconnect(&mut self) {
        self.host.teardown().await;
    }

    /// Releases everything: scan task, active session, event loop.
    pub async fn shutdown(&mut self) {
        self.scanner.stop_scan().await;
        self.host.teardown().await;
        self.host.shutdown();
    }

    /// Reports a command failure on the event channel before returning it,
    /// so the status indicator and the caller see the same reason.
    fn report(&self, error: BleError) -> BleError {
        self.events.emit(BleEvent::Error {
            reason: error.clone(),
        });
        error
    }
}
