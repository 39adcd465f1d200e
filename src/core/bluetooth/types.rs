//! Shared data structures for the Bluetooth module.

use log::debug;
use tokio::sync::broadcast;

use crate::core::bluetooth::session::SessionState;
use crate::error::BleError;

/// A peripheral identity observed during discovery.
///
/// Uniquely keyed by `address`; never mutated after creation. The registry
/// holds at most one entry per address no matter how often the peripheral
/// is rediscovered.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DiscoveredPeripheral {
    /// MAC address where the platform exposes one, otherwise the platform id.
    pub address: String,
    /// Platform-specific stable identifier (important on macOS, where the
    /// real MAC is hidden).
    pub id: String,
    /// Advertised name, if any.
    pub name: Option<String>,
    /// Signal strength at discovery time.
    pub rssi: Option<i16>,
}

impl DiscoveredPeripheral {
    pub fn new(address: String, id: String, name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            address,
            id,
            name,
            rssi,
        }
    }

    /// Name to show the operator: the advertised name, or the address when
    /// the peripheral advertises none.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Identity of one connection attempt. Minted per `connect` call; every
/// signal a session driver produces carries its id so that signals from a
/// superseded session can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Events delivered to the presentation layer.
///
/// Every state change and error produces exactly one event carrying a
/// human-readable status line, meant to overwrite (not append to) whatever
/// the consumer currently displays.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BleEvent {
    ScanStarted,
    ScanStopped,
    DeviceDiscovered { device: DiscoveredPeripheral },
    StateChanged { state: SessionState, status: String },
    PayloadReceived { text: String },
    Error { reason: BleError },
}

/// Fan-out handle for consumer events.
///
/// Radio callbacks arrive on worker tasks; everything they want the
/// presentation layer to see goes through here, which preserves arrival
/// order and keeps the consumer on its own side of the thread boundary.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<BleEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes a new consumer. Each receiver sees every event emitted
    /// after the point of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<BleEvent> {
        self.tx.subscribe()
    }

    /// Emits an event to all subscribers. A send error only means nobody is
    /// listening right now, which is not a fault.
    pub fn emit(&self, event: BleEvent) {
        if self.tx.send(event).is_err() {
            debug!("no event subscribers; dropping event");
        }
    }
}
