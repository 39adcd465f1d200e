//! The BLE connection state machine.
//!
//! A session walks one peripheral through a linear happy path, with every
//! forward transition gated on an asynchronous report from the radio stack:
//!
//! ```text
//! Idle -> Connecting -> MtuNegotiating -> DiscoveringServices
//!      -> EnablingNotifications -> Ready -> Disconnected
//! ```
//!
//! plus a terminal `Failed` edge for lookup failures. There is no
//! synchronous success path; every stack report is modeled as a
//! [`SessionEvent`] fed into a single transition function. Reports that do
//! not fit the current state are logged and dropped rather than trusted.

use log::{debug, info, warn};

use crate::core::bluetooth::constants::{
    CLIENT_CHARACTERISTIC_CONFIG_UUID, SENSOR_DATA_CHAR_UUID, SENSOR_SERVICE_UUID,
};
use crate::core::bluetooth::notification::{decode_payload, NotificationSubscription};
use crate::core::bluetooth::types::{BleEvent, DiscoveredPeripheral};
use crate::error::BleError;

/// States of the session. `Disconnected` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Connecting,
    MtuNegotiating,
    DiscoveringServices,
    EnablingNotifications,
    Ready,
    Disconnected,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }
}

/// Which well-known handle was missing during GATT lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    Service,
    Characteristic,
    Descriptor,
}

impl LookupFailure {
    fn into_error(self) -> BleError {
        match self {
            LookupFailure::Service => BleError::ServiceNotFound {
                uuid: SENSOR_SERVICE_UUID,
            },
            LookupFailure::Characteristic => BleError::CharacteristicNotFound {
                uuid: SENSOR_DATA_CHAR_UUID,
            },
            LookupFailure::Descriptor => BleError::DescriptorNotFound {
                uuid: CLIENT_CHARACTERISTIC_CONFIG_UUID,
            },
        }
    }
}

/// Reports from the radio stack, as translated by the session driver.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The link came up.
    LinkUp,
    /// The link dropped, or the peripheral refused the connection. Legal at
    /// any point and never an error: peripherals legitimately reject bonds.
    LinkDown,
    /// MTU negotiation settled. `granted` reports whether the peripheral
    /// honored the request; the session advances either way.
    MtuExchanged { mtu: u16, granted: bool },
    /// The well-known service, characteristic, and descriptor were all found.
    EndpointsResolved,
    /// One of the well-known handles was missing.
    LookupFailed(LookupFailure),
    /// The descriptor write returned. `confirmed` reports whether it
    /// succeeded; either way the subscription counts as attempted.
    SubscriptionResult { confirmed: bool },
    /// A notification payload arrived.
    Payload(Vec<u8>),
}

/// The single active connection attempt.
///
/// Exclusively owned by the manager's session slot; at most one exists at a
/// time. The negotiated fields are cleared when the link drops, but the
/// target identity is preserved for display.
#[derive(Debug)]
pub struct ConnectionSession {
    target: DiscoveredPeripheral,
    state: SessionState,
    mtu: Option<u16>,
    subscription: Option<NotificationSubscription>,
    last_error: Option<BleError>,
}

impl ConnectionSession {
    /// Creates a session for `target`, still idle. Call [`Self::begin`] to
    /// move it to `Connecting` once the link open has been requested.
    pub fn new(target: DiscoveredPeripheral) -> Self {
        Self {
            target,
            state: SessionState::Idle,
            mtu: None,
            subscription: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &DiscoveredPeripheral {
        &self.target
    }

    pub fn mtu(&self) -> Option<u16> {
        self.mtu
    }

    pub fn subscription(&self) -> Option<&NotificationSubscription> {
        self.subscription.as_ref()
    }

    pub fn last_error(&self) -> Option<&BleError> {
        self.last_error.as_ref()
    }

    /// Marks the connection attempt as started.
    pub fn begin(&mut self) -> Vec<BleEvent> {
        if self.state != SessionState::Idle {
            warn!("begin() called in state {:?}; ignoring", self.state);
            return Vec::new();
        }
        self.enter(
            SessionState::Connecting,
            format!("Connecting to {}...", self.target.display_name()),
        )
    }

    /// Feeds one stack report into the machine and returns the consumer
    /// events it produced. Reports that do not fit the current state are
    /// logged and dropped.
    pub fn apply(&mut self, event: SessionEvent) -> Vec<BleEvent> {
        if self.state.is_terminal() {
            debug!("ignoring {:?} in terminal state {:?}", event, self.state);
            return Vec::new();
        }

        match (self.state, event) {
            // A link drop is always legal and always terminal. Negotiated
            // fields are cleared; the target identity is kept for display.
            (_, SessionEvent::LinkDown) => {
                self.mtu = None;
                self.subscription = None;
                self.enter(
                    SessionState::Disconnected,
                    format!("Disconnected from {}.", self.target.display_name()),
                )
            }

            (SessionState::Connecting, SessionEvent::LinkUp) => self.enter(
                SessionState::MtuNegotiating,
                format!(
                    "Connected to {}. Requesting MTU...",
                    self.target.display_name()
                ),
            ),

            // MTU negotiation is best effort: the session proceeds with
            // whatever the stack settled on, even when the request was
            // refused.
            (SessionState::MtuNegotiating, SessionEvent::MtuExchanged { mtu, granted }) => {
                self.mtu = Some(mtu);
                let status = if granted {
                    format!("MTU updated to {mtu}. Discovering services...")
                } else {
                    "Failed to update MTU. Discovering services...".to_string()
                };
                self.enter(SessionState::DiscoveringServices, status)
            }

            (SessionState::DiscoveringServices, SessionEvent::EndpointsResolved) => self.enter(
                SessionState::EnablingNotifications,
                "Services discovered. Enabling notifications...".to_string(),
            ),

            (SessionState::DiscoveringServices, SessionEvent::LookupFailed(failure)) => {
                self.fail(failure.into_error())
            }

            (SessionState::EnablingNotifications, SessionEvent::SubscriptionResult { confirmed }) => {
                self.subscription = Some(NotificationSubscription {
                    characteristic: SENSOR_DATA_CHAR_UUID,
                    confirmed,
                });
                let status = if confirmed {
                    "Notifications enabled. Waiting for data...".to_string()
                } else {
                    "Subscription attempted but not confirmed. Waiting for data...".to_string()
                };
                self.enter(SessionState::Ready, status)
            }

            // Steady state: each payload is decoded and forwarded, the
            // session stays ready.
            (SessionState::Ready, SessionEvent::Payload(bytes)) => {
                let text = decode_payload(&bytes);
                debug!("payload in session with {}: {:?}", self.target.address, text);
                vec![BleEvent::PayloadReceived { text }]
            }

            (state, event) => {
                warn!("ignoring out-of-order {:?} in state {:?}", event, state);
                Vec::new()
            }
        }
    }

    fn enter(&mut self, state: SessionState, status: String) -> Vec<BleEvent> {
        info!(
            "session with {}: {:?} -> {:?}",
            self.target.address, self.state, state
        );
        self.state = state;
        vec![BleEvent::StateChanged { state, status }]
    }

    fn fail(&mut self, reason: BleError) -> Vec<BleEvent> {
        let status = reason.to_string();
        self.last_error = Some(reason.clone());
        let mut events = self.enter(SessionState::Failed, status);
        events.push(BleEvent::Error { reason });
        events
    }
}
