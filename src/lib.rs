//! senselink: a BLE central bridge for a streaming sensor peripheral.
//!
//! The bridge discovers nearby peripherals into a deduplicated registry,
//! drives a chosen one through connection, MTU negotiation, service
//! discovery, and notification subscription, then streams decoded readings
//! to the consumer until the link drops or teardown is requested.
//!
//! Presentation is deliberately out of scope: consumers send commands
//! through [`BluetoothManager`] and render the [`BleEvent`] stream however
//! they like.

pub mod core;
pub mod error;

pub use crate::core::bluetooth::{
    decode_payload, drive_session, BleEvent, BleScanner, BluestLink, BluetoothManager, Capability,
    ConnectionSession, DeviceRegistry, DiscoveredPeripheral, EndpointOutcome, EventSink, GattLink,
    GattProfile, LookupFailure, MtuOutcome, NotificationSubscription, OpenGate, PermissionGate,
    SessionEvent, SessionHost, SessionId, SessionSignal, SessionState,
};
pub use crate::error::BleError;
