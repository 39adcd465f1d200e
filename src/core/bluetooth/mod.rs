//! Bluetooth functionality for the sensor bridge.
//! This module handles all bluetooth operations: scanning, connecting, and
//! receiving streamed data from the sensor peripheral.

mod constants;
mod link;
mod manager;
mod notification;
mod permission;
mod registry;
mod scanner;
mod session;
mod types;

// Re-export types that should be publicly accessible
pub use constants::*;
pub use link::{
    drive_session, BluestLink, EndpointOutcome, GattLink, GattProfile, MtuOutcome, SessionSignal,
};
pub use manager::{BluetoothManager, SessionHost};
pub use notification::{decode_payload, NotificationSubscription};
pub use permission::{Capability, OpenGate, PermissionGate};
pub use registry::DeviceRegistry;
pub use scanner::BleScanner;
pub use session::{ConnectionSession, LookupFailure, SessionEvent, SessionState};
pub use types::{BleEvent, DiscoveredPeripheral, EventSink, SessionId};
