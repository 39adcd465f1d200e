//! Consumer-visible error taxonomy for the BLE bridge.
//!
//! A normal link drop (peripheral went away, or the user asked for a
//! disconnect) is not represented here; it surfaces as a `Disconnected`
//! state change instead.

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::Capability;

/// Errors reported to the consumer through [`crate::BleEvent::Error`] and
/// returned from manager commands.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BleError {
    /// The host has no BLE radio at all.
    #[error("no Bluetooth radio is present on this host")]
    RadioUnavailable,

    /// A radio exists but the adapter is powered off or not ready.
    #[error("the Bluetooth adapter is powered off")]
    RadioDisabled,

    /// The discovery stream failed to start or died. Already-discovered
    /// registry entries are kept; the user may retry scanning.
    #[error("BLE scan failed with code {code}")]
    ScanFailed { code: i32 },

    /// The permission gate refused the capability. Not retried.
    #[error("permission for {capability} was denied")]
    PermissionDenied { capability: Capability },

    /// The peripheral does not expose the well-known service.
    #[error("service {uuid} not found on the peripheral")]
    ServiceNotFound { uuid: Uuid },

    /// The well-known characteristic is missing from the service.
    #[error("characteristic {uuid} not found on the peripheral")]
    CharacteristicNotFound { uuid: Uuid },

    /// The client characteristic configuration descriptor is missing, so
    /// notifications cannot be enabled.
    #[error("descriptor {uuid} not found on the characteristic")]
    DescriptorNotFound { uuid: Uuid },

    /// A connect was requested for an identifier the registry has never seen.
    #[error("device {id} is not in the registry")]
    UnknownDevice { id: String },
}
