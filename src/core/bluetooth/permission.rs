//! Permission gate collaborator.
//!
//! Scanning and connecting both require an external grant before the radio
//! may be touched. The gate is consulted once per command; a denial is
//! surfaced as `PermissionDenied` and never retried internally.

use async_trait::async_trait;

use crate::error::BleError;

/// Capabilities the gate can grant or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Scan,
    Connect,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Scan => write!(f, "scan"),
            Capability::Connect => write!(f, "connect"),
        }
    }
}

/// External authority over radio capabilities.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Checks whether `capability` may be used right now.
    async fn check(&self, capability: Capability) -> Result<(), BleError>;
}

/// Gate that grants everything. Suitable on desktop platforms, where the
/// operating system prompts the user on the bridge's behalf.
pub struct OpenGate;

#[async_trait]
impl PermissionGate for OpenGate {
    async fn check(&self, _capability: Capability) -> Result<(), BleError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyAll;

    #[async_trait]
    impl PermissionGate for DenyAll {
        async fn check(&self, capability: Capability) -> Result<(), BleError> {
            Err(BleError::PermissionDenied { capability })
        }
    }

    #[tokio::test]
    async fn open_gate_grants_everything() {
        assert!(OpenGate.check(Capability::Scan).await.is_ok());
        assert!(OpenGate.check(Capability::Connect).await.is_ok());
    }

    #[tokio::test]
    async fn denial_names_the_capability() {
        let err = DenyAll.check(Capability::Connect).await.unwrap_err();
        assert_eq!(
            err,
            BleError::PermissionDenied {
                capability: Capability::Connect
            }
        );
    }
}
