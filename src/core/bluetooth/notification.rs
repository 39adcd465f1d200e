//! Notification payload handling.
//!
//! Once a session is ready, the peripheral pushes characteristic values as
//! notifications. Payloads are decoded best-effort and handed to the
//! consumer in arrival order, deliver-and-forget: no buffering or
//! backpressure beyond the single in-flight payload. A slow consumer may
//! miss values; that is a documented limitation, not a fault.

use log::warn;
use uuid::Uuid;

/// Binding of a characteristic to "notify enabled" status. Exists only
/// while the session is ready; invalidated as soon as the session leaves
/// that state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NotificationSubscription {
    /// The characteristic the subscription was written for.
    pub characteristic: Uuid,
    /// Whether the descriptor write reported success. An unconfirmed
    /// subscription still counts as attempted, but delivery is not
    /// guaranteed by the stack.
    pub confirmed: bool,
}

/// Decodes a notification payload into display text.
///
/// Decoding is best-effort and never fatal: the sensor firmware sends
/// UTF-8 readings such as `"23.5"`, and anything that is not valid text
/// degrades to an empty placeholder rather than failing the session.
pub fn decode_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => {
            warn!("non-text payload ({} bytes); showing placeholder", payload.len());
            String::new()
        }
    }
}
