//! The radio link seam and the session driver.
//!
//! [`GattLink`] abstracts the per-connection radio operations so the driver
//! and state machine can be exercised against a scripted link in tests.
//! [`BluestLink`] is the production implementation over `bluest`.
//!
//! The driver performs the happy-path sequence of link operations and
//! translates each outcome into a [`SessionSignal`] on the manager's signal
//! channel. It never touches session state itself: the state machine is the
//! sole authority, and it runs on the manager's event loop.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Descriptor, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    CLIENT_CHARACTERISTIC_CONFIG_UUID, DEFAULT_ATT_MTU, ENABLE_NOTIFICATION_VALUE,
    NOTIFY_CHANNEL_DEPTH, SENSOR_DATA_CHAR_UUID, SENSOR_SERVICE_UUID, TARGET_MTU,
};
use crate::core::bluetooth::session::{LookupFailure, SessionEvent};
use crate::core::bluetooth::types::SessionId;

/// The well-known GATT handles a session needs on the peripheral.
#[derive(Debug, Clone, Copy)]
pub struct GattProfile {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub descriptor: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: SENSOR_SERVICE_UUID,
            characteristic: SENSOR_DATA_CHAR_UUID,
            descriptor: CLIENT_CHARACTERISTIC_CONFIG_UUID,
        }
    }
}

/// Result of an MTU exchange: the size the stack settled on, and whether
/// the requested increase was actually granted.
#[derive(Debug, Clone, Copy)]
pub struct MtuOutcome {
    pub mtu: u16,
    pub granted: bool,
}

/// Outcome of resolving the well-known GATT handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointOutcome {
    /// Service, characteristic, and descriptor all present.
    Resolved,
    /// A well-known handle was missing. Terminal for the session.
    Missing(LookupFailure),
    /// The link died mid-discovery. Treated as a normal drop.
    LinkLost,
}

/// One peripheral link, from open to release.
///
/// Implementations own the underlying handles exclusively; `close` must be
/// safe to call more than once so every driver exit path can release the
/// link without coordination.
#[async_trait]
pub trait GattLink: Send + 'static {
    /// Opens the link. An error means the peripheral dropped or refused
    /// before the handshake completed.
    async fn open(&mut self) -> Result<()>;

    /// Requests an MTU increase to `target` and reports what the stack
    /// settled on. Never fails: refusal is an outcome, not an error.
    async fn exchange_mtu(&mut self, target: u16) -> MtuOutcome;

    /// Discovers services and resolves the profile's well-known handles.
    async fn resolve_endpoints(&mut self, profile: &GattProfile) -> EndpointOutcome;

    /// Writes the enable-notifications value to the configuration
    /// descriptor. `Ok(confirmed)` reports whether the write succeeded; an
    /// error means the link is gone.
    async fn enable_notifications(&mut self) -> Result<bool>;

    /// Starts notification delivery. The receiver yields payloads in
    /// arrival order and closes when the link drops.
    async fn notifications(&mut self) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Releases the link. Idempotent; a second call is a no-op.
    async fn close(&mut self);
}

/// A session event tagged with the identity of the session that produced
/// it, so a superseded driver can never mutate the current session.
#[derive(Debug, Clone)]
pub struct SessionSignal {
    pub session: SessionId,
    pub event: SessionEvent,
}

/// Drives one link through the session sequence, reporting every outcome as
/// a signal. Selects on `cancel` at every await point; on every exit path,
/// cancellation included, the link is closed exactly once before returning.
pub async fn drive_session<L: GattLink>(
    mut link: L,
    session: SessionId,
    profile: GattProfile,
    signals: mpsc::Sender<SessionSignal>,
    cancel: CancellationToken,
) {
    run_phases(&mut link, session, &profile, &signals, &cancel).await;
    link.close().await;
    debug!("{session}: driver finished, link released");
}

async fn run_phases<L: GattLink>(
    link: &mut L,
    session: SessionId,
    profile: &GattProfile,
    signals: &mpsc::Sender<SessionSignal>,
    cancel: &CancellationToken,
) {
    let send = |event: SessionEvent| {
        let signals = signals.clone();
        async move {
            if signals.send(SessionSignal { session, event }).await.is_err() {
                debug!("{session}: signal channel closed");
            }
        }
    };

    // Open the link. A refusal here is a normal drop, not an error.
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        result = link.open() => result,
    };
    match opened {
        Ok(()) => send(SessionEvent::LinkUp).await,
        Err(e) => {
            info!("{session}: peripheral dropped before handshake completed: {e}");
            send(SessionEvent::LinkDown).await;
            return;
        }
    }

    // MTU is best effort; the outcome is reported either way.
    let outcome = tokio::select! {
        _ = cancel.cancelled() => return,
        outcome = link.exchange_mtu(TARGET_MTU) => outcome,
    };
    send(SessionEvent::MtuExchanged {
        mtu: outcome.mtu,
        granted: outcome.granted,
    })
    .await;

    // Resolve the well-known handles.
    let endpoints = tokio::select! {
        _ = cancel.cancelled() => return,
        outcome = link.resolve_endpoints(profile) => outcome,
    };
    match endpoints {
        EndpointOutcome::Resolved => send(SessionEvent::EndpointsResolved).await,
        EndpointOutcome::Missing(failure) => {
            send(SessionEvent::LookupFailed(failure)).await;
            return;
        }
        EndpointOutcome::LinkLost => {
            send(SessionEvent::LinkDown).await;
            return;
        }
    }

    // Enable notifications via the configuration descriptor.
    let confirmed = tokio::select! {
        _ = cancel.cancelled() => return,
        result = link.enable_notifications() => result,
    };
    match confirmed {
        Ok(confirmed) => send(SessionEvent::SubscriptionResult { confirmed }).await,
        Err(e) => {
            info!("{session}: link lost while enabling notifications: {e}");
            send(SessionEvent::LinkDown).await;
            return;
        }
    }

    // Steady state: pump payloads until the link drops or teardown.
    let mut payloads = match link.notifications().await {
        Ok(rx) => rx,
        Err(e) => {
            info!("{session}: could not start notification delivery: {e}");
            send(SessionEvent::LinkDown).await;
            return;
        }
    };
    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => return,
            payload = payloads.recv() => payload,
        };
        match payload {
            Some(bytes) => send(SessionEvent::Payload(bytes)).await,
            None => {
                send(SessionEvent::LinkDown).await;
                return;
            }
        }
    }
}

/// Production link over `bluest`.
pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    notify_char: Option<Characteristic>,
    config_descriptor: Option<Descriptor>,
    released: bool,
}

impl BluestLink {
    pub fn new(adapter: Adapter, device: Device) -> Self {
        Self {
            adapter,
            device,
            notify_char: None,
            config_descriptor: None,
            released: false,
        }
    }
}

#[async_trait]
impl GattLink for BluestLink {
    async fn open(&mut self) -> Result<()> {
        if !self.device.is_connected().await {
            info!("initiating connection to {}", self.device.id());
            self.adapter.connect_device(&self.device).await?;
        }
        Ok(())
    }

    async fn exchange_mtu(&mut self, target: u16) -> MtuOutcome {
        // bluest exposes no explicit MTU request verb; the platform stack
        // negotiates on its own during connection. Report the baseline and
        // let the session proceed with whatever the stack settled on.
        info!(
            "MTU request to {target} delegated to the platform stack for {}",
            self.device.id()
        );
        MtuOutcome {
            mtu: DEFAULT_ATT_MTU,
            granted: false,
        }
    }

    async fn resolve_endpoints(&mut self, profile: &GattProfile) -> EndpointOutcome {
        let services = match self.device.discover_services().await {
            Ok(services) => services,
            Err(e) => {
                warn!("service discovery on {} failed: {e}", self.device.id());
                return EndpointOutcome::LinkLost;
            }
        };

        let service = match services.iter().find(|s| s.uuid() == profile.service) {
            Some(service) => service.clone(),
            None => {
                for service in &services {
                    info!("available service: {}", service.uuid());
                }
                return EndpointOutcome::Missing(LookupFailure::Service);
            }
        };
        info!("found sensor service {}", service.uuid());

        let characteristics = match service.discover_characteristics().await {
            Ok(characteristics) => characteristics,
            Err(e) => {
                warn!("characteristic discovery failed: {e}");
                return EndpointOutcome::LinkLost;
            }
        };
        let characteristic = match characteristics
            .iter()
            .find(|c| c.uuid() == profile.characteristic)
        {
            Some(characteristic) => characteristic.clone(),
            None => return EndpointOutcome::Missing(LookupFailure::Characteristic),
        };
        info!("found data characteristic {}", characteristic.uuid());

        let descriptors = match characteristic.discover_descriptors().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!("descriptor discovery failed: {e}");
                return EndpointOutcome::LinkLost;
            }
        };
        let descriptor = match descriptors.iter().find(|d| d.uuid() == profile.descriptor) {
            Some(descriptor) => descriptor.clone(),
            None => return EndpointOutcome::Missing(LookupFailure::Descriptor),
        };

        self.notify_char = Some(characteristic);
        self.config_descriptor = Some(descriptor);
        EndpointOutcome::Resolved
    }

    async fn enable_notifications(&mut self) -> Result<bool> {
        let descriptor = self
            .config_descriptor
            .as_ref()
            .ok_or_else(|| anyhow!("endpoints not resolved"))?;
        match descriptor.write(&ENABLE_NOTIFICATION_VALUE).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("configuration descriptor write not confirmed: {e}");
                Ok(false)
            }
        }
    }

    async fn notifications(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        let characteristic = self
            .notify_char
            .clone()
            .ok_or_else(|| anyhow!("endpoints not resolved"))?;
        let (tx, rx) = mpsc::channel(NOTIFY_CHANNEL_DEPTH);

        // The bluest notify stream borrows the characteristic, so it is
        // pumped from its own task; dropping the sender closes the receiver
        // and the driver reads that as a link drop.
        tokio::spawn(async move {
            match characteristic.notify().await {
                Ok(mut stream) => {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(value) => {
                                if tx.send(value).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("notification stream error: {e}");
                                break;
                            }
                        }
                    }
                }
                Err(e) => error!("failed to subscribe to notifications: {e}"),
            }
            info!("notification stream ended");
        });

        Ok(rx)
    }

    async fn close(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.notify_char = None;
        self.config_descriptor = None;
        if self.device.is_connected().await {
            info!("disconnecting from {}", self.device.id());
            if let Err(e) = self.adapter.disconnect_device(&self.device).await {
                error!("disconnect of {} failed: {e}", self.device.id());
            }
        }
    }
}
