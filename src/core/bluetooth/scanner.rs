//! Discovery lifecycle: owns the scan task and feeds the device registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{
    ADAPTER_WAIT_TIMEOUT_SECS, MIN_RSSI_THRESHOLD, SCAN_FAILED_START, SCAN_FAILED_STREAM_ENDED,
};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{BleEvent, DiscoveredPeripheral, EventSink};
use crate::error::BleError;

/// Controls BLE discovery and populates the device registry.
///
/// Scanning runs on its own task until cancelled. The registry is cleared
/// at the start of every scan session and seeded with already-connected
/// peripherals before any live advertisement arrives.
pub struct BleScanner {
    adapter: Adapter,
    registry: Arc<Mutex<DeviceRegistry>>,
    /// Platform device handles keyed by id, for later connect calls.
    handles: Arc<Mutex<HashMap<String, Device>>>,
    events: EventSink,
    cancel_token: CancellationToken,
    scan_task: Option<JoinHandle<()>>,
}

impl BleScanner {
    pub fn new(
        adapter: Adapter,
        registry: Arc<Mutex<DeviceRegistry>>,
        handles: Arc<Mutex<HashMap<String, Device>>>,
        events: EventSink,
    ) -> Self {
        Self {
            adapter,
            registry,
            handles,
            events,
            cancel_token: CancellationToken::new(),
            scan_task: None,
        }
    }

    /// Starts a new scan session.
    ///
    /// Fails with `RadioDisabled` when the adapter does not report itself
    /// powered within a bounded wait. Any scan already in flight is stopped
    /// first; the registry is cleared either way.
    pub async fn start_scan(&mut self) -> Result<(), BleError> {
        if self.scan_task.is_some() {
            self.stop_scan().await;
        }

        let available = tokio::time::timeout(
            Duration::from_secs(ADAPTER_WAIT_TIMEOUT_SECS),
            self.adapter.wait_available(),
        )
        .await;
        match available {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("adapter unavailable: {e}");
                return Err(BleError::RadioDisabled);
            }
            Err(_) => {
                warn!("adapter did not power up within {ADAPTER_WAIT_TIMEOUT_SECS}s");
                return Err(BleError::RadioDisabled);
            }
        }

        {
            self.registry.lock().unwrap().clear();
            self.handles.lock().unwrap().clear();
        }
        self.events.emit(BleEvent::ScanStarted);

        // Seed peripherals the platform already knows about, before live
        // results arrive, so a bonded sensor that is not advertising still
        // shows up.
        match self.adapter.connected_devices().await {
            Ok(devices) => {
                for device in devices {
                    Self::observe_device(&self.registry, &self.handles, &self.events, device, None)
                        .await;
                }
            }
            Err(e) => debug!("could not enumerate known devices: {e}"),
        }

        self.cancel_token = CancellationToken::new();
        let cancel = self.cancel_token.clone();
        let adapter = self.adapter.clone();
        let registry = self.registry.clone();
        let handles = self.handles.clone();
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            Self::scan_task(adapter, registry, handles, events, cancel).await;
        });
        self.scan_task = Some(task);
        info!("device scan task started");
        Ok(())
    }

    async fn scan_task(
        adapter: Adapter,
        registry: Arc<Mutex<DeviceRegistry>>,
        handles: Arc<Mutex<HashMap<String, Device>>>,
        events: EventSink,
        cancel: CancellationToken,
    ) {
        info!("starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("failed to start scan: {e}");
                events.emit(BleEvent::Error {
                    reason: BleError::ScanFailed {
                        code: SCAN_FAILED_START,
                    },
                });
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            let rssi = discovered.rssi;
                            debug!("advertisement from {:?}, rssi {:?}", discovered.device, rssi);
                            // Skip weak advertisements; a sensor that far
                            // away will not hold a link anyway.
                            if matches!(rssi, Some(signal) if signal < MIN_RSSI_THRESHOLD) {
                                continue;
                            }
                            Self::observe_device(&registry, &handles, &events, discovered.device, rssi)
                                .await;
                        }
                        None => {
                            // The platform killed the stream while a scan
                            // was still wanted. Discovered entries stay.
                            warn!("scan stream ended unexpectedly");
                            events.emit(BleEvent::Error {
                                reason: BleError::ScanFailed {
                                    code: SCAN_FAILED_STREAM_ENDED,
                                },
                            });
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    break;
                }
            }
        }
        info!("scan task finished");
    }

    /// Stops scanning. Idempotent; safe to call when no scan is running.
    pub async fn stop_scan(&mut self) {
        self.cancel_token.cancel();

        if let Some(task) = self.scan_task.take() {
            info!("waiting for scan task to finish");
            if let Err(e) = task.await {
                if e.is_cancelled() {
                    info!("scan task was cancelled");
                } else {
                    error!("scan task finished with a join error: {e:?}");
                }
            }
            self.events.emit(BleEvent::ScanStopped);
        } else {
            debug!("stop_scan called with no scan in flight");
        }
    }

    /// Records a device in the registry and, when it is new, announces it.
    async fn observe_device(
        registry: &Arc<Mutex<DeviceRegistry>>,
        handles: &Arc<Mutex<HashMap<String, Device>>>,
        events: &EventSink,
        device: Device,
        adv_rssi: Option<i16>,
    ) {
        let id = device.id().to_string();
        let name = device.name().ok();
        let rssi = match adv_rssi {
            Some(rssi) => Some(rssi),
            None => device.rssi().await.ok(),
        };
        let address = Self::extract_mac_address(&id).unwrap_or_else(|| id.clone());

        let peripheral = DiscoveredPeripheral::new(address, id.clone(), name, rssi);
        let inserted = {
            let mut registry = registry.lock().unwrap();
            registry.observe(peripheral.clone())
        };
        if !inserted {
            return;
        }

        handles.lock().unwrap().insert(id, device);
        info!(
            "found device {} ({}), rssi {:?}",
            peripheral.display_name(),
            peripheral.address,
            peripheral.rssi
        );
        events.emit(BleEvent::DeviceDiscovered { device: peripheral });
    }

    fn extract_mac_address(device_id: &str) -> Option<String> {
        let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap();
        re.find_iter(device_id)
            .last()
            .map(|m| m.as_str().to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_address_is_extracted_and_uppercased() {
        assert_eq!(
            BleScanner::extract_mac_address("hci0/dev_aa:bb:cc:dd:ee:01"),
            Some("AA:BB:CC:DD:EE:01".to_string())
        );
        assert_eq!(
            BleScanner::extract_mac_address("AA-BB-CC-DD-EE-02"),
            Some("AA-BB-CC-DD-EE-02".to_string())
        );
    }

    #[test]
    fn opaque_platform_ids_have_no_mac() {
        assert_eq!(
            BleScanner::extract_mac_address("6a2f9d55-4d47-4b7e-8d1a-000000000000"),
            None
        );
    }
}
