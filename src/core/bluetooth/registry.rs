//! Deduplicated, insertion-ordered collection of discovered peripherals.

use log::debug;

use crate::core::bluetooth::types::DiscoveredPeripheral;

/// Registry of peripherals seen during the current scan session.
///
/// Peripherals are keyed by address and kept in first-seen order. Repeat
/// observations of the same address are silently ignored, so advertising
/// bursts never produce duplicate list entries.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<DiscoveredPeripheral>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation. Returns `true` when the peripheral was new
    /// and inserted, `false` for a duplicate (in which case nothing changes).
    pub fn observe(&mut self, peripheral: DiscoveredPeripheral) -> bool {
        if self.entries.iter().any(|e| e.address == peripheral.address) {
            debug!("dropping duplicate observation of {}", peripheral.address);
            return false;
        }
        self.entries.push(peripheral);
        true
    }

    /// All known peripherals, in first-seen order.
    pub fn all(&self) -> Vec<DiscoveredPeripheral> {
        self.entries.clone()
    }

    /// Looks a peripheral up by its platform identifier.
    pub fn get_by_id(&self, id: &str) -> Option<&DiscoveredPeripheral> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Empties the registry. Called when a new scan session begins.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
