//! Core functionality of the bridge.

pub mod bluetooth;

pub use bluetooth::BluetoothManager;
