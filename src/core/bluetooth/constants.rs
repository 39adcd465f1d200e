//! Constants used throughout the bridge.
//! Well-known identifiers are agreed out-of-band with the sensor firmware;
//! the rest are tuning values for the radio plumbing.

use uuid::Uuid;

/// The UUID of the sensor service exposed by the peripheral firmware.
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// The UUID of the streaming data characteristic within the sensor service.
pub const SENSOR_DATA_CHAR_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Standard client characteristic configuration descriptor (CCCD) UUID.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Value written to the CCCD to enable notification delivery.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// MTU size requested once the link comes up. Best effort; many peripherals
/// ignore the request and the session proceeds regardless.
pub const TARGET_MTU: u16 = 100;

/// Baseline ATT MTU assumed when the stack reports nothing better.
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Advertisements weaker than this are dropped before they reach the registry.
pub const MIN_RSSI_THRESHOLD: i16 = -90;

/// How long to wait for the adapter to report itself powered before a scan
/// fails with `RadioDisabled`.
pub const ADAPTER_WAIT_TIMEOUT_SECS: u64 = 5;

/// Buffer depth of the notification payload channel between the radio task
/// and the session driver.
pub const NOTIFY_CHANNEL_DEPTH: usize = 32;

/// Buffer depth of the consumer event channel.
pub const EVENT_CHANNEL_DEPTH: usize = 64;

/// Buffer depth of the session signal channel feeding the event loop.
pub const SIGNAL_CHANNEL_DEPTH: usize = 64;

/// Scan failure code used when the discovery stream could not be started.
pub const SCAN_FAILED_START: i32 = 1;

/// Scan failure code used when the platform ended the discovery stream on
/// its own while a scan was still wanted.
pub const SCAN_FAILED_STREAM_ENDED: i32 = 2;
