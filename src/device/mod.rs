//! Device module for ADB/HDC device discovery.

mod manager;

pub use manager::{
    parse_adb_devices, parse_hdc_targets, ConnectionCheck, DeviceError, DeviceInfo,
    DeviceManager, DeviceStatus, DEFAULT_SCAN_INTERVAL,
};
