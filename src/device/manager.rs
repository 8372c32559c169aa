//! Device discovery and connection prechecks for ADB and HDC bridges.

use std::collections::BTreeMap;
use std::process::Command;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::config::DeviceType;

/// Default minimum interval between two device scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

static ADB_MODEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bmodel:(\S+)").unwrap());

/// Device scan errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to run `{tool}`: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{tool}` exited with {status}: {stderr}")]
    CommandFailed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Connection state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Connected,
    /// Seen by an earlier scan but missing from the latest one.
    Disconnected,
    Unauthorized,
    Offline,
    Unknown,
}

impl DeviceStatus {
    fn from_adb(state: &str) -> Self {
        match state {
            "device" => DeviceStatus::Connected,
            "unauthorized" => DeviceStatus::Unauthorized,
            "offline" => DeviceStatus::Offline,
            _ => DeviceStatus::Unknown,
        }
    }

    fn from_hdc(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "connected" => DeviceStatus::Connected,
            "unauthorized" => DeviceStatus::Unauthorized,
            "offline" => DeviceStatus::Offline,
            _ => DeviceStatus::Unknown,
        }
    }
}

/// Information about a discovered device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub status: DeviceStatus,
    pub device_type: DeviceType,
    pub model: Option<String>,
    pub last_check: DateTime<Local>,
}

/// Result of a connection precheck.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionCheck {
    pub connected: bool,
    pub message: String,
    pub device: Option<DeviceInfo>,
}

impl ConnectionCheck {
    fn ok(message: String, device: DeviceInfo) -> Self {
        Self {
            connected: true,
            message,
            device: Some(device),
        }
    }

    fn failed(message: String, device: Option<DeviceInfo>) -> Self {
        Self {
            connected: false,
            message,
            device,
        }
    }
}

/// Parse `adb devices -l` output.
pub fn parse_adb_devices(output: &str) -> Vec<DeviceInfo> {
    let now = Local::now();
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*')
        })
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device_id = parts.next()?;
            let state = parts.next()?;
            Some(DeviceInfo {
                device_id: device_id.to_string(),
                status: DeviceStatus::from_adb(state),
                device_type: DeviceType::Adb,
                model: ADB_MODEL.captures(line).map(|c| c[1].to_string()),
                last_check: now,
            })
        })
        .collect()
}

/// Parse `hdc list targets -v` output (plain `list targets` works too).
pub fn parse_hdc_targets(output: &str) -> Vec<DeviceInfo> {
    let now = Local::now();
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains("[Empty]"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let device_id = parts.first()?;
            let status = match parts.get(2) {
                Some(state) => DeviceStatus::from_hdc(state),
                None => DeviceStatus::Connected,
            };
            Some(DeviceInfo {
                device_id: device_id.to_string(),
                status,
                device_type: DeviceType::Hdc,
                model: None,
                last_check: now,
            })
        })
        .collect()
}

/// Scans devices of one bridge type and caches the results.
///
/// # Example
/// ```rust,no_run
/// use phone_agent_console::config::DeviceType;
/// use phone_agent_console::device::DeviceManager;
///
/// let mut manager = DeviceManager::new(DeviceType::Adb);
/// let check = manager.check_connection(None);
/// println!("{}", check.message);
/// ```
#[derive(Debug)]
pub struct DeviceManager {
    device_type: DeviceType,
    tool_path: String,
    devices: BTreeMap<String, DeviceInfo>,
    last_scan: Option<Instant>,
    scan_interval: Duration,
}

impl DeviceManager {
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            tool_path: device_type.as_str().to_string(),
            devices: BTreeMap::new(),
            last_scan: None,
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    /// Use a custom `adb`/`hdc` executable.
    pub fn with_tool_path(mut self, path: impl Into<String>) -> Self {
        self.tool_path = path.into();
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Scan for devices, reusing the cache when the last scan is recent.
    pub fn scan(&mut self, force_refresh: bool) -> Result<Vec<DeviceInfo>, DeviceError> {
        let fresh = self
            .last_scan
            .is_some_and(|at| at.elapsed() < self.scan_interval);
        if fresh && !force_refresh {
            return Ok(self.devices());
        }

        let output = self.run_listing()?;
        let found = match self.device_type {
            DeviceType::Adb => parse_adb_devices(&output),
            DeviceType::Hdc => parse_hdc_targets(&output),
        };
        self.apply_scan(found);
        Ok(self.devices())
    }

    /// Cached devices from the last scan.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.values().cloned().collect()
    }

    /// Merge a scan result into the cache; devices that vanished are kept as
    /// [`DeviceStatus::Disconnected`].
    fn apply_scan(&mut self, found: Vec<DeviceInfo>) {
        let now = Local::now();
        for device in self.devices.values_mut() {
            if !found.iter().any(|d| d.device_id == device.device_id) {
                if device.status != DeviceStatus::Disconnected {
                    tracing::info!(device_id = %device.device_id, "Device disconnected");
                }
                device.status = DeviceStatus::Disconnected;
                device.last_check = now;
            }
        }
        for device in found {
            self.devices.insert(device.device_id.clone(), device);
        }
        self.last_scan = Some(Instant::now());
    }

    fn run_listing(&self) -> Result<String, DeviceError> {
        let args: &[&str] = match self.device_type {
            DeviceType::Adb => &["devices", "-l"],
            DeviceType::Hdc => &["list", "targets", "-v"],
        };

        let output = Command::new(&self.tool_path)
            .args(args)
            .output()
            .map_err(|source| DeviceError::ToolUnavailable {
                tool: self.tool_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeviceError::CommandFailed {
                tool: self.tool_path.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Check whether `device_id` (or, when `None`, any device) is usable.
    pub fn check_connection(&mut self, device_id: Option<&str>) -> ConnectionCheck {
        let devices = match self.scan(true) {
            Ok(devices) => devices,
            Err(e) => return ConnectionCheck::failed(format!("Device scan failed: {}", e), None),
        };
        evaluate_connection(&devices, device_id)
    }

    /// IDs of connected devices.
    pub fn available_devices(&mut self) -> Result<Vec<String>, DeviceError> {
        Ok(self
            .scan(false)?
            .into_iter()
            .filter(|d| d.status == DeviceStatus::Connected)
            .map(|d| d.device_id)
            .collect())
    }

    /// One-line device status summary.
    pub fn summary(&mut self) -> String {
        match self.scan(false) {
            Ok(devices) => summarize(&devices),
            Err(e) => format!("❌ Device scan failed: {}", e),
        }
    }
}

fn evaluate_connection(devices: &[DeviceInfo], device_id: Option<&str>) -> ConnectionCheck {
    let present: Vec<&DeviceInfo> = devices
        .iter()
        .filter(|d| d.status != DeviceStatus::Disconnected)
        .collect();
    if present.is_empty() {
        return ConnectionCheck::failed("No devices detected".to_string(), None);
    }

    if let Some(id) = device_id {
        let Some(device) = present.iter().find(|d| d.device_id == id) else {
            return ConnectionCheck::failed(format!("Device {} is not connected", id), None);
        };
        let device = (*device).clone();
        return match device.status {
            DeviceStatus::Connected => {
                ConnectionCheck::ok(format!("Device {} is connected", id), device)
            }
            DeviceStatus::Unauthorized => ConnectionCheck::failed(
                format!("Device {} is unauthorized; allow USB debugging on the device", id),
                Some(device),
            ),
            DeviceStatus::Offline => {
                ConnectionCheck::failed(format!("Device {} is offline", id), Some(device))
            }
            _ => ConnectionCheck::failed(
                format!("Device {} is in an unknown state", id),
                Some(device),
            ),
        };
    }

    let count = |status: DeviceStatus| present.iter().filter(|d| d.status == status).count();
    if let Some(first) = present.iter().find(|d| d.status == DeviceStatus::Connected) {
        return ConnectionCheck::ok(
            format!(
                "{} device(s) available, using {}",
                count(DeviceStatus::Connected),
                first.device_id
            ),
            (*first).clone(),
        );
    }

    let unauthorized = count(DeviceStatus::Unauthorized);
    if unauthorized > 0 {
        return ConnectionCheck::failed(
            format!("{} unauthorized device(s); allow USB debugging on the device", unauthorized),
            None,
        );
    }
    let offline = count(DeviceStatus::Offline);
    if offline > 0 {
        return ConnectionCheck::failed(format!("{} offline device(s)", offline), None);
    }
    ConnectionCheck::failed(
        format!("{} device(s) detected but none is usable", present.len()),
        None,
    )
}

fn summarize(devices: &[DeviceInfo]) -> String {
    if devices.is_empty() {
        return "❌ No devices detected".to_string();
    }

    let count = |status: DeviceStatus| devices.iter().filter(|d| d.status == status).count();
    let parts: Vec<String> = [
        (DeviceStatus::Connected, "✅", "connected"),
        (DeviceStatus::Unauthorized, "🔒", "unauthorized"),
        (DeviceStatus::Offline, "📴", "offline"),
        (DeviceStatus::Disconnected, "❌", "disconnected"),
    ]
    .into_iter()
    .filter_map(|(status, emoji, label)| match count(status) {
        0 => None,
        n => Some(format!("{} {} {}", emoji, n, label)),
    })
    .collect();

    format!("📱 Devices: {}", parts.join(", "))
}
