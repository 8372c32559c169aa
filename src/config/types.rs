//! Validated configuration values shared by the store and the agent.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Default maximum number of agent steps per task.
pub const DEFAULT_MAX_STEPS: u32 = 100;

/// Device bridge used by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Android Debug Bridge.
    Adb,
    /// HarmonyOS Device Connector.
    Hdc,
}

impl DeviceType {
    /// Get the wire code for the device type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Adb => "adb",
            DeviceType::Hdc => "hdc",
        }
    }
}

impl FromStr for DeviceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adb" => Ok(DeviceType::Adb),
            "hdc" => Ok(DeviceType::Hdc),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language the agent reasons and reports in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cn,
    En,
}

impl Language {
    /// Get the language code ("cn" or "en").
    pub fn as_code(&self) -> &'static str {
        match self {
            Language::Cn => "cn",
            Language::En => "en",
        }
    }
}

impl FromStr for Language {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cn" => Ok(Language::Cn),
            "en" => Ok(Language::En),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Model API credential.
///
/// `Debug`, `Display` and `Serialize` only ever show the masked form; use
/// [`ApiKey::expose`] where the raw value has to leave the process.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw credential value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Masked form keeping at most the first and last four characters.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len().max(3));
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.masked())
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.masked())
    }
}

/// A validated configuration. Only [`super::ConfigStore`] builds these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    /// Model API base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Model API key
    pub api_key: ApiKey,
    /// Device bridge
    pub device_type: DeviceType,
    /// Target device ID; `None` lets the agent pick the first connected one
    pub device_id: Option<String>,
    /// Language code
    pub language: Language,
    /// Maximum steps for agent
    pub max_steps: u32,
}
