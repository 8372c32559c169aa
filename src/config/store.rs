//! In-memory configuration store with all-or-nothing validation.

use std::env;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use thiserror::Error;
use url::Url;

use super::types::{ApiKey, Configuration, DeviceType, Language, DEFAULT_MAX_STEPS};

/// Default model API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.parasail.io/v1";

/// Default model name.
pub const DEFAULT_MODEL: &str = "parasail-auto-glm-9b-multilingual";

/// Configuration field names, as reported in validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    BaseUrl,
    Model,
    ApiKey,
    DeviceType,
    Language,
    MaxSteps,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::BaseUrl => "base_url",
            Field::Model => "model",
            Field::ApiKey => "api_key",
            Field::DeviceType => "device_type",
            Field::Language => "language",
            Field::MaxSteps => "max_steps",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rejected field and the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: Field,
    pub reason: String,
}

/// Rejected configuration update. Names every offending field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {}", format_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    /// Names of the offending fields, in declaration order.
    pub fn fields(&self) -> Vec<Field> {
        self.issues.iter().map(|i| i.field).collect()
    }
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{} {}", i.field, i.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Raw, unvalidated configuration input as typed by the user.
#[derive(Debug, Clone, Default)]
pub struct ConfigFields {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub device_type: String,
    /// Blank means "first connected device".
    pub device_id: String,
    pub language: String,
    /// Blank means [`DEFAULT_MAX_STEPS`].
    pub max_steps: String,
}

impl ConfigFields {
    /// Read the `PHONE_AGENT_*` environment variables.
    ///
    /// Everything except the API key falls back to a default; a missing key
    /// stays blank so that validation rejects it.
    pub fn from_env() -> Self {
        let var =
            |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.to_string());

        Self {
            base_url: var("PHONE_AGENT_BASE_URL", DEFAULT_BASE_URL),
            model: var("PHONE_AGENT_MODEL", DEFAULT_MODEL),
            api_key: var("PHONE_AGENT_API_KEY", ""),
            device_type: var("PHONE_AGENT_DEVICE_TYPE", DeviceType::Adb.as_str()),
            device_id: var("PHONE_AGENT_DEVICE_ID", ""),
            language: var("PHONE_AGENT_LANG", Language::Cn.as_code()),
            max_steps: var("PHONE_AGENT_MAX_STEPS", ""),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: impl Into<String>) -> Self {
        self.max_steps = max_steps.into();
        self
    }

    /// Validate every field, collecting all issues before failing.
    pub fn validate(&self) -> Result<Configuration, ValidationError> {
        let mut issues = Vec::new();
        let mut reject = |field, reason: &str| {
            issues.push(FieldIssue {
                field,
                reason: reason.to_string(),
            })
        };

        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            reject(Field::BaseUrl, "must not be empty");
        } else if !is_well_formed_url(base_url) {
            reject(Field::BaseUrl, "must be an http(s) URL with a host");
        }

        let model = self.model.trim();
        if model.is_empty() {
            reject(Field::Model, "must not be empty");
        }

        let api_key = self.api_key.trim();
        if api_key.is_empty() {
            reject(Field::ApiKey, "must not be empty");
        }

        let device_type = self.device_type.parse::<DeviceType>().ok();
        if device_type.is_none() {
            reject(Field::DeviceType, "must be one of: adb, hdc");
        }

        let language = self.language.parse::<Language>().ok();
        if language.is_none() {
            reject(Field::Language, "must be one of: cn, en");
        }

        let max_steps = match self.max_steps.trim() {
            "" => Some(DEFAULT_MAX_STEPS),
            raw => raw.parse::<u32>().ok().filter(|n| *n > 0),
        };
        if max_steps.is_none() {
            reject(Field::MaxSteps, "must be a positive integer");
        }

        match (device_type, language, max_steps) {
            (Some(device_type), Some(language), Some(max_steps)) if issues.is_empty() => {
                let device_id = self.device_id.trim();
                Ok(Configuration {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    model: model.to_string(),
                    api_key: ApiKey::new(api_key),
                    device_type,
                    device_id: (!device_id.is_empty()).then(|| device_id.to_string()),
                    language,
                    max_steps,
                })
            }
            _ => Err(ValidationError { issues }),
        }
    }
}

fn is_well_formed_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

/// Snapshot handed out by [`ConfigStore::current`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSnapshot {
    /// No configuration has been accepted yet.
    Unconfigured,
    Configured(Arc<Configuration>),
}

impl ConfigSnapshot {
    pub fn is_configured(&self) -> bool {
        matches!(self, ConfigSnapshot::Configured(_))
    }

    pub fn configuration(&self) -> Option<&Arc<Configuration>> {
        match self {
            ConfigSnapshot::Configured(config) => Some(config),
            ConfigSnapshot::Unconfigured => None,
        }
    }
}

/// Holds the active configuration for one controller process.
///
/// Not persisted; a restart starts [`ConfigSnapshot::Unconfigured`].
#[derive(Debug, Default)]
pub struct ConfigStore {
    active: RwLock<Option<Arc<Configuration>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `fields` and, only if every field passes, replace the active
    /// configuration.
    pub fn update(&self, fields: &ConfigFields) -> Result<Arc<Configuration>, ValidationError> {
        let config = match fields.validate() {
            Ok(config) => Arc::new(config),
            Err(e) => {
                tracing::warn!("Configuration rejected: {}", e);
                return Err(e);
            }
        };

        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        *active = Some(config.clone());

        tracing::info!(
            base_url = %config.base_url,
            model = %config.model,
            api_key = %config.api_key,
            device_type = %config.device_type,
            language = %config.language,
            "Configuration updated"
        );
        Ok(config)
    }

    /// Current configuration snapshot.
    pub fn current(&self) -> ConfigSnapshot {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        match active.as_ref() {
            Some(config) => ConfigSnapshot::Configured(config.clone()),
            None => ConfigSnapshot::Unconfigured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_fields() -> ConfigFields {
        ConfigFields::default()
            .with_base_url("https://api.example.com/v1")
            .with_model("m1")
            .with_api_key("k")
            .with_device_type("adb")
            .with_language("en")
    }

    #[test]
    fn test_update_accepts_valid_fields() {
        let store = ConfigStore::new();
        assert_eq!(store.current(), ConfigSnapshot::Unconfigured);

        let config = store.update(&valid_fields()).unwrap();
        assert_eq!(config.base_url, "https://api.example.com/v1");
        assert_eq!(config.model, "m1");
        assert_eq!(config.api_key.expose(), "k");
        assert_eq!(config.device_type, DeviceType::Adb);
        assert_eq!(config.language, Language::En);
        assert_eq!(config.device_id, None);
        assert_eq!(config.max_steps, DEFAULT_MAX_STEPS);

        assert_eq!(store.current(), ConfigSnapshot::Configured(config));
    }

    #[test]
    fn test_update_trims_input() {
        let store = ConfigStore::new();
        let config = store
            .update(
                &valid_fields()
                    .with_base_url(" http://localhost:8000/v1/ ")
                    .with_device_id(" 192.168.1.100:5555 ")
                    .with_max_steps("50"),
            )
            .unwrap();

        assert_eq!(config.base_url, "http://localhost:8000/v1");
        assert_eq!(config.device_id.as_deref(), Some("192.168.1.100:5555"));
        assert_eq!(config.max_steps, 50);
    }

    #[test]
    fn test_invalid_updates_leave_store_untouched() {
        let store = ConfigStore::new();
        let accepted = store.update(&valid_fields()).unwrap();

        let invalid = [
            (valid_fields().with_base_url(""), Field::BaseUrl),
            (valid_fields().with_base_url("not a url"), Field::BaseUrl),
            (valid_fields().with_base_url("ftp://example.com"), Field::BaseUrl),
            (valid_fields().with_model("   "), Field::Model),
            (valid_fields().with_api_key(""), Field::ApiKey),
            (valid_fields().with_device_type("ios"), Field::DeviceType),
            (valid_fields().with_language("fr"), Field::Language),
            (valid_fields().with_max_steps("0"), Field::MaxSteps),
            (valid_fields().with_max_steps("many"), Field::MaxSteps),
        ];

        for (fields, field) in invalid {
            let err = store.update(&fields).unwrap_err();
            assert_eq!(err.fields(), vec![field]);
            assert_eq!(store.current(), ConfigSnapshot::Configured(accepted.clone()));
        }
    }

    #[test]
    fn test_validation_names_every_bad_field() {
        let store = ConfigStore::new();
        let fields = ConfigFields::default().with_device_type("adb").with_language("cn");

        let err = store.update(&fields).unwrap_err();
        assert_eq!(err.fields(), vec![Field::BaseUrl, Field::Model, Field::ApiKey]);
        assert!(err.to_string().contains("base_url must not be empty"));
        assert_eq!(store.current(), ConfigSnapshot::Unconfigured);
    }

    #[test]
    fn test_rejected_key_is_not_echoed() {
        let err = valid_fields()
            .with_api_key("super-secret-key")
            .with_language("xx")
            .validate()
            .unwrap_err();
        assert!(!err.to_string().contains("super-secret-key"));
    }

    #[test]
    fn test_snapshot_accessors() {
        let store = ConfigStore::new();
        assert!(!store.current().is_configured());
        assert!(store.current().configuration().is_none());

        store.update(&valid_fields()).unwrap();
        let snapshot = store.current();
        assert!(snapshot.is_configured());
        assert_eq!(snapshot.configuration().unwrap().model, "m1");
    }
}
