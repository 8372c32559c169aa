//! Configuration module for the phone agent console.

mod store;
mod types;

pub use store::{
    ConfigFields, ConfigSnapshot, ConfigStore, Field, FieldIssue, ValidationError,
    DEFAULT_BASE_URL, DEFAULT_MODEL,
};
pub use types::{ApiKey, Configuration, DeviceType, Language, DEFAULT_MAX_STEPS};
