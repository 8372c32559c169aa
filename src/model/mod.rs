//! Model endpoint module: connectivity checks against the configured API.

mod probe;

pub use probe::{
    ModelProbe, ProbeError, ProbeReport, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS,
};
