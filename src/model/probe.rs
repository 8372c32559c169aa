//! Connectivity probe for OpenAI-compatible model endpoints.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;

use crate::config::Configuration;

/// Default number of retry attempts for failed probes.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Default delay between retry attempts in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Per-request timeout of a probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe errors.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Credential rejected ({0})")]
    Unauthorized(StatusCode),
    #[error("API error {0}: {1}")]
    ApiError(StatusCode, String),
    #[error("Max retries exceeded after {0} attempts: {1}")]
    MaxRetriesExceeded(u32, String),
}

/// Outcome of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Models advertised by the endpoint; empty when it does not list any.
    pub models: Vec<String>,
    /// Whether the configured model is advertised (`None` if nothing was listed).
    pub model_listed: Option<bool>,
}

impl ProbeReport {
    pub fn summary(&self, model: &str) -> String {
        match self.model_listed {
            Some(true) => format!("Connection successful; model {} is available", model),
            Some(false) => format!(
                "Connection successful, but model {} is not among the {} advertised models",
                model,
                self.models.len()
            ),
            None => "Connection successful".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Checks that a configuration's endpoint answers with its credential.
pub struct ModelProbe {
    client: Client,
    max_retries: u32,
    retry_delay_secs: u64,
}

impl Default for ModelProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelProbe {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }

    /// Set the maximum number of retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between retry attempts in seconds.
    pub fn with_retry_delay(mut self, delay_secs: u64) -> Self {
        self.retry_delay_secs = delay_secs;
        self
    }

    /// `GET {base_url}/models` with the configured credential.
    pub async fn probe(&self, config: &Configuration) -> Result<ProbeReport, ProbeError> {
        let url = format!("{}/models", config.base_url.trim_end_matches('/'));
        let max_attempts = self.max_retries + 1;
        let mut last_error: Option<ProbeError> = None;

        for attempt in 1..=max_attempts {
            match self.send(&url, config).await {
                Ok(report) => return Ok(report),
                Err(e) if attempt < max_attempts && is_retryable(&e) => {
                    tracing::warn!(
                        "Probe failed (attempt {}/{}): {}; retrying in {}s",
                        attempt,
                        max_attempts,
                        e,
                        self.retry_delay_secs
                    );
                    sleep(Duration::from_secs(self.retry_delay_secs)).await;
                    last_error = Some(e);
                }
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        Err(ProbeError::MaxRetriesExceeded(
            max_attempts,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }

    async fn send(&self, url: &str, config: &Configuration) -> Result<ProbeReport, ProbeError> {
        tracing::debug!(url, api_key = %config.api_key, "Probing model endpoint");
        let response = self
            .client
            .get(url)
            .bearer_auth(config.api_key.expose())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProbeError::Unauthorized(status));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProbeError::ApiError(status, text));
        }

        let body = response.text().await?;
        Ok(report_from_body(&body, &config.model))
    }
}

fn report_from_body(body: &str, model: &str) -> ProbeReport {
    let models: Vec<String> = serde_json::from_str::<ModelList>(body)
        .map(|list| list.data.into_iter().map(|m| m.id).collect())
        .unwrap_or_default();
    let model_listed = (!models.is_empty()).then(|| models.iter().any(|m| m == model));
    ProbeReport {
        models,
        model_listed,
    }
}

/// Network errors, server errors and rate limits are worth retrying.
fn is_retryable(error: &ProbeError) -> bool {
    match error {
        ProbeError::RequestFailed(_) => true,
        ProbeError::ApiError(status, _) => {
            status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
        }
        ProbeError::Unauthorized(_) | ProbeError::MaxRetriesExceeded(_, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFields;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config_for(base_url: &str) -> Configuration {
        ConfigFields::default()
            .with_base_url(base_url)
            .with_model("m1")
            .with_api_key("test-key")
            .with_device_type("adb")
            .with_language("en")
            .validate()
            .unwrap()
    }

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (format!("http://{}/v1", addr), handle)
    }

    #[test]
    fn test_report_from_body() {
        let report = report_from_body(
            r#"{"object":"list","data":[{"id":"m1"},{"id":"m2"}]}"#,
            "m1",
        );
        assert_eq!(report.models, vec!["m1", "m2"]);
        assert_eq!(report.model_listed, Some(true));

        let report = report_from_body(r#"{"data":[{"id":"m2"}]}"#, "m1");
        assert_eq!(report.model_listed, Some(false));

        let report = report_from_body("not json", "m1");
        assert!(report.models.is_empty());
        assert_eq!(report.model_listed, None);
        assert_eq!(report.summary("m1"), "Connection successful");
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&ProbeError::ApiError(
            StatusCode::BAD_GATEWAY,
            String::new()
        )));
        assert!(is_retryable(&ProbeError::ApiError(
            StatusCode::TOO_MANY_REQUESTS,
            String::new()
        )));
        assert!(!is_retryable(&ProbeError::ApiError(
            StatusCode::NOT_FOUND,
            String::new()
        )));
        assert!(!is_retryable(&ProbeError::Unauthorized(StatusCode::UNAUTHORIZED)));
    }

    #[tokio::test]
    async fn test_probe_sends_bearer_credential() {
        let (base_url, server) = serve_once("200 OK", r#"{"data":[{"id":"m1"}]}"#).await;
        let config = config_for(&base_url);

        let report = ModelProbe::new().probe(&config).await.unwrap();
        assert_eq!(report.model_listed, Some(true));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /v1/models"));
        assert!(request.to_lowercase().contains("authorization: bearer test-key"));
    }

    #[tokio::test]
    async fn test_probe_reports_rejected_credential() {
        let (base_url, server) = serve_once("401 Unauthorized", r#"{"error":"bad key"}"#).await;
        let config = config_for(&base_url);

        let err = ModelProbe::new().with_max_retries(0).probe(&config).await.unwrap_err();
        assert!(matches!(err, ProbeError::Unauthorized(StatusCode::UNAUTHORIZED)));
        server.await.unwrap();
    }
}
