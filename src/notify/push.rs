//! Push transport seam.
//!
//! The dispatcher talks to a `PushProvider` trait object; the production
//! implementation posts JSON to a configured HTTP endpoint with a bearer
//! key. Provider errors are classified as permanent (token must be
//! removed) or transient (worth retrying).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::PushConfig;

#[derive(Debug, Error)]
pub enum PushError {
    /// Invalid argument, unregistered token, invalid recipient: the token
    /// is dead and must be removed from the store.
    #[error("permanent push failure: {0}")]
    Permanent(String),

    /// Network faults, rate limits, provider 5xx: retry with backoff.
    #[error("transient push failure: {0}")]
    Transient(String),
}

impl PushError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, PushError::Permanent(_))
    }
}

/// One message addressed to one device token.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Whether sends should be attempted at all. A disabled provider lets
    /// the dispatcher degrade gracefully to the dashboard channel only.
    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, message: &PushMessage) -> Result<(), PushError>;

    /// One provider call for a batch (callers cap batches at the
    /// configured size). The default forwards to `send` per message.
    async fn send_batch(&self, batch: &[PushMessage]) -> Vec<Result<(), PushError>> {
        let mut results = Vec::with_capacity(batch.len());
        for message in batch {
            results.push(self.send(message).await);
        }
        results
    }
}

/// Production provider: posts one JSON document per message to the push
/// endpoint, authenticated with a bearer key.
pub struct HttpPushProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpPushProvider {
    pub fn new(config: &PushConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.send_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Map a provider error body to the retry classification. The error
    /// codes follow the messaging-provider convention.
    fn classify(status: reqwest::StatusCode, body: &str) -> PushError {
        let permanent_markers = ["INVALID_ARGUMENT", "UNREGISTERED", "INVALID_RECIPIENT"];
        if status == reqwest::StatusCode::NOT_FOUND
            || (status == reqwest::StatusCode::BAD_REQUEST
                && permanent_markers.iter().any(|m| body.contains(m)))
        {
            return PushError::Permanent(format!("{status}: {body}"));
        }
        PushError::Transient(format!("{status}: {body}"))
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        let payload = serde_json::json!({
            "to": message.token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| PushError::Transient(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::classify(status, &body))
    }
}

/// Provider used when push delivery is not configured: sends are skipped
/// and the dispatcher relies on the dashboard channel alone.
pub struct DisabledPushProvider;

#[async_trait]
impl PushProvider for DisabledPushProvider {
    fn enabled(&self) -> bool {
        false
    }

    async fn send(&self, _message: &PushMessage) -> Result<(), PushError> {
        Err(PushError::Transient("push delivery disabled".into()))
    }
}
