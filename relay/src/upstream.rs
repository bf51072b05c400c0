use crate::config::UpstreamConfig;
use crate::errors::RelayError;
use crate::mail::OutboundPayload;
use crate::metrics_defs::UPSTREAM_RESPONSES;
use serde::{Deserialize, Serialize};
use shared::counter;
use std::time::Duration;
use url::Url;

/// What the caller receives after a send: the provider's status and body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayedResponse {
    pub status: u16,
    pub response: serde_json::Value,
}

/// Posts payloads to the mail provider. No retries.
#[derive(Clone)]
pub struct UpstreamSender {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl UpstreamSender {
    pub fn new(config: &UpstreamConfig) -> Self {
        UpstreamSender {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Sends one payload and returns the provider's answer, whatever its status.
    ///
    /// The timeout covers the whole exchange, including reading the body. An
    /// empty body is relayed as JSON `null`.
    pub async fn send(&self, payload: &OutboundPayload) -> Result<RelayedResponse, RelayError> {
        let upstream_identifier = self.url.host_str().unwrap_or(self.url.as_str()).to_string();

        let response = self
            .client
            .post(self.url.clone())
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| map_client_error(&upstream_identifier, e))?;

        let status = response.status();
        counter!(UPSTREAM_RESPONSES, "status" => status.as_str().to_owned()).increment(1);

        let body = response
            .bytes()
            .await
            .map_err(|e| map_client_error(&upstream_identifier, e))?;

        let response = if body.iter().all(u8::is_ascii_whitespace) {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| RelayError::UpstreamResponseInvalid(e.to_string()))?
        };

        tracing::debug!(upstream = %upstream_identifier, status = %status, "Upstream responded");

        Ok(RelayedResponse {
            status: status.as_u16(),
            response,
        })
    }
}

fn map_client_error(upstream: &str, error: reqwest::Error) -> RelayError {
    if error.is_timeout() {
        RelayError::UpstreamTimeout(upstream.to_string())
    } else {
        RelayError::UpstreamRequestFailed(upstream.to_string(), error.to_string())
    }
}
