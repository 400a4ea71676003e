//! The Callback Client (C3): delivers a result payload to a caller-supplied
//! URL in a single attempt. Retrying across attempts is the Retrieval
//! Worker's job, driven by the state machine in §4.1/§4.7 of the design —
//! embedding a retry loop here was the anti-pattern this service's
//! predecessor had, and it's deliberately not repeated.

use std::time::Duration;

use serde_json::Value;

use crate::error::DeliveryError;
use crate::job::CallbackMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

pub struct CallbackClient {
    client: reqwest::Client,
}

impl CallbackClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Attempts exactly one delivery of `payload` to `url`. Non-POST
    /// methods are a pass-through: the spec models them as fire-and-forget
    /// notifications the client never actually contacts.
    pub async fn deliver(
        &self,
        url: &str,
        method: CallbackMethod,
        payload: &Value,
        request_timeout: Duration,
    ) -> (DeliveryOutcome, Option<String>) {
        if !method.is_post() {
            return (DeliveryOutcome::Delivered, None);
        }

        match self.post(url, payload, request_timeout).await {
            Ok(()) => (DeliveryOutcome::Delivered, None),
            Err(e) => (DeliveryOutcome::Failed, Some(e.message())),
        }
    }

    async fn post(
        &self,
        url: &str,
        payload: &Value,
        request_timeout: Duration,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .timeout(request_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| classify_transport_error(url, &e))?;

        if response.status().as_u16() == 200 {
            return Ok(());
        }

        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = extract_message(&body)
            .unwrap_or_else(|| format!("request failed with status {status}"));

        Err(DeliveryError::HttpStatus {
            url: url.to_owned(),
            status,
            message,
        })
    }
}

impl Default for CallbackClient {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_transport_error(url: &str, error: &reqwest::Error) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::Timeout {
            url: url.to_owned(),
        }
    } else {
        DeliveryError::Connection {
            url: url.to_owned(),
        }
    }
}

/// Extracts a human-readable error from a failed callback response body,
/// preferring a top-level `message`, falling back to `data.message`.
fn extract_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .or_else(|| {
            body.get("data")
                .and_then(|d| d.get("message"))
                .and_then(Value::as_str)
        })
        .map(str::to_owned)
}
