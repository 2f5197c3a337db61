//! Per-order push dispatch.
//!
//! Loads the subscribers following an order, builds one independently
//! encrypted request per subscriber, POSTs it to the subscriber's push
//! service, and batch-deletes subscriptions the service reports gone.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tavolo_types::{PushError, VapidConfig};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto;
use crate::encrypt;
use crate::message;
use crate::store::{PushSubscription, SubscriptionStore};
use crate::vapid::VapidSigner;

/// A dispatch request: which order changed and how to describe it.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub order_id: String,
    /// Order status; selects the title/body from the status table.
    pub status: Option<String>,
    /// Caller override for the notification title.
    pub custom_title: Option<String>,
    /// Caller override for the notification body.
    pub custom_body: Option<String>,
}

/// Per-order dispatch counters returned to the caller.
///
/// Individual subscriber outcomes are never surfaced; the caller treats
/// dispatch as fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Subscribers that acknowledged delivery (2xx).
    pub sent: usize,
    /// Subscribers attempted.
    pub total: usize,
}

/// Outcome of a single subscriber delivery. Only `Gone` feeds back into
/// the store.
#[derive(Debug)]
enum SendOutcome {
    /// 2xx from the push service.
    Delivered,
    /// 404/410: the push service has invalidated the subscription, which
    /// must be deleted regardless of its expiry.
    Gone,
    /// Anything else, including network and encryption failures. The
    /// subscription may still work on a future dispatch; no retry, no
    /// deletion.
    Failed(String),
}

/// Orchestrates VAPID signing, per-message encryption and delivery for
/// one subscription store.
#[derive(Debug)]
pub struct PushDispatcher<S> {
    store: S,
    signer: VapidSigner,
    client: reqwest::Client,
}

impl<S: SubscriptionStore> PushDispatcher<S> {
    /// Build a dispatcher around a store and VAPID key material.
    ///
    /// Fails with [`PushError::Config`] if the key material is invalid;
    /// `timeout` bounds every outbound push request.
    pub fn new(store: S, vapid: &VapidConfig, timeout: Duration) -> Result<Self, PushError> {
        let signer = VapidSigner::from_config(vapid)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            store,
            signer,
            client,
        })
    }

    /// Send the order-status notification to every active subscriber of
    /// the order.
    ///
    /// Per-subscriber failures never abort the remaining subscribers;
    /// only input, store, and configuration problems fail the call.
    pub async fn dispatch(&self, req: &DispatchRequest) -> Result<DispatchOutcome, PushError> {
        if req.order_id.trim().is_empty() {
            return Err(PushError::Input("orderId is required".into()));
        }

        let subscriptions = self.store.find_active_by_order(&req.order_id)?;
        if subscriptions.is_empty() {
            debug!(order_id = %req.order_id, "no active subscriptions, nothing to send");
            return Ok(DispatchOutcome { sent: 0, total: 0 });
        }

        let payload = message::build_payload(
            &req.order_id,
            req.status.as_deref(),
            req.custom_title.as_deref(),
            req.custom_body.as_deref(),
        );
        let payload_bytes = serde_json::to_vec(&payload)
            .map_err(|e| PushError::Input(format!("failed to serialize payload: {e}")))?;

        let now = unix_now()?;
        let total = subscriptions.len();
        let mut sent = 0;
        let mut gone: Vec<Uuid> = Vec::new();

        for sub in &subscriptions {
            match self.send_one(sub, &payload_bytes, now).await {
                SendOutcome::Delivered => sent += 1,
                SendOutcome::Gone => {
                    info!(id = %sub.id, "subscription gone at push service, scheduling removal");
                    gone.push(sub.id);
                }
                SendOutcome::Failed(reason) => {
                    warn!(id = %sub.id, %reason, "push delivery failed, skipping subscriber");
                }
            }
        }

        if !gone.is_empty() {
            self.store.delete_by_ids(&gone)?;
        }

        info!(order_id = %req.order_id, sent, total, "dispatch complete");
        Ok(DispatchOutcome { sent, total })
    }

    /// Build and deliver one encrypted request.
    ///
    /// All failures fold into the returned outcome; nothing here aborts
    /// the dispatch loop.
    async fn send_one(&self, sub: &PushSubscription, payload: &[u8], now: u64) -> SendOutcome {
        let authorization = match self.signer.authorization_header(&sub.endpoint, now) {
            Ok(header) => header,
            Err(e) => return SendOutcome::Failed(e.to_string()),
        };

        let keys = match crypto::derive_message_keys(&sub.p256dh, &sub.auth) {
            Ok(keys) => keys,
            Err(e) => return SendOutcome::Failed(e.to_string()),
        };

        let ciphertext = match encrypt::encrypt_payload(payload, &keys.cek, &keys.nonce) {
            Ok(ciphertext) => ciphertext,
            Err(e) => return SendOutcome::Failed(e.to_string()),
        };

        let body = encrypt::frame_body(&keys.salt, &keys.server_public, &ciphertext);

        let response = self
            .client
            .post(&sub.endpoint)
            .header("Authorization", authorization)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Encoding", "aes128gcm")
            .header("TTL", "3600")
            .header("Urgency", "high")
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) => classify_status(resp.status().as_u16()),
            Err(e) => SendOutcome::Failed(format!("request failed: {e}")),
        }
    }
}

/// Map a push service response status to a delivery outcome.
fn classify_status(status: u16) -> SendOutcome {
    match status {
        200..=299 => SendOutcome::Delivered,
        404 | 410 => SendOutcome::Gone,
        other => SendOutcome::Failed(format!("push service returned HTTP {other}")),
    }
}

fn unix_now() -> Result<u64, PushError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| PushError::Crypto(format!("system time error: {e}")))
}
