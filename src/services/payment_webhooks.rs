//! Reconciles payment callbacks with order state.
//!
//! Deliveries are at-least-once and may arrive duplicated, reordered or
//! concurrently. Authentication runs before anything else is looked at, and the
//! only write is the repository's conditional `confirm_payment`.

use crate::{
    config::AppConfig,
    entities::OrderStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::SimulatedCallback,
    repositories::OrderRepository,
};
use chrono::Utc;
use http::HeaderMap;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Callback body sent by the payment processor
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentWebhookPayload {
    /// e.g. `payment.succeeded`
    pub event: String,
    pub data: PaymentWebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentWebhookData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub payment_request_id: Option<String>,
    /// The order id used as the payment request's reference
    pub reference_id: String,
    pub status: String,
}

/// Payment outcome after normalising the processor's vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Unrecognized(String),
}

impl PaymentOutcome {
    /// Case-insensitive; the processor has been seen sending `FAIlED`.
    pub fn normalize(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "SUCCEEDED" => PaymentOutcome::Succeeded,
            "FAILED" => PaymentOutcome::Failed,
            _ => PaymentOutcome::Unrecognized(upper),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// This delivery moved the order to `PROCESSING`
    Applied,
    /// The order was already paid; nothing changed
    AlreadyApplied,
    /// Non-success status; nothing changed
    Ignored,
}

impl WebhookOutcome {
    fn as_str(self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::AlreadyApplied => "already_applied",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Acknowledgement returned to the processor
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub outcome: WebhookOutcome,
    pub order_id: Uuid,
    pub order_status: OrderStatus,
    /// Status as received, for non-success deliveries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_status: Option<String>,
}

/// Shared-secret check for callback deliveries
#[derive(Clone)]
pub struct WebhookAuthenticator {
    header: String,
    token: Option<String>,
}

impl std::fmt::Debug for WebhookAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookAuthenticator")
            .field("header", &self.header)
            .field("token_configured", &self.token.is_some())
            .finish()
    }
}

impl WebhookAuthenticator {
    /// Surrounding whitespace in the configured token is ignored, matching config validation.
    pub fn new(header: impl Into<String>, token: Option<String>) -> Self {
        Self {
            header: header.into().trim().to_ascii_lowercase(),
            token: token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        }
    }

    /// Without a configured token nothing is accepted.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), ServiceError> {
        let expected = self.token.as_deref().ok_or_else(|| {
            ServiceError::Unauthorized("payment callback token is not configured".to_string())
        })?;
        let presented = headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing callback token".to_string()))?;

        if constant_time_eq(expected, presented) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized("invalid callback token".to_string()))
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

fn record(outcome: &'static str) {
    counter!("pos_payment_webhooks.total", 1, "outcome" => outcome);
}

#[derive(Clone)]
pub struct PaymentWebhookService {
    repository: OrderRepository,
    authenticator: WebhookAuthenticator,
    event_sender: Arc<EventSender>,
}

impl PaymentWebhookService {
    pub fn new(
        repository: OrderRepository,
        authenticator: WebhookAuthenticator,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            repository,
            authenticator,
            event_sender,
        }
    }

    pub fn from_config(
        repository: OrderRepository,
        config: &AppConfig,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self::new(
            repository,
            WebhookAuthenticator::new(
                config.payment_webhook_header.clone(),
                config.payment_webhook_token.clone(),
            ),
            event_sender,
        )
    }

    /// Full delivery path: authenticate, parse, then reconcile.
    #[instrument(skip_all)]
    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookAck, ServiceError> {
        if let Err(e) = self.authenticator.verify(headers) {
            warn!(error = %e, "Rejected payment callback");
            record("unauthorized");
            return Err(e);
        }

        let payload: PaymentWebhookPayload = serde_json::from_slice(body).map_err(|e| {
            record("malformed");
            ServiceError::BadRequest(format!("malformed payment callback: {}", e))
        })?;

        self.apply(payload).await
    }

    /// Reconciles an already authenticated callback.
    #[instrument(skip(self, payload), fields(event = %payload.event, reference_id = %payload.data.reference_id))]
    pub async fn apply(&self, payload: PaymentWebhookPayload) -> Result<WebhookAck, ServiceError> {
        let not_found = || {
            record("not_found");
            ServiceError::NotFound(format!("order {}", payload.data.reference_id))
        };
        let order_id = Uuid::parse_str(payload.data.reference_id.trim()).map_err(|_| not_found())?;
        let order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or_else(not_found)?;

        let outcome = PaymentOutcome::normalize(&payload.data.status);
        if outcome != PaymentOutcome::Succeeded {
            info!(status = %payload.data.status, "Non-success payment callback ignored");
            record(WebhookOutcome::Ignored.as_str());
            return Ok(WebhookAck {
                outcome: WebhookOutcome::Ignored,
                order_id,
                order_status: order.status,
                received_status: Some(payload.data.status),
            });
        }

        if let Some(amount) = payload.data.amount {
            if amount != order.grand_total {
                warn!(
                    order_id = %order_id,
                    amount = %amount,
                    grand_total = %order.grand_total,
                    "Callback amount differs from order total"
                );
            }
        }

        let paid_at = Utc::now();
        // Already past AWAITING_PAYMENT: acknowledge without touching the row
        let outcome = if !order.status.can_transition_to(OrderStatus::Processing) || order.is_paid() {
            info!(order_id = %order_id, status = %order.status, "Duplicate payment callback; order already paid");
            WebhookOutcome::AlreadyApplied
        } else if self.repository.confirm_payment(order_id, paid_at).await? {
            info!(order_id = %order_id, "Payment confirmed; order is processing");
            self.event_sender
                .send_or_log(Event::OrderPaid { order_id, paid_at })
                .await;
            WebhookOutcome::Applied
        } else {
            info!(order_id = %order_id, "Duplicate payment callback; order already paid");
            WebhookOutcome::AlreadyApplied
        };
        record(outcome.as_str());

        let order_status = match outcome {
            WebhookOutcome::Applied => OrderStatus::Processing,
            _ => self
                .repository
                .find_by_id(order_id)
                .await?
                .map(|o| o.status)
                .unwrap_or(order.status),
        };

        Ok(WebhookAck {
            outcome,
            order_id,
            order_status,
            received_status: None,
        })
    }
}

/// Feeds sandbox-simulated payments through the reconciler as successful callbacks
pub async fn forward_simulated_callbacks(
    service: PaymentWebhookService,
    mut rx: mpsc::Receiver<SimulatedCallback>,
) {
    while let Some(callback) = rx.recv().await {
        let payload = PaymentWebhookPayload {
            event: "payment.succeeded".to_string(),
            data: PaymentWebhookData {
                id: Some(format!("sim-{}", Uuid::new_v4().simple())),
                amount: Some(callback.amount),
                payment_request_id: Some(callback.payment_request_id),
                reference_id: callback.reference_id.to_string(),
                status: "SUCCEEDED".to_string(),
            },
        };
        if let Err(e) = service.apply(payload).await {
            warn!(order_id = %callback.reference_id, error = %e, "Simulated payment callback failed");
        }
    }
}
