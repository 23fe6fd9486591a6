use super::{GatewayError, PaymentGateway, QrPayment, QrPaymentRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Payment the sandbox pretends the payer completed
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedCallback {
    pub payment_request_id: String,
    pub reference_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Clone)]
struct IssuedRequest {
    payment_request_id: String,
    reference_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// In-process gateway for development. Issues deterministic references
/// and, when a callback channel is attached, reports simulated payments on it.
///
/// A request is forgotten once it has been paid or has expired.
#[derive(Clone)]
pub struct SandboxGateway {
    default_expiry: chrono::Duration,
    issued: Arc<Mutex<HashMap<String, IssuedRequest>>>,
    callbacks: Option<mpsc::Sender<SimulatedCallback>>,
}

impl SandboxGateway {
    pub fn new(default_expiry: chrono::Duration) -> Self {
        Self {
            default_expiry,
            issued: Arc::new(Mutex::new(HashMap::new())),
            callbacks: None,
        }
    }

    pub fn with_callbacks(mut self, sender: mpsc::Sender<SimulatedCallback>) -> Self {
        self.callbacks = Some(sender);
        self
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn provider(&self) -> &'static str {
        "sandbox"
    }

    async fn create_qr_payment(
        &self,
        request: QrPaymentRequest,
    ) -> Result<QrPayment, GatewayError> {
        let expires_at = request
            .expires_at
            .unwrap_or_else(|| Utc::now() + self.default_expiry);
        let simple = request.reference_id.simple();
        let payment_request_id = format!("pr-sandbox-{}", simple);
        let payment_method_id = format!("pm-sandbox-{}", simple);

        {
            let mut issued = self.issued.lock().await;
            let now = Utc::now();
            issued.retain(|_, pending| pending.expires_at > now);
            issued.insert(
                payment_method_id.clone(),
                IssuedRequest {
                    payment_request_id: payment_request_id.clone(),
                    reference_id: request.reference_id,
                    expires_at,
                },
            );
        }

        info!(reference_id = %request.reference_id, "Sandbox payment request issued");

        Ok(QrPayment {
            qr_string: format!(
                "SANDBOX-QRIS|{}|{}|{}",
                request.reference_id,
                request.amount.normalize(),
                expires_at.timestamp()
            ),
            external_transaction_id: payment_request_id,
            payment_method_id,
            expires_at: Some(expires_at),
        })
    }

    async fn simulate_payment(
        &self,
        payment_method_id: &str,
        amount: Decimal,
    ) -> Result<(), GatewayError> {
        let issued = self
            .issued
            .lock()
            .await
            .get(payment_method_id)
            .filter(|pending| pending.expires_at > Utc::now())
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                status: 404,
                body: format!("payment method {} not found or expired", payment_method_id),
            })?;

        match &self.callbacks {
            Some(sender) => sender
                .send(SimulatedCallback {
                    payment_request_id: issued.payment_request_id,
                    reference_id: issued.reference_id,
                    amount,
                })
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))?,
            None => {
                warn!(payment_method_id, "Sandbox has no callback channel; simulated payment dropped");
            }
        }

        // One-time QR: once paid it cannot be paid again
        self.issued.lock().await.remove(payment_method_id);
        Ok(())
    }
}
