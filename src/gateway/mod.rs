//! Payment gateway boundary.
//!
//! The order service only talks to [`PaymentGateway`]; the concrete adapter is chosen
//! from configuration at startup and injected as `Arc<dyn PaymentGateway>`.

mod sandbox;
mod xendit;

pub use sandbox::{SandboxGateway, SimulatedCallback};
pub use xendit::{XenditConfig, XenditGateway};

use crate::config::AppConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by gateway adapters
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(String),

    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected gateway response: {0}")]
    Decode(String),

    #[error("gateway misconfigured: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// One-time QR payment request for a single order
#[derive(Debug, Clone, PartialEq)]
pub struct QrPaymentRequest {
    pub amount: Decimal,
    /// Correlation key echoed back by the payment callback
    pub reference_id: Uuid,
    /// Falls back to the adapter's default lifetime when absent
    pub expires_at: Option<DateTime<Utc>>,
}

/// What the gateway hands back for a QR payment request
#[derive(Debug, Clone, PartialEq)]
pub struct QrPayment {
    pub external_transaction_id: String,
    pub payment_method_id: String,
    /// Payload to render as a scannable code
    pub qr_string: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short provider name used in logs
    fn provider(&self) -> &'static str;

    async fn create_qr_payment(&self, request: QrPaymentRequest)
        -> Result<QrPayment, GatewayError>;

    /// Asks the provider to act as if the payer completed the payment.
    /// The outcome is still reported through the payment callback.
    async fn simulate_payment(
        &self,
        payment_method_id: &str,
        amount: Decimal,
    ) -> Result<(), GatewayError>;
}

/// Builds the gateway selected by `payment_provider`
pub fn build_gateway(config: &AppConfig) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
    match config.payment_provider.to_ascii_lowercase().as_str() {
        "xendit" => {
            let gateway = XenditGateway::new(XenditConfig::try_from(config)?)?;
            Ok(Arc::new(gateway))
        }
        "sandbox" => Ok(Arc::new(SandboxGateway::new(config.payment_request_expiry()))),
        other => Err(GatewayError::Configuration(format!(
            "unknown payment provider '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn sandbox_is_the_default_provider() {
        let gateway = build_gateway(&config()).unwrap();
        assert_eq!(gateway.provider(), "sandbox");
    }

    #[test]
    fn xendit_without_key_is_a_configuration_error() {
        let mut cfg = config();
        cfg.payment_provider = "xendit".into();
        assert!(matches!(
            build_gateway(&cfg),
            Err(GatewayError::Configuration(_))
        ));

        cfg.xendit_secret_key = Some("xnd_development_secret".into());
        assert_eq!(build_gateway(&cfg).unwrap().provider(), "xendit");
    }
}
