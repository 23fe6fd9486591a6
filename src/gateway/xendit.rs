use super::{GatewayError, PaymentGateway, QrPayment, QrPaymentRequest};
use crate::config::AppConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const PAYMENT_REQUESTS_PATH: &str = "/payment_requests";

/// Connection settings for the Xendit Payment Request API
#[derive(Clone)]
pub struct XenditConfig {
    pub base_url: String,
    pub secret_key: String,
    pub currency: String,
    pub channel_code: String,
    pub default_expiry: chrono::Duration,
    pub timeout: Duration,
}

impl std::fmt::Debug for XenditConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XenditConfig")
            .field("base_url", &self.base_url)
            .field("secret_key", &"<redacted>")
            .field("currency", &self.currency)
            .field("channel_code", &self.channel_code)
            .field("default_expiry", &self.default_expiry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TryFrom<&AppConfig> for XenditConfig {
    type Error = GatewayError;

    fn try_from(cfg: &AppConfig) -> Result<Self, Self::Error> {
        let secret_key = cfg
            .xendit_secret_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| GatewayError::Configuration("xendit_secret_key is not set".into()))?;

        Ok(Self {
            base_url: cfg.xendit_base_url.trim_end_matches('/').to_string(),
            secret_key,
            currency: cfg.currency.clone(),
            channel_code: cfg.qr_channel_code.clone(),
            default_expiry: cfg.payment_request_expiry(),
            timeout: cfg.gateway_timeout(),
        })
    }
}

#[derive(Debug, Serialize)]
struct CreatePaymentRequestBody<'a> {
    currency: &'a str,
    amount: f64,
    reference_id: String,
    payment_method: PaymentMethodBody<'a>,
}

#[derive(Debug, Serialize)]
struct PaymentMethodBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    reusability: &'static str,
    reference_id: String,
    qr_code: QrCodeBody<'a>,
}

#[derive(Debug, Serialize)]
struct QrCodeBody<'a> {
    channel_code: &'a str,
    channel_properties: QrChannelPropertiesBody,
}

#[derive(Debug, Serialize)]
struct QrChannelPropertiesBody {
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PaymentRequestResponse {
    id: String,
    payment_method: PaymentMethodResponse,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodResponse {
    id: String,
    qr_code: Option<QrCodeResponse>,
}

#[derive(Debug, Deserialize)]
struct QrCodeResponse {
    channel_properties: Option<QrChannelPropertiesResponse>,
}

#[derive(Debug, Deserialize)]
struct QrChannelPropertiesResponse {
    qr_string: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct SimulatePaymentBody {
    amount: f64,
}

/// HTTP adapter for Xendit QR payment requests
#[derive(Clone)]
pub struct XenditGateway {
    client: reqwest::Client,
    config: XenditConfig,
}

impl XenditGateway {
    pub fn new(config: XenditConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn amount_as_number(amount: Decimal) -> Result<f64, GatewayError> {
        amount
            .to_f64()
            .ok_or_else(|| GatewayError::Configuration(format!("amount {} out of range", amount)))
    }

    async fn reject(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(status, body = %body, "Xendit rejected request");
        GatewayError::Rejected { status, body }
    }
}

#[async_trait]
impl PaymentGateway for XenditGateway {
    fn provider(&self) -> &'static str {
        "xendit"
    }

    #[instrument(skip(self, request), fields(reference_id = %request.reference_id, amount = %request.amount))]
    async fn create_qr_payment(
        &self,
        request: QrPaymentRequest,
    ) -> Result<QrPayment, GatewayError> {
        let expires_at = request
            .expires_at
            .unwrap_or_else(|| Utc::now() + self.config.default_expiry);
        let reference_id = request.reference_id.to_string();

        let body = CreatePaymentRequestBody {
            currency: &self.config.currency,
            amount: Self::amount_as_number(request.amount)?,
            reference_id: reference_id.clone(),
            payment_method: PaymentMethodBody {
                kind: "QR_CODE",
                reusability: "ONE_TIME_USE",
                reference_id,
                qr_code: QrCodeBody {
                    channel_code: &self.config.channel_code,
                    channel_properties: QrChannelPropertiesBody { expires_at },
                },
            },
        };

        let url = format!("{}{}", self.config.base_url, PAYMENT_REQUESTS_PATH);
        debug!(url = %url, "Creating Xendit payment request");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.secret_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Xendit payment request failed");
                GatewayError::from(e)
            })?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let payload: PaymentRequestResponse = response.json().await?;
        let channel = payload
            .payment_method
            .qr_code
            .and_then(|qr| qr.channel_properties);
        let (qr_string, issued_expiry) = match channel {
            Some(props) => (props.qr_string, props.expires_at),
            None => (None, None),
        };
        let qr_string = qr_string.ok_or_else(|| {
            GatewayError::Decode("payment_method.qr_code.channel_properties.qr_string missing".into())
        })?;

        info!(
            payment_request_id = %payload.id,
            payment_method_id = %payload.payment_method.id,
            "Xendit payment request created"
        );

        Ok(QrPayment {
            external_transaction_id: payload.id,
            payment_method_id: payload.payment_method.id,
            qr_string,
            expires_at: issued_expiry.or(Some(expires_at)),
        })
    }

    #[instrument(skip(self))]
    async fn simulate_payment(
        &self,
        payment_method_id: &str,
        amount: Decimal,
    ) -> Result<(), GatewayError> {
        let url = format!(
            "{}/v2/payment_methods/{}/payments/simulate",
            self.config.base_url, payment_method_id
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.secret_key, Some(""))
            .json(&SimulatePaymentBody {
                amount: Self::amount_as_number(amount)?,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        info!(payment_method_id, "Xendit payment simulation accepted");
        Ok(())
    }
}
