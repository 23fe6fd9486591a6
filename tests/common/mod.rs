#![allow(dead_code)]

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use pos_api::{
    config::AppConfig,
    db,
    entities::product,
    events::{self, EventSender},
    gateway::{GatewayError, PaymentGateway, QrPayment, QrPaymentRequest},
    handlers::AppServices,
    services::products::{NewProduct, ProductService},
    AppState,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_TOKEN: &str = "test-callback-token-0123456789";
pub const WEBHOOK_HEADER: &str = "x-callback-token";

/// Gateway double whose failures can be switched on and off per test.
#[derive(Default)]
pub struct ScriptedGateway {
    fail: AtomicBool,
    created: AtomicUsize,
    simulated: AtomicUsize,
}

impl ScriptedGateway {
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn simulated_count(&self) -> usize {
        self.simulated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider(&self) -> &'static str {
        "scripted"
    }

    async fn create_qr_payment(&self, request: QrPaymentRequest) -> Result<QrPayment, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 503,
                body: "gateway offline".to_string(),
            });
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(QrPayment {
            external_transaction_id: format!("pr-test-{}", n),
            payment_method_id: format!("pm-test-{}", n),
            qr_string: format!("QR|{}|{}", request.reference_id, request.amount),
            expires_at: request.expires_at,
        })
    }

    async fn simulate_payment(
        &self,
        _payment_method_id: &str,
        _amount: Decimal,
    ) -> Result<(), GatewayError> {
        self.simulated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Configuration shared by the HTTP tests
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.payment_webhook_token = Some(WEBHOOK_TOKEN.to_string());
    cfg.payment_webhook_header = WEBHOOK_HEADER.to_string();
    cfg.payment_simulation_enabled = true;
    cfg
}

/// Same as [`test_config`] over an on-disk SQLite file, so the pool holds several
/// connections and concurrent requests really contend in the database.
pub fn file_backed_config(dir: &std::path::Path, connections: u32) -> AppConfig {
    let mut cfg = test_config();
    cfg.database_url = format!("sqlite://{}?mode=rwc", dir.join("pos-test.db").display());
    cfg.db_max_connections = connections;
    cfg.db_min_connections = connections;
    cfg
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let gateway = Arc::new(ScriptedGateway::default());
        Self::with_gateway(cfg, gateway.clone(), gateway).await
    }

    /// Builds the app around an arbitrary gateway; `scripted` is kept for call inspection.
    pub async fn with_gateway(
        cfg: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        scripted: Arc<ScriptedGateway>,
    ) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(events::EVENT_CHANNEL_CAPACITY);
        let (notifier, _) = broadcast::channel(events::NOTIFICATION_CHANNEL_CAPACITY);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx, notifier.clone()));

        let services = AppServices::new(db_arc.clone(), gateway, event_sender.clone(), &cfg);
        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            notifier,
            services,
        };

        Self {
            router: pos_api::app_router(state.clone()),
            state,
            gateway: scripted,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router with extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let body = body.map(|json| serde_json::to_vec(&json).expect("serialize request body"));
        self.request_raw(method, uri, body, headers).await
    }

    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(bytes) => {
                builder = builder.header("content-type", "application/json");
                Body::from(bytes)
            }
            None => Body::empty(),
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn get(&self, uri: &str) -> axum::response::Response {
        self.request(Method::GET, uri, None, &[]).await
    }

    pub async fn post(&self, uri: &str, body: Option<Value>) -> axum::response::Response {
        self.request(Method::POST, uri, body, &[]).await
    }

    /// Delivers a payment callback with the configured token
    pub async fn deliver_webhook(&self, body: Value) -> axum::response::Response {
        self.request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(body),
            &[(WEBHOOK_HEADER, WEBHOOK_TOKEN)],
        )
        .await
    }

    /// Catalogue access for arranging test data; the HTTP surface has no product routes
    pub fn products(&self) -> ProductService {
        ProductService::new(self.state.db.clone())
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        self.products()
            .create_product(NewProduct {
                name: name.to_string(),
                price,
                category: None,
                image_url: None,
            })
            .await
            .expect("seed product for tests")
    }

    /// Places an order through the API and returns the `data` payload
    pub async fn place_order(&self, items: &[(Uuid, i32)]) -> Value {
        let items: Vec<Value> = items
            .iter()
            .map(|(id, qty)| serde_json::json!({ "product_id": id, "quantity": qty }))
            .collect();
        let response = self
            .post("/api/v1/orders", Some(serde_json::json!({ "items": items })))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response_json(response).await["data"].clone()
    }

    pub async fn pay(&self, order_id: &str) -> axum::response::Response {
        self.deliver_webhook(success_callback(order_id)).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn success_callback(order_id: &str) -> Value {
    callback(order_id, "SUCCEEDED")
}

pub fn callback(order_id: &str, status: &str) -> Value {
    serde_json::json!({
        "event": "payment.succeeded",
        "data": {
            "id": format!("py-{}", Uuid::new_v4().simple()),
            "payment_request_id": "pr-test-1",
            "reference_id": order_id,
            "status": status,
            "created": Utc::now().to_rfc3339(),
        }
    })
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Decimal fields serialize as strings
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
