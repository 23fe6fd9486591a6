mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{callback, response_json, success_callback, TestApp, WEBHOOK_HEADER, WEBHOOK_TOKEN};
use futures::future::join_all;
use pos_api::{
    gateway::SandboxGateway,
    services::payment_webhooks::forward_simulated_callbacks,
};
use rust_decimal_macros::dec;
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

async fn unpaid_order(app: &TestApp) -> String {
    let product = app.seed_product("Nasi Goreng", dec!(10000)).await;
    let created = app.place_order(&[(product.id, 1)]).await;
    created["order"]["id"].as_str().unwrap().to_string()
}

async fn payment_status(app: &TestApp, order_id: &str) -> Value {
    let response = app
        .get(&format!("/api/v1/orders/{}/payment-status", order_id))
        .await;
    response_json(response).await["data"].clone()
}

#[tokio::test]
async fn callbacks_without_a_valid_token_change_nothing() {
    let app = TestApp::new().await;
    let order_id = unpaid_order(&app).await;
    let body = serde_json::to_vec(&success_callback(&order_id)).unwrap();

    let cases: Vec<(Vec<u8>, Vec<(&str, &str)>)> = vec![
        (body.clone(), vec![]),
        (body.clone(), vec![(WEBHOOK_HEADER, "not-the-token-at-all")]),
        (body.clone(), vec![(WEBHOOK_HEADER, "")]),
        (b"{not json".to_vec(), vec![]),
        (b"{not json".to_vec(), vec![(WEBHOOK_HEADER, "wrong")]),
    ];

    for (body, headers) in cases {
        let response = app
            .request_raw(Method::POST, "/api/v1/payments/webhook", Some(body), &headers)
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let status = payment_status(&app, &order_id).await;
    assert_eq!(status["paid"], false);
    assert_eq!(status["status"], "AWAITING_PAYMENT");
}

#[tokio::test]
async fn callbacks_are_refused_when_no_token_is_configured() {
    let mut cfg = common::test_config();
    cfg.payment_webhook_token = None;
    let app = TestApp::with_config(cfg).await;
    let order_id = unpaid_order(&app).await;

    let response = app.pay(&order_id).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(payment_status(&app, &order_id).await["paid"], false);
}

#[tokio::test]
async fn unknown_reference_is_not_found() {
    let app = TestApp::new().await;

    let response = app.pay(&Uuid::new_v4().to_string()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.pay("not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_success_is_acknowledged_without_a_second_write() {
    let app = TestApp::new().await;
    let order_id = unpaid_order(&app).await;

    let first = response_json(app.pay(&order_id).await).await;
    assert_eq!(first["data"]["outcome"], "applied");
    let paid_at = payment_status(&app, &order_id).await["pay_at"].clone();
    assert!(!paid_at.is_null());

    let response = app.pay(&order_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = response_json(response).await;
    assert_eq!(second["data"]["outcome"], "already_applied");
    assert_eq!(second["data"]["order_status"], "PROCESSING");

    assert_eq!(payment_status(&app, &order_id).await["pay_at"], paid_at);
}

#[tokio::test]
async fn failure_after_success_does_not_revert_payment() {
    let app = TestApp::new().await;
    let order_id = unpaid_order(&app).await;
    assert_eq!(app.pay(&order_id).await.status(), StatusCode::OK);
    let before = payment_status(&app, &order_id).await;

    let response = app.deliver_webhook(callback(&order_id, "FAILED")).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let ack = response_json(response).await;
    assert_eq!(ack["data"]["outcome"], "ignored");
    assert_eq!(ack["data"]["received_status"], "FAILED");

    let after = payment_status(&app, &order_id).await;
    assert_eq!(after["paid"], true);
    assert_eq!(after["status"], "PROCESSING");
    assert_eq!(after["pay_at"], before["pay_at"]);
}

#[tokio::test]
async fn success_for_a_finished_order_is_a_duplicate() {
    let app = TestApp::new().await;
    let order_id = unpaid_order(&app).await;
    assert_eq!(app.pay(&order_id).await.status(), StatusCode::OK);
    assert_eq!(
        app.post(&format!("/api/v1/orders/{}/finish", order_id), None)
            .await
            .status(),
        StatusCode::OK
    );
    let before = payment_status(&app, &order_id).await;

    let response = app.pay(&order_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["data"]["outcome"], "already_applied");
    assert_eq!(ack["data"]["order_status"], "DONE");

    let after = payment_status(&app, &order_id).await;
    assert_eq!(after["status"], "DONE");
    assert_eq!(after["pay_at"], before["pay_at"]);
}

#[tokio::test]
async fn mixed_case_failure_is_ignored() {
    let app = TestApp::new().await;
    let order_id = unpaid_order(&app).await;

    let response = app.deliver_webhook(callback(&order_id, "FAIlED")).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(payment_status(&app, &order_id).await["paid"], false);

    let response = app.deliver_webhook(callback(&order_id, "succeeded")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(payment_status(&app, &order_id).await["paid"], true);
}

#[tokio::test]
async fn concurrent_deliveries_apply_exactly_once() {
    let app = TestApp::new().await;
    let order_id = unpaid_order(&app).await;

    let deliveries = (0..8).map(|_| app.pay(&order_id));
    let responses = join_all(deliveries).await;

    let mut outcomes = Vec::new();
    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
        let ack = response_json(response).await;
        outcomes.push(ack["data"]["outcome"].as_str().unwrap().to_string());
    }

    assert_eq!(outcomes.iter().filter(|o| *o == "applied").count(), 1);
    assert_eq!(
        outcomes.iter().filter(|o| *o == "already_applied").count(),
        7
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_deliveries_over_a_connection_pool_apply_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let app = Arc::new(TestApp::with_config(common::file_backed_config(dir.path(), 4)).await);
    let order_id = unpaid_order(&app).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let app = Arc::clone(&app);
            let order_id = order_id.clone();
            tokio::spawn(async move {
                let response = app.pay(&order_id).await;
                assert_eq!(response.status(), StatusCode::OK);
                let ack = response_json(response).await;
                ack["data"]["outcome"].as_str().unwrap().to_string()
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    assert_eq!(outcomes.iter().filter(|o| *o == "applied").count(), 1);
    assert_eq!(
        outcomes.iter().filter(|o| *o == "already_applied").count(),
        15
    );
    let status = payment_status(&app, &order_id).await;
    assert_eq!(status["status"], "PROCESSING");
    assert_eq!(status["paid"], true);
}

#[tokio::test]
async fn malformed_authenticated_body_is_a_bad_request() {
    let app = TestApp::new().await;

    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(b"{\"event\": 42".to_vec()),
            &[(WEBHOOK_HEADER, WEBHOOK_TOKEN)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .deliver_webhook(json!({ "event": "payment.succeeded", "data": { "status": "SUCCEEDED" } }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn persistence_failure_asks_for_a_retry() {
    let app = TestApp::new().await;
    let order_id = unpaid_order(&app).await;

    for sql in ["DROP TABLE order_items;", "DROP TABLE orders;"] {
        app.state
            .db
            .execute(Statement::from_string(DatabaseBackend::Sqlite, sql.to_string()))
            .await
            .unwrap();
    }

    let response = app.pay(&order_id).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Database error");
}

#[tokio::test]
async fn webhook_only_accepts_post() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/payments/webhook").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn sandbox_simulation_pays_the_order_through_the_callback_path() {
    let (tx, rx) = mpsc::channel(8);
    let sandbox = Arc::new(SandboxGateway::new(chrono::Duration::minutes(15)).with_callbacks(tx));
    let app = TestApp::with_gateway(
        common::test_config(),
        sandbox,
        Arc::new(common::ScriptedGateway::default()),
    )
    .await;
    let forwarder = tokio::spawn(forward_simulated_callbacks(
        (*app.state.services.payment_webhooks).clone(),
        rx,
    ));

    let order_id = unpaid_order(&app).await;
    let response = app
        .post(
            &format!("/api/v1/orders/{}/simulate-payment", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut paid = false;
    for _ in 0..50 {
        if payment_status(&app, &order_id).await["paid"] == true {
            paid = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(paid, "simulated callback never reached the order");

    let response = app
        .post(
            &format!("/api/v1/orders/{}/simulate-payment", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    forwarder.abort();
}
