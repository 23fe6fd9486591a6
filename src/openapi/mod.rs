use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "POS API",
        version = "0.1.0",
        description = r#"
# Point-of-sale order API

Order lifecycle and QR payment reconciliation.

## Order lifecycle

`AWAITING_PAYMENT` → `PROCESSING` (payment callback) → `DONE` (cashier finishes the order).

## Payment callbacks

`POST /api/v1/payments/webhook` requires the shared token header (`x-callback-token` by default).
Deliveries are idempotent: repeated successful callbacks return `already_applied`, non-success
statuses return 422 with outcome `ignored`, and 5xx responses are safe to retry.

## Error Handling

```json
{
  "error": "Unprocessable Entity",
  "message": "Invalid state: order is not paid yet",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order lifecycle endpoints"),
        (name = "Payments", description = "Payment processor callbacks"),
        (name = "Reports", description = "Sales reporting")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::payment_status,
        crate::handlers::orders::request_payment,
        crate::handlers::orders::simulate_payment,
        crate::handlers::orders::finish_order,
        crate::handlers::orders::order_events,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::reports::sales_report,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::entities::OrderStatus,
            crate::events::Event,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderLineRequest,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::OrderSummary,
            crate::services::orders::CreatedOrderResponse,
            crate::services::orders::PaymentStatusResponse,
            crate::services::orders::PaymentRequestResponse,
            crate::services::payment_webhooks::PaymentWebhookPayload,
            crate::services::payment_webhooks::PaymentWebhookData,
            crate::services::payment_webhooks::WebhookAck,
            crate::services::payment_webhooks::WebhookOutcome,
            crate::services::reports::SalesReport,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_order_and_webhook_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("POS API"));
        assert!(json.contains("/api/v1/orders/{id}/finish"));
        assert!(json.contains("/api/v1/payments/webhook"));
        assert!(json.contains("/api/v1/reports/sales"));
    }
}
