use crate::{
    errors::ServiceError,
    services::payment_webhooks::{PaymentWebhookPayload, WebhookAck, WebhookOutcome},
    ApiResponse, AppState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

/// Payment processor callback. Authentication happens before the body is parsed,
/// so the raw bytes are taken instead of a `Json` extractor.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    summary = "Payment callback",
    description = "Reconciles a QR payment outcome with its order. Requires the shared callback token header.",
    request_body = PaymentWebhookPayload,
    params(("x-callback-token" = String, Header, description = "Shared callback token")),
    responses(
        (status = 200, description = "Payment applied or already applied", body = ApiResponse<WebhookAck>),
        (status = 400, description = "Malformed callback body", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid callback token", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order reference", body = crate::errors::ErrorResponse),
        (status = 422, description = "Non-success payment status; no change", body = ApiResponse<WebhookAck>),
        (status = 500, description = "Persistence failure; safe to retry", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let ack = state.services.payment_webhooks.handle(&headers, &body).await?;

    let status = match ack.outcome {
        WebhookOutcome::Applied | WebhookOutcome::AlreadyApplied => StatusCode::OK,
        WebhookOutcome::Ignored => StatusCode::UNPROCESSABLE_ENTITY,
    };
    Ok((status, Json(ApiResponse::success(ack))))
}
