use crate::{
    errors::ServiceError,
    events::Event,
    services::orders::{
        CreateOrderRequest, CreatedOrderResponse, OrderResponse, OrderStatusFilter, OrderSummary,
        PaymentRequestResponse, PaymentStatusResponse,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListOrdersQuery {
    /// `ALL` (default), `AWAITING_PAYMENT`, `PROCESSING` or `DONE`
    pub status: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Price the requested items, store the order and issue a one-time QR payment request",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CreatedOrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 502, description = "Order stored but the payment request failed", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state.services.orders.create_order(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Orders newest first with their item counts",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderSummary>>),
        (status = 400, description = "Unknown status filter", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<OrderSummary>>>, ServiceError> {
    let filter = match query.status.as_deref() {
        Some(raw) => raw.parse::<OrderStatusFilter>()?,
        None => OrderStatusFilter::All,
    };
    let orders = state.services.orders.list_orders(filter).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/payment-status",
    summary = "Check payment status",
    description = "`paid` is true once the payment callback has been applied",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment status", body = ApiResponse<PaymentStatusResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    let status = state.services.orders.payment_status(id).await?;
    Ok(Json(ApiResponse::success(status)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment-request",
    summary = "Retry payment request",
    description = "Issue a QR payment request for an unpaid order whose first request failed",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 201, description = "Payment request issued", body = ApiResponse<PaymentRequestResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is paid or already has a payment request", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn request_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = state.services.orders.request_payment(id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/simulate-payment",
    summary = "Simulate payment",
    description = "Sandbox only. Asks the gateway to complete the payment; the order changes when the callback arrives",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 202, description = "Simulation requested"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is paid or has no payment request", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn simulate_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.orders.simulate_payment(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::<()>::message("Payment simulation requested")),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/finish",
    summary = "Finish order",
    description = "Mark a paid, processing order as done",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order finished", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is not paid or not processing", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn finish_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.finish_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/events",
    summary = "Order event stream",
    description = "Server-sent events for order creation, payment and completion",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = Event),
    ),
    tag = "Orders"
)]
pub async fn order_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.notifier.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match SseEvent::default().event(event.name()).json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), rx)),
                    Err(e) => warn!(error = %e, "Failed to encode order event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Order event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
