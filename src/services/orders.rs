use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{order, order_item, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{PaymentGateway, QrPaymentRequest},
    repositories::{NewOrder, NewOrderLine, OrderRepository, OrderSummaryRow},
    services::products::ProductService,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const MAX_LINE_QUANTITY: i64 = 10_000;

/// Request/Response types for the order service
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<OrderLineRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderLineRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    /// Unit price captured when the order was placed
    pub price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub sub_total: Decimal,
    pub tax: Decimal,
    pub grand_total: Decimal,
    pub status: OrderStatus,
    pub pay_at: Option<DateTime<Utc>>,
    pub external_transaction_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

/// Result of placing an order
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedOrderResponse {
    pub order: OrderResponse,
    /// Payload to render as the payment QR code
    pub qr_string: String,
    pub qr_expires_at: Option<DateTime<Utc>>,
    /// Requested products that do not exist and were left out of the totals
    pub unresolved_product_ids: Vec<Uuid>,
}

/// Order board row; never carries gateway references
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub sub_total: Decimal,
    pub tax: Decimal,
    pub grand_total: Decimal,
    pub status: OrderStatus,
    pub pay_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub item_count: i64,
}

impl From<OrderSummaryRow> for OrderSummary {
    fn from(row: OrderSummaryRow) -> Self {
        Self {
            id: row.id,
            sub_total: row.sub_total,
            tax: row.tax,
            grand_total: row.grand_total,
            status: row.status,
            pay_at: row.pay_at,
            created_at: row.created_at,
            item_count: row.item_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub paid: bool,
    pub pay_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentRequestResponse {
    pub order_id: Uuid,
    pub qr_string: String,
    pub qr_expires_at: Option<DateTime<Utc>>,
}

/// `ALL` or a single status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderStatusFilter {
    #[default]
    All,
    Only(OrderStatus),
}

impl OrderStatusFilter {
    fn as_status(self) -> Option<OrderStatus> {
        match self {
            OrderStatusFilter::All => None,
            OrderStatusFilter::Only(status) => Some(status),
        }
    }
}

impl FromStr for OrderStatusFilter {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("ALL") {
            return Ok(OrderStatusFilter::All);
        }
        OrderStatus::from_str(trimmed)
            .map(OrderStatusFilter::Only)
            .map_err(|_| {
                ServiceError::ValidationError(format!(
                    "unknown order status '{}'; expected ALL, AWAITING_PAYMENT, PROCESSING or DONE",
                    trimmed
                ))
            })
    }
}

/// Subtotal, tax and grand total for a set of priced lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub sub_total: Decimal,
    pub tax: Decimal,
    pub grand_total: Decimal,
}

impl OrderTotals {
    /// Fails with `ValidationError` when the amounts leave `Decimal`'s range.
    pub fn compute(lines: &[NewOrderLine], tax_rate: Decimal) -> Result<Self, ServiceError> {
        let overflow = || ServiceError::ValidationError("order total is out of range".to_string());

        let sub_total = lines.iter().try_fold(Decimal::ZERO, |acc, line| {
            line.price
                .checked_mul(Decimal::from(line.quantity))
                .and_then(|line_total| acc.checked_add(line_total))
                .ok_or_else(overflow)
        })?;
        let tax = sub_total.checked_mul(tax_rate).ok_or_else(overflow)?;
        let grand_total = sub_total.checked_add(tax).ok_or_else(overflow)?;

        Ok(Self {
            sub_total,
            tax,
            grand_total,
        })
    }
}

/// Collapses repeated product ids into one line, keeping first-seen order
fn merge_lines(items: &[OrderLineRequest]) -> Result<Vec<(Uuid, i32)>, ServiceError> {
    let mut merged: Vec<(Uuid, i64)> = Vec::with_capacity(items.len());
    for item in items {
        match merged.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, quantity)) => *quantity += i64::from(item.quantity),
            None => merged.push((item.product_id, i64::from(item.quantity))),
        }
    }

    merged
        .into_iter()
        .map(|(id, quantity)| {
            if quantity > MAX_LINE_QUANTITY {
                return Err(ServiceError::ValidationError(format!(
                    "quantity for product {} exceeds {}",
                    id, MAX_LINE_QUANTITY
                )));
            }
            i32::try_from(quantity)
                .map(|q| (id, q))
                .map_err(|_| ServiceError::ValidationError(format!("quantity for product {} is out of range", id)))
        })
        .collect()
}

fn to_response(order: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        sub_total: order.sub_total,
        tax: order.tax,
        grand_total: order.grand_total,
        status: order.status,
        pay_at: order.pay_at,
        external_transaction_id: order.external_transaction_id,
        payment_method_id: order.payment_method_id,
        created_at: order.created_at,
        updated_at: order.updated_at,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                line_total: item.line_total(),
                id: item.id,
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
            })
            .collect(),
    }
}

/// Order settings taken from configuration
#[derive(Debug, Clone)]
pub struct OrderSettings {
    pub tax_rate: Decimal,
    pub payment_request_expiry: chrono::Duration,
    pub payment_simulation_enabled: bool,
}

impl From<&AppConfig> for OrderSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            tax_rate: cfg.tax_rate_decimal(),
            payment_request_expiry: cfg.payment_request_expiry(),
            payment_simulation_enabled: cfg.payment_simulation_enabled,
        }
    }
}

/// Places orders, requests their QR payments and moves paid orders to `DONE`
#[derive(Clone)]
pub struct OrderService {
    repository: OrderRepository,
    products: ProductService,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    settings: OrderSettings,
}

impl OrderService {
    /// Creates a new order service instance
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            repository: OrderRepository::new(db_pool.clone()),
            products: ProductService::new(db_pool),
            gateway,
            event_sender,
            settings,
        }
    }

    /// Prices the requested lines, stores the order and requests its QR payment.
    ///
    /// If the gateway call fails the order stays `AWAITING_PAYMENT` without
    /// references and [`OrderService::request_payment`] can be retried.
    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreatedOrderResponse, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }

        let requested = merge_lines(&request.items)?;
        let ids: Vec<Uuid> = requested.iter().map(|(id, _)| *id).collect();
        let prices = self.products.current_prices(&ids).await?;

        let mut lines = Vec::with_capacity(requested.len());
        let mut unresolved_product_ids = Vec::new();
        for (product_id, quantity) in requested {
            match prices.get(&product_id) {
                Some(price) => lines.push(NewOrderLine {
                    product_id,
                    quantity,
                    price: *price,
                }),
                None => unresolved_product_ids.push(product_id),
            }
        }

        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "none of the requested products exist".to_string(),
            ));
        }
        if !unresolved_product_ids.is_empty() {
            warn!(unresolved = ?unresolved_product_ids, "Unknown products left out of order");
        }

        let totals = OrderTotals::compute(&lines, self.settings.tax_rate)?;
        let (order, items) = self
            .repository
            .insert_with_items(NewOrder {
                id: Uuid::new_v4(),
                sub_total: totals.sub_total,
                tax: totals.tax,
                grand_total: totals.grand_total,
                lines,
            })
            .await?;

        info!(order_id = %order.id, grand_total = %order.grand_total, "Order created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                grand_total: order.grand_total,
            })
            .await;

        let payment = self.issue_payment_request(&order).await.map_err(|e| {
            error!(order_id = %order.id, error = %e, "Payment request failed; order left awaiting payment");
            match e {
                ServiceError::GatewayUnavailable(reason) => ServiceError::GatewayUnavailable(format!(
                    "order {} was created but its payment request failed ({}); retry the payment request",
                    order.id, reason
                )),
                other => other,
            }
        })?;

        let order = self
            .repository
            .find_by_id(order.id)
            .await?
            .ok_or_else(|| ServiceError::InternalError(format!("order {} vanished after insert", order.id)))?;

        Ok(CreatedOrderResponse {
            order: to_response(order, items),
            qr_string: payment.qr_string,
            qr_expires_at: payment.qr_expires_at,
            unresolved_product_ids,
        })
    }

    /// Requests a fresh QR payment for an unpaid order that has no gateway references
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn request_payment(&self, order_id: Uuid) -> Result<PaymentRequestResponse, ServiceError> {
        let order = self.find_order(order_id).await?;
        if order.is_paid() {
            return Err(ServiceError::InvalidState("order is already paid".to_string()));
        }
        if order.external_transaction_id.is_some() {
            return Err(ServiceError::InvalidState(
                "order already has a payment request".to_string(),
            ));
        }

        self.issue_payment_request(&order).await
    }

    async fn issue_payment_request(
        &self,
        order: &order::Model,
    ) -> Result<PaymentRequestResponse, ServiceError> {
        let payment = self
            .gateway
            .create_qr_payment(QrPaymentRequest {
                amount: order.grand_total,
                reference_id: order.id,
                expires_at: Some(Utc::now() + self.settings.payment_request_expiry),
            })
            .await?;

        let attached = self
            .repository
            .attach_payment_references(
                order.id,
                &payment.external_transaction_id,
                &payment.payment_method_id,
            )
            .await?;
        if !attached {
            warn!(order_id = %order.id, "Order gained a payment request or was paid concurrently");
            return Err(ServiceError::InvalidState(
                "order already has a payment request".to_string(),
            ));
        }

        info!(
            order_id = %order.id,
            provider = self.gateway.provider(),
            external_transaction_id = %payment.external_transaction_id,
            "Payment request attached to order"
        );
        self.event_sender
            .send_or_log(Event::PaymentRequested { order_id: order.id })
            .await;

        Ok(PaymentRequestResponse {
            order_id: order.id,
            qr_string: payment.qr_string,
            qr_expires_at: payment.expires_at,
        })
    }

    /// Retrieves an order by ID
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_id).await?;
        let items = self.repository.find_items(order_id).await?;
        Ok(to_response(order, items))
    }

    pub async fn list_orders(
        &self,
        filter: OrderStatusFilter,
    ) -> Result<Vec<OrderSummary>, ServiceError> {
        let rows = self
            .repository
            .list_with_item_counts(filter.as_status())
            .await?;
        Ok(rows.into_iter().map(OrderSummary::from).collect())
    }

    /// Polling endpoint for the cashier screen; `paid` follows `pay_at`
    pub async fn payment_status(&self, order_id: Uuid) -> Result<PaymentStatusResponse, ServiceError> {
        let order = self.find_order(order_id).await?;
        Ok(PaymentStatusResponse {
            order_id: order.id,
            paid: order.is_paid(),
            status: order.status,
            pay_at: order.pay_at,
        })
    }

    /// Asks the gateway to complete the payment as the payer would.
    /// The order changes only when the resulting callback arrives.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn simulate_payment(&self, order_id: Uuid) -> Result<(), ServiceError> {
        if !self.settings.payment_simulation_enabled {
            return Err(ServiceError::BadRequest(
                "payment simulation is disabled".to_string(),
            ));
        }

        let order = self.find_order(order_id).await?;
        if order.is_paid() {
            return Err(ServiceError::InvalidState("order is already paid".to_string()));
        }
        let payment_method_id = order.payment_method_id.as_deref().ok_or_else(|| {
            ServiceError::InvalidState("order has no payment request".to_string())
        })?;

        self.gateway
            .simulate_payment(payment_method_id, order.grand_total)
            .await?;
        info!("Payment simulation requested");
        Ok(())
    }

    /// `PROCESSING -> DONE` once the order has been handed over
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn finish_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_id).await?;
        if !order.is_paid() {
            return Err(ServiceError::InvalidState("order is not paid yet".to_string()));
        }
        if !order.status.can_transition_to(OrderStatus::Done) {
            return Err(ServiceError::InvalidState(
                "order is not processing yet".to_string(),
            ));
        }

        if !self.repository.mark_done(order_id).await? {
            // Lost a race with another finish
            return Err(ServiceError::InvalidState(
                "order is not processing yet".to_string(),
            ));
        }

        info!("Order finished");
        self.event_sender
            .send_or_log(Event::OrderCompleted { order_id })
            .await;

        self.get_order(order_id).await
    }

    async fn find_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.repository
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))
    }
}
