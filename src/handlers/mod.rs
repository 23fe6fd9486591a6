pub mod orders;
pub mod payment_webhooks;
pub mod reports;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    repositories::OrderRepository,
    services::{
        orders::{OrderService, OrderSettings},
        payment_webhooks::PaymentWebhookService,
        reports::ReportService,
    },
};
use std::sync::Arc;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payment_webhooks: Arc<PaymentWebhookService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        let repository = OrderRepository::new(db_pool.clone());

        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            gateway,
            event_sender.clone(),
            OrderSettings::from(config),
        ));
        let payment_webhooks = Arc::new(PaymentWebhookService::from_config(
            repository.clone(),
            config,
            event_sender,
        ));
        let reports = Arc::new(ReportService::new(repository));

        Self {
            orders,
            payment_webhooks,
            reports,
        }
    }
}
