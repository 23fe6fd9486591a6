pub mod orders;
pub mod payment_webhooks;
pub mod products;
pub mod reports;
