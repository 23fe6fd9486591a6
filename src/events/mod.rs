use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Capacity of the channel feeding [`process_events`]
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the push-notification fan-out; slow subscribers skip ahead
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends and logs instead of failing; event delivery never fails a request.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping order event");
        }
    }
}

/// Order lifecycle events pushed to connected point-of-sale screens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        grand_total: Decimal,
    },
    PaymentRequested {
        order_id: Uuid,
    },
    OrderPaid {
        order_id: Uuid,
        paid_at: DateTime<Utc>,
    },
    OrderCompleted {
        order_id: Uuid,
    },
}

impl Event {
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderCreated { order_id, .. }
            | Event::PaymentRequested { order_id }
            | Event::OrderPaid { order_id, .. }
            | Event::OrderCompleted { order_id } => *order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::PaymentRequested { .. } => "payment_requested",
            Event::OrderPaid { .. } => "order_paid",
            Event::OrderCompleted { .. } => "order_completed",
        }
    }
}

/// Drains the event channel and fans every event out to notification subscribers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: broadcast::Sender<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let name = event.name();
        info!(event = name, order_id = %event.order_id(), "Processing order event");
        counter!("pos_events.processed", 1, "event" => name);

        if notifier.send(event).is_err() {
            debug!(event = name, "No notification subscribers connected");
        }
    }

    info!("Event channel closed; event processing loop stopped");
}
