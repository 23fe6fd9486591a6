//! Order Store: the only place order state is read or written.
//!
//! Every state transition is a single conditional `UPDATE ... WHERE <expected state>`,
//! so concurrent writers race inside the database and exactly one of them wins.

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr,
    EntityTrait, FromQueryResult, JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::entities::order::{self, Entity as Order, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Line item to persist with a new order
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
}

/// Fully priced order ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub id: Uuid,
    pub sub_total: Decimal,
    pub tax: Decimal,
    pub grand_total: Decimal,
    pub lines: Vec<NewOrderLine>,
}

/// Order listing row with its line count
#[derive(Debug, Clone, PartialEq, FromQueryResult)]
pub struct OrderSummaryRow {
    pub id: Uuid,
    pub sub_total: Decimal,
    pub tax: Decimal,
    pub grand_total: Decimal,
    pub status: OrderStatus,
    pub pay_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub item_count: i64,
}

/// Columns the sales report needs from every order
#[derive(Debug, Clone, PartialEq, FromQueryResult)]
pub struct SalesRow {
    pub grand_total: Decimal,
    pub status: OrderStatus,
    pub pay_at: Option<DateTime<Utc>>,
}

fn db_failure(operation: &'static str, e: DbErr) -> ServiceError {
    error!(operation, error = %e, "Order store operation failed");
    counter!("pos_db.query.error", 1, "operation" => operation);
    ServiceError::db_error(e)
}

/// Repository for order operations
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Persists the order and all of its lines in one transaction
    #[instrument(skip(self, new_order), fields(order_id = %new_order.id, lines = new_order.lines.len()))]
    pub async fn insert_with_items(
        &self,
        new_order: NewOrder,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let txn = self
            .base
            .get_db()
            .begin()
            .await
            .map_err(|e| db_failure("begin_transaction", e))?;

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(new_order.id),
            sub_total: Set(new_order.sub_total),
            tax: Set(new_order.tax),
            grand_total: Set(new_order.grand_total),
            status: Set(OrderStatus::AwaitingPayment),
            pay_at: Set(None),
            external_transaction_id: Set(None),
            payment_method_id: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| db_failure("insert_order", e))?;

        let mut items = Vec::with_capacity(new_order.lines.len());
        for line in new_order.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                price: Set(line.price),
                created_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| db_failure("insert_order_item", e))?;
            items.push(item);
        }

        txn.commit()
            .await
            .map_err(|e| db_failure("commit_order", e))?;

        debug!("Order and items persisted");
        Ok((order, items))
    }

    /// Find an order by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Order::find_by_id(id)
            .one(self.base.get_db())
            .await
            .map_err(|e| db_failure("find_order", e))
    }

    pub async fn find_items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(self.base.get_db())
            .await
            .map_err(|e| db_failure("find_order_items", e))
    }

    /// Attaches gateway references to an unpaid order that has none yet.
    ///
    /// Returns `false` when the order already carries references or has been paid.
    #[instrument(skip(self))]
    pub async fn attach_payment_references(
        &self,
        order_id: Uuid,
        external_transaction_id: &str,
        payment_method_id: &str,
    ) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(
                order::Column::ExternalTransactionId,
                Expr::value(external_transaction_id),
            )
            .col_expr(order::Column::PaymentMethodId, Expr::value(payment_method_id))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::ExternalTransactionId.is_null())
            .filter(order::Column::PayAt.is_null())
            .exec(self.base.get_db())
            .await
            .map_err(|e| db_failure("attach_payment_references", e))?;

        Ok(result.rows_affected == 1)
    }

    /// `AWAITING_PAYMENT -> PROCESSING`, stamping `pay_at`.
    ///
    /// Returns `true` only for the caller whose update applied the transition.
    #[instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(order::Column::PayAt, Expr::value(paid_at))
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Processing.to_value()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(paid_at))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PayAt.is_null())
            .filter(order::Column::Status.eq(OrderStatus::AwaitingPayment))
            .exec(self.base.get_db())
            .await
            .map_err(|e| db_failure("confirm_payment", e))?;

        Ok(result.rows_affected == 1)
    }

    /// `PROCESSING -> DONE` for a paid order
    #[instrument(skip(self))]
    pub async fn mark_done(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Done.to_value()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Processing))
            .filter(order::Column::PayAt.is_not_null())
            .exec(self.base.get_db())
            .await
            .map_err(|e| db_failure("mark_done", e))?;

        Ok(result.rows_affected == 1)
    }

    /// Orders newest first with their line counts, optionally narrowed to one status
    pub async fn list_with_item_counts(
        &self,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderSummaryRow>, ServiceError> {
        let mut query = Order::find()
            .select_only()
            .columns([
                order::Column::Id,
                order::Column::SubTotal,
                order::Column::Tax,
                order::Column::GrandTotal,
                order::Column::Status,
                order::Column::PayAt,
                order::Column::CreatedAt,
            ])
            .column_as(order_item::Column::Id.count(), "item_count")
            .join(JoinType::LeftJoin, order::Relation::OrderItem.def())
            .group_by(order::Column::Id)
            .order_by_desc(order::Column::CreatedAt);

        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        query
            .into_model::<OrderSummaryRow>()
            .all(self.base.get_db())
            .await
            .map_err(|e| db_failure("list_orders", e))
    }

    /// One read over every order, so the report reflects a single snapshot
    pub async fn sales_rows(&self) -> Result<Vec<SalesRow>, ServiceError> {
        Order::find()
            .select_only()
            .columns([
                order::Column::GrandTotal,
                order::Column::Status,
                order::Column::PayAt,
            ])
            .into_model::<SalesRow>()
            .all(self.base.get_db())
            .await
            .map_err(|e| db_failure("sales_rows", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::product;
    use rust_decimal_macros::dec;

    async fn repository() -> OrderRepository {
        let db = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        OrderRepository::new(Arc::new(db))
    }

    fn new_order(lines: Vec<NewOrderLine>) -> NewOrder {
        let sub_total: Decimal = lines
            .iter()
            .map(|l| l.price * Decimal::from(l.quantity))
            .sum();
        let tax = sub_total * dec!(0.1);
        NewOrder {
            id: Uuid::new_v4(),
            sub_total,
            tax,
            grand_total: sub_total + tax,
            lines,
        }
    }

    fn line(price: Decimal, quantity: i32) -> NewOrderLine {
        NewOrderLine {
            product_id: Uuid::new_v4(),
            quantity,
            price,
        }
    }

    #[tokio::test]
    async fn insert_persists_order_and_lines_together() {
        let repo = repository().await;
        let (order, items) = repo
            .insert_with_items(new_order(vec![line(dec!(10000), 2), line(dec!(5000), 1)]))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::AwaitingPayment);
        assert_eq!(order.grand_total, dec!(27500));
        assert_eq!(items.len(), 2);
        assert_eq!(repo.find_items(order.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn confirm_payment_applies_exactly_once() {
        let repo = repository().await;
        let (order, _) = repo
            .insert_with_items(new_order(vec![line(dec!(1000), 1)]))
            .await
            .unwrap();

        let first_paid_at = Utc::now();
        assert!(repo.confirm_payment(order.id, first_paid_at).await.unwrap());
        assert!(!repo.confirm_payment(order.id, Utc::now()).await.unwrap());

        let stored = repo.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(
            stored.pay_at.map(|t| t.timestamp_millis()),
            Some(first_paid_at.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn references_attach_only_once_and_only_before_payment() {
        let repo = repository().await;
        let (order, _) = repo
            .insert_with_items(new_order(vec![line(dec!(1000), 1)]))
            .await
            .unwrap();

        assert!(repo
            .attach_payment_references(order.id, "pr-1", "pm-1")
            .await
            .unwrap());
        assert!(!repo
            .attach_payment_references(order.id, "pr-2", "pm-2")
            .await
            .unwrap());

        let stored = repo.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.external_transaction_id.as_deref(), Some("pr-1"));
        assert_eq!(stored.payment_method_id.as_deref(), Some("pm-1"));
    }

    #[tokio::test]
    async fn mark_done_requires_processing() {
        let repo = repository().await;
        let (order, _) = repo
            .insert_with_items(new_order(vec![line(dec!(1000), 1)]))
            .await
            .unwrap();

        assert!(!repo.mark_done(order.id).await.unwrap());
        repo.confirm_payment(order.id, Utc::now()).await.unwrap();
        assert!(repo.mark_done(order.id).await.unwrap());
        assert!(!repo.mark_done(order.id).await.unwrap());
    }

    #[tokio::test]
    async fn listing_counts_lines_and_filters_by_status() {
        let repo = repository().await;
        let (paid, _) = repo
            .insert_with_items(new_order(vec![line(dec!(1000), 1), line(dec!(2000), 3)]))
            .await
            .unwrap();
        repo.insert_with_items(new_order(vec![line(dec!(500), 1)]))
            .await
            .unwrap();
        repo.confirm_payment(paid.id, Utc::now()).await.unwrap();

        let all = repo.list_with_item_counts(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let processing = repo
            .list_with_item_counts(Some(OrderStatus::Processing))
            .await
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, paid.id);
        assert_eq!(processing[0].item_count, 2);
    }

    #[tokio::test]
    async fn line_prices_do_not_follow_product_price_edits() {
        let repo = repository().await;
        let db = repo.base.get_db();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Es Teh".into()),
            price: Set(dec!(5000)),
            category: Set(None),
            image_url: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(db)
        .await
        .unwrap();

        let (order, _) = repo
            .insert_with_items(new_order(vec![NewOrderLine {
                product_id: product.id,
                quantity: 2,
                price: product.price,
            }]))
            .await
            .unwrap();

        let mut edited: product::ActiveModel = product.into();
        edited.price = Set(dec!(7000));
        edited.update(db).await.unwrap();

        let items = repo.find_items(order.id).await.unwrap();
        assert_eq!(items[0].price, dec!(5000));
        assert_eq!(items[0].line_total(), dec!(10000));
    }
}
