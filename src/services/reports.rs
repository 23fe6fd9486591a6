use crate::{
    errors::ServiceError,
    entities::OrderStatus,
    repositories::{OrderRepository, SalesRow},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;

/// Sales figures for the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SalesReport {
    /// Sum of `grand_total` over paid orders
    #[schema(value_type = String, example = "27500")]
    pub total_revenue: Decimal,
    /// Orders not yet `DONE`
    pub ongoing_orders: u64,
    /// Orders in `DONE`
    pub completed_orders: u64,
    pub paid_orders: u64,
    pub generated_at: DateTime<Utc>,
}

impl SalesReport {
    /// Folds one snapshot of order rows into the report
    pub fn from_rows(rows: &[SalesRow]) -> Self {
        let mut report = SalesReport {
            total_revenue: Decimal::ZERO,
            ongoing_orders: 0,
            completed_orders: 0,
            paid_orders: 0,
            generated_at: Utc::now(),
        };

        for row in rows {
            if row.pay_at.is_some() {
                report.total_revenue += row.grand_total;
                report.paid_orders += 1;
            }
            if row.status == OrderStatus::Done {
                report.completed_orders += 1;
            } else {
                report.ongoing_orders += 1;
            }
        }

        report
    }
}

/// Service for sales reporting
#[derive(Clone)]
pub struct ReportService {
    repository: OrderRepository,
}

impl ReportService {
    pub fn new(repository: OrderRepository) -> Self {
        Self { repository }
    }

    #[instrument(skip(self))]
    pub async fn sales_report(&self) -> Result<SalesReport, ServiceError> {
        let rows = self.repository.sales_rows().await?;
        let report = SalesReport::from_rows(&rows);
        info!(
            orders = rows.len(),
            total_revenue = %report.total_revenue,
            "Sales report generated"
        );
        Ok(report)
    }
}
