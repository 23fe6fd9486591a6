use crate::{errors::ServiceError, services::reports::SalesReport, ApiResponse, AppState};
use axum::{extract::State, Json};

#[utoipa::path(
    get,
    path = "/api/v1/reports/sales",
    summary = "Sales report",
    description = "Revenue from paid orders plus ongoing and completed order counts",
    responses(
        (status = 200, description = "Sales report", body = ApiResponse<SalesReport>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Reports"
)]
pub async fn sales_report(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SalesReport>>, ServiceError> {
    let report = state.services.reports.sales_report().await?;
    Ok(Json(ApiResponse::success(report)))
}
