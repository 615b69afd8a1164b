use axum::{
    Json,
    extract::{Query, State},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::AppState;
use crate::models::{AnalysisRequest, PerformanceRecord};
use crate::utils::ApiResult;

// Top CPU consuming statements of a database
#[utoipa::path(
    get,
    path = "/AnalyzeDatabase/analyze-database",
    params(AnalysisRequest),
    responses(
        (status = 200, description = "Statements ranked by average CPU time, system catalog activity removed", body = Vec<PerformanceRecord>),
        (status = 400, description = "Server or database name missing"),
        (status = 500, description = "Authentication or database failure"),
        (status = 504, description = "Credential resolution or query timed out")
    ),
    tag = "Analysis"
)]
pub async fn analyze_database(
    State(state): State<Arc<AppState>>,
    Query(request): Query<AnalysisRequest>,
) -> ApiResult<Json<Vec<PerformanceRecord>>> {
    tracing::debug!(
        "Analyze request: server={}, database={}",
        request.database_server_name,
        request.database_name
    );

    // dropped with this future when the client goes away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let records = state
        .analysis_service
        .analyze(&request.database_server_name, &request.database_name, &cancel)
        .await?;

    tracing::debug!("Returning {} records", records.len());
    Ok(Json(records))
}
