use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::history::HistoryRecord;

/// GET /api/history
pub async fn list_history(State(state): State<AppState>) -> Json<Vec<HistoryRecord>> {
    Json(state.history.list().await)
}

/// GET /api/history/{id}
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<HistoryRecord>, AppError> {
    state
        .history
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("History record {id} not found")))
}

/// DELETE /api/history/{id}
pub async fn delete_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.history.delete(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("History record {id} not found")))
    }
}

/// DELETE /api/history
pub async fn clear_history(State(state): State<AppState>) -> StatusCode {
    state.history.clear().await;
    StatusCode::NO_CONTENT
}
