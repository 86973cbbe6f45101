use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Deserialize;
use tracing::error;

use parley_db::{Database, HISTORY_LIMIT};
use parley_types::api::Claims;
use parley_types::models::Message;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Clamped to `1..=HISTORY_LIMIT`.
    pub limit: Option<u32>,
}

/// The newest `limit` messages, oldest first. All or nothing.
pub async fn load_history(db: Arc<Database>, limit: u32) -> Result<Vec<Message>, ApiError> {
    tokio::task::spawn_blocking(move || db.recent_messages(limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::from)
}

pub async fn get_history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let limit = query.limit.unwrap_or(HISTORY_LIMIT).clamp(1, HISTORY_LIMIT);
    let messages = load_history(state.db.clone(), limit).await?;
    Ok(Json(messages))
}
