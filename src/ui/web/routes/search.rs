use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::jobs::repo_error;
use crate::ui::web::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct SearchQuery {
    pub(crate) provider: String,
    pub(crate) q: String,
}

pub(crate) async fn api_search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let keyword = q.q.trim().to_string();
    if keyword.is_empty() {
        return Ok(Json(json!({"items": []})));
    }

    let repo = state
        .app
        .repository(q.provider.trim())
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?
        .clone();

    let items = tokio::task::spawn_blocking(move || repo.search(&keyword))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(repo_error)?;

    Ok(Json(json!({"items": items})))
}
