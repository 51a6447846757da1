use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::app::AppError;
use crate::base_system::job_id::{BookKey, JobId};
use crate::download::{ControlAction, ControlRequest, DownloadError, DownloadState};
use crate::repository::RepoError;
use crate::storage::StoreError;
use crate::ui::web::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateJobReq {
    pub(crate) provider: String,
    pub(crate) url: String,
}

pub(crate) async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    let items = state.board.list();
    let active: Vec<Value> = state
        .app
        .registry()
        .active()
        .into_iter()
        .map(|(id, s)| json!({ "id": id, "state": s }))
        .collect();
    Json(json!({ "items": items, "active": active }))
}

pub(crate) async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobReq>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let provider = req.provider.trim().to_string();
    let url = req.url.trim().to_string();
    if provider.is_empty() || url.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "provider and url are required".to_string(),
        ));
    }

    let app = state.app.clone();
    let board = state.board.clone();
    tokio::task::spawn_blocking(move || {
        let repo = app.repository(&provider).map_err(app_error)?.clone();
        let record = repo.load(&url, true).map_err(repo_error)?;
        let downloader = app.downloader();
        let handle = downloader.admit(&repo, &record).map_err(download_error)?;
        let Some(handle) = handle else {
            let id = BookKey::new(repo.name(), record.author.as_deref(), &record.name).job_id();
            return Err((StatusCode::CONFLICT, format!("job {id} is already running")));
        };
        let id = handle.id();
        board.set_meta(id, repo.name(), &record.name);
        let title = record.name.clone();
        downloader
            .spawn_admitted(handle, repo, record)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        info!(target: "web", job = %id, %title, "已创建下载任务");

        Ok(Json(json!({
            "id": id,
            "title": title,
            "state": DownloadState::Downloading,
        })))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
}

pub(crate) async fn control_job(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let job_id: JobId = id.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let action = ControlAction::from(action.as_str());
    if state.app.control(ControlRequest { job_id, action }) {
        Ok(Json(json!({
            "ok": true,
            "state": state.app.registry().get_state(job_id),
        })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

fn app_error(e: AppError) -> (StatusCode, String) {
    match e {
        AppError::UnknownProvider(_) => (StatusCode::NOT_FOUND, e.to_string()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

fn download_error(e: DownloadError) -> (StatusCode, String) {
    match e {
        DownloadError::Store(StoreError::PermissionDenied(_)) => {
            (StatusCode::FORBIDDEN, e.to_string())
        }
        DownloadError::Repo(inner) => repo_error(inner),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

pub(crate) fn repo_error(e: RepoError) -> (StatusCode, String) {
    match e {
        RepoError::NoData { .. } => (StatusCode::NOT_FOUND, e.to_string()),
        RepoError::Provider(inner) => {
            warn!(target: "web", error = %inner, "提供方请求失败");
            (StatusCode::BAD_GATEWAY, inner.to_string())
        }
    }
}
