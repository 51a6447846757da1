use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::ui::web::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) async fn api_status(State(state): State<AppState>) -> Json<Value> {
    let app = &state.app;
    let binds: Vec<String> = state.binds.iter().map(|a| a.to_string()).collect();
    Json(json!({
        "version": VERSION,
        "save_dir": app.config().default_save_dir().to_string_lossy(),
        "bind_addrs": binds,
        "providers": app.provider_names(),
        "active_jobs": app.registry().len(),
        "cache": {
            "entries": app.cache().len(),
            "capacity": app.cache().capacity(),
            "ttl_secs": app.cache().ttl_secs(),
        }
    }))
}
