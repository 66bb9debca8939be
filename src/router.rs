use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRef, Path, State},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::{ColumnType, Statement};
use crate::error::CorpfrontError;
use crate::middleware::db_session::DbHandle;
use crate::middleware::{AdminKey, DbSession, RequireAdmin};
use crate::service::{
    ConfigStore, CurrentRevenueFile, RevenueFileService, SlideshowService, SlideshowState,
};

/// Process-wide state. Every field is a cheap handle; the only mutable
/// state behind them is the config cache and the slideshow runtime state.
#[derive(Clone)]
pub struct DashboardState {
    pub db: DbHandle,
    pub admin_key: AdminKey,
    pub config: ConfigStore,
    pub slideshow: SlideshowService,
    pub revenue: RevenueFileService,
}

impl DashboardState {
    pub fn new(db: DbHandle, cfg: &Config) -> Self {
        let config = ConfigStore::new(Duration::from_secs(cfg.dashboard.config_cache_ttl_secs));
        let slideshow = SlideshowService::new(
            config.clone(),
            cfg.dashboard.slideshow_interval_secs,
            cfg.dashboard.public_base_url.clone(),
        );
        let revenue = RevenueFileService::new(config.clone());
        Self {
            db,
            admin_key: AdminKey::new(&cfg.basic.admin_key),
            config,
            slideshow,
            revenue,
        }
    }
}

impl FromRef<DashboardState> for DbHandle {
    fn from_ref(state: &DashboardState) -> Self {
        state.db.clone()
    }
}

impl FromRef<DashboardState> for AdminKey {
    fn from_ref(state: &DashboardState) -> Self {
        state.admin_key.clone()
    }
}

pub fn dashboard_router(state: DashboardState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/dashboard/slideshow", get(slideshow_state))
        .route("/api/admin/slideshow/set-url", post(slideshow_set_url))
        .route("/api/admin/slideshow/start", post(slideshow_start))
        .route("/api/admin/slideshow/stop", post(slideshow_stop))
        .route("/api/admin/slideshow/file", delete(slideshow_clear_file))
        .route("/api/admin/config/{key}", get(config_get).put(config_put))
        .route(
            "/api/admin/revenue/current-file",
            get(revenue_current).delete(revenue_clear),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(DbSession(mut session): DbSession) -> Result<Json<JsonValue>, CorpfrontError> {
    let result = session
        .scalar(&Statement::new("SELECT 1"), ColumnType::Int)
        .await;
    let result = DbSession(session).finish(result).await?;
    Ok(Json(json!({
        "status": "ok",
        "database": if result.is_some() { "ok" } else { "empty" },
    })))
}

async fn slideshow_state(
    State(state): State<DashboardState>,
    DbSession(mut session): DbSession,
) -> Result<Json<SlideshowState>, CorpfrontError> {
    let result = state.slideshow.state(&mut session).await;
    DbSession(session).finish(result).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct SetUrlBody {
    pub embed_url: String,
}

async fn slideshow_set_url(
    _admin: RequireAdmin,
    State(state): State<DashboardState>,
    DbSession(mut session): DbSession,
    Json(body): Json<SetUrlBody>,
) -> Result<Json<JsonValue>, CorpfrontError> {
    let result = state.slideshow.set_url(&mut session, &body.embed_url).await;
    let slideshow = DbSession(session).finish(result).await?;
    Ok(Json(json!({
        "message": "Slideshow URL set successfully",
        "type": slideshow.kind,
        "source": slideshow.source,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartBody {
    pub interval_seconds: Option<i64>,
}

// The body is optional, so it is read raw instead of through `Json`.
async fn slideshow_start(
    _admin: RequireAdmin,
    State(state): State<DashboardState>,
    DbSession(mut session): DbSession,
    body: Bytes,
) -> Result<Json<JsonValue>, CorpfrontError> {
    let body: StartBody = if body.iter().all(u8::is_ascii_whitespace) {
        StartBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| CorpfrontError::BadRequest(format!("Invalid request body: {e}")))?
    };

    // Pick up a source persisted by another process or before a restart.
    let loaded = state.slideshow.state(&mut session).await;
    DbSession(session).finish(loaded).await?;

    let slideshow = state.slideshow.start(body.interval_seconds).await?;
    Ok(Json(json!({
        "message": "Slideshow started",
        "is_active": slideshow.is_active,
        "type": slideshow.kind,
        "source": slideshow.source,
        "file_url": slideshow.file_url,
        "file_name": slideshow.file_name,
        "interval_seconds": slideshow.interval_seconds,
    })))
}

async fn slideshow_stop(
    _admin: RequireAdmin,
    State(state): State<DashboardState>,
) -> Json<JsonValue> {
    let slideshow = state.slideshow.stop().await;
    Json(json!({
        "message": "Slideshow stopped",
        "is_active": slideshow.is_active,
    }))
}

async fn slideshow_clear_file(
    _admin: RequireAdmin,
    State(state): State<DashboardState>,
    DbSession(mut session): DbSession,
) -> Result<Json<JsonValue>, CorpfrontError> {
    let result = state.slideshow.clear_file(&mut session).await;
    DbSession(session).finish(result).await?;
    Ok(Json(json!({
        "message": "Slideshow file removed. Upload a new file to replace."
    })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigPutBody {
    pub value: String,
}

async fn config_get(
    _admin: RequireAdmin,
    State(state): State<DashboardState>,
    DbSession(mut session): DbSession,
    Path(key): Path<String>,
) -> Result<Json<ConfigEntry>, CorpfrontError> {
    let result = state.config.get(&mut session, &key).await;
    let value = DbSession(session).finish(result).await?;
    Ok(Json(ConfigEntry { key, value }))
}

async fn config_put(
    _admin: RequireAdmin,
    State(state): State<DashboardState>,
    DbSession(mut session): DbSession,
    Path(key): Path<String>,
    Json(body): Json<ConfigPutBody>,
) -> Result<Json<ConfigEntry>, CorpfrontError> {
    let key = key.trim().to_string();
    if key.is_empty() || key.len() > 100 {
        return Err(CorpfrontError::BadRequest(
            "config key must be 1 to 100 characters".to_string(),
        ));
    }
    let result = state.config.set(&mut session, &key, &body.value).await;
    DbSession(session).finish(result).await?;
    let value = Some(body.value.trim().to_string()).filter(|v| !v.is_empty());
    Ok(Json(ConfigEntry { key, value }))
}

async fn revenue_current(
    _admin: RequireAdmin,
    State(state): State<DashboardState>,
    DbSession(mut session): DbSession,
) -> Result<Json<CurrentRevenueFile>, CorpfrontError> {
    let result = state.revenue.current(&mut session).await;
    DbSession(session).finish(result).await.map(Json)
}

async fn revenue_clear(
    _admin: RequireAdmin,
    State(state): State<DashboardState>,
    DbSession(mut session): DbSession,
) -> Result<Json<JsonValue>, CorpfrontError> {
    let result = state.revenue.clear(&mut session).await;
    DbSession(session).finish(result).await?;
    Ok(Json(json!({
        "message": "Current revenue file cleared. Upload a new Excel to set trend data."
    })))
}
