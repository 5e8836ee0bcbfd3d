//! API 模块
//!
//! 实时会话的 WebSocket 入口与生理信号接入。

pub mod app_state;
pub mod validation;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::api::app_state::AppState;
use crate::api::validation::{validate_bpm, validate_id};
use crate::error::AppError;
use crate::websocket::ws_handler;

/// 心率采样
#[derive(Debug, Deserialize)]
pub struct BioSignalRequest {
    pub user_id: String,
    pub bpm: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BioSignalResponse {
    /// 采样是否越过阈值并产生了提示
    pub hint_produced: bool,
}

pub async fn ingest_biosignal(
    State(state): State<AppState>,
    Json(request): Json<BioSignalRequest>,
) -> Result<Json<BioSignalResponse>, AppError> {
    validate_id("user_id", &request.user_id)?;
    validate_bpm(request.bpm)?;
    debug!(user_id = %request.user_id, bpm = request.bpm, "Bio-signal sample");

    let hint_produced = state.biosignal.ingest(&request.user_id, request.bpm);
    Ok(Json(BioSignalResponse { hint_produced }))
}

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws/:user_id/:persona_id", get(ws_handler))
        .route("/biosignal", post(ingest_biosignal))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
