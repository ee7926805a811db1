// 自动周期处理器

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::server::AppState;
use crate::store::CycleState;

use super::ApiResponse;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CycleTriggerRequest {
    /// 选中的店铺子集，空表示全部
    pub shops: Vec<String>,
}

/// 触发一次自动周期（入队，由后台工作循环串行消费）
pub async fn trigger_cycle(
    State(state): State<AppState>,
    Json(request): Json<CycleTriggerRequest>,
) -> Json<ApiResponse<String>> {
    info!("收到自动周期触发请求，店铺: {:?}", request.shops);
    match state.cycle_tx.try_send(request.shops) {
        Ok(()) => Json(ApiResponse::success("自动周期已入队".to_string())),
        Err(_) => Json(ApiResponse::error(1, "自动周期队列已满，请稍后再试".to_string())),
    }
}

/// 查看自动周期状态
pub async fn cycle_status(State(state): State<AppState>) -> Json<ApiResponse<CycleState>> {
    Json(ApiResponse::success(state.cycle_store.snapshot().await))
}
