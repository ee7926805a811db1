// 上传任务处理器

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::server::AppState;
use crate::store::UploadState;
use crate::uploader::ScanOptions;

use super::ApiResponse;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScanTriggerRequest {
    /// 只扫这些店铺，空表示全部
    pub shops: Vec<String>,
    /// 忽略时段配额（手动补传用）
    pub ignore_slots: bool,
}

/// 手动触发一次上传扫描（后台执行，立即返回）
///
/// 请求体可省略；带 `ignore_slots: true` 时本轮不按时段配额限流。
pub async fn trigger_scan(
    State(state): State<AppState>,
    request: Option<Json<ScanTriggerRequest>>,
) -> Json<ApiResponse<String>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    info!(
        "收到手动上传扫描请求，店铺: {:?}，忽略时段: {}",
        request.shops, request.ignore_slots
    );
    let scanner = state.scanner.clone();
    tokio::spawn(async move {
        scanner
            .scan_once(ScanOptions {
                manual: true,
                shops: if request.shops.is_empty() {
                    None
                } else {
                    Some(request.shops)
                },
                ignore_slots: request.ignore_slots,
            })
            .await;
    });
    Json(ApiResponse::success("扫描已触发".to_string()))
}

/// 查看上传任务状态
pub async fn upload_status(State(state): State<AppState>) -> Json<ApiResponse<UploadState>> {
    Json(ApiResponse::success(state.upload_store.snapshot().await))
}

/// 重置上传状态（清空任务、触发标记与通知记录）
pub async fn reset_upload(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    if let Err(e) = state.upload_store.reset().await {
        return Json(ApiResponse::error(1, format!("重置上传状态失败: {}", e)));
    }
    info!("上传状态已重置");
    Json(ApiResponse::success("上传状态已重置".to_string()))
}

/// 暂停上传
pub async fn pause_upload(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    state.pause.pause_upload();
    Json(ApiResponse::success("上传已暂停".to_string()))
}

/// 恢复上传
pub async fn resume_upload(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    state.pause.resume_upload();
    Json(ApiResponse::success("上传已恢复".to_string()))
}
