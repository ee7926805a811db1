// 下载任务处理器

use axum::extract::State;
use axum::Json;
use tracing::{error, info};

use crate::server::AppState;
use crate::store::DownloadState;

use super::ApiResponse;

/// 手动触发一次下载（后台执行，立即返回）
pub async fn trigger_download(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    info!("收到手动下载请求");
    let downloader = state.downloader.clone();
    tokio::spawn(async move {
        if let Err(e) = downloader.run_once(true).await {
            error!("手动下载出错: {}", e);
        }
    });
    Json(ApiResponse::success("下载已触发".to_string()))
}

/// 查看下载状态
pub async fn download_status(State(state): State<AppState>) -> Json<ApiResponse<DownloadState>> {
    Json(ApiResponse::success(state.download_store.snapshot().await))
}

/// 暂停下载
pub async fn pause_download(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    state.pause.pause_download();
    Json(ApiResponse::success("下载已暂停".to_string()))
}

/// 恢复下载
pub async fn resume_download(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    state.pause.resume_download();
    Json(ApiResponse::success("下载已恢复".to_string()))
}
