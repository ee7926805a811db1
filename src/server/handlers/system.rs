// 系统信息处理器

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{load_json_or_default, AppConfig};
use crate::downloader::{CliStatus, RemoteCli};
use crate::logging::LogEntry;
use crate::media::FfmpegInfo;
use crate::server::AppState;

use super::ApiResponse;

/// 默认返回的操作日志条数
const DEFAULT_LOG_LINES: usize = 200;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    pub lines: Option<usize>,
}

/// 查看最近的操作日志
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Json<ApiResponse<Vec<LogEntry>>> {
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES).max(1);
    Json(ApiResponse::success(state.log_ring.tail(lines)))
}

/// 清空操作日志
pub async fn clear_logs(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    state.log_ring.clear();
    info!("操作日志已清空");
    Json(ApiResponse::success("日志已清空".to_string()))
}

/// 探测 ffmpeg 可用性
pub async fn ffmpeg_info(State(state): State<AppState>) -> Json<ApiResponse<FfmpegInfo>> {
    Json(ApiResponse::success(state.ffmpeg.info().await))
}

/// 探测网盘命令行工具状态
pub async fn cli_status(State(state): State<AppState>) -> Json<ApiResponse<CliStatus>> {
    let config: AppConfig = load_json_or_default(&state.paths.config_path);
    let status = match RemoteCli::resolve(&config.download) {
        Some(cli) => cli.status().await,
        None => CliStatus {
            available: false,
            logged_in: None,
            message: "未找到 BaiduPCS-Go 可执行文件".to_string(),
        },
    };
    Json(ApiResponse::success(status))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseStatus {
    pub upload_paused: bool,
    pub download_paused: bool,
}

/// 查看暂停状态
pub async fn pause_status(State(state): State<AppState>) -> Json<ApiResponse<PauseStatus>> {
    Json(ApiResponse::success(PauseStatus {
        upload_paused: !state.pause.upload().allowed(),
        download_paused: !state.pause.download().allowed(),
    }))
}
