// 应用状态

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::TokenStore;
use crate::common::PauseController;
use crate::config::DataPaths;
use crate::downloader::DownloadRunner;
use crate::logging::LogRing;
use crate::media::FfmpegProbe;
use crate::notify::{HttpNotifySink, NoopNotifySink, NotifySink};
use crate::scheduler::CycleRequest;
use crate::store::{CycleStateStore, DownloadStateStore, UploadStateStore};
use crate::uploader::UploadScanner;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 数据目录布局
    pub paths: DataPaths,
    pub upload_store: Arc<UploadStateStore>,
    pub download_store: Arc<DownloadStateStore>,
    pub cycle_store: Arc<CycleStateStore>,
    pub tokens: Arc<TokenStore>,
    pub scanner: Arc<UploadScanner>,
    pub downloader: Arc<DownloadRunner>,
    pub pause: Arc<PauseController>,
    pub log_ring: Arc<LogRing>,
    pub ffmpeg: Arc<FfmpegProbe>,
    /// 自动周期触发队列入口
    pub cycle_tx: mpsc::Sender<CycleRequest>,
}

/// 按配置选择通知通道：端点为空用空实现
pub fn build_notify_sink(endpoint: &str) -> Arc<dyn NotifySink> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        Arc::new(NoopNotifySink)
    } else {
        Arc::new(HttpNotifySink::new(endpoint.to_string()))
    }
}
