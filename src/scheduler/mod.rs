//! 后台调度循环
//!
//! 核心机制：
//! 1. 上传扫描、下载扫描、令牌刷新各自独立定时循环，互不阻塞
//! 2. 自动周期走请求通道：操作员触发入队，工作循环串行消费
//! 3. 所有循环挂在同一个取消令牌上，停机时同步收尾；
//!    循环体内的任何错误只记日志，循环本身永不退出

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::auth::{refresh_if_due, OauthClient, TokenStore};
use crate::config::{load_json_or_default, AppConfig, DataPaths};
use crate::cycle::AutoCycle;
use crate::downloader::DownloadRunner;
use crate::uploader::{ScanOptions, UploadScanner};

/// 上传扫描周期
const UPLOAD_SCAN_INTERVAL: Duration = Duration::from_secs(30);
/// 下载扫描周期
const DOWNLOAD_SCAN_INTERVAL: Duration = Duration::from_secs(60);
/// 令牌刷新检查周期
const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// 自动周期触发请求：选中的店铺子集，空表示全部
pub type CycleRequest = Vec<String>;

/// 运行中的后台循环集合
pub struct BackgroundLoops {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl BackgroundLoops {
    /// 启动全部后台循环
    pub fn spawn(
        scanner: Arc<UploadScanner>,
        downloader: Arc<DownloadRunner>,
        tokens: Arc<TokenStore>,
        paths: DataPaths,
        cycle: Arc<AutoCycle>,
        cycle_rx: mpsc::Receiver<CycleRequest>,
        cancel: CancellationToken,
    ) -> Self {
        let mut handles = Vec::new();
        handles.push(spawn_upload_loop(scanner, cancel.clone()));
        handles.push(spawn_download_loop(downloader, cancel.clone()));
        handles.push(spawn_token_refresh_loop(tokens, paths, cancel.clone()));
        handles.push(spawn_cycle_worker(cycle, cycle_rx, cancel.clone()));
        info!("后台调度循环已启动");
        Self { handles, cancel }
    }

    /// 停机：广播取消并等待所有循环退出
    pub async fn shutdown(self) {
        self.cancel.cancel();
        futures::future::join_all(self.handles).await;
        info!("后台调度循环已全部退出");
    }
}

fn spawn_upload_loop(scanner: Arc<UploadScanner>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(UPLOAD_SCAN_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 启动瞬间的首个 tick 跳过，给初始化留出时间
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    scanner.scan_once(ScanOptions::default()).await;
                }
            }
        }
    })
}

fn spawn_download_loop(downloader: Arc<DownloadRunner>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DOWNLOAD_SCAN_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = downloader.run_once(false).await {
                        error!("下载循环出错: {}", e);
                    }
                }
            }
        }
    })
}

fn spawn_token_refresh_loop(
    tokens: Arc<TokenStore>,
    paths: DataPaths,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let oauth = OauthClient::new();
        let mut ticker = tokio::time::interval(TOKEN_REFRESH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let config: AppConfig = load_json_or_default(&paths.config_path);
                    refresh_if_due(&tokens, &config, &oauth).await;
                }
            }
        }
    })
}

fn spawn_cycle_worker(
    cycle: Arc<AutoCycle>,
    mut cycle_rx: mpsc::Receiver<CycleRequest>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = cycle_rx.recv() => {
                    let Some(shops) = request else { break };
                    if let Err(e) = cycle.run(shops).await {
                        error!("自动周期出错: {}", e);
                    }
                }
            }
        }
    })
}
