//! 下载流程
//!
//! 把远端 video 目录树镜像到本地根目录：
//! 列出全部远端视频 -> 过滤已入账路径 -> 逐个下载 -> 成功后记账。
//! 账目以远端路径为键，同一周期重复扫描是幂等的。

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::common::{PauseController, StallConfig, StallPolicy};
use crate::config::{load_json_or_default, normalize_remote_root, AppConfig, DataPaths, StallPolicyConfig};
use crate::notify::{notify_once, NotifySink};
use crate::store::DownloadStateStore;
use crate::trigger::{now_day_seconds, single_run_due, today_str, DEFAULT_DOWNLOAD_START_SECS};

use super::cli::RemoteCli;
use super::listing::RemoteEntry;
use super::monitor::{TransferMonitor, TransferOutcome};

pub struct DownloadRunner {
    paths: DataPaths,
    store: Arc<DownloadStateStore>,
    pause: Arc<PauseController>,
    sink: Arc<dyn NotifySink>,
    cancel: CancellationToken,
}

impl DownloadRunner {
    pub fn new(
        paths: DataPaths,
        store: Arc<DownloadStateStore>,
        pause: Arc<PauseController>,
        sink: Arc<dyn NotifySink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            paths,
            store,
            pause,
            sink,
            cancel,
        }
    }

    /// 执行一轮下载
    ///
    /// # 返回
    /// 下载阶段是否正常走完（供自动周期判断是否继续上传阶段）
    pub async fn run_once(&self, manual: bool) -> Result<bool> {
        if manual {
            info!("手动触发下载");
        }
        let config: AppConfig = load_json_or_default(&self.paths.config_path);
        if !config.download.enabled && !manual {
            return Ok(true);
        }
        let remote_root = normalize_remote_root(&config.download.remote_root);
        if remote_root.is_empty() {
            if manual {
                error!("未配置远端根目录，跳过下载");
            }
            return Ok(true);
        }
        let remote_root = remote_root.trim_end_matches('/');
        let remote_video_dir = if remote_root.is_empty() {
            "/video".to_string()
        } else {
            format!("{}/video", remote_root)
        };
        let local_root = config.download.local_root.clone();
        let date = today_str();

        if !manual {
            if !single_run_due(
                now_day_seconds(),
                &config.download.time,
                DEFAULT_DOWNLOAD_START_SECS,
            ) {
                return Ok(true);
            }
            if !self.store.mark_auto_run("download", &date).await? {
                return Ok(true);
            }
            info!("到达下载时间 {}，自动开始下载", config.download.time);
        }

        let Some(cli) = RemoteCli::resolve(&config.download) else {
            error!("未找到 BaiduPCS-Go，可在配置中指定路径");
            return Ok(false);
        };

        info!("扫描远端目录: {}", remote_video_dir);
        let remote_files = match cli.collect_videos(&remote_video_dir).await {
            Ok(files) => files,
            Err(e) => {
                error!("远端扫描失败: {}", e);
                return Ok(false);
            }
        };
        if remote_files.is_empty() {
            info!("远端未发现视频文件");
            return Ok(true);
        }

        let mut new_files = Vec::new();
        for entry in &remote_files {
            if !self.store.contains(&entry.path).await {
                new_files.push(entry.clone());
            }
        }
        info!(
            "发现远端视频 {} 个，新增 {} 个",
            remote_files.len(),
            new_files.len()
        );

        let policy = match config.download.stall_policy {
            StallPolicyConfig::LogOnly => StallPolicy::LogOnly,
            StallPolicyConfig::Abort => StallPolicy::Abort,
        };
        let monitor = TransferMonitor::new(StallConfig::default(), policy);

        let mut downloaded = 0usize;
        for entry in &new_files {
            if !self.pause.download().allowed() {
                info!("下载已暂停，剩余 {} 个文件等恢复后继续", new_files.len() - downloaded);
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }
            match self
                .download_one(&cli, &monitor, entry, &remote_video_dir, &local_root)
                .await
            {
                Ok(TransferOutcome::Completed) => downloaded += 1,
                Ok(TransferOutcome::Paused) | Ok(TransferOutcome::Cancelled) => break,
                Ok(outcome) => error!("下载失败 {}: {:?}", entry.path, outcome),
                Err(e) => error!("下载失败 {}: {}", entry.path, e),
            }
        }

        if downloaded > 0 {
            notify_once(
                self.store.as_ref(),
                self.sink.as_ref(),
                &format!("{}|download|run_complete", date),
                &format!("今日下载完成，新增 {} 个视频", downloaded),
            )
            .await;
        }
        Ok(true)
    }

    /// 下载单个远端文件，保持远端相对路径结构
    async fn download_one(
        &self,
        cli: &RemoteCli,
        monitor: &TransferMonitor,
        entry: &RemoteEntry,
        remote_video_dir: &str,
        local_root: &Path,
    ) -> Result<TransferOutcome> {
        let rel_path = entry
            .path
            .strip_prefix(remote_video_dir)
            .unwrap_or(&entry.path)
            .trim_start_matches('/');
        let target_dir = match Path::new(rel_path).parent() {
            Some(parent) if parent != Path::new("") => local_root.join(parent),
            _ => local_root.to_path_buf(),
        };
        tokio::fs::create_dir_all(&target_dir).await?;
        let local_path = target_dir.join(&entry.name);

        info!("开始下载 {}", entry.path);
        let mut last_outcome = TransferOutcome::Failed("没有可用的下载命令".to_string());
        for args in cli.download_variants(&entry.path, &target_dir) {
            let child = cli.spawn_download(&args)?;
            let outcome = monitor
                .watch(
                    child,
                    &local_path,
                    self.pause.download().subscribe(),
                    &self.cancel,
                )
                .await;
            match outcome {
                TransferOutcome::Completed => {
                    self.store
                        .record_file(
                            &entry.path,
                            entry.size,
                            entry.mtime,
                            &target_dir.to_string_lossy(),
                        )
                        .await?;
                    info!("下载完成 {}", entry.path);
                    return Ok(TransferOutcome::Completed);
                }
                TransferOutcome::Paused | TransferOutcome::Cancelled => return Ok(outcome),
                // 失败或停滞换下一个参数变体再试
                other => last_outcome = other,
            }
        }
        Ok(last_outcome)
    }
}
