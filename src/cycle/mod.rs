//! 自动周期：先下载后上传的复合流程
//!
//! 核心机制：
//! 1. running 标志独占：已有周期在跑则直接拒绝
//! 2. 下载阶段失败会放弃当天的上传阶段（显式依赖）
//! 3. 跑完记录完成日期；标志在进程启动时强制复位（见状态存储）

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use crate::downloader::DownloadRunner;
use crate::store::CycleStateStore;
use crate::trigger::today_str;
use crate::uploader::{ScanOptions, UploadScanner};

pub struct AutoCycle {
    state: Arc<CycleStateStore>,
    downloader: Arc<DownloadRunner>,
    scanner: Arc<UploadScanner>,
}

impl AutoCycle {
    pub fn new(
        state: Arc<CycleStateStore>,
        downloader: Arc<DownloadRunner>,
        scanner: Arc<UploadScanner>,
    ) -> Self {
        Self {
            state,
            downloader,
            scanner,
        }
    }

    /// 跑一个完整周期
    ///
    /// # 返回
    /// - `Ok(true)`: 周期完整跑完
    /// - `Ok(false)`: 被拒绝（已有周期在跑）或下载阶段失败中止
    pub async fn run(&self, shops: Vec<String>) -> Result<bool> {
        if !self.state.try_begin(shops.clone()).await? {
            info!("已有自动周期在执行，本次触发忽略");
            return Ok(false);
        }
        let date = today_str();
        info!("自动周期开始，店铺范围: {:?}", if shops.is_empty() { vec!["全部".to_string()] } else { shops.clone() });

        let download_ok = match self.downloader.run_once(true).await {
            Ok(ok) => ok,
            Err(e) => {
                error!("自动周期下载阶段出错: {}", e);
                false
            }
        };
        if !download_ok {
            // 下载没走完，当天的上传阶段随之放弃
            error!("下载阶段未完成，放弃今日上传阶段");
            self.state.abort().await?;
            return Ok(false);
        }

        self.scanner
            .scan_once(ScanOptions {
                manual: true,
                shops: if shops.is_empty() { None } else { Some(shops) },
                ignore_slots: false,
            })
            .await;

        self.state.finish(&date).await?;
        info!("自动周期完成");
        Ok(true)
    }
}
