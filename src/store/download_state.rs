//! 下载状态存储
//!
//! files 映射以远端路径为键，入账即视为永久完成，
//! 后续扫描对同一周期重复执行是幂等的。

use anyhow::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::config::{load_json_or_default, save_json};

/// 一个已下载远端文件的账目
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteFileRecord {
    pub size: u64,
    pub mtime: i64,
    /// 本地落盘时刻
    pub downloaded_at: String,
    /// 下载到的本地目录
    pub local_dir: String,
}

/// download_state.json 的整体结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadState {
    /// 远端路径 -> 下载账目
    pub files: BTreeMap<String, RemoteFileRecord>,
    pub auto_runs: BTreeMap<String, String>,
    pub notified: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct DownloadStateStore {
    path: PathBuf,
    state: Mutex<DownloadState>,
}

impl DownloadStateStore {
    pub fn load(path: PathBuf) -> Self {
        let state = load_json_or_default(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> DownloadState {
        self.state.lock().await.clone()
    }

    /// 远端路径是否已下载过
    pub async fn contains(&self, remote_path: &str) -> bool {
        self.state.lock().await.files.contains_key(remote_path)
    }

    /// 记录一次完成的下载并落盘
    pub async fn record_file(&self, remote_path: &str, size: u64, mtime: i64, local_dir: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.files.insert(
            remote_path.to_string(),
            RemoteFileRecord {
                size,
                mtime,
                downloaded_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                local_dir: local_dir.to_string(),
            },
        );
        save_json(&self.path, &*state)
    }

    /// 记录运行键今天已触发，今天已触发过则返回 false
    pub async fn mark_auto_run(&self, key: &str, date: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.auto_runs.get(key).map(String::as_str) == Some(date) {
            return Ok(false);
        }
        state.auto_runs.insert(key.to_string(), date.to_string());
        save_json(&self.path, &*state)?;
        Ok(true)
    }

    /// 某运行键今天是否已触发
    pub async fn auto_run_done(&self, key: &str, date: &str) -> bool {
        self.state.lock().await.auto_runs.get(key).map(String::as_str) == Some(date)
    }
}

#[async_trait::async_trait]
impl super::NotifyDedup for DownloadStateStore {
    async fn already_sent(&self, key: &str) -> bool {
        self.state.lock().await.notified.contains_key(key)
    }

    async fn mark_sent(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.notified.insert(
            key.to_string(),
            Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        save_json(&self.path, &*state)
    }
}
