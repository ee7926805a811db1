//! 自动周期状态存储
//!
//! running 标志保证同一时刻只有一个「先下载后上传」周期在跑；
//! 进程启动时无条件把 running 置回 false，崩溃不会留下卡死的周期。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::{load_json_or_default, save_json};

/// cycle_state.json 的整体结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleState {
    pub running: bool,
    /// 最近一次完整跑完的日期（YYYYMMDD）
    pub last_run_date: String,
    /// 本周期选中的店铺子集，空表示全部
    pub shops: Vec<String>,
}

#[derive(Debug)]
pub struct CycleStateStore {
    path: PathBuf,
    state: Mutex<CycleState>,
}

impl CycleStateStore {
    /// 加载并强制复位 running 标志
    pub fn load(path: PathBuf) -> Self {
        let mut state: CycleState = load_json_or_default(&path);
        if state.running {
            warn!("检测到上次周期未正常结束，复位 running 标志");
            state.running = false;
            if let Err(e) = save_json(&path, &state) {
                warn!("复位周期状态落盘失败: {}", e);
            }
        }
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> CycleState {
        self.state.lock().await.clone()
    }

    /// 尝试占用周期：已有周期在跑则返回 false
    pub async fn try_begin(&self, shops: Vec<String>) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.running {
            return Ok(false);
        }
        state.running = true;
        state.shops = shops;
        save_json(&self.path, &*state)?;
        Ok(true)
    }

    /// 结束周期并记录完成日期
    pub async fn finish(&self, date: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running = false;
        state.last_run_date = date.to_string();
        save_json(&self.path, &*state)
    }

    /// 周期中途放弃（下载阶段失败等），不记完成日期
    pub async fn abort(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running = false;
        save_json(&self.path, &*state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_crashed_running_flag_is_reset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cycle_state.json");
        // 模拟崩溃残留：磁盘上 running=true
        save_json(
            &path,
            &CycleState {
                running: true,
                last_run_date: "20260824".to_string(),
                shops: vec!["旗舰店".to_string()],
            },
        )
        .unwrap();

        let store = CycleStateStore::load(path);
        let state = store.snapshot().await;
        assert!(!state.running);
        assert_eq!(state.last_run_date, "20260824");
        // 复位后可以正常开始新周期
        assert!(store.try_begin(vec![]).await.unwrap());
    }

    #[tokio::test]
    async fn test_only_one_cycle_at_a_time() {
        let dir = tempdir().unwrap();
        let store = CycleStateStore::load(dir.path().join("cycle_state.json"));
        assert!(store.try_begin(vec!["旗舰店".to_string()]).await.unwrap());
        assert!(!store.try_begin(vec![]).await.unwrap());
        store.finish("20260825").await.unwrap();
        assert!(store.try_begin(vec![]).await.unwrap());
    }

    #[tokio::test]
    async fn test_abort_does_not_record_date() {
        let dir = tempdir().unwrap();
        let store = CycleStateStore::load(dir.path().join("cycle_state.json"));
        store.try_begin(vec![]).await.unwrap();
        store.abort().await.unwrap();
        let state = store.snapshot().await;
        assert!(!state.running);
        assert!(state.last_run_date.is_empty());
    }
}
