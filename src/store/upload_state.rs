//! 上传任务状态存储
//!
//! 核心机制：
//! 1. 任务列表只追加；任务到达终态后不再改写，只有操作员重置会清空
//! 2. auto_runs 记录「某键今天是否已触发」，键为店铺名或 店铺#时段标签
//! 3. notified 记录已发送的通知事件键
//! 4. 所有变更在锁内完成并立即落盘

use anyhow::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::config::{load_json_or_default, save_json};
use crate::uploader::task::{Task, TaskStatus};

/// upload_state.json 的整体结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadState {
    pub tasks: Vec<Task>,
    /// 运行键 -> 最近触发日期（YYYYMMDD）
    pub auto_runs: BTreeMap<String, String>,
    /// 通知事件键 -> 发送时刻
    pub notified: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct UploadStateStore {
    path: PathBuf,
    state: Mutex<UploadState>,
}

impl UploadStateStore {
    pub fn load(path: PathBuf) -> Self {
        let state = load_json_or_default(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> UploadState {
        self.state.lock().await.clone()
    }

    /// 某店铺某天的全部任务
    pub async fn tasks_for(&self, shop: &str, date: &str) -> Vec<Task> {
        self.state
            .lock()
            .await
            .tasks
            .iter()
            .filter(|t| t.shop == shop && t.date == date)
            .cloned()
            .collect()
    }

    /// 该店铺当天是否存在进行中的任务
    pub async fn has_processing(&self, shop: &str, date: &str) -> bool {
        self.state
            .lock()
            .await
            .tasks
            .iter()
            .any(|t| t.shop == shop && t.date == date && t.status == TaskStatus::Processing)
    }

    /// 追加一条新任务（创建即 processing）并落盘
    pub async fn append_task(&self, task: Task) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tasks.push(task);
        save_json(&self.path, &*state)
    }

    /// 把任务推进到终态并落盘
    pub async fn finish_task<F>(&self, id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Task),
    {
        let mut state = self.state.lock().await;
        if let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) {
            mutate(task);
            task.ended_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            save_json(&self.path, &*state)?;
        }
        Ok(())
    }

    /// 删除一条任务记录
    ///
    /// 暂停导致中止的任务走这里：暂停不是失败，净效果等同于从未创建。
    pub async fn discard_task(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tasks.retain(|t| t.id != id);
        save_json(&self.path, &*state)
    }

    /// 记录运行键今天已触发
    ///
    /// # 返回
    /// - `true`: 本次是首次触发，标记已落盘
    /// - `false`: 今天已触发过，调用方应跳过
    pub async fn mark_auto_run(&self, key: &str, date: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.auto_runs.get(key).map(String::as_str) == Some(date) {
            return Ok(false);
        }
        state.auto_runs.insert(key.to_string(), date.to_string());
        save_json(&self.path, &*state)?;
        Ok(true)
    }

    /// 操作员重置：清空任务列表与触发标记
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tasks.clear();
        state.auto_runs.clear();
        save_json(&self.path, &*state)
    }
}

#[async_trait::async_trait]
impl super::NotifyDedup for UploadStateStore {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NotifyDedup;
    use tempfile::tempdir;

    fn sample_task(shop: &str, date: &str, rel_path: &str) -> Task {
        Task::new(
            shop,
            date,
            rel_path,
            "杯子",
            std::path::Path::new("/video/file.mp4"),
            None,
        )
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let dir = tempdir().unwrap();
        let store = UploadStateStore::load(dir.path().join("upload_state.json"));
        store
            .append_task(sample_task("旗舰店", "20260825", "杯子/a.mp4"))
            .await
            .unwrap();

        assert!(store.has_processing("旗舰店", "20260825").await);
        assert!(!store.has_processing("旗舰店", "20260826").await);
        assert_eq!(store.tasks_for("旗舰店", "20260825").await.len(), 1);
    }

    #[tokio::test]
    async fn test_finish_task_sets_ended_at() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upload_state.json");
        let store = UploadStateStore::load(path.clone());
        let task = sample_task("旗舰店", "20260825", "杯子/a.mp4");
        let id = task.id.clone();
        store.append_task(task).await.unwrap();
        store
            .finish_task(&id, |t| t.mark_done("v1", "v1", "http://c", "标题"))
            .await
            .unwrap();

        // 重新加载确认落盘
        let reloaded = UploadStateStore::load(path);
        let tasks = reloaded.tasks_for("旗舰店", "20260825").await;
        assert_eq!(tasks[0].status, TaskStatus::Done);
        assert!(!tasks[0].ended_at.is_empty());
        assert!(!reloaded.has_processing("旗舰店", "20260825").await);
    }

    #[tokio::test]
    async fn test_discard_task_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let store = UploadStateStore::load(dir.path().join("upload_state.json"));
        let task = sample_task("旗舰店", "20260825", "杯子/a.mp4");
        let id = task.id.clone();
        store.append_task(task).await.unwrap();
        store.discard_task(&id).await.unwrap();
        assert!(store.tasks_for("旗舰店", "20260825").await.is_empty());
    }

    #[tokio::test]
    async fn test_auto_run_marker_fires_once_per_day() {
        let dir = tempdir().unwrap();
        let store = UploadStateStore::load(dir.path().join("upload_state.json"));
        assert!(store.mark_auto_run("旗舰店", "20260825").await.unwrap());
        assert!(!store.mark_auto_run("旗舰店", "20260825").await.unwrap());
        // 日期变化后可以再次触发
        assert!(store.mark_auto_run("旗舰店", "20260826").await.unwrap());
    }

    #[tokio::test]
    async fn test_notify_dedup() {
        let dir = tempdir().unwrap();
        let store = UploadStateStore::load(dir.path().join("upload_state.json"));
        assert!(!store.already_sent("20260825|旗舰店|batch_complete").await);
        store
            .mark_sent("20260825|旗舰店|batch_complete")
            .await
            .unwrap();
        assert!(store.already_sent("20260825|旗舰店|batch_complete").await);
    }

    #[tokio::test]
    async fn test_reset_clears_tasks_and_markers() {
        let dir = tempdir().unwrap();
        let store = UploadStateStore::load(dir.path().join("upload_state.json"));
        store
            .append_task(sample_task("旗舰店", "20260825", "杯子/a.mp4"))
            .await
            .unwrap();
        store.mark_auto_run("旗舰店", "20260825").await.unwrap();
        store.reset().await.unwrap();
        assert!(store.snapshot().await.tasks.is_empty());
        assert!(store.mark_auto_run("旗舰店", "20260825").await.unwrap());
    }
}
