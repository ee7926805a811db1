//! 上传任务记录
//!
//! 状态机只有两条边：processing -> done、processing -> failed。
//! 任务创建即 processing 并立即持久化，到达终态后不再改写。

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Done,
    Failed,
}

/// 一次本地文件到内容平台的传输尝试
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: String,
    pub shop: String,
    /// 逻辑日期（YYYYMMDD）
    pub date: String,
    /// 产品名/文件名
    pub rel_path: String,
    pub product: String,
    /// 本地绝对路径
    pub path: String,
    pub status: TaskStatus,
    /// 时段序号，单次运行模式下为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
    pub started_at: String,
    pub ended_at: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: String::new(),
            shop: String::new(),
            date: String::new(),
            rel_path: String::new(),
            product: String::new(),
            path: String::new(),
            status: TaskStatus::Processing,
            slot: None,
            started_at: String::new(),
            ended_at: String::new(),
            message: String::new(),
            vid: None,
            video_id: None,
            cover_url: None,
            title: None,
        }
    }
}

impl Task {
    pub fn new(
        shop: &str,
        date: &str,
        rel_path: &str,
        product: &str,
        path: &Path,
        slot: Option<usize>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            shop: shop.to_string(),
            date: date.to_string(),
            rel_path: rel_path.to_string(),
            product: product.to_string(),
            path: path.to_string_lossy().into_owned(),
            status: TaskStatus::Processing,
            slot,
            started_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ..Default::default()
        }
    }

    /// 文件名部分（不含产品目录）
    pub fn filename(&self) -> &str {
        self.rel_path
            .rsplit('/')
            .next()
            .unwrap_or(self.rel_path.as_str())
    }

    pub fn mark_done(&mut self, vid: &str, video_id: &str, cover_url: &str, title: &str) {
        self.status = TaskStatus::Done;
        self.vid = Some(vid.to_string());
        self.video_id = Some(video_id.to_string());
        self.cover_url = Some(cover_url.to_string());
        if !title.is_empty() {
            self.title = Some(title.to_string());
        }
        self.message = "上传发布完成".to_string();
    }

    pub fn mark_failed(&mut self, message: &str) {
        self.status = TaskStatus::Failed;
        self.message = message.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_processing() {
        let task = Task::new(
            "旗舰店",
            "20260825",
            "杯子/a.mp4",
            "杯子",
            Path::new("/video/20260825/旗舰店/杯子/a.mp4"),
            Some(1),
        );
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.slot, Some(1));
        assert_eq!(task.filename(), "a.mp4");
        assert!(!task.started_at.is_empty());
        assert!(task.ended_at.is_empty());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let raw = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(raw, "\"processing\"");
        let status: TaskStatus = serde_json::from_str("\"done\"").unwrap();
        assert_eq!(status, TaskStatus::Done);
    }

    #[test]
    fn test_mark_done_fills_result_fields() {
        let mut task = Task::new("店", "20260825", "杯子/a.mp4", "杯子", Path::new("/a"), None);
        task.mark_done("vid1", "v999", "http://cover", "新品杯子 #好物");
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.video_id.as_deref(), Some("v999"));
        assert_eq!(task.title.as_deref(), Some("新品杯子 #好物"));
    }
}
