//! 日志系统配置
//!
//! 控制台输出 + 文件持久化（按启动日期命名，自动清理过期文件），
//! 另挂一层操作日志环：最近 200 条以 JSON 行落盘，供前端查询。

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing::field::{Field, Visit};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LogConfig;

const LOG_FILE_PREFIX: &str = "pdd-video.";
/// 操作日志环容量
const RING_CAPACITY: usize = 200;

/// 一条操作日志
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: String,
    pub level: String,
    pub message: String,
}

/// 操作日志环
///
/// 内存里保留最近 200 条，同时镜像到 JSON 行文件；
/// tail 优先读文件（跨重启可见），文件不可读时退回内存环。
#[derive(Debug)]
pub struct LogRing {
    path: PathBuf,
    buffer: Mutex<VecDeque<LogEntry>>,
}

impl LogRing {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            buffer: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    /// 追加一条记录
    pub fn append(&self, level: &str, message: &str) {
        let entry = LogEntry {
            ts: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            level: level.to_string(),
            message: message.to_string(),
        };
        {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= RING_CAPACITY {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());
        }
        // 落盘失败不致命，环里仍有记录
        if let Ok(raw) = serde_json::to_string(&entry) {
            let _ = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .and_then(|mut f| writeln!(f, "{}", raw));
        }
    }

    /// 最近 max_lines 条记录
    pub fn tail(&self, max_lines: usize) -> Vec<LogEntry> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let lines: Vec<&str> = raw.lines().collect();
                let skip = lines.len().saturating_sub(max_lines);
                lines[skip..]
                    .iter()
                    .map(|line| {
                        serde_json::from_str(line).unwrap_or_else(|_| LogEntry {
                            ts: String::new(),
                            level: "info".to_string(),
                            message: line.to_string(),
                        })
                    })
                    .collect()
            }
            Err(_) => self.buffer.lock().iter().cloned().collect(),
        }
    }

    /// 清空操作日志
    pub fn clear(&self) {
        self.buffer.lock().clear();
        let _ = fs::write(&self.path, "");
    }
}

/// 把 info 及以上的 tracing 事件镜像进操作日志环
struct RingLayer {
    ring: Arc<LogRing>,
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for RingLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = *event.metadata().level();
        if level > tracing::Level::INFO {
            return;
        }
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        if !visitor.message.is_empty() {
            self.ring
                .append(&level.to_string().to_lowercase(), &visitor.message);
        }
    }
}

/// 日志系统守卫
/// 必须保持存活，否则文件写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
pub fn init_logging(config: &LogConfig, ring: Arc<LogRing>) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(true);
    let ring_layer = RingLayer { ring };

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(ring_layer)
            .init();
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    }

    if let Err(e) = fs::create_dir_all(&config.log_dir) {
        eprintln!("创建日志目录失败: {:?}, 错误: {}", config.log_dir, e);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(ring_layer)
            .init();
        return LogGuard { _file_guard: None };
    }

    let file_path = config.log_dir.join(format!(
        "{}{}.log",
        LOG_FILE_PREFIX,
        Local::now().format("%Y-%m-%d")
    ));
    let file = match OpenOptions::new().create(true).append(true).open(&file_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("打开日志文件失败: {:?}, 错误: {}, 回退到仅控制台输出", file_path, e);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(ring_layer)
                .init();
            return LogGuard { _file_guard: None };
        }
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(file);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .with(ring_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}",
        config.log_dir, config.retention_days, config.level
    );
    cleanup_old_logs(&config.log_dir, config.retention_days);

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 清理超过保留天数的日志文件
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) {
    let now = Local::now().date_naive();
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return;
        }
    };

    let mut deleted = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(date_str) = filename
            .strip_prefix(LOG_FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(".log"))
        else {
            continue;
        };
        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };
        if now.signed_duration_since(file_date) > retention {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e);
            } else {
                deleted += 1;
            }
        }
    }
    if deleted > 0 {
        info!("已清理 {} 个过期日志文件", deleted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ring_append_and_tail() {
        let dir = tempdir().unwrap();
        let ring = LogRing::new(dir.path().join("upload.log"));
        ring.append("info", "第一条");
        ring.append("error", "第二条");
        let tail = ring.tail(10);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].level, "error");
        assert_eq!(tail[1].message, "第二条");
    }

    #[test]
    fn test_ring_caps_memory_buffer() {
        let dir = tempdir().unwrap();
        let ring = LogRing::new(dir.path().join("upload.log"));
        for i in 0..(RING_CAPACITY + 10) {
            ring.append("info", &format!("消息 {}", i));
        }
        assert_eq!(ring.buffer.lock().len(), RING_CAPACITY);
    }

    #[test]
    fn test_tail_limits_lines() {
        let dir = tempdir().unwrap();
        let ring = LogRing::new(dir.path().join("upload.log"));
        for i in 0..5 {
            ring.append("info", &format!("消息 {}", i));
        }
        let tail = ring.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].message, "消息 4");
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let ring = LogRing::new(dir.path().join("upload.log"));
        ring.append("info", "x");
        ring.clear();
        assert!(ring.tail(10).is_empty());
    }

    #[test]
    fn test_cleanup_old_logs_keeps_recent() {
        let dir = tempdir().unwrap();
        let old = dir.path().join(format!("{}2020-01-01.log", LOG_FILE_PREFIX));
        let recent = dir.path().join(format!(
            "{}{}.log",
            LOG_FILE_PREFIX,
            Local::now().format("%Y-%m-%d")
        ));
        let unrelated = dir.path().join("other.txt");
        fs::write(&old, "x").unwrap();
        fs::write(&recent, "x").unwrap();
        fs::write(&unrelated, "x").unwrap();

        cleanup_old_logs(dir.path(), 7);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(unrelated.exists());
    }
}
