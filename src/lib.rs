// 拼多多视频助手 Rust 核心库
// 定时拉取网盘视频并按计划发布到拼多多商家视频平台

// 内容平台 API 模块（签名、重试、分片上传会话）
pub mod api;

// OAuth 授权模块
pub mod auth;

// 公共模块（暂停控制、停滞检测）
pub mod common;

// 配置管理模块
pub mod config;

// 自动周期模块（先下载后上传的复合流程）
pub mod cycle;

// 下载管道模块
pub mod downloader;

// 日志系统模块
pub mod logging;

// 媒体处理模块（封面截取、语音转写、标题生成）
pub mod media;

// 通知模块（按事件键去重推送）
pub mod notify;

// 时段配额模块
pub mod quota;

// 后台调度循环模块
pub mod scheduler;

// Web服务器模块
pub mod server;

// 持久化状态模块
pub mod store;

// 触发窗口评估模块
pub mod trigger;

// 上传管道模块
pub mod uploader;

// 导出常用类型
pub use common::{PauseController, StallConfig, StallDetector, StallPolicy};
pub use config::{AppConfig, Schedule, ShopSchedule};
pub use downloader::{DownloadRunner, RemoteCli, RemoteEntry, TransferOutcome};
pub use quota::slot_quotas;
pub use server::AppState;
pub use store::{CycleStateStore, DownloadStateStore, UploadStateStore};
pub use trigger::{TimeSlot, AUTO_RUN_WINDOW_SECONDS};
pub use uploader::{Task, TaskStatus, UploadScanner};
