// 持久化状态模块
//
// 三份状态文件各有单一持有者，所有读-改-写在异步互斥锁内串行，
// 每次变更后立即落盘，手动触发与定时触发不会互相覆盖。

pub mod cycle_state;
pub mod download_state;
pub mod upload_state;

pub use cycle_state::{CycleState, CycleStateStore};
pub use download_state::{DownloadState, DownloadStateStore, RemoteFileRecord};
pub use upload_state::{UploadState, UploadStateStore};

/// 通知去重存储：同一事件键至多发送一次
#[async_trait::async_trait]
pub trait NotifyDedup: Send + Sync {
    /// 该事件键是否已成功发送过
    async fn already_sent(&self, key: &str) -> bool;
    /// 记录事件键发送成功
    async fn mark_sent(&self, key: &str) -> anyhow::Result<()>;
}
