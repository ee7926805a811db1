//! 暂停控制器
//!
//! 上传、下载各持有一个独立的"允许运行"信号，默认放行。
//! 信号基于 watch 通道：挂起点既可以同步读当前值，
//! 也可以把 Receiver 带进 select! 等待变化，避免定间隔轮询。

use tokio::sync::watch;

/// 单个方向的暂停信号
#[derive(Debug)]
pub struct PauseSignal {
    tx: watch::Sender<bool>,
}

impl PauseSignal {
    fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx }
    }

    /// 当前是否允许运行
    pub fn allowed(&self) -> bool {
        *self.tx.borrow()
    }

    /// 订阅信号变化（传输监控循环在 select! 中使用）
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn set(&self, allowed: bool) {
        // 没有接收者时 send 会失败，此处只关心最新值
        let _ = self.tx.send(allowed);
    }
}

/// 暂停控制器
///
/// 上传与下载相互独立，互不影响。
#[derive(Debug)]
pub struct PauseController {
    upload: PauseSignal,
    download: PauseSignal,
}

impl PauseController {
    pub fn new() -> Self {
        Self {
            upload: PauseSignal::new(),
            download: PauseSignal::new(),
        }
    }

    pub fn upload(&self) -> &PauseSignal {
        &self.upload
    }

    pub fn download(&self) -> &PauseSignal {
        &self.download
    }

    pub fn pause_upload(&self) {
        tracing::info!("上传已暂停");
        self.upload.set(false);
    }

    pub fn resume_upload(&self) {
        tracing::info!("上传已恢复");
        self.upload.set(true);
    }

    pub fn pause_download(&self) {
        tracing::info!("下载已暂停");
        self.download.set(false);
    }

    pub fn resume_download(&self) {
        tracing::info!("下载已恢复");
        self.download.set(true);
    }
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}
