//! 下载传输监控
//!
//! 核心机制：
//! 1. 每秒探测一次子进程是否退出
//! 2. 每个心跳周期采样本地文件大小，报告瞬时与平均吞吐
//! 3. 连续零增长心跳达到阈值判定停滞：LogOnly 只记错误日志继续等，
//!    Abort 终止子进程并把该文件记失败
//! 4. 暂停信号变化时终止子进程，返回独立的 Paused 结果；
//!    全局停止信号同理返回 Cancelled

use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::common::{StallConfig, StallDetector, StallPolicy};

/// 一次传输的出口
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Failed(String),
    /// 停滞且策略为 Abort
    Stalled,
    Paused,
    Cancelled,
}

/// 传输监控器
pub struct TransferMonitor {
    config: StallConfig,
    policy: StallPolicy,
}

impl TransferMonitor {
    pub fn new(config: StallConfig, policy: StallPolicy) -> Self {
        Self { config, policy }
    }

    /// 守着子进程直到它退出、被暂停、被取消或停滞被终止
    ///
    /// `local_path` 是传输过程中逐渐增长的目标文件。
    pub async fn watch(
        &self,
        mut child: Child,
        local_path: &Path,
        mut pause_rx: watch::Receiver<bool>,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut detector = StallDetector::new(self.config.clone());
        let started = Instant::now();
        let mut last_sample: u64 = 0;
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match child.try_wait() {
                        Ok(Some(status)) if status.success() => return TransferOutcome::Completed,
                        Ok(Some(status)) => {
                            let err = read_stderr(&mut child).await;
                            return TransferOutcome::Failed(if err.is_empty() {
                                format!("下载进程退出码 {:?}", status.code())
                            } else {
                                err
                            });
                        }
                        Ok(None) => {}
                        Err(e) => return TransferOutcome::Failed(format!("探测下载进程失败: {}", e)),
                    }

                    tick += 1;
                    if tick % self.config.heartbeat_secs != 0 {
                        continue;
                    }
                    let size = tokio::fs::metadata(local_path)
                        .await
                        .map(|m| m.len())
                        .unwrap_or(0);
                    let elapsed = started.elapsed().as_secs().max(1);
                    let instant_rate = size.saturating_sub(last_sample) / self.config.heartbeat_secs.max(1);
                    let average_rate = size / elapsed;
                    info!(
                        "下载心跳: {} 字节, 瞬时 {}/s, 平均 {}/s",
                        size, instant_rate, average_rate
                    );
                    last_sample = size;
                    if detector.observe(size) {
                        match self.policy {
                            StallPolicy::LogOnly => {
                                error!("下载疑似停滞，按策略继续等待: {:?}", local_path);
                                detector.reset();
                            }
                            StallPolicy::Abort => {
                                error!("下载停滞，终止传输: {:?}", local_path);
                                kill_quietly(&mut child).await;
                                return TransferOutcome::Stalled;
                            }
                        }
                    }
                }
                changed = pause_rx.changed() => {
                    let paused = changed.is_ok() && !*pause_rx.borrow();
                    if paused {
                        warn!("下载已暂停，终止传输: {:?}", local_path);
                        kill_quietly(&mut child).await;
                        return TransferOutcome::Paused;
                    }
                }
                _ = cancel.cancelled() => {
                    warn!("收到停止信号，终止传输: {:?}", local_path);
                    kill_quietly(&mut child).await;
                    return TransferOutcome::Cancelled;
                }
            }
        }
    }
}

async fn kill_quietly(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("终止下载进程失败: {}", e);
    }
}

async fn read_stderr(child: &mut Child) -> String {
    use tokio::io::AsyncReadExt;
    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };
    let mut buf = String::new();
    let _ = stderr.read_to_string(&mut buf).await;
    buf.trim().chars().take(500).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    fn spawn_sleep(secs: u64) -> Child {
        Command::new("sleep")
            .arg(secs.to_string())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_completed_process() {
        let child = Command::new("true")
            .stderr(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        let monitor = TransferMonitor::new(StallConfig::default(), StallPolicy::LogOnly);
        let (_tx, rx) = watch::channel(true);
        let cancel = CancellationToken::new();
        let outcome = monitor
            .watch(child, Path::new("/tmp/nonexistent"), rx, &cancel)
            .await;
        assert_eq!(outcome, TransferOutcome::Completed);
    }

    #[tokio::test]
    async fn test_failed_process() {
        let child = Command::new("false")
            .stderr(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        let monitor = TransferMonitor::new(StallConfig::default(), StallPolicy::LogOnly);
        let (_tx, rx) = watch::channel(true);
        let cancel = CancellationToken::new();
        let outcome = monitor
            .watch(child, Path::new("/tmp/nonexistent"), rx, &cancel)
            .await;
        assert!(matches!(outcome, TransferOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_pause_terminates_transfer() {
        let child = spawn_sleep(30);
        let monitor = TransferMonitor::new(StallConfig::default(), StallPolicy::LogOnly);
        let (tx, rx) = watch::channel(true);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(false);
            tx
        });
        let outcome = monitor
            .watch(child, Path::new("/tmp/nonexistent"), rx, &cancel)
            .await;
        assert_eq!(outcome, TransferOutcome::Paused);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_cancel_terminates_transfer() {
        let child = spawn_sleep(30);
        let monitor = TransferMonitor::new(StallConfig::default(), StallPolicy::LogOnly);
        let (_tx, rx) = watch::channel(true);
        let cancel = CancellationToken::new();
        let cancel_in = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_in.cancel();
        });
        let outcome = monitor
            .watch(child, Path::new("/tmp/nonexistent"), rx, &cancel)
            .await;
        assert_eq!(outcome, TransferOutcome::Cancelled);
    }
}
