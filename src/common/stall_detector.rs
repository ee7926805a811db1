//! 传输停滞检测器
//!
//! 在心跳周期上采样本地文件大小，连续若干次零增长判定为停滞。
//!
//! 核心机制：
//! 1. 每个心跳采样一次正在写入的本地文件大小
//! 2. 大小无增长则累加计数，出现增长立即清零
//! 3. 计数达到阈值即判定停滞，由策略决定只记日志还是终止传输

use tracing::{debug, warn};

/// 停滞处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallPolicy {
    /// 仅记录错误日志，传输继续
    LogOnly,
    /// 终止传输，该文件记失败
    Abort,
}

/// 停滞检测配置
#[derive(Debug, Clone)]
pub struct StallConfig {
    /// 心跳周期（秒）
    pub heartbeat_secs: u64,
    /// 连续零增长心跳数，达到即判定停滞
    pub stall_heartbeats: u32,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 20,
            stall_heartbeats: 3,
        }
    }
}

/// 传输停滞检测器
#[derive(Debug)]
pub struct StallDetector {
    config: StallConfig,
    last_size: u64,
    zero_growth: u32,
}

impl StallDetector {
    pub fn new(config: StallConfig) -> Self {
        Self {
            config,
            last_size: 0,
            zero_growth: 0,
        }
    }

    /// 记录一次心跳采样
    ///
    /// # 返回
    /// - `true`: 连续零增长达到阈值，判定停滞
    /// - `false`: 正常
    pub fn observe(&mut self, size: u64) -> bool {
        if size > self.last_size {
            self.last_size = size;
            self.zero_growth = 0;
            debug!("心跳采样: 文件增长到 {} 字节", size);
            return false;
        }

        self.zero_growth += 1;
        debug!(
            "心跳采样: 文件无增长 ({}/{} 次)",
            self.zero_growth, self.config.stall_heartbeats
        );
        if self.zero_growth >= self.config.stall_heartbeats {
            warn!(
                "传输停滞: 连续 {} 个心跳（每 {} 秒）文件大小停留在 {} 字节",
                self.zero_growth, self.config.heartbeat_secs, self.last_size
            );
            return true;
        }
        false
    }

    /// 重置计数（新文件传输开始时调用）
    pub fn reset(&mut self) {
        self.last_size = 0;
        self.zero_growth = 0;
    }

    /// 当前连续零增长次数
    pub fn zero_growth_count(&self) -> u32 {
        self.zero_growth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_flat_heartbeats_is_stall() {
        let mut detector = StallDetector::new(StallConfig::default());
        assert!(!detector.observe(1024));
        assert!(!detector.observe(1024));
        assert!(!detector.observe(1024));
        // 第一次观察把 0 -> 1024 记为增长，之后两次持平，
        // 第四次持平达到 3 次零增长
        assert!(detector.observe(1024));
    }

    #[test]
    fn test_growth_resets_counter() {
        let mut detector = StallDetector::new(StallConfig::default());
        detector.observe(100);
        detector.observe(100);
        detector.observe(100);
        assert_eq!(detector.zero_growth_count(), 2);
        // 增长清零
        assert!(!detector.observe(200));
        assert_eq!(detector.zero_growth_count(), 0);
        assert!(!detector.observe(200));
        assert!(!detector.observe(200));
        assert!(detector.observe(200));
    }

    #[test]
    fn test_reset() {
        let mut detector = StallDetector::new(StallConfig::default());
        detector.observe(100);
        detector.observe(100);
        detector.reset();
        assert_eq!(detector.zero_growth_count(), 0);
        // 重置后第一次采样视为从零增长
        assert!(!detector.observe(50));
    }

    #[test]
    fn test_custom_threshold() {
        let mut detector = StallDetector::new(StallConfig {
            heartbeat_secs: 20,
            stall_heartbeats: 1,
        });
        detector.observe(10);
        assert!(detector.observe(10));
    }
}
