//! 通用重试原语
//!
//! 所有远程调用共用同一个带退避的重试包装：
//! 传输层错误或命中白名单的接口错误码时，睡 `min(2^attempt, 8)` 秒重试，
//! 到达重试上限或遇到不可重试错误立即失败，错误码与消息原样透出。

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::types::CallError;

/// 默认重试次数
pub const DEFAULT_RETRIES: u32 = 2;

/// 退避上限（秒）
pub const MAX_BACKOFF_SECS: u64 = 8;

/// 计算指数退避延迟
///
/// # 延迟序列
/// - attempt=1: 2s
/// - attempt=2: 4s
/// - attempt=3: 8s
/// - 上限: 8s
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64
        .checked_pow(attempt)
        .unwrap_or(MAX_BACKOFF_SECS)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// 带退避地执行一次远程调用
///
/// `op` 每次被调用发起一次完整请求；按 `CallError::is_retriable` 判定去留。
pub async fn call_with_retry<F, Fut, T>(op_name: &str, retries: u32, mut op: F) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt <= retries => {
                let delay = backoff_delay(attempt);
                warn!(
                    "{} 失败，{}s 后重试 ({}/{}): {}",
                    op_name,
                    delay.as_secs(),
                    attempt,
                    retries,
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
