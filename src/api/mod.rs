// 内容平台 API 模块

pub mod client;
pub mod retry;
pub mod sign;
pub mod types;

pub use client::{ApiCredentials, ContentApiClient};
pub use retry::{call_with_retry, DEFAULT_RETRIES};
pub use types::{ApiError, CallError, InitUploadResponse, RETRYABLE_ERROR_CODES};
