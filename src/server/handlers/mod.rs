// HTTP 处理器模块

pub mod auth;
pub mod config;
pub mod cycle;
pub mod download;
pub mod system;
pub mod upload;

pub use auth::*;
pub use config::*;
pub use cycle::*;
pub use download::*;
pub use system::*;
pub use upload::*;

use serde::Serialize;

/// 统一的 API 响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }
}
