// 内容平台 API 数据类型

use serde_json::Value;

/// 可重试错误码白名单
///
/// 命中白名单的接口错误走指数退避重试，其余立即失败。
pub const RETRYABLE_ERROR_CODES: [&str; 8] = [
    "50000", "50002", "52001", "52002", "52101", "52102", "52103", "70031",
];

/// 协议允许的分片上限（19MB，规避文档 20MB 上限的单位歧义）
pub const MAX_CHUNK_SIZE: u64 = 19 * 1024 * 1024;

/// 接口返回的业务错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// 平台错误码
    pub code: String,
    /// 错误信息
    pub message: String,
    /// 平台请求 ID（排查用，可为空）
    pub request_id: String,
}

impl ApiError {
    /// 是否在可重试白名单内
    pub fn is_retriable(&self) -> bool {
        RETRYABLE_ERROR_CODES.contains(&self.code.as_str())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.request_id.is_empty() {
            write!(f, "{}:{}", self.code, self.message)
        } else {
            write!(f, "{}:{} request_id={}", self.code, self.message, self.request_id)
        }
    }
}

impl std::error::Error for ApiError {}

/// 远程调用错误
#[derive(Debug)]
pub enum CallError {
    /// 传输层错误（可重试）
    Network(String),
    /// 响应体不是合法 JSON（不可重试）
    BadResponse(String),
    /// 平台业务错误（按错误码白名单判定是否可重试）
    Api(ApiError),
}

impl CallError {
    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        match self {
            CallError::Network(_) => true,
            CallError::BadResponse(_) => false,
            CallError::Api(err) => err.is_retriable(),
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Network(msg) => write!(f, "网络错误: {}", msg),
            CallError::BadResponse(msg) => write!(f, "响应解析失败: {}", msg),
            CallError::Api(err) => write!(f, "接口错误 {}", err),
        }
    }
}

impl std::error::Error for CallError {}

/// 从响应 JSON 中提取 error_response，没有则视为成功
///
/// 成功时剥掉外层 "response" 包装（有些接口不包）。
pub fn unwrap_response(parsed: Value) -> Result<Value, ApiError> {
    if let Some(err) = parsed.get("error_response") {
        return Err(ApiError {
            code: value_to_string(err.get("error_code")),
            message: {
                let msg = value_to_string(err.get("error_msg"));
                if msg.is_empty() {
                    "unknown".to_string()
                } else {
                    msg
                }
            },
            request_id: value_to_string(err.get("request_id")),
        });
    }
    match parsed {
        Value::Object(mut map) => match map.remove("response") {
            Some(inner) => Ok(inner),
            None => Ok(Value::Object(map)),
        },
        other => Ok(other),
    }
}

/// 宽容地把 JSON 值转成字符串（数字错误码也常见）
pub fn value_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// init 响应：上传会话标识 + 建议分片大小
#[derive(Debug, Clone)]
pub struct InitUploadResponse {
    pub upload_sign: String,
    /// 服务端建议分片大小，调用方需再按协议上限截断
    pub suggested_chunk_size: Option<u64>,
}

impl InitUploadResponse {
    /// 实际采用的分片大小：建议值与协议上限取小，缺省用协议上限
    pub fn effective_chunk_size(&self) -> u64 {
        self.suggested_chunk_size
            .map(|s| s.min(MAX_CHUNK_SIZE))
            .filter(|&s| s > 0)
            .unwrap_or(MAX_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryable_codes() {
        let retryable = ApiError {
            code: "52001".to_string(),
            message: "busy".to_string(),
            request_id: String::new(),
        };
        assert!(retryable.is_retriable());

        let fatal = ApiError {
            code: "40001".to_string(),
            message: "bad token".to_string(),
            request_id: String::new(),
        };
        assert!(!fatal.is_retriable());
    }

    #[test]
    fn test_call_error_classification() {
        assert!(CallError::Network("timeout".into()).is_retriable());
        assert!(!CallError::BadResponse("not json".into()).is_retriable());
    }

    #[test]
    fn test_unwrap_error_response() {
        let parsed = json!({
            "error_response": {
                "error_code": 50000,
                "error_msg": "系统繁忙",
                "request_id": "r123"
            }
        });
        let err = unwrap_response(parsed).unwrap_err();
        assert_eq!(err.code, "50000");
        assert_eq!(err.message, "系统繁忙");
        assert_eq!(err.request_id, "r123");
        assert!(err.is_retriable());
    }

    #[test]
    fn test_unwrap_peels_response_wrapper() {
        let parsed = json!({"response": {"upload_sign": "abc"}});
        let inner = unwrap_response(parsed).unwrap();
        assert_eq!(inner["upload_sign"], "abc");

        let bare = json!({"upload_sign": "abc"});
        let inner = unwrap_response(bare).unwrap();
        assert_eq!(inner["upload_sign"], "abc");
    }

    #[test]
    fn test_effective_chunk_size() {
        let capped = InitUploadResponse {
            upload_sign: "s".into(),
            suggested_chunk_size: Some(64 * 1024 * 1024),
        };
        assert_eq!(capped.effective_chunk_size(), MAX_CHUNK_SIZE);

        let small = InitUploadResponse {
            upload_sign: "s".into(),
            suggested_chunk_size: Some(4 * 1024 * 1024),
        };
        assert_eq!(small.effective_chunk_size(), 4 * 1024 * 1024);

        let missing = InitUploadResponse {
            upload_sign: "s".into(),
            suggested_chunk_size: None,
        };
        assert_eq!(missing.effective_chunk_size(), MAX_CHUNK_SIZE);
    }
}
