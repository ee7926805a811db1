//! 内容平台 API 客户端
//!
//! 核心机制：
//! 1. 所有请求走统一入口：公共参数 + 业务参数 + MD5 签名，POST 表单或 multipart
//! 2. 分片上传走上传网关，发布走路由网关
//! 3. 每个请求包在重试原语里，命中白名单错误码自动退避重试

use std::collections::BTreeMap;
use std::time::Duration;
use serde_json::Value;
use tracing::{error, info};

use super::retry::{call_with_retry, DEFAULT_RETRIES};
use super::sign::sign_params;
use super::types::{unwrap_response, value_to_string, ApiError, CallError, InitUploadResponse};

/// 上传网关（init / 分片 / complete / 封面图）
const UPLOAD_BASE: &str = "https://gw-upload.pinduoduo.com/api/upload";
/// 路由网关（发布）
const GATEWAY_BASE: &str = "https://gw-api.pinduoduo.com/api/router";

/// 普通请求超时（秒）
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// 携带文件的请求超时（秒）
const UPLOAD_HTTP_TIMEOUT_SECS: u64 = 120;

/// 调用凭证
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
}

impl ApiCredentials {
    /// 凭证是否齐全
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty() && !self.access_token.is_empty()
    }
}

/// 请求中携带的文件部分
struct FilePart {
    field: &'static str,
    filename: String,
    bytes: Vec<u8>,
    mime: String,
}

/// 内容平台 API 客户端
#[derive(Debug, Clone)]
pub struct ContentApiClient {
    http: reqwest::Client,
    retries: u32,
}

impl ContentApiClient {
    pub fn new() -> Self {
        Self::with_retries(DEFAULT_RETRIES)
    }

    pub fn with_retries(retries: u32) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPLOAD_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, retries }
    }

    /// 发起一次签名调用（带重试）
    async fn call(
        &self,
        creds: &ApiCredentials,
        type_name: &str,
        extra_params: &BTreeMap<String, String>,
        file: Option<&FilePart>,
        base_url: &str,
    ) -> Result<Value, CallError> {
        call_with_retry(type_name, self.retries, || {
            self.call_once(creds, type_name, extra_params, file, base_url)
        })
        .await
    }

    /// 单次请求：拼参数、签名、POST、剥响应包装
    async fn call_once(
        &self,
        creds: &ApiCredentials,
        type_name: &str,
        extra_params: &BTreeMap<String, String>,
        file: Option<&FilePart>,
        base_url: &str,
    ) -> Result<Value, CallError> {
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        params.insert("type".to_string(), type_name.to_string());
        params.insert("client_id".to_string(), creds.client_id.clone());
        params.insert("access_token".to_string(), creds.access_token.clone());
        params.insert(
            "timestamp".to_string(),
            chrono::Utc::now().timestamp().to_string(),
        );
        params.insert("data_type".to_string(), "JSON".to_string());
        for (key, value) in extra_params {
            params.insert(key.clone(), value.clone());
        }
        let sign = sign_params(&params, &creds.client_secret);
        params.insert("sign".to_string(), sign);

        let request = if let Some(part) = file {
            let mut form = reqwest::multipart::Form::new();
            for (key, value) in &params {
                form = form.text(key.clone(), value.clone());
            }
            let file_part = reqwest::multipart::Part::bytes(part.bytes.clone())
                .file_name(part.filename.clone())
                .mime_str(&part.mime)
                .map_err(|e| CallError::BadResponse(format!("非法 MIME 类型: {}", e)))?;
            form = form.part(part.field, file_part);
            self.http.post(base_url).multipart(form)
        } else {
            self.http
                .post(base_url)
                .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
                .form(&params)
        };

        let response = request
            .send()
            .await
            .map_err(|e| CallError::Network(e.to_string()))?;
        let raw = response
            .text()
            .await
            .map_err(|e| CallError::Network(e.to_string()))?;
        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|e| CallError::BadResponse(format!("{}: {}", e, truncate(&raw, 200))))?;
        unwrap_response(parsed).map_err(CallError::Api)
    }

    /// 初始化分片上传会话
    pub async fn init_upload(
        &self,
        creds: &ApiCredentials,
        mime: &str,
    ) -> Result<InitUploadResponse, CallError> {
        let mut extra = BTreeMap::new();
        extra.insert("content_type".to_string(), mime.to_string());
        let resp = self
            .call(creds, "pdd.live.video.mall.upload.part.init", &extra, None, UPLOAD_BASE)
            .await?;
        let upload_sign = value_to_string(resp.get("upload_sign"));
        if upload_sign.is_empty() {
            return Err(CallError::BadResponse(format!(
                "init 未返回 upload_sign: {}",
                resp
            )));
        }
        info!("init 返回 upload_sign={}***", truncate(&upload_sign, 12));
        let suggested = resp.get("chunk_size").and_then(Value::as_u64);
        Ok(InitUploadResponse {
            upload_sign,
            suggested_chunk_size: suggested,
        })
    }

    /// 上传一个分片（分片号从 1 开始）
    pub async fn upload_part(
        &self,
        creds: &ApiCredentials,
        upload_sign: &str,
        part_num: u64,
        filename: &str,
        chunk: Vec<u8>,
        mime: &str,
    ) -> Result<(), CallError> {
        let mut extra = BTreeMap::new();
        extra.insert("part_num".to_string(), part_num.to_string());
        extra.insert("upload_sign".to_string(), upload_sign.to_string());
        let part = FilePart {
            field: "part_file",
            filename: filename.to_string(),
            bytes: chunk,
            mime: mime.to_string(),
        };
        self.call(
            creds,
            "pdd.live.video.mall.upload.part",
            &extra,
            Some(&part),
            UPLOAD_BASE,
        )
        .await?;
        Ok(())
    }

    /// 结束分片会话，取回视频资源标识 vid
    pub async fn complete_upload(
        &self,
        creds: &ApiCredentials,
        upload_sign: &str,
    ) -> Result<String, CallError> {
        let mut extra = BTreeMap::new();
        extra.insert("upload_sign".to_string(), upload_sign.to_string());
        let resp = self
            .call(
                creds,
                "pdd.live.video.mall.upload.part.complete",
                &extra,
                None,
                UPLOAD_BASE,
            )
            .await?;
        let vid = value_to_string(resp.get("video_id"));
        if vid.is_empty() {
            return Err(CallError::BadResponse(format!("complete 未返回 vid: {}", resp)));
        }
        info!("complete 返回 vid={}", vid);
        Ok(vid)
    }

    /// 上传封面图，返回图片 URL
    pub async fn upload_image(
        &self,
        creds: &ApiCredentials,
        filename: &str,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<String, CallError> {
        let part = FilePart {
            field: "file",
            filename: filename.to_string(),
            bytes,
            mime: mime.to_string(),
        };
        let resp = self
            .call(
                creds,
                "pdd.live.img.mall.upload",
                &BTreeMap::new(),
                Some(&part),
                UPLOAD_BASE,
            )
            .await?;
        let url = value_to_string(resp.get("url"));
        if url.is_empty() {
            return Err(CallError::BadResponse(format!("封面上传未返回 url: {}", resp)));
        }
        Ok(url)
    }

    /// 发布视频到商品，返回发布后的 video_id
    ///
    /// 发布接口走路由网关，入参包成 {"request": ..., "version": "V1"}。
    pub async fn publish_video(
        &self,
        creds: &ApiCredentials,
        vid: &str,
        cover_url: &str,
        goods_id: i64,
        desc: &str,
    ) -> Result<String, CallError> {
        let mut payload = serde_json::json!({
            "cover": cover_url,
            "goods_id": goods_id,
            "vid": vid,
        });
        if !desc.is_empty() {
            payload["desc"] = Value::String(desc.to_string());
        }
        let payload_str = serde_json::to_string(&payload)
            .map_err(|e| CallError::BadResponse(format!("序列化发布参数失败: {}", e)))?;
        info!("发布参数 request={}", payload_str);

        let mut extra = BTreeMap::new();
        extra.insert("request".to_string(), payload_str);
        extra.insert("version".to_string(), "V1".to_string());
        let resp = self
            .call(creds, "pdd.live.video.mall.create", &extra, None, GATEWAY_BASE)
            .await?;
        extract_published_video_id(&resp)
    }
}

impl Default for ContentApiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// 解析发布响应
///
/// 网关对业务失败不总走 error_response，需要兼看 success / error_code / result.video_id。
fn extract_published_video_id(resp: &Value) -> Result<String, CallError> {
    let error_code = value_to_string(resp.get("error_code"));
    let success = resp.get("success").and_then(Value::as_bool);
    let video_id = {
        let from_result = resp
            .get("result")
            .map(|r| value_to_string(r.get("video_id")))
            .unwrap_or_default();
        if from_result.is_empty() {
            value_to_string(resp.get("video_id"))
        } else {
            from_result
        }
    };

    if success == Some(true) && !video_id.is_empty() {
        if !error_code.is_empty() && error_code != "0" && error_code != "1000000" {
            info!("发布返回 success=true 但 error_code={}: {}", error_code, resp);
        }
        return Ok(video_id);
    }
    if !error_code.is_empty() && error_code != "0" {
        error!("发布响应异常: {}", resp);
        let message = first_non_empty(&[
            value_to_string(resp.get("error_msg")),
            value_to_string(resp.get("msg")),
            value_to_string(resp.get("error_desc")),
        ])
        .unwrap_or_else(|| "unknown".to_string());
        return Err(CallError::Api(ApiError {
            code: error_code,
            message,
            request_id: String::new(),
        }));
    }
    if success == Some(false) {
        error!("发布响应失败: {}", resp);
        let message = first_non_empty(&[
            value_to_string(resp.get("error_msg")),
            value_to_string(resp.get("msg")),
        ])
        .unwrap_or_else(|| "发布失败".to_string());
        return Err(CallError::BadResponse(message));
    }
    if video_id.is_empty() {
        return Err(CallError::BadResponse(format!("发布返回缺少 video_id: {}", resp)));
    }
    Ok(video_id)
}

fn first_non_empty(candidates: &[String]) -> Option<String> {
    candidates.iter().find(|s| !s.is_empty()).cloned()
}

fn truncate(raw: &str, limit: usize) -> &str {
    match raw.char_indices().nth(limit) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
