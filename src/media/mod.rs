//! 媒体处理模块
//!
//! 核心机制：
//! 1. 视频文件判定：扩展名白名单，兜底看 MIME 前缀
//! 2. 封面截取：ffmpeg 取第 0 秒一帧，输出到封面目录（uuid 后缀防撞名）
//! 3. ffmpeg 探测结果缓存 30 秒，避免状态接口频繁拉起子进程
//! 4. 语音转写 / 标题生成是外部协作方，trait 抽象后可替换

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

/// 视频扩展名白名单
pub const VIDEO_EXTS: [&str; 8] = ["mp4", "mov", "avi", "mkv", "m4v", "flv", "wmv", "webm"];

/// 按扩展名猜测视频 MIME，猜不出来用 video/mp4 兜底
pub fn guess_video_mime(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("flv") => "video/x-flv",
        Some("wmv") => "video/x-ms-wmv",
        Some("webm") => "video/webm",
        _ => "video/mp4",
    }
}

/// 路径是否指向视频文件
pub fn is_video_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    match extension_of(name).as_deref() {
        Some(ext) => VIDEO_EXTS.contains(&ext),
        None => false,
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// 用 ffmpeg 截取封面帧
///
/// 输出文件名带 uuid 后缀，同名视频多次截取不会互相覆盖。
pub async fn extract_cover(video_path: &Path, cover_dir: &Path) -> Result<PathBuf> {
    let stem = video_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cover");
    let unique = Uuid::new_v4().simple().to_string();
    let output_path = cover_dir.join(format!("{}_{}.jpg", stem, &unique[..8]));

    let output = tokio::process::Command::new("ffmpeg")
        .arg("-y")
        .arg("-ss")
        .arg("0")
        .arg("-i")
        .arg(video_path)
        .arg("-frames:v")
        .arg("1")
        .arg("-q:v")
        .arg("2")
        .arg(&output_path)
        .output()
        .await
        .context("未找到 ffmpeg，无法截取封面，请先安装 ffmpeg")?;

    if !output.status.success() || !output_path.exists() {
        let err = String::from_utf8_lossy(&output.stderr);
        let err = err.trim();
        return Err(anyhow!(
            "封面截取失败: {}",
            if err.is_empty() { "ffmpeg 执行失败" } else { err }
        ));
    }
    Ok(output_path)
}

/// ffmpeg 探测结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegInfo {
    pub available: bool,
    pub path: String,
    pub version: String,
}

/// ffmpeg 探测器，结果缓存 30 秒
#[derive(Debug, Default)]
pub struct FfmpegProbe {
    cache: Mutex<Option<(Instant, FfmpegInfo)>>,
}

impl FfmpegProbe {
    const CACHE_TTL: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        Self::default()
    }

    pub async fn info(&self) -> FfmpegInfo {
        if let Some((at, cached)) = self.cache.lock().clone() {
            if at.elapsed() < Self::CACHE_TTL {
                return cached;
            }
        }
        let info = Self::probe().await;
        *self.cache.lock() = Some((Instant::now(), info.clone()));
        info
    }

    async fn probe() -> FfmpegInfo {
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            tokio::process::Command::new("ffmpeg").arg("-version").output(),
        )
        .await;
        match result {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let version = stdout.lines().next().unwrap_or("").trim().to_string();
                FfmpegInfo {
                    available: true,
                    path: "ffmpeg".to_string(),
                    version,
                }
            }
            _ => FfmpegInfo::default(),
        }
    }
}

/// 语音转写协作方
#[async_trait::async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// 对视频音轨做转写，返回文本
    async fn transcribe(&self, video_path: &Path) -> Result<String>;
}

/// 标题生成协作方
#[async_trait::async_trait]
pub trait TitleGenerator: Send + Sync {
    /// 根据转写文本与产品名生成发布标题
    async fn generate(&self, transcript: &str, product: &str) -> Result<String>;
}

/// HTTP 转写服务
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriber {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait::async_trait]
impl SpeechTranscriber for HttpTranscriber {
    async fn transcribe(&self, video_path: &Path) -> Result<String> {
        #[derive(Deserialize)]
        struct AsrResponse {
            #[serde(default)]
            text: String,
        }
        let payload = serde_json::json!({ "file": video_path.to_string_lossy() });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("请求转写服务失败")?;
        if !response.status().is_success() {
            return Err(anyhow!("转写服务返回 {}", response.status()));
        }
        let parsed: AsrResponse = response.json().await.context("转写响应解析失败")?;
        Ok(parsed.text)
    }
}

/// HTTP 标题生成服务
#[derive(Debug, Clone)]
pub struct HttpTitleGenerator {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTitleGenerator {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait::async_trait]
impl TitleGenerator for HttpTitleGenerator {
    async fn generate(&self, transcript: &str, product: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct TitleResponse {
            #[serde(default)]
            title: String,
        }
        let payload = serde_json::json!({ "text": transcript, "product": product });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("请求标题生成服务失败")?;
        if !response.status().is_success() {
            return Err(anyhow!("标题生成服务返回 {}", response.status()));
        }
        let parsed: TitleResponse = response.json().await.context("标题响应解析失败")?;
        let title = parsed.title.trim().to_string();
        if title.is_empty() {
            return Err(anyhow!("标题生成服务返回空标题"));
        }
        info!("标题生成完成: {}", title);
        Ok(title)
    }
}

/// 把话题标签追加到标题末尾，已含的标签不重复追加
pub fn append_topics(title: &str, topics: &[String]) -> String {
    let mut result = title.trim().to_string();
    for topic in topics {
        let topic = topic.trim();
        if topic.is_empty() || result.contains(topic) {
            continue;
        }
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(topic);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/a/b/杯子宣传.mp4")));
        assert!(is_video_file(Path::new("clip.MOV")));
        assert!(!is_video_file(Path::new("readme.txt")));
        assert!(!is_video_file(Path::new("noext")));
    }

    #[test]
    fn test_guess_video_mime() {
        assert_eq!(guess_video_mime("a.mp4"), "video/mp4");
        assert_eq!(guess_video_mime("a.webm"), "video/webm");
        // 未知扩展名兜底
        assert_eq!(guess_video_mime("a.bin"), "video/mp4");
    }

    #[test]
    fn test_append_topics_dedup() {
        let topics = vec!["#好物".to_string(), "#新品".to_string()];
        assert_eq!(append_topics("杯子上新", &topics), "杯子上新 #好物 #新品");
        // 已含的标签不重复
        assert_eq!(append_topics("杯子 #好物", &topics), "杯子 #好物 #新品");
        // 空标签跳过
        assert_eq!(append_topics("杯子", &["  ".to_string()]), "杯子");
    }
}
