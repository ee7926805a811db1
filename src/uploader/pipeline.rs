//! 单文件上传执行序列
//!
//! init 会话 -> 分片上传 -> complete 取 vid -> 截取并上传封面
//! -> （可选）转写生成标题 -> 追加话题标签 -> 发布。
//!
//! 核心机制：
//! 1. 分片大小取 init 建议值与协议上限的较小者
//! 2. 每个分片发出前检查上传暂停信号，暂停返回独立的 Paused 结果，
//!    不算失败；调用方负责把对应任务记录抹掉
//! 3. 标题生成失败对任务是致命的，无标题的发布视为无效

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::api::{ApiCredentials, ContentApiClient};
use crate::common::PauseSignal;
use crate::config::{AppConfig, DataPaths};
use crate::media::{
    append_topics, extract_cover, guess_video_mime, SpeechTranscriber, TitleGenerator,
};

/// 上传成功的结果标识
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub vid: String,
    pub video_id: String,
    pub cover_url: String,
    pub title: String,
}

/// 单文件上传的出口：完成或被暂停打断
#[derive(Debug, Clone)]
pub enum UploadResult {
    Done(UploadOutcome),
    Paused,
}

/// 上传执行器
pub struct UploadPipeline {
    api: ContentApiClient,
    paths: DataPaths,
    transcriber: Option<Arc<dyn SpeechTranscriber>>,
    titler: Option<Arc<dyn TitleGenerator>>,
}

impl UploadPipeline {
    pub fn new(
        api: ContentApiClient,
        paths: DataPaths,
        transcriber: Option<Arc<dyn SpeechTranscriber>>,
        titler: Option<Arc<dyn TitleGenerator>>,
    ) -> Self {
        Self {
            api,
            paths,
            transcriber,
            titler,
        }
    }

    /// 完整执行一个文件的上传发布
    pub async fn upload_video_file(
        &self,
        creds: &ApiCredentials,
        config: &AppConfig,
        file_path: &Path,
        shop: &str,
        product: &str,
        pause: &PauseSignal,
    ) -> Result<UploadResult> {
        if !creds.is_complete() {
            return Err(anyhow!("缺少 client_id/client_secret/access_token"));
        }
        if !pause.allowed() {
            return Ok(UploadResult::Paused);
        }

        let filename = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();
        let mime = guess_video_mime(&filename);
        let file_size = tokio::fs::metadata(file_path)
            .await
            .with_context(|| format!("读取文件大小失败: {:?}", file_path))?
            .len();
        info!("准备上传文件: {}, size={} bytes, mime={}", filename, file_size, mime);

        let init = self.api.init_upload(creds, mime).await?;
        let chunk_size = init.effective_chunk_size();
        let total_parts = file_size.div_ceil(chunk_size).max(1);
        info!("开始分片上传，共 {} 片", total_parts);

        let mut file = tokio::fs::File::open(file_path)
            .await
            .with_context(|| format!("打开文件失败: {:?}", file_path))?;
        let mut part_num = 0u64;
        loop {
            if !pause.allowed() {
                info!("上传已暂停，中止 {} 的分片上传", filename);
                return Ok(UploadResult::Paused);
            }
            let mut buf = vec![0u8; chunk_size as usize];
            let mut filled = 0usize;
            while filled < buf.len() {
                let n = file
                    .read(&mut buf[filled..])
                    .await
                    .context("读取视频分片失败")?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            buf.truncate(filled);
            part_num += 1;
            info!("上传分片 {}/{} size={}", part_num, total_parts, filled);
            self.api
                .upload_part(creds, &init.upload_sign, part_num, &filename, buf, mime)
                .await?;
        }

        let vid = self.api.complete_upload(creds, &init.upload_sign).await?;

        info!("开始生成封面");
        let cover_path = extract_cover(file_path, &self.paths.cover_dir).await?;
        info!("封面已生成 {:?}", cover_path.file_name().unwrap_or_default());
        let cover_bytes = tokio::fs::read(&cover_path)
            .await
            .context("读取封面文件失败")?;
        let cover_name = cover_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("cover.jpg")
            .to_string();
        let cover_url = self
            .api
            .upload_image(creds, &cover_name, cover_bytes, "image/jpeg")
            .await?;
        info!("封面上传完成 url={}", cover_url);
        if let Err(e) = tokio::fs::remove_file(&cover_path).await {
            warn!("清理封面临时文件失败: {}", e);
        }

        let title = self.build_title(config, file_path, product).await?;
        let desc = if title.is_empty() {
            append_topics(&config.video_desc, &config.topics)
        } else {
            append_topics(&title, &config.topics)
        };

        let goods_id_raw = config.resolve_goods_id(shop, product);
        let goods_id: i64 = goods_id_raw
            .trim()
            .parse()
            .with_context(|| format!("商品 ID 不是数字: {}", goods_id_raw))?;
        if desc.is_empty() {
            info!("开始发布 vid={} goods_id={}", vid, goods_id);
        } else {
            info!("开始发布 vid={} goods_id={} desc={}", vid, goods_id, clip(&desc, 40));
        }
        let video_id = self
            .api
            .publish_video(creds, &vid, &cover_url, goods_id, &desc)
            .await?;
        info!("发布完成 video_id={}", video_id);

        Ok(UploadResult::Done(UploadOutcome {
            vid,
            video_id,
            cover_url,
            title: desc,
        }))
    }

    /// 生成发布标题
    ///
    /// 未配置标题生成服务时返回空串（发布用固定文案兜底）；
    /// 配置了服务但生成失败，错误向上传播，任务记失败。
    async fn build_title(&self, _config: &AppConfig, file_path: &Path, product: &str) -> Result<String> {
        let Some(titler) = self.titler.as_ref() else {
            return Ok(String::new());
        };
        let transcript = match self.transcriber.as_ref() {
            Some(transcriber) => transcriber
                .transcribe(file_path)
                .await
                .context("语音转写失败")?,
            None => String::new(),
        };
        let title = titler
            .generate(&transcript, product)
            .await
            .context("标题生成失败")?;
        Ok(title)
    }
}

fn clip(raw: &str, limit: usize) -> &str {
    match raw.char_indices().nth(limit) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip() {
        assert_eq!(clip("短文案", 40), "短文案");
        assert_eq!(clip("abcdef", 3), "abc");
    }
}
