//! 网盘命令行工具封装
//!
//! 核心机制：
//! 1. 可执行文件优先取配置里的绝对路径，否则在 PATH 中查找
//! 2. 登录状态探测依次尝试 who/user/account 子命令，
//!    输出包含"未登录"字样即判定未登录
//! 3. 列表命令带显式超时；递归列表为空时退回手工逐层递归
//! 4. 下载命令有多个参数变体，调用方按序尝试

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::warn;

use crate::config::DownloadSettings;
use crate::media::VIDEO_EXTS;

use super::listing::{parse_listing, RemoteEntry};

const CLI_NAME: &str = "BaiduPCS-Go";

/// 登录状态探测结果
#[derive(Debug, Clone, Serialize)]
pub struct CliStatus {
    pub available: bool,
    /// None 表示无法判断
    pub logged_in: Option<bool>,
    pub message: String,
}

/// 网盘命令行工具
#[derive(Debug, Clone)]
pub struct RemoteCli {
    path: PathBuf,
    listing_timeout: Duration,
}

impl RemoteCli {
    /// 按配置解析可执行文件位置，找不到返回 None
    pub fn resolve(settings: &DownloadSettings) -> Option<Self> {
        let custom = settings.cli_path.trim();
        let path = if !custom.is_empty() && Path::new(custom).exists() {
            PathBuf::from(custom)
        } else {
            find_in_path()?
        };
        Some(Self {
            path,
            listing_timeout: Duration::from_secs(settings.listing_timeout_secs.max(1)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 探测登录状态
    pub async fn status(&self) -> CliStatus {
        let mut output = String::new();
        let mut last_err = String::new();
        for sub in ["who", "user", "account"] {
            let result = tokio::time::timeout(
                Duration::from_secs(10),
                Command::new(&self.path).arg(sub).output(),
            )
            .await;
            let Ok(Ok(out)) = result else {
                continue;
            };
            let text = if !out.stdout.is_empty() {
                String::from_utf8_lossy(&out.stdout).trim().to_string()
            } else {
                String::from_utf8_lossy(&out.stderr).trim().to_string()
            };
            if out.status.success() && !text.is_empty() {
                output = text;
                break;
            }
            if !text.is_empty() {
                last_err = text;
            }
        }
        if output.is_empty() {
            return CliStatus {
                available: true,
                logged_in: None,
                message: if last_err.is_empty() {
                    "无法读取登录状态".to_string()
                } else {
                    last_err
                },
            };
        }
        let lower = output.to_lowercase();
        let logged_in = !(lower.contains("not login")
            || lower.contains("not logged")
            || output.contains("未登录"));
        CliStatus {
            available: true,
            logged_in: Some(logged_in),
            message: output,
        }
    }

    /// 列出远端目录
    pub async fn list_dir(&self, remote_dir: &str, recursive: bool) -> Result<Vec<RemoteEntry>> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("ls").arg("--json");
        if recursive {
            cmd.arg("--recursive");
        }
        cmd.arg(remote_dir);
        let output = tokio::time::timeout(self.listing_timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("远端列表超时: {}", remote_dir))?
            .with_context(|| format!("执行 ls 失败: {}", remote_dir))?;
        if !output.status.success() {
            let err = String::from_utf8_lossy(if output.stderr.is_empty() {
                &output.stdout
            } else {
                &output.stderr
            });
            let err = err.trim();
            return Err(anyhow!(
                "ls 失败: {}",
                if err.is_empty() { "未知错误" } else { err }
            ));
        }
        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    /// 收集目录树下的全部视频文件
    ///
    /// 优先用递归列表；递归模式没有产出时退回逐层手工递归。
    pub async fn collect_videos(&self, remote_dir: &str) -> Result<Vec<RemoteEntry>> {
        let mut entries = self.list_dir(remote_dir, true).await?;
        if entries.is_empty() {
            entries = self.collect_manually(remote_dir).await?;
        }
        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_dir && !entry.path.is_empty() && is_video_path(&entry.path))
            .collect())
    }

    /// 逐层递归：迭代栈，避免深目录把调用栈打穿
    async fn collect_manually(&self, remote_dir: &str) -> Result<Vec<RemoteEntry>> {
        let mut stack = vec![remote_dir.to_string()];
        let mut files = Vec::new();
        while let Some(dir) = stack.pop() {
            let entries = match self.list_dir(&dir, false).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("列出 {} 失败，跳过该目录: {}", dir, e);
                    continue;
                }
            };
            for entry in entries {
                if entry.is_dir {
                    stack.push(entry.path);
                } else {
                    files.push(entry);
                }
            }
        }
        Ok(files)
    }

    /// 下载命令的参数变体（不同版本的工具 outdir 参数写法不同）
    pub fn download_variants(&self, remote_path: &str, outdir: &Path) -> Vec<Vec<String>> {
        let out = outdir.to_string_lossy().into_owned();
        vec![
            vec![
                "download".to_string(),
                remote_path.to_string(),
                "--outdir".to_string(),
                out.clone(),
            ],
            vec![
                "download".to_string(),
                remote_path.to_string(),
                "-o".to_string(),
                out.clone(),
            ],
            vec![
                "download".to_string(),
                "-o".to_string(),
                out,
                remote_path.to_string(),
            ],
        ]
    }

    /// 启动一次下载子进程
    pub fn spawn_download(&self, args: &[String]) -> Result<Child> {
        Command::new(&self.path)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("启动下载进程失败: {:?}", self.path))
    }
}

/// 在 PATH 中查找可执行文件
fn find_in_path() -> Option<PathBuf> {
    let exe_name = if cfg!(windows) {
        format!("{}.exe", CLI_NAME)
    } else {
        CLI_NAME.to_string()
    };
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(&exe_name))
        .find(|candidate| candidate.is_file())
}

fn is_video_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
