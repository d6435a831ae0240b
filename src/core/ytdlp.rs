use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;

use tgfetch_core::core::events::ProgressEvent;

use crate::core::process::LossyLines;
use crate::core::{artifacts, progress};
use crate::models::media::{FetchPlan, FormatInfo, MediaClass, ProbeInfo};

const FILE_MARKER: &str = "tgfetch-file:";

/// The media-resolution side of the pipeline: live detection, format
/// discovery and the raw download.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn probe(&self, url: &str) -> anyhow::Result<ProbeInfo>;

    async fn list_formats(&self, url: &str) -> anyhow::Result<Vec<FormatInfo>>;

    /// Downloads into `dest_dir` and returns the final file path. Progress
    /// goes out through `progress` without ever waiting on the receiver.
    async fn fetch(
        &self,
        url: &str,
        plan: &FetchPlan,
        dest_dir: &Path,
        progress: UnboundedSender<ProgressEvent>,
    ) -> anyhow::Result<PathBuf>;
}

pub struct YtDlp {
    bin: PathBuf,
    audio_quality_kbps: u32,
}

impl YtDlp {
    pub fn new(bin: impl Into<PathBuf>, audio_quality_kbps: u32) -> Self {
        Self {
            bin: bin.into(),
            audio_quality_kbps,
        }
    }

    pub async fn locate(audio_quality_kbps: u32) -> Self {
        let bin = crate::core::dependencies::find_tool("yt-dlp")
            .await
            .unwrap_or_else(|| PathBuf::from(crate::core::dependencies::bin_name("yt-dlp")));
        Self::new(bin, audio_quality_kbps)
    }

    async fn get_video_info(&self, url: &str) -> anyhow::Result<serde_json::Value> {
        let output = crate::core::process::command(&self.bin)
            .args(["--dump-json", "--no-warnings", "--no-playlist", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("failed to run yt-dlp: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("yt-dlp failed: {}", stderr.trim()));
        }

        let json: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| anyhow!("yt-dlp returned invalid JSON: {}", e))?;

        Ok(json)
    }
}

#[async_trait]
impl MediaResolver for YtDlp {
    async fn probe(&self, url: &str) -> anyhow::Result<ProbeInfo> {
        let json = self.get_video_info(url).await?;
        Ok(parse_probe(&json))
    }

    async fn list_formats(&self, url: &str) -> anyhow::Result<Vec<FormatInfo>> {
        let json = self.get_video_info(url).await?;
        Ok(parse_formats(&json))
    }

    async fn fetch(
        &self,
        url: &str,
        plan: &FetchPlan,
        dest_dir: &Path,
        progress: UnboundedSender<ProgressEvent>,
    ) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let output_template = dest_dir
            .join("%(title).200s [%(id)s].%(ext)s")
            .to_string_lossy()
            .to_string();
        let args = build_fetch_args(plan, &output_template, self.audio_quality_kbps, url);
        tracing::debug!("yt-dlp {:?}", args);

        let mut child = crate::core::process::command(&self.bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to start yt-dlp: {}", e))?;

        let stdout = child.stdout.take().ok_or_else(|| anyhow!("yt-dlp has no stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| anyhow!("yt-dlp has no stderr"))?;

        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = LossyLines::new(BufReader::new(stdout));
        let mut final_path: Option<PathBuf> = None;
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_output_line(&line) {
                Some(OutputLine::Percent(pct)) => {
                    let _ = progress.send(ProgressEvent::downloading(Some(pct)));
                }
                Some(OutputLine::File(path)) => final_path = Some(path),
                None => {}
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| anyhow!("yt-dlp process failed: {}", e))?;
        let stderr = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            tracing::error!("yt-dlp exited with {}: {}", status, stderr.trim());
            return Err(anyhow!("yt-dlp exited with {}: {}", status, stderr.trim()));
        }

        match final_path {
            Some(p) if p.exists() => Ok(p),
            _ => {
                tracing::warn!(
                    "yt-dlp did not report the output path, scanning {:?}",
                    dest_dir
                );
                artifacts::find_latest_file(dest_dir)
                    .await?
                    .ok_or_else(|| anyhow!("downloaded file not found in {:?}", dest_dir))
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum OutputLine {
    Percent(f64),
    File(PathBuf),
}

fn parse_output_line(line: &str) -> Option<OutputLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(path) = line.strip_prefix(FILE_MARKER) {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        return Some(OutputLine::File(PathBuf::from(path)));
    }
    progress::parse_percent(line).map(OutputLine::Percent)
}

pub fn build_fetch_args(
    plan: &FetchPlan,
    output_template: &str,
    audio_quality_kbps: u32,
    url: &str,
) -> Vec<String> {
    let mut args = vec!["-f".to_string(), plan.selector.clone()];

    match plan.class {
        MediaClass::Audio => {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "--audio-quality".to_string(),
                format!("{}K", audio_quality_kbps),
            ]);
        }
        MediaClass::Video => {
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }
    }

    args.extend([
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--newline".to_string(),
        // --print implies --quiet, keep the progress lines
        "--progress".to_string(),
        "--progress-template".to_string(),
        "download:%(progress._percent_str)s".to_string(),
        "--print".to_string(),
        format!("after_move:{}%(filepath)s", FILE_MARKER),
        "-o".to_string(),
        output_template.to_string(),
        url.to_string(),
    ]);

    args
}

pub fn parse_probe(json: &serde_json::Value) -> ProbeInfo {
    let is_live = json.get("is_live").and_then(|v| v.as_bool()).unwrap_or(false)
        || matches!(
            json.get("live_status").and_then(|v| v.as_str()),
            Some("is_live") | Some("is_upcoming")
        );

    ProbeInfo {
        is_live,
        title: json
            .get("title")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        duration_seconds: json.get("duration").and_then(|v| v.as_f64()),
    }
}

pub fn parse_formats(json: &serde_json::Value) -> Vec<FormatInfo> {
    let formats = match json.get("formats").and_then(|v| v.as_array()) {
        Some(f) => f,
        None => return Vec::new(),
    };

    let mut result = Vec::new();
    for f in formats {
        let format_id = match f.get("format_id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => continue,
        };

        let ext = f.get("ext").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let height = f.get("height").and_then(|v| v.as_u64()).map(|v| v as u32);
        let vcodec = f.get("vcodec").and_then(|v| v.as_str()).map(|s| s.to_string());
        let acodec = f.get("acodec").and_then(|v| v.as_str()).map(|s| s.to_string());
        let filesize = f
            .get("filesize")
            .or_else(|| f.get("filesize_approx"))
            .and_then(|v| v.as_u64());
        let abr = f.get("abr").and_then(|v| v.as_f64());
        let tbr = f.get("tbr").and_then(|v| v.as_f64());
        let format_note = f
            .get("format_note")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        result.push(FormatInfo {
            format_id,
            ext,
            vcodec,
            acodec,
            height,
            filesize,
            abr,
            tbr,
            format_note,
        });
    }

    result
}
