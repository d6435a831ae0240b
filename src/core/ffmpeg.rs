use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;

use crate::core::process::LossyLines;
use crate::models::media::MediaClass;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeTarget {
    pub class: MediaClass,
    pub bitrate_kbps: u32,
}

impl TranscodeTarget {
    pub fn extension(&self) -> &'static str {
        match self.class {
            MediaClass::Audio => "mp3",
            MediaClass::Video => "mp4",
        }
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Media duration in seconds.
    async fn probe_duration(&self, input: &Path) -> anyhow::Result<f64>;

    /// Re-encodes `input` into `output`, reporting the processed media time.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: &TranscodeTarget,
        processed: UnboundedSender<Duration>,
    ) -> anyhow::Result<()>;
}

pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub async fn locate() -> Self {
        use crate::core::dependencies::{bin_name, find_tool};

        let ffmpeg = find_tool("ffmpeg")
            .await
            .unwrap_or_else(|| PathBuf::from(bin_name("ffmpeg")));
        let ffprobe = find_tool("ffprobe")
            .await
            .unwrap_or_else(|| PathBuf::from(bin_name("ffprobe")));
        Self::new(ffmpeg, ffprobe)
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn probe_duration(&self, input: &Path) -> anyhow::Result<f64> {
        let output = crate::core::process::command(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("failed to run ffprobe: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("ffprobe failed: {}", stderr.trim()));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| anyhow!("ffprobe reported no duration for {:?}", input))
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: &TranscodeTarget,
        processed: UnboundedSender<Duration>,
    ) -> anyhow::Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = build_transcode_args(input, output, target);
        tracing::debug!("ffmpeg {:?}", args);

        let mut child = crate::core::process::command(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to start ffmpeg: {}", e))?;

        let stdout = child.stdout.take().ok_or_else(|| anyhow!("ffmpeg has no stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| anyhow!("ffmpeg has no stderr"))?;

        // ffmpeg blocks once the stderr pipe fills up
        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = LossyLines::new(BufReader::new(stdout));
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_progress_record(&line) {
                Some(ProgressRecord::OutTime(t)) => {
                    let _ = processed.send(t);
                }
                Some(ProgressRecord::End) => break,
                None => {}
            }
        }
        // drain whatever is left so ffmpeg can exit
        while let Ok(Some(_)) = lines.next_line().await {}

        let status = child
            .wait()
            .await
            .map_err(|e| anyhow!("ffmpeg process failed: {}", e))?;
        let stderr = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            let tail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("")
                .trim()
                .to_string();
            return Err(anyhow!("ffmpeg exited with {}: {}", status, tail));
        }

        Ok(())
    }
}

pub fn build_transcode_args(input: &Path, output: &Path, target: &TranscodeTarget) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
    ];

    let bitrate = format!("{}k", target.bitrate_kbps);
    match target.class {
        MediaClass::Video => args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-b:v".to_string(),
            bitrate,
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
        ]),
        MediaClass::Audio => args.extend([
            "-vn".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            bitrate,
        ]),
    }

    args.extend([
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

#[derive(Debug, PartialEq)]
pub enum ProgressRecord {
    OutTime(Duration),
    End,
}

/// Reads one `key=value` line of `-progress` output. `out_time_ms` is in
/// microseconds despite its name.
pub fn parse_progress_record(line: &str) -> Option<ProgressRecord> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_ms" | "out_time_us" => {
            let micros: i64 = value.trim().parse().ok()?;
            Some(ProgressRecord::OutTime(Duration::from_micros(
                micros.max(0) as u64,
            )))
        }
        "progress" if value.trim() == "end" => Some(ProgressRecord::End),
        _ => None,
    }
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .filter_map(|l| l.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d > 0.0)
}
