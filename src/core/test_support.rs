use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;

use tgfetch_core::core::events::{FileKind, MessageHandle, Messenger, ProgressEvent};

use crate::core::ffmpeg::{TranscodeTarget, Transcoder};
use crate::core::ytdlp::MediaResolver;
use crate::models::media::{FetchPlan, FormatInfo, MediaClass, ProbeInfo};

pub const MB: u64 = 1024 * 1024;

pub fn audio_format(id: &str, abr: f64) -> FormatInfo {
    FormatInfo {
        format_id: id.into(),
        ext: "webm".into(),
        vcodec: Some("none".into()),
        acodec: Some("opus".into()),
        height: None,
        filesize: None,
        abr: Some(abr),
        tbr: None,
        format_note: None,
    }
}

pub fn video_format(id: &str, with_audio: bool) -> FormatInfo {
    FormatInfo {
        format_id: id.into(),
        ext: "mp4".into(),
        vcodec: Some("avc1.64001F".into()),
        acodec: Some(if with_audio { "mp4a.40.2" } else { "none" }.into()),
        height: Some(720),
        filesize: Some(10 * MB),
        abr: None,
        tbr: Some(1200.0),
        format_note: Some("720p".into()),
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Writes `size` bytes. Zero-filled files shrink to almost nothing in a zip;
/// noise does not.
pub async fn write_file(path: &Path, size: u64, incompressible: bool) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    if incompressible {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut buf = Vec::with_capacity(size as usize);
        while (buf.len() as u64) < size {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            buf.extend_from_slice(&state.to_le_bytes());
        }
        buf.truncate(size as usize);
        file.write_all(&buf).await?;
    } else {
        file.set_len(size).await?;
    }
    file.flush().await?;
    Ok(())
}

pub struct FakeResolver {
    live: bool,
    formats: Vec<FormatInfo>,
    file_size: u64,
    incompressible: bool,
    delay: Option<Duration>,
    stall_after_write: Option<Duration>,
    failure: Option<String>,
    gate: Option<Semaphore>,
    probes: AtomicUsize,
    started: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetched: Mutex<Vec<(String, FetchPlan)>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self {
            live: false,
            formats: vec![audio_format("251", 160.0), video_format("18", true)],
            file_size: 1024,
            incompressible: false,
            delay: None,
            stall_after_write: None,
            failure: None,
            gate: None,
            probes: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn live(mut self) -> Self {
        self.live = true;
        self
    }

    pub fn with_formats(mut self, formats: Vec<FormatInfo>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    pub fn incompressible(mut self) -> Self {
        self.incompressible = true;
        self
    }

    /// Sleeps before producing anything.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Writes the file right away, then keeps running.
    pub fn stalling_after_write(mut self, stall: Duration) -> Self {
        self.stall_after_write = Some(stall);
        self
    }

    pub fn failing(mut self, cause: &str) -> Self {
        self.failure = Some(cause.to_string());
        self
    }

    /// Every fetch blocks until `release` hands it a permit.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn plans(&self) -> Vec<FetchPlan> {
        self.fetched.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn probe(&self, _url: &str) -> anyhow::Result<ProbeInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeInfo {
            is_live: self.live,
            title: Some("Test clip".into()),
            duration_seconds: Some(60.0),
        })
    }

    async fn list_formats(&self, _url: &str) -> anyhow::Result<Vec<FormatInfo>> {
        Ok(self.formats.clone())
    }

    async fn fetch(
        &self,
        url: &str,
        plan: &FetchPlan,
        dest_dir: &Path,
        progress: UnboundedSender<ProgressEvent>,
    ) -> anyhow::Result<PathBuf> {
        self.fetched
            .lock()
            .unwrap()
            .push((url.to_string(), plan.clone()));
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.produce(plan, dest_dir, &progress).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl FakeResolver {
    async fn produce(
        &self,
        plan: &FetchPlan,
        dest_dir: &Path,
        progress: &UnboundedSender<ProgressEvent>,
    ) -> anyhow::Result<PathBuf> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(cause) = &self.failure {
            return Err(anyhow!("yt-dlp exited with 1: ERROR: {}", cause));
        }

        for pct in [10.0, 50.0, 90.0] {
            let _ = progress.send(ProgressEvent::downloading(Some(pct)));
        }

        let ext = match plan.class {
            MediaClass::Audio => "mp3",
            MediaClass::Video => "mp4",
        };
        let path = dest_dir.join(format!("Test clip [abc123].{}", ext));
        write_file(&path, self.file_size, self.incompressible).await?;

        if let Some(stall) = self.stall_after_write {
            tokio::time::sleep(stall).await;
        }
        Ok(path)
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeCall {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target: TranscodeTarget,
}

pub struct FakeTranscoder {
    duration: Option<f64>,
    fail: bool,
    output_size: u64,
    calls: Mutex<Vec<TranscodeCall>>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self {
            duration: Some(60.0),
            fail: false,
            output_size: 4096,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without_duration(mut self) -> Self {
        self.duration = None;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_output_size(mut self, size: u64) -> Self {
        self.output_size = size;
        self
    }

    pub fn calls(&self) -> Vec<TranscodeCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe_duration(&self, _input: &Path) -> anyhow::Result<f64> {
        self.duration.ok_or_else(|| anyhow!("ffprobe reported no duration"))
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: &TranscodeTarget,
        processed: UnboundedSender<Duration>,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(TranscodeCall {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            target: target.clone(),
        });

        for secs in [0, 30, 60] {
            let _ = processed.send(Duration::from_secs(secs));
        }

        if self.fail {
            write_file(output, 512, false).await?;
            return Err(anyhow!("ffmpeg exited with 1: Conversion failed!"));
        }
        write_file(output, self.output_size, false).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentFile {
    pub chat_id: i64,
    pub kind: FileKind,
    pub name: String,
    pub size: u64,
    pub caption: Option<String>,
}

/// Records every notice in order. Uploads check the file is really on disk.
pub struct RecordingMessenger {
    next_id: AtomicI64,
    fail_files: AtomicBool,
    notices: Mutex<Vec<String>>,
    files: Mutex<Vec<SentFile>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            fail_files: AtomicBool::new(false),
            notices: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_uploads(&self) {
        self.fail_files.store(true, Ordering::SeqCst);
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }

    pub fn last_notice(&self) -> Option<String> {
        self.notices.lock().unwrap().last().cloned()
    }

    pub fn files(&self) -> Vec<SentFile> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_status(&self, chat_id: i64, text: &str) -> anyhow::Result<MessageHandle> {
        self.notices.lock().unwrap().push(text.to_string());
        Ok(MessageHandle {
            chat_id,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn update_status(&self, _handle: &MessageHandle, text: &str) -> anyhow::Result<()> {
        self.notices.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_file(
        &self,
        chat_id: i64,
        kind: FileKind,
        path: &Path,
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        if self.fail_files.load(Ordering::SeqCst) {
            return Err(anyhow!("Bad Request: request entity too large"));
        }
        let size = tokio::fs::metadata(path).await?.len();
        self.files.lock().unwrap().push(SentFile {
            chat_id,
            kind,
            name: crate::models::media::file_name_of(path),
            size,
            caption: caption.map(|c| c.to_string()),
        });
        Ok(())
    }
}
