use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{timeout_at, Instant};
use tracing::Instrument;

use tgfetch_core::core::events::{MessageHandle, Messenger, ProgressEvent};
use tgfetch_core::models::settings::PipelineSettings;

use crate::core::artifacts;
use crate::core::ffmpeg::Transcoder;
use crate::core::progress::{describe, ProgressThrottle};
use crate::core::remediation::Escalator;
use crate::core::worker_pool::{AcquisitionPool, FetchHandle, FetchJob};
use crate::core::ytdlp::MediaResolver;
use crate::error::PipelineError;
use crate::models::download::{DownloadTask, TaskReport, TaskState};
use crate::models::media::{Artifact, ArtifactKind, ProbeInfo};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Edits one status message in place. Closes after the terminal notice so
/// nothing can be posted after it.
struct StatusReporter<'a> {
    messenger: &'a dyn Messenger,
    chat_id: i64,
    handle: Option<MessageHandle>,
    last_text: Option<String>,
    closed: bool,
}

impl<'a> StatusReporter<'a> {
    fn new(messenger: &'a dyn Messenger, chat_id: i64, handle: Option<MessageHandle>) -> Self {
        Self {
            messenger,
            chat_id,
            handle,
            last_text: None,
            closed: false,
        }
    }

    async fn post(&mut self, text: &str) {
        if self.closed || self.last_text.as_deref() == Some(text) {
            return;
        }
        match self.handle {
            Some(handle) => {
                if let Err(e) = self.messenger.update_status(&handle, text).await {
                    tracing::warn!("status edit failed: {:#}", e);
                }
            }
            None => match self.messenger.send_status(self.chat_id, text).await {
                Ok(handle) => self.handle = Some(handle),
                Err(e) => tracing::warn!("status message failed: {:#}", e),
            },
        }
        self.last_text = Some(text.to_string());
    }

    async fn close(&mut self, text: &str) {
        self.post(text).await;
        self.closed = true;
    }
}

struct Progress {
    download: ProgressThrottle,
    recompress: ProgressThrottle,
}

enum Fetched {
    Artifact(Artifact),
    Failed(PipelineError),
    TimedOut(Option<FetchHandle>),
}

pub struct DeliveryCoordinator {
    resolver: Arc<dyn MediaResolver>,
    pool: AcquisitionPool,
    escalator: Escalator,
    messenger: Arc<dyn Messenger>,
    fetch_deadline: Duration,
    download_interval: Duration,
    recompress_interval: Duration,
}

impl DeliveryCoordinator {
    pub fn new(
        resolver: Arc<dyn MediaResolver>,
        transcoder: Arc<dyn Transcoder>,
        messenger: Arc<dyn Messenger>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            pool: AcquisitionPool::new(resolver.clone(), settings.worker_slots),
            escalator: Escalator::new(
                transcoder,
                settings.max_size_bytes(),
                settings.recompress_bitrate_kbps,
                settings.recompress_audio_bitrate_kbps,
            ),
            resolver,
            messenger,
            fetch_deadline: settings.fetch_timeout(),
            download_interval: settings.download_progress_interval(),
            recompress_interval: settings.recompress_progress_interval(),
        }
    }

    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.fetch_deadline = deadline;
        self
    }

    pub fn pool(&self) -> &AcquisitionPool {
        &self.pool
    }

    /// Runs one task to a terminal state and removes its directory. Every
    /// outcome ends with exactly one final notice or a delivered file.
    pub async fn run(&self, task: DownloadTask) -> TaskReport {
        let span = tracing::info_span!("task", id = %task.id);
        self.run_inner(task).instrument(span).await
    }

    async fn run_inner(&self, mut task: DownloadTask) -> TaskReport {
        tracing::info!("{} requested for {}", task.request.label(), task.url);
        let mut reporter =
            StatusReporter::new(self.messenger.as_ref(), task.chat_id, task.status_message);
        let mut progress = Progress {
            download: ProgressThrottle::new(self.download_interval),
            recompress: ProgressThrottle::new(self.recompress_interval),
        };

        let mut report = TaskReport {
            task_id: task.id,
            state: TaskState::Pending,
            delivered: None,
            recovered_after_timeout: false,
        };

        let terminal = self
            .advance(&mut task, &mut reporter, &mut progress, &mut report)
            .await;
        task.transition(terminal.clone());

        let notice = match &terminal {
            TaskState::Failed(e) | TaskState::TimedOut(e) => {
                tracing::error!("task ended {}: {}", terminal.name(), e);
                e.user_message()
            }
            _ => "✅ Done!".to_string(),
        };
        reporter.close(&notice).await;

        artifacts::cleanup_task_dir(&task.dest_dir).await;
        report.state = terminal;
        report
    }

    /// Walks the lifecycle up to the point where a terminal state is known.
    async fn advance(
        &self,
        task: &mut DownloadTask,
        reporter: &mut StatusReporter<'_>,
        progress: &mut Progress,
        report: &mut TaskReport,
    ) -> TaskState {
        task.transition(TaskState::Probing);
        reporter.post(&describe(&ProgressEvent::probing())).await;

        let info = match self.resolver.probe(&task.url).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("probe failed, treating as not live: {:#}", e);
                ProbeInfo::default()
            }
        };
        if info.is_live {
            return TaskState::Failed(PipelineError::LiveStreamUnsupported);
        }

        task.transition(TaskState::Fetching);
        let artifact = match self.fetch(task, reporter, &mut progress.download).await {
            Fetched::Artifact(a) => a,
            Fetched::Failed(e) => return TaskState::Failed(e),
            Fetched::TimedOut(handle) => {
                return self.recover(task, handle, &info, reporter, report).await;
            }
        };

        task.transition(TaskState::Evaluating);
        tracing::info!("{} is {:.1} MB", artifact.file_name(), artifact.size_mb());
        let artifact = if artifact.exceeds(self.escalator.ceiling_bytes()) {
            task.transition(TaskState::Remediating);
            reporter
                .post(&format!(
                    "📉 File is {:.1} MB, over the {} MB limit. Shrinking it...",
                    artifact.size_mb(),
                    self.escalator.ceiling_bytes() / BYTES_PER_MB
                ))
                .await;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let remediated = drive(
                self.escalator
                    .remediate(artifact, task.request.class(), info.duration_seconds, tx),
                &mut rx,
                &mut progress.recompress,
                reporter,
            )
            .await;
            match remediated {
                Ok(a) => a,
                Err(e) => return TaskState::Failed(e),
            }
        } else {
            artifact
        };

        task.transition(TaskState::Transmitting);
        match self.transmit(task, &artifact, &info, reporter).await {
            Ok(()) => {
                report.delivered = Some(artifact.kind);
                TaskState::Done
            }
            Err(e) => TaskState::Failed(e),
        }
    }

    async fn fetch(
        &self,
        task: &DownloadTask,
        reporter: &mut StatusReporter<'_>,
        throttle: &mut ProgressThrottle,
    ) -> Fetched {
        let deadline = Instant::now() + self.fetch_deadline;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = FetchJob {
            url: task.url.clone(),
            request: task.request.clone(),
            dest_dir: task.dest_dir.clone(),
        };

        let submitted = timeout_at(
            deadline,
            drive(self.pool.submit(job, tx), &mut rx, throttle, reporter),
        )
        .await;
        let mut handle = match submitted {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Fetched::Failed(e),
            Err(_) => return Fetched::TimedOut(None),
        };

        let joined = timeout_at(deadline, drive(&mut handle, &mut rx, throttle, reporter)).await;
        match joined {
            Ok(Ok(Ok(artifact))) => Fetched::Artifact(artifact),
            Ok(Ok(Err(e))) => Fetched::Failed(e),
            Ok(Err(join_err)) => Fetched::Failed(PipelineError::acquisition(join_err)),
            Err(_) => Fetched::TimedOut(Some(handle)),
        }
    }

    /// Degraded path after the fetch deadline: look at whatever the worker
    /// left in the task directory.
    async fn recover(
        &self,
        task: &mut DownloadTask,
        handle: Option<FetchHandle>,
        info: &ProbeInfo,
        reporter: &mut StatusReporter<'_>,
        report: &mut TaskReport,
    ) -> TaskState {
        tracing::warn!("fetch exceeded {:?}, looking for a finished file", self.fetch_deadline);
        reporter
            .post("⌛ Download timed out, checking for a finished file...")
            .await;
        let state = self.recover_from_disk(task, info, reporter, report).await;
        if let Some(handle) = handle {
            spawn_reaper(handle, task.dest_dir.clone());
        }
        state
    }

    async fn recover_from_disk(
        &self,
        task: &mut DownloadTask,
        info: &ProbeInfo,
        reporter: &mut StatusReporter<'_>,
        report: &mut TaskReport,
    ) -> TaskState {
        let found = match artifacts::find_latest_file(&task.dest_dir).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("scanning {:?} failed: {:#}", task.dest_dir, e);
                None
            }
        };
        let artifact = match found {
            Some(path) => Artifact::measure(&path, ArtifactKind::Media).await.ok(),
            None => None,
        };
        let Some(artifact) = artifact else {
            return TaskState::Failed(PipelineError::TimedOutNoArtifact);
        };

        if artifact.exceeds(self.escalator.ceiling_bytes()) {
            tracing::warn!(
                "recovered {} is {:.1} MB, over the limit",
                artifact.file_name(),
                artifact.size_mb()
            );
            return TaskState::TimedOut(PipelineError::TimedOutPendingRemediation);
        }

        tracing::info!("recovered {} after timeout", artifact.file_name());
        task.transition(TaskState::Transmitting);
        match self.transmit(task, &artifact, info, reporter).await {
            Ok(()) => {
                report.delivered = Some(artifact.kind);
                report.recovered_after_timeout = true;
                TaskState::Done
            }
            Err(e) => TaskState::Failed(e),
        }
    }

    async fn transmit(
        &self,
        task: &DownloadTask,
        artifact: &Artifact,
        info: &ProbeInfo,
        reporter: &mut StatusReporter<'_>,
    ) -> Result<(), PipelineError> {
        reporter
            .post(&format!("📤 Sending {:.1} MB...", artifact.size_mb()))
            .await;
        let caption = caption_for(info, artifact);
        let kind = artifact.file_kind(task.request.class());

        self.messenger
            .send_file(task.chat_id, kind, &artifact.path, caption.as_deref())
            .await
            .map_err(|e| {
                tracing::error!("upload of {} failed: {:#}", artifact.file_name(), e);
                PipelineError::delivery(format!("{:#}", e))
            })
    }
}

/// Awaits `fut` while forwarding progress through `throttle`. Events already
/// queued when `fut` finishes are still forwarded, so `finished` is never
/// lost.
async fn drive<F: Future>(
    fut: F,
    rx: &mut UnboundedReceiver<ProgressEvent>,
    throttle: &mut ProgressThrottle,
    reporter: &mut StatusReporter<'_>,
) -> F::Output {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            out = &mut fut => {
                while let Ok(event) = rx.try_recv() {
                    forward(&event, throttle, reporter).await;
                }
                return out;
            }
            Some(event) = rx.recv() => forward(&event, throttle, reporter).await,
        }
    }
}

async fn forward(
    event: &ProgressEvent,
    throttle: &mut ProgressThrottle,
    reporter: &mut StatusReporter<'_>,
) {
    if throttle.should_emit(event) {
        tracing::debug!("progress {:?} {:?}", event.status, event.percent);
        reporter.post(&describe(event)).await;
    }
}

/// A timed-out worker keeps running; once it stops, drop what it wrote.
fn spawn_reaper(handle: FetchHandle, dir: std::path::PathBuf) {
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(a)) => tracing::info!("late fetch finished with {}, discarding", a.file_name()),
            Ok(Err(e)) => tracing::info!("late fetch failed: {}", e),
            Err(e) => tracing::warn!("late fetch panicked: {}", e),
        }
        artifacts::cleanup_task_dir(&dir).await;
    });
}

fn caption_for(info: &ProbeInfo, artifact: &Artifact) -> Option<String> {
    let title = info.title.as_deref()?.trim();
    if title.is_empty() {
        return None;
    }
    Some(match artifact.kind {
        ArtifactKind::Media => title.to_string(),
        ArtifactKind::Archive => format!("{} (zipped)", title),
        ArtifactKind::Recompressed => format!("{} (reduced quality)", title),
    })
}
