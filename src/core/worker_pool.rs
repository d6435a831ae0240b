use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use tgfetch_core::core::events::ProgressEvent;

use crate::core::ytdlp::MediaResolver;
use crate::error::PipelineError;
use crate::models::media::{Artifact, ArtifactKind, FetchPlan, FormatInfo, FormatRequest, MediaClass};

#[derive(Debug, Clone)]
pub struct FetchJob {
    pub url: String,
    pub request: FormatRequest,
    pub dest_dir: PathBuf,
}

pub type FetchHandle = JoinHandle<Result<Artifact, PipelineError>>;

/// Bounded set of fetch slots. `submit` waits for a free slot in FIFO order
/// and then runs the fetch on its own task, so the caller can put a deadline
/// around the handle without killing the fetch itself.
#[derive(Clone)]
pub struct AcquisitionPool {
    resolver: Arc<dyn MediaResolver>,
    slots: Arc<Semaphore>,
}

impl AcquisitionPool {
    pub fn new(resolver: Arc<dyn MediaResolver>, capacity: usize) -> Self {
        Self {
            resolver,
            slots: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub async fn submit(
        &self,
        job: FetchJob,
        progress: UnboundedSender<ProgressEvent>,
    ) -> Result<FetchHandle, PipelineError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::acquisition("worker pool is closed"))?;

        let resolver = self.resolver.clone();
        Ok(tokio::spawn(async move {
            let _permit = permit;
            run_fetch(resolver.as_ref(), &job, progress).await
        }))
    }
}

async fn run_fetch(
    resolver: &dyn MediaResolver,
    job: &FetchJob,
    progress: UnboundedSender<ProgressEvent>,
) -> Result<Artifact, PipelineError> {
    let plan = resolve_plan(resolver, &job.url, &job.request).await?;
    tracing::info!("fetching {} with selector {}", job.url, plan.selector);

    let _ = progress.send(ProgressEvent::downloading(None));
    let path = resolver
        .fetch(&job.url, &plan, &job.dest_dir, progress.clone())
        .await
        .map_err(|e| {
            tracing::error!("fetch of {} failed: {:#}", job.url, e);
            PipelineError::acquisition(format!("{:#}", e))
        })?;
    let _ = progress.send(ProgressEvent::finished());

    Artifact::measure(&path, ArtifactKind::Media)
        .await
        .map_err(|e| PipelineError::acquisition(format!("cannot read {:?}: {}", path, e)))
}

pub async fn resolve_plan(
    resolver: &dyn MediaResolver,
    url: &str,
    request: &FormatRequest,
) -> Result<FetchPlan, PipelineError> {
    match request {
        FormatRequest::Audio => {
            let formats = resolver
                .list_formats(url)
                .await
                .map_err(|e| PipelineError::acquisition(format!("{:#}", e)))?;
            let best = select_best_audio(&formats).ok_or(PipelineError::NoSuitableFormat)?;
            tracing::debug!(
                "best audio for {}: {} ({} kbps)",
                url,
                best.format_id,
                best.audio_bitrate()
            );
            Ok(FetchPlan {
                selector: best.format_id.clone(),
                class: MediaClass::Audio,
            })
        }
        FormatRequest::Video => Ok(FetchPlan {
            selector: "bv*+ba/b".to_string(),
            class: MediaClass::Video,
        }),
        FormatRequest::Format { id, class } => {
            let needs_audio = match resolver.list_formats(url).await {
                Ok(formats) => formats
                    .iter()
                    .find(|f| &f.format_id == id)
                    .map(|f| f.has_video() && !f.has_audio())
                    .unwrap_or(false),
                Err(e) => {
                    tracing::warn!("could not list formats for {}, using {} as is: {:#}", url, id, e);
                    false
                }
            };
            let selector = if needs_audio {
                format!("{}+ba", id)
            } else {
                id.clone()
            };
            Ok(FetchPlan {
                selector,
                class: *class,
            })
        }
    }
}

/// Audio-only stream with the highest bitrate.
pub fn select_best_audio(formats: &[FormatInfo]) -> Option<&FormatInfo> {
    formats
        .iter()
        .filter(|f| !f.has_video() && f.has_audio())
        .max_by(|a, b| a.audio_bitrate().total_cmp(&b.audio_bitrate()))
}
