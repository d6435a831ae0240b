use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};

use tgfetch_core::core::events::ProgressEvent;

use crate::core::archive;
use crate::core::artifacts::remove_artifact;
use crate::core::ffmpeg::{TranscodeTarget, Transcoder};
use crate::error::PipelineError;
use crate::models::media::{Artifact, ArtifactKind, MediaClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationDecision {
    None,
    Archive,
    Recompress,
}

/// Decision table for an artifact of `original` bytes. `archive` is the size
/// of the archive once one has been built.
pub fn decide(original: u64, archive: Option<u64>, ceiling: u64) -> RemediationDecision {
    if original <= ceiling {
        return RemediationDecision::None;
    }
    match archive {
        Some(size) if size > ceiling => RemediationDecision::Recompress,
        _ => RemediationDecision::Archive,
    }
}

pub struct Escalator {
    transcoder: Arc<dyn Transcoder>,
    ceiling_bytes: u64,
    video_bitrate_kbps: u32,
    audio_bitrate_kbps: u32,
}

impl Escalator {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        ceiling_bytes: u64,
        video_bitrate_kbps: u32,
        audio_bitrate_kbps: u32,
    ) -> Self {
        Self {
            transcoder,
            ceiling_bytes,
            video_bitrate_kbps,
            audio_bitrate_kbps,
        }
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// Archive first, recompress only if the archive is still too big. The
    /// returned artifact is the only file of the task left on disk.
    /// `known_duration` is what the probe reported, used when ffprobe can't
    /// read the downloaded file.
    pub async fn remediate(
        &self,
        original: Artifact,
        class: MediaClass,
        known_duration: Option<f64>,
        progress: UnboundedSender<ProgressEvent>,
    ) -> Result<Artifact, PipelineError> {
        if decide(original.size_bytes, None, self.ceiling_bytes) == RemediationDecision::None {
            return Ok(original);
        }

        tracing::info!(
            "{} is {:.1} MB, archiving",
            original.file_name(),
            original.size_mb()
        );
        let _ = progress.send(ProgressEvent::archiving());
        let zip_path = archive::package(&original.path).await.map_err(|e| {
            tracing::error!("archiving {:?} failed: {:#}", original.path, e);
            PipelineError::packaging(format!("{:#}", e))
        })?;
        let zipped = Artifact::measure(&zip_path, ArtifactKind::Archive)
            .await
            .map_err(PipelineError::packaging)?;

        match decide(original.size_bytes, Some(zipped.size_bytes), self.ceiling_bytes) {
            RemediationDecision::Recompress => {}
            _ => {
                tracing::info!("archive {} fits at {:.1} MB", zipped.file_name(), zipped.size_mb());
                remove_artifact(&original.path).await;
                return Ok(zipped);
            }
        }

        tracing::info!(
            "archive is still {:.1} MB, recompressing {}",
            zipped.size_mb(),
            original.file_name()
        );
        remove_artifact(&zipped.path).await;

        let recompressed = self
            .recompress(&original, class, known_duration, progress)
            .await?;
        remove_artifact(&original.path).await;

        if recompressed.exceeds(self.ceiling_bytes) {
            tracing::warn!(
                "recompressed {} is still {:.1} MB, sending anyway",
                recompressed.file_name(),
                recompressed.size_mb()
            );
        }
        Ok(recompressed)
    }

    async fn recompress(
        &self,
        original: &Artifact,
        class: MediaClass,
        known_duration: Option<f64>,
        progress: UnboundedSender<ProgressEvent>,
    ) -> Result<Artifact, PipelineError> {
        let target = TranscodeTarget {
            class,
            bitrate_kbps: match class {
                MediaClass::Video => self.video_bitrate_kbps,
                MediaClass::Audio => self.audio_bitrate_kbps,
            },
        };
        let output = recompressed_path(&original.path, &target);

        let total = match self.transcoder.probe_duration(&original.path).await {
            Ok(secs) => Some(secs),
            // still recompress, just without a percentage
            Err(e) => {
                tracing::warn!("ffprobe found no duration for {:?}: {:#}", original.path, e);
                known_duration.filter(|d| *d > 0.0)
            }
        };

        let _ = progress.send(ProgressEvent::compressing(total.map(|_| 0.0), None));

        let (tx, mut rx) = mpsc::unbounded_channel::<Duration>();
        let forward = async {
            while let Some(done) = rx.recv().await {
                let _ = progress.send(ProgressEvent::compressing(
                    total.map(|t| compress_percent(done, t)),
                    Some(done),
                ));
            }
        };
        let (result, ()) = tokio::join!(
            self.transcoder.transcode(&original.path, &output, &target, tx),
            forward
        );

        if let Err(e) = result {
            tracing::error!("recompressing {:?} failed: {:#}", original.path, e);
            remove_artifact(&output).await;
            return Err(PipelineError::recompression(format!("{:#}", e)));
        }

        Artifact::measure(&output, ArtifactKind::Recompressed)
            .await
            .map_err(PipelineError::recompression)
    }
}

fn compress_percent(done: Duration, total_secs: f64) -> f64 {
    if total_secs <= 0.0 {
        return 0.0;
    }
    (done.as_secs_f64() / total_secs * 100.0).clamp(0.0, 100.0)
}

fn recompressed_path(input: &Path, target: &TranscodeTarget) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let name = format!("compressed_{}.{}", stem, target.extension());
    match input.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}
