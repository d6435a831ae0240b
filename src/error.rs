use thiserror::Error;

/// Terminal failure of a download task. Every variant ends the task; nothing
/// in the pipeline retries automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("source is a live stream")]
    LiveStreamUnsupported,

    #[error("no audio-only format available")]
    NoSuitableFormat,

    #[error("acquisition failed: {cause}")]
    AcquisitionFailed { cause: String },

    #[error("packaging failed: {cause}")]
    PackagingFailed { cause: String },

    #[error("recompression failed: {cause}")]
    RecompressionFailed { cause: String },

    #[error("delivery failed: {cause}")]
    DeliveryFailed { cause: String },

    #[error("fetch timed out and no file was produced")]
    TimedOutNoArtifact,

    #[error("fetch timed out and the recovered file is over the size limit")]
    TimedOutPendingRemediation,
}

impl PipelineError {
    pub fn acquisition(cause: impl std::fmt::Display) -> Self {
        Self::AcquisitionFailed {
            cause: cause.to_string(),
        }
    }

    pub fn packaging(cause: impl std::fmt::Display) -> Self {
        Self::PackagingFailed {
            cause: cause.to_string(),
        }
    }

    pub fn recompression(cause: impl std::fmt::Display) -> Self {
        Self::RecompressionFailed {
            cause: cause.to_string(),
        }
    }

    pub fn delivery(cause: impl std::fmt::Display) -> Self {
        Self::DeliveryFailed {
            cause: cause.to_string(),
        }
    }

    /// Short text shown in the chat. Raw causes stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::LiveStreamUnsupported => "❌ This is a live stream, it can't be downloaded.".into(),
            Self::NoSuitableFormat => "❌ No audio-only format is available for this link.".into(),
            Self::AcquisitionFailed { cause } => {
                format!("❌ Download failed: {}", short_cause(cause))
            }
            Self::PackagingFailed { .. } => "❌ The file is too large and could not be archived.".into(),
            Self::RecompressionFailed { .. } => {
                "❌ The file is too large and could not be compressed, please try again later.".into()
            }
            Self::DeliveryFailed { cause } => {
                format!("❌ Could not send the file: {}", short_cause(cause))
            }
            Self::TimedOutNoArtifact => "⌛ The download timed out and produced no file.".into(),
            Self::TimedOutPendingRemediation => {
                "⌛ The download took too long and the file is over the size limit; it still needs compressing and was not sent.".into()
            }
        }
    }
}

const MAX_CAUSE_CHARS: usize = 200;

fn short_cause(cause: &str) -> String {
    let line = cause
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error");
    if line.chars().count() > MAX_CAUSE_CHARS {
        let cut: String = line.chars().take(MAX_CAUSE_CHARS).collect();
        format!("{}…", cut)
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_cause() {
        let e = PipelineError::acquisition("HTTP Error 403: Forbidden");
        assert_eq!(e.to_string(), "acquisition failed: HTTP Error 403: Forbidden");
    }

    #[test]
    fn user_message_uses_last_stderr_line() {
        let e = PipelineError::acquisition("WARNING: something\nERROR: Video unavailable\n");
        assert_eq!(e.user_message(), "❌ Download failed: ERROR: Video unavailable");
    }

    #[test]
    fn user_message_truncates_long_causes() {
        let e = PipelineError::delivery("x".repeat(500));
        let msg = e.user_message();
        assert!(msg.ends_with('…'));
        assert!(msg.chars().count() < 260);
    }

    #[test]
    fn packaging_message_hides_cause() {
        let e = PipelineError::packaging("No space left on device (os error 28)");
        assert!(!e.user_message().contains("os error"));
    }
}
