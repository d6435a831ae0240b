use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Probing,
    Downloading,
    Finished,
    Archiving,
    Compressing,
}

/// Snapshot of one pipeline stage's progress. Produced by the acquisition
/// workers and the remediation step, consumed by a throttle before it reaches
/// the chat.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    pub percent: Option<f64>,
    pub processed: Option<Duration>,
}

impl ProgressEvent {
    pub fn probing() -> Self {
        Self {
            status: ProgressStatus::Probing,
            percent: None,
            processed: None,
        }
    }

    pub fn downloading(percent: Option<f64>) -> Self {
        Self {
            status: ProgressStatus::Downloading,
            percent: percent.map(clamp_percent),
            processed: None,
        }
    }

    pub fn finished() -> Self {
        Self {
            status: ProgressStatus::Finished,
            percent: Some(100.0),
            processed: None,
        }
    }

    pub fn archiving() -> Self {
        Self {
            status: ProgressStatus::Archiving,
            percent: None,
            processed: None,
        }
    }

    pub fn compressing(percent: Option<f64>, processed: Option<Duration>) -> Self {
        Self {
            status: ProgressStatus::Compressing,
            percent: percent.map(clamp_percent),
            processed,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == ProgressStatus::Finished
    }
}

fn clamp_percent(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// A sent status message that can later be edited in place.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Audio,
    Video,
    Document,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_status(&self, chat_id: i64, text: &str) -> anyhow::Result<MessageHandle>;

    async fn update_status(&self, handle: &MessageHandle, text: &str) -> anyhow::Result<()>;

    async fn send_file(
        &self,
        chat_id: i64,
        kind: FileKind,
        path: &Path,
        caption: Option<&str>,
    ) -> anyhow::Result<()>;
}
