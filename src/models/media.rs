use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tgfetch_core::core::events::FileKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    Audio,
    Video,
}

impl MediaClass {
    pub fn file_kind(self) -> FileKind {
        match self {
            MediaClass::Audio => FileKind::Audio,
            MediaClass::Video => FileKind::Video,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MediaClass::Audio => "audio",
            MediaClass::Video => "video",
        }
    }
}

/// What the user asked for: one of the semantic tags or a concrete format id
/// picked from the format list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FormatRequest {
    Audio,
    Video,
    Format { id: String, class: MediaClass },
}

impl FormatRequest {
    pub fn class(&self) -> MediaClass {
        match self {
            FormatRequest::Audio => MediaClass::Audio,
            FormatRequest::Video => MediaClass::Video,
            FormatRequest::Format { class, .. } => *class,
        }
    }

    pub fn label(&self) -> String {
        match self {
            FormatRequest::Audio => "audio".into(),
            FormatRequest::Video => "video".into(),
            FormatRequest::Format { id, .. } => format!("format {}", id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatInfo {
    pub format_id: String,
    pub ext: String,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
    pub filesize: Option<u64>,
    pub abr: Option<f64>,
    pub tbr: Option<f64>,
    pub format_note: Option<String>,
}

impl FormatInfo {
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    pub fn audio_bitrate(&self) -> f64 {
        self.abr.or(self.tbr).unwrap_or(0.0)
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    match codec {
        Some(c) => {
            let c = c.trim();
            !c.is_empty() && c != "none"
        }
        None => false,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProbeInfo {
    pub is_live: bool,
    pub title: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// A resolved fetch: the selector handed to yt-dlp and the class that decides
/// post-processing (mp3 extraction or mp4 merge).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchPlan {
    pub selector: String,
    pub class: MediaClass,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Media,
    Archive,
    Recompressed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub async fn measure(path: impl Into<PathBuf>, kind: ArtifactKind) -> std::io::Result<Self> {
        let path = path.into();
        let meta = tokio::fs::metadata(&path).await?;
        Ok(Self {
            path,
            size_bytes: meta.len(),
            kind,
        })
    }

    pub fn exceeds(&self, ceiling_bytes: u64) -> bool {
        self.size_bytes > ceiling_bytes
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }

    /// Archives go out as documents; everything else uses the channel of the
    /// requested class.
    pub fn file_kind(&self, class: MediaClass) -> FileKind {
        match self.kind {
            ArtifactKind::Archive => FileKind::Document,
            _ => class.file_kind(),
        }
    }
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
