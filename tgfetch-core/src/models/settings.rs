use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "crate::fs_paths::default_download_root")]
    pub temp_download_folder: PathBuf,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_download_progress_interval_ms")]
    pub download_progress_interval_ms: u64,
    #[serde(default = "default_recompress_progress_interval_ms")]
    pub recompress_progress_interval_ms: u64,
    #[serde(default = "default_recompress_bitrate_kbps")]
    pub recompress_bitrate_kbps: u32,
    #[serde(default = "default_recompress_audio_bitrate_kbps")]
    pub recompress_audio_bitrate_kbps: u32,
    #[serde(default = "default_audio_quality_kbps")]
    pub audio_quality_kbps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_max_size_mb() -> u64 {
    50
}

fn default_worker_slots() -> usize {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    300
}

fn default_download_progress_interval_ms() -> u64 {
    2_000
}

fn default_recompress_progress_interval_ms() -> u64 {
    5_000
}

fn default_recompress_bitrate_kbps() -> u32 {
    500
}

fn default_recompress_audio_bitrate_kbps() -> u32 {
    64
}

fn default_audio_quality_kbps() -> u32 {
    192
}

fn default_poll_timeout_secs() -> u64 {
    30
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
            worker_slots: default_worker_slots(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            download_progress_interval_ms: default_download_progress_interval_ms(),
            recompress_progress_interval_ms: default_recompress_progress_interval_ms(),
            recompress_bitrate_kbps: default_recompress_bitrate_kbps(),
            recompress_audio_bitrate_kbps: default_recompress_audio_bitrate_kbps(),
            audio_quality_kbps: default_audio_quality_kbps(),
        }
    }
}

impl PipelineSettings {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn download_progress_interval(&self) -> Duration {
        Duration::from_millis(self.download_progress_interval_ms)
    }

    pub fn recompress_progress_interval(&self) -> Duration {
        Duration::from_millis(self.recompress_progress_interval_ms)
    }
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// | Env Var                | Default                         |
    /// |------------------------|---------------------------------|
    /// | `API_TOKEN`            | required                        |
    /// | `TEMP_DOWNLOAD_FOLDER` | `<cache dir>/tgfetch/downloads` |
    /// | `TGFETCH_API_BASE`     | `https://api.telegram.org`      |
    ///
    /// Size ceiling, worker count and timeouts are fixed at startup and keep
    /// their defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_token = lookup("API_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("API_TOKEN is not set"))?;

        let temp_download_folder = lookup("TEMP_DOWNLOAD_FOLDER")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(crate::fs_paths::default_download_root);

        let api_base = lookup("TGFETCH_API_BASE")
            .map(|b| b.trim().trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(default_api_base);

        Ok(Self {
            api_token,
            api_base,
            temp_download_folder,
            pipeline: PipelineSettings::default(),
            telegram: TelegramSettings::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = Settings::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("API_TOKEN"));
    }

    #[test]
    fn blank_token_is_an_error() {
        assert!(Settings::from_lookup(lookup_from(&[("API_TOKEN", "   ")])).is_err());
    }

    #[test]
    fn reads_token_and_folder() {
        let s = Settings::from_lookup(lookup_from(&[
            ("API_TOKEN", "123:abc"),
            ("TEMP_DOWNLOAD_FOLDER", "/tmp/tgfetch"),
        ]))
        .unwrap();
        assert_eq!(s.api_token, "123:abc");
        assert_eq!(s.temp_download_folder, PathBuf::from("/tmp/tgfetch"));
        assert_eq!(s.api_base, "https://api.telegram.org");
    }

    #[test]
    fn api_base_trailing_slash_trimmed() {
        let s = Settings::from_lookup(lookup_from(&[
            ("API_TOKEN", "t"),
            ("TGFETCH_API_BASE", "http://localhost:8081/"),
        ]))
        .unwrap();
        assert_eq!(s.api_base, "http://localhost:8081");
    }

    #[test]
    fn pipeline_defaults() {
        let p = PipelineSettings::default();
        assert_eq!(p.max_size_mb, 50);
        assert_eq!(p.max_size_bytes(), 50 * 1024 * 1024);
        assert_eq!(p.worker_slots, 5);
        assert_eq!(p.fetch_timeout(), Duration::from_secs(300));
        assert_eq!(p.download_progress_interval(), Duration::from_secs(2));
        assert_eq!(p.recompress_progress_interval(), Duration::from_secs(5));
        assert_eq!(p.recompress_bitrate_kbps, 500);
    }

    #[test]
    fn deserialize_fills_defaults() {
        let s: Settings = serde_json::from_str(r#"{"api_token":"t","temp_download_folder":"/x"}"#).unwrap();
        assert_eq!(s.pipeline.worker_slots, 5);
        assert_eq!(s.telegram.poll_timeout_secs, 30);
    }
}
