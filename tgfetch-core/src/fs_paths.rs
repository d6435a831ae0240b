use std::path::PathBuf;

use uuid::Uuid;

pub fn default_download_root() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("tgfetch").join("downloads"))
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}

pub fn managed_bin_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("tgfetch").join("bin"))
}

/// Hands out one directory per task under the temp download root. Each
/// task only ever looks inside its own directory.
#[derive(Debug, Clone)]
pub struct TempPaths {
    root: PathBuf,
}

impl TempPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn task_dir(&self, task_id: Uuid) -> PathBuf {
        self.root.join(task_id.to_string())
    }

    pub async fn allocate(&self, task_id: Uuid) -> std::io::Result<PathBuf> {
        let dir = self.task_dir(task_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}
