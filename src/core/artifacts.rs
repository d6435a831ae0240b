use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

fn is_leftover(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".ytdl") || name.starts_with('.')
}

/// Degraded lookup used only for timeout recovery and when yt-dlp did not
/// print the final path: the newest finished file directly inside `dir`.
pub async fn find_latest_file(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut best: Option<(PathBuf, SystemTime)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }

        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if is_leftover(name) {
            continue;
        }

        let stamp = match meta.created().or_else(|_| meta.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };
        match &best {
            Some((_, best_time)) if stamp <= *best_time => {}
            _ => best = Some((path, stamp)),
        }
    }

    Ok(best.map(|(p, _)| p))
}

/// Deletes a superseded artifact. A missing file is not an error.
pub async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("removed {:?}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to remove {:?}: {}", path, e),
    }
}

pub async fn cleanup_task_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!("cleaned up {:?}", dir),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to clean up {:?}: {}", dir, e),
    }
}
