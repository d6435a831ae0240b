use std::ffi::OsStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use tgfetch_core::fs_paths;

fn search_path() -> Option<String> {
    let bin_dir = fs_paths::managed_bin_dir()?;
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    Some(format!("{}{}{}", bin_dir.display(), sep, current))
}

/// Builds a child process with the managed bin dir in front of `PATH`, so a
/// bundled yt-dlp or ffmpeg wins over an older system copy.
pub fn command<S: AsRef<OsStr>>(program: S) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    if let Some(path) = search_path() {
        cmd.env("PATH", path);
    }
    // yt-dlp prints titles; keep them UTF-8 regardless of the host locale
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd.kill_on_drop(true);
    cmd
}

/// Newline-split reader over a child's output. Bytes that are not UTF-8 are
/// replaced instead of ending the stream, so the pipe is always drained.
pub struct LossyLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LossyLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
