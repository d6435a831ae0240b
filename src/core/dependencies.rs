use std::path::PathBuf;
use std::process::Stdio;

use anyhow::anyhow;
use tgfetch_core::fs_paths;

pub const REQUIRED_TOOLS: [&str; 3] = ["yt-dlp", "ffmpeg", "ffprobe"];

pub fn bin_name(tool: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

pub async fn find_tool(tool: &str) -> Option<PathBuf> {
    let name = bin_name(tool);

    if let Ok(status) = crate::core::process::command(&name)
        .arg(version_flag_for(tool))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        if status.success() {
            return Some(PathBuf::from(&name));
        }
    }

    let managed = fs_paths::managed_bin_dir()?.join(&name);
    if managed.exists() {
        return Some(managed);
    }

    None
}

fn version_flag_for(tool: &str) -> &'static str {
    match tool {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    }
}

pub async fn check_version(tool: &str) -> Option<String> {
    let path = find_tool(tool).await?;
    let output = crate::core::process::command(&path)
        .arg(version_flag_for(tool))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_version(tool, stdout.lines().next().unwrap_or(""))
}

fn parse_version(tool: &str, first_line: &str) -> Option<String> {
    match tool {
        // "ffmpeg version 6.1.1-3ubuntu5 Copyright ..."
        "ffmpeg" | "ffprobe" => first_line.split_whitespace().nth(2).map(|s| s.to_string()),
        _ => {
            let v = first_line.trim();
            (!v.is_empty()).then(|| v.to_string())
        }
    }
}

/// Logs the version of every external tool and fails when one is missing.
pub async fn verify_tools() -> anyhow::Result<()> {
    let mut missing = Vec::new();
    for tool in REQUIRED_TOOLS {
        match check_version(tool).await {
            Some(version) => tracing::info!("{} {}", tool, version),
            None => {
                tracing::error!("{} not found on PATH or in the managed bin dir", tool);
                missing.push(tool);
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("missing required tools: {}", missing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffmpeg_version_is_third_word() {
        assert_eq!(
            parse_version("ffmpeg", "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023"),
            Some("6.1.1-3ubuntu5".to_string())
        );
        assert_eq!(parse_version("ffprobe", "ffprobe"), None);
    }

    #[test]
    fn ytdlp_version_is_whole_line() {
        assert_eq!(
            parse_version("yt-dlp", "2024.08.06\n"),
            Some("2024.08.06".to_string())
        );
        assert_eq!(parse_version("yt-dlp", "  "), None);
    }

    #[test]
    fn version_flags() {
        assert_eq!(version_flag_for("ffprobe"), "-version");
        assert_eq!(version_flag_for("yt-dlp"), "--version");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        assert!(find_tool("tgfetch-no-such-tool").await.is_none());
    }
}
