use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::media::file_name_of;

const LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

pub fn archive_path_for(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".zip");
    PathBuf::from(name)
}

/// Packs `input` into `<input>.zip` next to it with deflate. A half-written
/// archive is removed on failure.
pub async fn package(input: &Path) -> anyhow::Result<PathBuf> {
    let input = input.to_path_buf();
    let output = archive_path_for(&input);

    let out = output.clone();
    let result = tokio::task::spawn_blocking(move || write_zip(&input, &out))
        .await
        .map_err(|e| anyhow!("archive task panicked: {}", e))?;

    match result {
        Ok(()) => Ok(output),
        Err(e) => {
            crate::core::artifacts::remove_artifact(&output).await;
            Err(e)
        }
    }
}

fn write_zip(input: &Path, output: &Path) -> anyhow::Result<()> {
    let src = File::open(input).map_err(|e| anyhow!("failed to open {:?}: {}", input, e))?;
    let size = src.metadata()?.len();
    let dst = File::create(output).map_err(|e| anyhow!("failed to create {:?}: {}", output, e))?;

    let mut writer = ZipWriter::new(BufWriter::new(dst));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(size >= LARGE_FILE_THRESHOLD);

    writer.start_file(file_name_of(input), options)?;
    std::io::copy(&mut BufReader::new(src), &mut writer)?;
    let mut inner = writer.finish()?;
    std::io::Write::flush(&mut inner)?;
    Ok(())
}
