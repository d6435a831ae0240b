pub mod archive;
pub mod artifacts;
pub mod delivery;
pub mod dependencies;
pub mod ffmpeg;
pub mod process;
pub mod progress;
pub mod remediation;
pub mod worker_pool;
pub mod ytdlp;

#[cfg(test)]
pub(crate) mod test_support;
