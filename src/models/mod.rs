pub mod download;
pub mod media;

pub use tgfetch_core::models::settings;
