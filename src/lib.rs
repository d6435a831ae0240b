use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tgfetch_core::fs_paths::TempPaths;
use tgfetch_core::models::settings::Settings;

pub mod commands;
pub mod core;
pub mod error;
pub mod models;
pub mod platforms;

use crate::commands::downloads::PendingRequests;
use crate::core::delivery::DeliveryCoordinator;
use crate::core::ffmpeg::Ffmpeg;
use crate::core::ytdlp::{MediaResolver, YtDlp};
use crate::platforms::telegram::api::BotApi;
use crate::platforms::telegram::TelegramMessenger;

pub struct AppState {
    pub settings: Settings,
    pub api: Arc<BotApi>,
    pub resolver: Arc<dyn MediaResolver>,
    pub coordinator: Arc<DeliveryCoordinator>,
    pub temp_paths: TempPaths,
    pub pending: PendingRequests,
}

impl AppState {
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let api = Arc::new(BotApi::new(&settings.api_base, &settings.api_token)?);
        let resolver: Arc<dyn MediaResolver> =
            Arc::new(YtDlp::locate(settings.pipeline.audio_quality_kbps).await);
        let transcoder = Arc::new(Ffmpeg::locate().await);
        let messenger = Arc::new(TelegramMessenger::new(api.clone()));

        let coordinator = Arc::new(DeliveryCoordinator::new(
            resolver.clone(),
            transcoder,
            messenger,
            &settings.pipeline,
        ));

        Ok(Self {
            temp_paths: TempPaths::new(&settings.temp_download_folder),
            settings,
            api,
            resolver,
            coordinator,
            pending: PendingRequests::default(),
        })
    }
}

pub async fn run(settings: Settings, cancel: CancellationToken) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&settings.temp_download_folder).await?;
    tracing::info!(
        "downloads go to {:?}, limit {} MB, {} fetch slots",
        settings.temp_download_folder,
        settings.pipeline.max_size_mb,
        settings.pipeline.worker_slots
    );

    let state = Arc::new(AppState::build(settings).await?);
    commands::run_polling(state, cancel).await
}
