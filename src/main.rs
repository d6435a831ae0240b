use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tgfetch_core::models::settings::Settings;

const DEFAULT_FILTER: &str = "tgfetch=info,tgfetch_lib=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine, the variables may come from the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let settings = Settings::from_env()?;

    if let Err(e) = tgfetch_lib::core::dependencies::verify_tools().await {
        tracing::warn!("{:#}; downloads will fail until it is installed", e);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            on_signal.cancel();
        }
    });

    tgfetch_lib::run(settings, cancel).await
}
