use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use telegram_photos_uploader::commands::{run_polling, BotContext};
use telegram_photos_uploader::config::{self, Config};
use telegram_photos_uploader::google_photos::{PhotosClient, StoredCredentialProvider};
use telegram_photos_uploader::session::SessionStore;
use telegram_photos_uploader::telegram::TelegramClient;
use telegram_photos_uploader::uploader::UploadPipeline;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Sweep abandoned staged files now and then once a day, sparing files a session still holds
fn spawn_staging_cleanup(staging_dir: PathBuf, max_age: Duration, sessions: SessionStore) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match config::cleanup_stale_files(&staging_dir, max_age, &sessions.staged_paths()) {
                Ok(0) => {}
                Ok(removed) => log::info!("Removed {} stale staged files", removed),
                Err(e) => log::warn!("Staging cleanup failed: {}", e),
            }
        }
    });
}

fn build_context(config: Config, telegram: &TelegramClient) -> anyhow::Result<BotContext> {
    let staging_dir = config.staging_dir().context("Failed to prepare staging directory")?;
    let credentials_path = config
        .credentials_path()
        .context("Failed to resolve Google credentials path")?;

    let auth_client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let credentials = StoredCredentialProvider::new(credentials_path, auth_client);
    log::info!("Google credentials: {}", credentials.path().display());

    let photos = PhotosClient::new(
        &config.photos_upload_url,
        &config.photos_batch_create_url,
        config.request_timeout(),
    )
    .context("Failed to build Google Photos client")?;

    let pipeline = UploadPipeline::new(Arc::new(credentials), Arc::new(photos));

    Ok(BotContext {
        chat: Arc::new(telegram.clone()),
        sessions: SessionStore::new(),
        pipeline: Arc::new(pipeline),
        staging_dir,
        config,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config().context("Failed to load configuration")?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    log::info!("Starting Telegram Photos Uploader");

    let token = config.bot_token().context("Bot token is not configured")?;
    let telegram = TelegramClient::new(&config.telegram_api_url, token, config.request_timeout())
        .context("Failed to build Telegram client")?;

    let ctx = Arc::new(build_context(config, &telegram)?);
    spawn_staging_cleanup(
        ctx.staging_dir.clone(),
        ctx.config.stale_file_age(),
        ctx.sessions.clone(),
    );

    tokio::select! {
        result = run_polling(Arc::clone(&ctx), &telegram) => {
            result.context("Polling stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutdown requested, exiting");
        }
    }

    Ok(())
}
