use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::security::FileSystemGuard;
use crate::session::{ChatId, SessionStore};
use crate::telegram::{Command, Message, TelegramClient, Update};
use crate::uploader::progress_tracker::received_message;
use crate::uploader::{PipelineResult, ProgressReporter, UploadPipeline};

pub const START_MESSAGE: &str = "Hi! Send me the photos and videos you want to upload to Google Photos. \
Send /done when you are finished sending photos and videos.";
pub const REPROMPT_MESSAGE: &str = "Please send a photo, a video, or an image/video file.";
pub const NO_FILES_MESSAGE: &str = "No files to upload. Send /start to begin.";
pub const CANCEL_MESSAGE: &str = "Operation cancelled. Start over with /start.";

/// The chat operations the bot needs: replies, status edits and file downloads
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send a message and return its id
    async fn send_message(&self, chat_id: ChatId, text: &str) -> AppResult<i64>;

    async fn edit_message_text(&self, chat_id: ChatId, message_id: i64, text: &str) -> AppResult<()>;

    async fn download_file(&self, file_id: &str, destination: &Path) -> AppResult<u64>;
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> AppResult<i64> {
        let message = TelegramClient::send_message(self, chat_id, text).await?;
        Ok(message.message_id)
    }

    async fn edit_message_text(&self, chat_id: ChatId, message_id: i64, text: &str) -> AppResult<()> {
        TelegramClient::edit_message_text(self, chat_id, message_id, text).await
    }

    async fn download_file(&self, file_id: &str, destination: &Path) -> AppResult<u64> {
        TelegramClient::download_file(self, file_id, destination).await
    }
}

/// Progress shown by editing one status message in the chat
pub struct StatusMessage {
    chat: Arc<dyn ChatApi>,
    chat_id: ChatId,
    message_id: Option<i64>,
}

impl StatusMessage {
    pub fn new(chat: Arc<dyn ChatApi>, chat_id: ChatId, message_id: Option<i64>) -> Self {
        Self {
            chat,
            chat_id,
            message_id,
        }
    }
}

#[async_trait]
impl ProgressReporter for StatusMessage {
    async fn report(&mut self, text: &str) -> AppResult<()> {
        match self.message_id {
            Some(message_id) => {
                self.chat
                    .edit_message_text(self.chat_id, message_id, text)
                    .await
            }
            // The initial status message never made it; start a new one
            None => {
                self.message_id = Some(self.chat.send_message(self.chat_id, text).await?);
                Ok(())
            }
        }
    }
}

/// Everything a handler needs, shared by the polling loop and spawned uploads
pub struct BotContext {
    pub chat: Arc<dyn ChatApi>,
    pub sessions: SessionStore,
    pub pipeline: Arc<UploadPipeline>,
    pub staging_dir: PathBuf,
    pub config: Config,
}

async fn reply(ctx: &BotContext, chat_id: ChatId, text: &str) {
    if let Err(e) = ctx.chat.send_message(chat_id, text).await {
        log::warn!("Failed to reply in chat {} (non-critical): {}", chat_id, e);
    }
}

pub async fn handle_update(ctx: &Arc<BotContext>, update: Update) -> Option<JoinHandle<PipelineResult>> {
    match update.message {
        Some(message) => handle_message(ctx, &message).await,
        None => {
            log::debug!("Ignoring update {} without a message", update.update_id);
            None
        }
    }
}

/// Route one chat message. A `/done` that starts an upload returns the spawned run.
pub async fn handle_message(
    ctx: &Arc<BotContext>,
    message: &Message,
) -> Option<JoinHandle<PipelineResult>> {
    let chat_id = message.chat.id;

    if !ctx.config.is_user_allowed(message.sender_id()) {
        log::warn!(
            "Ignoring message from unauthorized user {:?} in chat {}",
            message.sender_id(),
            chat_id
        );
        return None;
    }

    match message.command() {
        Some(Command::Start) => {
            start(ctx, chat_id).await;
            None
        }
        Some(Command::Done) => done(ctx, chat_id).await,
        Some(Command::Cancel) => {
            cancel(ctx, chat_id).await;
            None
        }
        None if message.is_command() => {
            log::debug!("Ignoring unknown command in chat {}", chat_id);
            None
        }
        None => {
            receive_media(ctx, message).await;
            None
        }
    }
}

async fn start(ctx: &BotContext, chat_id: ChatId) {
    match ctx.sessions.begin(chat_id) {
        Ok(abandoned) => {
            if !abandoned.is_empty() {
                let removed = FileSystemGuard::remove_staged_files(&abandoned).await;
                log::info!("Chat {}: session restarted, discarded {} staged files", chat_id, removed);
            }
            reply(ctx, chat_id, START_MESSAGE).await;
        }
        Err(e) => reply(ctx, chat_id, &e.to_string()).await,
    }
}

async fn receive_media(ctx: &BotContext, message: &Message) {
    let chat_id = message.chat.id;

    if let Err(e) = ctx.sessions.ensure_collecting(chat_id) {
        reply(ctx, chat_id, &e.to_string()).await;
        return;
    }

    let Some(media) = message.incoming_media() else {
        reply(ctx, chat_id, REPROMPT_MESSAGE).await;
        return;
    };

    let kind = match media.classify() {
        Ok(kind) => kind,
        Err(e) => {
            log::info!("Chat {}: rejected message: {}", chat_id, e);
            reply(ctx, chat_id, REPROMPT_MESSAGE).await;
            return;
        }
    };

    let path = FileSystemGuard::staged_file_path(
        &ctx.staging_dir,
        media.file_id(),
        media.staged_extension(kind),
    );

    if let Err(e) = ctx.chat.download_file(media.file_id(), &path).await {
        log::warn!("Chat {}: download of {} failed: {}", chat_id, media.file_id(), e);
        reply(ctx, chat_id, &format!("Could not download that file. Error: {}", e)).await;
        return;
    }

    match ctx.sessions.accept(chat_id, &media, &path) {
        Ok(count) => {
            log::info!(
                "Chat {}: staged {} ({} files in session)",
                chat_id,
                path.display(),
                count
            );
        }
        Err(e) => {
            // The session was cancelled or closed while the file was downloading
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                log::warn!("Failed to remove {}: {}", path.display(), remove_err);
            }
            reply(ctx, chat_id, &e.to_string()).await;
        }
    }
}

async fn done(ctx: &Arc<BotContext>, chat_id: ChatId) -> Option<JoinHandle<PipelineResult>> {
    let files = match ctx.sessions.terminate(chat_id) {
        Ok(files) => files,
        Err(AppError::NoSession) => {
            reply(ctx, chat_id, NO_FILES_MESSAGE).await;
            return None;
        }
        Err(e) => {
            reply(ctx, chat_id, &e.to_string()).await;
            return None;
        }
    };

    if files.is_empty() {
        reply(ctx, chat_id, NO_FILES_MESSAGE).await;
        return None;
    }

    let message_id = match ctx.chat.send_message(chat_id, &received_message(files.len())).await {
        Ok(id) => Some(id),
        Err(e) => {
            log::warn!("Chat {}: failed to send status message: {}", chat_id, e);
            None
        }
    };

    let ctx = Arc::clone(ctx);
    Some(tokio::spawn(async move {
        let mut reporter = StatusMessage::new(Arc::clone(&ctx.chat), chat_id, message_id);
        ctx.pipeline
            .run_session(&ctx.sessions, chat_id, &files, &mut reporter)
            .await
    }))
}

async fn cancel(ctx: &BotContext, chat_id: ChatId) {
    match ctx.sessions.cancel(chat_id) {
        Ok(files) => {
            let removed = FileSystemGuard::remove_staged_files(&files).await;
            log::info!("Chat {}: session cancelled, removed {} staged files", chat_id, removed);
            reply(ctx, chat_id, CANCEL_MESSAGE).await;
        }
        Err(AppError::NoSession) => reply(ctx, chat_id, CANCEL_MESSAGE).await,
        Err(e) => reply(ctx, chat_id, &e.to_string()).await,
    }
}

/// Long-poll Telegram and dispatch updates until the token is rejected
pub async fn run_polling(ctx: Arc<BotContext>, telegram: &TelegramClient) -> AppResult<()> {
    let poll_timeout = ctx.config.poll_timeout_secs;
    let mut offset = 0;

    log::info!("Polling for updates (timeout {}s)", poll_timeout);

    loop {
        match telegram.get_updates(offset, poll_timeout).await {
            Ok(updates) => {
                for update in updates {
                    offset = update.update_id + 1;
                    // Upload runs continue in the background
                    let _ = handle_update(&ctx, update).await;
                }
            }
            Err(e) if e.is_unauthorized() => {
                log::error!("Telegram rejected the bot token: {}", e);
                return Err(e);
            }
            Err(e) => {
                log::warn!("Polling failed, retrying in 5s: {}", e);
                sleep(Duration::from_secs(5)).await;
            }
        }
    }
}
