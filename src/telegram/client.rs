use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Duration};

use super::types::{
    ApiResponse, EditMessageTextParams, GetFileParams, GetUpdatesParams, Message,
    SendMessageParams, TelegramFile, Update,
};
use crate::errors::{AppError, AppResult};
use crate::security::redact_token;

/// How many times a rate-limited call waits for `retry_after` before giving up
const MAX_RATE_LIMIT_WAITS: u32 = 3;

/// Minimal Telegram Bot API client over HTTPS
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_url, self.token, file_path)
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> AppResult<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut attempt = 0;

        loop {
            // reqwest errors carry the URL, which carries the token
            let response = self
                .client
                .post(self.method_url(method))
                .json(params)
                .send()
                .await
                .map_err(|e| AppError::Network(e.without_url()))?;

            let status = response.status();
            let body: ApiResponse<T> = response
                .json()
                .await
                .map_err(|e| AppError::Network(e.without_url()))?;

            if body.ok {
                return body.result.ok_or_else(|| {
                    AppError::telegram_api(method, i64::from(status.as_u16()), "response has no result")
                });
            }

            let code = body.error_code.unwrap_or(i64::from(status.as_u16()));
            let description = body
                .description
                .unwrap_or_else(|| "Unknown error".to_string());
            let error = AppError::telegram_api(method, code, &redact_token(&description, &self.token));

            attempt += 1;
            if error.is_rate_limited() && attempt <= MAX_RATE_LIMIT_WAITS {
                let delay = body
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs)
                    .unwrap_or(Duration::from_secs(1));

                log::warn!(
                    "Telegram {} rate limited (attempt {}), retrying in {:?}",
                    method,
                    attempt,
                    delay
                );
                sleep(delay).await;
                continue;
            }

            return Err(error);
        }
    }

    /// Long-poll for new messages starting at `offset`
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> AppResult<Vec<Update>> {
        let params = GetUpdatesParams {
            offset,
            timeout: timeout_secs,
            allowed_updates: vec!["message"],
        };
        self.call("getUpdates", &params).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<Message> {
        self.call("sendMessage", &SendMessageParams { chat_id, text })
            .await
    }

    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> AppResult<()> {
        let params = EditMessageTextParams {
            chat_id,
            message_id,
            text,
        };
        // Returns either the edited message or `true`; neither is needed
        let _: serde_json::Value = self.call("editMessageText", &params).await?;
        Ok(())
    }

    pub async fn get_file(&self, file_id: &str) -> AppResult<TelegramFile> {
        self.call("getFile", &GetFileParams { file_id }).await
    }

    /// Resolve a file id and stream its contents to `destination`
    pub async fn download_file(&self, file_id: &str, destination: &Path) -> AppResult<u64> {
        let file = self.get_file(file_id).await?;
        let file_path = file.file_path.ok_or_else(|| {
            AppError::telegram_api("getFile", 400, "file is not available for download")
        })?;

        let result = self.stream_to_disk(&file_path, destination).await;
        if result.is_err() {
            // Leave no partial file behind
            let _ = tokio::fs::remove_file(destination).await;
        }
        result
    }

    async fn stream_to_disk(&self, file_path: &str, destination: &Path) -> AppResult<u64> {
        let mut response = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| AppError::Network(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::telegram_api(
                "download",
                i64::from(status.as_u16()),
                "file download failed",
            ));
        }

        let mut output = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AppError::Network(e.without_url()))?
        {
            output.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        output.flush().await?;

        log::debug!("Downloaded {} bytes to {}", written, destination.display());
        Ok(written)
    }
}
