use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::auth::AccessToken;
use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::session::StagedFile;

/// Opaque token from the raw upload step. Single use: it is moved into the commit.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadToken(String);

impl UploadToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The media item created by a successful commit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaItemResult {
    pub id: Option<String>,
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Send the raw bytes of a staged file and get back an upload token
    async fn upload_bytes(&self, file: &StagedFile, token: &AccessToken) -> AppResult<UploadToken>;

    /// Turn an upload token into a media item in the library
    async fn commit_media_item(
        &self,
        upload_token: UploadToken,
        token: &AccessToken,
    ) -> AppResult<MediaItemResult>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateRequest<'a> {
    new_media_items: Vec<NewMediaItem<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMediaItem<'a> {
    simple_media_item: SimpleMediaItem<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleMediaItem<'a> {
    upload_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateResponse {
    #[serde(default)]
    new_media_item_results: Vec<NewMediaItemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMediaItemResult {
    #[serde(default)]
    status: Option<ItemStatus>,
    #[serde(default)]
    media_item: Option<MediaItem>,
}

#[derive(Debug, Deserialize)]
struct ItemStatus {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItem {
    #[serde(default)]
    id: Option<String>,
}

fn build_batch_create_request(upload_token: &UploadToken) -> BatchCreateRequest<'_> {
    BatchCreateRequest {
        new_media_items: vec![NewMediaItem {
            simple_media_item: SimpleMediaItem {
                upload_token: upload_token.as_str(),
            },
        }],
    }
}

/// Check the single result of a batchCreate call
fn parse_batch_create_response(body: &str) -> AppResult<MediaItemResult> {
    let response: BatchCreateResponse = serde_json::from_str(body)?;

    let result = response
        .new_media_item_results
        .into_iter()
        .next()
        .ok_or_else(|| AppError::upload_failed("batchCreate returned no media item result"))?;

    if let Some(status) = &result.status {
        if let Some(code) = status.code.filter(|c| *c != 0) {
            return Err(AppError::upload_failed(format!(
                "media item rejected (code {}): {}",
                code,
                status.message.as_deref().unwrap_or("no message")
            )));
        }
    }

    Ok(result
        .media_item
        .map(|item| MediaItemResult { id: item.id })
        .unwrap_or_default())
}

/// Google Photos Library API client for the two-step upload
#[derive(Clone)]
pub struct PhotosClient {
    client: Client,
    upload_url: String,
    batch_create_url: String,
}

impl PhotosClient {
    pub fn new(upload_url: &str, batch_create_url: &str, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            upload_url: upload_url.to_string(),
            batch_create_url: batch_create_url.to_string(),
        })
    }

    async fn error_from_response(step: &str, response: reqwest::Response) -> AppError {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        AppError::upload_failed(format!(
            "Google Photos {} error {}: {}",
            step,
            status,
            error_text.trim()
        ))
    }
}

#[async_trait]
impl MediaTransport for PhotosClient {
    async fn upload_bytes(&self, file: &StagedFile, token: &AccessToken) -> AppResult<UploadToken> {
        let bytes = tokio::fs::read(file.path()).await?;
        let file_name = InputValidator::sanitize_filename(&file.file_name());

        log::debug!("Uploading {} ({} bytes)", file_name, bytes.len());

        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&token.token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("X-Goog-Upload-File-Name", file_name)
            .header("X-Goog-Upload-Protocol", "raw")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response("upload", response).await);
        }

        let upload_token = response.text().await?.trim().to_string();
        if upload_token.is_empty() {
            return Err(AppError::upload_failed("Google Photos returned an empty upload token"));
        }

        Ok(UploadToken::new(upload_token))
    }

    async fn commit_media_item(
        &self,
        upload_token: UploadToken,
        token: &AccessToken,
    ) -> AppResult<MediaItemResult> {
        let body = build_batch_create_request(&upload_token);

        let response = self
            .client
            .post(&self.batch_create_url)
            .bearer_auth(&token.token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response("batchCreate", response).await);
        }

        let response_text = response.text().await?;
        log::debug!(
            "batchCreate response (first 300 chars): {}",
            &response_text.chars().take(300).collect::<String>()
        );

        parse_batch_create_response(&response_text)
    }
}
