use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::errors::{AppError, AppResult};

pub const PHOTOS_APPEND_ONLY_SCOPE: &str =
    "https://www.googleapis.com/auth/photoslibrary.appendonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh a little early so a token does not expire halfway through a run
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Bearer token handed to the uploader for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a currently valid token, refreshing stored credentials if needed
    async fn authenticate(&self) -> AppResult<AccessToken>;
}

/// Authorized-user credentials as written by Google's installed-app consent flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    /// Fields we do not use (account, universe_domain, ...) are written back untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl Credentials {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) <= now,
            None => false,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty()) && !self.is_expired(now)
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.token.as_ref().map(|token| AccessToken {
            token: token.clone(),
        })
    }

    /// Exchange the refresh token for a fresh access token
    pub async fn refresh(&mut self, client: &Client) -> AppResult<()> {
        let refresh_token = self
            .refresh_token
            .clone()
            .ok_or_else(|| AppError::authentication("credentials expired and no refresh token is stored"))?;

        let response = client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::authentication(format!("token refresh request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::authentication(format!(
                "token refresh rejected ({}): {}",
                status, error_text
            )));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AppError::authentication(format!("invalid token refresh response: {}", e)))?;

        self.apply_refresh(refreshed, Utc::now());
        Ok(())
    }

    fn apply_refresh(&mut self, refreshed: RefreshResponse, now: DateTime<Utc>) {
        self.token = Some(refreshed.access_token);
        // An out-of-range lifetime is treated as no known expiry
        self.expiry = refreshed
            .expires_in
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime));
    }
}

pub fn load_credentials(path: &Path) -> AppResult<Credentials> {
    if !path.exists() {
        return Err(AppError::authentication(format!(
            "no stored Google credentials at {}; complete the OAuth consent flow for scope {} first",
            path.display(),
            PHOTOS_APPEND_ONLY_SCOPE
        )));
    }

    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        AppError::authentication(format!("unreadable credentials in {}: {}", path.display(), e))
    })
}

pub fn save_credentials(path: &Path, credentials: &Credentials) -> AppResult<()> {
    let contents = serde_json::to_string_pretty(credentials)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Credentials persisted in a token file, refreshed in place when they expire
pub struct StoredCredentialProvider {
    path: PathBuf,
    client: Client,
    // Serializes refresh + write-back between concurrent runs
    refresh_lock: Mutex<()>,
}

impl StoredCredentialProvider {
    pub fn new(path: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            path: path.into(),
            client,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentialProvider {
    async fn authenticate(&self) -> AppResult<AccessToken> {
        let _guard = self.refresh_lock.lock().await;
        let mut credentials = load_credentials(&self.path)?;

        if !credentials.is_valid(Utc::now()) {
            log::info!("Google credentials expired, refreshing");
            credentials.refresh(&self.client).await?;

            if let Err(e) = save_credentials(&self.path, &credentials) {
                log::warn!(
                    "Failed to persist refreshed credentials to {}: {}",
                    self.path.display(),
                    e
                );
            }
        }

        credentials
            .access_token()
            .ok_or_else(|| AppError::authentication("stored credentials carry no access token"))
    }
}
