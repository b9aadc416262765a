use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::errors::{AppError, AppResult};

const APP_DIR_NAME: &str = "Telegram Photos Uploader";

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_PHOTOS_UPLOAD_URL: &str = "https://photoslibrary.googleapis.com/v1/uploads";
pub const DEFAULT_PHOTOS_BATCH_CREATE_URL: &str =
    "https://photoslibrary.googleapis.com/v1/mediaItems:batchCreate";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Usually left out of the file and supplied through TELEGRAM_BOT_TOKEN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    pub credentials_path: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub telegram_api_url: String,
    pub photos_upload_url: String,
    pub photos_batch_create_url: String,
    pub request_timeout_secs: u64,
    pub poll_timeout_secs: u64,
    pub stale_file_hours: u64,
    pub allowed_user_ids: Vec<i64>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: None,
            credentials_path: None,
            staging_dir: None,
            telegram_api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
            photos_upload_url: DEFAULT_PHOTOS_UPLOAD_URL.to_string(),
            photos_batch_create_url: DEFAULT_PHOTOS_BATCH_CREATE_URL.to_string(),
            request_timeout_secs: 120,
            poll_timeout_secs: 30,
            stale_file_hours: 24,
            allowed_user_ids: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Apply TELEGRAM_BOT_TOKEN, GOOGLE_PHOTOS_TOKEN_PATH and PHOTOS_STAGING_DIR
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.bot_token = Some(token.trim().to_string());
        }
        if let Some(path) = lookup("GOOGLE_PHOTOS_TOKEN_PATH").filter(|p| !p.is_empty()) {
            self.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("PHOTOS_STAGING_DIR").filter(|d| !d.is_empty()) {
            self.staging_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn bot_token(&self) -> AppResult<&str> {
        self.bot_token.as_deref().ok_or_else(|| {
            AppError::Config(
                "No bot token configured. Set TELEGRAM_BOT_TOKEN or bot_token in config.json"
                    .to_string(),
            )
        })
    }

    pub fn credentials_path(&self) -> AppResult<PathBuf> {
        match &self.credentials_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_config_directory()?.join("token.json")),
        }
    }

    pub fn staging_dir(&self) -> AppResult<PathBuf> {
        let dir = match &self.staging_dir {
            Some(dir) => dir.clone(),
            None => get_data_directory()?.join("photos"),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stale_file_age(&self) -> Duration {
        Duration::from_secs(self.stale_file_hours * 60 * 60)
    }

    pub fn is_user_allowed(&self, user_id: Option<i64>) -> bool {
        if self.allowed_user_ids.is_empty() {
            return true;
        }
        user_id.is_some_and(|id| self.allowed_user_ids.contains(&id))
    }
}

fn get_config_directory() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

fn get_config_path() -> AppResult<PathBuf> {
    Ok(get_config_directory()?.join("config.json"))
}

pub fn get_data_directory() -> AppResult<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| AppError::Config("Could not find data directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Load config.json from the platform config directory, then apply env overrides
pub fn load_config() -> AppResult<Config> {
    let mut config = load_config_from(&get_config_path()?)?;
    config.apply_env_overrides();
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config_from(config_path: &Path) -> AppResult<Config> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        });
        Ok(config)
    } else {
        let default_config = Config::default();
        save_config_to(config_path, &default_config)?;
        Ok(default_config)
    }
}

pub fn save_config_to(config_path: &Path, config: &Config) -> AppResult<()> {
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    if let Some(token) = &config.bot_token {
        crate::security::InputValidator::validate_bot_token(token)?;
    }

    if config.request_timeout_secs < 5 {
        return Err(AppError::validation("request_timeout_secs", "Must be at least 5 seconds"));
    }

    // getUpdates holds the request open for the whole poll timeout
    if config.request_timeout_secs <= config.poll_timeout_secs {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be longer than poll_timeout_secs",
        ));
    }

    if config.poll_timeout_secs == 0 || config.poll_timeout_secs > 50 {
        return Err(AppError::validation("poll_timeout_secs", "Must be between 1 and 50"));
    }

    if config.stale_file_hours == 0 {
        return Err(AppError::validation("stale_file_hours", "Must be greater than 0"));
    }

    for (field, url) in [
        ("telegram_api_url", &config.telegram_api_url),
        ("photos_upload_url", &config.photos_upload_url),
        ("photos_batch_create_url", &config.photos_batch_create_url),
    ] {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::validation(field, "Must be an http(s) URL"));
        }
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

/// Delete staged files older than `max_age` that no session holds; returns how many were removed
pub fn cleanup_stale_files(
    directory: &Path,
    max_age: Duration,
    in_use: &HashSet<PathBuf>,
) -> AppResult<usize> {
    if !directory.exists() {
        return Ok(0);
    }

    let cutoff_time = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();

        if in_use.contains(&path) {
            continue;
        }

        if path.is_file() {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                if modified < cutoff_time {
                    if let Err(e) = fs::remove_file(&path) {
                        log::warn!("Failed to remove stale file {}: {}", path.display(), e);
                    } else {
                        log::debug!("Removed stale file: {}", path.display());
                        removed += 1;
                    }
                }
            }
        }
    }

    Ok(removed)
}
