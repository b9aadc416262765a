use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid file type: {path}. Only photos and videos are supported.")]
    InvalidFileType { path: String },

    #[error("Not a photo or video: {reason}")]
    Classification { reason: String },

    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("Telegram API error in {method} ({code}): {description}")]
    TelegramApi {
        method: String,
        code: i64,
        description: String,
    },

    #[error("An upload is already in progress.")]
    UploadInProgress,

    #[error("No active session. Send /start to begin.")]
    NoSession,

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn invalid_file_type(path: &str) -> Self {
        Self::InvalidFileType {
            path: path.to_string(),
        }
    }

    pub fn classification(reason: &str) -> Self {
        Self::Classification {
            reason: reason.to_string(),
        }
    }

    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    pub fn upload_failed(reason: impl Into<String>) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }

    pub fn telegram_api(method: &str, code: i64, description: &str) -> Self {
        Self::TelegramApi {
            method: method.to_string(),
            code,
            description: description.to_string(),
        }
    }

    /// Whether the Telegram API asked us to slow down
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::TelegramApi { code: 429, .. })
    }

    /// Telegram rejected the bot token; polling cannot recover from this
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AppError::TelegramApi { code: 401 | 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_user_readable() {
        let err = AppError::upload_failed("HTTP 500: backend error");
        assert_eq!(err.to_string(), "Upload failed: HTTP 500: backend error");

        let err = AppError::validation("bot_token", "Bot token cannot be empty");
        assert_eq!(
            err.to_string(),
            "Validation error: bot_token - Bot token cannot be empty"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(AppError::telegram_api("sendMessage", 429, "Too Many Requests").is_rate_limited());
        assert!(!AppError::telegram_api("sendMessage", 400, "Bad Request").is_rate_limited());
        assert!(AppError::telegram_api("getUpdates", 401, "Unauthorized").is_unauthorized());
        assert!(!AppError::upload_failed("timeout").is_unauthorized());
    }
}
