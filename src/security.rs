use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};
use crate::session::{MediaKind, StagedFile};

fn bot_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{5,}:[A-Za-z0-9_-]{30,}$").unwrap())
}

fn unsafe_filename_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap())
}

pub struct InputValidator;

impl InputValidator {
    pub fn validate_bot_token(token: &str) -> AppResult<()> {
        let trimmed = token.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("bot_token", "Bot token cannot be empty"));
        }

        if !bot_token_pattern().is_match(trimmed) {
            return Err(AppError::validation(
                "bot_token",
                "Bot token must look like <bot id>:<secret> as issued by BotFather",
            ));
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = unsafe_filename_chars().replace_all(filename.trim(), "_");

        // Limit length
        if sanitized.len() > 255 {
            let mut end = 252;
            while !sanitized.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &sanitized[..end])
        } else {
            sanitized.to_string()
        }
    }

    /// A staged file must still be on disk and be a photo or video
    pub fn validate_staged_file(path: &Path) -> AppResult<MediaKind> {
        let path_str = path.to_string_lossy();

        let kind = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaKind::from_extension)
            .ok_or_else(|| AppError::invalid_file_type(&path_str))?;

        if !path.exists() {
            return Err(AppError::file_not_found(&path_str));
        }

        if !path.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        Ok(kind)
    }
}

/// Remove the bot token from text that may end up in logs
pub fn redact_token(text: &str, token: &str) -> String {
    if token.is_empty() {
        return text.to_string();
    }
    text.replace(token, "<redacted>")
}

// File system helpers for the staging directory
pub struct FileSystemGuard;

impl FileSystemGuard {
    /// Staging path for a chat file. A random suffix keeps repeated sends of the same file apart.
    pub fn staged_file_path(staging_dir: &Path, file_id: &str, extension: &str) -> PathBuf {
        let stem = InputValidator::sanitize_filename(file_id).replace('.', "_");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        staging_dir.join(format!("{}-{}.{}", stem, &suffix[..8], extension))
    }

    /// Delete a staged file; failures are logged and reported as `false`
    pub async fn remove_staged_file(file: &StagedFile) -> bool {
        match tokio::fs::remove_file(file.path()).await {
            Ok(()) => {
                log::debug!("Removed staged file {}", file.path().display());
                true
            }
            Err(e) => {
                log::warn!(
                    "Failed to remove staged file {} (non-critical): {}",
                    file.path().display(),
                    e
                );
                false
            }
        }
    }

    pub async fn remove_staged_files(files: &[StagedFile]) -> usize {
        let mut removed = 0;
        for file in files {
            if Self::remove_staged_file(file).await {
                removed += 1;
            }
        }
        removed
    }
}
