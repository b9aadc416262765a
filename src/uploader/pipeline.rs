use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;

use crate::errors::AppResult;
use crate::google_photos::{AccessToken, CredentialProvider, MediaItemResult, MediaTransport};
use crate::security::{FileSystemGuard, InputValidator};
use crate::session::{ChatId, SessionStore, StagedFile};

use super::progress_tracker::{
    authentication_failed_message, failed_message, safe_report, summary_message,
    uploaded_message, ProgressReporter,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    /// 1-based position in the run
    pub index: usize,
    pub file_path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub total: usize,
    pub successful: usize,
    pub media_item_ids: Vec<String>,
    pub failed: Option<FailedUpload>,
}

impl UploadReport {
    fn new(total: usize) -> Self {
        Self {
            total,
            successful: 0,
            media_item_ids: Vec::new(),
            failed: None,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.successful == self.total
    }

    pub fn summary(&self) -> String {
        summary_message(self.successful, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    /// Empty file list; nothing was contacted
    NothingToUpload,
    /// Credentials could not be obtained; no file was touched
    AuthenticationFailed { reason: String },
    Completed(UploadReport),
}

impl PipelineResult {
    pub fn summary(&self) -> Option<String> {
        match self {
            PipelineResult::Completed(report) => Some(report.summary()),
            _ => None,
        }
    }
}

/// Sequential upload of a session's files to the photo library
pub struct UploadPipeline {
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn MediaTransport>,
}

impl UploadPipeline {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    /// Upload `files` in order, stopping at the first failure.
    ///
    /// Credentials are fetched once for the whole run. Every attempted file is
    /// deleted afterwards whether it made it or not; files after a failure are
    /// left alone. Errors end up in the reporter and in the returned result,
    /// never as an `Err`.
    pub async fn run(
        &self,
        files: &[StagedFile],
        reporter: &mut dyn ProgressReporter,
    ) -> PipelineResult {
        if files.is_empty() {
            return PipelineResult::NothingToUpload;
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let total = files.len();
        log::info!("Run {}: starting upload of {} files", run_id, total);

        let token = match self.credentials.authenticate().await {
            Ok(token) => token,
            Err(e) => {
                log::error!("Run {}: authentication failed: {}", run_id, e);
                safe_report(reporter, &run_id, &authentication_failed_message(&e.to_string())).await;
                return PipelineResult::AuthenticationFailed {
                    reason: e.to_string(),
                };
            }
        };

        let start_time = Instant::now();
        let mut report = UploadReport::new(total);

        for (position, file) in files.iter().enumerate() {
            let index = position + 1;
            let outcome = self.upload_file(file, &token).await;

            // Cleanup is unconditional for every attempted file
            FileSystemGuard::remove_staged_file(file).await;

            match outcome {
                Ok(item) => {
                    report.successful += 1;
                    if let Some(id) = item.id {
                        report.media_item_ids.push(id);
                    }
                    log::info!(
                        "Run {}: uploaded {} ({}/{})",
                        run_id,
                        file.path().display(),
                        index,
                        total
                    );
                    safe_report(reporter, &run_id, &uploaded_message(index, total)).await;
                }
                Err(e) => {
                    log::error!("Run {}: failed to upload {}: {}", run_id, file.path().display(), e);
                    safe_report(reporter, &run_id, &failed_message(index, &e.to_string())).await;
                    report.failed = Some(FailedUpload {
                        index,
                        file_path: file.path().to_path_buf(),
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        log::info!(
            "Run {} finished in {:.1}s: {}/{} uploaded",
            run_id,
            start_time.elapsed().as_secs_f64(),
            report.successful,
            total
        );
        safe_report(reporter, &run_id, &report.summary()).await;

        PipelineResult::Completed(report)
    }

    /// Run the upload for a chat's session and settle the session afterwards.
    ///
    /// The session is closed once the loop has run. After an authentication
    /// failure it goes back to collecting with its files, so `/done` can be retried.
    pub async fn run_session(
        &self,
        sessions: &SessionStore,
        chat_id: ChatId,
        files: &[StagedFile],
        reporter: &mut dyn ProgressReporter,
    ) -> PipelineResult {
        let result = self.run(files, reporter).await;

        match &result {
            PipelineResult::AuthenticationFailed { .. } => sessions.restore(chat_id),
            PipelineResult::NothingToUpload | PipelineResult::Completed(_) => {
                sessions.finish(chat_id)
            }
        }

        result
    }

    async fn upload_file(&self, file: &StagedFile, token: &AccessToken) -> AppResult<MediaItemResult> {
        InputValidator::validate_staged_file(file.path())?;
        let upload_token = self.transport.upload_bytes(file, token).await?;
        self.transport.commit_media_item(upload_token, token).await
    }
}
