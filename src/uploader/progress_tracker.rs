use async_trait::async_trait;

use crate::errors::AppResult;

/// Where progress text for a run is shown to the user
#[async_trait]
pub trait ProgressReporter: Send {
    async fn report(&mut self, text: &str) -> AppResult<()>;
}

pub fn received_message(total: usize) -> String {
    format!("Received {} files. Starting upload process now.", total)
}

pub fn uploaded_message(index: usize, total: usize) -> String {
    format!("Uploaded {}/{} files.", index, total)
}

pub fn failed_message(index: usize, error: &str) -> String {
    format!("Failed to upload file {}. Error: {}", index, error)
}

pub fn summary_message(successful: usize, total: usize) -> String {
    if successful == total {
        "All files uploaded successfully!".to_string()
    } else {
        format!("Uploaded {}/{} files with some errors.", successful, total)
    }
}

pub fn authentication_failed_message(error: &str) -> String {
    format!(
        "Failed to authenticate with Google Photos. Error: {}\nSend /done to try again or /cancel to discard the files.",
        error
    )
}

/// Report progress; a failing reporter never interrupts the upload run
pub async fn safe_report(reporter: &mut dyn ProgressReporter, run_id: &str, text: &str) -> bool {
    match reporter.report(text).await {
        Ok(()) => {
            log::debug!("Run {}: reported '{}'", run_id, text);
            true
        }
        Err(e) => {
            log::warn!(
                "Run {}: failed to report progress '{}' (non-critical): {}",
                run_id,
                text,
                e
            );
            false
        }
    }
}
