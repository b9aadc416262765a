use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use telegram_photos_uploader::{
    commands::{self, BotContext, ChatApi, CANCEL_MESSAGE, NO_FILES_MESSAGE, REPROMPT_MESSAGE, START_MESSAGE},
    config::Config,
    errors::{AppError, AppResult},
    google_photos::{AccessToken, CredentialProvider, MediaItemResult, MediaTransport, UploadToken},
    session::{SessionStatus, SessionStore, StagedFile},
    telegram::Message,
    uploader::{PipelineResult, UploadPipeline},
};

/// End-to-end tests of the chat flow: messages in, staged files, upload run, chat replies out

const CHAT: i64 = 42;

#[derive(Default)]
struct FakeChat {
    sent: Mutex<Vec<String>>,
    edits: Mutex<Vec<String>>,
}

impl FakeChat {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn edits(&self) -> Vec<String> {
        self.edits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn send_message(&self, _chat_id: i64, text: &str) -> AppResult<i64> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(text.to_string());
        Ok(sent.len() as i64)
    }

    async fn edit_message_text(&self, _chat_id: i64, _message_id: i64, text: &str) -> AppResult<()> {
        self.edits.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn download_file(&self, file_id: &str, destination: &Path) -> AppResult<u64> {
        if file_id.starts_with("broken") {
            return Err(AppError::telegram_api("getFile", 400, "file is too big"));
        }
        tokio::fs::write(destination, b"media bytes").await?;
        Ok(11)
    }
}

struct FakeCredentials {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn authenticate(&self) -> AppResult<AccessToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::authentication("token.json is missing a refresh token"));
        }
        Ok(AccessToken {
            token: "ya29.integration".to_string(),
        })
    }
}

#[derive(Default)]
struct FakeTransport {
    fail_upload_at: Option<usize>,
    fail_commit_at: Option<usize>,
    uploads: Mutex<Vec<String>>,
    commits: AtomicUsize,
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn upload_bytes(&self, file: &StagedFile, _token: &AccessToken) -> AppResult<UploadToken> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(file.file_name());
        if self.fail_upload_at == Some(uploads.len()) {
            return Err(AppError::upload_failed("HTTP 500"));
        }
        Ok(UploadToken::new(format!("upload-{}", uploads.len())))
    }

    async fn commit_media_item(
        &self,
        _upload_token: UploadToken,
        _token: &AccessToken,
    ) -> AppResult<MediaItemResult> {
        let count = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_commit_at == Some(count) {
            return Err(AppError::upload_failed("media item rejected"));
        }
        Ok(MediaItemResult {
            id: Some(format!("item-{}", count)),
        })
    }
}

struct Harness {
    ctx: Arc<BotContext>,
    chat: Arc<FakeChat>,
    credentials: Arc<FakeCredentials>,
    transport: Arc<FakeTransport>,
    staging: TempDir,
}

impl Harness {
    fn new(transport: FakeTransport, fail_auth: bool, config: Config) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let chat = Arc::new(FakeChat::default());
        let credentials = Arc::new(FakeCredentials {
            calls: AtomicUsize::new(0),
            fail: fail_auth,
        });
        let transport = Arc::new(transport);
        let pipeline = UploadPipeline::new(credentials.clone(), transport.clone());

        let ctx = Arc::new(BotContext {
            chat: chat.clone(),
            sessions: SessionStore::new(),
            pipeline: Arc::new(pipeline),
            staging_dir: staging.path().to_path_buf(),
            config,
        });

        Self {
            ctx,
            chat,
            credentials,
            transport,
            staging,
        }
    }

    fn with_transport(transport: FakeTransport) -> Self {
        Self::new(transport, false, Config::default())
    }

    async fn send(&self, message: serde_json::Value) -> Option<PipelineResult> {
        let message: Message = serde_json::from_value(message).unwrap();
        match commands::handle_message(&self.ctx, &message).await {
            Some(handle) => Some(handle.await.unwrap()),
            None => None,
        }
    }

    async fn text(&self, text: &str) -> Option<PipelineResult> {
        self.send(text_message(text)).await
    }

    async fn photo(&self, file_id: &str) {
        assert!(self.send(photo_message(file_id)).await.is_none());
    }

    fn staged_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.staging.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

fn text_message(text: &str) -> serde_json::Value {
    serde_json::json!({
        "message_id": 1,
        "chat": { "id": CHAT, "type": "private" },
        "from": { "id": CHAT, "is_bot": false, "first_name": "Sam" },
        "text": text
    })
}

fn photo_message(file_id: &str) -> serde_json::Value {
    serde_json::json!({
        "message_id": 2,
        "chat": { "id": CHAT, "type": "private" },
        "from": { "id": CHAT, "is_bot": false, "first_name": "Sam" },
        "photo": [
            { "file_id": format!("{}-thumb", file_id), "file_unique_id": "t", "width": 90, "height": 90 },
            { "file_id": file_id, "file_unique_id": "f", "width": 1280, "height": 960 }
        ]
    })
}

fn document_message(file_id: &str, mime_type: &str) -> serde_json::Value {
    serde_json::json!({
        "message_id": 3,
        "chat": { "id": CHAT, "type": "private" },
        "from": { "id": CHAT, "is_bot": false, "first_name": "Sam" },
        "document": { "file_id": file_id, "file_unique_id": "d", "mime_type": mime_type }
    })
}

#[tokio::test]
async fn test_three_photos_upload_successfully() {
    let harness = Harness::with_transport(FakeTransport::default());

    harness.text("/start").await;
    for id in ["p1", "p2", "p3"] {
        harness.photo(id).await;
    }
    assert_eq!(harness.ctx.sessions.file_count(CHAT), Some(3));
    assert_eq!(harness.staged_names().len(), 3);

    let result = harness.text("/done").await.unwrap();

    let PipelineResult::Completed(report) = result else {
        panic!("expected a completed run");
    };
    assert!(report.all_succeeded());
    assert_eq!(
        harness.chat.sent(),
        vec![
            START_MESSAGE.to_string(),
            "Received 3 files. Starting upload process now.".to_string(),
        ]
    );
    assert_eq!(
        harness.chat.edits(),
        vec![
            "Uploaded 1/3 files.",
            "Uploaded 2/3 files.",
            "Uploaded 3/3 files.",
            "All files uploaded successfully!",
        ]
    );
    assert_eq!(harness.credentials.calls.load(Ordering::SeqCst), 1);

    // Uploaded in arrival order, staged copies gone, session closed
    let uploads = harness.transport.uploads.lock().unwrap().clone();
    assert!(uploads[0].starts_with("p1-"));
    assert!(uploads[1].starts_with("p2-"));
    assert!(uploads[2].starts_with("p3-"));
    assert!(harness.staged_names().is_empty());
    assert_eq!(harness.ctx.sessions.file_count(CHAT), None);
}

#[tokio::test]
async fn test_commit_failure_reports_partial_summary() {
    let harness = Harness::with_transport(FakeTransport {
        fail_commit_at: Some(2),
        ..Default::default()
    });

    harness.text("/start").await;
    harness.photo("p1").await;
    harness.photo("p2").await;
    harness.text("/done").await;

    assert_eq!(
        harness.chat.edits(),
        vec![
            "Uploaded 1/2 files.",
            "Failed to upload file 2. Error: Upload failed: media item rejected",
            "Uploaded 1/2 files with some errors.",
        ]
    );
    // Both files were attempted, so both are cleaned up
    assert!(harness.staged_names().is_empty());
}

#[tokio::test]
async fn test_failure_halts_before_remaining_files() {
    let harness = Harness::with_transport(FakeTransport {
        fail_upload_at: Some(2),
        ..Default::default()
    });

    harness.text("/start").await;
    for id in ["p1", "p2", "p3"] {
        harness.photo(id).await;
    }
    harness.text("/done").await;

    assert_eq!(harness.transport.uploads.lock().unwrap().len(), 2);
    assert_eq!(harness.transport.commits.load(Ordering::SeqCst), 1);

    // The third file was never attempted and stays in staging
    let remaining = harness.staged_names();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].starts_with("p3-"));

    assert_eq!(
        harness.chat.edits().last().map(String::as_str),
        Some("Uploaded 1/3 files with some errors.")
    );
    assert_eq!(harness.ctx.sessions.file_count(CHAT), None);
}

#[tokio::test]
async fn test_cancel_discards_session_without_uploading() {
    let harness = Harness::with_transport(FakeTransport::default());

    harness.text("/start").await;
    harness.photo("p1").await;
    harness.photo("p2").await;
    harness.text("/cancel").await;

    assert_eq!(harness.chat.sent().last().map(String::as_str), Some(CANCEL_MESSAGE));
    assert_eq!(harness.ctx.sessions.file_count(CHAT), None);
    assert!(harness.staged_names().is_empty());
    assert_eq!(harness.credentials.calls.load(Ordering::SeqCst), 0);
    assert!(harness.transport.uploads.lock().unwrap().is_empty());

    // A new session starts empty
    harness.text("/start").await;
    assert_eq!(harness.ctx.sessions.file_count(CHAT), Some(0));
}

#[tokio::test]
async fn test_done_with_empty_session_contacts_nothing() {
    let harness = Harness::with_transport(FakeTransport::default());

    harness.text("/start").await;
    assert!(harness.text("/done").await.is_none());

    assert_eq!(harness.chat.sent().last().map(String::as_str), Some(NO_FILES_MESSAGE));
    assert_eq!(harness.credentials.calls.load(Ordering::SeqCst), 0);
    assert!(harness.transport.uploads.lock().unwrap().is_empty());
    assert_eq!(harness.ctx.sessions.file_count(CHAT), None);
}

#[tokio::test]
async fn test_non_media_never_changes_session() {
    let harness = Harness::with_transport(FakeTransport::default());

    harness.text("/start").await;
    harness.photo("p1").await;

    for _ in 0..3 {
        harness.send(document_message("doc", "application/pdf")).await;
    }
    harness.text("hello there").await;

    assert_eq!(harness.ctx.sessions.file_count(CHAT), Some(1));
    assert_eq!(harness.staged_names().len(), 1);
    let reprompts = harness
        .chat
        .sent()
        .iter()
        .filter(|m| m.as_str() == REPROMPT_MESSAGE)
        .count();
    assert_eq!(reprompts, 4);
}

#[tokio::test]
async fn test_image_document_is_accepted() {
    let harness = Harness::with_transport(FakeTransport::default());

    harness.text("/start").await;
    harness.send(document_message("scan", "image/png")).await;
    harness.send(document_message("clip", "video/quicktime")).await;

    let names = harness.staged_names();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.starts_with("clip-") && n.ends_with(".mov")));
    assert!(names.iter().any(|n| n.starts_with("scan-") && n.ends_with(".png")));
}

#[tokio::test]
async fn test_media_without_session_is_rejected() {
    let harness = Harness::with_transport(FakeTransport::default());

    harness.photo("p1").await;

    assert_eq!(
        harness.chat.sent(),
        vec![AppError::NoSession.to_string()]
    );
    assert!(harness.staged_names().is_empty());
}

#[tokio::test]
async fn test_failed_download_is_not_staged() {
    let harness = Harness::with_transport(FakeTransport::default());

    harness.text("/start").await;
    harness.photo("broken1").await;

    assert_eq!(harness.ctx.sessions.file_count(CHAT), Some(0));
    assert!(harness
        .chat
        .sent()
        .last()
        .unwrap()
        .starts_with("Could not download that file. Error:"));
    assert!(harness.staged_names().is_empty());
}

#[tokio::test]
async fn test_authentication_failure_keeps_files_for_retry() {
    let harness = Harness::new(FakeTransport::default(), true, Config::default());

    harness.text("/start").await;
    harness.photo("p1").await;
    harness.photo("p2").await;

    let result = harness.text("/done").await.unwrap();

    assert!(matches!(result, PipelineResult::AuthenticationFailed { .. }));
    assert_eq!(harness.ctx.sessions.status(CHAT), Some(SessionStatus::Collecting));
    assert_eq!(harness.ctx.sessions.file_count(CHAT), Some(2));
    assert_eq!(harness.staged_names().len(), 2);
    assert!(harness.transport.uploads.lock().unwrap().is_empty());
    assert!(harness.chat.edits()[0].starts_with("Failed to authenticate with Google Photos."));
}

#[tokio::test]
async fn test_busy_session_rejects_media_and_commands() {
    let harness = Harness::with_transport(FakeTransport::default());

    harness.text("/start").await;
    harness.photo("p1").await;
    // Put the session into the uploading state without running the upload
    harness.ctx.sessions.terminate(CHAT).unwrap();

    harness.photo("p2").await;
    harness.text("/cancel").await;
    harness.text("/start").await;

    let busy = AppError::UploadInProgress.to_string();
    let sent = harness.chat.sent();
    assert_eq!(&sent[sent.len() - 3..], &[busy.clone(), busy.clone(), busy]);
    assert_eq!(harness.ctx.sessions.file_count(CHAT), Some(1));
    assert_eq!(harness.staged_names().len(), 1);
}

#[tokio::test]
async fn test_unlisted_user_is_ignored() {
    let config = Config {
        allowed_user_ids: vec![7],
        ..Config::default()
    };
    let harness = Harness::new(FakeTransport::default(), false, config);

    harness.text("/start").await;
    harness.photo("p1").await;

    assert!(harness.chat.sent().is_empty());
    assert_eq!(harness.ctx.sessions.file_count(CHAT), None);
}

#[tokio::test]
async fn test_commands_accept_bot_suffix() {
    let harness = Harness::with_transport(FakeTransport::default());

    harness.text("/start@photos_bot").await;
    harness.photo("p1").await;
    let result = harness.text("/done@photos_bot").await;

    assert!(matches!(result, Some(PipelineResult::Completed(_))));
}
