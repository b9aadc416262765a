//! Per-conversation upload sessions.
//!
//! A session is opened by `/start`, collects staged files in arrival order and
//! is removed once its upload run completes or the user cancels. Sessions for
//! different chats never share files.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Mime types are matched loosely: anything mentioning image/video counts
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let mime = mime_type.to_ascii_lowercase();
        if mime.contains("image") {
            Some(MediaKind::Photo)
        } else if mime.contains("video") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "heif" | "bmp" | "tiff" | "tif" => {
                Some(MediaKind::Photo)
            }
            "mp4" | "mov" | "m4v" | "avi" | "mkv" | "webm" | "3gp" | "mpg" | "mpeg" | "wmv" => {
                Some(MediaKind::Video)
            }
            _ => None,
        }
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// Media as declared by the chat message, before anything is downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMedia {
    Photo { file_id: String },
    Video { file_id: String },
    Document {
        file_id: String,
        mime_type: Option<String>,
    },
}

impl IncomingMedia {
    pub fn file_id(&self) -> &str {
        match self {
            IncomingMedia::Photo { file_id }
            | IncomingMedia::Video { file_id }
            | IncomingMedia::Document { file_id, .. } => file_id,
        }
    }

    /// Decide whether this message carries something the photo library accepts
    pub fn classify(&self) -> AppResult<MediaKind> {
        match self {
            IncomingMedia::Photo { .. } => Ok(MediaKind::Photo),
            IncomingMedia::Video { .. } => Ok(MediaKind::Video),
            IncomingMedia::Document { mime_type, .. } => {
                let mime = mime_type
                    .as_deref()
                    .ok_or_else(|| AppError::classification("document has no mime type"))?;
                MediaKind::from_mime(mime).ok_or_else(|| {
                    AppError::classification(&format!("unsupported mime type {}", mime))
                })
            }
        }
    }

    /// File extension for the staged copy. Documents keep their real subtype when we know it.
    pub fn staged_extension(&self, kind: MediaKind) -> &'static str {
        if let IncomingMedia::Document {
            mime_type: Some(mime),
            ..
        } = self
        {
            let subtype = mime.rsplit('/').next().unwrap_or_default().to_ascii_lowercase();
            let known = match subtype.as_str() {
                "jpeg" | "jpg" => Some("jpg"),
                "png" => Some("png"),
                "gif" => Some("gif"),
                "webp" => Some("webp"),
                "heic" => Some("heic"),
                "heif" => Some("heif"),
                "quicktime" => Some("mov"),
                "mp4" => Some("mp4"),
                "webm" => Some("webm"),
                "x-matroska" => Some("mkv"),
                _ => None,
            };
            if let Some(ext) = known.filter(|ext| MediaKind::from_extension(ext) == Some(kind)) {
                return ext;
            }
        }
        kind.default_extension()
    }
}

/// A downloaded photo or video waiting in the staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    path: PathBuf,
    kind: MediaKind,
}

impl StagedFile {
    /// The kind is read back from the extension so a staged path always round-trips
    pub fn new(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let kind = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaKind::from_extension)
            .ok_or_else(|| AppError::invalid_file_type(&path.to_string_lossy()))?;
        Ok(Self { path, kind })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Collecting,
    Uploading,
}

#[derive(Debug, Default)]
pub struct Session {
    files: Vec<StagedFile>,
    status: SessionStatus,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Reset to an empty collecting session, handing back whatever was staged before
    pub fn begin(&mut self) -> AppResult<Vec<StagedFile>> {
        self.ensure_collecting()?;
        Ok(std::mem::take(&mut self.files))
    }

    pub fn ensure_collecting(&self) -> AppResult<()> {
        match self.status {
            SessionStatus::Collecting => Ok(()),
            SessionStatus::Uploading => Err(AppError::UploadInProgress),
        }
    }

    /// Append a downloaded file. Rejected media leave the session untouched.
    pub fn accept(&mut self, media: &IncomingMedia, path: impl Into<PathBuf>) -> AppResult<usize> {
        self.ensure_collecting()?;
        let declared = media.classify()?;
        let file = StagedFile::new(path)?;
        if file.kind() != declared {
            return Err(AppError::classification(&format!(
                "{} was declared as {:?} but staged as {:?}",
                file.file_name(),
                declared,
                file.kind()
            )));
        }
        self.files.push(file);
        Ok(self.files.len())
    }

    /// Hand out the files for an upload run. They stay in place until `finish`.
    pub fn terminate(&mut self) -> AppResult<Vec<StagedFile>> {
        self.ensure_collecting()?;
        if !self.files.is_empty() {
            self.status = SessionStatus::Uploading;
        }
        Ok(self.files.clone())
    }

    /// Back to collecting after a run that never touched any file
    pub fn restore(&mut self) {
        self.status = SessionStatus::Collecting;
    }

    pub fn finish(&mut self) {
        self.files.clear();
        self.status = SessionStatus::Collecting;
    }

    pub fn cancel(&mut self) -> AppResult<Vec<StagedFile>> {
        self.ensure_collecting()?;
        Ok(std::mem::take(&mut self.files))
    }
}

pub type ChatId = i64;

/// Sessions keyed by chat, shared between the update loop and running uploads
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<ChatId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChatId, Session>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::error!("Session store lock was poisoned, recovering (non-critical)");
                poisoned.into_inner()
            }
        }
    }

    fn with_session<F, R>(&self, chat_id: ChatId, f: F) -> AppResult<R>
    where
        F: FnOnce(&mut Session) -> AppResult<R>,
    {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&chat_id).ok_or(AppError::NoSession)?;
        f(session)
    }

    /// Open (or reset) the chat's session, returning files abandoned by the reset
    pub fn begin(&self, chat_id: ChatId) -> AppResult<Vec<StagedFile>> {
        let mut sessions = self.lock();
        let session = sessions.entry(chat_id).or_default();
        let abandoned = session.begin()?;
        log::debug!("Session started for chat {}", chat_id);
        Ok(abandoned)
    }

    pub fn ensure_collecting(&self, chat_id: ChatId) -> AppResult<()> {
        self.with_session(chat_id, |session| session.ensure_collecting())
    }

    pub fn accept(
        &self,
        chat_id: ChatId,
        media: &IncomingMedia,
        path: impl Into<PathBuf>,
    ) -> AppResult<usize> {
        self.with_session(chat_id, |session| session.accept(media, path))
    }

    /// Files for the upload run. An empty session is closed right away.
    pub fn terminate(&self, chat_id: ChatId) -> AppResult<Vec<StagedFile>> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&chat_id).ok_or(AppError::NoSession)?;
        let files = session.terminate()?;
        if files.is_empty() {
            sessions.remove(&chat_id);
        }
        Ok(files)
    }

    /// Close the session after a completed run
    pub fn finish(&self, chat_id: ChatId) {
        let mut sessions = self.lock();
        if let Some(mut session) = sessions.remove(&chat_id) {
            session.finish();
        }
    }

    pub fn restore(&self, chat_id: ChatId) {
        if let Some(session) = self.lock().get_mut(&chat_id) {
            session.restore();
        }
    }

    /// Drop the session without uploading and return its staged files
    pub fn cancel(&self, chat_id: ChatId) -> AppResult<Vec<StagedFile>> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&chat_id).ok_or(AppError::NoSession)?;
        let files = session.cancel()?;
        sessions.remove(&chat_id);
        Ok(files)
    }

    /// Every staged path still owned by a session, including ones being uploaded
    pub fn staged_paths(&self) -> HashSet<PathBuf> {
        self.lock()
            .values()
            .flat_map(|s| s.files().iter().map(|f| f.path().to_path_buf()))
            .collect()
    }

    pub fn file_count(&self, chat_id: ChatId) -> Option<usize> {
        self.lock().get(&chat_id).map(|s| s.files().len())
    }

    pub fn status(&self, chat_id: ChatId) -> Option<SessionStatus> {
        self.lock().get(&chat_id).map(|s| s.status())
    }
}
