use serde::{Deserialize, Serialize};

use crate::session::IncomingMedia;

/// Envelope around every Bot API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub video: Option<Video>,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Result of getFile; `file_path` is what the download URL is built from
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramFile {
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetUpdatesParams {
    pub offset: i64,
    pub timeout: u64,
    pub allowed_updates: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageParams<'a> {
    pub chat_id: i64,
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct EditMessageTextParams<'a> {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct GetFileParams<'a> {
    pub file_id: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Done,
    Cancel,
}

/// Parse "/done" or "/done@my_bot" from the first word of a message
pub fn parse_command(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or_default();

    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "done" => Some(Command::Done),
        "cancel" => Some(Command::Cancel),
        _ => None,
    }
}

impl Message {
    pub fn command(&self) -> Option<Command> {
        self.text.as_deref().and_then(parse_command)
    }

    pub fn is_command(&self) -> bool {
        self.text.as_deref().is_some_and(|t| t.starts_with('/'))
    }

    pub fn sender_id(&self) -> Option<i64> {
        self.from.as_ref().map(|u| u.id)
    }

    /// Media attached to the message; photos use the largest size Telegram offers
    pub fn incoming_media(&self) -> Option<IncomingMedia> {
        if let Some(largest) = self
            .photo
            .as_ref()
            .and_then(|sizes| sizes.iter().max_by_key(|p| u64::from(p.width) * u64::from(p.height)))
        {
            return Some(IncomingMedia::Photo {
                file_id: largest.file_id.clone(),
            });
        }

        if let Some(video) = &self.video {
            return Some(IncomingMedia::Video {
                file_id: video.file_id.clone(),
            });
        }

        self.document.as_ref().map(|doc| IncomingMedia::Document {
            file_id: doc.file_id.clone(),
            mime_type: doc.mime_type.clone(),
        })
    }
}
