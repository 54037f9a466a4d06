//! The subset of Bot API objects the service reads and writes.

use serde::{Deserialize, Serialize};

use common::model::ContentKind;
use common::transport::MemberStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind.as_str(), "group" | "supergroup")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: i64,
    pub length: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Audio {
    pub file_id: String,
    pub title: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    #[serde(default)]
    pub caption_entities: Vec<MessageEntity>,
    pub document: Option<Document>,
    pub video: Option<Video>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    pub audio: Option<Audio>,
    pub reply_to_message: Option<Box<Message>>,
}

/// What a content message carries, as far as issuing a link is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: ContentKind,
    pub size: Option<u64>,
    pub default_name: String,
}

impl Message {
    /// Text or caption, whichever is present
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }

    pub fn body_entities(&self) -> &[MessageEntity] {
        if self.entities.is_empty() {
            &self.caption_entities
        } else {
            &self.entities
        }
    }

    /// The largest photo size, if this is a photo
    pub fn largest_photo(&self) -> Option<&PhotoSize> {
        self.photo.iter().max_by_key(|p| p.width * p.height)
    }

    pub fn attachment(&self) -> Option<Attachment> {
        if let Some(document) = &self.document {
            return Some(Attachment {
                kind: ContentKind::Document,
                size: document.file_size,
                default_name: document
                    .file_name
                    .clone()
                    .unwrap_or_else(|| "Document".to_string()),
            });
        }
        if let Some(video) = &self.video {
            return Some(Attachment {
                kind: ContentKind::Video,
                size: video.file_size,
                default_name: video
                    .file_name
                    .clone()
                    .unwrap_or_else(|| "Video".to_string()),
            });
        }
        if let Some(photo) = self.largest_photo() {
            let default_name = self
                .caption
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Photo_{}", self.message_id));
            return Some(Attachment {
                kind: ContentKind::Photo,
                size: photo.file_size,
                default_name,
            });
        }
        if let Some(audio) = &self.audio {
            return Some(Attachment {
                kind: ContentKind::Audio,
                size: audio.file_size,
                default_name: audio
                    .title
                    .clone()
                    .or_else(|| audio.file_name.clone())
                    .unwrap_or_else(|| "Audio".to_string()),
            });
        }
        None
    }
}

/// How to send a message's file again, under a new thumbnail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resend {
    /// `sendDocument`, `sendVideo` or `sendAudio`
    pub method: &'static str,
    /// Form field carrying the file id
    pub field: &'static str,
    pub file_id: String,
}

impl Message {
    /// Only documents, videos and audio take a custom thumbnail
    pub fn resend(&self) -> Option<Resend> {
        let (method, field, file_id) = if let Some(document) = &self.document {
            ("sendDocument", "document", &document.file_id)
        } else if let Some(video) = &self.video {
            ("sendVideo", "video", &video.file_id)
        } else if let Some(audio) = &self.audio {
            ("sendAudio", "audio", &audio.file_id)
        } else {
            return None;
        };
        Some(Resend {
            method,
            field,
            file_id: file_id.clone(),
        })
    }
}

/// Result of `getFile`
#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub file_id: String,
    /// Absent once the file can no longer be downloaded
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
    /// Only reported for `restricted` members
    #[serde(default)]
    pub is_member: Option<bool>,
}

impl ChatMember {
    /// A restricted user who has since left still reports `restricted`,
    ///  with `is_member` false.
    pub fn member_status(&self) -> Option<MemberStatus> {
        match MemberStatus::parse(&self.status)? {
            MemberStatus::Restricted if self.is_member == Some(false) => Some(MemberStatus::Left),
            status => Some(status),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageId {
    pub message_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: serde_json::Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_attachment_defaults() {
        let doc = message(serde_json::json!({
            "message_id": 5,
            "chat": {"id": 1, "type": "private"},
            "document": {"file_id": "d", "file_size": 42}
        }));
        let attachment = doc.attachment().unwrap();
        assert_eq!(attachment.kind, ContentKind::Document);
        assert_eq!(attachment.size, Some(42));
        assert_eq!(attachment.default_name, "Document");

        let photo = message(serde_json::json!({
            "message_id": 9,
            "chat": {"id": 1, "type": "private"},
            "photo": [
                {"file_id": "small", "width": 90, "height": 90},
                {"file_id": "large", "width": 800, "height": 600, "file_size": 1000}
            ]
        }));
        assert_eq!(photo.largest_photo().unwrap().file_id, "large");
        let attachment = photo.attachment().unwrap();
        assert_eq!(attachment.kind, ContentKind::Photo);
        assert_eq!(attachment.default_name, "Photo_9");

        let audio = message(serde_json::json!({
            "message_id": 3,
            "chat": {"id": 1, "type": "private"},
            "caption": "ignored",
            "audio": {"file_id": "a", "title": "Theme"}
        }));
        assert_eq!(audio.attachment().unwrap().default_name, "Theme");

        let text = message(serde_json::json!({
            "message_id": 4,
            "chat": {"id": 1, "type": "private"},
            "text": "hello"
        }));
        assert_eq!(text.attachment(), None);
    }

    #[test]
    fn test_keyboard_serialization_skips_unset_fields() {
        let markup = InlineKeyboardMarkup {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: "Go".into(),
                url: None,
                callback_data: Some("menu:home".into()),
            }]],
        };
        let json = serde_json::to_value(&markup).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"inline_keyboard": [[{"text": "Go", "callback_data": "menu:home"}]]})
        );
    }
}
