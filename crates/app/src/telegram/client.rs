use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use url::Url;

use common::model::{ChatId, ContentPointer, GroupHandle, UserId};
use common::transport::{
    BotIdentity, CopyOptions, GroupInfo, GroupKind, MemberStatus, Transport, TransportError,
};

use super::types::{
    ApiResponse, Chat, ChatMember, File, InlineKeyboardMarkup, Message, MessageId, Resend, Update,
    User,
};

/// Headroom on top of the long-poll timeout before a request is abandoned
const REQUEST_SLACK: Duration = Duration::from_secs(10);

/// Multipart field the thumbnail image is uploaded under
const THUMBNAIL_PART: &str = "thumb";

/// Bot API client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BotClient {
    /// `<api base>/bot<token>/`
    endpoint: Url,
    /// `<api base>/file/bot<token>/`
    files: Url,
    client: Client,
}

#[derive(Debug, thiserror::Error)]
pub enum BotClientError {
    #[error("HTTP client setup failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl BotClient {
    pub fn new(api_base: &Url, token: &str, poll_timeout: Duration) -> Result<Self, BotClientError> {
        let base = api_base.as_str().trim_end_matches('/');
        let endpoint = Url::parse(&format!("{}/bot{}/", base, token))?;
        let files = Url::parse(&format!("{}/file/bot{}/", base, token))?;
        let client = Client::builder()
            .timeout(poll_timeout + REQUEST_SLACK)
            .build()?;
        Ok(Self {
            endpoint,
            files,
            client,
        })
    }

    fn method_url(&self, method: &str) -> Result<Url, TransportError> {
        self.endpoint
            .join(method)
            .map_err(|e| TransportError::Http(e.to_string()))
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, TransportError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.client.post(self.method_url(method)?).json(params);
        self.execute(request).await
    }

    async fn call_multipart<R>(&self, method: &str, form: Form) -> Result<R, TransportError>
    where
        R: DeserializeOwned,
    {
        let request = self.client.post(self.method_url(method)?).multipart(form);
        self.execute(request).await
    }

    async fn execute<R>(&self, request: RequestBuilder) -> Result<R, TransportError>
    where
        R: DeserializeOwned,
    {
        let response = request.send().await.map_err(request_error)?;

        // Failures still carry a JSON body with the error code and description
        let body: ApiResponse<R> = response.json().await.map_err(request_error)?;
        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                error_code,
                description,
                ..
            } => Err(classify(
                error_code.unwrap_or(0),
                description.as_deref().unwrap_or("missing result"),
            )),
        }
    }

    /// Fetch the contents of a file by id
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let file: File = self.call("getFile", &json!({"file_id": file_id})).await?;
        let path = file.file_path.ok_or_else(|| TransportError::Api {
            code: 0,
            description: format!("file {} is not downloadable", file.file_id),
        })?;
        let url = self
            .files
            .join(&path)
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(request_error)?
            .bytes()
            .await
            .map_err(request_error)?;
        Ok(bytes.to_vec())
    }

    /// `copyMessage` cannot change a thumbnail. Forward the source to learn
    ///  its file id, send that file again with the thumbnail uploaded next to
    ///  it, then drop the forwarded message.
    ///
    /// Returns `None` for content that takes no thumbnail.
    async fn copy_with_thumbnail(
        &self,
        to: ChatId,
        from: ChatId,
        pointer: ContentPointer,
        thumbnail: &str,
    ) -> Result<Option<ContentPointer>, TransportError> {
        let forwarded: Message = self
            .call(
                "forwardMessage",
                &json!({
                    "chat_id": to,
                    "from_chat_id": from,
                    "message_id": pointer.0,
                    "disable_notification": true,
                }),
            )
            .await?;

        let resent = match forwarded.resend() {
            Some(resend) => self
                .send_with_thumbnail(to, &resend, forwarded.caption.as_deref(), thumbnail)
                .await
                .map(Some),
            None => Ok(None),
        };
        if let Err(e) = self.delete_message(to, forwarded.message_id).await {
            tracing::warn!(to, message_id = forwarded.message_id, error = %e, "failed to remove forwarded source");
        }
        resent
    }

    async fn send_with_thumbnail(
        &self,
        to: ChatId,
        resend: &Resend,
        caption: Option<&str>,
        thumbnail: &str,
    ) -> Result<ContentPointer, TransportError> {
        let image = self.download(thumbnail).await?;
        let part = Part::bytes(image)
            .file_name("thumbnail.jpg")
            .mime_str("image/jpeg")
            .map_err(request_error)?;
        let mut form = Form::new()
            .text("chat_id", to.to_string())
            .text(resend.field, resend.file_id.clone())
            .text("thumbnail", format!("attach://{}", THUMBNAIL_PART))
            .part(THUMBNAIL_PART, part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }
        let sent: Message = self.call_multipart(resend.method, form).await?;
        Ok(ContentPointer(sent.message_id))
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TransportError> {
        let mut params = json!({
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            params["offset"] = json!(offset);
        }
        self.call("getUpdates", &params).await
    }

    pub async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, TransportError> {
        let mut params = json!({
            "chat_id": chat,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(markup) = markup {
            params["reply_markup"] = json!(markup);
        }
        self.call("sendMessage", &params).await
    }

    pub async fn edit_message_text(
        &self,
        chat: ChatId,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TransportError> {
        let mut params = json!({
            "chat_id": chat,
            "message_id": message_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(markup) = markup {
            params["reply_markup"] = json!(markup);
        }
        // Returns the edited message, or `true` for inline messages
        let _: serde_json::Value = self.call("editMessageText", &params).await?;
        Ok(())
    }

    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), TransportError> {
        let mut params = json!({
            "callback_query_id": callback_id,
            "show_alert": show_alert,
        });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &params).await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat: ChatId, message_id: i64) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({"chat_id": chat, "message_id": message_id}),
            )
            .await?;
        Ok(())
    }

    /// Take away a member's right to post in a group
    pub async fn restrict_chat_member(&self, chat: ChatId, user: UserId) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "restrictChatMember",
                &json!({
                    "chat_id": chat,
                    "user_id": user,
                    "permissions": {"can_send_messages": false},
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for BotClient {
    async fn identity(&self) -> Result<BotIdentity, TransportError> {
        let me: User = self.call("getMe", &json!({})).await?;
        let username = me.username.ok_or_else(|| TransportError::Api {
            code: 0,
            description: "bot account has no username".to_string(),
        })?;
        Ok(BotIdentity {
            id: me.id,
            username,
        })
    }

    async fn group_info(&self, group: &GroupHandle) -> Result<GroupInfo, TransportError> {
        let chat: Chat = self
            .call("getChat", &json!({"chat_id": group.mention()}))
            .await?;
        Ok(GroupInfo {
            id: chat.id,
            kind: GroupKind::parse(&chat.kind),
            title: chat.title,
        })
    }

    async fn member_status(
        &self,
        group: &GroupHandle,
        user: UserId,
    ) -> Result<MemberStatus, TransportError> {
        let member: ChatMember = self
            .call(
                "getChatMember",
                &json!({"chat_id": group.mention(), "user_id": user}),
            )
            .await?;
        member.member_status().ok_or_else(|| TransportError::Api {
            code: 0,
            description: format!("unknown member status: {}", member.status),
        })
    }

    async fn copy(
        &self,
        to: ChatId,
        from: ChatId,
        pointer: ContentPointer,
        options: &CopyOptions,
    ) -> Result<ContentPointer, TransportError> {
        if let Some(thumbnail) = &options.thumbnail {
            match self.copy_with_thumbnail(to, from, pointer, thumbnail).await {
                Ok(Some(copied)) => return Ok(copied),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(to, %pointer, error = %e, "thumbnail not applied, copying as is")
                }
            }
        }
        let copied: MessageId = self
            .call(
                "copyMessage",
                &json!({
                    "chat_id": to,
                    "from_chat_id": from,
                    "message_id": pointer.0,
                }),
            )
            .await?;
        Ok(ContentPointer(copied.message_id))
    }

    async fn delete(&self, chat: ChatId, pointers: &[ContentPointer]) -> Result<(), TransportError> {
        if pointers.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = pointers.iter().map(|p| p.0).collect();
        let _: bool = self
            .call(
                "deleteMessages",
                &json!({"chat_id": chat, "message_ids": ids}),
            )
            .await?;
        Ok(())
    }

    async fn send_text(&self, to: ChatId, text: &str) -> Result<ContentPointer, TransportError> {
        let sent = self.send_message(to, text, None).await?;
        Ok(ContentPointer(sent.message_id))
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(err.to_string())
    }
}

/// Map a Bot API failure onto the transport error taxonomy
pub fn classify(code: i64, description: &str) -> TransportError {
    let lowered = description.to_ascii_lowercase();
    if lowered.contains("message") && (lowered.contains("not found") || lowered.contains("can't be deleted")) {
        TransportError::NotFound
    } else if lowered.contains("user not found")
        || lowered.contains("participant_id_invalid")
        || lowered.contains("user_not_participant")
        || lowered.contains("member not found")
    {
        TransportError::NotParticipant
    } else if lowered.contains("chat not found") {
        TransportError::ChatNotFound
    } else if code == 403 {
        TransportError::Forbidden(description.to_string())
    } else {
        TransportError::Api {
            code,
            description: description.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            classify(400, "Bad Request: message to copy not found"),
            TransportError::NotFound
        );
        assert_eq!(
            classify(400, "Bad Request: message can't be deleted"),
            TransportError::NotFound
        );
        assert_eq!(
            classify(400, "Bad Request: PARTICIPANT_ID_INVALID"),
            TransportError::NotParticipant
        );
        assert_eq!(
            classify(400, "Bad Request: chat not found"),
            TransportError::ChatNotFound
        );
        assert!(matches!(
            classify(403, "Forbidden: bot was blocked by the user"),
            TransportError::Forbidden(_)
        ));
        assert_eq!(
            classify(429, "Too Many Requests: retry after 5"),
            TransportError::Api {
                code: 429,
                description: "Too Many Requests: retry after 5".into()
            }
        );
    }

    #[test]
    fn test_restricted_non_member_counts_as_left() {
        let member = |raw: &str| serde_json::from_str::<ChatMember>(raw).unwrap().member_status();
        assert_eq!(
            member(r#"{"status":"restricted","is_member":false}"#),
            Some(MemberStatus::Left)
        );
        assert_eq!(
            member(r#"{"status":"restricted","is_member":true}"#),
            Some(MemberStatus::Restricted)
        );
        assert_eq!(member(r#"{"status":"member"}"#), Some(MemberStatus::Member));
        assert_eq!(member(r#"{"status":"kicked"}"#), Some(MemberStatus::Kicked));
        assert_eq!(member(r#"{"status":"lurker"}"#), None);
        assert!(!member(r#"{"status":"restricted","is_member":false}"#)
            .unwrap()
            .is_member());
    }

    #[test]
    fn test_endpoint_layout() {
        let base = Url::parse("https://api.example.org/").unwrap();
        let client = BotClient::new(&base, "123:abc", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint.join("getMe").unwrap().as_str(),
            "https://api.example.org/bot123:abc/getMe"
        );
    }
}
