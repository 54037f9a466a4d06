//! The seam between the engine and the messaging platform.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::model::{ChatId, ContentPointer, GroupHandle, UserId};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    /// The referenced message no longer exists
    #[error("message not found")]
    NotFound,
    /// The user is not a participant of the chat
    #[error("user is not a participant")]
    NotParticipant,
    #[error("chat not found")]
    ChatNotFound,
    /// The bot lacks permission, or the recipient blocked it
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("request timed out")]
    Timeout,
    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("http error: {0}")]
    Http(String),
}

impl TransportError {
    /// Returned by a delete when the content can no longer be removed by us:
    ///  already absent, or no longer reachable.
    pub fn is_content_gone(&self) -> bool {
        matches!(self, TransportError::NotFound | TransportError::Forbidden(_))
    }

    /// The target chat or membership does not exist, as opposed to a
    ///  failure to find out
    pub fn is_absence(&self) -> bool {
        matches!(
            self,
            TransportError::NotParticipant | TransportError::ChatNotFound
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creator" | "owner" => Some(MemberStatus::Creator),
            "administrator" => Some(MemberStatus::Administrator),
            "member" => Some(MemberStatus::Member),
            "restricted" => Some(MemberStatus::Restricted),
            "left" => Some(MemberStatus::Left),
            "kicked" | "banned" => Some(MemberStatus::Kicked),
            _ => None,
        }
    }

    /// Whether this status counts as belonging to the group. Transports
    ///  report a restricted user who left as `Left`.
    pub fn is_member(&self) -> bool {
        !matches!(self, MemberStatus::Left | MemberStatus::Kicked)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, MemberStatus::Creator | MemberStatus::Administrator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Channel,
    Supergroup,
    Group,
    Private,
}

impl GroupKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "channel" => GroupKind::Channel,
            "supergroup" => GroupKind::Supergroup,
            "group" => GroupKind::Group,
            _ => GroupKind::Private,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: ChatId,
    pub kind: GroupKind,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: UserId,
    pub username: String,
}

impl BotIdentity {
    /// Deep link that opens a reference
    pub fn share_link(&self, id: &impl std::fmt::Display) -> String {
        format!("https://t.me/{}?start={}", self.username, id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Thumbnail override for kinds that accept one
    pub thumbnail: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync + Debug + 'static {
    async fn identity(&self) -> Result<BotIdentity, TransportError>;

    async fn group_info(&self, group: &GroupHandle) -> Result<GroupInfo, TransportError>;

    async fn member_status(
        &self,
        group: &GroupHandle,
        user: UserId,
    ) -> Result<MemberStatus, TransportError>;

    /// Copy a message into `to`, returning the pointer of the new copy
    async fn copy(
        &self,
        to: ChatId,
        from: ChatId,
        pointer: ContentPointer,
        options: &CopyOptions,
    ) -> Result<ContentPointer, TransportError>;

    /// Delete messages from a chat
    async fn delete(&self, chat: ChatId, pointers: &[ContentPointer])
        -> Result<(), TransportError>;

    async fn send_text(&self, to: ChatId, text: &str) -> Result<ContentPointer, TransportError>;
}
