//! Records the engine issues and stores.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ReferenceId;

/// Transport-level user identity
pub type UserId = i64;
/// Transport-level chat identity (users, groups and channels share this space)
pub type ChatId = i64;

/// Opaque handle to a content item held by the transport,
///  e.g. the message identity of an archived upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentPointer(pub i64);

impl fmt::Display for ContentPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public handle of an external group a requester must belong to.
///
/// Stored without the leading `@` and compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupHandle(String);

impl GroupHandle {
    /// Parse a handle, accepting an optional leading `@`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_start_matches('@').trim();
        let valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then(|| Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The form the transport expects when addressing the group
    pub fn mention(&self) -> String {
        format!("@{}", self.0)
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Document,
    Video,
    Photo,
    Audio,
    Unknown,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Document => "document",
            ContentKind::Video => "video",
            ContentKind::Photo => "photo",
            ContentKind::Audio => "audio",
            ContentKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "document" => ContentKind::Document,
            "video" => ContentKind::Video,
            "photo" => ContentKind::Photo,
            "audio" => ContentKind::Audio,
            _ => ContentKind::Unknown,
        }
    }

    /// Whether a thumbnail override can be attached when copying this kind
    pub fn accepts_thumbnail(&self) -> bool {
        matches!(
            self,
            ContentKind::Document | ContentKind::Video | ContentKind::Audio
        )
    }
}

/// A single shared content item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: ReferenceId,
    pub owner: UserId,
    /// Location of the archived copy
    pub pointer: ContentPointer,
    pub display_name: String,
    pub kind: ContentKind,
    pub requirement: Option<GroupHandle>,
    pub created_at: DateTime<Utc>,
}

/// An ordered set of shared content items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleReference {
    pub id: ReferenceId,
    pub owner: UserId,
    /// Archived copies, in submission order. Never empty once stored.
    pub pointers: Vec<ContentPointer>,
    pub display_name: String,
    pub requirement: Option<GroupHandle>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Single,
    Bundle,
}

impl ItemKind {
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Single => "File",
            ItemKind::Bundle => "Bundle",
        }
    }
}

/// Either kind of stored reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredItem {
    Single(Reference),
    Bundle(BundleReference),
}

impl StoredItem {
    pub fn id(&self) -> &ReferenceId {
        match self {
            StoredItem::Single(r) => &r.id,
            StoredItem::Bundle(b) => &b.id,
        }
    }

    pub fn owner(&self) -> UserId {
        match self {
            StoredItem::Single(r) => r.owner,
            StoredItem::Bundle(b) => b.owner,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            StoredItem::Single(_) => ItemKind::Single,
            StoredItem::Bundle(_) => ItemKind::Bundle,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            StoredItem::Single(r) => &r.display_name,
            StoredItem::Bundle(b) => &b.display_name,
        }
    }

    pub fn requirement(&self) -> Option<&GroupHandle> {
        match self {
            StoredItem::Single(r) => r.requirement.as_ref(),
            StoredItem::Bundle(b) => b.requirement.as_ref(),
        }
    }

    /// Archived pointers in delivery order
    pub fn pointers(&self) -> Vec<ContentPointer> {
        match self {
            StoredItem::Single(r) => vec![r.pointer],
            StoredItem::Bundle(b) => b.pointers.clone(),
        }
    }
}

/// Who may create new references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Public,
    Private,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Public => "public",
            OperatingMode::Private => "private",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operating mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for OperatingMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(OperatingMode::Public),
            "private" => Ok(OperatingMode::Private),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// A known recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

/// Aggregate counters for the operator dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub users: u64,
    pub active_users: u64,
    pub references: u64,
    pub bundles: u64,
    pub recent_references: u64,
    pub recent_bundles: u64,
    /// Single references grouped by content kind, sorted by kind
    pub kinds: Vec<(ContentKind, u64)>,
}

impl Stats {
    pub fn total_items(&self) -> u64 {
        self.references + self.bundles
    }

    pub fn recent_uploads(&self) -> u64 {
        self.recent_references + self.recent_bundles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_handle_parse() {
        assert_eq!(
            GroupHandle::parse("@MyChannel").unwrap().as_str(),
            "mychannel"
        );
        assert_eq!(GroupHandle::parse("my_channel").unwrap().mention(), "@my_channel");
        assert!(GroupHandle::parse("@").is_none());
        assert!(GroupHandle::parse("bad handle").is_none());
        assert_eq!(
            GroupHandle::parse("@Chan"),
            GroupHandle::parse("chan")
        );
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("PRIVATE".parse::<OperatingMode>().unwrap(), OperatingMode::Private);
        assert_eq!("public".parse::<OperatingMode>().unwrap(), OperatingMode::Public);
        assert!("secret".parse::<OperatingMode>().is_err());
        assert_eq!(OperatingMode::default(), OperatingMode::Public);
    }

    #[test]
    fn test_content_kind_roundtrip_and_thumbnail() {
        for kind in [
            ContentKind::Document,
            ContentKind::Video,
            ContentKind::Photo,
            ContentKind::Audio,
        ] {
            assert_eq!(ContentKind::parse(kind.as_str()), kind);
        }
        assert_eq!(ContentKind::parse("sticker"), ContentKind::Unknown);
        assert!(!ContentKind::Photo.accepts_thumbnail());
        assert!(ContentKind::Video.accepts_thumbnail());
    }
}
