use serde::{Deserialize, Serialize};

use crate::model::{ContentPointer, GroupHandle, UserId};

/// What the next submission from an owner will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    AwaitingSingle,
    CollectingBundle,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::AwaitingSingle => "awaiting_single",
            SessionMode::CollectingBundle => "collecting_bundle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awaiting_single" => Some(SessionMode::AwaitingSingle),
            "collecting_bundle" => Some(SessionMode::CollectingBundle),
            _ => None,
        }
    }
}

/// Per-owner upload state. At most one exists per owner.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadSession {
    pub owner: UserId,
    pub mode: SessionMode,
    /// Owner-side message ids collected so far, in submission order.
    ///  Copied into the archive only when the bundle is finalized.
    pub pending: Vec<ContentPointer>,
    pub requirement: Option<GroupHandle>,
    pub display_name: Option<String>,
    /// Thumbnail override applied to later copies
    pub thumbnail: Option<String>,
}

impl UploadSession {
    pub fn single(owner: UserId, requirement: Option<GroupHandle>) -> Self {
        Self {
            owner,
            mode: SessionMode::AwaitingSingle,
            requirement,
            ..Default::default()
        }
    }

    pub fn bundle(
        owner: UserId,
        requirement: Option<GroupHandle>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            owner,
            mode: SessionMode::CollectingBundle,
            requirement,
            display_name,
            ..Default::default()
        }
    }

    /// Carry the thumbnail override of a session being replaced
    pub fn with_thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    pub fn is_collecting(&self) -> bool {
        self.mode == SessionMode::CollectingBundle
    }

    /// True when the session holds nothing besides a thumbnail override
    pub fn is_thumbnail_only(&self) -> bool {
        self.mode == SessionMode::AwaitingSingle
            && self.pending.is_empty()
            && self.requirement.is_none()
            && self.display_name.is_none()
    }
}
