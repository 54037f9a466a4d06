use std::fmt::{Debug, Display};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ids::ReferenceId;
use crate::model::{BundleReference, ChatId, ContentPointer, OperatingMode, Reference, Stats, UserId};
use crate::session::UploadSession;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError<T> {
    #[error("unhandled link store provider error: {0}")]
    Provider(#[from] T),
    /// The id is already taken by a single reference or a bundle
    #[error("reference id already in use: {0}")]
    Conflict(ReferenceId),
}

/// Durable state behind the engine: references, bundles, upload sessions,
///  known users, settings and moderation counters.
///
/// Single references and bundles share one id namespace. Inserts must fail
///  with `StoreError::Conflict` if the id exists in either.
#[async_trait]
pub trait LinkStore: Send + Sync + Debug + Clone + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    /// Whether the id is taken by a single reference or a bundle
    async fn id_exists(&self, id: &ReferenceId) -> Result<bool, StoreError<Self::Error>>;

    async fn insert_reference(&self, reference: &Reference) -> Result<(), StoreError<Self::Error>>;

    async fn insert_bundle(&self, bundle: &BundleReference) -> Result<(), StoreError<Self::Error>>;

    async fn reference(&self, id: &ReferenceId)
        -> Result<Option<Reference>, StoreError<Self::Error>>;

    async fn bundle(
        &self,
        id: &ReferenceId,
    ) -> Result<Option<BundleReference>, StoreError<Self::Error>>;

    /// Returns whether a record was removed
    async fn delete_reference(&self, id: &ReferenceId) -> Result<bool, StoreError<Self::Error>>;

    /// Returns whether a record was removed
    async fn delete_bundle(&self, id: &ReferenceId) -> Result<bool, StoreError<Self::Error>>;

    /// Most recent single references owned by `owner`, newest first
    async fn recent_references(
        &self,
        owner: UserId,
        limit: usize,
    ) -> Result<Vec<Reference>, StoreError<Self::Error>>;

    /// Most recent bundles owned by `owner`, newest first
    async fn recent_bundles(
        &self,
        owner: UserId,
        limit: usize,
    ) -> Result<Vec<BundleReference>, StoreError<Self::Error>>;

    async fn session(&self, owner: UserId)
        -> Result<Option<UploadSession>, StoreError<Self::Error>>;

    /// Create or replace the owner's session
    async fn put_session(&self, session: &UploadSession) -> Result<(), StoreError<Self::Error>>;

    /// Append a pointer to the owner's bundle session.
    ///
    /// Returns the new pending count, or `None` if the owner is not
    ///  collecting a bundle.
    async fn append_pending(
        &self,
        owner: UserId,
        pointer: ContentPointer,
    ) -> Result<Option<usize>, StoreError<Self::Error>>;

    /// Set the thumbnail override, creating an `AwaitingSingle` session if
    ///  none exists and leaving the mode of an existing one untouched.
    async fn set_thumbnail(
        &self,
        owner: UserId,
        thumbnail: &str,
    ) -> Result<(), StoreError<Self::Error>>;

    /// Clear the thumbnail override. Returns whether one was set.
    async fn clear_thumbnail(&self, owner: UserId) -> Result<bool, StoreError<Self::Error>>;

    async fn delete_session(&self, owner: UserId) -> Result<(), StoreError<Self::Error>>;

    /// Record activity for a user, creating the record if needed
    async fn touch_user(
        &self,
        id: UserId,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError<Self::Error>>;

    async fn remove_user(&self, id: UserId) -> Result<(), StoreError<Self::Error>>;

    async fn user_ids(&self) -> Result<Vec<UserId>, StoreError<Self::Error>>;

    /// The persisted operating mode, if one was ever written
    async fn mode(&self) -> Result<Option<OperatingMode>, StoreError<Self::Error>>;

    async fn set_mode(&self, mode: OperatingMode) -> Result<(), StoreError<Self::Error>>;

    /// Increment and return the warning count of a member in a chat
    async fn add_warning(&self, chat: ChatId, user: UserId)
        -> Result<u32, StoreError<Self::Error>>;

    async fn reset_warnings(&self, chat: ChatId, user: UserId)
        -> Result<(), StoreError<Self::Error>>;

    /// Aggregate counters; "active" and "recent" mean at or after `since`
    async fn stats(&self, since: DateTime<Utc>) -> Result<Stats, StoreError<Self::Error>>;
}
