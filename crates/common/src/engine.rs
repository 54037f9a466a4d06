//! The reference-issuance and access-gating engine.
//!
//! `Engine` composes the store, the transport and the policy components
//! (gate, mode controller, expiry scheduler) behind the operations the
//! command surface needs. It owns no I/O of its own beyond what its two
//! collaborators provide, so the same engine runs against the SQLite store
//! and the Bot-API transport in the daemon and against in-memory doubles in
//! tests.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OnceCell;

use crate::broadcast::{self, BroadcastPayload, BroadcastReport};
use crate::deletion::{self, DeletePrompt, Deleted, DELETE_CHUNK, DELETE_PAUSE};
use crate::delivery::{self, ExpiryScheduler, RETENTION};
use crate::error::{Denial, EngineError};
use crate::gate::AccessGate;
use crate::ids::{self, ReferenceId};
use crate::mode::ModeController;
use crate::model::{
    BundleReference, ChatId, ContentKind, ContentPointer, GroupHandle, ItemKind, OperatingMode,
    Reference, Stats, StoredItem, UserId,
};
use crate::session::UploadSession;
use crate::store::{LinkStore, StoreError};
use crate::tokens::ActionToken;
use crate::transport::{BotIdentity, CopyOptions, GroupKind, Transport};

/// Largest item accepted for sharing (2 GiB)
pub const MAX_ITEM_SIZE: u64 = 2 * 1024 * 1024 * 1024;
/// Pause between items when delivering a bundle to a requester
pub const BUNDLE_PACING: Duration = Duration::from_millis(500);
/// Pause between items when archiving a bundle
pub const ARCHIVE_PACING: Duration = Duration::from_millis(100);
pub const RECENT_LIMIT: usize = 5;
pub const DEFAULT_BROADCAST_CONCURRENCY: usize = 16;

const ACTIVE_WINDOW_HOURS: i64 = 24;
const INSERT_ATTEMPTS: usize = 2;

/// Immutable engine parameters, fixed at startup
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chat holding the archived copy of every shared item
    pub archive_chat: ChatId,
    pub operators: BTreeSet<UserId>,
    pub global_requirements: BTreeSet<GroupHandle>,
    pub retention: Duration,
    pub bundle_pacing: Duration,
    pub archive_pacing: Duration,
    pub delete_chunk: usize,
    pub delete_pause: Duration,
    pub broadcast_concurrency: usize,
    pub max_item_size: u64,
    pub recent_limit: usize,
}

impl EngineConfig {
    pub fn new(archive_chat: ChatId) -> Self {
        Self {
            archive_chat,
            operators: BTreeSet::new(),
            global_requirements: BTreeSet::new(),
            retention: RETENTION,
            bundle_pacing: BUNDLE_PACING,
            archive_pacing: ARCHIVE_PACING,
            delete_chunk: DELETE_CHUNK,
            delete_pause: DELETE_PAUSE,
            broadcast_concurrency: DEFAULT_BROADCAST_CONCURRENCY,
            max_item_size: MAX_ITEM_SIZE,
            recent_limit: RECENT_LIMIT,
        }
    }

    pub fn with_operators(mut self, operators: impl IntoIterator<Item = UserId>) -> Self {
        self.operators = operators.into_iter().collect();
        self
    }

    pub fn with_requirements(mut self, groups: impl IntoIterator<Item = GroupHandle>) -> Self {
        self.global_requirements = groups.into_iter().collect();
        self
    }
}

/// The user behind a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub display_name: Option<String>,
}

impl Requester {
    pub fn new(id: UserId, display_name: Option<String>) -> Self {
        Self { id, display_name }
    }

    fn label(&self) -> String {
        match &self.display_name {
            Some(name) => format!("{} ({})", name, self.id),
            None => self.id.to_string(),
        }
    }
}

/// A content item sent by an owner. The pointer addresses the message in
///  the owner's private chat, whose id equals the owner's user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub pointer: ContentPointer,
    pub kind: ContentKind,
    /// Declared size in bytes, when the transport reports one
    pub size: Option<u64>,
    /// Used when the owner did not supply a title
    pub default_name: String,
}

/// A freshly issued reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    pub id: ReferenceId,
    pub kind: ItemKind,
    pub display_name: String,
    pub link: String,
    pub requirement: Option<GroupHandle>,
    pub items: usize,
    /// Items that could not be archived and were left out
    pub failed: usize,
    pub thumbnail_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created(Issued),
    /// Added to the bundle being collected
    Appended { pending: usize },
}

/// Result of opening a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub id: ReferenceId,
    pub kind: ItemKind,
    pub display_name: String,
    pub delivered: usize,
    pub failed: usize,
    /// Delivered copies are removed after this long
    pub expires_after: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedItems {
    pub references: Vec<Reference>,
    pub bundles: Vec<BundleReference>,
}

pub struct Engine<S: LinkStore, T: Transport> {
    store: S,
    transport: Arc<T>,
    config: Arc<EngineConfig>,
    gate: AccessGate,
    modes: ModeController,
    expiry: ExpiryScheduler<T>,
    bot: Arc<OnceCell<BotIdentity>>,
}

impl<S: LinkStore, T: Transport> Clone for Engine<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
            gate: self.gate.clone(),
            modes: self.modes.clone(),
            expiry: self.expiry.clone(),
            bot: self.bot.clone(),
        }
    }
}

impl<S: LinkStore, T: Transport> std::fmt::Debug for Engine<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: LinkStore, T: Transport> Engine<S, T> {
    pub fn new(store: S, transport: Arc<T>, config: EngineConfig) -> Self {
        let gate = AccessGate::new(config.global_requirements.iter().cloned());
        let modes = ModeController::new(config.operators.iter().copied());
        let expiry = ExpiryScheduler::new(transport.clone(), config.retention);
        Self {
            store,
            transport,
            config: Arc::new(config),
            gate,
            modes,
            expiry,
            bot: Arc::new(OnceCell::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn expiry(&self) -> &ExpiryScheduler<T> {
        &self.expiry
    }

    pub fn is_operator(&self, user: UserId) -> bool {
        self.modes.is_operator(user)
    }

    pub fn global_requirements(&self) -> &BTreeSet<GroupHandle> {
        self.gate.global()
    }

    /// The bot's own identity, fetched once and cached
    pub async fn bot_identity(&self) -> Result<&BotIdentity, EngineError> {
        self.bot
            .get_or_try_init(|| async { self.transport.identity().await })
            .await
            .map_err(|e| EngineError::ExternalTransient(e.to_string()))
    }

    pub async fn share_link(&self, id: &ReferenceId) -> Result<String, EngineError> {
        Ok(self.bot_identity().await?.share_link(id))
    }

    /// Gate a request against the global requirements and record the
    ///  requester's activity once admitted.
    pub async fn admit(
        &self,
        requester: &Requester,
        target: Option<ReferenceId>,
    ) -> Result<(), EngineError> {
        self.admit_with(requester, None, target).await
    }

    async fn admit_with(
        &self,
        requester: &Requester,
        extra: Option<&GroupHandle>,
        target: Option<ReferenceId>,
    ) -> Result<(), EngineError> {
        self.gate
            .check(self.transport.as_ref(), requester.id, extra, target)
            .await
            .map_err(|prompt| EngineError::AccessDenied(Denial::Membership(prompt)))?;
        self.store
            .touch_user(requester.id, requester.display_name.as_deref(), Utc::now())
            .await?;
        Ok(())
    }

    /// Resolve `id`, gate it on the global requirements plus its own, and
    ///  deliver its content to the requester.
    #[tracing::instrument(skip(self, requester), fields(user = requester.id))]
    pub async fn open(
        &self,
        requester: &Requester,
        id: &ReferenceId,
    ) -> Result<Opened, EngineError> {
        let item = self.lookup(id, None).await?;
        self.admit_with(
            requester,
            item.as_ref().and_then(|i| i.requirement()),
            Some(id.clone()),
        )
        .await?;
        let item = item.ok_or(EngineError::NotFound)?;

        let pointers = item.pointers();
        let pacing = match item.kind() {
            ItemKind::Single => Duration::ZERO,
            ItemKind::Bundle => self.config.bundle_pacing,
        };
        let report = delivery::deliver(
            self.transport.as_ref(),
            requester.id,
            self.config.archive_chat,
            &pointers,
            &CopyOptions::default(),
            pacing,
        )
        .await;

        if report.delivered.is_empty() {
            return Err(EngineError::DeliveryFailure(format!(
                "none of the {} items could be delivered",
                pointers.len()
            )));
        }

        let delivered = report.delivered.len();
        self.expiry.schedule(id, requester.id, report.delivered);
        tracing::info!(delivered, failed = report.failed, "reference opened");

        Ok(Opened {
            id: id.clone(),
            kind: item.kind(),
            display_name: item.display_name().to_string(),
            delivered,
            failed: report.failed,
            expires_after: self.config.retention,
        })
    }

    /// Re-run a gate that previously blocked, completing the original
    ///  request when it carried a target.
    pub async fn retry(
        &self,
        requester: &Requester,
        target: Option<ReferenceId>,
    ) -> Result<Option<Opened>, EngineError> {
        match target {
            Some(id) => self.open(requester, &id).await.map(Some),
            None => self.admit(requester, None).await.map(|_| None),
        }
    }

    /// Start composing a single reference
    pub async fn begin_single(
        &self,
        owner: UserId,
        requirement: Option<GroupHandle>,
        title: Option<String>,
    ) -> Result<UploadSession, EngineError> {
        self.begin(owner, requirement, |owner, requirement, thumbnail| {
            let mut session = UploadSession::single(owner, requirement).with_thumbnail(thumbnail);
            session.display_name = title;
            session
        })
        .await
    }

    /// Start collecting a bundle
    pub async fn begin_bundle(
        &self,
        owner: UserId,
        requirement: Option<GroupHandle>,
        title: Option<String>,
    ) -> Result<UploadSession, EngineError> {
        self.begin(owner, requirement, |owner, requirement, thumbnail| {
            UploadSession::bundle(owner, requirement, title).with_thumbnail(thumbnail)
        })
        .await
    }

    async fn begin<F>(
        &self,
        owner: UserId,
        requirement: Option<GroupHandle>,
        build: F,
    ) -> Result<UploadSession, EngineError>
    where
        F: FnOnce(UserId, Option<GroupHandle>, Option<String>) -> UploadSession,
    {
        if let Some(group) = &requirement {
            self.validate_requirement(group).await?;
        }
        let thumbnail = self
            .store
            .session(owner)
            .await?
            .and_then(|previous| previous.thumbnail);
        let session = build(owner, requirement, thumbnail);
        self.store.put_session(&session).await?;
        tracing::debug!(owner, mode = session.mode.as_str(), "upload session started");
        Ok(session)
    }

    /// A requirement must name a channel in which the bot is present
    async fn validate_requirement(&self, group: &GroupHandle) -> Result<(), EngineError> {
        let info = self.transport.group_info(group).await.map_err(|e| {
            tracing::debug!(%group, error = %e, "requirement lookup failed");
            EngineError::InvalidRequirement(format!("{} could not be found", group))
        })?;
        if info.kind != GroupKind::Channel {
            return Err(EngineError::InvalidRequirement(format!(
                "{} is not a public channel",
                group
            )));
        }
        let bot = self.bot_identity().await?;
        match self.transport.member_status(group, bot.id).await {
            Ok(status) if status.is_member() => Ok(()),
            _ => Err(EngineError::InvalidRequirement(format!(
                "the bot is not a member of {}",
                group
            ))),
        }
    }

    /// Set the sticky thumbnail override
    pub async fn set_thumbnail(&self, owner: UserId, thumbnail: &str) -> Result<(), EngineError> {
        self.store.set_thumbnail(owner, thumbnail).await?;
        Ok(())
    }

    /// Clear the thumbnail override. Returns whether one was set.
    pub async fn cancel_thumbnail(&self, owner: UserId) -> Result<bool, EngineError> {
        let cleared = self.store.clear_thumbnail(owner).await?;
        if let Some(session) = self.store.session(owner).await? {
            if session.is_thumbnail_only() {
                self.store.delete_session(owner).await?;
            }
        }
        Ok(cleared)
    }

    /// Accept a content item: append it to the bundle being collected, or
    ///  archive it and issue a single reference.
    #[tracing::instrument(skip(self, requester, submission), fields(user = requester.id))]
    pub async fn submit(
        &self,
        requester: &Requester,
        submission: Submission,
    ) -> Result<SubmitOutcome, EngineError> {
        let owner = requester.id;
        self.modes.ensure_may_upload(&self.store, owner).await?;
        if submission.size.unwrap_or(0) > self.config.max_item_size {
            return Err(EngineError::ResourceLimitExceeded {
                limit: self.config.max_item_size,
            });
        }

        let session = self.store.session(owner).await?;
        if session.as_ref().is_some_and(UploadSession::is_collecting) {
            let pending = self
                .store
                .append_pending(owner, submission.pointer)
                .await?
                .ok_or(EngineError::NotCollecting)?;
            tracing::debug!(pending, "item added to bundle");
            return Ok(SubmitOutcome::Appended { pending });
        }

        let session = session.unwrap_or_else(|| UploadSession::single(owner, None));
        let thumbnail = session
            .thumbnail
            .clone()
            .filter(|_| submission.kind.accepts_thumbnail());
        let thumbnail_applied = thumbnail.is_some();

        let archived = self
            .transport
            .copy(
                self.config.archive_chat,
                owner,
                submission.pointer,
                &CopyOptions { thumbnail },
            )
            .await
            .map_err(|e| EngineError::DeliveryFailure(e.to_string()))?;

        let display_name = session
            .display_name
            .clone()
            .unwrap_or(submission.default_name);
        let record = StoredItem::Single(Reference {
            id: ReferenceId::random(),
            owner,
            pointer: archived,
            display_name,
            kind: submission.kind,
            requirement: session.requirement.clone(),
            created_at: Utc::now(),
        });
        let stored = match self.insert_fresh(record).await {
            Ok(stored) => stored,
            Err(e) => {
                self.discard_archived(&[archived]).await;
                return Err(e);
            }
        };
        self.store.delete_session(owner).await?;

        let issued = self.issued(&stored, 1, 0, thumbnail_applied).await?;
        self.log_activity(&format!(
            "New single file link\n• User: {}\n• File: {}\n• Link: {}",
            requester.label(),
            issued.display_name,
            issued.link
        ))
        .await;
        Ok(SubmitOutcome::Created(issued))
    }

    /// Archive the collected items and issue a bundle reference
    #[tracing::instrument(skip(self, requester), fields(user = requester.id))]
    pub async fn finalize(&self, requester: &Requester) -> Result<Issued, EngineError> {
        let owner = requester.id;
        self.modes.ensure_may_upload(&self.store, owner).await?;

        let session = self
            .store
            .session(owner)
            .await?
            .filter(UploadSession::is_collecting)
            .ok_or(EngineError::NotCollecting)?;
        if session.pending.is_empty() {
            return Err(EngineError::EmptyBundle);
        }

        let thumbnail_applied = session.thumbnail.is_some();
        let report = delivery::deliver(
            self.transport.as_ref(),
            self.config.archive_chat,
            owner,
            &session.pending,
            &CopyOptions {
                thumbnail: session.thumbnail.clone(),
            },
            self.config.archive_pacing,
        )
        .await;

        if report.delivered.is_empty() {
            return Err(EngineError::DeliveryFailure(format!(
                "none of the {} items could be archived",
                session.pending.len()
            )));
        }

        let items = report.delivered.len();
        let display_name = session
            .display_name
            .clone()
            .unwrap_or_else(|| format!("Bundle of {} Files", items));
        let record = StoredItem::Bundle(BundleReference {
            id: ReferenceId::random(),
            owner,
            pointers: report.delivered.clone(),
            display_name,
            requirement: session.requirement.clone(),
            created_at: Utc::now(),
        });
        let stored = match self.insert_fresh(record).await {
            Ok(stored) => stored,
            Err(e) => {
                self.discard_archived(&report.delivered).await;
                return Err(e);
            }
        };
        self.store.delete_session(owner).await?;

        let issued = self
            .issued(&stored, items, report.failed, thumbnail_applied)
            .await?;
        self.log_activity(&format!(
            "New multi-file link\n• User: {}\n• Bundle: {} ({} files)\n• Link: {}",
            requester.label(),
            issued.display_name,
            items,
            issued.link
        ))
        .await;
        Ok(issued)
    }

    /// The owner's most recent references and bundles, newest first
    pub async fn my_files(&self, owner: UserId) -> Result<OwnedItems, EngineError> {
        let limit = self.config.recent_limit;
        Ok(OwnedItems {
            references: self.store.recent_references(owner, limit).await?,
            bundles: self.store.recent_bundles(owner, limit).await?,
        })
    }

    /// First step of deleting: resolve an id or share link owned by `owner`
    pub async fn request_delete(&self, owner: UserId, raw: &str) -> Result<DeletePrompt, EngineError> {
        let id = ReferenceId::extract(raw).ok_or(EngineError::NotFound)?;
        let item = self.lookup(&id, None).await?;
        let item = item
            .filter(|i| i.owner() == owner)
            .ok_or(EngineError::NotFound)?;
        Ok(DeletePrompt {
            display_name: item.display_name().to_string(),
            kind: item.kind(),
            items: item.pointers().len(),
            confirm: ActionToken::ConfirmDelete {
                id,
                kind: item.kind(),
            },
            cancel: ActionToken::CancelDelete,
        })
    }

    /// Second step of deleting: remove the archived content, flush pending
    ///  expiries and drop the record.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_delete(
        &self,
        owner: UserId,
        id: &ReferenceId,
        kind: ItemKind,
    ) -> Result<Deleted, EngineError> {
        let item = self
            .lookup(id, Some(kind))
            .await?
            .filter(|i| i.owner() == owner)
            .ok_or(EngineError::NotFound)?;

        let content_already_gone = deletion::delete_chunked(
            self.transport.as_ref(),
            self.config.archive_chat,
            &item.pointers(),
            self.config.delete_chunk,
            self.config.delete_pause,
        )
        .await
        .map_err(|e| {
            tracing::warn!(%id, error = %e, "failed to remove archived content");
            EngineError::ExternalTransient(e.to_string())
        })?;

        self.expiry.flush(id).await;
        let removed = match kind {
            ItemKind::Single => self.store.delete_reference(id).await?,
            ItemKind::Bundle => self.store.delete_bundle(id).await?,
        };
        if !removed {
            return Err(EngineError::NotFound);
        }

        tracing::info!(%id, kind = kind.label(), "reference deleted");
        self.log_activity(&format!(
            "Item deleted\n• User: {}\n• Type: {}\n• ID: {}",
            owner,
            kind.label(),
            id
        ))
        .await;
        Ok(Deleted {
            display_name: item.display_name().to_string(),
            kind,
            content_already_gone,
        })
    }

    /// Operator-only bounded fanout to every known user
    pub async fn broadcast(
        &self,
        operator: UserId,
        payload: BroadcastPayload,
    ) -> Result<BroadcastReport, EngineError> {
        self.ensure_operator(operator)?;
        broadcast::fanout(
            &self.store,
            self.transport.clone(),
            payload,
            operator,
            self.config.broadcast_concurrency,
        )
        .await
    }

    /// Operator-only dashboard counters over the last 24 hours
    pub async fn stats(&self, operator: UserId) -> Result<Stats, EngineError> {
        self.ensure_operator(operator)?;
        Ok(self.store.stats(Utc::now() - chrono::Duration::hours(ACTIVE_WINDOW_HOURS)).await?)
    }

    pub async fn mode(&self) -> Result<OperatingMode, EngineError> {
        self.modes.get_mode(&self.store).await
    }

    pub async fn set_mode(&self, actor: UserId, mode: OperatingMode) -> Result<(), EngineError> {
        self.modes.set_mode(&self.store, actor, mode).await
    }

    pub fn ensure_operator(&self, user: UserId) -> Result<(), EngineError> {
        if self.is_operator(user) {
            Ok(())
        } else {
            Err(EngineError::AccessDenied(Denial::NotOperator))
        }
    }

    /// Find `id` in the requested namespace, or in both
    async fn lookup(
        &self,
        id: &ReferenceId,
        kind: Option<ItemKind>,
    ) -> Result<Option<StoredItem>, EngineError> {
        if kind != Some(ItemKind::Bundle) {
            if let Some(reference) = self.store.reference(id).await? {
                return Ok(Some(StoredItem::Single(reference)));
            }
        }
        if kind != Some(ItemKind::Single) {
            if let Some(bundle) = self.store.bundle(id).await? {
                return Ok(Some(StoredItem::Bundle(bundle)));
            }
        }
        Ok(None)
    }

    /// Insert under a freshly generated id. A conflict between generation
    ///  and insert is retried once with a new id.
    async fn insert_fresh(&self, mut item: StoredItem) -> Result<StoredItem, EngineError> {
        for _ in 0..INSERT_ATTEMPTS {
            let id = ids::generate(&self.store).await?;
            let result = match &mut item {
                StoredItem::Single(reference) => {
                    reference.id = id;
                    self.store.insert_reference(reference).await
                }
                StoredItem::Bundle(bundle) => {
                    bundle.id = id;
                    self.store.insert_bundle(bundle).await
                }
            };
            match result {
                Ok(()) => return Ok(item),
                Err(StoreError::Conflict(id)) => {
                    tracing::warn!(%id, "reference id claimed between check and insert")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::GenerationExhausted)
    }

    async fn issued(
        &self,
        stored: &StoredItem,
        items: usize,
        failed: usize,
        thumbnail_applied: bool,
    ) -> Result<Issued, EngineError> {
        Ok(Issued {
            id: stored.id().clone(),
            kind: stored.kind(),
            display_name: stored.display_name().to_string(),
            link: self.share_link(stored.id()).await?,
            requirement: stored.requirement().cloned(),
            items,
            failed,
            thumbnail_applied,
        })
    }

    /// Best-effort removal of archived copies that never got a record
    async fn discard_archived(&self, pointers: &[ContentPointer]) {
        if let Err(e) = self
            .transport
            .delete(self.config.archive_chat, pointers)
            .await
        {
            tracing::warn!(error = %e, "failed to discard orphaned archive copies");
        }
    }

    /// Post a notice to the archive chat; failures are only logged
    async fn log_activity(&self, text: &str) {
        if let Err(e) = self
            .transport
            .send_text(self.config.archive_chat, text)
            .await
        {
            tracing::warn!(error = %e, "failed to post activity notice");
        }
    }
}
