//! Shared harness for engine integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::engine::{Engine, EngineConfig, Requester, Submission};
use common::ids::ReferenceId;
use common::model::{
    BundleReference, ChatId, ContentKind, ContentPointer, GroupHandle, OperatingMode, Reference,
    Stats, UserId,
};
use common::session::UploadSession;
use common::store::{LinkStore, MemoryLinkStore, MemoryLinkStoreError, StoreError};
use common::testkit::MockTransport;

pub const ARCHIVE: ChatId = -1_000;
pub const OPERATOR: UserId = 1;

pub type TestEngine = Engine<MemoryLinkStore, MockTransport>;

/// Build an engine over an in-memory store, with `requirements` as the
///  global access requirements and `OPERATOR` as the only operator.
pub fn setup(transport: MockTransport, requirements: &[&str]) -> (TestEngine, Arc<MockTransport>) {
    setup_with_store(MemoryLinkStore::new(), transport, requirements)
}

/// Same as `setup`, over a caller-provided store
pub fn setup_with_store<S: LinkStore>(
    store: S,
    transport: MockTransport,
    requirements: &[&str],
) -> (Engine<S, MockTransport>, Arc<MockTransport>) {
    let transport = Arc::new(transport);
    let config = EngineConfig::new(ARCHIVE)
        .with_operators([OPERATOR])
        .with_requirements(requirements.iter().map(|g| handle(g)));
    let engine = Engine::new(store, transport.clone(), config);
    (engine, transport)
}

pub fn handle(raw: &str) -> GroupHandle {
    GroupHandle::parse(raw).unwrap()
}

pub fn user(id: UserId) -> Requester {
    Requester::new(id, Some(format!("user {}", id)))
}

pub fn document(pointer: i64) -> Submission {
    Submission {
        pointer: ContentPointer(pointer),
        kind: ContentKind::Document,
        size: Some(1024),
        default_name: format!("file_{}.pdf", pointer),
    }
}

pub fn photo(pointer: i64) -> Submission {
    Submission {
        pointer: ContentPointer(pointer),
        kind: ContentKind::Photo,
        size: None,
        default_name: format!("Photo_{}", pointer),
    }
}

/// Memory store whose next `conflicts` inserts fail with `StoreError::Conflict`,
///  as if another writer claimed the id between the existence check and the insert.
#[derive(Debug, Clone)]
pub struct ConflictingStore {
    inner: MemoryLinkStore,
    conflicts: Arc<AtomicUsize>,
    inserts: Arc<AtomicUsize>,
}

impl ConflictingStore {
    pub fn new(conflicts: usize) -> Self {
        Self {
            inner: MemoryLinkStore::new(),
            conflicts: Arc::new(AtomicUsize::new(conflicts)),
            inserts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Insert attempts seen so far, conflicting or not
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    fn conflict(&self, id: &ReferenceId) -> Result<(), StoreError<MemoryLinkStoreError>> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let claimed = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if claimed {
            Err(StoreError::Conflict(id.clone()))
        } else {
            Ok(())
        }
    }
}

type StoreResult<T> = Result<T, StoreError<MemoryLinkStoreError>>;

#[async_trait]
impl LinkStore for ConflictingStore {
    type Error = MemoryLinkStoreError;

    async fn id_exists(&self, id: &ReferenceId) -> StoreResult<bool> {
        self.inner.id_exists(id).await
    }

    async fn insert_reference(&self, reference: &Reference) -> StoreResult<()> {
        self.conflict(&reference.id)?;
        self.inner.insert_reference(reference).await
    }

    async fn insert_bundle(&self, bundle: &BundleReference) -> StoreResult<()> {
        self.conflict(&bundle.id)?;
        self.inner.insert_bundle(bundle).await
    }

    async fn reference(&self, id: &ReferenceId) -> StoreResult<Option<Reference>> {
        self.inner.reference(id).await
    }

    async fn bundle(&self, id: &ReferenceId) -> StoreResult<Option<BundleReference>> {
        self.inner.bundle(id).await
    }

    async fn delete_reference(&self, id: &ReferenceId) -> StoreResult<bool> {
        self.inner.delete_reference(id).await
    }

    async fn delete_bundle(&self, id: &ReferenceId) -> StoreResult<bool> {
        self.inner.delete_bundle(id).await
    }

    async fn recent_references(&self, owner: UserId, limit: usize) -> StoreResult<Vec<Reference>> {
        self.inner.recent_references(owner, limit).await
    }

    async fn recent_bundles(
        &self,
        owner: UserId,
        limit: usize,
    ) -> StoreResult<Vec<BundleReference>> {
        self.inner.recent_bundles(owner, limit).await
    }

    async fn session(&self, owner: UserId) -> StoreResult<Option<UploadSession>> {
        self.inner.session(owner).await
    }

    async fn put_session(&self, session: &UploadSession) -> StoreResult<()> {
        self.inner.put_session(session).await
    }

    async fn append_pending(
        &self,
        owner: UserId,
        pointer: ContentPointer,
    ) -> StoreResult<Option<usize>> {
        self.inner.append_pending(owner, pointer).await
    }

    async fn set_thumbnail(&self, owner: UserId, thumbnail: &str) -> StoreResult<()> {
        self.inner.set_thumbnail(owner, thumbnail).await
    }

    async fn clear_thumbnail(&self, owner: UserId) -> StoreResult<bool> {
        self.inner.clear_thumbnail(owner).await
    }

    async fn delete_session(&self, owner: UserId) -> StoreResult<()> {
        self.inner.delete_session(owner).await
    }

    async fn touch_user(
        &self,
        id: UserId,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner.touch_user(id, display_name, at).await
    }

    async fn remove_user(&self, id: UserId) -> StoreResult<()> {
        self.inner.remove_user(id).await
    }

    async fn user_ids(&self) -> StoreResult<Vec<UserId>> {
        self.inner.user_ids().await
    }

    async fn mode(&self) -> StoreResult<Option<OperatingMode>> {
        self.inner.mode().await
    }

    async fn set_mode(&self, mode: OperatingMode) -> StoreResult<()> {
        self.inner.set_mode(mode).await
    }

    async fn add_warning(&self, chat: ChatId, user: UserId) -> StoreResult<u32> {
        self.inner.add_warning(chat, user).await
    }

    async fn reset_warnings(&self, chat: ChatId, user: UserId) -> StoreResult<()> {
        self.inner.reset_warnings(chat, user).await
    }

    async fn stats(&self, since: DateTime<Utc>) -> StoreResult<Stats> {
        self.inner.stats(since).await
    }
}
