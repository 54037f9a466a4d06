use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::provider::{LinkStore, StoreError};
use crate::ids::ReferenceId;
use crate::model::{
    BundleReference, ChatId, ContentKind, ContentPointer, OperatingMode, Reference, Stats, User,
    UserId,
};
use crate::session::{SessionMode, UploadSession};

/// In-memory link store using HashMaps
#[derive(Debug, Clone)]
pub struct MemoryLinkStore {
    inner: Arc<RwLock<MemoryLinkStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryLinkStoreInner {
    /// Insertion counter, breaks ties between records created in the same instant
    seq: u64,
    references: HashMap<ReferenceId, (u64, Reference)>,
    bundles: HashMap<ReferenceId, (u64, BundleReference)>,
    sessions: HashMap<UserId, UploadSession>,
    users: HashMap<UserId, User>,
    mode: Option<OperatingMode>,
    warnings: HashMap<(ChatId, UserId), u32>,
}

impl MemoryLinkStoreInner {
    fn id_taken(&self, id: &ReferenceId) -> bool {
        self.references.contains_key(id) || self.bundles.contains_key(id)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryLinkStoreError {
    #[error("memory store error: {0}")]
    Internal(String),
}

type Result<T> = std::result::Result<T, StoreError<MemoryLinkStoreError>>;

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryLinkStoreInner::default())),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryLinkStoreInner>> {
        self.inner.read().map_err(|e| {
            StoreError::Provider(MemoryLinkStoreError::Internal(format!(
                "failed to acquire read lock: {}",
                e
            )))
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryLinkStoreInner>> {
        self.inner.write().map_err(|e| {
            StoreError::Provider(MemoryLinkStoreError::Internal(format!(
                "failed to acquire write lock: {}",
                e
            )))
        })
    }
}

impl Default for MemoryLinkStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest first, later insertions winning ties
fn newest<T: Clone>(
    items: impl Iterator<Item = (u64, DateTime<Utc>, T)>,
    limit: usize,
) -> Vec<T> {
    let mut items: Vec<_> = items.collect();
    items.sort_by(|a, b| (b.1, b.0).cmp(&(a.1, a.0)));
    items.into_iter().take(limit).map(|(_, _, t)| t).collect()
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    type Error = MemoryLinkStoreError;

    async fn id_exists(&self, id: &ReferenceId) -> Result<bool> {
        Ok(self.read()?.id_taken(id))
    }

    async fn insert_reference(&self, reference: &Reference) -> Result<()> {
        let mut inner = self.write()?;
        if inner.id_taken(&reference.id) {
            return Err(StoreError::Conflict(reference.id.clone()));
        }
        let seq = inner.next_seq();
        inner
            .references
            .insert(reference.id.clone(), (seq, reference.clone()));
        Ok(())
    }

    async fn insert_bundle(&self, bundle: &BundleReference) -> Result<()> {
        let mut inner = self.write()?;
        if inner.id_taken(&bundle.id) {
            return Err(StoreError::Conflict(bundle.id.clone()));
        }
        let seq = inner.next_seq();
        inner.bundles.insert(bundle.id.clone(), (seq, bundle.clone()));
        Ok(())
    }

    async fn reference(&self, id: &ReferenceId) -> Result<Option<Reference>> {
        Ok(self.read()?.references.get(id).map(|(_, r)| r.clone()))
    }

    async fn bundle(&self, id: &ReferenceId) -> Result<Option<BundleReference>> {
        Ok(self.read()?.bundles.get(id).map(|(_, b)| b.clone()))
    }

    async fn delete_reference(&self, id: &ReferenceId) -> Result<bool> {
        Ok(self.write()?.references.remove(id).is_some())
    }

    async fn delete_bundle(&self, id: &ReferenceId) -> Result<bool> {
        Ok(self.write()?.bundles.remove(id).is_some())
    }

    async fn recent_references(&self, owner: UserId, limit: usize) -> Result<Vec<Reference>> {
        let inner = self.read()?;
        Ok(newest(
            inner
                .references
                .values()
                .filter(|(_, r)| r.owner == owner)
                .map(|(seq, r)| (*seq, r.created_at, r.clone())),
            limit,
        ))
    }

    async fn recent_bundles(&self, owner: UserId, limit: usize) -> Result<Vec<BundleReference>> {
        let inner = self.read()?;
        Ok(newest(
            inner
                .bundles
                .values()
                .filter(|(_, b)| b.owner == owner)
                .map(|(seq, b)| (*seq, b.created_at, b.clone())),
            limit,
        ))
    }

    async fn session(&self, owner: UserId) -> Result<Option<UploadSession>> {
        Ok(self.read()?.sessions.get(&owner).cloned())
    }

    async fn put_session(&self, session: &UploadSession) -> Result<()> {
        self.write()?
            .sessions
            .insert(session.owner, session.clone());
        Ok(())
    }

    async fn append_pending(&self, owner: UserId, pointer: ContentPointer) -> Result<Option<usize>> {
        let mut inner = self.write()?;
        match inner.sessions.get_mut(&owner) {
            Some(session) if session.mode == SessionMode::CollectingBundle => {
                session.pending.push(pointer);
                Ok(Some(session.pending.len()))
            }
            _ => Ok(None),
        }
    }

    async fn set_thumbnail(&self, owner: UserId, thumbnail: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .sessions
            .entry(owner)
            .or_insert_with(|| UploadSession::single(owner, None))
            .thumbnail = Some(thumbnail.to_string());
        Ok(())
    }

    async fn clear_thumbnail(&self, owner: UserId) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner
            .sessions
            .get_mut(&owner)
            .and_then(|session| session.thumbnail.take())
            .is_some())
    }

    async fn delete_session(&self, owner: UserId) -> Result<()> {
        self.write()?.sessions.remove(&owner);
        Ok(())
    }

    async fn touch_user(
        &self,
        id: UserId,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let user = inner.users.entry(id).or_insert_with(|| User {
            id,
            display_name: None,
            last_activity_at: at,
        });
        user.last_activity_at = at;
        if let Some(name) = display_name {
            user.display_name = Some(name.to_string());
        }
        Ok(())
    }

    async fn remove_user(&self, id: UserId) -> Result<()> {
        self.write()?.users.remove(&id);
        Ok(())
    }

    async fn user_ids(&self) -> Result<Vec<UserId>> {
        let mut ids: Vec<UserId> = self.read()?.users.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn mode(&self) -> Result<Option<OperatingMode>> {
        Ok(self.read()?.mode)
    }

    async fn set_mode(&self, mode: OperatingMode) -> Result<()> {
        self.write()?.mode = Some(mode);
        Ok(())
    }

    async fn add_warning(&self, chat: ChatId, user: UserId) -> Result<u32> {
        let mut inner = self.write()?;
        let count = inner.warnings.entry((chat, user)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn reset_warnings(&self, chat: ChatId, user: UserId) -> Result<()> {
        self.write()?.warnings.remove(&(chat, user));
        Ok(())
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<Stats> {
        let inner = self.read()?;

        let mut kinds: BTreeMap<ContentKind, u64> = BTreeMap::new();
        for (_, reference) in inner.references.values() {
            *kinds.entry(reference.kind).or_default() += 1;
        }

        Ok(Stats {
            users: inner.users.len() as u64,
            active_users: inner
                .users
                .values()
                .filter(|u| u.last_activity_at >= since)
                .count() as u64,
            references: inner.references.len() as u64,
            bundles: inner.bundles.len() as u64,
            recent_references: inner
                .references
                .values()
                .filter(|(_, r)| r.created_at >= since)
                .count() as u64,
            recent_bundles: inner
                .bundles
                .values()
                .filter(|(_, b)| b.created_at >= since)
                .count() as u64,
            kinds: kinds.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reference(id: &str, owner: UserId, at: DateTime<Utc>) -> Reference {
        Reference {
            id: id.parse().unwrap(),
            owner,
            pointer: ContentPointer(1),
            display_name: id.to_string(),
            kind: ContentKind::Document,
            requirement: None,
            created_at: at,
        }
    }

    fn bundle(id: &str, owner: UserId, at: DateTime<Utc>) -> BundleReference {
        BundleReference {
            id: id.parse().unwrap(),
            owner,
            pointers: vec![ContentPointer(1), ContentPointer(2)],
            display_name: id.to_string(),
            requirement: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_ids_shared_across_namespaces() {
        let store = MemoryLinkStore::new();
        let now = Utc::now();
        store.insert_reference(&reference("aaaa0001", 1, now)).await.unwrap();

        let result = store.insert_bundle(&bundle("aaaa0001", 1, now)).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let result = store.insert_reference(&reference("aaaa0001", 2, now)).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        store.insert_bundle(&bundle("bbbb0001", 1, now)).await.unwrap();
        assert!(store.id_exists(&"bbbb0001".parse().unwrap()).await.unwrap());
        assert!(!store.id_exists(&"cccc0001".parse().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_owner_scoped() {
        let store = MemoryLinkStore::new();
        let base = Utc::now();
        for i in 0..7 {
            store
                .insert_reference(&reference(
                    &format!("ref0000{}", i),
                    1,
                    base + Duration::seconds(i),
                ))
                .await
                .unwrap();
        }
        store.insert_reference(&reference("other001", 2, base)).await.unwrap();

        let recent = store.recent_references(1, 5).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(
            ids,
            vec!["ref00006", "ref00005", "ref00004", "ref00003", "ref00002"]
        );
        assert!(store.recent_bundles(1, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_requires_collecting_session() {
        let store = MemoryLinkStore::new();
        assert_eq!(store.append_pending(1, ContentPointer(9)).await.unwrap(), None);

        store.put_session(&UploadSession::single(1, None)).await.unwrap();
        assert_eq!(store.append_pending(1, ContentPointer(9)).await.unwrap(), None);

        store
            .put_session(&UploadSession::bundle(1, None, None))
            .await
            .unwrap();
        assert_eq!(store.append_pending(1, ContentPointer(9)).await.unwrap(), Some(1));
        assert_eq!(store.append_pending(1, ContentPointer(10)).await.unwrap(), Some(2));

        let session = store.session(1).await.unwrap().unwrap();
        assert_eq!(session.pending, vec![ContentPointer(9), ContentPointer(10)]);
    }

    #[tokio::test]
    async fn test_thumbnail_upsert_keeps_mode() {
        let store = MemoryLinkStore::new();
        store.set_thumbnail(3, "t1").await.unwrap();
        let session = store.session(3).await.unwrap().unwrap();
        assert_eq!(session.mode, SessionMode::AwaitingSingle);
        assert_eq!(session.thumbnail.as_deref(), Some("t1"));

        store
            .put_session(&UploadSession::bundle(3, None, None))
            .await
            .unwrap();
        store.set_thumbnail(3, "t2").await.unwrap();
        let session = store.session(3).await.unwrap().unwrap();
        assert_eq!(session.mode, SessionMode::CollectingBundle);
        assert_eq!(session.thumbnail.as_deref(), Some("t2"));

        assert!(store.clear_thumbnail(3).await.unwrap());
        assert!(!store.clear_thumbnail(3).await.unwrap());
        assert!(!store.clear_thumbnail(4).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_and_warnings() {
        let store = MemoryLinkStore::new();
        let now = Utc::now();
        let old = now - Duration::days(3);
        store.touch_user(1, Some("one"), now).await.unwrap();
        store.touch_user(2, None, old).await.unwrap();
        store.insert_reference(&reference("aaaa0001", 1, now)).await.unwrap();
        store.insert_reference(&reference("aaaa0002", 1, old)).await.unwrap();
        store.insert_bundle(&bundle("bbbb0001", 1, old)).await.unwrap();

        let stats = store.stats(now - Duration::hours(24)).await.unwrap();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.total_items(), 3);
        assert_eq!(stats.recent_uploads(), 1);
        assert_eq!(stats.kinds, vec![(ContentKind::Document, 2)]);

        assert_eq!(store.add_warning(10, 1).await.unwrap(), 1);
        assert_eq!(store.add_warning(10, 1).await.unwrap(), 2);
        assert_eq!(store.add_warning(11, 1).await.unwrap(), 1);
        store.reset_warnings(10, 1).await.unwrap();
        assert_eq!(store.add_warning(10, 1).await.unwrap(), 1);
    }
}
