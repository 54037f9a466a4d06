use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::{ChatId, ContentPointer, GroupHandle, UserId};
use crate::transport::{
    BotIdentity, CopyOptions, GroupInfo, GroupKind, MemberStatus, Transport, TransportError,
};

pub const BOT_ID: UserId = 1000;
pub const BOT_USERNAME: &str = "filelink_test_bot";

/// A recorded `copy` call that succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    pub to: ChatId,
    pub from: ChatId,
    pub source: ContentPointer,
    pub copy: ContentPointer,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    next_message: i64,
    groups: HashMap<GroupHandle, GroupInfo>,
    members: HashMap<(GroupHandle, UserId), MemberStatus>,
    failing_groups: HashSet<GroupHandle>,
    failing_pointers: HashSet<ContentPointer>,
    failing_recipients: HashSet<ChatId>,
    gone_on_delete: HashSet<ContentPointer>,
    failing_deletes: bool,
    copies: Vec<CopyRecord>,
    deletes: Vec<(ChatId, Vec<ContentPointer>)>,
    sent: Vec<(ChatId, String)>,
}

/// In-process transport with per-group, per-pointer and per-recipient
///  fault injection. Every successful call is recorded for assertions.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Mutex<MockTransportInner>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.inner.lock().next_message = 10_000;
        transport
    }

    /// Register a group the transport can resolve
    pub fn with_group(self, handle: &str, kind: GroupKind) -> Self {
        let handle = handle_of(handle);
        let mut inner = self.inner.lock();
        let id = -(100 + inner.groups.len() as i64);
        inner.groups.insert(
            handle.clone(),
            GroupInfo {
                id,
                kind,
                title: Some(handle.as_str().to_string()),
            },
        );
        drop(inner);
        self
    }

    /// A public channel in which the bot is an administrator
    pub fn with_channel(self, handle: &str) -> Self {
        let transport = self.with_group(handle, GroupKind::Channel);
        transport.set_member(handle, BOT_ID, MemberStatus::Administrator);
        transport
    }

    pub fn set_member(&self, handle: &str, user: UserId, status: MemberStatus) {
        self.inner
            .lock()
            .members
            .insert((handle_of(handle), user), status);
    }

    /// Membership lookups in this group time out
    pub fn fail_group(&self, handle: &str) {
        self.inner.lock().failing_groups.insert(handle_of(handle));
    }

    /// Copies of this source pointer fail
    pub fn fail_pointer(&self, pointer: ContentPointer) {
        self.inner.lock().failing_pointers.insert(pointer);
    }

    /// Every copy or message to this chat fails
    pub fn fail_recipient(&self, chat: ChatId) {
        self.inner.lock().failing_recipients.insert(chat);
    }

    /// Deleting this pointer reports the message as already absent
    pub fn gone_on_delete(&self, pointer: ContentPointer) {
        self.inner.lock().gone_on_delete.insert(pointer);
    }

    /// Every delete times out
    pub fn fail_deletes(&self, fail: bool) {
        self.inner.lock().failing_deletes = fail;
    }

    /// Delay each copy and send, so concurrent callers overlap
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn copies(&self) -> Vec<CopyRecord> {
        self.inner.lock().copies.clone()
    }

    pub fn copies_to(&self, chat: ChatId) -> Vec<CopyRecord> {
        self.inner
            .lock()
            .copies
            .iter()
            .filter(|c| c.to == chat)
            .cloned()
            .collect()
    }

    pub fn deletes(&self) -> Vec<(ChatId, Vec<ContentPointer>)> {
        self.inner.lock().deletes.clone()
    }

    /// Every pointer deleted from `chat`, in call order
    pub fn deleted_from(&self, chat: ChatId) -> Vec<ContentPointer> {
        self.inner
            .lock()
            .deletes
            .iter()
            .filter(|(c, _)| *c == chat)
            .flat_map(|(_, pointers)| pointers.clone())
            .collect()
    }

    pub fn sent_to(&self, chat: ChatId) -> Vec<String> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|(c, _)| *c == chat)
            .map(|(_, text)| text.clone())
            .collect()
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn handle_of(raw: &str) -> GroupHandle {
    GroupHandle::parse(raw).expect("valid group handle")
}

#[async_trait]
impl Transport for MockTransport {
    async fn identity(&self) -> Result<BotIdentity, TransportError> {
        Ok(BotIdentity {
            id: BOT_ID,
            username: BOT_USERNAME.to_string(),
        })
    }

    async fn group_info(&self, group: &GroupHandle) -> Result<GroupInfo, TransportError> {
        let inner = self.inner.lock();
        if inner.failing_groups.contains(group) {
            return Err(TransportError::Timeout);
        }
        inner
            .groups
            .get(group)
            .cloned()
            .ok_or(TransportError::ChatNotFound)
    }

    async fn member_status(
        &self,
        group: &GroupHandle,
        user: UserId,
    ) -> Result<MemberStatus, TransportError> {
        let inner = self.inner.lock();
        if inner.failing_groups.contains(group) {
            return Err(TransportError::Timeout);
        }
        if !inner.groups.contains_key(group) {
            return Err(TransportError::ChatNotFound);
        }
        inner
            .members
            .get(&(group.clone(), user))
            .copied()
            .ok_or(TransportError::NotParticipant)
    }

    async fn copy(
        &self,
        to: ChatId,
        from: ChatId,
        pointer: ContentPointer,
        options: &CopyOptions,
    ) -> Result<ContentPointer, TransportError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        if inner.failing_recipients.contains(&to) {
            return Err(TransportError::Forbidden("bot was blocked by the user".into()));
        }
        if inner.failing_pointers.contains(&pointer) {
            return Err(TransportError::Api {
                code: 400,
                description: "Bad Request: MESSAGE_ID_INVALID".into(),
            });
        }
        inner.next_message += 1;
        let copy = ContentPointer(inner.next_message);
        inner.copies.push(CopyRecord {
            to,
            from,
            source: pointer,
            copy,
            thumbnail: options.thumbnail.clone(),
        });
        Ok(copy)
    }

    async fn delete(&self, chat: ChatId, pointers: &[ContentPointer]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.failing_deletes {
            return Err(TransportError::Timeout);
        }
        inner.deletes.push((chat, pointers.to_vec()));
        if pointers.iter().any(|p| inner.gone_on_delete.contains(p)) {
            return Err(TransportError::NotFound);
        }
        Ok(())
    }

    async fn send_text(&self, to: ChatId, text: &str) -> Result<ContentPointer, TransportError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        if inner.failing_recipients.contains(&to) {
            return Err(TransportError::Forbidden("bot was blocked by the user".into()));
        }
        inner.next_message += 1;
        inner.sent.push((to, text.to_string()));
        Ok(ContentPointer(inner.next_message))
    }
}
