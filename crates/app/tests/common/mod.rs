//! Shared harness for dispatcher integration tests
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use common::engine::{Engine, EngineConfig};
use common::ids::ReferenceId;
use common::jobs::{JobDispatcher, JobReceiver};
use common::model::{ChatId, GroupHandle, UserId};
use common::moderation::Moderator;
use common::store::MemoryLinkStore;
use common::testkit::MockTransport;
use filelink::bot::render::Reply;
use filelink::bot::{Dispatcher, Outbound};
use filelink::telegram::types::Update;

pub const ARCHIVE: ChatId = -1_000;
pub const OPERATOR: UserId = 1;
pub const GROUP: ChatId = -5_000;
pub const MODERATION_LOG: ChatId = -9_000;

pub type TestDispatcher = Dispatcher<MemoryLinkStore, MockTransport>;

pub struct Harness {
    pub dispatcher: TestDispatcher,
    pub transport: Arc<MockTransport>,
    pub jobs: JobReceiver,
    next_update: std::sync::atomic::AtomicI64,
}

/// Build a dispatcher over an in-memory store with `requirements` as the
///  global access requirements, `OPERATOR` as the only operator and a
///  moderator banning "spam" with two warnings.
pub fn setup(transport: MockTransport, requirements: &[&str]) -> Harness {
    let transport = Arc::new(transport);
    let config = EngineConfig::new(ARCHIVE)
        .with_operators([OPERATOR])
        .with_requirements(requirements.iter().map(|g| GroupHandle::parse(g).unwrap()));
    let engine = Engine::new(MemoryLinkStore::new(), transport.clone(), config);
    let moderator = Moderator::new(["spam".to_string()], 2);
    let (jobs, receiver) = JobDispatcher::new();
    Harness {
        dispatcher: Dispatcher::new(engine, moderator, jobs, Some(MODERATION_LOG)),
        transport,
        jobs: receiver,
        next_update: std::sync::atomic::AtomicI64::new(1),
    }
}

impl Harness {
    pub async fn handle(&self, update: Value) -> Vec<Outbound> {
        let update = self.update(update);
        self.dispatcher.handle(update).await
    }

    /// Number and parse an update
    pub fn update(&self, update: Value) -> Update {
        let id = self
            .next_update
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut update = update;
        update["update_id"] = json!(id);
        serde_json::from_value(update).unwrap()
    }
}

pub fn user(id: UserId) -> Value {
    json!({"id": id, "is_bot": false, "first_name": format!("user{}", id)})
}

pub fn private_chat(id: UserId) -> Value {
    json!({"id": id, "type": "private"})
}

pub fn text(from: UserId, message_id: i64, body: &str) -> Value {
    json!({
        "message": {
            "message_id": message_id,
            "from": user(from),
            "chat": private_chat(from),
            "text": body,
        }
    })
}

pub fn document(from: UserId, message_id: i64, name: &str) -> Value {
    json!({
        "message": {
            "message_id": message_id,
            "from": user(from),
            "chat": private_chat(from),
            "document": {"file_id": format!("doc{}", message_id), "file_name": name, "file_size": 2048},
        }
    })
}

pub fn group_text(from: UserId, message_id: i64, body: &str, entities: Value) -> Value {
    json!({
        "message": {
            "message_id": message_id,
            "from": user(from),
            "chat": {"id": GROUP, "type": "supergroup", "title": "Readers"},
            "text": body,
            "entities": entities,
        }
    })
}

/// A button press on message `message_id` in `from`'s private chat
pub fn callback(from: UserId, message_id: i64, data: &str) -> Value {
    json!({
        "callback_query": {
            "id": format!("cb{}", message_id),
            "from": user(from),
            "message": {
                "message_id": message_id,
                "chat": private_chat(from),
                "text": "menu",
            },
            "data": data,
        }
    })
}

/// The single reply sent by handling a private message
pub fn only_reply(outbound: Vec<Outbound>) -> Reply {
    match outbound.as_slice() {
        [Outbound::Send { reply, .. }] => reply.clone(),
        other => panic!("expected a single reply, got {:?}", other),
    }
}

/// The reference id behind the `Link:` line of an issued-link reply
pub fn issued_id(reply: &Reply) -> ReferenceId {
    let line = reply
        .text
        .lines()
        .find(|l| l.starts_with("Link: "))
        .expect("reply carries a link");
    ReferenceId::extract(line.trim_start_matches("Link: ")).expect("link carries an id")
}
