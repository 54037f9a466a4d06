//! Concurrent update handling across users

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ::common::model::ChatId;
use ::common::testkit::MockTransport;
use filelink::bot::render::Reply;
use filelink::bot::updates::{Effects, Lanes};
use filelink::bot::Outbound;

use self::common::{document, issued_id, only_reply, setup, text};

const OWNER: i64 = 42;
const READER: i64 = 77;
const NEWCOMER: i64 = 88;

#[derive(Default)]
struct Recorder {
    applied: Mutex<Vec<Outbound>>,
}

impl Recorder {
    fn replies_to(&self, chat: ChatId) -> Vec<Reply> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .filter_map(|effect| match effect {
                Outbound::Send { chat: to, reply } if *to == chat => Some(reply.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Effects for Recorder {
    async fn apply(&self, outbound: Vec<Outbound>) {
        self.applied.lock().unwrap().extend(outbound);
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_open_does_not_hold_up_other_users() {
    let harness = setup(MockTransport::new(), &[]);
    harness.handle(text(OWNER, 1, "/multi_link Album")).await;
    for message_id in 2..8 {
        harness
            .handle(document(OWNER, message_id, &format!("{}.jpg", message_id)))
            .await;
    }
    let issued = only_reply(harness.handle(text(OWNER, 8, "/done")).await);
    let start = format!("/start {}", issued_id(&issued));

    let recorder = Arc::new(Recorder::default());
    let mut lanes = Lanes::new(harness.dispatcher.clone(), recorder.clone());
    lanes.dispatch(harness.update(text(READER, 20, &start)));
    lanes.dispatch(harness.update(text(NEWCOMER, 21, "/start")));

    tokio::time::timeout(Duration::from_millis(200), async {
        while recorder.replies_to(NEWCOMER).is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("newcomer answered while the bundle is still being sent");
    // the six-item bundle is paced, so the reader is still waiting
    assert!(harness.transport.copies_to(READER).len() < 6);
    assert!(recorder.replies_to(READER).is_empty());

    lanes.close().await;
    assert_eq!(harness.transport.copies_to(READER).len(), 6);
    let opened = recorder.replies_to(READER);
    assert_eq!(opened.len(), 1);
    assert!(opened[0].text.contains("Bundle unlocked! Sent 6 file(s)"));
}

#[tokio::test(start_paused = true)]
async fn test_updates_from_one_user_keep_their_order() {
    let harness = setup(MockTransport::new(), &[]);
    let recorder = Arc::new(Recorder::default());
    let mut lanes = Lanes::new(harness.dispatcher.clone(), recorder.clone());

    lanes.dispatch(harness.update(text(OWNER, 1, "/multi_link")));
    lanes.dispatch(harness.update(document(OWNER, 2, "a.pdf")));
    lanes.dispatch(harness.update(document(OWNER, 3, "b.pdf")));
    lanes.dispatch(harness.update(text(OWNER, 4, "/done")));
    lanes.close().await;

    let replies = recorder.replies_to(OWNER);
    assert_eq!(replies.len(), 4);
    assert!(replies[0].text.contains("Bundle mode on"));
    assert!(replies[1].text.contains("1 so far"));
    assert!(replies[2].text.contains("2 so far"));
    assert!(replies[3].text.contains("Files: 2"));
}
