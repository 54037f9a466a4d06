//! Routing chat updates through the dispatcher into the engine

mod common;

use serde_json::json;

use ::common::jobs::Job;
use ::common::testkit::MockTransport;
use ::common::tokens::{ActionToken, MenuPage};
use ::common::transport::MemberStatus;
use filelink::bot::Outbound;

use self::common::{
    callback, document, group_text, issued_id, only_reply, setup, text, ARCHIVE, GROUP,
    MODERATION_LOG, OPERATOR,
};

const OWNER: i64 = 42;
const READER: i64 = 77;

#[tokio::test(start_paused = true)]
async fn test_start_greets_with_menu() {
    let harness = setup(MockTransport::new(), &[]);
    let reply = only_reply(harness.handle(text(OWNER, 1, "/start")).await);

    assert!(reply.text.contains("Hello, user42!"));
    assert!(reply
        .tokens()
        .contains(&&ActionToken::Menu(MenuPage::MyFiles)));
}

#[tokio::test(start_paused = true)]
async fn test_document_issues_link_that_opens_for_another_user() {
    let harness = setup(MockTransport::new(), &[]);

    let issued = only_reply(harness.handle(document(OWNER, 10, "report.pdf")).await);
    assert!(issued.text.contains("File: report.pdf"));
    let id = issued_id(&issued);

    // the owner's message was archived
    let archived = harness.transport.copies_to(ARCHIVE);
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].source.0, 10);

    let start = format!("/start {}", id);
    let opened = only_reply(harness.handle(text(READER, 11, &start)).await);
    assert!(opened.text.contains("File unlocked"));
    assert_eq!(harness.transport.copies_to(READER).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_reference_is_not_found() {
    let harness = setup(MockTransport::new(), &[]);
    let reply = only_reply(harness.handle(text(READER, 1, "/start AAAAAAAA")).await);
    assert!(reply.text.contains("Not found"));
    assert!(harness.transport.copies_to(READER).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bundle_collects_until_done() {
    let harness = setup(MockTransport::new(), &[]);

    let started = only_reply(harness.handle(text(OWNER, 1, "/multi_link Holiday")).await);
    assert!(started.text.contains("Bundle mode on"));
    assert!(started.text.contains("Title: Holiday"));

    let first = only_reply(harness.handle(document(OWNER, 2, "a.jpg")).await);
    assert!(first.text.contains("1 so far"));
    let second = only_reply(harness.handle(document(OWNER, 3, "b.jpg")).await);
    assert!(second.text.contains("2 so far"));
    // nothing is archived until the bundle is finished
    assert!(harness.transport.copies_to(ARCHIVE).is_empty());

    let issued = only_reply(harness.handle(text(OWNER, 4, "/done")).await);
    assert!(issued.text.contains("Bundle link created"));
    assert!(issued.text.contains("Files: 2"));
    assert_eq!(harness.transport.copies_to(ARCHIVE).len(), 2);

    let start = format!("/start {}", issued_id(&issued));
    let opened = only_reply(harness.handle(text(READER, 5, &start)).await);
    assert!(opened.text.contains("Bundle unlocked! Sent 2 file(s) of \"Holiday\""));
}

#[tokio::test(start_paused = true)]
async fn test_done_without_bundle_explains() {
    let harness = setup(MockTransport::new(), &[]);
    let reply = only_reply(harness.handle(text(OWNER, 1, "/done")).await);
    assert!(reply.text.contains("No bundle in progress"));
}

#[tokio::test(start_paused = true)]
async fn test_membership_gate_then_retry_completes_open() {
    let harness = setup(MockTransport::new().with_channel("@news"), &["@news"]);
    harness
        .transport
        .set_member("@news", OWNER, MemberStatus::Member);

    let issued = only_reply(harness.handle(document(OWNER, 10, "notes.txt")).await);
    let id = issued_id(&issued);

    let start = format!("/start {}", id);
    let prompt = only_reply(harness.handle(text(READER, 11, &start)).await);
    assert!(prompt.text.contains("Access restricted"));
    assert!(prompt.text.contains("@news"));
    let retry = ActionToken::Retry(Some(id.clone()));
    assert_eq!(prompt.tokens(), vec![&retry]);

    // pressing retry before joining keeps the prompt up
    let still_blocked = harness
        .handle(callback(READER, 500, &retry.to_string()))
        .await;
    assert!(matches!(
        &still_blocked[0],
        Outbound::Answer { alert: true, .. }
    ));
    assert!(harness.transport.copies_to(READER).is_empty());

    harness
        .transport
        .set_member("@news", READER, MemberStatus::Member);
    let out = harness
        .handle(callback(READER, 500, &retry.to_string()))
        .await;
    assert_eq!(out.len(), 2);
    match &out[1] {
        Outbound::Edit {
            chat,
            message_id,
            reply,
        } => {
            assert_eq!((*chat, *message_id), (READER, 500));
            assert!(reply.text.contains("File unlocked"));
        }
        other => panic!("expected the prompt to be replaced, got {:?}", other),
    }
    assert_eq!(harness.transport.copies_to(READER).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_requires_confirmation() {
    let harness = setup(MockTransport::new(), &[]);
    let issued = only_reply(harness.handle(document(OWNER, 10, "old.zip")).await);
    let id = issued_id(&issued);

    let prompt = only_reply(
        harness
            .handle(text(OWNER, 11, &format!("/delete {}", id)))
            .await,
    );
    assert!(prompt.text.contains("old.zip"));
    let confirm = prompt.tokens()[0].to_string();

    // someone else cannot use the owner's confirmation
    let foreign = harness.handle(callback(READER, 600, &confirm)).await;
    assert!(matches!(&foreign[0], Outbound::Answer { alert: true, .. }));

    let out = harness.handle(callback(OWNER, 601, &confirm)).await;
    match &out[1] {
        Outbound::Edit { reply, .. } => assert!(reply.text.contains("deleted")),
        other => panic!("expected an edit, got {:?}", other),
    }
    assert_eq!(harness.transport.deleted_from(ARCHIVE).len(), 1);

    let gone = only_reply(
        harness
            .handle(text(READER, 12, &format!("/start {}", id)))
            .await,
    );
    assert!(gone.text.contains("Not found"));
}

#[tokio::test(start_paused = true)]
async fn test_operator_controls_mode() {
    let harness = setup(MockTransport::new(), &[]);

    let denied = only_reply(harness.handle(text(OWNER, 1, "/admin")).await);
    assert!(denied.text.contains("Only admins"));

    let panel = only_reply(harness.handle(text(OPERATOR, 2, "/admin")).await);
    assert!(panel.text.contains("Admin panel"));

    // a regular user cannot press the operator's buttons
    let forged = harness.handle(callback(OWNER, 700, "mode:private")).await;
    assert!(matches!(&forged[0], Outbound::Answer { alert: true, .. }));

    let out = harness.handle(callback(OPERATOR, 701, "mode:private")).await;
    match &out[0] {
        Outbound::Answer { text, .. } => {
            assert_eq!(text.as_deref(), Some("Mode set to PRIVATE."))
        }
        other => panic!("expected an answer, got {:?}", other),
    }

    let refused = only_reply(harness.handle(document(OWNER, 3, "x.pdf")).await);
    assert!(refused.text.contains("private mode"));
    assert!(harness.transport.copies_to(ARCHIVE).is_empty());

    // operators may still upload
    let issued = only_reply(harness.handle(document(OPERATOR, 4, "y.pdf")).await);
    assert!(issued.text.contains("Link created"));
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_is_queued_for_the_worker() {
    let harness = setup(MockTransport::new(), &[]);

    let refused = only_reply(harness.handle(text(OWNER, 1, "/broadcast hi")).await);
    assert!(refused.text.contains("Only admins"));
    assert!(harness.jobs.try_recv().is_none());

    let queued = only_reply(
        harness
            .handle(text(OPERATOR, 2, "/broadcast hello everyone"))
            .await,
    );
    assert!(queued.text.contains("Broadcast started"));
    match harness.jobs.try_recv() {
        Some(Job::Broadcast { operator, .. }) => assert_eq!(operator, OPERATOR),
        other => panic!("expected a broadcast job, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_button_is_answered() {
    let harness = setup(MockTransport::new(), &[]);
    let out = harness.handle(callback(OWNER, 800, "bogus:token")).await;
    assert_eq!(
        out,
        vec![Outbound::Answer {
            callback_id: "cb800".into(),
            text: Some("This button is no longer valid.".into()),
            alert: false,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_removes_the_menu() {
    let harness = setup(MockTransport::new(), &[]);
    let out = harness.handle(callback(OPERATOR, 900, "menu:close")).await;
    assert_eq!(
        out[1],
        Outbound::Delete {
            chat: OPERATOR,
            message_id: 900
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_group_links_are_removed_then_muted() {
    let harness = setup(MockTransport::new(), &[]);
    let link = json!([{"type": "url", "offset": 0, "length": 15}]);

    let first = harness
        .handle(group_text(READER, 20, "https://x.test", link.clone()))
        .await;
    assert_eq!(
        first[0],
        Outbound::Delete {
            chat: GROUP,
            message_id: 20
        }
    );
    match &first[1] {
        Outbound::Send { chat, reply } => {
            assert_eq!(*chat, GROUP);
            assert!(reply.text.contains("Warning 1/2"));
        }
        other => panic!("expected a warning, got {:?}", other),
    }
    match &first[2] {
        Outbound::Send { chat, reply } => {
            assert_eq!(*chat, MODERATION_LOG);
            assert!(reply.text.contains("sharing links"));
        }
        other => panic!("expected a log entry, got {:?}", other),
    }

    let second = harness
        .handle(group_text(READER, 21, "buy spam now", json!([])))
        .await;
    assert!(second.contains(&Outbound::Mute {
        chat: GROUP,
        user: READER
    }));
}

#[tokio::test(start_paused = true)]
async fn test_group_allows_clean_and_operator_messages() {
    let harness = setup(MockTransport::new(), &[]);
    let link = json!([{"type": "url", "offset": 0, "length": 15}]);

    assert!(harness
        .handle(group_text(READER, 30, "good morning", json!([])))
        .await
        .is_empty());
    assert!(harness
        .handle(group_text(OPERATOR, 31, "https://x.test", link))
        .await
        .is_empty());
}
