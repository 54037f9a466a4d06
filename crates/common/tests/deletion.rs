//! Two-step deletion of references and bundles

mod common;

use std::time::Duration;

use ::common::engine::SubmitOutcome;
use ::common::error::EngineError;
use ::common::ids::ReferenceId;
use ::common::model::ItemKind;
use ::common::store::LinkStore;
use ::common::testkit::MockTransport;
use ::common::tokens::ActionToken;

use self::common::{document, setup, user, TestEngine, ARCHIVE};

const OWNER: i64 = 42;
const READER: i64 = 77;

async fn share_single(engine: &TestEngine, pointer: i64) -> ReferenceId {
    match engine.submit(&user(OWNER), document(pointer)).await.unwrap() {
        SubmitOutcome::Created(issued) => issued.id,
        other => panic!("expected a reference, got {:?}", other),
    }
}

#[tokio::test]
async fn test_request_accepts_ids_and_links_but_only_for_owner() {
    let (engine, _) = setup(MockTransport::new(), &[]);
    let id = share_single(&engine, 7).await;

    let prompt = engine.request_delete(OWNER, id.as_str()).await.unwrap();
    assert_eq!(prompt.kind, ItemKind::Single);
    assert_eq!(prompt.display_name, "file_7.pdf");
    assert_eq!(
        prompt.confirm,
        ActionToken::ConfirmDelete {
            id: id.clone(),
            kind: ItemKind::Single
        }
    );

    let link = engine.share_link(&id).await.unwrap();
    assert!(engine.request_delete(OWNER, &link).await.is_ok());

    assert!(matches!(
        engine.request_delete(READER, id.as_str()).await,
        Err(EngineError::NotFound)
    ));
    assert!(matches!(
        engine.request_delete(OWNER, "not an id").await,
        Err(EngineError::NotFound)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_confirm_removes_content_then_record_and_is_final() {
    let (engine, transport) = setup(MockTransport::new(), &[]);
    let owner = user(OWNER);
    engine.begin_bundle(OWNER, None, None).await.unwrap();
    for pointer in 1..=3 {
        engine.submit(&owner, document(pointer)).await.unwrap();
    }
    let issued = engine.finalize(&owner).await.unwrap();
    let archived: Vec<_> = transport.copies_to(ARCHIVE).iter().map(|c| c.copy).collect();

    let deleted = engine
        .confirm_delete(OWNER, &issued.id, ItemKind::Bundle)
        .await
        .unwrap();
    assert_eq!(deleted.kind, ItemKind::Bundle);
    assert!(!deleted.content_already_gone);
    assert_eq!(transport.deleted_from(ARCHIVE), archived);
    assert!(engine.store().bundle(&issued.id).await.unwrap().is_none());

    let again = engine
        .confirm_delete(OWNER, &issued.id, ItemKind::Bundle)
        .await;
    assert!(matches!(again, Err(EngineError::NotFound)));
}

#[tokio::test]
async fn test_confirm_checks_owner_and_kind() {
    let (engine, _) = setup(MockTransport::new(), &[]);
    let id = share_single(&engine, 7).await;

    assert!(matches!(
        engine.confirm_delete(READER, &id, ItemKind::Single).await,
        Err(EngineError::NotFound)
    ));
    assert!(matches!(
        engine.confirm_delete(OWNER, &id, ItemKind::Bundle).await,
        Err(EngineError::NotFound)
    ));
    assert!(engine.store().reference(&id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_content_already_gone_still_deletes_record() {
    let (engine, transport) = setup(MockTransport::new(), &[]);
    let id = share_single(&engine, 7).await;
    let archived = transport.copies_to(ARCHIVE)[0].copy;
    transport.gone_on_delete(archived);

    let deleted = engine
        .confirm_delete(OWNER, &id, ItemKind::Single)
        .await
        .unwrap();
    assert!(deleted.content_already_gone);
    assert!(engine.store().reference(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_transient_failure_keeps_record() {
    let (engine, transport) = setup(MockTransport::new(), &[]);
    let id = share_single(&engine, 7).await;
    transport.fail_deletes(true);

    let err = engine
        .confirm_delete(OWNER, &id, ItemKind::Single)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExternalTransient(_)));
    assert!(err.is_retryable());
    assert!(engine.store().reference(&id).await.unwrap().is_some());

    transport.fail_deletes(false);
    assert!(engine
        .confirm_delete(OWNER, &id, ItemKind::Single)
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_delete_flushes_pending_expiry() {
    let (engine, transport) = setup(MockTransport::new(), &[]);
    let id = share_single(&engine, 7).await;
    engine.open(&user(READER), &id).await.unwrap();
    let delivered = transport.copies_to(READER)[0].copy;
    assert_eq!(engine.expiry().pending(&id), 1);

    engine
        .confirm_delete(OWNER, &id, ItemKind::Single)
        .await
        .unwrap();
    assert_eq!(engine.expiry().pending(&id), 0);
    assert_eq!(transport.deleted_from(READER), vec![delivered]);

    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert_eq!(transport.deleted_from(READER), vec![delivered]);
}
