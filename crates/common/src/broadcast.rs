//! Bounded fanout of one payload to every known user.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::EngineError;
use crate::model::{ChatId, ContentPointer, UserId};
use crate::store::LinkStore;
use crate::transport::{CopyOptions, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastPayload {
    Text(String),
    /// Copy of an existing message
    Copy {
        from: ChatId,
        pointer: ContentPointer,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub success: usize,
    pub failure: usize,
}

async fn send_payload<T: Transport + ?Sized>(
    transport: &T,
    to: ChatId,
    payload: &BroadcastPayload,
) -> Result<(), TransportError> {
    match payload {
        BroadcastPayload::Text(text) => transport.send_text(to, text).await.map(|_| ()),
        BroadcastPayload::Copy { from, pointer } => transport
            .copy(to, *from, *pointer, &CopyOptions::default())
            .await
            .map(|_| ()),
    }
}

/// Deliver `payload` to every known user except `exclude`.
///
/// At most `concurrency` deliveries are in flight at once. A recipient whose
///  delivery fails is removed from the known users. Nothing is rolled back.
pub async fn fanout<S, T>(
    store: &S,
    transport: Arc<T>,
    payload: BroadcastPayload,
    exclude: UserId,
    concurrency: usize,
) -> Result<BroadcastReport, EngineError>
where
    S: LinkStore,
    T: Transport,
{
    let recipients: Vec<UserId> = store
        .user_ids()
        .await?
        .into_iter()
        .filter(|id| *id != exclude)
        .collect();
    tracing::info!(recipients = recipients.len(), concurrency, "starting broadcast");

    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let payload = Arc::new(payload);
    let mut tasks = JoinSet::new();

    for recipient in recipients {
        let permits = permits.clone();
        let transport = transport.clone();
        let payload = payload.clone();
        tasks.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => send_payload(transport.as_ref(), recipient, &payload).await,
                Err(_) => Err(TransportError::Http("broadcast semaphore closed".into())),
            };
            (recipient, result)
        });
    }

    let mut report = BroadcastReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => report.success += 1,
            Ok((recipient, Err(e))) => {
                report.failure += 1;
                tracing::debug!(recipient, error = %e, "broadcast delivery failed, dropping user");
                if let Err(e) = store.remove_user(recipient).await {
                    tracing::warn!(recipient, error = %e, "failed to remove unreachable user");
                }
            }
            Err(e) => {
                report.failure += 1;
                tracing::error!(error = %e, "broadcast task panicked");
            }
        }
    }

    tracing::info!(success = report.success, failure = report.failure, "broadcast finished");
    Ok(report)
}
