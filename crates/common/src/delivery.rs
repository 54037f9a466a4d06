//! Delivery of archived content and the expiry of delivered copies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::ids::ReferenceId;
use crate::model::{ChatId, ContentPointer};
use crate::transport::{CopyOptions, Transport};

/// How long delivered copies stay in the recipient's chat
pub const RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Pointers of the copies now visible to the recipient, in source order
    pub delivered: Vec<ContentPointer>,
    pub failed: usize,
}

/// Copy `pointers` from `source` to `recipient`, in order.
///
/// A failed item is logged and left out; the rest are still attempted.
///  `pacing` is slept between consecutive items.
pub async fn deliver<T: Transport + ?Sized>(
    transport: &T,
    recipient: ChatId,
    source: ChatId,
    pointers: &[ContentPointer],
    options: &CopyOptions,
    pacing: Duration,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for (i, pointer) in pointers.iter().enumerate() {
        if i > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
        match transport.copy(recipient, source, *pointer, options).await {
            Ok(copy) => report.delivered.push(copy),
            Err(e) => {
                tracing::warn!(recipient, %pointer, error = %e, "failed to deliver item");
                report.failed += 1;
            }
        }
    }
    report
}

#[derive(Debug)]
struct PendingExpiry {
    recipient: ChatId,
    pointers: Vec<ContentPointer>,
    handle: AbortHandle,
}

type Registry = Arc<Mutex<HashMap<ReferenceId, HashMap<u64, PendingExpiry>>>>;

/// Removes delivered copies once the retention window has passed.
///
/// Timers are registered under the reference they were delivered for, so
/// deleting a reference can [`flush`](ExpiryScheduler::flush) them instead of
/// leaving them to fire against content that no longer has an owner.
#[derive(Debug)]
pub struct ExpiryScheduler<T: Transport> {
    transport: Arc<T>,
    retention: Duration,
    registry: Registry,
    next_key: Arc<AtomicU64>,
}

impl<T: Transport> Clone for ExpiryScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            retention: self.retention,
            registry: self.registry.clone(),
            next_key: self.next_key.clone(),
        }
    }
}

impl<T: Transport> ExpiryScheduler<T> {
    pub fn new(transport: Arc<T>, retention: Duration) -> Self {
        Self {
            transport,
            retention,
            registry: Arc::default(),
            next_key: Arc::default(),
        }
    }

    /// Schedule removal of `delivered` from `recipient`'s chat
    pub fn schedule(&self, reference: &ReferenceId, recipient: ChatId, delivered: Vec<ContentPointer>) {
        if delivered.is_empty() {
            return;
        }
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);

        // Hold the lock across the spawn so the task cannot look itself up
        //  before it is registered.
        let mut registry = self.registry.lock();
        let task = {
            let transport = self.transport.clone();
            let registry = self.registry.clone();
            let retention = self.retention;
            let reference = reference.clone();
            tokio::spawn(async move {
                tokio::time::sleep(retention).await;
                let Some(entry) = take_entry(&registry, &reference, key) else {
                    return;
                };
                expire(transport.as_ref(), entry.recipient, &entry.pointers).await;
            })
        };
        registry.entry(reference.clone()).or_default().insert(
            key,
            PendingExpiry {
                recipient,
                pointers: delivered,
                handle: task.abort_handle(),
            },
        );
        tracing::debug!(%reference, recipient, retention = ?self.retention, "scheduled expiry");
    }

    /// Cancel every pending timer of `reference` and remove its delivered
    ///  copies now. Returns the number of timers flushed.
    pub async fn flush(&self, reference: &ReferenceId) -> usize {
        let pending = self.registry.lock().remove(reference).unwrap_or_default();
        let flushed = pending.len();
        for (_, entry) in pending {
            entry.handle.abort();
            expire(self.transport.as_ref(), entry.recipient, &entry.pointers).await;
        }
        if flushed > 0 {
            tracing::debug!(%reference, flushed, "flushed pending expiries");
        }
        flushed
    }

    /// Timers still waiting for `reference`
    pub fn pending(&self, reference: &ReferenceId) -> usize {
        self.registry
            .lock()
            .get(reference)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

fn take_entry(registry: &Registry, reference: &ReferenceId, key: u64) -> Option<PendingExpiry> {
    let mut registry = registry.lock();
    let timers = registry.get_mut(reference)?;
    let entry = timers.remove(&key);
    if timers.is_empty() {
        registry.remove(reference);
    }
    entry
}

async fn expire<T: Transport + ?Sized>(transport: &T, recipient: ChatId, pointers: &[ContentPointer]) {
    match transport.delete(recipient, pointers).await {
        Ok(()) => tracing::debug!(recipient, count = pointers.len(), "expired delivered copies"),
        Err(e) if e.is_content_gone() => {
            tracing::debug!(recipient, "delivered copies already gone")
        }
        Err(e) => tracing::warn!(recipient, error = %e, "failed to expire delivered copies"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockTransport;

    const ARCHIVE: ChatId = -1;

    fn rid(s: &str) -> ReferenceId {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_keeps_order_and_skips_failures() {
        let transport = MockTransport::new();
        transport.fail_pointer(ContentPointer(2));
        let pointers = [ContentPointer(1), ContentPointer(2), ContentPointer(3)];

        let report = deliver(
            &transport,
            42,
            ARCHIVE,
            &pointers,
            &CopyOptions::default(),
            Duration::from_millis(500),
        )
        .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered.len(), 2);
        let sources: Vec<_> = transport.copies_to(42).iter().map(|c| c.source).collect();
        assert_eq!(sources, vec![ContentPointer(1), ContentPointer(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_fires_after_retention() {
        let transport = Arc::new(MockTransport::new());
        let scheduler = ExpiryScheduler::new(transport.clone(), RETENTION);
        let reference = rid("abcd1234");

        scheduler.schedule(&reference, 42, vec![ContentPointer(11), ContentPointer(12)]);
        assert_eq!(scheduler.pending(&reference), 1);

        tokio::time::sleep(RETENTION - Duration::from_secs(1)).await;
        assert!(transport.deleted_from(42).is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            transport.deleted_from(42),
            vec![ContentPointer(11), ContentPointer(12)]
        );
        assert_eq!(scheduler.pending(&reference), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_tolerates_missing_content() {
        let transport = Arc::new(MockTransport::new());
        transport.gone_on_delete(ContentPointer(11));
        let scheduler = ExpiryScheduler::new(transport.clone(), Duration::from_secs(10));
        let reference = rid("abcd1234");

        scheduler.schedule(&reference, 42, vec![ContentPointer(11)]);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(transport.deletes().len(), 1);
        assert_eq!(scheduler.pending(&reference), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_deletes_now_and_cancels_timers() {
        let transport = Arc::new(MockTransport::new());
        let scheduler = ExpiryScheduler::new(transport.clone(), RETENTION);
        let reference = rid("abcd1234");
        let other = rid("zzzz9999");

        scheduler.schedule(&reference, 42, vec![ContentPointer(11)]);
        scheduler.schedule(&reference, 43, vec![ContentPointer(12)]);
        scheduler.schedule(&other, 44, vec![ContentPointer(13)]);

        assert_eq!(scheduler.flush(&reference).await, 2);
        assert_eq!(transport.deleted_from(42), vec![ContentPointer(11)]);
        assert_eq!(transport.deleted_from(43), vec![ContentPointer(12)]);

        tokio::time::sleep(RETENTION + Duration::from_secs(1)).await;
        // Only the untouched reference fired; the flushed ones did not repeat.
        assert_eq!(transport.deletes().len(), 3);
        assert_eq!(transport.deleted_from(44), vec![ContentPointer(13)]);
        assert_eq!(scheduler.flush(&reference).await, 0);
    }

    #[tokio::test]
    async fn test_nothing_delivered_schedules_nothing() {
        let transport = Arc::new(MockTransport::new());
        let scheduler = ExpiryScheduler::new(transport, RETENTION);
        scheduler.schedule(&rid("abcd1234"), 42, Vec::new());
        assert_eq!(scheduler.pending(&rid("abcd1234")), 0);
    }
}
