use futures::StreamExt;
use tokio::sync::watch;

use common::engine::Engine;
use common::jobs::Job;
use common::store::LinkStore;
use common::transport::Transport;

use super::render;

/// Drain the background job queue until shutdown, or until every
///  dispatcher has been dropped.
pub async fn run_worker<S, T>(
    engine: Engine<S, T>,
    mut job_stream: flume::r#async::RecvStream<'static, Job>,
    mut shutdown_rx: watch::Receiver<()>,
) where
    S: LinkStore,
    T: Transport,
{
    tracing::info!("starting background job worker");

    loop {
        tokio::select! {
            job = job_stream.next() => match job {
                Some(job) => {
                    if let Err(e) = execute_job(&engine, job).await {
                        tracing::error!("job execution failed: {}", e);
                    }
                }
                None => {
                    tracing::info!("job queue closed, shutting down worker");
                    break;
                }
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    tracing::info!("background job worker shutting down");
}

async fn execute_job<S, T>(engine: &Engine<S, T>, job: Job) -> anyhow::Result<()>
where
    S: LinkStore,
    T: Transport,
{
    match job {
        Job::Broadcast { operator, payload } => {
            let report = engine.broadcast(operator, payload).await?;
            tracing::info!(
                operator,
                success = report.success,
                failure = report.failure,
                "broadcast finished"
            );
            engine
                .transport()
                .send_text(operator, &render::broadcast_report(&report))
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use common::broadcast::BroadcastPayload;
    use common::engine::EngineConfig;
    use common::jobs::JobDispatcher;
    use common::store::MemoryLinkStore;
    use common::testkit::MockTransport;
    use chrono::Utc;

    #[tokio::test]
    async fn test_broadcast_job_reports_to_operator() {
        let store = MemoryLinkStore::new();
        for user in [1, 2, 3] {
            store.touch_user(user, None, Utc::now()).await.unwrap();
        }
        let transport = Arc::new(MockTransport::new());
        transport.fail_recipient(3);
        let engine = Engine::new(
            store,
            transport.clone(),
            EngineConfig::new(-100).with_operators([1]),
        );

        let (dispatcher, receiver) = JobDispatcher::new();
        dispatcher
            .dispatch_broadcast(1, BroadcastPayload::Text("hello".into()))
            .unwrap();
        drop(dispatcher);

        let (_shutdown_tx, shutdown_rx) = watch::channel(());
        run_worker(engine, receiver.into_async(), shutdown_rx).await;

        assert_eq!(transport.sent_to(2), vec!["hello".to_string()]);
        let report = transport.sent_to(1);
        assert_eq!(report.len(), 1);
        assert!(report[0].contains("Delivered: 1"));
        assert!(report[0].contains("Failed: 1"));
    }

    #[tokio::test]
    async fn test_non_operator_job_is_dropped() {
        let transport = Arc::new(MockTransport::new());
        let engine = Engine::new(
            MemoryLinkStore::new(),
            transport.clone(),
            EngineConfig::new(-100),
        );
        let (dispatcher, receiver) = JobDispatcher::new();
        dispatcher
            .dispatch_broadcast(9, BroadcastPayload::Text("hi".into()))
            .unwrap();
        drop(dispatcher);

        let (_shutdown_tx, shutdown_rx) = watch::channel(());
        run_worker(engine, receiver.into_async(), shutdown_rx).await;
        assert!(transport.sent_to(9).is_empty());
    }
}
