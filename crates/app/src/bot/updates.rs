//! Long-polling update loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use common::model::UserId;
use common::store::LinkStore;
use common::transport::Transport;

use super::dispatch::{Dispatcher, Outbound};
use crate::telegram::types::Update;
use crate::telegram::BotClient;

/// Pause before polling again after a failed fetch
const POLL_BACKOFF: Duration = Duration::from_secs(3);

/// Fetch updates until shutdown is signalled, handing each to its sender's lane.
///
/// The offset moves past an update once it is queued. On shutdown the loop
///  stops fetching and waits for every queued update to be handled.
pub async fn run<S: LinkStore>(
    client: BotClient,
    dispatcher: Dispatcher<S, BotClient>,
    poll_timeout: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut offset: Option<i64> = None;
    let mut lanes = Lanes::new(dispatcher, Arc::new(client.clone()));
    tracing::info!(timeout_secs = poll_timeout.as_secs(), "update loop started");

    loop {
        let fetched = tokio::select! {
            _ = shutdown_rx.changed() => break,
            fetched = client.get_updates(offset, poll_timeout) => fetched,
        };

        let updates = match fetched {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch updates");
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(POLL_BACKOFF) => continue,
                }
            }
        };

        for update in updates {
            let update_id = update.update_id;
            lanes.dispatch(update);
            offset = Some(update_id + 1);
        }
    }

    tracing::info!(pending = lanes.active(), "update loop stopping, draining lanes");
    lanes.close().await;
    tracing::info!("update loop stopped");
}

/// Where the effects of a handled update go
#[async_trait]
pub trait Effects: Send + Sync + 'static {
    async fn apply(&self, outbound: Vec<Outbound>);
}

/// Handles updates concurrently across users and in arrival order per user.
///
/// Each update runs in its own task, which first waits for the previous
///  task of the same sender.
pub struct Lanes<S: LinkStore, T: Transport, E: Effects> {
    dispatcher: Dispatcher<S, T>,
    effects: Arc<E>,
    tails: HashMap<UserId, JoinHandle<()>>,
}

impl<S: LinkStore, T: Transport, E: Effects> Lanes<S, T, E> {
    pub fn new(dispatcher: Dispatcher<S, T>, effects: Arc<E>) -> Self {
        Self {
            dispatcher,
            effects,
            tails: HashMap::new(),
        }
    }

    /// Queue an update behind earlier updates from the same sender
    pub fn dispatch(&mut self, update: Update) {
        self.tails.retain(|_, tail| !tail.is_finished());

        let key = sender_of(&update);
        let previous = self.tails.remove(&key);
        let dispatcher = self.dispatcher.clone();
        let effects = self.effects.clone();
        let tail = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::error!(sender = key, error = %e, "previous update handler failed");
                }
            }
            let update_id = update.update_id;
            let outbound = dispatcher.handle(update).await;
            effects.apply(outbound).await;
            tracing::trace!(sender = key, update_id, "update handled");
        });
        self.tails.insert(key, tail);
    }

    /// Senders with updates still being handled
    pub fn active(&self) -> usize {
        self.tails.values().filter(|t| !t.is_finished()).count()
    }

    /// Wait for every queued update to be handled
    pub async fn close(self) {
        for (sender, tail) in self.tails {
            if let Err(e) = tail.await {
                tracing::error!(sender, error = %e, "update handler failed");
            }
        }
    }
}

/// The user an update belongs to, falling back to the chat for senderless posts
fn sender_of(update: &Update) -> UserId {
    if let Some(callback) = &update.callback_query {
        return callback.from.id;
    }
    match &update.message {
        Some(message) => message
            .from
            .as_ref()
            .map(|user| user.id)
            .unwrap_or(message.chat.id),
        None => 0,
    }
}

/// Performs the effects of one update in order. Failures are logged and do
///  not stop the remaining effects.
#[async_trait]
impl Effects for BotClient {
    async fn apply(&self, outbound: Vec<Outbound>) {
        for effect in outbound {
            apply_one(self, &effect).await;
        }
    }
}

async fn apply_one(client: &BotClient, effect: &Outbound) {
    let result = match effect {
        Outbound::Send { chat, reply } => client
            .send_message(*chat, &reply.text, reply.markup().as_ref())
            .await
            .map(|_| ()),
        Outbound::Edit {
            chat,
            message_id,
            reply,
        } => {
            client
                .edit_message_text(*chat, *message_id, &reply.text, reply.markup().as_ref())
                .await
        }
        Outbound::Answer {
            callback_id,
            text,
            alert,
        } => {
            client
                .answer_callback_query(callback_id, text.as_deref(), *alert)
                .await
        }
        Outbound::Delete { chat, message_id } => client.delete_message(*chat, *message_id).await,
        Outbound::Mute { chat, user } => client.restrict_chat_member(*chat, *user).await,
    };
    if let Err(e) = result {
        tracing::warn!(?effect, error = %e, "failed to apply outbound effect");
    }
}
