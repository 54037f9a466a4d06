use common::broadcast::BroadcastPayload;
use common::engine::{Engine, Requester, SubmitOutcome, Submission};
use common::error::{Denial, EngineError};
use common::ids::ReferenceId;
use common::jobs::JobDispatcher;
use common::model::{ChatId, ContentPointer, GroupHandle, UserId};
use common::moderation::{EntityKind, Moderator, Sanction};
use common::store::LinkStore;
use common::tokens::{ActionToken, MenuPage};
use common::transport::Transport;

use super::command::{self, Command, LinkArgs};
use super::render::{self, Reply};
use crate::telegram::types::{CallbackQuery, Message, Update, User};

/// A side effect on the chat platform produced by handling an update.
///
/// Effects are applied in order by the update loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Send {
        chat: ChatId,
        reply: Reply,
    },
    /// Replace the text and keyboard of a message the bot sent earlier
    Edit {
        chat: ChatId,
        message_id: i64,
        reply: Reply,
    },
    Answer {
        callback_id: String,
        text: Option<String>,
        alert: bool,
    },
    Delete {
        chat: ChatId,
        message_id: i64,
    },
    Mute {
        chat: ChatId,
        user: UserId,
    },
}

/// Routes updates to engine operations
pub struct Dispatcher<S: LinkStore, T: Transport> {
    engine: Engine<S, T>,
    moderator: Moderator,
    jobs: JobDispatcher,
    moderation_log: Option<ChatId>,
}

impl<S: LinkStore, T: Transport> Clone for Dispatcher<S, T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            moderator: self.moderator.clone(),
            jobs: self.jobs.clone(),
            moderation_log: self.moderation_log,
        }
    }
}

fn requester(user: &User) -> Requester {
    Requester::new(user.id, Some(user.full_name()))
}

fn send(chat: ChatId, reply: Reply) -> Outbound {
    Outbound::Send { chat, reply }
}

impl<S: LinkStore, T: Transport> Dispatcher<S, T> {
    pub fn new(
        engine: Engine<S, T>,
        moderator: Moderator,
        jobs: JobDispatcher,
        moderation_log: Option<ChatId>,
    ) -> Self {
        Self {
            engine,
            moderator,
            jobs,
            moderation_log,
        }
    }

    pub fn engine(&self) -> &Engine<S, T> {
        &self.engine
    }

    #[tracing::instrument(skip(self, update), fields(update_id = update.update_id))]
    pub async fn handle(&self, update: Update) -> Vec<Outbound> {
        if let Some(callback) = update.callback_query {
            return self.handle_callback(callback).await;
        }
        match update.message {
            Some(message) if message.chat.is_private() => self.handle_private(message).await,
            Some(message) if message.chat.is_group() => self.moderate(message).await,
            _ => Vec::new(),
        }
    }

    async fn handle_private(&self, message: Message) -> Vec<Outbound> {
        let Some(user) = message.from.clone() else {
            return Vec::new();
        };
        let chat = message.chat.id;

        if let Some(text) = message.text.as_deref() {
            let bot = self
                .engine
                .bot_identity()
                .await
                .ok()
                .map(|b| b.username.clone());
            if let Some(command) = command::parse(text, bot.as_deref()) {
                tracing::debug!(user = user.id, ?command, "command received");
                let reply = self.run_command(&user, &message, command).await;
                return vec![send(chat, reply)];
            }
        }

        match message.attachment() {
            Some(attachment) => {
                let submission = Submission {
                    pointer: ContentPointer(message.message_id),
                    kind: attachment.kind,
                    size: attachment.size,
                    default_name: attachment.default_name,
                };
                vec![send(chat, self.submit(&user, submission).await)]
            }
            None => Vec::new(),
        }
    }

    async fn run_command(&self, user: &User, message: &Message, command: Command) -> Reply {
        let result = match command {
            Command::Start(None) => self
                .engine
                .admit(&requester(user), None)
                .await
                .map(|_| render::welcome(&user.first_name)),
            Command::Start(Some(raw)) => self.open(user, &raw).await,
            Command::Help => Ok(render::help()),
            Command::CreateLink(args) => self.begin(user, args, false).await,
            Command::MultiLink(args) => self.begin(user, args, true).await,
            Command::Done => self.finalize(user).await,
            Command::SetThumbnail => self.set_thumbnail(user, message).await,
            Command::CancelThumbnail => self
                .engine
                .cancel_thumbnail(user.id)
                .await
                .map(render::thumbnail_cleared),
            Command::MyFiles => self.my_files(user.id).await,
            Command::Delete(None) => Ok(render::delete_usage()),
            Command::Delete(Some(raw)) => self
                .engine
                .request_delete(user.id, &raw)
                .await
                .map(|prompt| render::delete_prompt(&prompt)),
            Command::Admin => self.admin_panel(user.id).await,
            Command::Stats => self
                .engine
                .stats(user.id)
                .await
                .map(|stats| render::stats(&stats)),
            Command::Broadcast(text) => self.broadcast(user.id, message, text),
            Command::Unknown(_) => Ok(render::unknown_command()),
        };
        result.unwrap_or_else(|e| self.explain(user.id, &e))
    }

    fn explain(&self, user: UserId, err: &EngineError) -> Reply {
        match err {
            EngineError::AccessDenied(_) | EngineError::NotFound => {
                tracing::debug!(user, error = %err, "request rejected")
            }
            _ => tracing::warn!(user, error = %err, "request failed"),
        }
        render::engine_error(err)
    }

    async fn open(&self, user: &User, raw: &str) -> Result<Reply, EngineError> {
        let id = ReferenceId::extract(raw).ok_or(EngineError::NotFound)?;
        let opened = self.engine.open(&requester(user), &id).await?;
        Ok(render::opened(&opened))
    }

    async fn begin(&self, user: &User, args: LinkArgs, bundle: bool) -> Result<Reply, EngineError> {
        self.engine.admit(&requester(user), None).await?;
        let group = match args.group {
            Some(raw) => Some(GroupHandle::parse(&raw).ok_or_else(|| {
                EngineError::InvalidRequirement(format!("{} is not a valid channel username", raw))
            })?),
            None => None,
        };
        let session = if bundle {
            self.engine.begin_bundle(user.id, group, args.title).await?
        } else {
            self.engine.begin_single(user.id, group, args.title).await?
        };
        Ok(render::session_started(&session))
    }

    async fn finalize(&self, user: &User) -> Result<Reply, EngineError> {
        let requester = requester(user);
        self.engine.admit(&requester, None).await?;
        let issued = self.engine.finalize(&requester).await?;
        Ok(render::issued(&issued))
    }

    async fn submit(&self, user: &User, submission: Submission) -> Reply {
        let requester = requester(user);
        let result = async {
            self.engine.admit(&requester, None).await?;
            self.engine.submit(&requester, submission).await
        }
        .await;
        match result {
            Ok(SubmitOutcome::Created(issued)) => render::issued(&issued),
            Ok(SubmitOutcome::Appended { pending }) => render::appended(pending),
            Err(e) => self.explain(user.id, &e),
        }
    }

    async fn set_thumbnail(&self, user: &User, message: &Message) -> Result<Reply, EngineError> {
        let photo = message
            .reply_to_message
            .as_deref()
            .and_then(Message::largest_photo);
        match photo {
            Some(photo) => {
                self.engine.set_thumbnail(user.id, &photo.file_id).await?;
                Ok(render::thumbnail_set())
            }
            None => Ok(render::thumbnail_usage()),
        }
    }

    async fn my_files(&self, owner: UserId) -> Result<Reply, EngineError> {
        let items = self.engine.my_files(owner).await?;
        let bot = self.engine.bot_identity().await?;
        Ok(render::my_files(&items, bot))
    }

    async fn admin_panel(&self, user: UserId) -> Result<Reply, EngineError> {
        self.engine.ensure_operator(user)?;
        Ok(render::admin_panel(self.engine.mode().await?))
    }

    fn broadcast(
        &self,
        operator: UserId,
        message: &Message,
        text: Option<String>,
    ) -> Result<Reply, EngineError> {
        self.engine.ensure_operator(operator)?;
        let payload = match (message.reply_to_message.as_deref(), text) {
            (Some(original), _) => BroadcastPayload::Copy {
                from: original.chat.id,
                pointer: ContentPointer(original.message_id),
            },
            (None, Some(text)) => BroadcastPayload::Text(text),
            (None, None) => return Ok(render::broadcast_help()),
        };
        self.jobs
            .dispatch_broadcast(operator, payload)
            .map_err(|e| EngineError::ExternalTransient(e.to_string()))?;
        Ok(render::broadcast_queued())
    }

    async fn handle_callback(&self, callback: CallbackQuery) -> Vec<Outbound> {
        let user = callback.from.clone();
        let token = callback
            .data
            .as_deref()
            .and_then(|data| data.parse::<ActionToken>().ok());
        let Some(token) = token else {
            return vec![answer(&callback, Some("This button is no longer valid."), false)];
        };
        tracing::debug!(user = user.id, %token, "callback received");

        match token {
            ActionToken::Retry(target) => self.retry(&callback, &user, target).await,
            ActionToken::ConfirmDelete { id, kind } => {
                match self.engine.confirm_delete(user.id, &id, kind).await {
                    Ok(deleted) => vec![
                        answer(&callback, Some("Deleted."), false),
                        show(&callback, render::deleted(&deleted)),
                    ],
                    Err(EngineError::NotFound) => vec![answer(
                        &callback,
                        Some("Not found, or already deleted."),
                        true,
                    )],
                    Err(e) => vec![alert(&callback, self.explain(user.id, &e))],
                }
            }
            ActionToken::CancelDelete => vec![
                answer(&callback, Some("Deletion cancelled."), false),
                show(&callback, render::delete_cancelled()),
            ],
            ActionToken::SetMode(mode) => match self.engine.set_mode(user.id, mode).await {
                Ok(()) => vec![
                    answer(
                        &callback,
                        Some(&format!("Mode set to {}.", mode.as_str().to_uppercase())),
                        true,
                    ),
                    show(&callback, render::mode_panel(mode)),
                ],
                Err(e) => vec![alert(&callback, self.explain(user.id, &e))],
            },
            ActionToken::Menu(page) => self.menu(&callback, &user, page).await,
        }
    }

    async fn retry(
        &self,
        callback: &CallbackQuery,
        user: &User,
        target: Option<ReferenceId>,
    ) -> Vec<Outbound> {
        match self.engine.retry(&requester(user), target).await {
            Ok(Some(opened)) => vec![
                answer(callback, Some("Thanks for joining! Sending now."), false),
                show(callback, render::opened(&opened)),
            ],
            Ok(None) => vec![
                answer(callback, Some("Thanks for joining!"), false),
                show(callback, render::welcome(&user.first_name)),
            ],
            Err(EngineError::AccessDenied(Denial::Membership(prompt))) => vec![
                answer(
                    callback,
                    Some("You have not joined everything yet. Join, then try again."),
                    true,
                ),
                show(callback, render::join_prompt(&prompt)),
            ],
            Err(e) => vec![alert(callback, self.explain(user.id, &e))],
        }
    }

    async fn menu(&self, callback: &CallbackQuery, user: &User, page: MenuPage) -> Vec<Outbound> {
        if page.is_operator_only() {
            if let Err(e) = self.engine.ensure_operator(user.id) {
                return vec![alert(callback, self.explain(user.id, &e))];
            }
        }
        let reply = match page {
            MenuPage::Home => Ok(render::welcome(&user.first_name)),
            MenuPage::Help => Ok(render::help()),
            MenuPage::About => Ok(render::about()),
            MenuPage::MyFiles => self.my_files(user.id).await,
            MenuPage::Requirements => Ok(render::requirements(self.engine.global_requirements())),
            MenuPage::Admin => self.admin_panel(user.id).await,
            MenuPage::Stats => self
                .engine
                .stats(user.id)
                .await
                .map(|stats| render::stats(&stats)),
            MenuPage::Mode => self.engine.mode().await.map(render::mode_panel),
            MenuPage::Broadcast => Ok(render::broadcast_help()),
            MenuPage::Close => {
                let mut out = vec![answer(callback, None, false)];
                if let Some(message) = &callback.message {
                    out.push(Outbound::Delete {
                        chat: message.chat.id,
                        message_id: message.message_id,
                    });
                }
                return out;
            }
        };
        match reply {
            Ok(reply) => vec![answer(callback, None, false), show(callback, reply)],
            Err(e) => vec![alert(callback, self.explain(user.id, &e))],
        }
    }

    /// Enforce the group rules on a message from a regular member
    async fn moderate(&self, message: Message) -> Vec<Outbound> {
        let Some(user) = message.from.as_ref() else {
            return Vec::new();
        };
        if user.is_bot || self.engine.is_operator(user.id) {
            return Vec::new();
        }

        let entities: Vec<EntityKind> = message
            .body_entities()
            .iter()
            .map(|e| EntityKind::parse(&e.kind))
            .collect();
        let Some(violation) = self
            .moderator
            .inspect(message.body().unwrap_or_default(), &entities)
        else {
            return Vec::new();
        };

        let chat = message.chat.id;
        let name = user.full_name();
        tracing::info!(chat, user = user.id, reason = %violation.reason(), "removing group message");

        let mut out = vec![Outbound::Delete {
            chat,
            message_id: message.message_id,
        }];
        let muted = match self.moderator.warn(self.engine.store(), chat, user.id).await {
            Ok(Sanction::Warned { count, max }) => {
                out.push(send(
                    chat,
                    Reply::text(render::moderation_notice(&name, &violation, count, max)),
                ));
                false
            }
            Ok(Sanction::Muted) => {
                out.push(Outbound::Mute {
                    chat,
                    user: user.id,
                });
                out.push(send(
                    chat,
                    Reply::text(render::muted_notice(&name, self.moderator.max_warnings())),
                ));
                true
            }
            Err(e) => {
                tracing::warn!(chat, user = user.id, error = %e, "failed to record warning");
                false
            }
        };

        if let Some(log_chat) = self.moderation_log {
            let group = message.chat.title.as_deref().unwrap_or("group");
            out.push(send(
                log_chat,
                Reply::text(render::moderation_log(
                    &name, user.id, group, chat, &violation, muted,
                )),
            ));
        }
        out
    }
}

fn answer(callback: &CallbackQuery, text: Option<&str>, alert: bool) -> Outbound {
    Outbound::Answer {
        callback_id: callback.id.clone(),
        text: text.map(str::to_string),
        alert,
    }
}

/// Surface a failure as a popup on the pressed button
fn alert(callback: &CallbackQuery, reply: Reply) -> Outbound {
    answer(callback, Some(&reply.text), true)
}

/// Show `reply` in place of the message carrying the pressed button, or as
///  a new message when that one is not available
fn show(callback: &CallbackQuery, reply: Reply) -> Outbound {
    match &callback.message {
        Some(message) => Outbound::Edit {
            chat: message.chat.id,
            message_id: message.message_id,
            reply,
        },
        None => send(callback.from.id, reply),
    }
}
