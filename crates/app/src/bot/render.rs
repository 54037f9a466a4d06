//! Reply texts and inline keyboards.

use std::collections::BTreeSet;

use url::form_urlencoded;

use common::broadcast::BroadcastReport;
use common::deletion::{DeletePrompt, Deleted};
use common::engine::{Issued, Opened, OwnedItems};
use common::error::{Denial, EngineError};
use common::gate::JoinPrompt;
use common::model::{GroupHandle, ItemKind, OperatingMode, Stats};
use common::moderation::Violation;
use common::session::UploadSession;
use common::tokens::{ActionToken, MenuPage};
use common::transport::BotIdentity;

use crate::telegram::types::{InlineKeyboardButton, InlineKeyboardMarkup};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    Action { label: String, token: ActionToken },
    Link { label: String, url: String },
}

impl Button {
    pub fn action(label: impl Into<String>, token: ActionToken) -> Self {
        Button::Action {
            label: label.into(),
            token,
        }
    }

    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Button::Link {
            label: label.into(),
            url: url.into(),
        }
    }

    fn menu(label: &str, page: MenuPage) -> Self {
        Self::action(label, ActionToken::Menu(page))
    }
}

/// A message to show, with an optional inline keyboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Vec<Vec<Button>>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    pub fn row(mut self, row: Vec<Button>) -> Self {
        self.keyboard.push(row);
        self
    }

    /// Every action token carried by the keyboard, in layout order
    pub fn tokens(&self) -> Vec<&ActionToken> {
        self.keyboard
            .iter()
            .flatten()
            .filter_map(|b| match b {
                Button::Action { token, .. } => Some(token),
                Button::Link { .. } => None,
            })
            .collect()
    }

    pub fn markup(&self) -> Option<InlineKeyboardMarkup> {
        if self.keyboard.is_empty() {
            return None;
        }
        let inline_keyboard = self
            .keyboard
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| match button {
                        Button::Action { label, token } => InlineKeyboardButton {
                            text: label.clone(),
                            url: None,
                            callback_data: Some(token.to_string()),
                        },
                        Button::Link { label, url } => InlineKeyboardButton {
                            text: label.clone(),
                            url: Some(url.clone()),
                            callback_data: None,
                        },
                    })
                    .collect()
            })
            .collect();
        Some(InlineKeyboardMarkup { inline_keyboard })
    }
}

/// Link that opens the platform's share sheet prefilled with `text`
pub fn share_url(text: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(text.as_bytes()).collect();
    format!("https://t.me/share/url?url={}", encoded)
}

fn group_url(group: &GroupHandle) -> String {
    format!("https://t.me/{}", group.as_str())
}

pub fn welcome(first_name: &str) -> Reply {
    Reply::text(format!(
        "Hello, {}! 🤖\n\n\
         I turn your files into shareable links. Send me a file to get a link, \
         or start a bundle with /multi_link.",
        first_name
    ))
    .row(vec![
        Button::menu("📚 About", MenuPage::About),
        Button::menu("💡 How to use", MenuPage::Help),
    ])
    .row(vec![Button::menu("📂 My files", MenuPage::MyFiles)])
}

pub fn help() -> Reply {
    Reply::text(
        "💡 How to use\n\n\
         Single file:\n\
         • Send me any document, video, photo or audio file.\n\
         • To require a channel or add a title first: /create_link @channel Title\n\n\
         Bundle:\n\
         • Start with /multi_link @channel Title (both optional).\n\
         • Send or forward every file.\n\
         • Finish with /done.\n\n\
         Thumbnail:\n\
         • Reply to a photo with /set_thumbnail. Later files use it until /cancel_thumbnail.\n\n\
         Management:\n\
         • /myfiles lists your latest links.\n\
         • /delete <id or link> removes a link and its stored files.",
    )
    .row(vec![Button::menu("🔙 Back", MenuPage::Home)])
}

pub fn about() -> Reply {
    Reply::text(
        "📚 About\n\n\
         Files you send are kept in a private archive and shared through short links. \
         Anyone who opens a link receives a copy that is removed from their chat after an hour. \
         Links can require membership in a channel before anything is delivered.",
    )
    .row(vec![
        Button::menu("💡 How to use", MenuPage::Help),
        Button::menu("🔙 Back", MenuPage::Home),
    ])
}

pub fn my_files(items: &OwnedItems, bot: &BotIdentity) -> Reply {
    let back = vec![
        Button::menu("🔗 Required channels", MenuPage::Requirements),
        Button::menu("🔙 Back", MenuPage::Home),
    ];
    if items.references.is_empty() && items.bundles.is_empty() {
        return Reply::text(
            "😔 You have not shared anything yet. Send me a file or start a bundle with /multi_link.",
        )
        .row(back);
    }

    let mut text = String::from("📂 Your recent links\n");
    if !items.references.is_empty() {
        text.push_str("\nFiles:\n");
        for (i, reference) in items.references.iter().enumerate() {
            text.push_str(&format!(
                "{}. {} ({})\n   {}\n",
                i + 1,
                reference.display_name,
                reference.id,
                bot.share_link(&reference.id)
            ));
        }
    }
    if !items.bundles.is_empty() {
        text.push_str("\nBundles:\n");
        for (i, bundle) in items.bundles.iter().enumerate() {
            text.push_str(&format!(
                "{}. {} ({}, {} files)\n   {}\n",
                i + 1,
                bundle.display_name,
                bundle.id,
                bundle.pointers.len(),
                bot.share_link(&bundle.id)
            ));
        }
    }
    text.push_str("\nTo delete one: /delete <id>");
    Reply::text(text).row(back)
}

pub fn requirements(global: &BTreeSet<GroupHandle>) -> Reply {
    let back = vec![Button::menu("🔙 Back", MenuPage::MyFiles)];
    if global.is_empty() {
        return Reply::text("🔗 No channels are required to use this bot.").row(back);
    }
    let list: Vec<String> = global.iter().map(|g| format!("• {}", g)).collect();
    Reply::text(format!(
        "🔗 Everyone must be a member of:\n{}",
        list.join("\n")
    ))
    .row(back)
}

pub fn join_prompt(prompt: &JoinPrompt) -> Reply {
    let list: Vec<String> = prompt.missing.iter().map(|g| format!("• {}", g)).collect();
    let mut reply = Reply::text(format!(
        "🔒 Access restricted\n\nJoin the following to continue, then tap \"Try again\":\n{}",
        list.join("\n")
    ));
    for group in &prompt.missing {
        reply = reply.row(vec![Button::link(format!("🔗 Join {}", group), group_url(group))]);
    }
    reply.row(vec![Button::action("🔄 Try again", prompt.retry.clone())])
}

pub fn opened(opened: &Opened) -> Reply {
    let minutes = opened.expires_after.as_secs() / 60;
    let mut text = match opened.kind {
        ItemKind::Single => format!(
            "🎉 File unlocked! It will be removed from this chat in {} minutes.",
            minutes
        ),
        ItemKind::Bundle => format!(
            "📦 Bundle unlocked! Sent {} file(s) of \"{}\". They will be removed from this chat in {} minutes.",
            opened.delivered, opened.display_name, minutes
        ),
    };
    if opened.failed > 0 {
        text.push_str(&format!("\n\n⚠️ {} file(s) could not be sent.", opened.failed));
    }
    Reply::text(text)
}

pub fn session_started(session: &UploadSession) -> Reply {
    let mut text = if session.is_collecting() {
        String::from(
            "📦 Bundle mode on.\n\nSend or forward every file you want to include, then send /done.",
        )
    } else {
        String::from("📤 Ready. Send me the file now.")
    };
    if let Some(title) = &session.display_name {
        text.push_str(&format!("\n\nTitle: {}", title));
    }
    if let Some(group) = &session.requirement {
        text.push_str(&format!("\n🔒 Viewers must join {}.", group));
    }
    if session.thumbnail.is_some() {
        text.push_str("\n🖼️ Your custom thumbnail will be applied to compatible files.");
    }
    Reply::text(text)
}

pub fn appended(pending: usize) -> Reply {
    Reply::text(format!(
        "✅ Added to the bundle ({} so far). Send more, or /done to finish.",
        pending
    ))
}

pub fn issued(issued: &Issued) -> Reply {
    let (headline, label) = match issued.kind {
        ItemKind::Single => ("🎉 Link created!", "File"),
        ItemKind::Bundle => ("🎉 Bundle link created!", "Bundle"),
    };
    let mut text = format!(
        "{}\n\n{}: {}\nLink: {}",
        headline, label, issued.display_name, issued.link
    );
    if issued.kind == ItemKind::Bundle {
        text.push_str(&format!("\nFiles: {}", issued.items));
    }
    if issued.failed > 0 {
        text.push_str(&format!(
            "\n\n⚠️ {} file(s) could not be stored and were left out.",
            issued.failed
        ));
    }
    if let Some(group) = &issued.requirement {
        text.push_str(&format!("\n\n🔒 Viewers must join {}.", group));
    }
    if issued.thumbnail_applied {
        text.push_str("\n\n🖼️ Custom thumbnail requested.");
    }
    let share = share_url(&format!("{}: {}\nLink: {}", label, issued.display_name, issued.link));
    Reply::text(text).row(vec![Button::link("📤 Share link", share)])
}

pub fn thumbnail_set() -> Reply {
    Reply::text("🖼️ Thumbnail saved. It will be used for your next files until /cancel_thumbnail.")
}

pub fn thumbnail_usage() -> Reply {
    Reply::text("Reply to a photo with /set_thumbnail to use it as the thumbnail.")
}

pub fn thumbnail_cleared(was_set: bool) -> Reply {
    if was_set {
        Reply::text("🗑️ Custom thumbnail removed.")
    } else {
        Reply::text("No custom thumbnail was set.")
    }
}

pub fn delete_usage() -> Reply {
    Reply::text("Usage: /delete <id or link>")
}

pub fn delete_prompt(prompt: &DeletePrompt) -> Reply {
    let what = match prompt.kind {
        ItemKind::Single => "file".to_string(),
        ItemKind::Bundle => format!("bundle of {} files", prompt.items),
    };
    Reply::text(format!(
        "⚠️ Delete the {} \"{}\"? Its link will stop working and this cannot be undone.",
        what, prompt.display_name
    ))
    .row(vec![
        Button::action("🗑️ Confirm delete", prompt.confirm.clone()),
        Button::action("↩️ Cancel", prompt.cancel.clone()),
    ])
}

pub fn deleted(deleted: &Deleted) -> Reply {
    let mut text = format!("🗑️ {} \"{}\" deleted.", deleted.kind.label(), deleted.display_name);
    if deleted.content_already_gone {
        text.push_str("\nSome stored content was already gone.");
    }
    Reply::text(text)
}

pub fn delete_cancelled() -> Reply {
    Reply::text("Deletion cancelled.")
}

pub fn admin_panel(mode: OperatingMode) -> Reply {
    Reply::text("🛠️ Admin panel")
        .row(vec![
            Button::menu("📊 Stats", MenuPage::Stats),
            Button::menu(
                &format!("⚙️ Mode: {}", mode.as_str().to_uppercase()),
                MenuPage::Mode,
            ),
        ])
        .row(vec![Button::menu("📣 Broadcast", MenuPage::Broadcast)])
        .row(vec![Button::menu("✖️ Close", MenuPage::Close)])
}

pub fn mode_panel(mode: OperatingMode) -> Reply {
    Reply::text(format!(
        "⚙️ Current mode: {}\n\nPublic: anyone can create links.\nPrivate: only admins can.",
        mode.as_str().to_uppercase()
    ))
    .row(vec![Button::action(
        "🌍 Public",
        ActionToken::SetMode(OperatingMode::Public),
    )])
    .row(vec![Button::action(
        "🔒 Private",
        ActionToken::SetMode(OperatingMode::Private),
    )])
    .row(vec![Button::menu("🔙 Back", MenuPage::Admin)])
}

pub fn stats(stats: &Stats) -> Reply {
    let kinds = if stats.kinds.is_empty() {
        "  • none yet".to_string()
    } else {
        stats
            .kinds
            .iter()
            .map(|(kind, count)| format!("  • {}: {}", kind.as_str(), count))
            .collect::<Vec<_>>()
            .join("\n")
    };
    Reply::text(format!(
        "📊 Statistics\n\n\
         Users: {}\n\
         Active (24h): {}\n\n\
         Total items: {}\n\
         Single files: {}\n\
         Bundles: {}\n\
         Uploads (24h): {}\n\n\
         By kind:\n{}",
        stats.users,
        stats.active_users,
        stats.total_items(),
        stats.references,
        stats.bundles,
        stats.recent_uploads(),
        kinds
    ))
    .row(vec![Button::menu("🔙 Back", MenuPage::Admin)])
}

pub fn broadcast_help() -> Reply {
    Reply::text(
        "📣 Broadcast\n\nSend /broadcast <text>, or reply to any message with /broadcast to forward a copy to every user.",
    )
    .row(vec![Button::menu("🔙 Back", MenuPage::Admin)])
}

pub fn broadcast_queued() -> Reply {
    Reply::text("📣 Broadcast started. You will get a report when it finishes.")
}

pub fn broadcast_report(report: &BroadcastReport) -> String {
    format!(
        "📣 Broadcast finished.\nDelivered: {}\nFailed: {}",
        report.success, report.failure
    )
}

pub fn unknown_command() -> Reply {
    Reply::text("Unknown command. Send /help to see what I can do.")
}

/// Explanation for a rejected request
pub fn engine_error(err: &EngineError) -> Reply {
    let text = match err {
        EngineError::AccessDenied(Denial::Membership(prompt)) => return join_prompt(prompt),
        EngineError::AccessDenied(Denial::NotOperator) => {
            "❌ Only admins can do that.".to_string()
        }
        EngineError::AccessDenied(Denial::PrivateMode) => {
            "🔒 The bot is in private mode. Only admins can create links right now.".to_string()
        }
        EngineError::NotFound => {
            "🤔 Not found. The link may be wrong or the item was deleted.".to_string()
        }
        EngineError::ResourceLimitExceeded { limit } => format!(
            "❌ That file is too large. The limit is {} MiB.",
            limit / (1024 * 1024)
        ),
        EngineError::InvalidRequirement(reason) => format!(
            "❌ That channel can't be used: {}. Make sure it is public and the bot is a member.",
            reason
        ),
        EngineError::EmptyBundle => {
            "📦 The bundle is empty. Send some files first, then /done.".to_string()
        }
        EngineError::NotCollecting => {
            "No bundle in progress. Start one with /multi_link.".to_string()
        }
        other if other.is_retryable() => {
            "⏳ Something went wrong on our side. Please try again in a moment.".to_string()
        }
        other => format!("❌ {}", other),
    };
    Reply::text(text)
}

pub fn moderation_notice(name: &str, violation: &Violation, count: u32, max: u32) -> String {
    format!(
        "🚫 {}, your message was removed for {}. Warning {}/{}.",
        name,
        violation.reason(),
        count,
        max
    )
}

pub fn muted_notice(name: &str, max: u32) -> String {
    format!("🔇 {} has been muted after {} warnings.", name, max)
}

pub fn moderation_log(
    name: &str,
    user: i64,
    group: &str,
    chat: i64,
    violation: &Violation,
    muted: bool,
) -> String {
    let mut text = format!(
        "Message removed\n• User: {} ({})\n• Group: {} ({})\n• Reason: {}",
        name,
        user,
        group,
        chat,
        violation.reason()
    );
    if muted {
        text.push_str("\n• Action: muted");
    }
    text
}
