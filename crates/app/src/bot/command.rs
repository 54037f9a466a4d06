//! Slash-command parsing for private chats.

/// Arguments of `/create_link` and `/multi_link`: an optional `@group`
///  requirement followed by an optional title
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkArgs {
    pub group: Option<String>,
    pub title: Option<String>,
}

impl LinkArgs {
    fn parse(rest: &str) -> Self {
        let rest = rest.trim();
        let (group, title) = match rest.split_once(char::is_whitespace) {
            Some((first, tail)) if first.starts_with('@') => (Some(first), tail),
            None if rest.starts_with('@') => (Some(rest), ""),
            _ => (None, rest),
        };
        let title = title.trim();
        Self {
            group: group.map(str::to_string),
            title: (!title.is_empty()).then(|| title.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Welcome surface, or open the reference in the payload
    Start(Option<String>),
    Help,
    CreateLink(LinkArgs),
    MultiLink(LinkArgs),
    Done,
    SetThumbnail,
    CancelThumbnail,
    MyFiles,
    Delete(Option<String>),
    Admin,
    Stats,
    Broadcast(Option<String>),
    Unknown(String),
}

/// Parse a command message.
///
/// Returns `None` when the text is not a command, or is a command addressed
///  to a different bot (`/cmd@other_bot`). Hyphenated names are accepted as
///  aliases of their underscore forms.
pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let text = text.trim();
    let body = text.strip_prefix('/')?;
    let (head, rest) = match body.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (body, ""),
    };

    let name = match head.split_once('@') {
        Some((name, target)) => {
            let ours = bot_username.is_some_and(|bot| bot.eq_ignore_ascii_case(target));
            if !ours {
                return None;
            }
            name
        }
        None => head,
    };
    if name.is_empty() {
        return None;
    }

    let arg = || (!rest.is_empty()).then(|| rest.to_string());
    let command = match name.to_ascii_lowercase().replace('-', "_").as_str() {
        "start" => Command::Start(arg()),
        "help" => Command::Help,
        "create_link" => Command::CreateLink(LinkArgs::parse(rest)),
        "multi_link" => Command::MultiLink(LinkArgs::parse(rest)),
        "done" => Command::Done,
        "set_thumbnail" => Command::SetThumbnail,
        "cancel_thumbnail" => Command::CancelThumbnail,
        "myfiles" | "my_files" => Command::MyFiles,
        "delete" => Command::Delete(arg()),
        "admin" => Command::Admin,
        "stats" => Command::Stats,
        "broadcast" => Command::Broadcast(arg()),
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}
