//! Compact action tokens carried by interactive buttons.
//!
//! Tokens are plain strings so they fit the transport's callback payload
//!  limit. Parsing is strict: unknown tokens are rejected rather than guessed.

use std::fmt;
use std::str::FromStr;

use crate::ids::ReferenceId;
use crate::model::{ItemKind, OperatingMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionToken {
    /// Re-check membership, then open the reference if one is given
    Retry(Option<ReferenceId>),
    ConfirmDelete { id: ReferenceId, kind: ItemKind },
    CancelDelete,
    SetMode(OperatingMode),
    /// Navigate to a named menu page
    Menu(MenuPage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuPage {
    Home,
    Help,
    About,
    MyFiles,
    /// Global access requirements
    Requirements,
    /// Operator panel
    Admin,
    Stats,
    Mode,
    Broadcast,
    Close,
}

impl MenuPage {
    const ALL: [MenuPage; 10] = [
        MenuPage::Home,
        MenuPage::Help,
        MenuPage::About,
        MenuPage::MyFiles,
        MenuPage::Requirements,
        MenuPage::Admin,
        MenuPage::Stats,
        MenuPage::Mode,
        MenuPage::Broadcast,
        MenuPage::Close,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            MenuPage::Home => "home",
            MenuPage::Help => "help",
            MenuPage::About => "about",
            MenuPage::MyFiles => "files",
            MenuPage::Requirements => "reqs",
            MenuPage::Admin => "admin",
            MenuPage::Stats => "stats",
            MenuPage::Mode => "mode",
            MenuPage::Broadcast => "bcast",
            MenuPage::Close => "close",
        }
    }

    /// Pages only operators may open
    pub fn is_operator_only(&self) -> bool {
        matches!(
            self,
            MenuPage::Admin | MenuPage::Stats | MenuPage::Mode | MenuPage::Broadcast
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid action token: {0}")]
pub struct InvalidToken(pub String);

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionToken::Retry(None) => f.write_str("retry"),
            ActionToken::Retry(Some(id)) => write!(f, "retry:{}", id),
            ActionToken::ConfirmDelete { id, kind } => {
                let kind = match kind {
                    ItemKind::Single => "s",
                    ItemKind::Bundle => "b",
                };
                write!(f, "del:{}:{}", id, kind)
            }
            ActionToken::CancelDelete => f.write_str("undel"),
            ActionToken::SetMode(mode) => write!(f, "mode:{}", mode),
            ActionToken::Menu(page) => write!(f, "menu:{}", page.as_str()),
        }
    }
}

impl FromStr for ActionToken {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidToken(s.to_string());
        let mut parts = s.split(':');
        let head = parts.next().ok_or_else(invalid)?;
        let rest: Vec<&str> = parts.collect();

        let token = match (head, rest.as_slice()) {
            ("retry", []) => ActionToken::Retry(None),
            ("retry", [id]) => ActionToken::Retry(Some(id.parse().map_err(|_| invalid())?)),
            ("del", [id, kind]) => {
                let kind = match *kind {
                    "s" => ItemKind::Single,
                    "b" => ItemKind::Bundle,
                    _ => return Err(invalid()),
                };
                ActionToken::ConfirmDelete {
                    id: id.parse().map_err(|_| invalid())?,
                    kind,
                }
            }
            ("undel", []) => ActionToken::CancelDelete,
            ("mode", [mode]) => ActionToken::SetMode(mode.parse().map_err(|_| invalid())?),
            ("menu", [page]) => ActionToken::Menu(
                MenuPage::ALL
                    .into_iter()
                    .find(|p| p.as_str() == *page)
                    .ok_or_else(invalid)?,
            ),
            _ => return Err(invalid()),
        };
        Ok(token)
    }
}
