//! Short opaque reference identifiers.
//!
//! Ids are drawn uniformly from lowercase letters and digits. With eight
//! characters there are 36^8 (~2.8e12) candidates, so collisions at the
//! expected scale are rare and a handful of retries suffices.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::store::LinkStore;

pub const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
pub const ID_LENGTH: usize = 8;
/// Candidates tried before giving up
pub const MAX_ATTEMPTS: usize = 10;

const RETRY_PAUSE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReferenceId(String);

impl ReferenceId {
    /// A fresh random candidate. Uniqueness is not checked here.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let id = (0..ID_LENGTH)
            .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pull an id out of user input that may be a bare id or a full share link
    ///  (`...?start=<id>` or `...?ref=<id>`).
    pub fn extract(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let tail = ["start=", "ref="]
            .iter()
            .filter_map(|key| raw.rsplit_once(key).map(|(_, tail)| tail))
            .next()
            .unwrap_or(raw);
        let tail = tail.split(['&', '#']).next().unwrap_or(tail);
        tail.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid reference id: {0}")]
pub struct InvalidReferenceId(pub String);

impl FromStr for ReferenceId {
    type Err = InvalidReferenceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == ID_LENGTH && s.bytes().all(|b| ID_ALPHABET.contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidReferenceId(s.to_string()))
        }
    }
}

impl TryFrom<String> for ReferenceId {
    type Error = InvalidReferenceId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReferenceId> for String {
    fn from(id: ReferenceId) -> Self {
        id.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate an id that exists in neither the single nor the bundle namespace.
///
/// Nothing is reserved: the caller must insert promptly and treat an insert
/// conflict as a reason to generate again.
pub async fn generate<S: LinkStore>(store: &S) -> Result<ReferenceId, EngineError> {
    generate_with(store, ReferenceId::random).await
}

pub(crate) async fn generate_with<S, F>(
    store: &S,
    mut candidate: F,
) -> Result<ReferenceId, EngineError>
where
    S: LinkStore,
    F: FnMut() -> ReferenceId,
{
    for attempt in 0..MAX_ATTEMPTS {
        let id = candidate();
        if !store.id_exists(&id).await? {
            return Ok(id);
        }
        tracing::debug!(%id, attempt, "reference id collision");
        tokio::time::sleep(RETRY_PAUSE).await;
    }
    tracing::warn!("exhausted {} attempts generating a reference id", MAX_ATTEMPTS);
    Err(EngineError::GenerationExhausted)
}
