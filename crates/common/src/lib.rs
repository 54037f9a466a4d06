/**
 * Bounded fanout of a payload to every known user.
 */
pub mod broadcast;
/**
 * Batched removal of archived content and the
 *  two-step deletion types.
 */
pub mod deletion;
/**
 * Delivery of archived content to requesters and
 *  the registry of timers that expire delivered copies.
 */
pub mod delivery;
pub mod engine;
pub mod error;
/**
 * Membership gate: which required groups is a
 *  requester not provably a member of?
 */
pub mod gate;
/**
 * Short opaque reference ids and their generator.
 */
pub mod ids;
/**
 * Background job queue for work that must not
 *  hold up request handling.
 */
pub mod jobs;
pub mod mode;
pub mod model;
/**
 * Group chat moderation rules.
 */
pub mod moderation;
pub mod session;
/**
 * Storage seam: the `LinkStore` trait and an
 *  in-memory implementation.
 */
pub mod store;
/**
 * Callback tokens for interactive buttons.
 */
pub mod tokens;
/**
 * Messaging platform seam.
 */
pub mod transport;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub mod prelude {
    pub use crate::broadcast::{BroadcastPayload, BroadcastReport};
    pub use crate::engine::{
        Engine, EngineConfig, Issued, Opened, OwnedItems, Requester, SubmitOutcome, Submission,
    };
    pub use crate::error::{Denial, EngineError};
    pub use crate::gate::JoinPrompt;
    pub use crate::ids::ReferenceId;
    pub use crate::jobs::{Job, JobDispatcher, JobReceiver};
    pub use crate::model::{
        ChatId, ContentKind, ContentPointer, GroupHandle, ItemKind, OperatingMode, Stats, UserId,
    };
    pub use crate::store::{LinkStore, MemoryLinkStore, StoreError};
    pub use crate::tokens::{ActionToken, MenuPage};
    pub use crate::transport::{BotIdentity, Transport, TransportError};
    pub use crate::version::build_info;
}
