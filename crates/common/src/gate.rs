//! Membership gate.
//!
//! The gate answers one question: which of a set of groups is the requester
//! *not* provably a member of? Every lookup failure counts as "not a member"
//! so gated content is never released on a collaborator hiccup.

use std::collections::BTreeSet;

use futures::future::join_all;

use crate::ids::ReferenceId;
use crate::model::{GroupHandle, UserId};
use crate::tokens::ActionToken;
use crate::transport::Transport;

/// What a requester needs to do before retrying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPrompt {
    /// Groups the requester must join, sorted
    pub missing: Vec<GroupHandle>,
    /// Re-runs the same composite check, then completes the original request
    pub retry: ActionToken,
}

/// Evaluate membership of `user` in every group of `requirements`.
///
/// Duplicates are collapsed and the lookups run concurrently. Returns the
/// groups that are not satisfied; an empty set means access is granted.
pub async fn evaluate<T, I>(transport: &T, user: UserId, requirements: I) -> BTreeSet<GroupHandle>
where
    T: Transport + ?Sized,
    I: IntoIterator<Item = GroupHandle>,
{
    let requirements: BTreeSet<GroupHandle> = requirements.into_iter().collect();
    if requirements.is_empty() {
        return BTreeSet::new();
    }

    let lookups = requirements.into_iter().map(|group| async move {
        let satisfied = match transport.member_status(&group, user).await {
            Ok(status) => status.is_member(),
            Err(e) if e.is_absence() => false,
            Err(e) => {
                tracing::warn!(%group, user, error = %e, "membership lookup failed");
                false
            }
        };
        (group, satisfied)
    });

    join_all(lookups)
        .await
        .into_iter()
        .filter_map(|(group, satisfied)| (!satisfied).then_some(group))
        .collect()
}

/// Gate configured with the process-wide requirement set
#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    global: BTreeSet<GroupHandle>,
}

impl AccessGate {
    pub fn new(global: impl IntoIterator<Item = GroupHandle>) -> Self {
        Self {
            global: global.into_iter().collect(),
        }
    }

    pub fn global(&self) -> &BTreeSet<GroupHandle> {
        &self.global
    }

    /// Global requirements plus the one attached to a reference, if any
    pub fn requirements_for(&self, extra: Option<&GroupHandle>) -> BTreeSet<GroupHandle> {
        let mut all = self.global.clone();
        all.extend(extra.cloned());
        all
    }

    /// Check `user` against the composite requirement set.
    ///
    /// `target` is carried into the retry token so a successful retry can
    ///  finish the request that was blocked.
    pub async fn check<T: Transport + ?Sized>(
        &self,
        transport: &T,
        user: UserId,
        extra: Option<&GroupHandle>,
        target: Option<ReferenceId>,
    ) -> Result<(), JoinPrompt> {
        let missing = evaluate(transport, user, self.requirements_for(extra)).await;
        if missing.is_empty() {
            return Ok(());
        }
        tracing::debug!(user, missing = missing.len(), "access gate blocked request");
        Err(JoinPrompt {
            missing: missing.into_iter().collect(),
            retry: ActionToken::Retry(target),
        })
    }
}
