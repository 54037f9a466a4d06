use std::collections::BTreeSet;

use crate::error::{Denial, EngineError};
use crate::model::{OperatingMode, UserId};
use crate::store::LinkStore;

/// Process-wide public/private toggle and the operator set that may flip it
#[derive(Debug, Clone, Default)]
pub struct ModeController {
    operators: BTreeSet<UserId>,
}

impl ModeController {
    pub fn new(operators: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            operators: operators.into_iter().collect(),
        }
    }

    pub fn is_operator(&self, user: UserId) -> bool {
        self.operators.contains(&user)
    }

    pub fn operators(&self) -> &BTreeSet<UserId> {
        &self.operators
    }

    /// The persisted mode. The first read persists the `Public` default.
    pub async fn get_mode<S: LinkStore>(&self, store: &S) -> Result<OperatingMode, EngineError> {
        if let Some(mode) = store.mode().await? {
            return Ok(mode);
        }
        let mode = OperatingMode::default();
        store.set_mode(mode).await?;
        Ok(mode)
    }

    pub async fn set_mode<S: LinkStore>(
        &self,
        store: &S,
        actor: UserId,
        mode: OperatingMode,
    ) -> Result<(), EngineError> {
        if !self.is_operator(actor) {
            tracing::warn!(actor, %mode, "non-operator attempted to change the mode");
            return Err(EngineError::AccessDenied(Denial::NotOperator));
        }
        store.set_mode(mode).await?;
        tracing::info!(actor, %mode, "operating mode changed");
        Ok(())
    }

    /// Fails with `PrivateMode` when uploads are closed to `user`
    pub async fn ensure_may_upload<S: LinkStore>(
        &self,
        store: &S,
        user: UserId,
    ) -> Result<(), EngineError> {
        if self.is_operator(user) {
            return Ok(());
        }
        match self.get_mode(store).await? {
            OperatingMode::Public => Ok(()),
            OperatingMode::Private => Err(EngineError::AccessDenied(Denial::PrivateMode)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLinkStore;

    #[tokio::test]
    async fn test_first_read_defaults_and_persists_public() {
        let store = MemoryLinkStore::new();
        let modes = ModeController::new([1]);
        assert_eq!(store.mode().await.unwrap(), None);
        assert_eq!(modes.get_mode(&store).await.unwrap(), OperatingMode::Public);
        assert_eq!(store.mode().await.unwrap(), Some(OperatingMode::Public));
    }

    #[tokio::test]
    async fn test_non_operator_cannot_change_mode() {
        let store = MemoryLinkStore::new();
        let modes = ModeController::new([1]);

        let result = modes.set_mode(&store, 2, OperatingMode::Private).await;
        assert!(matches!(
            result,
            Err(EngineError::AccessDenied(Denial::NotOperator))
        ));
        assert_eq!(modes.get_mode(&store).await.unwrap(), OperatingMode::Public);

        modes.set_mode(&store, 1, OperatingMode::Private).await.unwrap();
        assert_eq!(modes.get_mode(&store).await.unwrap(), OperatingMode::Private);
    }

    #[tokio::test]
    async fn test_private_mode_blocks_uploads_for_non_operators() {
        let store = MemoryLinkStore::new();
        let modes = ModeController::new([1]);
        modes.ensure_may_upload(&store, 2).await.unwrap();

        store.set_mode(OperatingMode::Private).await.unwrap();
        assert!(matches!(
            modes.ensure_may_upload(&store, 2).await,
            Err(EngineError::AccessDenied(Denial::PrivateMode))
        ));
        modes.ensure_may_upload(&store, 1).await.unwrap();
    }
}
