use std::fmt::{self, Display};

use crate::gate::JoinPrompt;
use crate::store::StoreError;

/// Why a requester was turned away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// One or more membership requirements are not satisfied
    Membership(JoinPrompt),
    /// The action is reserved for operators
    NotOperator,
    /// Uploads are closed to non-operators
    PrivateMode,
}

impl Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Membership(prompt) => {
                let missing: Vec<String> = prompt.missing.iter().map(|g| g.to_string()).collect();
                write!(f, "missing membership in {}", missing.join(", "))
            }
            Denial::NotOperator => f.write_str("operator permission required"),
            Denial::PrivateMode => f.write_str("uploads are restricted to operators"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Reference or bundle absent, or not owned by the caller
    #[error("reference not found")]
    NotFound,
    #[error("access denied: {0}")]
    AccessDenied(Denial),
    #[error("item exceeds the size limit of {limit} bytes")]
    ResourceLimitExceeded { limit: u64 },
    #[error("failed to generate a unique reference id")]
    GenerationExhausted,
    #[error("delivery failed: {0}")]
    DeliveryFailure(String),
    #[error("external service error: {0}")]
    ExternalTransient(String),
    #[error("invalid access requirement: {0}")]
    InvalidRequirement(String),
    #[error("no items have been added to the bundle")]
    EmptyBundle,
    #[error("no bundle is being collected")]
    NotCollecting,
    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Whether the owner may simply try the same request again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::GenerationExhausted
                | EngineError::ExternalTransient(_)
                | EngineError::DeliveryFailure(_)
                | EngineError::Store(_)
        )
    }
}

impl<T: Display> From<StoreError<T>> for EngineError {
    fn from(err: StoreError<T>) -> Self {
        EngineError::Store(err.to_string())
    }
}
