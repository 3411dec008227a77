//! Shared error kinds for every core (§7).
//!
//! Adapter errors map to [`Error::DependencyFailed`] unless the adapter can
//! identify a more specific kind (a `Payments` adapter returning
//! [`Error::PaymentFailed`]). Validation happens before any mutation; the
//! state-check-and-mutate step is atomic per entity (§5), so a losing caller
//! only ever sees [`Error::InvalidState`] or [`Error::Conflict`] and no
//! partial side effects.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("not authorized")]
    NotAuthorized,

    #[error("invalid input at {pointer}: {reason}")]
    InvalidInput { pointer: String, reason: String },

    #[error("invalid state: cannot {action} from {from}")]
    InvalidState { from: String, action: String },

    #[error("conflict")]
    Conflict,

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("gone")]
    Gone,

    #[error("rate limited")]
    RateLimited,

    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_input(pointer: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            pointer: pointer.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(from: impl Into<String>, action: impl Into<String>) -> Self {
        Error::InvalidState {
            from: from.into(),
            action: action.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
