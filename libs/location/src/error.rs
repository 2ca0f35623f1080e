//! Location errors
//!
//! Each variant has a wire code so the registry can answer with it and the
//! proxy can turn it back into the same variant on the caller's side.

use actors::LockError;
use codec::error_code::{
    self, ERR_LOCATION_LOCKED, ERR_LOCATION_NOT_FOUND, ERR_LOCATION_NOT_LOCKED,
    ERR_LOCATION_OWNER_MISMATCH, ERR_LOCK_TIMEOUT, ERR_NOT_FOUND_ACTOR,
};
use network::TransportError;
use thiserror::Error;
use types::LocationKey;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Location {key} not found")]
    NotFound { key: LocationKey },

    /// Another actor holds the migration lock for this key
    #[error("Location {key} is locked by a pending migration")]
    Locked { key: LocationKey },

    /// UnLock named a different old owner than the one that locked the key
    #[error("Location {key} owner mismatch on unlock")]
    OwnerMismatch { key: LocationKey },

    #[error("Location {key} is not locked")]
    NotLocked { key: LocationKey },

    #[error("Timed out waiting for the lock on location {key}")]
    LockTimeout { key: LocationKey },

    /// The resolved actor kept answering not-found after every retry
    #[error("No live actor for location {key} after {attempts} attempts")]
    ActorNotFound { key: LocationKey, attempts: u32 },

    /// Registry answered with a code that has no dedicated variant
    #[error("Registry rejected location {key}: {} ({code})", code_name(.code))]
    Rejected { key: LocationKey, code: i32 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl LocationError {
    /// Wire error code for this failure
    pub fn code(&self) -> i32 {
        match self {
            LocationError::NotFound { .. } => ERR_LOCATION_NOT_FOUND,
            LocationError::Locked { .. } => ERR_LOCATION_LOCKED,
            LocationError::OwnerMismatch { .. } => ERR_LOCATION_OWNER_MISMATCH,
            LocationError::NotLocked { .. } => ERR_LOCATION_NOT_LOCKED,
            LocationError::LockTimeout { .. } => ERR_LOCK_TIMEOUT,
            LocationError::ActorNotFound { .. } => ERR_NOT_FOUND_ACTOR,
            LocationError::Rejected { code, .. } => *code,
            LocationError::Transport(e) => e.code(),
        }
    }

    /// Rebuild the error the registry reported as `code`
    pub fn from_code(key: LocationKey, code: i32) -> Self {
        match code {
            ERR_LOCATION_NOT_FOUND => LocationError::NotFound { key },
            ERR_LOCATION_LOCKED => LocationError::Locked { key },
            ERR_LOCATION_OWNER_MISMATCH => LocationError::OwnerMismatch { key },
            ERR_LOCATION_NOT_LOCKED => LocationError::NotLocked { key },
            ERR_LOCK_TIMEOUT => LocationError::LockTimeout { key },
            code => LocationError::Rejected { key, code },
        }
    }

    pub(crate) fn from_lock(key: LocationKey, error: LockError) -> Self {
        match error {
            LockError::Timeout { .. } => LocationError::LockTimeout { key },
            LockError::Cancelled { .. } => LocationError::Rejected {
                key,
                code: error.code(),
            },
        }
    }
}

fn code_name(code: &i32) -> &'static str {
    error_code::describe(*code)
}

pub type Result<T> = std::result::Result<T, LocationError>;

/// `Ok` for a success code, the matching [`LocationError`] otherwise
pub(crate) fn check(key: LocationKey, code: i32) -> Result<()> {
    if code == error_code::ERR_SUCCESS {
        Ok(())
    } else {
        Err(LocationError::from_code(key, code))
    }
}
