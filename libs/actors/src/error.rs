//! Actor runtime errors

use crate::coroutine_lock::LockType;
use codec::error_code::{ERR_LOCK_CANCELLED, ERR_LOCK_TIMEOUT};
use std::time::Duration;
use thiserror::Error;
use types::Address;

/// Failure to obtain a coroutine lock
///
/// Neither variant affects the current holder of the lock.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock {lock_type}:{key} not granted within {timeout:?}")]
    Timeout {
        lock_type: LockType,
        key: i64,
        timeout: Duration,
    },

    #[error("Wait for lock {lock_type}:{key} cancelled")]
    Cancelled { lock_type: LockType, key: i64 },
}

impl LockError {
    /// Wire error code for this failure
    pub fn code(&self) -> i32 {
        match self {
            LockError::Timeout { .. } => ERR_LOCK_TIMEOUT,
            LockError::Cancelled { .. } => ERR_LOCK_CANCELLED,
        }
    }
}

/// Fiber lifecycle and entity bookkeeping errors
#[derive(Debug, Error)]
pub enum FiberError {
    /// Another live fiber is already bound to this address
    #[error("Address {address} is already bound to a live fiber")]
    AddressInUse { address: Address },

    #[error("Failed to start fiber {address}: {source}")]
    Runtime {
        address: Address,
        #[source]
        source: std::io::Error,
    },

    /// The fiber's work queue is closed
    #[error("Fiber {address} has stopped")]
    Stopped { address: Address },

    #[error("Unknown entity {instance}")]
    UnknownEntity { instance: i64 },

    #[error("Entity {instance} already exists")]
    DuplicateEntity { instance: i64 },
}

pub type LockResult<T> = std::result::Result<T, LockError>;
pub type Result<T> = std::result::Result<T, FiberError>;
