//! # Coroutine Locks
//!
//! Cooperative mutual exclusion per `(LockType, key)`. Waiting suspends the
//! calling task, never an OS thread.
//!
//! ## State Machine
//!
//! ```text
//!            wait()                  guard dropped, queue empty
//!   Idle ──────────────► Held(A) ─────────────────────────────► Idle (pruned)
//!                          │
//!                          │ guard dropped, B queued
//!                          ▼
//!                        Held(B)
//! ```
//!
//! A key is present in the index exactly while it is held, so an idle key
//! costs nothing. Dropping a guard hands the lock straight to the oldest
//! live waiter while the key stays held, which means a task arriving between
//! the release and the waiter's wake-up queues behind it instead of barging
//! in. The woken waiter runs on a later scheduler turn, not inside the
//! releasing call.
//!
//! A waiter that times out, is cancelled, or whose future is dropped leaves
//! the queue. If its grant arrived first it owns the lock: a timeout or
//! cancel then returns the guard anyway, and a dropped future passes the
//! lock on.

use crate::error::{LockError, LockResult};
use network::CancellationToken;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Lock namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockType {
    /// Location registry records
    Location,
    /// Ordered processing of one actor's mailbox
    Mailbox,
    /// Serialized sends to one location key
    ActorLocationSender,
    /// Persistence of one entity
    Database,
}

impl LockType {
    pub fn name(&self) -> &'static str {
        match self {
            LockType::Location => "location",
            LockType::Mailbox => "mailbox",
            LockType::ActorLocationSender => "actor_location_sender",
            LockType::Database => "database",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type LockKey = (LockType, i64);

struct Waiter {
    ticket: u64,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct Shared {
    /// Held keys and their FIFO waiters
    queues: Mutex<HashMap<LockKey, VecDeque<Waiter>>>,
    next_ticket: AtomicU64,
}

impl Shared {
    fn release(&self, lock_key: LockKey) {
        let mut queues = self.queues.lock();
        let Entry::Occupied(mut entry) = queues.entry(lock_key) else {
            return;
        };
        while let Some(waiter) = entry.get_mut().pop_front() {
            // A failed send means the waiter's future is gone
            if waiter.grant.send(()).is_ok() {
                trace!(lock_type = %lock_key.0, key = lock_key.1, ticket = waiter.ticket, "Lock handed off");
                return;
            }
        }
        entry.remove();
        trace!(lock_type = %lock_key.0, key = lock_key.1, "Lock idle");
    }
}

/// Index of coroutine lock queues
///
/// Cheap to clone; clones share the same queues.
#[derive(Clone, Default)]
pub struct CoroutineLockManager {
    shared: Arc<Shared>,
}

impl CoroutineLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `(lock_type, key)`, waiting at most `timeout`
    pub async fn wait(&self, lock_type: LockType, key: i64, timeout: Duration) -> LockResult<LockGuard> {
        self.acquire(lock_type, key, timeout, None).await
    }

    /// [`wait`](Self::wait) that also gives up once `cancel` fires
    pub async fn wait_with_cancel(
        &self,
        lock_type: LockType,
        key: i64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> LockResult<LockGuard> {
        if cancel.is_cancelled() {
            return Err(LockError::Cancelled { lock_type, key });
        }
        self.acquire(lock_type, key, timeout, Some(cancel)).await
    }

    async fn acquire(
        &self,
        lock_type: LockType,
        key: i64,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> LockResult<LockGuard> {
        let lock_key = (lock_type, key);
        let mut pending = {
            let mut queues = self.shared.queues.lock();
            match queues.entry(lock_key) {
                Entry::Vacant(entry) => {
                    entry.insert(VecDeque::new());
                    return Ok(self.guard(lock_key));
                }
                Entry::Occupied(mut entry) => {
                    let ticket = self.shared.next_ticket.fetch_add(1, Ordering::Relaxed);
                    let (grant, granted) = oneshot::channel();
                    entry.get_mut().push_back(Waiter { ticket, grant });
                    PendingWait {
                        manager: self.clone(),
                        lock_key,
                        ticket,
                        granted,
                        settled: false,
                    }
                }
            }
        };
        debug!(%lock_type, key, ticket = pending.ticket, "Waiting for lock");

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let failure = tokio::select! {
            biased;
            granted = &mut pending.granted => {
                pending.settled = true;
                return match granted {
                    Ok(()) => Ok(self.guard(lock_key)),
                    Err(_) => Err(LockError::Cancelled { lock_type, key }),
                };
            }
            _ = cancelled => LockError::Cancelled { lock_type, key },
            _ = tokio::time::sleep(timeout) => LockError::Timeout { lock_type, key, timeout },
        };

        match pending.abandon() {
            Some(guard) => Ok(guard),
            None => {
                debug!(%lock_type, key, "Lock wait failed: {}", failure);
                Err(failure)
            }
        }
    }

    fn guard(&self, lock_key: LockKey) -> LockGuard {
        LockGuard {
            shared: self.shared.clone(),
            lock_key,
        }
    }

    /// Whether `(lock_type, key)` currently has a holder
    pub fn is_held(&self, lock_type: LockType, key: i64) -> bool {
        self.shared.queues.lock().contains_key(&(lock_type, key))
    }

    /// Number of tasks queued behind the holder of `(lock_type, key)`
    pub fn waiters(&self, lock_type: LockType, key: i64) -> usize {
        self.shared
            .queues
            .lock()
            .get(&(lock_type, key))
            .map_or(0, VecDeque::len)
    }

    /// Number of held keys across all lock types
    pub fn held_count(&self) -> usize {
        self.shared.queues.lock().len()
    }
}

impl fmt::Debug for CoroutineLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineLockManager")
            .field("held", &self.held_count())
            .finish()
    }
}

/// Proof of holding one coroutine lock; dropping it releases the lock exactly once
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    shared: Arc<Shared>,
    lock_key: LockKey,
}

impl LockGuard {
    pub fn lock_type(&self) -> LockType {
        self.lock_key.0
    }

    pub fn key(&self) -> i64 {
        self.lock_key.1
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.shared.release(self.lock_key);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock_type", &self.lock_key.0)
            .field("key", &self.lock_key.1)
            .finish()
    }
}

/// A queued waiter; cleans up after itself if the wait is abandoned
struct PendingWait {
    manager: CoroutineLockManager,
    lock_key: LockKey,
    ticket: u64,
    granted: oneshot::Receiver<()>,
    settled: bool,
}

impl PendingWait {
    /// Leave the queue; returns the guard if the grant won the race
    fn abandon(&mut self) -> Option<LockGuard> {
        self.settled = true;
        {
            let mut queues = self.manager.shared.queues.lock();
            if let Some(waiters) = queues.get_mut(&self.lock_key) {
                if let Some(pos) = waiters.iter().position(|w| w.ticket == self.ticket) {
                    waiters.remove(pos);
                    return None;
                }
            }
        }
        // Not queued any more: the grant was sent while we held no lock
        match self.granted.try_recv() {
            Ok(()) => Some(self.manager.guard(self.lock_key)),
            Err(_) => None,
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if !self.settled {
            drop(self.abandon());
        }
    }
}
