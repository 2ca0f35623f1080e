//! # Location Registry
//!
//! Authoritative map from `(LocationType, LocationKey)` to the actor that
//! currently owns the key.
//!
//! ## Migration
//!
//! ```text
//!   Add(k, A) ──► owner A
//!   Lock(k, A, t) ──► coroutine lock held on behalf of A; Get still returns A
//!   UnLock(k, A, B) ──► owner B, lock released
//!                  └─ old != A: rejected, owner stays A, lock stays held
//!   t elapses before UnLock ──► lock force-expired, owner stays A
//! ```
//!
//! Mutations of a key run while its coroutine lock is held. `Lock` keeps
//! the guard in the record's [`LockInfo`] until `UnLock` or expiry, so
//! `Remove` and other `Lock` calls for that key queue behind the migration.
//! `Get` never queues: it serves the current owner, which during a migration
//! is the pre-migration one.
//!
//! An `Add` that had to queue for the coroutine lock is rejected if a `Lock`
//! was granted for the key while it waited, so it can never overwrite the
//! owner committed by that migration.

use crate::error::{LocationError, Result};
use actors::{CoroutineLockManager, LockGuard, LockType, TimerService};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use types::{ActorId, LocationKey, LocationType};

/// Registry runtime settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long Add/Lock/Remove wait for a key's coroutine lock
    pub lock_wait_timeout: Duration,
    /// Force-expiry for `Lock` requests that pass a time of 0
    pub default_lock_time: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_wait_timeout: Duration::from_secs(10),
            default_lock_time: Duration::from_secs(60),
        }
    }
}

type RecordKey = (LocationType, LocationKey);

/// An in-progress migration
struct LockInfo {
    owner: ActorId,
    generation: u64,
    _guard: LockGuard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub records: usize,
    pub locked: usize,
}

/// Records and migrations change together under one guard
#[derive(Default)]
struct State {
    records: HashMap<RecordKey, ActorId>,
    locks: HashMap<RecordKey, LockInfo>,
    /// Generation of the last `Lock` granted per key; never pruned
    migrations: HashMap<RecordKey, u64>,
}

impl State {
    fn last_migration(&self, record: &RecordKey) -> u64 {
        self.migrations.get(record).copied().unwrap_or(0)
    }
}

struct Inner {
    config: RegistryConfig,
    timer: Arc<dyn TimerService>,
    /// One lock namespace per location type
    lock_managers: Mutex<HashMap<LocationType, CoroutineLockManager>>,
    state: Mutex<State>,
    generation: AtomicU64,
}

/// Shared handle to one registry
#[derive(Clone)]
pub struct LocationRegistry {
    inner: Arc<Inner>,
}

impl LocationRegistry {
    pub fn new(config: RegistryConfig, timer: Arc<dyn TimerService>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                timer,
                lock_managers: Mutex::new(HashMap::new()),
                state: Mutex::new(State::default()),
                generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn manager(&self, location_type: LocationType) -> CoroutineLockManager {
        self.inner
            .lock_managers
            .lock()
            .entry(location_type)
            .or_default()
            .clone()
    }

    async fn wait_key(&self, location_type: LocationType, key: LocationKey) -> Result<LockGuard> {
        self.manager(location_type)
            .wait(LockType::Location, key.inner(), self.inner.config.lock_wait_timeout)
            .await
            .map_err(|e| LocationError::from_lock(key, e))
    }

    /// Register `actor_id` as the owner of `key`
    ///
    /// Rejected with [`LocationError::Locked`] while another actor is
    /// migrating the key. The migrating actor itself may re-add.
    pub async fn add(&self, location_type: LocationType, key: LocationKey, actor_id: ActorId) -> Result<()> {
        let record = (location_type, key);
        let seen = {
            let mut state = self.inner.state.lock();
            match state.locks.get(&record).map(|info| info.owner) {
                Some(owner) if owner != actor_id => {
                    debug!(%location_type, %key, %actor_id, %owner, "Add rejected, key is locked");
                    return Err(LocationError::Locked { key });
                }
                // Already serialized by the migration's lock
                Some(_) => {
                    state.records.insert(record, actor_id);
                    debug!(%location_type, %key, %actor_id, "Location added by migrating owner");
                    return Ok(());
                }
                None => state.last_migration(&record),
            }
        };

        let _guard = self.wait_key(location_type, key).await?;
        let mut state = self.inner.state.lock();
        if state.last_migration(&record) != seen {
            debug!(%location_type, %key, %actor_id, "Add rejected, key was migrated while queued");
            return Err(LocationError::Locked { key });
        }
        state.records.insert(record, actor_id);
        debug!(%location_type, %key, %actor_id, "Location added");
        Ok(())
    }

    /// Current owner of `key`
    pub fn get(&self, location_type: LocationType, key: LocationKey) -> Option<ActorId> {
        self.inner.state.lock().records.get(&(location_type, key)).copied()
    }

    /// Start migrating `key` on behalf of `actor_id`
    ///
    /// Waits for the key's coroutine lock and keeps it until
    /// [`unlock`](Self::unlock) or until `time` elapses (zero uses the
    /// configured default).
    pub async fn lock(
        &self,
        location_type: LocationType,
        key: LocationKey,
        actor_id: ActorId,
        time: Duration,
    ) -> Result<()> {
        let guard = self.wait_key(location_type, key).await?;
        let time = if time.is_zero() {
            self.inner.config.default_lock_time
        } else {
            time
        };

        let record = (location_type, key);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.inner.state.lock();
            state.migrations.insert(record, generation);
            state.locks.insert(
                record,
                LockInfo {
                    owner: actor_id,
                    generation,
                    _guard: guard,
                },
            );
        }
        info!(%location_type, %key, %actor_id, generation, ?time, "Location locked");

        let weak = Arc::downgrade(&self.inner);
        let timer = self.inner.timer.clone();
        tokio::spawn(async move {
            timer.wait_for(time).await;
            expire(weak, record, generation);
        });
        Ok(())
    }

    /// Finish the migration of `key`: hand ownership from `old` to `new`
    ///
    /// A request naming the wrong `old` owner is rejected and leaves both the
    /// mapping and the lock as they were.
    pub fn unlock(
        &self,
        location_type: LocationType,
        key: LocationKey,
        old: ActorId,
        new: ActorId,
    ) -> Result<()> {
        let record = (location_type, key);
        let mut state = self.inner.state.lock();
        let Some(info) = state.locks.get(&record) else {
            warn!(%location_type, %key, %old, %new, "UnLock without an active lock");
            return Err(LocationError::NotLocked { key });
        };
        if info.owner != old {
            warn!(
                %location_type,
                %key,
                locked_by = %info.owner,
                claimed = %old,
                %new,
                "UnLock rejected, owner mismatch"
            );
            return Err(LocationError::OwnerMismatch { key });
        }

        // Commit while the guard is still held, then release it
        let info = state.locks.remove(&record);
        state.records.insert(record, new);
        drop(state);
        drop(info);
        info!(%location_type, %key, %old, %new, "Location unlocked");
        Ok(())
    }

    /// Forget `key`; queues behind an in-progress migration
    pub async fn remove(&self, location_type: LocationType, key: LocationKey) -> Result<()> {
        let _guard = self.wait_key(location_type, key).await?;
        let removed = self.inner.state.lock().records.remove(&(location_type, key));
        match removed {
            Some(actor_id) => debug!(%location_type, %key, %actor_id, "Location removed"),
            None => debug!(%location_type, %key, "Remove of unknown location"),
        }
        Ok(())
    }

    pub fn is_locked(&self, location_type: LocationType, key: LocationKey) -> bool {
        self.inner.state.lock().locks.contains_key(&(location_type, key))
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.inner.state.lock();
        RegistryStats {
            records: state.records.len(),
            locked: state.locks.len(),
        }
    }
}

/// Force-release a lock whose holder never called UnLock
fn expire(inner: Weak<Inner>, record: RecordKey, generation: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let expired = {
        let mut state = inner.state.lock();
        match state.locks.get(&record) {
            Some(info) if info.generation == generation => state.locks.remove(&record),
            _ => None,
        }
    };
    if let Some(info) = expired {
        warn!(
            location_type = %record.0,
            key = %record.1,
            owner = %info.owner,
            generation,
            "Location lock expired before UnLock"
        );
    }
}

impl std::fmt::Debug for LocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationRegistry")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actors::TokioTimer;
    use futures::poll;
    use tokio::task::yield_now;
    use tracing_test::traced_test;
    use types::Address;

    const T: LocationType = LocationType::DEFAULT;

    fn actor(process: i32, fiber: i32, instance: i64) -> ActorId {
        ActorId::new(Address::new(process, fiber), instance)
    }

    fn registry() -> LocationRegistry {
        LocationRegistry::new(
            RegistryConfig {
                lock_wait_timeout: Duration::from_millis(500),
                default_lock_time: Duration::from_secs(5),
            },
            TokioTimer::shared(),
        )
    }

    async fn settle() {
        for _ in 0..8 {
            yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let registry = registry();
        let key = LocationKey::new(100);
        let a = actor(1, 1, 1);

        assert_eq!(registry.get(T, key), None);
        registry.add(T, key, a).await.unwrap();
        assert_eq!(registry.get(T, key), Some(a));

        // Overwrite
        let b = actor(1, 2, 2);
        registry.add(T, key, b).await.unwrap();
        assert_eq!(registry.get(T, key), Some(b));

        registry.remove(T, key).await.unwrap();
        assert_eq!(registry.get(T, key), None);
        // Removing again is not an error
        registry.remove(T, key).await.unwrap();
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_migration_commits_new_owner() {
        let registry = registry();
        let key = LocationKey::new(100);
        let old = actor(1, 1, 1);
        let new = actor(2, 3, 9);

        registry.add(T, key, old).await.unwrap();
        registry.lock(T, key, old, Duration::from_millis(5000)).await.unwrap();
        assert!(registry.is_locked(T, key));

        // Mid-migration reads still see the pre-migration owner
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get(T, key) })
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), Some(old));
        }

        registry.unlock(T, key, old, new).unwrap();
        assert_eq!(registry.get(T, key), Some(new));
        assert!(!registry.is_locked(T, key));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_owner_mismatch_is_rejected_and_logged() {
        let registry = registry();
        let key = LocationKey::new(7);
        let owner = actor(1, 1, 1);
        registry.add(T, key, owner).await.unwrap();
        registry.lock(T, key, owner, Duration::ZERO).await.unwrap();

        let err = registry.unlock(T, key, actor(1, 1, 99), actor(2, 2, 2)).unwrap_err();
        assert!(matches!(err, LocationError::OwnerMismatch { .. }));
        assert_eq!(registry.get(T, key), Some(owner));
        assert!(registry.is_locked(T, key));
        assert!(logs_contain("owner mismatch"));

        // The real owner can still finish
        registry.unlock(T, key, owner, actor(2, 2, 2)).unwrap();
        assert_eq!(registry.get(T, key), Some(actor(2, 2, 2)));
    }

    #[tokio::test]
    async fn test_unlock_without_lock() {
        let registry = registry();
        let key = LocationKey::new(8);
        registry.add(T, key, actor(1, 1, 1)).await.unwrap();
        let err = registry.unlock(T, key, actor(1, 1, 1), actor(1, 1, 2)).unwrap_err();
        assert!(matches!(err, LocationError::NotLocked { .. }));
        assert_eq!(registry.get(T, key), Some(actor(1, 1, 1)));
    }

    #[tokio::test]
    async fn test_add_while_locked() {
        let registry = registry();
        let key = LocationKey::new(9);
        let owner = actor(1, 1, 1);
        registry.add(T, key, owner).await.unwrap();
        registry.lock(T, key, owner, Duration::ZERO).await.unwrap();

        let err = registry.add(T, key, actor(3, 3, 3)).await.unwrap_err();
        assert!(matches!(err, LocationError::Locked { .. }));
        assert_eq!(registry.get(T, key), Some(owner));

        // The migrating actor may refresh its own record
        registry.add(T, key, owner).await.unwrap();
        assert!(registry.is_locked(T, key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_queued_across_lock_handoff_is_rejected() {
        let registry = registry();
        let key = LocationKey::new(13);
        let (a, b, b2, stray) = (actor(1, 1, 1), actor(2, 1, 1), actor(2, 2, 2), actor(9, 9, 9));
        registry.add(T, key, a).await.unwrap();
        registry.lock(T, key, a, Duration::from_secs(5)).await.unwrap();

        let next = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lock(T, key, b, Duration::from_secs(5)).await })
        };
        settle().await;

        // The coroutine lock now belongs to B's request, which has not run yet
        registry.unlock(T, key, a, b).unwrap();
        assert!(!registry.is_locked(T, key));
        let mut add = Box::pin(registry.add(T, key, stray));
        assert!(poll!(&mut add).is_pending());

        next.await.unwrap().unwrap();
        assert!(registry.is_locked(T, key));
        registry.unlock(T, key, b, b2).unwrap();

        let err = add.await.unwrap_err();
        assert!(matches!(err, LocationError::Locked { .. }), "{err}");
        assert_eq!(registry.get(T, key), Some(b2));
        assert!(!registry.is_locked(T, key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_queued_behind_remove_succeeds() {
        let registry = registry();
        let key = LocationKey::new(14);
        let a = actor(1, 1, 1);
        registry.add(T, key, a).await.unwrap();
        registry.lock(T, key, a, Duration::from_secs(5)).await.unwrap();

        let remove = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.remove(T, key).await })
        };
        settle().await;
        registry.unlock(T, key, a, a).unwrap();

        // Queues behind the Remove; no migration is granted in between
        let b = actor(2, 1, 1);
        let mut add = Box::pin(registry.add(T, key, b));
        assert!(poll!(&mut add).is_pending());
        remove.await.unwrap().unwrap();
        add.await.unwrap();
        assert_eq!(registry.get(T, key), Some(b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_add_after_expiry_respects_next_migration() {
        let registry = registry();
        let key = LocationKey::new(15);
        let (a, b) = (actor(1, 1, 1), actor(2, 1, 1));
        registry.add(T, key, a).await.unwrap();
        registry.lock(T, key, a, Duration::from_millis(200)).await.unwrap();

        let next = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lock(T, key, b, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;
        next.await.unwrap().unwrap();

        // A's lock lapsed; its re-add no longer rides on a migration it lost
        let err = registry.add(T, key, a).await.unwrap_err();
        assert!(matches!(err, LocationError::Locked { .. }), "{err}");
        assert_eq!(registry.get(T, key), Some(a));
        assert_eq!(registry.stats(), RegistryStats { records: 1, locked: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_lock_times_out() {
        let registry = registry();
        let key = LocationKey::new(100);
        let a = actor(1, 1, 1);
        registry.add(T, key, a).await.unwrap();
        registry.lock(T, key, a, Duration::from_secs(5)).await.unwrap();

        let err = registry.lock(T, key, a, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, LocationError::LockTimeout { .. }));
        // First migration unaffected
        assert!(registry.is_locked(T, key));
        registry.unlock(T, key, a, actor(2, 1, 1)).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_lock_proceeds_after_unlock() {
        let registry = registry();
        let key = LocationKey::new(100);
        let a = actor(1, 1, 1);
        let b = actor(2, 1, 1);
        registry.add(T, key, a).await.unwrap();
        registry.lock(T, key, a, Duration::from_secs(5)).await.unwrap();

        let second = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lock(T, key, b, Duration::from_secs(5)).await })
        };
        settle().await;
        assert!(!second.is_finished());

        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.unlock(T, key, a, b).unwrap();
        second.await.unwrap().unwrap();

        assert!(registry.is_locked(T, key));
        assert_eq!(registry.get(T, key), Some(b));
        registry.unlock(T, key, b, a).unwrap();
        assert_eq!(registry.get(T, key), Some(a));
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_lock_force_expires() {
        let registry = registry();
        let key = LocationKey::new(5);
        let a = actor(1, 1, 1);
        registry.add(T, key, a).await.unwrap();
        registry.lock(T, key, a, Duration::from_millis(200)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!registry.is_locked(T, key));
        assert_eq!(registry.get(T, key), Some(a));
        assert!(logs_contain("expired before UnLock"));

        // Late UnLock from the crashed migration is rejected
        let err = registry.unlock(T, key, a, actor(9, 9, 9)).unwrap_err();
        assert!(matches!(err, LocationError::NotLocked { .. }));

        // The key is usable again
        registry.remove(T, key).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_time_uses_default_lock_time() {
        let registry = registry();
        let key = LocationKey::new(6);
        let a = actor(1, 1, 1);
        registry.lock(T, key, a, Duration::ZERO).await.unwrap();

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(registry.is_locked(T, key));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!registry.is_locked(T, key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_expiry_does_not_release_newer_lock() {
        let registry = registry();
        let key = LocationKey::new(11);
        let a = actor(1, 1, 1);

        registry.lock(T, key, a, Duration::from_millis(1000)).await.unwrap();
        registry.unlock(T, key, a, a).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // New lock lives past the first lock's expiry instant
        registry.lock(T, key, a, Duration::from_millis(2000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(registry.is_locked(T, key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_waits_for_migration() {
        let registry = registry();
        let key = LocationKey::new(12);
        let a = actor(1, 1, 1);
        let b = actor(2, 1, 1);
        registry.add(T, key, a).await.unwrap();
        registry.lock(T, key, a, Duration::from_secs(5)).await.unwrap();

        let remove = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.remove(T, key).await })
        };
        settle().await;
        assert!(!remove.is_finished());
        assert_eq!(registry.get(T, key), Some(a));

        registry.unlock(T, key, a, b).unwrap();
        remove.await.unwrap().unwrap();
        assert_eq!(registry.get(T, key), None);
    }

    #[tokio::test]
    async fn test_types_are_separate_namespaces() {
        let registry = registry();
        let key = LocationKey::new(1);
        let player = LocationType::new(1);
        let room = LocationType::new(2);

        registry.add(player, key, actor(1, 1, 1)).await.unwrap();
        registry.add(room, key, actor(2, 2, 2)).await.unwrap();
        registry.lock(player, key, actor(1, 1, 1), Duration::ZERO).await.unwrap();

        // A lock in one namespace does not block the other
        registry.remove(room, key).await.unwrap();
        assert_eq!(registry.get(room, key), None);
        assert_eq!(registry.get(player, key), Some(actor(1, 1, 1)));
        assert_eq!(registry.stats(), RegistryStats { records: 1, locked: 1 });
    }
}
