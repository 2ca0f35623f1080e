//! # Location Sender
//!
//! Sends to a [`LocationKey`] instead of an [`ActorId`]. The owner is
//! resolved through the proxy and cached. When the cached actor answers
//! `ERR_NOT_FOUND_ACTOR` (it migrated or stopped) the cache entry is dropped
//! and the key is resolved again, up to `retry_count` times.
//!
//! Sends to one `(LocationType, LocationKey)` are serialized so they reach
//! the actor in call order, even across a re-resolution. Keys of different
//! types never wait on each other.

use crate::error::{LocationError, Result};
use crate::proxy::LocationProxy;
use actors::{ActorRouter, CoroutineLockManager, LockType, TimerService};
use bytes::Bytes;
use codec::actor::ActorDeliverResponse;
use codec::error_code::ERR_NOT_FOUND_ACTOR;
use codec::Opcode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use types::{ActorId, LocationKey, LocationType};

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Re-resolutions after a not-found answer
    pub retry_count: u32,
    pub retry_interval: Duration,
    /// Upper bound on waiting behind earlier sends to the same key
    pub queue_timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            retry_count: 5,
            retry_interval: Duration::from_millis(500),
            queue_timeout: Duration::from_secs(10),
        }
    }
}

pub struct LocationSender {
    proxy: LocationProxy,
    router: Arc<ActorRouter>,
    timer: Arc<dyn TimerService>,
    /// One queue namespace per location type
    locks: Mutex<HashMap<LocationType, CoroutineLockManager>>,
    config: SenderConfig,
    cache: Mutex<HashMap<(LocationType, LocationKey), ActorId>>,
}

impl LocationSender {
    pub fn new(
        proxy: LocationProxy,
        router: Arc<ActorRouter>,
        timer: Arc<dyn TimerService>,
        config: SenderConfig,
    ) -> Self {
        Self {
            proxy,
            router,
            timer,
            locks: Mutex::new(HashMap::new()),
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver to whichever actor currently owns `key`
    ///
    /// Returns the actor's reply. An unregistered key fails with
    /// [`LocationError::NotFound`]; an owner that stays unreachable through
    /// every retry fails with [`LocationError::ActorNotFound`].
    pub async fn call(
        &self,
        location_type: LocationType,
        key: LocationKey,
        opcode: Opcode,
        payload: Bytes,
    ) -> Result<ActorDeliverResponse> {
        let _queue = self
            .queue(location_type)
            .wait(LockType::ActorLocationSender, key.inner(), self.config.queue_timeout)
            .await
            .map_err(|e| LocationError::from_lock(key, e))?;

        let attempts = self.config.retry_count + 1;
        for attempt in 1..=attempts {
            let target = self.resolve(location_type, key).await?;
            let response = self.router.deliver(target, opcode, payload.clone()).await?;
            if response.error != ERR_NOT_FOUND_ACTOR {
                return Ok(response);
            }

            self.invalidate(location_type, key);
            debug!(%location_type, %key, %target, attempt, "Owner not found, resolving again");
            if attempt < attempts {
                self.timer.wait_for(self.config.retry_interval).await;
            }
        }

        warn!(%location_type, %key, attempts, "Giving up on location");
        Err(LocationError::ActorNotFound { key, attempts })
    }

    fn queue(&self, location_type: LocationType) -> CoroutineLockManager {
        self.locks.lock().entry(location_type).or_default().clone()
    }

    async fn resolve(&self, location_type: LocationType, key: LocationKey) -> Result<ActorId> {
        if let Some(actor_id) = self.cached(location_type, key) {
            return Ok(actor_id);
        }
        let actor_id = self
            .proxy
            .get(location_type, key)
            .await?
            .ok_or(LocationError::NotFound { key })?;
        self.cache.lock().insert((location_type, key), actor_id);
        Ok(actor_id)
    }

    pub fn cached(&self, location_type: LocationType, key: LocationKey) -> Option<ActorId> {
        self.cache.lock().get(&(location_type, key)).copied()
    }

    /// Forget the cached owner of `key`
    pub fn invalidate(&self, location_type: LocationType, key: LocationKey) {
        self.cache.lock().remove(&(location_type, key));
    }
}

impl std::fmt::Debug for LocationSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationSender")
            .field("proxy", &self.proxy)
            .field("config", &self.config)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}
