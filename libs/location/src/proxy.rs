//! # Location Proxy
//!
//! Client side of the registry. Each call is one RPC over the outbound
//! session to the registry address, whether the registry runs in this
//! process or another one.

use crate::error::{check, Result};
use codec::error_code::ERR_LOCATION_NOT_FOUND;
use codec::location::*;
use network::{NetComponent, Session};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use types::{ActorId, LocationKey, LocationType};

#[derive(Clone)]
pub struct LocationProxy {
    net: Arc<NetComponent>,
    registry: SocketAddr,
}

impl LocationProxy {
    pub fn new(net: Arc<NetComponent>, registry: SocketAddr) -> Self {
        Self { net, registry }
    }

    pub fn registry_address(&self) -> SocketAddr {
        self.registry
    }

    fn session(&self) -> Arc<Session> {
        self.net.get_or_create(self.registry)
    }

    pub async fn add(&self, location_type: LocationType, key: LocationKey, actor_id: ActorId) -> Result<()> {
        let request = ObjectAddRequest {
            location_type,
            key,
            actor_id,
        };
        let response = self.session().call(&request).await?;
        check(key, response.error)
    }

    /// Resolve `key`; `Ok(None)` when nothing is registered under it
    pub async fn get(&self, location_type: LocationType, key: LocationKey) -> Result<Option<ActorId>> {
        let request = ObjectGetRequest { location_type, key };
        let response = self.session().call(&request).await?;
        match response.error {
            ERR_LOCATION_NOT_FOUND => {
                debug!(%location_type, %key, "Location not registered");
                Ok(None)
            }
            code => check(key, code).map(|()| Some(response.actor_id)),
        }
    }

    /// Start migrating `key`; the registry force-expires the lock after `time`
    /// (zero lets the registry pick its default)
    pub async fn lock(
        &self,
        location_type: LocationType,
        key: LocationKey,
        actor_id: ActorId,
        time: Duration,
    ) -> Result<()> {
        let request = ObjectLockRequest {
            location_type,
            key,
            actor_id,
            time_ms: u32::try_from(time.as_millis()).unwrap_or(u32::MAX),
        };
        let response = self.session().call(&request).await?;
        check(key, response.error)
    }

    pub async fn unlock(
        &self,
        location_type: LocationType,
        key: LocationKey,
        old_actor_id: ActorId,
        new_actor_id: ActorId,
    ) -> Result<()> {
        let request = ObjectUnLockRequest {
            location_type,
            key,
            old_actor_id,
            new_actor_id,
        };
        let response = self.session().call(&request).await?;
        check(key, response.error)
    }

    pub async fn remove(&self, location_type: LocationType, key: LocationKey) -> Result<()> {
        let request = ObjectRemoveRequest { location_type, key };
        let response = self.session().call(&request).await?;
        check(key, response.error)
    }
}

impl std::fmt::Debug for LocationProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationProxy")
            .field("registry", &self.registry)
            .finish()
    }
}
