//! Location registry RPC bodies
//!
//! Every request names the registry namespace (`location_type`) and the
//! logical key it operates on. Responses carry only the envelope error code,
//! except [`ObjectGetResponse`] which also returns the resolved actor.

use crate::opcode::*;
use crate::{impl_request, impl_response};
use serde::{Deserialize, Serialize};
use types::{ActorId, LocationKey, LocationType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAddRequest {
    pub location_type: LocationType,
    pub key: LocationKey,
    pub actor_id: ActorId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAddResponse {
    #[serde(skip)]
    pub error: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectGetRequest {
    pub location_type: LocationType,
    pub key: LocationKey,
}

/// `actor_id` is [`ActorId::NONE`] when `error` is not success
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectGetResponse {
    #[serde(skip)]
    pub error: i32,
    pub actor_id: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLockRequest {
    pub location_type: LocationType,
    pub key: LocationKey,
    /// Current owner starting the migration
    pub actor_id: ActorId,
    /// Force-expiry after this many milliseconds; 0 uses the registry default
    pub time_ms: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLockResponse {
    #[serde(skip)]
    pub error: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectUnLockRequest {
    pub location_type: LocationType,
    pub key: LocationKey,
    pub old_actor_id: ActorId,
    pub new_actor_id: ActorId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectUnLockResponse {
    #[serde(skip)]
    pub error: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRemoveRequest {
    pub location_type: LocationType,
    pub key: LocationKey,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRemoveResponse {
    #[serde(skip)]
    pub error: i32,
}

impl_request!(ObjectAddRequest => ObjectAddResponse, OBJECT_ADD_REQUEST);
impl_response!(ObjectAddResponse, OBJECT_ADD_RESPONSE);
impl_request!(ObjectGetRequest => ObjectGetResponse, OBJECT_GET_REQUEST);
impl_response!(ObjectGetResponse, OBJECT_GET_RESPONSE);
impl_request!(ObjectLockRequest => ObjectLockResponse, OBJECT_LOCK_REQUEST);
impl_response!(ObjectLockResponse, OBJECT_LOCK_RESPONSE);
impl_request!(ObjectUnLockRequest => ObjectUnLockResponse, OBJECT_UNLOCK_REQUEST);
impl_response!(ObjectUnLockResponse, OBJECT_UNLOCK_RESPONSE);
impl_request!(ObjectRemoveRequest => ObjectRemoveResponse, OBJECT_REMOVE_REQUEST);
impl_response!(ObjectRemoveResponse, OBJECT_REMOVE_RESPONSE);
