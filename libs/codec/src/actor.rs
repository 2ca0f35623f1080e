//! Cross-process actor delivery
//!
//! A message for an actor hosted by another process is wrapped in an
//! [`ActorDeliverRequest`] and sent over the session to that process. The
//! inner message keeps its own opcode and pre-encoded body.

use crate::envelope::Opcode;
use crate::opcode::{ACTOR_DELIVER_REQUEST, ACTOR_DELIVER_RESPONSE};
use crate::{impl_request, impl_response};
use serde::{Deserialize, Serialize};
use types::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDeliverRequest {
    pub target: ActorId,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// `payload` is empty unless the target actor replied with a body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDeliverResponse {
    #[serde(skip)]
    pub error: i32,
    pub payload: Vec<u8>,
}

impl_request!(ActorDeliverRequest => ActorDeliverResponse, ACTOR_DELIVER_REQUEST);
impl_response!(ActorDeliverResponse, ACTOR_DELIVER_RESPONSE);
