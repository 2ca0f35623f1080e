//! # Actor Router
//!
//! Delivers a message to an [`ActorId`] wherever it lives.
//!
//! ```text
//!   deliver(P1:F2:7) ── process == local ──► mailbox of P1:F2:7 (fiber F2)
//!          │
//!          └────────── process != local ──► ActorDeliverRequest over the
//!                                            session to the process's inner
//!                                            address; the remote router
//!                                            delivers to its own mailbox
//! ```
//!
//! Delivery always waits for the target actor to take the message, so a
//! stale `ActorId` surfaces as `ERR_NOT_FOUND_ACTOR` in the response rather
//! than disappearing silently. Mail that is dropped unanswered, such as mail
//! still queued or in progress when its actor is removed, is reported the
//! same way.

use bytes::Bytes;
use codec::actor::{ActorDeliverRequest, ActorDeliverResponse};
use codec::error_code::{ERR_NOT_FOUND_ACTOR, ERR_PROCESS_UNKNOWN, ERR_SERVICE_DISPOSED};
use codec::{Opcode, Response};
use network::{MessageDispatcher, NetComponent};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use types::ActorId;

type ReplySlot = Arc<Mutex<Option<oneshot::Sender<ActorDeliverResponse>>>>;

/// One message for one actor
///
/// The first reply wins. Mail dropped without a reply reaches the sender as
/// `ERR_NOT_FOUND_ACTOR`; an actor loop acknowledges unanswered mail itself
/// once the handler returns (see [`MailAck`]).
#[derive(Debug)]
pub struct ActorMail {
    pub opcode: Opcode,
    pub payload: Bytes,
    reply: ReplySlot,
}

impl ActorMail {
    pub fn new(opcode: Opcode, payload: Bytes) -> (Self, oneshot::Receiver<ActorDeliverResponse>) {
        let (tx, rx) = oneshot::channel();
        let mail = Self {
            opcode,
            payload,
            reply: Arc::new(Mutex::new(Some(tx))),
        };
        (mail, rx)
    }

    pub fn reply(self, payload: impl Into<Vec<u8>>) {
        send_reply(
            &self.reply,
            ActorDeliverResponse {
                error: codec::error_code::ERR_SUCCESS,
                payload: payload.into(),
            },
        );
    }

    pub fn reply_error(self, error: i32) {
        send_reply(&self.reply, ActorDeliverResponse::with_error(error));
    }

    /// Handle that acknowledges this mail if the handler never replies
    pub fn ack(&self) -> MailAck {
        MailAck {
            reply: self.reply.clone(),
        }
    }
}

fn send_reply(slot: &ReplySlot, response: ActorDeliverResponse) {
    if let Some(tx) = slot.lock().take() {
        let _ = tx.send(response);
    }
}

/// Acknowledgement for mail whose handler ran to completion
///
/// Dropping it unused sends nothing, so mail abandoned mid-handling still
/// reads as not found.
#[derive(Debug)]
#[must_use = "dropping the ack leaves unanswered mail unacknowledged"]
pub struct MailAck {
    reply: ReplySlot,
}

impl MailAck {
    /// Reply with an empty body unless the handler already replied
    pub fn complete(self) {
        send_reply(&self.reply, ActorDeliverResponse::default());
    }
}

/// Sending half of an actor's mailbox
pub type Mailbox = mpsc::UnboundedSender<ActorMail>;

pub struct ActorRouter {
    process_id: i32,
    local: RwLock<HashMap<ActorId, Mailbox>>,
    /// process id → inner address
    processes: RwLock<HashMap<i32, SocketAddr>>,
    net: RwLock<Weak<NetComponent>>,
}

impl ActorRouter {
    pub fn new(process_id: i32, processes: HashMap<i32, SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            process_id,
            local: RwLock::new(HashMap::new()),
            processes: RwLock::new(processes),
            net: RwLock::new(Weak::new()),
        })
    }

    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Use `net` for cross-process delivery
    pub fn attach(&self, net: &Arc<NetComponent>) {
        *self.net.write() = Arc::downgrade(net);
    }

    pub fn set_process_address(&self, process_id: i32, address: SocketAddr) {
        self.processes.write().insert(process_id, address);
    }

    /// Register the handler that accepts deliveries from other processes
    pub fn register_handlers(self: &Arc<Self>, dispatcher: &mut MessageDispatcher) -> network::Result<()> {
        let router = self.clone();
        dispatcher.register_rpc(move |_, request: ActorDeliverRequest| {
            let router = router.clone();
            async move {
                router
                    .deliver_local(request.target, request.opcode, Bytes::from(request.payload))
                    .await
            }
        })
    }

    pub fn register_local(&self, actor_id: ActorId, mailbox: Mailbox) {
        debug!(%actor_id, "Actor registered");
        self.local.write().insert(actor_id, mailbox);
    }

    pub fn unregister_local(&self, actor_id: ActorId) -> bool {
        let removed = self.local.write().remove(&actor_id).is_some();
        if removed {
            debug!(%actor_id, "Actor unregistered");
        }
        removed
    }

    pub fn local_count(&self) -> usize {
        self.local.read().len()
    }

    /// Deliver `payload` to `target` and wait for it to be taken
    ///
    /// `Err` is a transport failure talking to the target's process; an
    /// unknown actor or process is reported in the response's error code.
    pub async fn deliver(
        &self,
        target: ActorId,
        opcode: Opcode,
        payload: Bytes,
    ) -> network::Result<ActorDeliverResponse> {
        if target.process() == self.process_id {
            return Ok(self.deliver_local(target, opcode, payload).await);
        }

        let Some(remote) = self.processes.read().get(&target.process()).copied() else {
            warn!(%target, "No inner address for process");
            return Ok(ActorDeliverResponse::with_error(ERR_PROCESS_UNKNOWN));
        };
        let Some(net) = self.net.read().upgrade() else {
            return Ok(ActorDeliverResponse::with_error(ERR_SERVICE_DISPOSED));
        };

        let request = ActorDeliverRequest {
            target,
            opcode,
            payload: payload.to_vec(),
        };
        net.get_or_create(remote).call(&request).await
    }

    async fn deliver_local(&self, target: ActorId, opcode: Opcode, payload: Bytes) -> ActorDeliverResponse {
        let mailbox = if target.process() == self.process_id {
            self.local.read().get(&target).cloned()
        } else {
            None
        };
        let Some(mailbox) = mailbox else {
            debug!(%target, opcode, "No live actor");
            return ActorDeliverResponse::with_error(ERR_NOT_FOUND_ACTOR);
        };

        let (mail, reply) = ActorMail::new(opcode, payload);
        if mailbox.send(mail).is_err() {
            // Actor stopped without unregistering
            self.unregister_local(target);
            return ActorDeliverResponse::with_error(ERR_NOT_FOUND_ACTOR);
        }
        reply.await.unwrap_or_else(|_| {
            debug!(%target, opcode, "Mail dropped before a reply");
            ActorDeliverResponse::with_error(ERR_NOT_FOUND_ACTOR)
        })
    }
}

impl std::fmt::Debug for ActorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRouter")
            .field("process_id", &self.process_id)
            .field("local", &self.local_count())
            .finish()
    }
}
