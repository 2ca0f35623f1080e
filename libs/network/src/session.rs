//! # Session
//!
//! Request/response semantics over one transport channel.
//!
//! Each outgoing request gets an `rpc_id` that is unique among the session's
//! outstanding calls. The pending table maps that id to a oneshot sender; the
//! response, a timeout, a cancellation, or disposal of the session removes
//! the entry, and whichever comes first decides the caller's outcome. Every
//! entry is completed at most once.

use crate::transports::Service;
use crate::{Result, TransportError};
use codec::error_code::{ERR_RPC_CANCELLED, ERR_RPC_TIMEOUT, ERR_SESSION_DISPOSED, ERR_SUCCESS};
use codec::{Envelope, Message, Opcode, PayloadFormat, Request, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::pending;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session behaviour shared by every session of a [`NetComponent`](crate::NetComponent)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `None` waits for a response until the session goes away
    pub rpc_timeout: Option<Duration>,
    /// Sessions that received nothing for this long are disposed; `None` disables
    pub idle_timeout: Option<Duration>,
    pub idle_check_interval: Duration,
    pub payload_format: PayloadFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Some(Duration::from_secs(30)),
            idle_timeout: Some(Duration::from_secs(60)),
            idle_check_interval: Duration::from_secs(5),
            payload_format: PayloadFormat::Bincode,
        }
    }
}

/// Which side opened the underlying channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

type Reply = std::result::Result<Envelope, i32>;

struct RpcTable {
    next_id: u32,
    pending: HashMap<u32, oneshot::Sender<Reply>>,
    disposed: bool,
}

impl RpcTable {
    fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            disposed: false,
        }
    }

    /// Next id that is neither zero nor still outstanding
    fn allocate_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id != 0 && !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}

struct Activity {
    last_send: Instant,
    last_recv: Instant,
}

/// One channel's request/response endpoint
pub struct Session {
    channel_id: u32,
    remote: SocketAddr,
    direction: Direction,
    service: Arc<dyn Service>,
    format: PayloadFormat,
    rpc_timeout: Option<Duration>,
    rpc: Mutex<RpcTable>,
    activity: Mutex<Activity>,
    error: AtomicI32,
}

impl Session {
    pub fn new(
        channel_id: u32,
        remote: SocketAddr,
        direction: Direction,
        service: Arc<dyn Service>,
        config: &SessionConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            channel_id,
            remote,
            direction,
            service,
            format: config.payload_format,
            rpc_timeout: config.rpc_timeout,
            rpc: Mutex::new(RpcTable::new()),
            activity: Mutex::new(Activity {
                last_send: now,
                last_recv: now,
            }),
            error: AtomicI32::new(ERR_SUCCESS),
        }
    }

    pub fn id(&self) -> u32 {
        self.channel_id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Error the session was disposed with; success while alive
    pub fn error(&self) -> i32 {
        self.error.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.rpc.lock().disposed
    }

    pub fn pending_calls(&self) -> usize {
        self.rpc.lock().pending.len()
    }

    pub fn last_send(&self) -> Instant {
        self.activity.lock().last_send
    }

    pub fn last_recv(&self) -> Instant {
        self.activity.lock().last_recv
    }

    pub(crate) fn mark_received(&self) {
        self.activity.lock().last_recv = Instant::now();
    }

    /// Fire-and-forget
    pub fn send<M: Message>(&self, message: &M) -> Result<()> {
        let body = self.format.encode(message)?;
        self.send_envelope(Envelope::message(M::OPCODE, body))
    }

    /// Send a request and wait for its response
    ///
    /// A response whose envelope carries an error code is still `Ok`; check
    /// [`Response::error`]. `Err` means no response will ever arrive: the
    /// session was disposed, the configured timeout elapsed, or the payload
    /// could not be processed.
    pub async fn call<R: Request>(&self, request: &R) -> Result<R::Response> {
        self.call_inner(request, None).await
    }

    /// [`call`](Self::call) that gives up with a cancel-kind error once `cancel` fires
    ///
    /// The remote side is not told; it may still execute the request.
    pub async fn call_with_cancel<R: Request>(
        &self,
        request: &R,
        cancel: &CancellationToken,
    ) -> Result<R::Response> {
        self.call_inner(request, Some(cancel)).await
    }

    /// Answer the request identified by `rpc_id`
    pub fn reply<Resp: Response>(&self, rpc_id: u32, response: &Resp) -> Result<()> {
        let body = self.format.encode(response)?;
        self.send_envelope(Envelope::response(Resp::OPCODE, rpc_id, response.error(), body))
    }

    /// Answer with an error code and no body
    pub fn reply_error(&self, opcode: Opcode, rpc_id: u32, error: i32) -> Result<()> {
        self.send_envelope(Envelope::response(opcode, rpc_id, error, bytes::Bytes::new()))
    }

    pub fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        if self.is_disposed() {
            return Err(TransportError::SessionDisposed {
                channel_id: self.channel_id,
                code: self.error(),
            });
        }
        let frame = envelope.encode();
        let limit = self.service.max_frame_size();
        if frame.len() > limit {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                limit,
            });
        }
        self.service.send(self.channel_id, frame);
        self.activity.lock().last_send = Instant::now();
        Ok(())
    }

    /// Complete the pending call `envelope.rpc_id` refers to
    pub fn on_response(&self, envelope: Envelope) {
        let rpc_id = envelope.rpc_id;
        let sender = self.rpc.lock().pending.remove(&rpc_id);
        match sender {
            // Caller may have given up between removal and send
            Some(sender) => {
                let _ = sender.send(Ok(envelope));
            }
            None => warn!(
                channel_id = self.channel_id,
                rpc_id,
                opcode = envelope.opcode,
                "Dropping unmatched response (stale or duplicate)"
            ),
        }
    }

    /// Fail every pending call with `error` and release the channel; idempotent
    pub fn dispose(&self, error: i32) {
        let pending = {
            let mut rpc = self.rpc.lock();
            if rpc.disposed {
                return;
            }
            rpc.disposed = true;
            self.error.store(error, Ordering::Release);
            std::mem::take(&mut rpc.pending)
        };

        info!(
            channel_id = self.channel_id,
            remote = %self.remote,
            error,
            reason = codec::error_code::describe(error),
            failed_calls = pending.len(),
            "Session disposed"
        );
        for (_, sender) in pending {
            let _ = sender.send(Err(error));
        }
        self.service.remove(self.channel_id, error);
    }

    async fn call_inner<R: Request>(
        &self,
        request: &R,
        cancel: Option<&CancellationToken>,
    ) -> Result<R::Response> {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(TransportError::Rpc {
                code: ERR_RPC_CANCELLED,
                opcode: R::OPCODE,
                rpc_id: 0,
            });
        }

        let body = self.format.encode(request)?;
        let (rpc_id, receiver) = {
            let mut rpc = self.rpc.lock();
            if rpc.disposed {
                return Err(TransportError::SessionDisposed {
                    channel_id: self.channel_id,
                    code: self.error(),
                });
            }
            let rpc_id = rpc.allocate_id();
            let (sender, receiver) = oneshot::channel();
            rpc.pending.insert(rpc_id, sender);
            (rpc_id, receiver)
        };

        if let Err(e) = self.send_envelope(Envelope::request(R::OPCODE, rpc_id, body)) {
            self.rpc.lock().pending.remove(&rpc_id);
            return Err(e);
        }

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => pending().await,
            }
        };
        let deadline = async {
            match self.rpc_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => pending().await,
            }
        };

        let reply = tokio::select! {
            reply = receiver => reply,
            _ = cancelled => return Err(self.abandon(rpc_id, R::OPCODE, ERR_RPC_CANCELLED)),
            _ = deadline => return Err(self.abandon(rpc_id, R::OPCODE, ERR_RPC_TIMEOUT)),
        };

        let envelope = match reply {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(code)) => {
                return Err(TransportError::Rpc {
                    code,
                    opcode: R::OPCODE,
                    rpc_id,
                })
            }
            Err(_) => {
                return Err(TransportError::Rpc {
                    code: ERR_SESSION_DISPOSED,
                    opcode: R::OPCODE,
                    rpc_id,
                })
            }
        };

        if envelope.error != ERR_SUCCESS && envelope.body.is_empty() {
            return Ok(R::Response::with_error(envelope.error));
        }
        let mut response: R::Response = self.format.decode(envelope.opcode, &envelope.body)?;
        response.set_error(envelope.error);
        Ok(response)
    }

    fn abandon(&self, rpc_id: u32, opcode: Opcode, code: i32) -> TransportError {
        self.rpc.lock().pending.remove(&rpc_id);
        debug!(channel_id = self.channel_id, rpc_id, opcode, code, "RPC abandoned");
        TransportError::Rpc {
            code,
            opcode,
            rpc_id,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channel_id", &self.channel_id)
            .field("remote", &self.remote)
            .field("direction", &self.direction)
            .field("error", &self.error())
            .finish()
    }
}
