//! Opcode → handler registry
//!
//! Built once at startup with explicit `register_*` calls and then shared
//! read-only by every session. Each handler is type-erased into a closure
//! that decodes the body with the session's payload format, runs the typed
//! handler and, for requests, produces the response envelope.

use crate::session::Session;
use crate::{Result, TransportError};
use bytes::Bytes;
use codec::error_code::{ERR_HANDLER_FAILED, ERR_HANDLER_NOT_FOUND, ERR_PAYLOAD_DECODE};
use codec::{Envelope, Message, Opcode, Request, Response};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

type MessageHandlerFn = Arc<dyn Fn(Arc<Session>, Envelope) -> BoxFuture<'static, ()> + Send + Sync>;
type RpcHandlerFn = Arc<dyn Fn(Arc<Session>, Envelope) -> BoxFuture<'static, Envelope> + Send + Sync>;

#[derive(Default)]
pub struct MessageDispatcher {
    messages: HashMap<Opcode, MessageHandlerFn>,
    requests: HashMap<Opcode, RpcHandlerFn>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_free(&self, opcode: Opcode) -> Result<()> {
        if self.messages.contains_key(&opcode) || self.requests.contains_key(&opcode) {
            return Err(TransportError::DuplicateHandler { opcode });
        }
        Ok(())
    }

    /// Register the handler for one-way message `M`
    pub fn register_message<M, F, Fut>(&mut self, handler: F) -> Result<()>
    where
        M: Message,
        F: Fn(Arc<Session>, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_free(M::OPCODE)?;
        let handler = Arc::new(handler);
        let erased: MessageHandlerFn = Arc::new(move |session: Arc<Session>, envelope: Envelope| {
            let handler = handler.clone();
            async move {
                match session.format().decode::<M>(envelope.opcode, &envelope.body) {
                    Ok(message) => (*handler)(session, message).await,
                    Err(e) => warn!(
                        channel_id = session.id(),
                        opcode = envelope.opcode,
                        "Dropping undecodable message: {}", e
                    ),
                }
            }
            .boxed()
        });
        self.messages.insert(M::OPCODE, erased);
        Ok(())
    }

    /// Register the handler for request `R`
    ///
    /// The handler reports failures through the error code of the response
    /// it returns.
    pub fn register_rpc<R, F, Fut>(&mut self, handler: F) -> Result<()>
    where
        R: Request,
        F: Fn(Arc<Session>, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R::Response> + Send + 'static,
    {
        self.ensure_free(R::OPCODE)?;
        let handler = Arc::new(handler);
        let erased: RpcHandlerFn = Arc::new(move |session: Arc<Session>, envelope: Envelope| {
            let handler = handler.clone();
            async move {
                let rpc_id = envelope.rpc_id;
                let format = session.format();
                let response = match format.decode::<R>(envelope.opcode, &envelope.body) {
                    Ok(request) => (*handler)(session, request).await,
                    Err(e) => {
                        warn!(opcode = envelope.opcode, rpc_id, "Undecodable request: {}", e);
                        R::Response::with_error(ERR_PAYLOAD_DECODE)
                    }
                };
                let opcode = <R::Response as Message>::OPCODE;
                match format.encode(&response) {
                    Ok(body) => Envelope::response(opcode, rpc_id, response.error(), body),
                    Err(e) => {
                        error!(opcode, rpc_id, "Failed to encode response: {}", e);
                        Envelope::response(opcode, rpc_id, ERR_HANDLER_FAILED, Bytes::new())
                    }
                }
            }
            .boxed()
        });
        self.requests.insert(R::OPCODE, erased);
        Ok(())
    }

    pub fn handles(&self, opcode: Opcode) -> bool {
        self.messages.contains_key(&opcode) || self.requests.contains_key(&opcode)
    }

    /// Run the handler for a one-way message; unknown opcodes are logged and dropped
    pub async fn dispatch_message(&self, session: Arc<Session>, envelope: Envelope) {
        match self.messages.get(&envelope.opcode) {
            Some(handler) => handler(session, envelope).await,
            None => debug!(
                channel_id = session.id(),
                opcode = envelope.opcode,
                range = codec::opcode::range_name(envelope.opcode),
                "No handler for message, dropped"
            ),
        }
    }

    /// Run the handler for a request and send its response
    ///
    /// Unknown opcodes are answered with `ERR_HANDLER_NOT_FOUND`; a panicking
    /// handler is answered with `ERR_HANDLER_FAILED`.
    pub async fn dispatch_request(&self, session: Arc<Session>, envelope: Envelope) {
        let (opcode, rpc_id) = (envelope.opcode, envelope.rpc_id);
        let Some(handler) = self.requests.get(&opcode).cloned() else {
            warn!(channel_id = session.id(), opcode, rpc_id, "No handler for request");
            if let Err(e) = session.reply_error(opcode, rpc_id, ERR_HANDLER_NOT_FOUND) {
                debug!(rpc_id, "Could not answer unknown request: {}", e);
            }
            return;
        };

        let response = match tokio::spawn(handler(session.clone(), envelope)).await {
            Ok(response) => response,
            Err(e) => {
                error!(channel_id = session.id(), opcode, rpc_id, "Request handler failed: {}", e);
                Envelope::response(opcode, rpc_id, ERR_HANDLER_FAILED, Bytes::new())
            }
        };
        if let Err(e) = session.send_envelope(response) {
            debug!(channel_id = session.id(), rpc_id, category = e.category(), "Response not sent: {}", e);
        }
    }
}
