//! # NetComponent
//!
//! Owns one [`Service`], the table of live sessions and the dispatcher.
//!
//! Service events are drained by a single task, in order. That task is the
//! only writer of the session table on the inbound path: it creates sessions
//! on accept, routes frames to them, and disposes them on channel errors.
//! Request and message handlers are spawned so a handler waiting on a lock
//! never stalls other channels.

use crate::dispatcher::MessageDispatcher;
use crate::ids::ChannelIdAllocator;
use crate::session::{Direction, Session, SessionConfig};
use crate::transports::{Service, ServiceEvent, ServiceEvents};
use codec::error_code::{ERR_PROTOCOL_VIOLATION, ERR_SERVICE_DISPOSED, ERR_SESSION_IDLE_TIMEOUT};
use codec::{Envelope, MessageKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct SessionTable {
    by_id: HashMap<u32, Arc<Session>>,
    /// Outbound session reused per remote address
    outbound: HashMap<SocketAddr, u32>,
}

impl SessionTable {
    fn remove(&mut self, channel_id: u32) -> Option<Arc<Session>> {
        let session = self.by_id.remove(&channel_id)?;
        if self.outbound.get(&session.remote()) == Some(&channel_id) {
            self.outbound.remove(&session.remote());
        }
        Some(session)
    }
}

pub struct NetComponent {
    service: Arc<dyn Service>,
    dispatcher: Arc<MessageDispatcher>,
    config: SessionConfig,
    sessions: Mutex<SessionTable>,
    connector_ids: ChannelIdAllocator,
    shutdown: CancellationToken,
}

impl NetComponent {
    /// Start draining `events` and checking idle sessions
    pub fn start(
        service: Arc<dyn Service>,
        events: ServiceEvents,
        dispatcher: MessageDispatcher,
        config: SessionConfig,
    ) -> Arc<Self> {
        let component = Arc::new(Self {
            service,
            dispatcher: Arc::new(dispatcher),
            config,
            sessions: Mutex::new(SessionTable::default()),
            connector_ids: ChannelIdAllocator::connector(),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(component.clone().run(events));
        if component.config.idle_timeout.is_some() {
            tokio::spawn(component.clone().check_idle());
        }
        info!(
            local_addr = %component.local_addr(),
            kind = ?component.service.kind(),
            "NetComponent started"
        );
        component
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.service.local_addr()
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().by_id.len()
    }

    pub fn get(&self, channel_id: u32) -> Option<Arc<Session>> {
        self.sessions.lock().by_id.get(&channel_id).cloned()
    }

    /// Open a new outbound session to `remote`
    pub fn create(&self, remote: SocketAddr) -> Arc<Session> {
        let channel_id = self.connector_ids.next_id();
        let session = Arc::new(Session::new(
            channel_id,
            remote,
            Direction::Outbound,
            self.service.clone(),
            &self.config,
        ));
        self.sessions.lock().by_id.insert(channel_id, session.clone());
        self.service.connect(channel_id, remote);
        debug!(channel_id, %remote, "Outbound session created");
        session
    }

    /// The live outbound session to `remote`, created on first use
    pub fn get_or_create(&self, remote: SocketAddr) -> Arc<Session> {
        let mut table = self.sessions.lock();
        if let Some(session) = table
            .outbound
            .get(&remote)
            .and_then(|id| table.by_id.get(id))
            .filter(|session| !session.is_disposed())
        {
            return session.clone();
        }

        let channel_id = self.connector_ids.next_id();
        let session = Arc::new(Session::new(
            channel_id,
            remote,
            Direction::Outbound,
            self.service.clone(),
            &self.config,
        ));
        table.by_id.insert(channel_id, session.clone());
        table.outbound.insert(remote, channel_id);
        drop(table);

        self.service.connect(channel_id, remote);
        debug!(channel_id, %remote, "Outbound session created");
        session
    }

    /// Dispose one session and forget it
    pub fn remove(&self, channel_id: u32, error: i32) {
        let removed = self.sessions.lock().remove(channel_id);
        if let Some(session) = removed {
            session.dispose(error);
        }
    }

    /// Stop the event loop, dispose every session and the service
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let sessions: Vec<Arc<Session>> = {
            let mut table = self.sessions.lock();
            table.outbound.clear();
            table.by_id.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.dispose(ERR_SERVICE_DISPOSED);
        }
        self.service.dispose();
        info!(local_addr = %self.local_addr(), "NetComponent stopped");
    }

    async fn run(self: Arc<Self>, mut events: ServiceEvents) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };
            self.handle_event(event);
        }
    }

    fn handle_event(&self, event: ServiceEvent) {
        match event {
            ServiceEvent::Accept { channel_id, remote } => {
                let session = Arc::new(Session::new(
                    channel_id,
                    remote,
                    Direction::Inbound,
                    self.service.clone(),
                    &self.config,
                ));
                self.sessions.lock().by_id.insert(channel_id, session);
                debug!(channel_id, %remote, "Inbound session created");
            }
            ServiceEvent::Connected { channel_id, remote } => {
                debug!(channel_id, %remote, "Session connected");
            }
            ServiceEvent::Read { channel_id, frame } => {
                let Some(session) = self.get(channel_id) else {
                    debug!(channel_id, "Frame for unknown session dropped");
                    return;
                };
                session.mark_received();
                match Envelope::decode(frame) {
                    Ok(envelope) => self.route(session, envelope),
                    Err(e) => {
                        warn!(channel_id, remote = %session.remote(), "Protocol error, dropping connection: {}", e);
                        self.remove(channel_id, ERR_PROTOCOL_VIOLATION);
                    }
                }
            }
            ServiceEvent::Error { channel_id, error } => {
                self.remove(channel_id, error);
            }
        }
    }

    fn route(&self, session: Arc<Session>, envelope: Envelope) {
        match envelope.kind {
            MessageKind::Response => session.on_response(envelope),
            MessageKind::Request => {
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move { dispatcher.dispatch_request(session, envelope).await });
            }
            MessageKind::Message => {
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move { dispatcher.dispatch_message(session, envelope).await });
            }
        }
    }

    async fn check_idle(self: Arc<Self>) {
        let Some(idle_timeout) = self.config.idle_timeout else {
            return;
        };
        let mut interval = tokio::time::interval(self.config.idle_check_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }

            let now = Instant::now();
            let idle: Vec<u32> = self
                .sessions
                .lock()
                .by_id
                .values()
                .filter(|s| now.duration_since(s.last_recv()) >= idle_timeout)
                .map(|s| s.id())
                .collect();
            for channel_id in idle {
                info!(channel_id, "Session idle, disposing");
                self.remove(channel_id, ERR_SESSION_IDLE_TIMEOUT);
            }
        }
    }
}

