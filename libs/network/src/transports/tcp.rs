//! TCP Stream Service
//!
//! Every channel is one `TcpStream` carrying frames behind a `u32`
//! big-endian length prefix. Each channel gets a reader task and a writer
//! task; the writer drains an unbounded queue, so [`Service::send`] never
//! waits on the socket and frames sent while a connect is in flight are
//! flushed once it completes.

use super::metrics::{TrafficMetrics, TrafficSnapshot};
use super::{Service, ServiceEvent, ServiceEvents, ServiceKind};
use crate::ids::ChannelIdAllocator;
use crate::{Result, TransportError};
use bytes::{Bytes, BytesMut};
use codec::error_code::{
    ERR_CONNECT_FAILED, ERR_CONNECT_TIMEOUT, ERR_FRAME_TOO_LARGE, ERR_MALFORMED_FRAME,
    ERR_PEER_DISCONNECT, ERR_SERVICE_DISPOSED, ERR_SOCKET_RECV, ERR_SOCKET_SEND,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

const LENGTH_PREFIX: usize = 4;

/// TCP service configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Listen address; `None` for a connect-only service
    pub bind_address: Option<SocketAddr>,
    pub connect_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            connect_timeout: Duration::from_secs(5),
            max_frame_size: 1024 * 1024,
        }
    }
}

/// Stream flavor of [`Service`]
pub struct TcpService {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    listener: Mutex<Option<AbortHandle>>,
}

struct Shared {
    config: TcpConfig,
    channels: Mutex<HashMap<u32, TcpChannel>>,
    events: mpsc::UnboundedSender<ServiceEvent>,
    acceptor_ids: ChannelIdAllocator,
    metrics: TrafficMetrics,
    disposed: AtomicBool,
}

struct TcpChannel {
    remote: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
    tasks: Vec<AbortHandle>,
}

impl TcpChannel {
    fn abort(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

impl TcpService {
    /// Create the service, binding a listener when `bind_address` is set
    pub async fn bind(config: TcpConfig) -> Result<(Arc<Self>, ServiceEvents)> {
        if config.max_frame_size == 0 {
            return Err(TransportError::configuration(
                "max_frame_size must be positive",
                Some("max_frame_size"),
            ));
        }

        let (events, receiver) = mpsc::unbounded_channel();
        let listener = match config.bind_address {
            Some(addr) => Some(TcpListener::bind(addr).await.map_err(|e| {
                TransportError::network_with_source(format!("Failed to bind TCP listener on {addr}"), e)
            })?),
            None => None,
        };
        let local_addr = match &listener {
            Some(listener) => listener
                .local_addr()
                .map_err(|e| TransportError::network_with_source("Failed to read local address", e))?,
            None => SocketAddr::from(([0, 0, 0, 0], 0)),
        };

        let shared = Arc::new(Shared {
            config,
            channels: Mutex::new(HashMap::new()),
            events,
            acceptor_ids: ChannelIdAllocator::acceptor(),
            metrics: TrafficMetrics::new(),
            disposed: AtomicBool::new(false),
        });

        let service = Arc::new(Self {
            local_addr,
            shared: shared.clone(),
            listener: Mutex::new(None),
        });

        if let Some(listener) = listener {
            info!(%local_addr, "TCP service listening");
            let task = tokio::spawn(accept_loop(shared, listener));
            *service.listener.lock() = Some(task.abort_handle());
        }

        Ok((service, receiver))
    }
}

impl Service for TcpService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Tcp
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn connect(&self, channel_id: u32, remote: SocketAddr) {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            shared.emit(ServiceEvent::Error {
                channel_id,
                error: ERR_SERVICE_DISPOSED,
            });
            return;
        }

        let (outbound, queue) = mpsc::unbounded_channel();
        {
            let mut channels = shared.channels.lock();
            if channels.contains_key(&channel_id) {
                warn!(channel_id, "Channel id already in use, connect ignored");
                return;
            }
            channels.insert(
                channel_id,
                TcpChannel {
                    remote,
                    outbound,
                    tasks: Vec::new(),
                },
            );
        }

        let task = tokio::spawn(connect_and_run(shared.clone(), channel_id, remote, queue));
        shared.attach(channel_id, task.abort_handle());
    }

    fn send(&self, channel_id: u32, frame: Bytes) {
        let limit = self.shared.config.max_frame_size;
        if frame.len() > limit {
            warn!(channel_id, size = frame.len(), limit, "Outbound frame too large");
            self.shared.fail(channel_id, ERR_FRAME_TOO_LARGE);
            return;
        }

        let queued = {
            let channels = self.shared.channels.lock();
            channels
                .get(&channel_id)
                .map(|channel| channel.outbound.send(frame).is_ok())
        };
        match queued {
            Some(true) => {}
            Some(false) => self.shared.fail(channel_id, ERR_SOCKET_SEND),
            None => debug!(channel_id, "Send on unknown channel dropped"),
        }
    }

    fn remove(&self, channel_id: u32, error: i32) {
        let removed = self.shared.channels.lock().remove(&channel_id);
        if let Some(channel) = removed {
            debug!(channel_id, remote = %channel.remote, error, "TCP channel removed");
            channel.abort();
        }
    }

    fn max_frame_size(&self) -> usize {
        self.shared.config.max_frame_size
    }

    fn metrics(&self) -> TrafficSnapshot {
        self.shared.metrics.snapshot()
    }

    fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        let channels: Vec<TcpChannel> = self.shared.channels.lock().drain().map(|(_, c)| c).collect();
        info!(local_addr = %self.local_addr, channels = channels.len(), "TCP service disposed");
        for channel in channels {
            channel.abort();
        }
    }
}

impl Drop for TcpService {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    fn emit(&self, event: ServiceEvent) {
        // Receiver gone means the owner shut down; nothing left to notify.
        let _ = self.events.send(event);
    }

    fn attach(&self, channel_id: u32, task: AbortHandle) {
        let mut channels = self.channels.lock();
        match channels.get_mut(&channel_id) {
            Some(channel) => channel.tasks.push(task),
            None => task.abort(),
        }
    }

    /// Drop a channel because of a transport failure and tell the owner
    fn fail(&self, channel_id: u32, error: i32) {
        let removed = self.channels.lock().remove(&channel_id);
        if let Some(channel) = removed {
            warn!(
                channel_id,
                remote = %channel.remote,
                error,
                reason = codec::error_code::describe(error),
                "TCP channel failed"
            );
            self.metrics.record_error(error);
            self.emit(ServiceEvent::Error { channel_id, error });
            channel.abort();
        }
    }

    fn start_io(
        self: &Arc<Self>,
        channel_id: u32,
        stream: TcpStream,
    ) -> (OwnedWriteHalf, AbortHandle) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(channel_id, "Failed to set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();
        let task = tokio::spawn(read_loop(self.clone(), channel_id, reader));
        (writer, task.abort_handle())
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept TCP connection: {}", e);
                continue;
            }
        };

        let channel_id = shared.acceptor_ids.next_id();
        let (outbound, queue) = mpsc::unbounded_channel();
        shared.channels.lock().insert(
            channel_id,
            TcpChannel {
                remote,
                outbound,
                tasks: Vec::new(),
            },
        );
        debug!(channel_id, %remote, "Accepted TCP connection");
        shared.emit(ServiceEvent::Accept { channel_id, remote });

        let (writer, reader_task) = shared.start_io(channel_id, stream);
        shared.attach(channel_id, reader_task);
        let writer_task = tokio::spawn(write_loop(shared.clone(), channel_id, writer, queue));
        shared.attach(channel_id, writer_task.abort_handle());
    }
}

async fn connect_and_run(
    shared: Arc<Shared>,
    channel_id: u32,
    remote: SocketAddr,
    queue: mpsc::UnboundedReceiver<Bytes>,
) {
    let timeout = shared.config.connect_timeout;
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(remote)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(channel_id, %remote, "TCP connect failed: {}", e);
            shared.fail(channel_id, ERR_CONNECT_FAILED);
            return;
        }
        Err(_) => {
            shared.fail(channel_id, ERR_CONNECT_TIMEOUT);
            return;
        }
    };

    debug!(channel_id, %remote, "TCP channel connected");
    shared.emit(ServiceEvent::Connected { channel_id, remote });

    let (writer, reader_task) = shared.start_io(channel_id, stream);
    shared.attach(channel_id, reader_task);
    write_loop(shared, channel_id, writer, queue).await;
}

async fn write_loop(
    shared: Arc<Shared>,
    channel_id: u32,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut buffer = BytesMut::with_capacity(64 * 1024);
    while let Some(frame) = queue.recv().await {
        // Coalesce whatever is already queued into one write
        buffer.clear();
        let mut frames = 0;
        let mut next = Some(frame);
        while let Some(frame) = next {
            buffer.extend_from_slice(&(frame.len() as u32).to_be_bytes());
            buffer.extend_from_slice(&frame);
            shared.metrics.record_send(frame.len());
            frames += 1;
            next = if buffer.len() < 64 * 1024 {
                queue.try_recv().ok()
            } else {
                None
            };
        }

        if let Err(e) = writer.write_all(&buffer).await {
            debug!(channel_id, frames, "TCP write failed: {}", e);
            shared.fail(channel_id, ERR_SOCKET_SEND);
            return;
        }
    }
}

async fn read_loop(shared: Arc<Shared>, channel_id: u32, mut reader: OwnedReadHalf) {
    let limit = shared.config.max_frame_size;
    loop {
        let mut len_bytes = [0u8; LENGTH_PREFIX];
        if let Err(e) = reader.read_exact(&mut len_bytes).await {
            let error = match e.kind() {
                ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                    ERR_PEER_DISCONNECT
                }
                _ => ERR_SOCKET_RECV,
            };
            shared.fail(channel_id, error);
            return;
        }

        let frame_len = u32::from_be_bytes(len_bytes) as usize;
        if frame_len > limit {
            warn!(channel_id, frame_len, limit, "Inbound frame exceeds maximum");
            shared.fail(channel_id, ERR_FRAME_TOO_LARGE);
            return;
        }
        if frame_len == 0 {
            shared.fail(channel_id, ERR_MALFORMED_FRAME);
            return;
        }

        let mut frame = BytesMut::zeroed(frame_len);
        if let Err(e) = reader.read_exact(&mut frame).await {
            debug!(channel_id, frame_len, "TCP frame truncated: {}", e);
            shared.fail(channel_id, ERR_PEER_DISCONNECT);
            return;
        }

        shared.metrics.record_receive(frame_len);
        let frame = frame.freeze();
        if !shared.channels.lock().contains_key(&channel_id) {
            return;
        }
        shared.emit(ServiceEvent::Read { channel_id, frame });
    }
}

