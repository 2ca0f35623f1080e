//! UDP Datagram Service
//!
//! Channels over one shared UDP socket with a small connection protocol and
//! the [`ReliableChannel`] state machine for ordering and retransmission.
//!
//! ```text
//! ┌──────────┬─────────────────┬───────────────────┬──────────────────────┐
//! │ flag:u8  │ sender_conn:u32 │ receiver_conn:u32 │ flag-specific fields │
//! └──────────┴─────────────────┴───────────────────┴──────────────────────┘
//!   SYN=1      connector's id     0
//!   ACK=2      acceptor's id      connector's id
//!   FIN=3      ...                ...                error:i32
//!   MSG=4      ...                ...                seq:u32 | frame
//!   MSG_ACK=5  ...                ...                next_expected:u32
//! ```
//!
//! A single driver task owns the socket and all channel state. Service
//! methods only post commands to it, so they never block and never contend
//! with socket I/O.

use super::metrics::{TrafficMetrics, TrafficSnapshot};
use super::reliable::{ReliableChannel, ReliableConfig};
use super::{Service, ServiceEvent, ServiceEvents, ServiceKind};
use crate::ids::ChannelIdAllocator;
use crate::{Result, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use codec::error_code::{
    ERR_ACCEPT_TIMEOUT, ERR_CONNECT_TIMEOUT, ERR_FRAME_TOO_LARGE, ERR_NOT_FOUND_CHANNEL,
    ERR_PEER_DISCONNECT, ERR_PEER_TIMEOUT, ERR_SERVICE_DISPOSED,
};
use num_enum::TryFromPrimitive;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

const HEADER_LEN: usize = 9;
const MSG_HEADER_LEN: usize = HEADER_LEN + 4;
const MAX_UDP_PAYLOAD: usize = 65_507;

/// UDP service configuration
#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub bind_address: SocketAddr,
    /// Handshake deadline for both connecting and accepting sides
    pub connect_timeout: Duration,
    pub resend_interval: Duration,
    pub max_resends: u32,
    pub send_window: usize,
    pub max_datagram_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            connect_timeout: Duration::from_secs(5),
            resend_interval: Duration::from_millis(200),
            max_resends: 10,
            send_window: 128,
            max_datagram_size: 1400,
        }
    }
}

impl UdpConfig {
    fn reliable(&self) -> ReliableConfig {
        ReliableConfig {
            resend_interval: self.resend_interval,
            max_resends: self.max_resends,
            send_window: self.send_window,
        }
    }

    /// Frames are never fragmented, so one frame plus the MSG header must fit a datagram
    pub fn max_frame_size(&self) -> usize {
        self.max_datagram_size.saturating_sub(MSG_HEADER_LEN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum Flag {
    Syn = 1,
    Ack = 2,
    Fin = 3,
    Msg = 4,
    MsgAck = 5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Packet {
    Syn { sender: u32 },
    Ack { sender: u32, receiver: u32 },
    Fin { sender: u32, receiver: u32, error: i32 },
    Msg { sender: u32, receiver: u32, seq: u32, frame: Bytes },
    MsgAck { sender: u32, receiver: u32, next: u32 },
}

impl Packet {
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MSG_HEADER_LEN);
        match self {
            Packet::Syn { sender } => put_header(&mut buf, Flag::Syn, *sender, 0),
            Packet::Ack { sender, receiver } => put_header(&mut buf, Flag::Ack, *sender, *receiver),
            Packet::Fin {
                sender,
                receiver,
                error,
            } => {
                put_header(&mut buf, Flag::Fin, *sender, *receiver);
                buf.put_i32_le(*error);
            }
            Packet::Msg {
                sender,
                receiver,
                seq,
                frame,
            } => {
                buf.reserve(frame.len());
                put_header(&mut buf, Flag::Msg, *sender, *receiver);
                buf.put_u32_le(*seq);
                buf.put_slice(frame);
            }
            Packet::MsgAck {
                sender,
                receiver,
                next,
            } => {
                put_header(&mut buf, Flag::MsgAck, *sender, *receiver);
                buf.put_u32_le(*next);
            }
        }
        buf.freeze()
    }

    fn decode(mut data: Bytes) -> Option<Packet> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let flag = Flag::try_from(data.get_u8()).ok()?;
        let sender = data.get_u32_le();
        let receiver = data.get_u32_le();
        let packet = match flag {
            Flag::Syn => Packet::Syn { sender },
            Flag::Ack => Packet::Ack { sender, receiver },
            Flag::Fin if data.remaining() >= 4 => Packet::Fin {
                sender,
                receiver,
                error: data.get_i32_le(),
            },
            Flag::Msg if data.remaining() >= 4 => {
                let seq = data.get_u32_le();
                Packet::Msg {
                    sender,
                    receiver,
                    seq,
                    frame: data,
                }
            }
            Flag::MsgAck if data.remaining() >= 4 => Packet::MsgAck {
                sender,
                receiver,
                next: data.get_u32_le(),
            },
            _ => return None,
        };
        Some(packet)
    }
}

fn put_header(buf: &mut BytesMut, flag: Flag, sender: u32, receiver: u32) {
    buf.put_u8(flag as u8);
    buf.put_u32_le(sender);
    buf.put_u32_le(receiver);
}

enum Command {
    Connect { channel_id: u32, remote: SocketAddr },
    Send { channel_id: u32, frame: Bytes },
    Remove { channel_id: u32, error: i32 },
    Dispose,
}

/// Datagram flavor of [`Service`]
pub struct UdpService {
    local_addr: SocketAddr,
    max_frame_size: usize,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedSender<ServiceEvent>,
    metrics: TrafficMetrics,
    disposed: AtomicBool,
    driver: Mutex<Option<AbortHandle>>,
}

impl UdpService {
    pub async fn bind(config: UdpConfig) -> Result<(Arc<Self>, ServiceEvents)> {
        if config.max_datagram_size <= MSG_HEADER_LEN || config.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(TransportError::configuration(
                format!(
                    "max_datagram_size must be in ({MSG_HEADER_LEN}, {MAX_UDP_PAYLOAD}], got {}",
                    config.max_datagram_size
                ),
                Some("max_datagram_size"),
            ));
        }
        if config.send_window == 0 {
            return Err(TransportError::configuration(
                "send_window must be positive",
                Some("send_window"),
            ));
        }

        let socket = UdpSocket::bind(config.bind_address).await.map_err(|e| {
            TransportError::network_with_source(
                format!("Failed to bind UDP socket on {}", config.bind_address),
                e,
            )
        })?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::network_with_source("Failed to read local address", e))?;

        let (events, receiver) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let metrics = TrafficMetrics::new();

        let driver = Driver {
            socket,
            reliable: config.reliable(),
            max_frame_size: config.max_frame_size(),
            connect_timeout: config.connect_timeout,
            resend_interval: config.resend_interval,
            channels: HashMap::new(),
            accepted: HashMap::new(),
            acceptor_ids: ChannelIdAllocator::acceptor(),
            events: events.clone(),
            metrics: metrics.clone(),
        };
        let task = tokio::spawn(driver.run(command_rx));
        info!(%local_addr, "UDP service listening");

        let service = Arc::new(Self {
            local_addr,
            max_frame_size: config.max_frame_size(),
            commands,
            events,
            metrics,
            disposed: AtomicBool::new(false),
            driver: Mutex::new(Some(task.abort_handle())),
        });
        Ok((service, receiver))
    }

    fn post(&self, command: Command) -> bool {
        !self.disposed.load(Ordering::Acquire) && self.commands.send(command).is_ok()
    }
}

impl Service for UdpService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Udp
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn connect(&self, channel_id: u32, remote: SocketAddr) {
        if !self.post(Command::Connect { channel_id, remote }) {
            let _ = self.events.send(ServiceEvent::Error {
                channel_id,
                error: ERR_SERVICE_DISPOSED,
            });
        }
    }

    fn send(&self, channel_id: u32, frame: Bytes) {
        if !self.post(Command::Send { channel_id, frame }) {
            debug!(channel_id, "Send on disposed UDP service dropped");
        }
    }

    fn remove(&self, channel_id: u32, error: i32) {
        self.post(Command::Remove { channel_id, error });
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn metrics(&self) -> TrafficSnapshot {
        self.metrics.snapshot()
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The driver says goodbye to its peers, then exits
        if self.commands.send(Command::Dispose).is_err() {
            if let Some(driver) = self.driver.lock().take() {
                driver.abort();
            }
        }
    }
}

impl Drop for UdpService {
    fn drop(&mut self) {
        self.dispose();
    }
}

enum ChannelState {
    /// SYN sent, waiting for ACK
    Connecting { started: Instant, last_syn: Instant },
    /// ACK sent, waiting for the first MSG
    Accepted { since: Instant },
    Connected,
}

struct UdpChannel {
    remote: SocketAddr,
    /// Peer's id for this channel; 0 until the handshake tells us
    remote_conn: u32,
    state: ChannelState,
    reliable: ReliableChannel,
}

struct Driver {
    socket: UdpSocket,
    reliable: ReliableConfig,
    max_frame_size: usize,
    connect_timeout: Duration,
    resend_interval: Duration,
    channels: HashMap<u32, UdpChannel>,
    /// (peer address, peer conn) -> local id, to absorb repeated SYNs
    accepted: HashMap<(SocketAddr, u32), u32>,
    acceptor_ids: ChannelIdAllocator,
    events: mpsc::UnboundedSender<ServiceEvent>,
    metrics: TrafficMetrics,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        let tick_every = (self.resend_interval / 2).max(Duration::from_millis(1));
        let mut tick = tokio::time::interval(tick_every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Dispose) | None => {
                        self.shutdown().await;
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        let data = Bytes::copy_from_slice(&buf[..len]);
                        self.handle_datagram(data, from).await;
                    }
                    // ICMP unreachable surfaces here on some platforms; the
                    // affected channel times out on its own.
                    Err(e) => debug!("UDP receive error: {}", e),
                },
                _ = tick.tick() => self.on_tick(Instant::now()).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { channel_id, remote } => {
                if self.channels.contains_key(&channel_id) {
                    warn!(channel_id, "Channel id already in use, connect ignored");
                    return;
                }
                let now = Instant::now();
                self.channels.insert(
                    channel_id,
                    UdpChannel {
                        remote,
                        remote_conn: 0,
                        state: ChannelState::Connecting {
                            started: now,
                            last_syn: now,
                        },
                        reliable: ReliableChannel::new(self.reliable.clone()),
                    },
                );
                debug!(channel_id, %remote, "UDP connect");
                self.send_packet(&Packet::Syn { sender: channel_id }, remote).await;
            }
            Command::Send { channel_id, frame } => {
                if frame.len() > self.max_frame_size {
                    warn!(channel_id, size = frame.len(), limit = self.max_frame_size, "Outbound frame too large");
                    self.fail(channel_id, ERR_FRAME_TOO_LARGE, true).await;
                    return;
                }
                let Some(channel) = self.channels.get_mut(&channel_id) else {
                    debug!(channel_id, "Send on unknown channel dropped");
                    return;
                };
                channel.reliable.enqueue(frame);
                self.flush(channel_id, Instant::now()).await;
            }
            Command::Remove { channel_id, error } => {
                if let Some(channel) = self.forget(channel_id) {
                    debug!(channel_id, remote = %channel.remote, error, "UDP channel removed");
                    if channel.remote_conn != 0 {
                        let fin = Packet::Fin {
                            sender: channel_id,
                            receiver: channel.remote_conn,
                            error,
                        };
                        self.send_packet(&fin, channel.remote).await;
                    }
                }
            }
            Command::Dispose => {}
        }
    }

    async fn handle_datagram(&mut self, data: Bytes, from: SocketAddr) {
        let Some(packet) = Packet::decode(data) else {
            debug!(%from, "Malformed UDP packet dropped");
            return;
        };

        match packet {
            Packet::Syn { sender } => {
                let channel_id = match self.accepted.get(&(from, sender)) {
                    Some(&existing) => existing,
                    None => {
                        let channel_id = self.acceptor_ids.next_id();
                        self.channels.insert(
                            channel_id,
                            UdpChannel {
                                remote: from,
                                remote_conn: sender,
                                state: ChannelState::Accepted {
                                    since: Instant::now(),
                                },
                                reliable: ReliableChannel::new(self.reliable.clone()),
                            },
                        );
                        self.accepted.insert((from, sender), channel_id);
                        debug!(channel_id, remote = %from, "UDP channel accepted");
                        self.emit(ServiceEvent::Accept {
                            channel_id,
                            remote: from,
                        });
                        channel_id
                    }
                };
                let ack = Packet::Ack {
                    sender: channel_id,
                    receiver: sender,
                };
                self.send_packet(&ack, from).await;
            }
            Packet::Ack { sender, receiver } => {
                let Some(channel) = self.channels.get_mut(&receiver) else {
                    return;
                };
                if channel.remote != from || !matches!(channel.state, ChannelState::Connecting { .. }) {
                    return;
                }
                channel.remote_conn = sender;
                channel.state = ChannelState::Connected;
                debug!(channel_id = receiver, remote = %from, "UDP channel connected");
                self.emit(ServiceEvent::Connected {
                    channel_id: receiver,
                    remote: from,
                });
                self.flush(receiver, Instant::now()).await;
            }
            Packet::Msg {
                sender,
                receiver,
                seq,
                frame,
            } => {
                let Some(channel) = self.channels.get_mut(&receiver) else {
                    let fin = Packet::Fin {
                        sender: receiver,
                        receiver: sender,
                        error: ERR_NOT_FOUND_CHANNEL,
                    };
                    self.send_packet(&fin, from).await;
                    return;
                };
                if channel.remote != from || channel.remote_conn != sender {
                    debug!(channel_id = receiver, %from, "MSG from unexpected peer dropped");
                    return;
                }
                match channel.state {
                    ChannelState::Connecting { .. } => return,
                    ChannelState::Accepted { .. } => channel.state = ChannelState::Connected,
                    ChannelState::Connected => {}
                }

                let delivered = channel.reliable.on_data(seq, frame);
                let ack = Packet::MsgAck {
                    sender: receiver,
                    receiver: sender,
                    next: channel.reliable.ack_number(),
                };
                self.send_packet(&ack, from).await;
                for frame in delivered {
                    self.metrics.record_receive(frame.len());
                    self.emit(ServiceEvent::Read {
                        channel_id: receiver,
                        frame,
                    });
                }
            }
            Packet::MsgAck {
                sender,
                receiver,
                next,
            } => {
                let Some(channel) = self.channels.get_mut(&receiver) else {
                    return;
                };
                if channel.remote != from || channel.remote_conn != sender {
                    return;
                }
                if channel.reliable.on_ack(next) > 0 {
                    self.flush(receiver, Instant::now()).await;
                }
            }
            Packet::Fin {
                sender,
                receiver,
                error,
            } => {
                let matches = self
                    .channels
                    .get(&receiver)
                    .map(|c| c.remote == from && (c.remote_conn == sender || c.remote_conn == 0))
                    .unwrap_or(false);
                if matches {
                    debug!(channel_id = receiver, peer_error = error, "UDP peer closed channel");
                    self.fail(receiver, ERR_PEER_DISCONNECT, false).await;
                }
            }
        }
    }

    async fn on_tick(&mut self, now: Instant) {
        let ids: Vec<u32> = self.channels.keys().copied().collect();
        for channel_id in ids {
            let Some(channel) = self.channels.get_mut(&channel_id) else {
                continue;
            };
            match &mut channel.state {
                ChannelState::Connecting { started, last_syn } => {
                    if now.duration_since(*started) >= self.connect_timeout {
                        self.fail(channel_id, ERR_CONNECT_TIMEOUT, false).await;
                    } else if now.duration_since(*last_syn) >= self.resend_interval {
                        *last_syn = now;
                        let remote = channel.remote;
                        self.send_packet(&Packet::Syn { sender: channel_id }, remote).await;
                    }
                }
                ChannelState::Accepted { since } => {
                    if now.duration_since(*since) >= self.connect_timeout {
                        self.fail(channel_id, ERR_ACCEPT_TIMEOUT, true).await;
                    } else {
                        self.flush(channel_id, now).await;
                    }
                }
                ChannelState::Connected => self.flush(channel_id, now).await,
            }
        }
    }

    /// Put due segments of one channel on the wire
    async fn flush(&mut self, channel_id: u32, now: Instant) {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return;
        };
        if matches!(channel.state, ChannelState::Connecting { .. }) {
            return;
        }

        let segments = match channel.reliable.poll_transmit(now) {
            Ok(segments) => segments,
            Err(timeout) => {
                warn!(channel_id, seq = timeout.seq, resends = timeout.resends, "UDP peer stopped acknowledging");
                self.fail(channel_id, ERR_PEER_TIMEOUT, true).await;
                return;
            }
        };

        let (remote, remote_conn) = (channel.remote, channel.remote_conn);
        for segment in segments {
            if segment.retransmit {
                self.metrics.record_retransmit();
            } else {
                self.metrics.record_send(segment.frame.len());
            }
            let msg = Packet::Msg {
                sender: channel_id,
                receiver: remote_conn,
                seq: segment.seq,
                frame: segment.frame,
            };
            self.send_packet(&msg, remote).await;
        }
    }

    fn forget(&mut self, channel_id: u32) -> Option<UdpChannel> {
        let channel = self.channels.remove(&channel_id)?;
        if self.accepted.get(&(channel.remote, channel.remote_conn)) == Some(&channel_id) {
            self.accepted.remove(&(channel.remote, channel.remote_conn));
        }
        Some(channel)
    }

    async fn fail(&mut self, channel_id: u32, error: i32, notify_peer: bool) {
        let Some(channel) = self.forget(channel_id) else {
            return;
        };
        warn!(
            channel_id,
            remote = %channel.remote,
            error,
            reason = codec::error_code::describe(error),
            "UDP channel failed"
        );
        if notify_peer && channel.remote_conn != 0 {
            let fin = Packet::Fin {
                sender: channel_id,
                receiver: channel.remote_conn,
                error,
            };
            self.send_packet(&fin, channel.remote).await;
        }
        self.metrics.record_error(error);
        self.emit(ServiceEvent::Error { channel_id, error });
    }

    async fn shutdown(&mut self) {
        let channels: Vec<(u32, UdpChannel)> = self.channels.drain().collect();
        self.accepted.clear();
        for (channel_id, channel) in channels {
            if channel.remote_conn != 0 {
                let fin = Packet::Fin {
                    sender: channel_id,
                    receiver: channel.remote_conn,
                    error: ERR_SERVICE_DISPOSED,
                };
                self.send_packet(&fin, channel.remote).await;
            }
        }
        info!("UDP service disposed");
    }

    async fn send_packet(&self, packet: &Packet, to: SocketAddr) {
        if let Err(e) = self.socket.send_to(&packet.encode(), to).await {
            debug!(%to, "UDP send failed: {}", e);
        }
    }

    fn emit(&self, event: ServiceEvent) {
        let _ = self.events.send(event);
    }
}
