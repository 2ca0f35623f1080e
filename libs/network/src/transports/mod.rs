//! Transport Services
//!
//! A [`Service`] owns one socket (a TCP listener or a UDP socket) and every
//! channel multiplexed over it. All operations return immediately; their
//! outcomes, and all inbound data, are reported as [`ServiceEvent`]s on the
//! single receiver handed out when the service is created. The owner drains
//! that receiver from one task, which makes it the only place where channel
//! state observed by sessions changes.

use crate::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod metrics;
pub mod reliable;
pub mod tcp;
pub mod udp;


pub use metrics::{TrafficMetrics, TrafficSnapshot};
pub use tcp::{TcpConfig, TcpService};
pub use udp::{UdpConfig, UdpService};

/// Receiving half of a service's event stream
pub type ServiceEvents = mpsc::UnboundedReceiver<ServiceEvent>;

/// Completion and data notifications raised by a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A peer opened a channel; `channel_id` was allocated by the service
    Accept { channel_id: u32, remote: SocketAddr },
    /// A channel opened with [`Service::connect`] is established
    Connected { channel_id: u32, remote: SocketAddr },
    /// One complete frame arrived on a channel
    Read { channel_id: u32, frame: Bytes },
    /// The channel is gone; no further events follow for `channel_id`
    Error { channel_id: u32, error: i32 },
}

impl ServiceEvent {
    pub fn channel_id(&self) -> u32 {
        match self {
            ServiceEvent::Accept { channel_id, .. }
            | ServiceEvent::Connected { channel_id, .. }
            | ServiceEvent::Read { channel_id, .. }
            | ServiceEvent::Error { channel_id, .. } => *channel_id,
        }
    }
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Reliable ordered byte stream
    #[default]
    Tcp,
    /// Datagrams with sequencing and retransmission on top
    Udp,
}

/// Channel-multiplexing transport contract shared by stream and datagram flavors
pub trait Service: Send + Sync + 'static {
    fn kind(&self) -> ServiceKind;

    /// Address the service is bound to
    fn local_addr(&self) -> SocketAddr;

    /// Open a channel to `remote` under the caller-supplied `channel_id`
    ///
    /// Completes with [`ServiceEvent::Connected`] or [`ServiceEvent::Error`].
    /// Frames sent before the connection completes are queued.
    fn connect(&self, channel_id: u32, remote: SocketAddr);

    /// Queue one frame; never blocks
    fn send(&self, channel_id: u32, frame: Bytes);

    /// Tear the channel down and forget its id; idempotent
    ///
    /// No [`ServiceEvent::Error`] is raised for a channel the owner removed.
    fn remove(&self, channel_id: u32, error: i32);

    /// Largest frame [`send`](Service::send) accepts
    fn max_frame_size(&self) -> usize;

    fn metrics(&self) -> TrafficSnapshot;

    /// Close the socket and every channel; idempotent
    fn dispose(&self);
}

/// Transport configuration enum
#[derive(Debug, Clone)]
pub enum ServiceConfig {
    Tcp(TcpConfig),
    Udp(UdpConfig),
}

/// Service factory for creating transport instances
pub struct ServiceFactory;

impl ServiceFactory {
    /// Bind a service from configuration
    pub async fn create(config: ServiceConfig) -> Result<(Arc<dyn Service>, ServiceEvents)> {
        match config {
            ServiceConfig::Tcp(config) => {
                let (service, events) = TcpService::bind(config).await?;
                Ok((service as Arc<dyn Service>, events))
            }
            ServiceConfig::Udp(config) => {
                let (service, events) = UdpService::bind(config).await?;
                Ok((service as Arc<dyn Service>, events))
            }
        }
    }
}
