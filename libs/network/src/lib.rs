//! # Locus Network Layer
//!
//! ```text
//!   ┌──────────────┐  events   ┌──────────────┐  envelopes  ┌────────────────────┐
//!   │ TcpService / │ ────────► │ NetComponent │ ──────────► │ Session            │
//!   │ UdpService   │ ◄──────── │ (event loop) │             │ (rpc correlation)  │
//!   └──────────────┘  frames   └──────┬───────┘             └────────────────────┘
//!                                     │ requests / messages
//!                                     ▼
//!                             ┌───────────────────┐
//!                             │ MessageDispatcher │
//!                             └───────────────────┘
//! ```
//!
//! - [`transports`]: channel-multiplexing services. Operations never block;
//!   completions arrive as [`ServiceEvent`]s on one receiver.
//! - [`Session`]: one channel's request/response endpoint.
//! - [`MessageDispatcher`]: explicit opcode → handler registry.
//! - [`NetComponent`]: ties a service, its sessions and a dispatcher together.
//! - [`CancellationToken`]: `tokio-util`'s token, threaded through calls that may suspend.

pub mod component;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod session;
pub mod transports;

pub use component::NetComponent;
pub use dispatcher::MessageDispatcher;
pub use error::{Result, TransportError};
pub use ids::ChannelIdAllocator;
pub use session::{Direction, Session, SessionConfig};
pub use tokio_util::sync::CancellationToken;
pub use transports::{
    Service, ServiceConfig, ServiceEvent, ServiceEvents, ServiceFactory, ServiceKind, TcpConfig,
    TcpService, UdpConfig, UdpService,
};
