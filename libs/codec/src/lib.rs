//! # Locus Wire Codec
//!
//! ## Purpose
//!
//! The rules layer between identifiers and transport:
//! - the [`Envelope`] every session frame is made of
//! - the `i32` [`error_code`] table, the only error representation that
//!   crosses a process boundary
//! - [`PayloadFormat`], the pluggable body serializer keyed by opcode
//! - the [`Message`] / [`Request`] / [`Response`] traits and the registry
//!   and actor-routing message bodies
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → libs/network
//!     ↑           ↓             ↓
//!  ActorId    Envelope      Sessions
//!  Address    Error codes   Channels
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Stream length prefixes or datagram headers (belong to the transports)
//! - Request/response correlation (belongs to `network::Session`)

pub mod actor;
pub mod envelope;
pub mod error;
pub mod error_code;
pub mod location;
pub mod message;
pub mod opcode;
pub mod serializer;

pub use envelope::{Envelope, MessageKind, Opcode};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{Message, Request, Response};
pub use serializer::PayloadFormat;
