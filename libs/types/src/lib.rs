//! # Locus Addressing Types
//!
//! Fixed-layout identifiers shared by every process in a Locus deployment.
//!
//! ## Identifier Hierarchy
//!
//! ```text
//! ┌──────────────────────────── ActorId (16 bytes) ───────────────────────────┐
//! │ ┌──────────── Address (8 bytes) ────────────┐                             │
//! │ │ process: i32 (0-3) │ fiber: i32 (4-7)     │  instance: i64 (8-15)       │
//! │ └───────────────────────────────────────────┘                             │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`Address`] names one single-threaded fiber inside one process.
//! - [`ActorId`] names one actor instance hosted on that fiber. The instance id
//!   changes every time an actor is re-created on the same address.
//! - [`LocationKey`] is the stable logical identity of a distributed object
//!   (a player id, a room id) that survives migrations between fibers.
//!
//! ## Wire Layout
//!
//! Fields are written little-endian in declaration order so independently
//! built processes agree on the representation. `serde` derives follow the
//! same order, so a fixed-int serializer (bincode) produces identical bytes.
//!
//! ```rust
//! use types::{ActorId, Address};
//!
//! let id = ActorId::new(Address::new(1, 3), 9);
//! assert_eq!(id.to_string(), "P1:F3:9");
//! assert_eq!("P1:F3:9".parse::<ActorId>().unwrap(), id);
//! ```

pub mod address;
pub mod error;
pub mod id_generator;
pub mod identifiers;

pub use address::{ActorId, Address};
pub use error::IdentifierError;
pub use id_generator::InstanceIdGenerator;
pub use identifiers::{LocationKey, LocationType};
