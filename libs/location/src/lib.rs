//! # Locus Location Service
//!
//! ```text
//!   caller ── LocationProxy ──► ObjectXxxRequest ──► registry process
//!                                                      │
//!                                            handlers ─┴─► LocationRegistry
//!                                                          (per-key coroutine locks)
//!
//!   caller ── LocationSender ── resolve via proxy ──► ActorRouter ──► actor
//! ```
//!
//! - [`LocationRegistry`]: the authoritative key → actor map with migration locks
//! - [`register_handlers`]: exposes the registry on a [`network::MessageDispatcher`]
//! - [`LocationProxy`]: typed client for the registry RPCs
//! - [`LocationSender`]: delivery by location key with cache and retry

pub mod error;
pub mod handlers;
pub mod proxy;
pub mod registry;
pub mod sender;

pub use error::{LocationError, Result};
pub use handlers::register_handlers;
pub use proxy::LocationProxy;
pub use registry::{LocationRegistry, RegistryConfig, RegistryStats};
pub use sender::{LocationSender, SenderConfig};
