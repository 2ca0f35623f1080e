//! Fiber-Based Actor Runtime
//!
//! Single-threaded execution units, the cooperative locks that serialize
//! work inside them, and routing of actor messages within and across
//! processes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────── process P1 ─────────────────────┐
//! │                                                     │
//! │  FiberManager                                       │
//! │   ├─ Fiber P1:F1 ── FiberContext ── EntityArena     │
//! │   │                    │   └─ actors (mailboxes)    │
//! │   │                    └─ CoroutineLockManager      │
//! │   └─ Fiber P1:F2 ...                                │
//! │                                                     │
//! │  ActorRouter ── local mailboxes                     │      ┌─────────┐
//! │       └──────── NetComponent ───────────────────────┼────► │ P2 ...  │
//! └─────────────────────────────────────────────────────┘      └─────────┘
//! ```
//!
//! # Modules
//!
//! - [`coroutine_lock`]: FIFO per-key locks that suspend tasks, not threads
//! - [`fiber`]: fibers, their work queues and explicit contexts
//! - [`arena`]: parent/child ownership by stable integer ids
//! - [`router`]: local and cross-process actor delivery
//! - [`timer`]: the timer service collaborators sleep through

pub mod arena;
pub mod coroutine_lock;
pub mod error;
pub mod fiber;
pub mod router;
pub mod timer;

pub use arena::EntityArena;
pub use coroutine_lock::{CoroutineLockManager, LockGuard, LockType};
pub use error::{FiberError, LockError, LockResult, Result};
pub use fiber::{Actor, Fiber, FiberContext, FiberHandle, FiberManager};
pub use router::{ActorMail, ActorRouter, MailAck, Mailbox};
pub use timer::{TimerService, TokioTimer};
