//! Instance id generation
//!
//! Instance ids only need to be unique per [`Address`](crate::Address), but
//! successive processes reusing the same address must not hand out ids that
//! collide with a previous run. The generator seeds the high 32 bits with the
//! seconds elapsed since the Locus epoch and counts up from there.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 2024-01-01T00:00:00Z
const LOCUS_EPOCH_SECS: u64 = 1_704_067_200;

/// Process-wide monotonic instance id source
#[derive(Debug)]
pub struct InstanceIdGenerator {
    next: AtomicI64,
}

impl InstanceIdGenerator {
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(LOCUS_EPOCH_SECS)
            .saturating_sub(LOCUS_EPOCH_SECS);
        Self::starting_at(((secs & 0x7FFF_FFFF) as i64) << 32 | 1)
    }

    /// Generator with an explicit first value, for deterministic tests
    pub const fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for InstanceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
