//! Channel id allocation
//!
//! Connecting and accepting sides draw from disjoint halves of the `u32`
//! space so a channel id names one channel inside a process no matter which
//! side opened it. Zero is never handed out.

use std::sync::atomic::{AtomicU32, Ordering};

const ACCEPTOR_BASE: u32 = 1 << 31;

/// Monotonic, wrapping channel id source for one half of the id space
#[derive(Debug)]
pub struct ChannelIdAllocator {
    base: u32,
    next: AtomicU32,
}

impl ChannelIdAllocator {
    /// Ids in `[1, 2^31)`, used for channels this process connects
    pub const fn connector() -> Self {
        Self {
            base: 1,
            next: AtomicU32::new(0),
        }
    }

    /// Ids in `[2^31, 2^32)`, used for channels a service accepts
    pub const fn acceptor() -> Self {
        Self {
            base: ACCEPTOR_BASE,
            next: AtomicU32::new(0),
        }
    }

    pub fn next_id(&self) -> u32 {
        let span = if self.base == ACCEPTOR_BASE {
            u32::MAX - ACCEPTOR_BASE + 1
        } else {
            ACCEPTOR_BASE - 1
        };
        let offset = self.next.fetch_add(1, Ordering::Relaxed) % span;
        self.base + offset
    }
}

/// Whether `channel_id` was allocated by an accepting service
pub fn is_accepted(channel_id: u32) -> bool {
    channel_id >= ACCEPTOR_BASE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halves_are_disjoint() {
        let connector = ChannelIdAllocator::connector();
        let acceptor = ChannelIdAllocator::acceptor();

        assert_eq!(connector.next_id(), 1);
        assert_eq!(connector.next_id(), 2);
        assert_eq!(acceptor.next_id(), 1 << 31);
        assert!(!is_accepted(2));
        assert!(is_accepted(acceptor.next_id()));
    }

    #[test]
    fn test_connector_wraps_without_zero() {
        let connector = ChannelIdAllocator {
            base: 1,
            next: AtomicU32::new(ACCEPTOR_BASE - 2),
        };
        assert_eq!(connector.next_id(), ACCEPTOR_BASE - 1);
        assert_eq!(connector.next_id(), 1);
    }
}
