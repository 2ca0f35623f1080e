//! Datagram reliability state machine
//!
//! Sequencing, cumulative acknowledgement, reordering and retransmission for
//! one datagram channel, with no I/O of its own. The UDP service feeds it
//! received segments and acks, asks it what to put on the wire, and turns a
//! [`PeerTimeout`] into a channel failure.
//!
//! Sequence numbers are `u32` and compared with wrapping arithmetic, so a
//! long-lived channel survives the wrap.

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Segments further ahead than this are dropped instead of buffered
const MAX_REORDER_DISTANCE: u32 = 4096;

#[derive(Debug, Clone)]
pub struct ReliableConfig {
    pub resend_interval: Duration,
    /// Retransmissions of one segment before the peer is declared dead
    pub max_resends: u32,
    /// Unacknowledged segments allowed in flight
    pub send_window: usize,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            resend_interval: Duration::from_millis(200),
            max_resends: 10,
            send_window: 128,
        }
    }
}

/// One segment to put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub seq: u32,
    pub frame: Bytes,
    pub retransmit: bool,
}

/// A segment exhausted its retransmissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerTimeout {
    pub seq: u32,
    pub resends: u32,
}

struct InFlight {
    seq: u32,
    frame: Bytes,
    sent_at: Instant,
    resends: u32,
}

/// `a` precedes `b` in wrapping sequence order
fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

pub struct ReliableChannel {
    config: ReliableConfig,
    next_seq: u32,
    in_flight: VecDeque<InFlight>,
    backlog: VecDeque<Bytes>,
    recv_next: u32,
    out_of_order: HashMap<u32, Bytes>,
}

impl ReliableChannel {
    pub fn new(config: ReliableConfig) -> Self {
        Self::starting_at(config, 0, 0)
    }

    /// Channel whose first outbound and expected inbound sequences are given
    pub fn starting_at(config: ReliableConfig, send_seq: u32, recv_seq: u32) -> Self {
        Self {
            config,
            next_seq: send_seq,
            in_flight: VecDeque::new(),
            backlog: VecDeque::new(),
            recv_next: recv_seq,
            out_of_order: HashMap::new(),
        }
    }

    /// Queue a frame for transmission
    pub fn enqueue(&mut self, frame: Bytes) {
        self.backlog.push_back(frame);
    }

    /// Segments due at `now`: retransmissions first, then new segments while
    /// the window has room
    pub fn poll_transmit(&mut self, now: Instant) -> Result<Vec<Segment>, PeerTimeout> {
        let mut segments = Vec::new();

        for entry in self.in_flight.iter_mut() {
            if now.duration_since(entry.sent_at) < self.config.resend_interval {
                continue;
            }
            if entry.resends >= self.config.max_resends {
                return Err(PeerTimeout {
                    seq: entry.seq,
                    resends: entry.resends,
                });
            }
            entry.resends += 1;
            entry.sent_at = now;
            segments.push(Segment {
                seq: entry.seq,
                frame: entry.frame.clone(),
                retransmit: true,
            });
        }

        while self.in_flight.len() < self.config.send_window {
            let Some(frame) = self.backlog.pop_front() else {
                break;
            };
            let seq = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);
            segments.push(Segment {
                seq,
                frame: frame.clone(),
                retransmit: false,
            });
            self.in_flight.push_back(InFlight {
                seq,
                frame,
                sent_at: now,
                resends: 0,
            });
        }

        Ok(segments)
    }

    /// Cumulative ack: the peer has everything before `next_expected`
    ///
    /// Returns how many in-flight segments were released.
    pub fn on_ack(&mut self, next_expected: u32) -> usize {
        if seq_before(self.next_seq, next_expected) {
            // Acknowledges segments never sent
            return 0;
        }
        let mut released = 0;
        while let Some(front) = self.in_flight.front() {
            if !seq_before(front.seq, next_expected) {
                break;
            }
            self.in_flight.pop_front();
            released += 1;
        }
        released
    }

    /// Accept one inbound segment; returns the frames now deliverable in order
    pub fn on_data(&mut self, seq: u32, frame: Bytes) -> Vec<Bytes> {
        if seq_before(seq, self.recv_next) {
            return Vec::new();
        }
        if seq.wrapping_sub(self.recv_next) >= MAX_REORDER_DISTANCE {
            return Vec::new();
        }

        self.out_of_order.insert(seq, frame);
        let mut delivered = Vec::new();
        while let Some(frame) = self.out_of_order.remove(&self.recv_next) {
            delivered.push(frame);
            self.recv_next = self.recv_next.wrapping_add(1);
        }
        delivered
    }

    /// Sequence number to advertise in the next ack
    pub fn ack_number(&self) -> u32 {
        self.recv_next
    }

    /// Whether any outbound frame is still unacknowledged or waiting
    pub fn has_pending(&self) -> bool {
        !self.in_flight.is_empty() || !self.backlog.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> ReliableConfig {
        ReliableConfig {
            resend_interval: Duration::from_millis(100),
            max_resends: 2,
            send_window: 2,
        }
    }

    fn frame(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[test]
    fn test_window_limits_in_flight() {
        let mut channel = ReliableChannel::new(config());
        let now = Instant::now();
        for n in 0..3 {
            channel.enqueue(frame(n));
        }

        let first = channel.poll_transmit(now).unwrap();
        assert_eq!(first.iter().map(|s| s.seq).collect::<Vec<_>>(), vec![0, 1]);
        assert!(channel.poll_transmit(now).unwrap().is_empty());

        assert_eq!(channel.on_ack(1), 1);
        let next = channel.poll_transmit(now).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].seq, 2);
        assert!(!next[0].retransmit);
    }

    #[test]
    fn test_retransmit_then_peer_timeout() {
        let mut channel = ReliableChannel::new(config());
        let start = Instant::now();
        channel.enqueue(frame(7));
        channel.poll_transmit(start).unwrap();

        assert!(channel
            .poll_transmit(start + Duration::from_millis(50))
            .unwrap()
            .is_empty());

        let resent = channel
            .poll_transmit(start + Duration::from_millis(100))
            .unwrap();
        assert_eq!(resent.len(), 1);
        assert!(resent[0].retransmit);

        channel
            .poll_transmit(start + Duration::from_millis(200))
            .unwrap();
        let err = channel
            .poll_transmit(start + Duration::from_millis(300))
            .unwrap_err();
        assert_eq!(err, PeerTimeout { seq: 0, resends: 2 });
    }

    #[test]
    fn test_reorders_and_drops_duplicates() {
        let mut channel = ReliableChannel::new(config());
        assert!(channel.on_data(1, frame(1)).is_empty());
        assert!(channel.on_data(2, frame(2)).is_empty());
        assert_eq!(channel.ack_number(), 0);

        assert_eq!(
            channel.on_data(0, frame(0)),
            vec![frame(0), frame(1), frame(2)]
        );
        assert_eq!(channel.ack_number(), 3);
        assert!(channel.on_data(1, frame(1)).is_empty());
    }

    #[test]
    fn test_ack_beyond_sent_is_ignored() {
        let mut channel = ReliableChannel::new(config());
        channel.enqueue(frame(0));
        channel.poll_transmit(Instant::now()).unwrap();
        assert_eq!(channel.on_ack(5), 0);
        assert!(channel.has_pending());
        assert_eq!(channel.on_ack(1), 1);
        assert!(!channel.has_pending());
    }

    #[test]
    fn test_sequence_wraps() {
        let mut sender = ReliableChannel::starting_at(config(), u32::MAX, 0);
        let mut receiver = ReliableChannel::starting_at(config(), 0, u32::MAX);
        sender.enqueue(frame(1));
        sender.enqueue(frame(2));

        let segments = sender.poll_transmit(Instant::now()).unwrap();
        assert_eq!(segments[0].seq, u32::MAX);
        assert_eq!(segments[1].seq, 0);

        let mut delivered = receiver.on_data(segments[1].seq, segments[1].frame.clone());
        assert!(delivered.is_empty());
        delivered = receiver.on_data(segments[0].seq, segments[0].frame.clone());
        assert_eq!(delivered, vec![frame(1), frame(2)]);

        assert_eq!(sender.on_ack(receiver.ack_number()), 2);
    }

    proptest! {
        #[test]
        fn prop_any_arrival_order_delivers_in_order_once(
            order in Just((0u32..32).collect::<Vec<_>>()).prop_shuffle(),
            dups in proptest::collection::vec(0u32..32, 0..16),
        ) {
            let mut receiver = ReliableChannel::new(ReliableConfig::default());
            let mut delivered = Vec::new();
            for seq in order.iter().chain(dups.iter()) {
                delivered.extend(receiver.on_data(*seq, Bytes::from(seq.to_le_bytes().to_vec())));
            }
            let expected: Vec<Bytes> = (0u32..32).map(|s| Bytes::from(s.to_le_bytes().to_vec())).collect();
            prop_assert_eq!(delivered, expected);
            prop_assert_eq!(receiver.ack_number(), 32);
        }
    }
}
