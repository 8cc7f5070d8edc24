use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Inbound sequences further behind than this are treated as stale.
const HISTORY_BITS: u32 = u128::BITS;

/// Wrapping comparison: true if `s1` was issued after `s2`.
#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    s1 != s2 && s1.wrapping_sub(s2) <= u32::MAX / 2
}

/// Whether a header carrying `ack`/`ack_bitfield` acknowledges `sequence`.
pub fn acknowledges(ack: u32, ack_bitfield: u32, sequence: u32) -> bool {
    if sequence == ack {
        return true;
    }
    if !sequence_greater_than(ack, sequence) {
        return false;
    }
    match ack.wrapping_sub(sequence) {
        behind @ 1..=32 => ack_bitfield & (1 << (behind - 1)) != 0,
        _ => false,
    }
}

/// Round trip estimate in milliseconds, smoothed the TCP way.
#[derive(Debug, Clone, Copy)]
struct RttEstimate {
    smoothed: f32,
    variance: f32,
}

impl RttEstimate {
    fn sample(&mut self, rtt_ms: f32) {
        let error = rtt_ms - self.smoothed;
        self.variance += (error.abs() - self.variance) / 4.0;
        self.smoothed += error / 8.0;
    }

    fn resend_timeout(&self) -> Duration {
        let ms = (self.smoothed + 4.0 * self.variance).clamp(30.0, 1000.0);
        Duration::from_secs_f32(ms / 1000.0)
    }
}

/// Outbound datagrams still waiting for an ack.
#[derive(Debug)]
pub struct AckTracker {
    unacked: VecDeque<(u32, Instant)>,
    capacity: usize,
    rtt: RttEstimate,
}

impl AckTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            unacked: VecDeque::with_capacity(capacity),
            capacity,
            rtt: RttEstimate {
                smoothed: 100.0,
                variance: 50.0,
            },
        }
    }

    pub fn track(&mut self, sequence: u32) {
        if self.unacked.len() == self.capacity {
            self.unacked.pop_front();
        }
        self.unacked.push_back((sequence, Instant::now()));
    }

    /// Drops every sequence the header acknowledges, sampling its round trip,
    /// and returns them.
    pub fn process_ack(&mut self, ack: u32, ack_bitfield: u32) -> Vec<u32> {
        let now = Instant::now();
        let mut acked = Vec::new();
        let rtt = &mut self.rtt;
        self.unacked.retain(|&(sequence, sent_at)| {
            if !acknowledges(ack, ack_bitfield, sequence) {
                return true;
            }
            rtt.sample(now.duration_since(sent_at).as_secs_f32() * 1000.0);
            acked.push(sequence);
            false
        });
        acked
    }

    pub fn srtt(&self) -> f32 {
        self.rtt.smoothed
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt.variance
    }

    /// How long a reliable message waits for an ack before it is resent.
    pub fn resend_timeout(&self) -> Duration {
        self.rtt.resend_timeout()
    }

    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }
}

/// The newest inbound sequence plus a bit per sequence behind it, used for
/// duplicate suppression and for the ack field we send back.
#[derive(Debug, Default)]
pub struct ReceiveTracker {
    head: u32,
    /// Bit `n` set means `head - (n + 1)` arrived.
    history: u128,
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for a duplicate or a sequence too old to tell.
    pub fn record(&mut self, sequence: u32) -> bool {
        if sequence == self.head {
            return false;
        }
        if sequence_greater_than(sequence, self.head) {
            let ahead = sequence.wrapping_sub(self.head);
            self.history = if ahead > HISTORY_BITS {
                0
            } else {
                // the old head lands on bit `ahead - 1`
                self.history.checked_shl(ahead).unwrap_or(0) | (1 << (ahead - 1))
            };
            self.head = sequence;
            return true;
        }

        let behind = self.head.wrapping_sub(sequence);
        if behind > HISTORY_BITS {
            return false;
        }
        let bit = 1u128 << (behind - 1);
        if self.history & bit != 0 {
            return false;
        }
        self.history |= bit;
        true
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.head, self.history as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_comparison_wraps() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(5, 5));
    }

    #[test]
    fn ack_field_covers_the_last_32() {
        assert!(acknowledges(10, 0, 10));
        assert!(acknowledges(10, 0b1, 9));
        assert!(!acknowledges(10, 0b1, 8));
        assert!(acknowledges(40, 1 << 31, 8));
        assert!(!acknowledges(41, u32::MAX, 8));
        assert!(!acknowledges(10, u32::MAX, 11));
    }

    #[test]
    fn in_order_sequences_fill_the_bitfield() {
        let mut tracker = ReceiveTracker::new();
        tracker.record(1);
        tracker.record(2);
        tracker.record(3);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn out_of_order_sequences_fill_the_bitfield() {
        let mut tracker = ReceiveTracker::new();
        tracker.record(3);
        tracker.record(1);
        tracker.record(2);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn duplicates_are_reported() {
        let mut tracker = ReceiveTracker::new();
        assert!(tracker.record(1));
        assert!(!tracker.record(1));
        assert!(tracker.record(2));
        assert!(!tracker.record(1));
    }

    #[test]
    fn stale_sequences_are_refused() {
        let mut tracker = ReceiveTracker::new();
        assert!(tracker.record(500));
        assert!(tracker.record(400));
        assert!(!tracker.record(300));
    }

    #[test]
    fn acks_resolve_tracked_sequences() {
        let mut sender = AckTracker::new(32);
        let mut receiver = ReceiveTracker::new();

        for sequence in 1..=4 {
            sender.track(sequence);
        }
        receiver.record(1);
        receiver.record(2);
        receiver.record(4);

        let (ack, bitfield) = receiver.ack_data();
        let mut acked = sender.process_ack(ack, bitfield);
        acked.sort();
        assert_eq!(acked, vec![1, 2, 4]);
        assert_eq!(sender.unacked_count(), 1);
    }

    #[test]
    fn rtt_moves_towards_samples() {
        let mut tracker = AckTracker::new(32);
        tracker.track(1);
        std::thread::sleep(Duration::from_millis(10));
        tracker.process_ack(1, 0);

        assert!(tracker.srtt() > 0.0);
        assert!(tracker.srtt() < 100.0);
        assert!(tracker.rtt_var() > 0.0);
        assert!(tracker.resend_timeout() >= Duration::from_millis(30));
    }
}
