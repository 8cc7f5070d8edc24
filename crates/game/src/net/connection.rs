use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::frame::{FrameHeader, Message, Strategy};
use super::tracking::{sequence_greater_than, AckTracker, ReceiveTracker};

const SEEN_RELIABLE_CAPACITY: usize = 1024;
/// How far ahead of the next expected order an ordered message may be.
pub(crate) const ORDER_WINDOW: u32 = SEEN_RELIABLE_CAPACITY as u32;

/// An ordered message arrived too far ahead of the stream to be buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OrderWindowExceeded {
    pub order: u32,
    pub expected: u32,
}

impl fmt::Display for OrderWindowExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ordered message {} is too far ahead of {}",
            self.order, self.expected
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug)]
pub(crate) struct PendingMessage {
    pub message: Message,
    pub last_sent: Instant,
}

/// Per-peer link state: sequencing, acks, reliable resends and the ordered
/// receive window.
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub(crate) state_since: Instant,
    pub(crate) last_receive_time: Instant,
    pub(crate) last_send_time: Instant,
    pub(crate) ack_pending: bool,
    send_sequence: u32,
    ack_tracker: AckTracker,
    receive_tracker: ReceiveTracker,
    next_message_id: u32,
    next_order_out: u32,
    next_order_in: u32,
    pending: Vec<PendingMessage>,
    in_flight: HashMap<u32, u32>,
    order_buffer: BTreeMap<u32, Vec<u8>>,
    seen_reliable: HashSet<u32>,
    seen_order: VecDeque<u32>,
}

impl Peer {
    pub fn new(id: PeerId, addr: SocketAddr, state: ConnectionState) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            state,
            state_since: now,
            last_receive_time: now,
            last_send_time: now,
            ack_pending: false,
            // sequence 0 is never sent so that an empty ack field acks nothing
            send_sequence: 1,
            ack_tracker: AckTracker::new(256),
            receive_tracker: ReceiveTracker::new(),
            next_message_id: 0,
            next_order_out: 0,
            next_order_in: 0,
            pending: Vec::new(),
            in_flight: HashMap::new(),
            order_buffer: BTreeMap::new(),
            seen_reliable: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_since = Instant::now();
    }

    pub fn rtt_ms(&self) -> f32 {
        self.ack_tracker.srtt()
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Allocates the next outbound sequence and stamps it with our ack state.
    pub(crate) fn next_header(&mut self) -> FrameHeader {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        if self.send_sequence == 0 {
            self.send_sequence = 1;
        }
        self.ack_tracker.track(sequence);
        self.ack_pending = false;
        self.last_send_time = Instant::now();

        let (ack, ack_bitfield) = self.receive_tracker.ack_data();
        FrameHeader {
            sequence,
            ack,
            ack_bitfield,
        }
    }

    pub(crate) fn new_message(&mut self, strategy: Strategy, payload: Vec<u8>) -> Message {
        let mut message = Message {
            strategy,
            id: 0,
            order: 0,
            payload,
        };
        if strategy.is_reliable() {
            message.id = self.next_message_id;
            self.next_message_id = self.next_message_id.wrapping_add(1);
        }
        if strategy == Strategy::Ordered {
            message.order = self.next_order_out;
            self.next_order_out = self.next_order_out.wrapping_add(1);
        }
        message
    }

    /// Records that `message` went out under `sequence`, keeping it for resend
    /// if it is reliable.
    pub(crate) fn track_sent(&mut self, sequence: u32, message: &Message) {
        if !message.strategy.is_reliable() {
            return;
        }
        self.in_flight.insert(sequence, message.id);
        let now = Instant::now();
        match self.pending.iter_mut().find(|p| p.message.id == message.id) {
            Some(pending) => pending.last_sent = now,
            None => self.pending.push(PendingMessage {
                message: message.clone(),
                last_sent: now,
            }),
        }
    }

    /// Reliable messages whose ack is overdue.
    pub(crate) fn due_for_resend(&self) -> Vec<Message> {
        let timeout = self.ack_tracker.resend_timeout();
        self.pending
            .iter()
            .filter(|p| p.last_sent.elapsed() >= timeout)
            .map(|p| p.message.clone())
            .collect()
    }

    /// Applies an inbound header. Returns false if the datagram is a
    /// duplicate and must be ignored.
    pub(crate) fn process_header(&mut self, header: &FrameHeader) -> bool {
        self.last_receive_time = Instant::now();
        if !self.receive_tracker.record(header.sequence) {
            return false;
        }

        for sequence in self.ack_tracker.process_ack(header.ack, header.ack_bitfield) {
            if let Some(id) = self.in_flight.remove(&sequence) {
                self.pending.retain(|p| p.message.id != id);
            }
        }
        if self.in_flight.len() > 4 * SEEN_RELIABLE_CAPACITY {
            let live: HashSet<u32> = self.pending.iter().map(|p| p.message.id).collect();
            self.in_flight.retain(|_, id| live.contains(id));
        }

        true
    }

    /// Accepts an inbound message and returns the payloads now deliverable to
    /// the application, in delivery order.
    ///
    /// The datagram carrying `message` is already acked, so an ordered message
    /// past the window cannot be dropped quietly; the caller must close the
    /// link instead.
    pub(crate) fn accept_message(
        &mut self,
        message: Message,
    ) -> Result<Vec<Vec<u8>>, OrderWindowExceeded> {
        if message.strategy.is_reliable() {
            self.ack_pending = true;
        }

        match message.strategy {
            Strategy::Unreliable => Ok(vec![message.payload]),
            Strategy::Reliable => {
                if !self.remember_reliable(message.id) {
                    return Ok(Vec::new());
                }
                Ok(vec![message.payload])
            }
            Strategy::Ordered => {
                if message.order != self.next_order_in
                    && !sequence_greater_than(message.order, self.next_order_in)
                {
                    return Ok(Vec::new());
                }
                if message.order.wrapping_sub(self.next_order_in) >= ORDER_WINDOW {
                    return Err(OrderWindowExceeded {
                        order: message.order,
                        expected: self.next_order_in,
                    });
                }
                self.order_buffer.entry(message.order).or_insert(message.payload);

                let mut ready = Vec::new();
                while let Some(payload) = self.order_buffer.remove(&self.next_order_in) {
                    ready.push(payload);
                    self.next_order_in = self.next_order_in.wrapping_add(1);
                }
                Ok(ready)
            }
        }
    }

    fn remember_reliable(&mut self, id: u32) -> bool {
        if !self.seen_reliable.insert(id) {
            return false;
        }
        self.seen_order.push_back(id);
        if self.seen_order.len() > SEEN_RELIABLE_CAPACITY {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen_reliable.remove(&old);
            }
        }
        true
    }
}
