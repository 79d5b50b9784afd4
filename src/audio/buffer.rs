//! Reorder buffer for jitter reduction
//!
//! Packets arrive in whatever order the network delivers them. The buffer keeps a
//! bounded min-heap keyed by sample position so the reader can always pull the
//! oldest outstanding audio next. When the heap overflows the oldest packet goes
//! first, which bounds both memory and the amount of jitter that can be absorbed.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::protocol::Packet;

/// Heap entry ordered by sample position only
struct Queued(Packet);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.0.sample_position == other.0.sample_position
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.sample_position.cmp(&other.0.sample_position)
    }
}

/// Outcome of offering a packet to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Packet is queued
    Buffered,
    /// Packet starts before the read offset and was dropped
    Stale,
    /// Buffer overflowed; the packet at this position was evicted
    Evicted(i32),
}

/// Bounded priority queue of packets ordered by ascending sample position
pub struct ReorderBuffer {
    heap: BinaryHeap<Reverse<Queued>>,
    /// Maximum number of buffered packets
    capacity: usize,
    /// Next stream position the consumer expects
    read_offset: i64,
    /// Packets accepted
    buffered: u64,
    /// Packets dropped for being behind the read offset
    stale: u64,
    /// Packets evicted on overflow
    evicted: u64,
}

impl ReorderBuffer {
    /// Create an empty buffer holding at most `capacity` packets
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            heap: BinaryHeap::with_capacity(capacity + 1),
            capacity,
            read_offset: 0,
            buffered: 0,
            stale: 0,
            evicted: 0,
        }
    }

    /// Insert a packet, dropping it if stale and evicting the oldest on overflow
    pub fn offer(&mut self, packet: Packet) -> Offer {
        if (packet.sample_position as i64) < self.read_offset {
            self.stale += 1;
            return Offer::Stale;
        }

        self.heap.push(Reverse(Queued(packet)));
        self.buffered += 1;

        if self.heap.len() > self.capacity {
            if let Some(Reverse(Queued(oldest))) = self.heap.pop() {
                self.evicted += 1;
                return Offer::Evicted(oldest.sample_position);
            }
        }
        Offer::Buffered
    }

    /// Remove and return the packet with the smallest sample position
    pub fn pop_min(&mut self) -> Option<Packet> {
        self.heap.pop().map(|Reverse(Queued(packet))| packet)
    }

    /// Smallest buffered sample position, if any
    pub fn peek_position(&self) -> Option<i32> {
        self.heap.peek().map(|Reverse(Queued(packet))| packet.sample_position)
    }

    /// Next stream position the consumer expects
    pub fn read_offset(&self) -> i64 {
        self.read_offset
    }

    /// Move the read offset forward; it never moves backwards
    pub fn advance_to(&mut self, offset: i64) {
        if offset > self.read_offset {
            self.read_offset = offset;
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get statistics
    pub fn stats(&self) -> ReorderBufferStats {
        ReorderBufferStats {
            level: self.heap.len(),
            capacity: self.capacity,
            read_offset: self.read_offset,
            buffered: self.buffered,
            stale: self.stale,
            evicted: self.evicted,
        }
    }
}

/// Reorder buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderBufferStats {
    pub level: usize,
    pub capacity: usize,
    pub read_offset: i64,
    pub buffered: u64,
    pub stale: u64,
    pub evicted: u64,
}

impl ReorderBufferStats {
    /// Fraction of offered packets that never reached the reader
    pub fn drop_rate(&self) -> f32 {
        let offered = self.buffered + self.stale;
        if offered == 0 {
            0.0
        } else {
            (self.stale + self.evicted) as f32 / offered as f32
        }
    }
}
