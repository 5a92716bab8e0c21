//! Bounded FIFO of packets awaiting a routing decision

use std::collections::VecDeque;

use gridmesh_core::Packet;
use parking_lot::Mutex;

use crate::error::{RoutingError, RoutingResult};

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Packet queue with a hard capacity
///
/// The lock is only ever held for a single push or pop.
pub struct PacketQueue {
    packets: Mutex<VecDeque<Packet>>,
    capacity: usize,
}

impl PacketQueue {
    /// Create an empty queue
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append a packet, failing fast when the queue is full
    pub fn push(&self, packet: Packet) -> RoutingResult<()> {
        let mut packets = self.packets.lock();
        if packets.len() >= self.capacity {
            return Err(RoutingError::QueueFull {
                capacity: self.capacity,
            });
        }
        packets.push_back(packet);
        Ok(())
    }

    /// Take the oldest packet
    pub fn pop(&self) -> Option<Packet> {
        self.packets.lock().pop_front()
    }

    /// Number of queued packets
    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    /// The configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued packet, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut packets = self.packets.lock();
        let n = packets.len();
        packets.clear();
        n
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmesh_core::{Destination, NodeId, PacketId};

    fn make_packet(seq: u64) -> Packet {
        let source = NodeId::parse("n1").unwrap();
        Packet::new(
            PacketId::for_source(&source, seq),
            source,
            Destination::Backend,
            vec![seq as u8],
        )
    }

    #[test]
    fn test_fifo_order() {
        let queue = PacketQueue::new(10);
        for seq in 0..3 {
            queue.push(make_packet(seq)).unwrap();
        }

        assert_eq!(queue.pop().unwrap().id.sequence, 0);
        assert_eq!(queue.pop().unwrap().id.sequence, 1);
        assert_eq!(queue.pop().unwrap().id.sequence, 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_capacity_bound() {
        let queue = PacketQueue::new(3);
        for seq in 0..3 {
            queue.push(make_packet(seq)).unwrap();
        }

        assert_eq!(
            queue.push(make_packet(3)),
            Err(RoutingError::QueueFull { capacity: 3 })
        );
        assert_eq!(queue.len(), 3);

        queue.pop();
        assert!(queue.push(make_packet(4)).is_ok());
    }

    #[test]
    fn test_clear() {
        let queue = PacketQueue::default();
        assert_eq!(queue.capacity(), DEFAULT_QUEUE_CAPACITY);
        queue.push(make_packet(0)).unwrap();
        queue.push(make_packet(1)).unwrap();

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
