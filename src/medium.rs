//! The shared broadcast medium.
//!
//! All nodes sit in one collision domain. A transmission is audible to the
//! other nodes only once the propagation delay has elapsed, so two nodes that
//! decide to transmit within that window both go on air and collide.

use crate::NodeId;
use std::time::Duration;

pub type TxId = u64;

#[derive(Clone, Debug)]
struct Transmission {
    id: TxId,
    node: NodeId,
    start: Duration,
    collided: bool,
}

/// Outcome of a transmission leaving the air.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Finished {
    pub collided: bool,
}

#[derive(Debug)]
pub struct Medium {
    active: Vec<Transmission>,
    next_id: TxId,
    propagation_delay: Duration,
    /// Virtual carrier sense: the medium counts as busy until this instant.
    reserved_until: Duration,
    /// When the last transmission left the air.
    idle_since: Duration,
}

impl Medium {
    pub fn new(propagation_delay: Duration) -> Medium {
        Medium {
            active: Vec::new(),
            next_id: 0,
            propagation_delay,
            reserved_until: Duration::ZERO,
            idle_since: Duration::ZERO,
        }
    }

    /// Put a frame from `node` on air. Every transmission overlapping
    /// another one is marked collided, the new one included.
    pub fn begin(&mut self, node: NodeId, now: Duration) -> TxId {
        self.next_id += 1;
        let collided = !self.active.is_empty();
        for tx in self.active.iter_mut() {
            tx.collided = true;
        }
        self.active.push(Transmission {
            id: self.next_id,
            node,
            start: now,
            collided,
        });
        self.next_id
    }

    /// Take transmission `id` off the air.
    pub fn finish(&mut self, id: TxId, now: Duration) -> Option<Finished> {
        let pos = self.active.iter().position(|tx| tx.id == id)?;
        let tx = self.active.swap_remove(pos);
        if self.active.is_empty() {
            self.idle_since = now;
        }
        Some(Finished { collided: tx.collided })
    }

    /// Keep the medium busy until `until` (ACK or RTS/CTS reservation).
    pub fn reserve(&mut self, until: Duration) {
        self.reserved_until = self.reserved_until.max(until);
    }

    /// Carrier sense as seen by `node` at `now`.
    pub fn is_busy_for(&self, node: NodeId, now: Duration) -> bool {
        self.reserved_until > now
            || self
                .active
                .iter()
                .any(|tx| tx.node != node && tx.start + self.propagation_delay <= now)
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Instant from which the medium has been (or will be) continuously idle,
    /// assuming nothing new starts.
    pub fn idle_at(&self) -> Duration {
        self.idle_since.max(self.reserved_until)
    }
}
