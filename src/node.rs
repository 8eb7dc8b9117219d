use crate::medium::TxId;
use crate::packet::Packet;
use crate::scheduler::EventHandle;
use crate::NodeId;
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MacPhase {
    Idle,
    Sensing,
    Backoff,
    /// Backoff frozen until the medium is idle again.
    WaitChannel,
    /// Frame on air, or waiting for its acknowledgement.
    Transmitting,
}

impl fmt::Display for MacPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacPhase::Idle => write!(f, "Idle"),
            MacPhase::Sensing => write!(f, "Sensing"),
            MacPhase::Backoff => write!(f, "Backoff"),
            MacPhase::WaitChannel => write!(f, "Wait Channel"),
            MacPhase::Transmitting => write!(f, "In Tx"),
        }
    }
}

/// Contention state of one node.
#[derive(Debug)]
pub struct MacState {
    id: NodeId,
    pub(crate) phase: MacPhase,
    pub(crate) backoff: u32,
    pub(crate) cw: u32,
    cw_min: u32,
    cw_max: u32,
    pub(crate) retry_count: u32,
    pub(crate) queue: VecDeque<Packet>,
    /// Timer that moves this node forward; cancelled before re-arming.
    pub(crate) pending: Option<EventHandle>,
    pub(crate) current_tx: Option<TxId>,
    num_success: u64,
    num_fail: u64,
    tx_bits: u64,
}

impl MacState {
    pub fn new(id: NodeId, cw_min: u32, cw_max: u32) -> MacState {
        MacState {
            id,
            phase: MacPhase::Idle,
            backoff: 0,
            cw: cw_min,
            cw_min,
            cw_max,
            retry_count: 0,
            queue: VecDeque::new(),
            pending: None,
            current_tx: None,
            num_success: 0,
            num_fail: 0,
            tx_bits: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn phase(&self) -> MacPhase {
        self.phase
    }

    pub fn backoff_counter(&self) -> u32 {
        self.backoff
    }

    pub fn contention_window(&self) -> u32 {
        self.cw
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Successful and collided transmissions of this node.
    pub fn stats(&self) -> (u64, u64) {
        (self.num_success, self.num_fail)
    }

    pub fn tx_bits(&self) -> u64 {
        self.tx_bits
    }

    /// Draw a fresh backoff in `[0, cw)`.
    pub(crate) fn draw_backoff<R: Rng>(&mut self, rng: &mut R) {
        self.backoff = rng.gen_range(0..self.cw);
    }

    pub(crate) fn tx_success(&mut self, payload_bits: u64) {
        self.num_success += 1;
        self.tx_bits += payload_bits;
        self.cw = self.cw_min;
        self.retry_count = 0;
    }

    /// Record a collision. Returns `true` when the frame has used up its
    /// retries and must be abandoned; the window is then reset.
    pub(crate) fn tx_collision(&mut self, max_retries: u32) -> bool {
        self.num_fail += 1;
        self.retry_count += 1;
        self.cw = self.cw.saturating_mul(2).min(self.cw_max);
        if self.retry_count > max_retries {
            self.cw = self.cw_min;
            self.retry_count = 0;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_window_doubles_and_caps() {
        let mut state = MacState::new(0, 32, 128);
        assert!(!state.tx_collision(7));
        assert_eq!(state.contention_window(), 64);
        assert!(!state.tx_collision(7));
        assert!(!state.tx_collision(7));
        assert_eq!(state.contention_window(), 128);
        assert_eq!(state.retry_count(), 3);

        state.tx_success(4096);
        assert_eq!(state.contention_window(), 32);
        assert_eq!(state.retry_count(), 0);
        assert_eq!(state.stats(), (1, 3));
        assert_eq!(state.tx_bits(), 4096);
    }

    #[test]
    fn test_retry_ceiling_abandons_and_resets() {
        let mut state = MacState::new(3, 16, 1024);
        assert!(!state.tx_collision(1));
        assert!(state.tx_collision(1));
        assert_eq!(state.contention_window(), 16);
        assert_eq!(state.retry_count(), 0);
    }

    #[test]
    fn test_backoff_within_window() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut state = MacState::new(0, 8, 8);
        for _ in 0..200 {
            state.draw_backoff(&mut rng);
            assert!(state.backoff_counter() < 8);
        }
    }
}
