//! CSMA/CA contention.
//!
//! Each node walks `Idle -> Sensing -> Backoff -> Transmitting -> Idle`.
//! A node with a fresh frame and a medium that has been idle for `DIFS`
//! transmits directly; otherwise it draws a backoff from `[0, cw)` and counts
//! down idle slots, freezing while the medium is busy. After every frame the
//! node draws a new backoff before contending again.
//!
//! Collisions are resolved on the shared [`Medium`]: overlapping frames all
//! fail, the senders notice through an ACK timeout, double their window and
//! retry until `max_retries` is exceeded, at which point the frame is lost.

use crate::config::MacConfig;
use crate::error::Result;
use crate::medium::{Medium, TxId};
use crate::node::{MacPhase, MacState};
use crate::packet::Packet;
use crate::scheduler::{Event, EventKind, Scheduler};
use crate::NodeId;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LossReason {
    /// Transmit queue was full when the packet arrived.
    QueueOverflow,
    /// Retry ceiling exceeded after repeated collisions.
    RetryLimit,
}

/// What the MAC reports back to the driver.
#[derive(Clone, Debug, PartialEq)]
pub enum MacOutput {
    /// A frame carrying `packet` went on air.
    FrameSent {
        node: NodeId,
        packet: Packet,
        time: Duration,
    },
    /// `packet` will never be delivered.
    Lost {
        node: NodeId,
        packet: Packet,
        reason: LossReason,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MacCounters {
    /// Frames put on air.
    pub attempts: u64,
    pub collisions: u64,
    pub successes: u64,
    pub retry_drops: u64,
    pub queue_drops: u64,
}

impl MacCounters {
    /// Share of frames that collided; 0 when nothing was sent.
    pub fn collision_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.collisions as f64 / self.attempts as f64
        }
    }
}

pub struct Mac {
    config: MacConfig,
    stations: Vec<MacState>,
    medium: Medium,
    rng: ChaCha8Rng,
    counters: MacCounters,
}

impl Mac {
    pub fn new(config: MacConfig, node_count: usize, seed: u64) -> Mac {
        let stations = (0..node_count)
            .map(|id| MacState::new(id, config.cw_min, config.cw_max))
            .collect();
        let medium = Medium::new(config.propagation_delay);
        Mac {
            config,
            stations,
            medium,
            rng: ChaCha8Rng::seed_from_u64(seed),
            counters: MacCounters::default(),
        }
    }

    pub fn station(&self, node: NodeId) -> Option<&MacState> {
        self.stations.get(node)
    }

    pub fn counters(&self) -> &MacCounters {
        &self.counters
    }

    /// Hand a packet to `node`'s MAC.
    pub fn enqueue(
        &mut self,
        sched: &mut Scheduler,
        node: NodeId,
        packet: Packet,
        out: &mut Vec<MacOutput>,
    ) -> Result<()> {
        let station = &mut self.stations[node];
        if station.queue.len() >= self.config.queue_capacity {
            self.counters.queue_drops += 1;
            debug!(node, packet = %packet, "Transmit queue full, dropping");
            out.push(MacOutput::Lost {
                node,
                packet,
                reason: LossReason::QueueOverflow,
            });
            return Ok(());
        }
        station.queue.push_back(packet);
        if station.phase == MacPhase::Idle {
            self.start_access(sched, node)?;
        }
        Ok(())
    }

    /// Route a MAC event. Events of other kinds are ignored.
    pub fn handle(
        &mut self,
        sched: &mut Scheduler,
        event: &Event,
        out: &mut Vec<MacOutput>,
    ) -> Result<()> {
        match event.kind {
            EventKind::TxAttempt => self.on_tx_attempt(sched, event.node, out),
            EventKind::Backoff => self.on_backoff(sched, event.node, out),
            EventKind::TxComplete { tx } => self.on_tx_complete(sched, event.node, tx),
            EventKind::Timeout => self.on_timeout(sched, event.node, out),
            EventKind::AppSend | EventKind::RxDeliver { .. } => Ok(()),
        }
    }

    fn start_access(&mut self, sched: &mut Scheduler, node: NodeId) -> Result<()> {
        let now = sched.now();
        if self.medium.is_busy_for(node, now) {
            self.stations[node].draw_backoff(&mut self.rng);
            return self.freeze(sched, node);
        }
        let station = &mut self.stations[node];
        station.phase = MacPhase::Sensing;
        station.pending = Some(sched.schedule(EventKind::TxAttempt, node, self.config.difs));
        trace!(node, "Sensing medium");
        Ok(())
    }

    fn on_tx_attempt(
        &mut self,
        sched: &mut Scheduler,
        node: NodeId,
        out: &mut Vec<MacOutput>,
    ) -> Result<()> {
        let now = sched.now();
        self.stations[node].pending = None;
        if self.stations[node].phase != MacPhase::Sensing {
            warn!(node, phase = %self.stations[node].phase, "Tx attempt outside sensing");
            return Ok(());
        }
        if self.medium.is_busy_for(node, now) {
            self.stations[node].draw_backoff(&mut self.rng);
            return self.freeze(sched, node);
        }
        let ready_at = self.medium.idle_at() + self.config.difs;
        if now < ready_at {
            let handle = sched.schedule_at(EventKind::TxAttempt, node, ready_at)?;
            self.stations[node].pending = Some(handle);
            return Ok(());
        }
        self.transmit(sched, node, out)
    }

    fn on_backoff(
        &mut self,
        sched: &mut Scheduler,
        node: NodeId,
        out: &mut Vec<MacOutput>,
    ) -> Result<()> {
        let now = sched.now();
        self.stations[node].pending = None;
        match self.stations[node].phase {
            MacPhase::Backoff | MacPhase::WaitChannel => {}
            phase => {
                warn!(node, %phase, "Backoff event outside backoff");
                return Ok(());
            }
        }
        if self.medium.is_busy_for(node, now) {
            return self.freeze(sched, node);
        }
        let ready_at = self.medium.idle_at() + self.config.difs;
        let station = &mut self.stations[node];
        station.phase = MacPhase::Backoff;
        if now < ready_at {
            station.pending = Some(sched.schedule_at(EventKind::Backoff, node, ready_at)?);
            return Ok(());
        }
        if station.backoff == 0 {
            return self.transmit(sched, node, out);
        }
        station.backoff -= 1;
        station.pending = Some(sched.schedule(EventKind::Backoff, node, self.config.slot));
        Ok(())
    }

    fn transmit(
        &mut self,
        sched: &mut Scheduler,
        node: NodeId,
        out: &mut Vec<MacOutput>,
    ) -> Result<()> {
        let now = sched.now();
        let station = &mut self.stations[node];
        let Some(packet) = station.queue.front() else {
            station.phase = MacPhase::Idle;
            return Ok(());
        };
        let airtime = if self.config.uses_rts_cts(packet.size_bytes) {
            self.config.rts_airtime()
        } else {
            self.config.data_airtime(packet.size_bytes)
        };
        let tx = self.medium.begin(node, now);
        station.phase = MacPhase::Transmitting;
        station.current_tx = Some(tx);
        self.counters.attempts += 1;
        trace!(node, tx, retry = station.retry_count, "Frame on air");
        out.push(MacOutput::FrameSent {
            node,
            packet: packet.clone(),
            time: now,
        });
        sched.schedule(EventKind::TxComplete { tx }, node, airtime);
        Ok(())
    }

    fn on_tx_complete(&mut self, sched: &mut Scheduler, node: NodeId, tx: TxId) -> Result<()> {
        let now = sched.now();
        let Some(finished) = self.medium.finish(tx, now) else {
            warn!(node, tx, "Unknown transmission completed");
            return Ok(());
        };
        if self.stations[node].current_tx.take() != Some(tx) {
            warn!(node, tx, "Completed frame was not the node's current one");
        }

        if finished.collided {
            self.counters.collisions += 1;
            debug!(node, tx, "Collision");
            let size = self.stations[node].queue.front().map_or(0, |p| p.size_bytes);
            let response = if self.config.uses_rts_cts(size) {
                self.config.cts_airtime()
            } else {
                self.config.ack_airtime()
            };
            let timeout = self.config.sifs + response;
            self.stations[node].pending = Some(sched.schedule(EventKind::Timeout, node, timeout));
        } else {
            self.deliver_head(sched, node)?;
        }

        if !self.medium.has_active() {
            self.wake_waiters(sched)?;
        }
        Ok(())
    }

    /// The head frame of `node` got through: reserve the medium for the rest
    /// of the exchange and hand the packet to its destination.
    fn deliver_head(&mut self, sched: &mut Scheduler, node: NodeId) -> Result<()> {
        let now = sched.now();
        let config = &self.config;
        let station = &mut self.stations[node];
        let Some(packet) = station.queue.pop_front() else {
            return Ok(());
        };

        let data = config.data_airtime(packet.size_bytes);
        let ack = config.sifs + config.ack_airtime();
        let data_end = if config.uses_rts_cts(packet.size_bytes) {
            now + config.sifs + config.cts_airtime() + config.sifs + data
        } else {
            now
        };
        self.medium.reserve(data_end + ack);
        station.tx_success(packet.size_bytes as u64 * 8);
        self.counters.successes += 1;

        let destination = packet.destination;
        sched.schedule_at(
            EventKind::RxDeliver { packet },
            destination,
            data_end + config.propagation_delay,
        )?;

        if station.queue.is_empty() {
            station.phase = MacPhase::Idle;
            Ok(())
        } else {
            station.draw_backoff(&mut self.rng);
            self.enter_backoff(sched, node)
        }
    }

    fn on_timeout(
        &mut self,
        sched: &mut Scheduler,
        node: NodeId,
        out: &mut Vec<MacOutput>,
    ) -> Result<()> {
        let max_retries = self.config.max_retries;
        let station = &mut self.stations[node];
        station.pending = None;
        if station.tx_collision(max_retries) {
            station.phase = MacPhase::Idle;
            if let Some(packet) = station.queue.pop_front() {
                self.counters.retry_drops += 1;
                debug!(node, packet = %packet, "Retry limit exceeded, dropping");
                out.push(MacOutput::Lost {
                    node,
                    packet,
                    reason: LossReason::RetryLimit,
                });
            }
            if !self.stations[node].queue.is_empty() {
                self.start_access(sched, node)?;
            }
            return Ok(());
        }
        station.draw_backoff(&mut self.rng);
        trace!(node, cw = station.cw, backoff = station.backoff, "Retrying");
        self.enter_backoff(sched, node)
    }

    fn enter_backoff(&mut self, sched: &mut Scheduler, node: NodeId) -> Result<()> {
        let now = sched.now();
        if self.medium.is_busy_for(node, now) {
            return self.freeze(sched, node);
        }
        let at = now.max(self.medium.idle_at() + self.config.difs);
        let station = &mut self.stations[node];
        station.phase = MacPhase::Backoff;
        station.pending = Some(sched.schedule_at(EventKind::Backoff, node, at)?);
        Ok(())
    }

    /// Pause `node`'s backoff until the medium frees. If nothing is on air the
    /// busy period is a reservation whose end is already known.
    fn freeze(&mut self, sched: &mut Scheduler, node: NodeId) -> Result<()> {
        let station = &mut self.stations[node];
        if let Some(handle) = station.pending.take() {
            sched.cancel(handle);
        }
        station.phase = MacPhase::WaitChannel;
        trace!(node, backoff = station.backoff, "Backoff frozen");
        if !self.medium.has_active() {
            let at = sched.now().max(self.medium.idle_at() + self.config.difs);
            let handle = sched.schedule_at(EventKind::Backoff, node, at)?;
            self.stations[node].pending = Some(handle);
        }
        Ok(())
    }

    /// Re-arm every frozen node for `DIFS` after the medium goes idle.
    fn wake_waiters(&mut self, sched: &mut Scheduler) -> Result<()> {
        let at = sched.now().max(self.medium.idle_at() + self.config.difs);
        for station in self.stations.iter_mut() {
            if station.phase != MacPhase::WaitChannel {
                continue;
            }
            if let Some(handle) = station.pending.take() {
                sched.cancel(handle);
            }
            station.pending = Some(sched.schedule_at(EventKind::Backoff, station.id(), at)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;
    use rand::Rng;

    fn packet(source: NodeId, destination: NodeId, size_bytes: u32) -> Packet {
        Packet {
            flow_id: 1,
            source,
            destination,
            kind: PacketKind::Request,
            sequence: 0,
            size_bytes,
            tx_timestamp: Duration::ZERO,
            rx_timestamp: None,
        }
    }

    /// Run the MAC alone. `AppSend` events enqueue a 512 byte frame for
    /// node 2 on the target node.
    fn run(mac: &mut Mac, sched: &mut Scheduler) -> (Vec<MacOutput>, Vec<Event>) {
        let mut outputs = Vec::new();
        let mut deliveries = Vec::new();
        sched
            .run_until(Duration::from_secs(1), |s, event| {
                match event.kind {
                    EventKind::RxDeliver { .. } => deliveries.push(event),
                    EventKind::AppSend => {
                        mac.enqueue(s, event.node, packet(event.node, 2, 512), &mut outputs)?
                    }
                    _ => mac.handle(s, &event, &mut outputs)?,
                }
                Ok(())
            })
            .unwrap();
        (outputs, deliveries)
    }

    fn frame_times(outputs: &[MacOutput]) -> Vec<(NodeId, Duration)> {
        outputs
            .iter()
            .filter_map(|o| match o {
                MacOutput::FrameSent { node, time, .. } => Some((*node, *time)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_idle_medium_transmits_after_difs() {
        let mut mac = Mac::new(MacConfig::default(), 2, 1);
        let mut sched = Scheduler::new();
        let mut out = Vec::new();
        mac.enqueue(&mut sched, 0, packet(0, 1, 512), &mut out).unwrap();

        let (outputs, deliveries) = run(&mut mac, &mut sched);
        assert_eq!(frame_times(&outputs), vec![(0, Duration::from_micros(128))]);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].node, 1);
        // DIFS + 4496 µs frame + 1 µs propagation.
        assert_eq!(deliveries[0].time, Duration::from_micros(4625));

        let station = mac.station(0).unwrap();
        assert_eq!(station.phase(), MacPhase::Idle);
        assert_eq!(station.stats(), (1, 0));
        assert_eq!(mac.counters().successes, 1);
        assert_eq!(mac.counters().collision_rate(), 0.0);
    }

    #[test]
    fn test_exact_overlap_loses_both_frames() {
        let config = MacConfig {
            max_retries: 0,
            ..MacConfig::default()
        };
        let mut mac = Mac::new(config, 3, 1);
        let mut sched = Scheduler::new();
        let mut out = Vec::new();
        mac.enqueue(&mut sched, 0, packet(0, 2, 512), &mut out).unwrap();
        mac.enqueue(&mut sched, 1, packet(1, 2, 512), &mut out).unwrap();

        let (outputs, deliveries) = run(&mut mac, &mut sched);
        assert!(deliveries.is_empty());
        let lost: Vec<_> = outputs
            .iter()
            .filter_map(|o| match o {
                MacOutput::Lost { node, reason, .. } => Some((*node, *reason)),
                _ => None,
            })
            .collect();
        assert_eq!(
            lost,
            vec![(0, LossReason::RetryLimit), (1, LossReason::RetryLimit)]
        );
        assert_eq!(mac.counters().collisions, 2);
        assert_eq!(mac.counters().retry_drops, 2);
        assert_eq!(mac.station(0).unwrap().contention_window(), 32);
    }

    #[test]
    fn test_collisions_resolved_by_backoff() {
        let mut mac = Mac::new(MacConfig::default(), 3, 99);
        let mut sched = Scheduler::new();
        let mut out = Vec::new();
        mac.enqueue(&mut sched, 0, packet(0, 2, 512), &mut out).unwrap();
        mac.enqueue(&mut sched, 1, packet(1, 2, 512), &mut out).unwrap();

        let (outputs, deliveries) = run(&mut mac, &mut sched);
        assert_eq!(deliveries.len(), 2);
        assert!(outputs
            .iter()
            .all(|o| matches!(o, MacOutput::FrameSent { .. })));
        assert!(mac.counters().collisions >= 2);
        assert_eq!(mac.counters().successes, 2);
        assert_eq!(mac.station(0).unwrap().retry_count(), 0);
    }

    #[test]
    fn test_backoff_freezes_while_medium_busy() {
        let seed = 5;
        let mut mac = Mac::new(MacConfig::default(), 3, seed);
        let mut sched = Scheduler::new();
        let mut out = Vec::new();
        mac.enqueue(&mut sched, 0, packet(0, 2, 512), &mut out).unwrap();
        sched.schedule(EventKind::AppSend, 1, Duration::from_millis(1));

        let (outputs, deliveries) = run(&mut mac, &mut sched);
        assert_eq!(deliveries.len(), 2);

        // Node 1 is the first to draw from the RNG.
        let slots: u32 = ChaCha8Rng::seed_from_u64(seed).gen_range(0..32);
        // Node 0 ends at 4624 µs, ACK reservation until 4892 µs, then DIFS.
        let resume = Duration::from_micros(5020);
        let expected = resume + Duration::from_micros(50) * slots;
        assert_eq!(
            frame_times(&outputs),
            vec![(0, Duration::from_micros(128)), (1, expected)]
        );
        assert_eq!(mac.counters().collisions, 0);
    }

    #[test]
    fn test_rts_cts_above_threshold() {
        let mut mac = Mac::new(MacConfig::default(), 2, 1);
        let mut sched = Scheduler::new();
        let mut out = Vec::new();
        mac.enqueue(&mut sched, 0, packet(0, 1, 1500), &mut out).unwrap();

        let (_, deliveries) = run(&mut mac, &mut sched);
        assert_eq!(deliveries.len(), 1);
        // RTS 128..416, SIFS, CTS 240, SIFS, DATA 12400, propagation.
        assert_eq!(deliveries[0].time, Duration::from_micros(13113));
    }

    #[test]
    fn test_full_queue_drops_packet() {
        let config = MacConfig {
            queue_capacity: 1,
            ..MacConfig::default()
        };
        let mut mac = Mac::new(config, 2, 1);
        let mut sched = Scheduler::new();
        let mut out = Vec::new();
        mac.enqueue(&mut sched, 0, packet(0, 1, 512), &mut out).unwrap();
        mac.enqueue(&mut sched, 0, packet(0, 1, 512), &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0],
            MacOutput::Lost {
                reason: LossReason::QueueOverflow,
                ..
            }
        ));
        assert_eq!(mac.counters().queue_drops, 1);
        assert_eq!(mac.station(0).unwrap().queue_len(), 1);
    }

    #[test]
    fn test_rts_collision_costs_only_rts_airtime() {
        let config = MacConfig {
            max_retries: 0,
            ..MacConfig::default()
        };
        let mut mac = Mac::new(config, 3, 1);
        let mut sched = Scheduler::new();
        let mut outputs = Vec::new();
        mac.enqueue(&mut sched, 0, packet(0, 2, 1500), &mut outputs).unwrap();
        mac.enqueue(&mut sched, 1, packet(1, 2, 1500), &mut outputs).unwrap();
        let us = Duration::from_micros;

        // Both RTS frames go on air after DIFS and end 288 µs later.
        sched
            .run_until(us(416), |s, e| mac.handle(s, &e, &mut outputs))
            .unwrap();
        assert_eq!(frame_times(&outputs), vec![(0, us(128)), (1, us(128))]);
        assert_eq!(mac.counters().collisions, 0);
        sched
            .run_until(us(417), |s, e| mac.handle(s, &e, &mut outputs))
            .unwrap();
        assert_eq!(mac.counters().collisions, 2);

        // No CTS arrives: the senders give up SIFS + CTS after the RTS.
        sched
            .run_until(us(684), |s, e| mac.handle(s, &e, &mut outputs))
            .unwrap();
        assert_eq!(mac.counters().retry_drops, 0);
        sched
            .run_until(us(685), |s, e| mac.handle(s, &e, &mut outputs))
            .unwrap();
        assert_eq!(mac.counters().retry_drops, 2);
        assert_eq!(mac.station(0).unwrap().phase(), MacPhase::Idle);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_backoff_resumes_with_remaining_slots() {
        // A seed whose first draw leaves room to count a few slots.
        let seed = (0..)
            .find(|&s| ChaCha8Rng::seed_from_u64(s).gen_range(0..32u32) >= 4)
            .unwrap();
        let slots: u32 = ChaCha8Rng::seed_from_u64(seed).gen_range(0..32);

        let mut mac = Mac::new(MacConfig::default(), 3, seed);
        let mut sched = Scheduler::new();
        let mut out = Vec::new();
        mac.enqueue(&mut sched, 2, packet(2, 0, 512), &mut out).unwrap();
        // Node 0 freezes behind node 2 and starts counting at 5020 µs.
        sched.schedule(EventKind::AppSend, 0, Duration::from_millis(1));
        // Node 1 finds the medium idle and seizes it at 5095 µs, after node 0
        // has counted two slots.
        sched.schedule(EventKind::AppSend, 1, Duration::from_micros(4967));

        let (outputs, deliveries) = run(&mut mac, &mut sched);
        assert_eq!(deliveries.len(), 3);
        assert_eq!(mac.counters().collisions, 0);

        // Node 1 ends at 9591 µs, ACK reservation until 9859 µs, then DIFS.
        let resume = Duration::from_micros(9987);
        let expected = resume + Duration::from_micros(50) * (slots - 2);
        assert_eq!(
            frame_times(&outputs),
            vec![
                (2, Duration::from_micros(128)),
                (1, Duration::from_micros(5095)),
                (0, expected),
            ]
        );
    }
}
