//! Per-flow accounting.
//!
//! Flows are identified by their (source, destination) pair. Ids are handed
//! out from 1 in order of first observation, so a deterministic run always
//! numbers its flows the same way.

use crate::packet::FlowId;
use crate::NodeId;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::trace;

/// Running counters of one flow.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FlowStats {
    pub tx_count: u64,
    pub rx_count: u64,
    pub lost_count: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub delay_sum: Duration,
    /// Sum of delay differences between consecutive deliveries.
    pub jitter_sum: Duration,
    pub last_delay: Option<Duration>,
    pub first_tx_time: Option<Duration>,
    pub last_tx_time: Option<Duration>,
    pub first_rx_time: Option<Duration>,
    pub last_rx_time: Option<Duration>,
}

impl FlowStats {
    /// Received bits over the flow's own active window, from its first send
    /// to its last delivery. Zero when that window is empty.
    pub fn throughput_bps(&self) -> f64 {
        let (Some(first_tx), Some(last_rx)) = (self.first_tx_time, self.last_rx_time) else {
            return 0.0;
        };
        let window = last_rx.saturating_sub(first_tx).as_secs_f64();
        if window > 0.0 {
            self.rx_bytes as f64 * 8.0 / window
        } else {
            0.0
        }
    }

    /// Mean one-way delay in seconds; 0 without deliveries.
    pub fn average_delay(&self) -> f64 {
        if self.rx_count == 0 {
            0.0
        } else {
            self.delay_sum.as_secs_f64() / self.rx_count as f64
        }
    }

    /// Mean jitter in seconds; 0 with fewer than two deliveries.
    pub fn average_jitter(&self) -> f64 {
        if self.rx_count < 2 {
            0.0
        } else {
            self.jitter_sum.as_secs_f64() / (self.rx_count - 1) as f64
        }
    }

    /// Packets neither delivered nor lost yet.
    pub fn in_flight(&self) -> u64 {
        self.tx_count.saturating_sub(self.rx_count + self.lost_count)
    }

    fn is_consistent(&self) -> bool {
        self.rx_count + self.lost_count <= self.tx_count
    }
}

/// One row of the per-flow table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowReport {
    pub flow_id: FlowId,
    pub source: NodeId,
    pub destination: NodeId,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub throughput_bps: f64,
    pub average_delay_secs: f64,
    pub average_jitter_secs: f64,
}

/// Aggregate over every flow.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FlowSummary {
    pub flow_count: usize,
    pub total_tx: u64,
    pub total_rx: u64,
    pub total_lost: u64,
    /// Mean over flows with at least one delivery.
    pub mean_throughput_bps: f64,
    /// Delivered over sent, in percent.
    pub packet_delivery_ratio: f64,
    /// Mean over every delivered packet.
    pub mean_delay_secs: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowSnapshot {
    pub flows: Vec<FlowReport>,
    pub summary: FlowSummary,
}

#[derive(Debug, Default)]
pub struct FlowCollector {
    ids: HashMap<(NodeId, NodeId), FlowId>,
    endpoints: BTreeMap<FlowId, (NodeId, NodeId)>,
    flows: BTreeMap<FlowId, FlowStats>,
}

impl FlowCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flow id for `source -> destination`, allocating the next one on first
    /// sight.
    pub fn classify(&mut self, source: NodeId, destination: NodeId) -> FlowId {
        let next = self.ids.len() as FlowId + 1;
        let id = *self.ids.entry((source, destination)).or_insert(next);
        self.endpoints.entry(id).or_insert((source, destination));
        id
    }

    pub fn packet_sent(&mut self, flow_id: FlowId, size_bytes: u32, time: Duration) {
        let stats = self.flows.entry(flow_id).or_default();
        stats.tx_count += 1;
        stats.tx_bytes += size_bytes as u64;
        stats.first_tx_time.get_or_insert(time);
        stats.last_tx_time = Some(time);
    }

    pub fn packet_delivered(
        &mut self,
        flow_id: FlowId,
        size_bytes: u32,
        tx_time: Duration,
        time: Duration,
    ) {
        let stats = self.flows.entry(flow_id).or_default();
        let delay = time.saturating_sub(tx_time);
        stats.rx_count += 1;
        stats.rx_bytes += size_bytes as u64;
        stats.delay_sum += delay;
        if let Some(last) = stats.last_delay {
            stats.jitter_sum += if delay > last { delay - last } else { last - delay };
        }
        stats.last_delay = Some(delay);
        stats.first_rx_time.get_or_insert(time);
        stats.last_rx_time = Some(time);
        trace!(flow_id, delay = ?delay, "Packet delivered");
    }

    pub fn packet_lost(&mut self, flow_id: FlowId, time: Duration) {
        let stats = self.flows.entry(flow_id).or_default();
        stats.lost_count += 1;
        trace!(flow_id, time = ?time, "Packet lost");
    }

    pub fn stats(&self, flow_id: FlowId) -> Option<&FlowStats> {
        self.flows.get(&flow_id)
    }

    /// `rx + lost <= tx` for every flow.
    pub fn is_consistent(&self) -> bool {
        self.flows.values().all(FlowStats::is_consistent)
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let mut flows = Vec::with_capacity(self.flows.len());
        let mut summary = FlowSummary {
            flow_count: self.flows.len(),
            ..FlowSummary::default()
        };
        let mut delay_sum = Duration::ZERO;
        let mut throughput_sum = 0.0;
        let mut delivering_flows = 0usize;

        for (&flow_id, stats) in &self.flows {
            let (source, destination) = self
                .endpoints
                .get(&flow_id)
                .copied()
                .unwrap_or_default();
            let throughput_bps = stats.throughput_bps();
            flows.push(FlowReport {
                flow_id,
                source,
                destination,
                tx_packets: stats.tx_count,
                rx_packets: stats.rx_count,
                lost_packets: stats.lost_count,
                tx_bytes: stats.tx_bytes,
                rx_bytes: stats.rx_bytes,
                throughput_bps,
                average_delay_secs: stats.average_delay(),
                average_jitter_secs: stats.average_jitter(),
            });

            summary.total_tx += stats.tx_count;
            summary.total_rx += stats.rx_count;
            summary.total_lost += stats.lost_count;
            delay_sum += stats.delay_sum;
            if stats.rx_count > 0 {
                throughput_sum += throughput_bps;
                delivering_flows += 1;
            }
        }

        if delivering_flows > 0 {
            summary.mean_throughput_bps = throughput_sum / delivering_flows as f64;
        }
        if summary.total_tx > 0 {
            summary.packet_delivery_ratio =
                summary.total_rx as f64 / summary.total_tx as f64 * 100.0;
        }
        if summary.total_rx > 0 {
            summary.mean_delay_secs = delay_sum.as_secs_f64() / summary.total_rx as f64;
        }

        FlowSnapshot { flows, summary }
    }
}
