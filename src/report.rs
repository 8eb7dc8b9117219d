//! Result rendering and serialization.

use crate::error::Result;
use crate::flow_stats::FlowSnapshot;
use crate::mac::MacCounters;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const RULE: &str = "------------------------------------------";

/// Final statistics of one run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationReport {
    pub node_count: usize,
    pub seed: u64,
    pub end_time_secs: f64,
    pub events_processed: u64,
    /// Events still queued at the stop time, dropped unprocessed.
    pub events_discarded: u64,
    pub snapshot: FlowSnapshot,
    pub mac: MacCounters,
}

impl SimulationReport {
    pub fn collision_rate(&self) -> f64 {
        self.mac.collision_rate()
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flow in &self.snapshot.flows {
            writeln!(
                f,
                "Flow ID: {} ({} -> {})",
                flow.flow_id, flow.source, flow.destination
            )?;
            writeln!(f, "  Packets Sent: {}", flow.tx_packets)?;
            writeln!(f, "  Packets Received: {}", flow.rx_packets)?;
            writeln!(f, "  Packet Loss: {}", flow.lost_packets)?;
            writeln!(f, "  Throughput: {:.3} bps", flow.throughput_bps)?;
            writeln!(f, "  Average Delay: {:.6} seconds", flow.average_delay_secs)?;
            writeln!(f, "  Average Jitter: {:.6} seconds", flow.average_jitter_secs)?;
            writeln!(f, "{}", RULE)?;
        }

        let summary = &self.snapshot.summary;
        writeln!(f, "Summary Statistics ({} nodes):", self.node_count)?;
        writeln!(f, "  Mean Throughput: {:.3} bps", summary.mean_throughput_bps)?;
        writeln!(
            f,
            "  Packet Delivery Ratio (PDR): {:.2}%",
            summary.packet_delivery_ratio
        )?;
        writeln!(f, "  Total Packet Loss: {} packets", summary.total_lost)?;
        writeln!(f, "  Average Delay: {:.6} seconds", summary.mean_delay_secs)?;
        writeln!(f, "  Total Number of Flows: {}", summary.flow_count)?;
        writeln!(
            f,
            "  Collision Rate: {:.4} ({} of {} frames)",
            self.collision_rate(),
            self.mac.collisions,
            self.mac.attempts
        )?;
        writeln!(f, "{}", RULE)
    }
}

/// Write `reports` as one pretty-printed JSON document.
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, reports: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, reports)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
