//! Frame-level packet trace.
//!
//! When `capture_trace` is set the driver forwards every frame put on air and
//! every delivery to a [`TraceSink`]. A sink error aborts the run.

use crate::error::Result;
use crate::packet::{FlowId, Packet};
use crate::NodeId;
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Direction {
    Tx,
    Rx,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceRecord {
    pub time: Duration,
    pub node: NodeId,
    pub direction: Direction,
    pub flow_id: FlowId,
    pub sequence: u32,
    pub size_bytes: u32,
}

impl TraceRecord {
    pub fn new(time: Duration, node: NodeId, direction: Direction, packet: &Packet) -> Self {
        Self {
            time,
            node,
            direction,
            flow_id: packet.flow_id,
            sequence: packet.sequence,
            size_bytes: packet.size_bytes,
        }
    }
}

pub trait TraceSink: Send {
    fn record(&mut self, record: TraceRecord) -> Result<()>;

    /// Push buffered records to their destination. Called once at the end
    /// of a run.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every record in memory. Clones share the same buffer, so a caller
/// can keep one handle and give the other to the simulation.
#[derive(Clone, Debug, Default)]
pub struct MemoryTraceSink {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&mut self, record: TraceRecord) -> Result<()> {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesTraceSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesTraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TraceSink for JsonLinesTraceSink<W> {
    fn record(&mut self, record: TraceRecord) -> Result<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;

    fn packet() -> Packet {
        Packet {
            flow_id: 3,
            source: 1,
            destination: 0,
            kind: PacketKind::Request,
            sequence: 2,
            size_bytes: 64,
            tx_timestamp: Duration::ZERO,
            rx_timestamp: None,
        }
    }

    #[test]
    fn test_json_lines_one_record_per_line() {
        let mut sink = JsonLinesTraceSink::new(Vec::new());
        sink.record(TraceRecord::new(Duration::from_millis(1), 1, Direction::Tx, &packet()))
            .unwrap();
        sink.record(TraceRecord::new(Duration::from_millis(2), 0, Direction::Rx, &packet()))
            .unwrap();
        sink.flush().unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["direction"], "Tx");
        assert_eq!(first["flow_id"], 3);
    }

    #[test]
    fn test_memory_sink_clones_share_records() {
        let handle = MemoryTraceSink::new();
        let mut sink: Box<dyn TraceSink> = Box::new(handle.clone());
        sink.record(TraceRecord::new(Duration::ZERO, 1, Direction::Tx, &packet()))
            .unwrap();
        assert_eq!(handle.records().len(), 1);
        assert_eq!(handle.records()[0].sequence, 2);
    }
}
