//! Packets exchanged between echo clients and the echo responder.

use crate::NodeId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Identifies one (source, destination) pair for the life of a run.
pub type FlowId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PacketKind {
    Request,
    Reply,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Packet {
    pub flow_id: FlowId,
    pub source: NodeId,
    pub destination: NodeId,
    pub kind: PacketKind,
    pub sequence: u32,
    pub size_bytes: u32,
    pub tx_timestamp: Duration,
    pub rx_timestamp: Option<Duration>,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{} flow {} #{} ({} bytes)",
            self.source, self.destination, self.flow_id, self.sequence, self.size_bytes
        )
    }
}
