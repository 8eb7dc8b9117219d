//! Discrete-event simulator for wireless ad-hoc echo experiments.
//!
//! Nodes share one broadcast medium and contend for it with CSMA/CA. Echo
//! clients send fixed-size requests to a server that answers each one; a
//! flow collector accounts for every (source, destination) pair.
//!
//! ```text
//!   Simulation ──► Scheduler (BTreeMap<(time, seq), Event>)
//!       │              │ dispatch in time order
//!       ▼              ▼
//!   EchoClient ──► Mac ──► Medium ── collision / success
//!   EchoResponder ◄── RxDeliver ◄──────────┘
//!       │
//!       ▼
//!   FlowCollector ──► SimulationReport
//! ```
//!
//! Given the same configuration (seed included) a run is fully deterministic.

pub mod config;
pub mod error;
pub mod flow_stats;
pub mod mac;
pub mod medium;
pub mod node;
pub mod packet;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod sweep;
pub mod theoretical;
pub mod topology;
pub mod trace;
pub mod traffic;

pub use config::{MacConfig, SimulationConfig};
pub use error::{Result, SimError};
pub use flow_stats::{FlowCollector, FlowReport, FlowSnapshot, FlowStats, FlowSummary};
pub use mac::{LossReason, Mac, MacCounters};
pub use report::{write_json, SimulationReport};
pub use runner::{run_simulation, Simulation};
pub use scheduler::{Event, EventHandle, EventKind, Scheduler};
pub use sweep::{run_sweep, SweepPoint};
pub use topology::{GridLayout, Node, Position};
pub use trace::{JsonLinesTraceSink, MemoryTraceSink, TraceRecord, TraceSink};

/// Index of a node; also indexes its MAC state.
pub type NodeId = usize;
