//! Configuration types for a simulation run.

use crate::error::{Result, SimError};
use crate::topology::GridLayout;
use serde::Serialize;
use std::time::Duration;

/// Timing and contention parameters of the CSMA/CA MAC.
///
/// Defaults are the classic DCF reference values: 1 Mbit/s channel,
/// 50 µs slots, `CW_min = 32` doubling up to 1024.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MacConfig {
    /// Length of one backoff slot.
    pub slot: Duration,
    /// Short inter-frame space.
    pub sifs: Duration,
    /// Sense delay before a node may seize an idle medium.
    pub difs: Duration,
    /// Time before a started transmission is audible to other nodes.
    pub propagation_delay: Duration,
    pub phy_header_bits: u64,
    pub mac_header_bits: u64,
    pub ack_bits: u64,
    pub rts_bits: u64,
    pub cts_bits: u64,
    /// Channel bit-rate in bits per second.
    pub data_rate_bps: u64,
    pub cw_min: u32,
    pub cw_max: u32,
    /// Retransmissions allowed before a frame is abandoned.
    pub max_retries: u32,
    /// Payloads strictly larger than this use the RTS/CTS handshake.
    pub rts_cts_threshold_bytes: u32,
    /// Per-node transmit queue capacity in packets.
    pub queue_capacity: usize,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            slot: Duration::from_micros(50),
            sifs: Duration::from_micros(28),
            difs: Duration::from_micros(128),
            propagation_delay: Duration::from_micros(1),
            phy_header_bits: 128,
            mac_header_bits: 272,
            ack_bits: 112,
            rts_bits: 160,
            cts_bits: 112,
            data_rate_bps: 1_000_000,
            cw_min: 32,
            cw_max: 1024,
            max_retries: 7,
            rts_cts_threshold_bytes: 1000,
            queue_capacity: 500,
        }
    }
}

impl MacConfig {
    /// Airtime of `bits` at the configured channel rate.
    pub fn airtime(&self, bits: u64) -> Duration {
        let nanos = (bits as u128 * 1_000_000_000) / self.data_rate_bps as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Airtime of a data frame carrying `payload_bytes`.
    pub fn data_airtime(&self, payload_bytes: u32) -> Duration {
        self.airtime(self.phy_header_bits + self.mac_header_bits + payload_bytes as u64 * 8)
    }

    pub fn ack_airtime(&self) -> Duration {
        self.airtime(self.phy_header_bits + self.ack_bits)
    }

    pub fn rts_airtime(&self) -> Duration {
        self.airtime(self.phy_header_bits + self.rts_bits)
    }

    pub fn cts_airtime(&self) -> Duration {
        self.airtime(self.phy_header_bits + self.cts_bits)
    }

    /// Whether a payload of this size is preceded by an RTS/CTS exchange.
    pub fn uses_rts_cts(&self, payload_bytes: u32) -> bool {
        payload_bytes > self.rts_cts_threshold_bytes
    }

    /// Number of doublings from `cw_min` to `cw_max`.
    pub fn max_backoff_stage(&self) -> u32 {
        let mut stage = 0;
        let mut cw = self.cw_min.max(1);
        while cw < self.cw_max {
            cw = cw.saturating_mul(2);
            stage += 1;
        }
        stage
    }

    fn validate(&self) -> Result<()> {
        if self.data_rate_bps == 0 {
            return Err(SimError::config("data_rate_bps must be positive"));
        }
        if self.slot.is_zero() {
            return Err(SimError::config("slot must be positive"));
        }
        if self.cw_min == 0 {
            return Err(SimError::config("cw_min must be positive"));
        }
        if self.cw_max < self.cw_min {
            return Err(SimError::config(format!(
                "cw_max ({}) must be at least cw_min ({})",
                self.cw_max, self.cw_min
            )));
        }
        if self.queue_capacity == 0 {
            return Err(SimError::config("queue_capacity must be positive"));
        }
        Ok(())
    }
}

/// Configuration for one simulation run.
///
/// One instance describes exactly one experiment; nothing in it is shared
/// between runs.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationConfig {
    /// Number of nodes, server included.
    pub node_count: usize,

    /// Echo request payload size.
    pub packet_size_bytes: u32,

    /// Requests each client sends before going quiet.
    pub max_packets: u32,

    /// Gap between consecutive requests of one client.
    pub interval_seconds: f64,

    /// Index of the node running the echo responder.
    pub server_node_index: usize,

    /// Simulated time at which the run ends.
    pub stop_time_seconds: f64,

    /// Log every echo send and receive.
    pub verbose_logging: bool,

    /// Record frame-level send/receive events into a trace sink.
    pub capture_trace: bool,

    /// Seed for the backoff RNG.
    pub seed: u64,

    pub client_start_seconds: f64,
    pub server_start_seconds: f64,

    /// Client `k` (in node order, server skipped) starts at
    /// `client_start_seconds + k * client_start_stagger_seconds`.
    pub client_start_stagger_seconds: f64,

    pub grid: GridLayout,
    pub mac: MacConfig,
}

impl SimulationConfig {
    /// Create a configuration for `node_count` nodes with the default
    /// echo workload (512 byte packets, 10 per client, one per second,
    /// server on node 0, 15 s run).
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            packet_size_bytes: 512,
            max_packets: 10,
            interval_seconds: 1.0,
            server_node_index: 0,
            stop_time_seconds: 15.0,
            verbose_logging: false,
            capture_trace: false,
            seed: 12345,
            client_start_seconds: 2.0,
            server_start_seconds: 2.0,
            client_start_stagger_seconds: 0.0,
            grid: GridLayout::default(),
            mac: MacConfig::default(),
        }
    }

    pub fn with_node_count(mut self, node_count: usize) -> Self {
        self.node_count = node_count;
        self
    }

    pub fn with_packet_size(mut self, bytes: u32) -> Self {
        self.packet_size_bytes = bytes;
        self
    }

    pub fn with_max_packets(mut self, max_packets: u32) -> Self {
        self.max_packets = max_packets;
        self
    }

    pub fn with_interval(mut self, seconds: f64) -> Self {
        self.interval_seconds = seconds;
        self
    }

    pub fn with_server_node(mut self, index: usize) -> Self {
        self.server_node_index = index;
        self
    }

    pub fn with_stop_time(mut self, seconds: f64) -> Self {
        self.stop_time_seconds = seconds;
        self
    }

    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose_logging = verbose;
        self
    }

    pub fn with_capture_trace(mut self, capture: bool) -> Self {
        self.capture_trace = capture;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_client_stagger(mut self, seconds: f64) -> Self {
        self.client_start_stagger_seconds = seconds;
        self
    }

    pub fn with_grid(mut self, grid: GridLayout) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_mac(mut self, mac: MacConfig) -> Self {
        self.mac = mac;
        self
    }

    /// Reject out-of-range options. Called before any event is scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.node_count < 2 {
            return Err(SimError::config(format!(
                "node_count must be at least 2, got {}",
                self.node_count
            )));
        }
        if self.packet_size_bytes == 0 {
            return Err(SimError::config("packet_size_bytes must be positive"));
        }
        if !(self.interval_seconds.is_finite() && self.interval_seconds > 0.0) {
            return Err(SimError::config(format!(
                "interval_seconds must be positive, got {}",
                self.interval_seconds
            )));
        }
        if self.server_node_index >= self.node_count {
            return Err(SimError::config(format!(
                "server_node_index {} out of range for {} nodes",
                self.server_node_index, self.node_count
            )));
        }
        if !(self.stop_time_seconds.is_finite() && self.stop_time_seconds > 0.0) {
            return Err(SimError::config(format!(
                "stop_time_seconds must be positive, got {}",
                self.stop_time_seconds
            )));
        }
        for (name, value) in [
            ("client_start_seconds", self.client_start_seconds),
            ("server_start_seconds", self.server_start_seconds),
            (
                "client_start_stagger_seconds",
                self.client_start_stagger_seconds,
            ),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SimError::config(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if as_duration("interval_seconds", self.interval_seconds)?.is_zero() {
            return Err(SimError::config(format!(
                "interval_seconds {} rounds to a zero interval",
                self.interval_seconds
            )));
        }
        if as_duration("stop_time_seconds", self.stop_time_seconds)?.is_zero() {
            return Err(SimError::config(format!(
                "stop_time_seconds {} rounds to zero",
                self.stop_time_seconds
            )));
        }
        as_duration("server_start_seconds", self.server_start_seconds)?;
        // The last client has the largest start offset.
        let last_client = self.node_count.saturating_sub(2) as f64;
        as_duration(
            "last client start",
            self.client_start_seconds + last_client * self.client_start_stagger_seconds,
        )?;
        if self.grid.grid_width == 0 {
            return Err(SimError::config("grid_width must be positive"));
        }
        self.mac.validate()
    }

    // The accessors below saturate on values `validate` rejects.

    pub fn interval(&self) -> Duration {
        saturating_duration(self.interval_seconds)
    }

    pub fn stop_time(&self) -> Duration {
        saturating_duration(self.stop_time_seconds)
    }

    pub fn server_start(&self) -> Duration {
        saturating_duration(self.server_start_seconds)
    }

    /// Start time of the `k`-th client.
    pub fn client_start(&self, k: usize) -> Duration {
        saturating_duration(self.client_start_seconds + k as f64 * self.client_start_stagger_seconds)
    }
}

fn as_duration(name: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds).map_err(|e| {
        SimError::config(format!("{name} = {seconds} is not a valid duration: {e}"))
    })
}

fn saturating_duration(seconds: f64) -> Duration {
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) => duration,
        Err(_) if seconds > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::new(2)
    }
}
