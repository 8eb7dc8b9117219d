//! Simulation driver.
//!
//! A [`Simulation`] owns one event queue, one node set and all MAC and flow
//! state for a single configuration. Nothing survives between instances.

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::flow_stats::FlowCollector;
use crate::mac::{Mac, MacOutput};
use crate::packet::{Packet, PacketKind};
use crate::report::SimulationReport;
use crate::scheduler::{Event, EventKind, Scheduler};
use crate::topology::{self, Node};
use crate::trace::{Direction, TraceRecord, TraceSink};
use crate::traffic::{EchoClient, EchoResponder, Outgoing};
use crate::NodeId;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Everything an event handler may touch. Kept apart from the scheduler so
/// both can be borrowed mutably during dispatch.
struct World {
    nodes: Vec<Node>,
    mac: Mac,
    flows: FlowCollector,
    clients: BTreeMap<NodeId, EchoClient>,
    server: EchoResponder,
    trace: Option<Box<dyn TraceSink>>,
    outputs: Vec<MacOutput>,
    verbose: bool,
}

pub struct Simulation {
    config: SimulationConfig,
    scheduler: Scheduler,
    world: World,
}

impl Simulation {
    /// Validate `config` and set up a fresh run: nodes placed, echo server
    /// and clients installed, first send timers armed.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let mut scheduler = Scheduler::new();
        let nodes = topology::build(config.node_count, &config.grid);
        let mac = Mac::new(config.mac.clone(), config.node_count, config.seed);
        let stop = config.stop_time();
        let server_node = config.server_node_index;
        let server = EchoResponder::new(server_node, (config.server_start(), stop));

        let mut clients = BTreeMap::new();
        for (k, node) in nodes
            .iter()
            .map(|n| n.id)
            .filter(|&id| id != server_node)
            .enumerate()
        {
            let client = EchoClient::new(
                node,
                server_node,
                config.interval(),
                config.packet_size_bytes,
                config.max_packets,
                (config.client_start(k), stop),
            );
            client.start(&mut scheduler)?;
            clients.insert(client.node(), client);
        }

        debug!(
            nodes = nodes.len(),
            clients = clients.len(),
            server = server_node,
            "Topology built"
        );

        let world = World {
            nodes,
            mac,
            flows: FlowCollector::new(),
            clients,
            server,
            trace: None,
            outputs: Vec::new(),
            verbose: config.verbose_logging,
        };
        Ok(Self {
            config,
            scheduler,
            world,
        })
    }

    /// Install the sink that receives frame records when `capture_trace` is
    /// enabled.
    pub fn with_trace_sink(mut self, sink: Box<dyn TraceSink>) -> Self {
        if self.config.capture_trace {
            self.world.trace = Some(sink);
        }
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.world.nodes
    }

    pub fn mac(&self) -> &Mac {
        &self.world.mac
    }

    pub fn flows(&self) -> &FlowCollector {
        &self.world.flows
    }

    pub fn client(&self, node: NodeId) -> Option<&EchoClient> {
        self.world.clients.get(&node)
    }

    pub fn server(&self) -> &EchoResponder {
        &self.world.server
    }

    /// Advance the clock to `time`, never past the configured stop time.
    pub fn run_until(&mut self, time: Duration) -> Result<()> {
        let until = time.min(self.config.stop_time());
        let Self {
            scheduler, world, ..
        } = self;
        scheduler.run_until(until, |sched, event| world.handle(sched, event))
    }

    /// Run to the stop time and produce the final report.
    pub fn run(mut self) -> Result<SimulationReport> {
        info!(
            node_count = self.config.node_count,
            packet_size = self.config.packet_size_bytes,
            max_packets = self.config.max_packets,
            interval_secs = self.config.interval_seconds,
            stop_secs = self.config.stop_time_seconds,
            seed = self.config.seed,
            "Running simulation"
        );
        self.run_until(self.config.stop_time())?;
        self.finish()
    }

    /// Discard whatever is still queued, flush the trace and snapshot the
    /// statistics.
    pub fn finish(mut self) -> Result<SimulationReport> {
        let discarded = self.scheduler.discard_pending();
        if let Some(sink) = self.world.trace.as_mut() {
            sink.flush()?;
        }
        let report = SimulationReport {
            node_count: self.config.node_count,
            seed: self.config.seed,
            end_time_secs: self.scheduler.now().as_secs_f64(),
            events_processed: self.scheduler.dispatched(),
            events_discarded: discarded as u64,
            snapshot: self.world.flows.snapshot(),
            mac: self.world.mac.counters().clone(),
        };
        info!(
            node_count = report.node_count,
            flows = report.snapshot.summary.flow_count,
            pdr = report.snapshot.summary.packet_delivery_ratio,
            events = report.events_processed,
            discarded,
            "Simulation complete"
        );
        Ok(report)
    }
}

/// Run one configuration from scratch to its stop time.
pub fn run_simulation(config: &SimulationConfig) -> Result<SimulationReport> {
    Simulation::new(config.clone())?.run()
}

impl World {
    fn handle(&mut self, sched: &mut Scheduler, event: Event) -> Result<()> {
        match event.kind {
            EventKind::AppSend => {
                let request = self
                    .clients
                    .get_mut(&event.node)
                    .and_then(|client| client.on_send_timer(sched));
                if let Some(request) = request {
                    if self.verbose {
                        info!(
                            time = sched.now().as_secs_f64(),
                            client = request.source,
                            server = request.destination,
                            bytes = request.size_bytes,
                            "Client sent request"
                        );
                    }
                    self.send(sched, request)?;
                }
            }
            EventKind::RxDeliver { packet } => self.deliver(sched, event.node, packet)?,
            _ => self.mac.handle(sched, &event, &mut self.outputs)?,
        }
        self.drain_outputs(sched.now())
    }

    fn send(&mut self, sched: &mut Scheduler, outgoing: Outgoing) -> Result<()> {
        let now = sched.now();
        let flow_id = self.flows.classify(outgoing.source, outgoing.destination);
        let packet = Packet {
            flow_id,
            source: outgoing.source,
            destination: outgoing.destination,
            kind: outgoing.kind,
            sequence: outgoing.sequence,
            size_bytes: outgoing.size_bytes,
            tx_timestamp: now,
            rx_timestamp: None,
        };
        self.flows.packet_sent(flow_id, packet.size_bytes, now);
        self.mac
            .enqueue(sched, outgoing.source, packet, &mut self.outputs)
    }

    fn deliver(&mut self, sched: &mut Scheduler, node: NodeId, mut packet: Packet) -> Result<()> {
        let now = sched.now();
        packet.rx_timestamp = Some(now);
        self.flows
            .packet_delivered(packet.flow_id, packet.size_bytes, packet.tx_timestamp, now);
        if let Some(sink) = self.trace.as_mut() {
            sink.record(TraceRecord::new(now, node, Direction::Rx, &packet))?;
        }

        match packet.kind {
            PacketKind::Request if node == self.server.node() => {
                if let Some(reply) = self.server.on_request(now, &packet) {
                    if self.verbose {
                        info!(
                            time = now.as_secs_f64(),
                            server = node,
                            client = packet.source,
                            bytes = packet.size_bytes,
                            "Server received request, echoing"
                        );
                    }
                    self.send(sched, reply)?;
                }
            }
            PacketKind::Reply => {
                if let Some(client) = self.clients.get_mut(&node) {
                    client.on_reply(&packet);
                    if self.verbose {
                        info!(
                            time = now.as_secs_f64(),
                            client = node,
                            server = packet.source,
                            bytes = packet.size_bytes,
                            "Client received reply"
                        );
                    }
                }
            }
            PacketKind::Request => {}
        }
        Ok(())
    }

    fn drain_outputs(&mut self, now: Duration) -> Result<()> {
        for output in std::mem::take(&mut self.outputs) {
            match output {
                MacOutput::FrameSent { node, packet, time } => {
                    if let Some(sink) = self.trace.as_mut() {
                        sink.record(TraceRecord::new(time, node, Direction::Tx, &packet))?;
                    }
                }
                MacOutput::Lost { packet, reason, .. } => {
                    debug!(packet = %packet, ?reason, "Packet lost");
                    self.flows.packet_lost(packet.flow_id, now);
                }
            }
        }
        Ok(())
    }
}
