//! Echo traffic.
//!
//! Every client sends `max_packets` fixed-size requests to the server, one
//! every `interval`, inside its `[start, stop)` window. The server answers
//! each request it receives inside its own window with one reply of the same
//! size.

use crate::error::Result;
use crate::packet::{Packet, PacketKind};
use crate::scheduler::{EventKind, Scheduler};
use crate::NodeId;
use std::time::Duration;

/// A packet the application wants sent; the driver assigns the flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub source: NodeId,
    pub destination: NodeId,
    pub kind: PacketKind,
    pub sequence: u32,
    pub size_bytes: u32,
}

#[derive(Clone, Debug)]
pub struct EchoClient {
    node: NodeId,
    server: NodeId,
    interval: Duration,
    size_bytes: u32,
    max_packets: u32,
    start: Duration,
    stop: Duration,
    sent: u32,
    replies: u32,
}

impl EchoClient {
    pub fn new(
        node: NodeId,
        server: NodeId,
        interval: Duration,
        size_bytes: u32,
        max_packets: u32,
        window: (Duration, Duration),
    ) -> Self {
        Self {
            node,
            server,
            interval,
            size_bytes,
            max_packets,
            start: window.0,
            stop: window.1,
            sent: 0,
            replies: 0,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn replies(&self) -> u32 {
        self.replies
    }

    /// Arm the first send timer.
    pub fn start(&self, sched: &mut Scheduler) -> Result<()> {
        if self.max_packets > 0 && self.start < self.stop {
            sched.schedule_at(EventKind::AppSend, self.node, self.start.max(sched.now()))?;
        }
        Ok(())
    }

    /// Send timer fired: emit the next request and re-arm if more are due
    /// before the stop time.
    pub fn on_send_timer(&mut self, sched: &mut Scheduler) -> Option<Outgoing> {
        let now = sched.now();
        if self.sent >= self.max_packets || now >= self.stop {
            return None;
        }
        let request = Outgoing {
            source: self.node,
            destination: self.server,
            kind: PacketKind::Request,
            sequence: self.sent,
            size_bytes: self.size_bytes,
        };
        self.sent += 1;
        let next = now.checked_add(self.interval);
        if self.sent < self.max_packets && next.is_some_and(|next| next < self.stop) {
            sched.schedule(EventKind::AppSend, self.node, self.interval);
        }
        Some(request)
    }

    pub fn on_reply(&mut self, reply: &Packet) {
        if reply.kind == PacketKind::Reply && reply.source == self.server {
            self.replies += 1;
        }
    }
}

#[derive(Clone, Debug)]
pub struct EchoResponder {
    node: NodeId,
    start: Duration,
    stop: Duration,
    received: u64,
}

impl EchoResponder {
    pub fn new(node: NodeId, window: (Duration, Duration)) -> Self {
        Self {
            node,
            start: window.0,
            stop: window.1,
            received: 0,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Answer a delivered request with one reply of the same size.
    pub fn on_request(&mut self, now: Duration, request: &Packet) -> Option<Outgoing> {
        if request.kind != PacketKind::Request || request.destination != self.node {
            return None;
        }
        if now < self.start || now >= self.stop {
            return None;
        }
        self.received += 1;
        Some(Outgoing {
            source: self.node,
            destination: request.source,
            kind: PacketKind::Reply,
            sequence: request.sequence,
            size_bytes: request.size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn drain(client: &mut EchoClient, sched: &mut Scheduler, stop: Duration) -> Vec<(Duration, u32)> {
        let mut sent = Vec::new();
        sched
            .run_until(stop, |s, _| {
                if let Some(out) = client.on_send_timer(s) {
                    sent.push((s.now(), out.sequence));
                }
                Ok(())
            })
            .unwrap();
        sent
    }

    #[test]
    fn test_client_sends_max_packets_at_interval() {
        let mut sched = Scheduler::new();
        let mut client = EchoClient::new(1, 0, secs(1), 512, 5, (secs(2), secs(15)));
        client.start(&mut sched).unwrap();

        let sent = drain(&mut client, &mut sched, secs(15));
        assert_eq!(
            sent,
            vec![(secs(2), 0), (secs(3), 1), (secs(4), 2), (secs(5), 3), (secs(6), 4)]
        );
        assert_eq!(client.sent(), 5);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_client_stops_at_window_end() {
        let mut sched = Scheduler::new();
        let mut client = EchoClient::new(1, 0, secs(1), 512, 100, (secs(2), secs(5)));
        client.start(&mut sched).unwrap();

        let sent = drain(&mut client, &mut sched, secs(15));
        // The send due at exactly 5 s falls outside the window.
        assert_eq!(sent.len(), 3);
    }

    #[test]
    fn test_client_interval_past_clock_range_sends_once() {
        let mut sched = Scheduler::new();
        let mut client = EchoClient::new(1, 0, Duration::MAX, 512, 5, (secs(2), secs(15)));
        client.start(&mut sched).unwrap();

        let sent = drain(&mut client, &mut sched, secs(15));
        assert_eq!(sent, vec![(secs(2), 0)]);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_client_with_no_packets_never_arms() {
        let mut sched = Scheduler::new();
        let client = EchoClient::new(1, 0, secs(1), 512, 0, (secs(2), secs(15)));
        client.start(&mut sched).unwrap();
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_responder_echoes_inside_window() {
        let mut server = EchoResponder::new(0, (secs(2), secs(15)));
        let request = Packet {
            flow_id: 1,
            source: 4,
            destination: 0,
            kind: PacketKind::Request,
            sequence: 7,
            size_bytes: 256,
            tx_timestamp: secs(3),
            rx_timestamp: Some(secs(3)),
        };

        let reply = server.on_request(secs(3), &request).unwrap();
        assert_eq!(reply.destination, 4);
        assert_eq!(reply.sequence, 7);
        assert_eq!(reply.size_bytes, 256);
        assert_eq!(reply.kind, PacketKind::Reply);

        assert!(server.on_request(secs(1), &request).is_none());
        assert!(server.on_request(secs(15), &request).is_none());
        assert_eq!(server.received(), 1);
    }
}
