//! Event queue and virtual clock.
//!
//! Events are kept in a `BTreeMap` keyed by `(time, sequence)`, so dispatch
//! order is strictly non-decreasing in time and FIFO among events scheduled
//! for the same instant. Handlers run one at a time; an event scheduled from
//! inside a handler for the current instant runs after every event already
//! queued for that instant.

use crate::error::{Result, SimError};
use crate::medium::TxId;
use crate::packet::Packet;
use crate::NodeId;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    /// Echo client timer: emit the next request.
    AppSend,
    /// Sense delay elapsed, try to seize the medium.
    TxAttempt,
    /// One backoff slot elapsed, or the medium became idle again.
    Backoff,
    /// The frame `tx` left the air.
    TxComplete { tx: TxId },
    /// No acknowledgement arrived for the last frame.
    Timeout,
    /// A frame reached its destination.
    RxDeliver { packet: Packet },
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::AppSend => write!(f, "App Send"),
            EventKind::TxAttempt => write!(f, "Tx Attempt"),
            EventKind::Backoff => write!(f, "Backoff"),
            EventKind::TxComplete { tx } => write!(f, "Tx Complete #{}", tx),
            EventKind::Timeout => write!(f, "Timeout"),
            EventKind::RxDeliver { packet } => write!(f, "Rx Deliver {}", packet),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub node: NodeId,
    pub time: Duration,
}

impl Event {
    pub fn new(kind: EventKind, node: NodeId, time: Duration) -> Event {
        Event { kind, node, time }
    }
}

/// Ordering key: time first, then insertion sequence.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct EventKey {
    time: Duration,
    sequence: u64,
}

/// Returned by [`Scheduler::schedule`]; cancels the event before dispatch.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct EventHandle(EventKey);

impl EventHandle {
    pub fn time(&self) -> Duration {
        self.0.time
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    events: BTreeMap<EventKey, Event>,
    sequence: u64,
    now: Duration,
    dispatched: u64,
    cancelled: u64,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Events still waiting for dispatch.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Events handed to a handler so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled
    }

    /// Schedule `kind` for `node` after `delay`.
    pub fn schedule(&mut self, kind: EventKind, node: NodeId, delay: Duration) -> EventHandle {
        let time = self.now.saturating_add(delay);
        self.insert(kind, node, time)
    }

    /// Schedule `kind` for `node` at absolute time `at`.
    pub fn schedule_at(&mut self, kind: EventKind, node: NodeId, at: Duration) -> Result<EventHandle> {
        if at < self.now {
            return Err(SimError::InvalidSchedule { at, now: self.now });
        }
        Ok(self.insert(kind, node, at))
    }

    fn insert(&mut self, kind: EventKind, node: NodeId, time: Duration) -> EventHandle {
        self.sequence += 1;
        let key = EventKey {
            time,
            sequence: self.sequence,
        };
        self.events.insert(key, Event::new(kind, node, time));
        EventHandle(key)
    }

    /// Remove a pending event. Returns `false` if it already ran or was
    /// cancelled before.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        let removed = self.events.remove(&handle.0).is_some();
        if removed {
            self.cancelled += 1;
        }
        removed
    }

    /// Dispatch every event scheduled strictly before `stop`, then advance
    /// the clock to `stop`. Events at or after `stop` stay queued.
    ///
    /// The first handler error aborts the run and is returned.
    pub fn run_until<F>(&mut self, stop: Duration, mut handler: F) -> Result<()>
    where
        F: FnMut(&mut Scheduler, Event) -> Result<()>,
    {
        trace!(stop_secs = stop.as_secs_f64(), "Running scheduler");

        while let Some((&key, _)) = self.events.first_key_value() {
            if key.time >= stop {
                debug!(remaining_events = self.events.len(), "Stop time reached");
                break;
            }
            let Some((key, event)) = self.events.pop_first() else {
                break;
            };
            self.now = key.time;
            self.dispatched += 1;
            trace!(time = ?self.now, node = event.node, kind = %event.kind, "Dispatching event");
            handler(self, event)?;
        }

        if self.now < stop {
            self.now = stop;
        }
        Ok(())
    }

    /// Drop every queued event without running it.
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.events.len();
        self.events.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_until(scheduler: &mut Scheduler, stop: Duration) -> Vec<Event> {
        let mut seen = Vec::new();
        scheduler
            .run_until(stop, |_, event| {
                seen.push(event);
                Ok(())
            })
            .unwrap();
        seen
    }

    #[test]
    fn test_dispatch_in_time_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(EventKind::Backoff, 2, Duration::from_millis(30));
        scheduler.schedule(EventKind::Backoff, 0, Duration::from_millis(10));
        scheduler.schedule(EventKind::Backoff, 1, Duration::from_millis(20));

        let seen = collect_until(&mut scheduler, Duration::from_secs(1));
        let nodes: Vec<_> = seen.iter().map(|e| e.node).collect();
        assert_eq!(nodes, vec![0, 1, 2]);
        assert_eq!(scheduler.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_same_time_is_fifo() {
        let mut scheduler = Scheduler::new();
        for node in [5, 3, 9] {
            scheduler.schedule(EventKind::TxAttempt, node, Duration::from_millis(1));
        }
        let seen = collect_until(&mut scheduler, Duration::from_secs(1));
        let nodes: Vec<_> = seen.iter().map(|e| e.node).collect();
        assert_eq!(nodes, vec![5, 3, 9]);
    }

    #[test]
    fn test_cancel_removes_event() {
        let mut scheduler = Scheduler::new();
        let keep = scheduler.schedule(EventKind::Timeout, 0, Duration::from_millis(1));
        let drop = scheduler.schedule(EventKind::Timeout, 1, Duration::from_millis(1));
        assert!(scheduler.cancel(drop));
        assert!(!scheduler.cancel(drop));
        assert_eq!(scheduler.cancelled(), 1);

        let seen = collect_until(&mut scheduler, Duration::from_secs(1));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].time, keep.time());
    }

    #[test]
    fn test_schedule_in_past_fails() {
        let mut scheduler = Scheduler::new();
        collect_until(&mut scheduler, Duration::from_secs(2));
        let err = scheduler
            .schedule_at(EventKind::AppSend, 0, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidSchedule { .. }));
        assert!(scheduler
            .schedule_at(EventKind::AppSend, 0, Duration::from_secs(2))
            .is_ok());
    }

    #[test]
    fn test_stop_time_is_exclusive() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(EventKind::AppSend, 0, Duration::from_secs(1));
        scheduler.schedule(EventKind::AppSend, 1, Duration::from_secs(2));

        let seen = collect_until(&mut scheduler, Duration::from_secs(2));
        assert_eq!(seen.len(), 1);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.discard_pending(), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_handler_events_at_same_instant_run_last() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(EventKind::AppSend, 0, Duration::from_millis(5));
        scheduler.schedule(EventKind::AppSend, 1, Duration::from_millis(5));

        let mut order = Vec::new();
        scheduler
            .run_until(Duration::from_secs(1), |s, event| {
                order.push(event.node);
                if event.node == 0 {
                    s.schedule(EventKind::TxAttempt, 2, Duration::ZERO);
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(scheduler.dispatched(), 3);
    }

    #[test]
    fn test_handler_error_aborts_run() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(EventKind::AppSend, 0, Duration::from_millis(1));
        scheduler.schedule(EventKind::AppSend, 1, Duration::from_millis(2));

        let result = scheduler.run_until(Duration::from_secs(1), |s, _| {
            s.schedule_at(EventKind::Timeout, 0, Duration::ZERO).map(|_| ())
        });
        assert!(result.is_err());
        assert_eq!(scheduler.dispatched(), 1);
    }
}
