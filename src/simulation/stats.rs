//! Per-flow delivery statistics.
//!
//! Each registered flow has an observation window; received bytes only count
//! while `start <= now <= end`. Transmit and loss counters cover the whole run,
//! like a flow monitor would. Counters only ever grow, and stop changing once
//! the collector is finalized at the end of the run.

use std::collections::BTreeMap;
use std::fmt;

use super::clock::SimTime;
use super::error::{SimError, SimResult};

/// Identifies one directional traffic stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlowId {
    /// Derived from the endpoints and the destination port.
    Endpoints { source: u32, destination: u32, port: u16 },
    /// Explicit caller-chosen label.
    Label(String),
}

impl FlowId {
    pub fn endpoints(source: u32, destination: u32, port: u16) -> Self {
        FlowId::Endpoints { source, destination, port }
    }

    pub fn label(label: impl Into<String>) -> Self {
        FlowId::Label(label.into())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowId::Endpoints { source, destination, port } => write!(f, "{source}->{destination}:{port}"),
            FlowId::Label(label) => f.write_str(label),
        }
    }
}

/// Closed interval of simulated time over which received bytes are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationWindow {
    start: SimTime,
    end: SimTime,
}

impl ObservationWindow {
    pub fn new(start: SimTime, end: SimTime) -> SimResult<Self> {
        if end <= start {
            return Err(SimError::config(format!("observation window must end after it starts ({start} .. {end})")));
        }
        Ok(Self { start, end })
    }

    pub fn from_secs(start: f64, end: f64) -> SimResult<Self> {
        Self::new(SimTime::from_secs(start)?, SimTime::from_secs(end)?)
    }

    pub fn start(&self) -> SimTime {
        self.start
    }

    pub fn end(&self) -> SimTime {
        self.end
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end.saturating_sub(self.start)).as_secs()
    }

    pub fn contains(&self, t: SimTime) -> bool {
        self.start <= t && t <= self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowCounters {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub first_rx_time: Option<SimTime>,
    pub last_rx_time: Option<SimTime>,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    /// Frames the channel failed to deliver.
    pub lost_packets: u64,
    /// Sum of one-way delays of the counted receptions.
    pub delay_sum: SimTime,
}

impl FlowCounters {
    pub fn mean_delay(&self) -> Option<SimTime> {
        if self.packets_received == 0 {
            return None;
        }
        Some(SimTime::from_nanos(self.delay_sum.as_nanos() / self.packets_received))
    }

    /// Fraction of transmitted packets that were lost on the channel.
    pub fn loss_ratio(&self) -> f64 {
        if self.tx_packets == 0 {
            return 0.0;
        }
        self.lost_packets as f64 / self.tx_packets as f64
    }
}

#[derive(Debug, Clone)]
struct FlowEntry {
    window: ObservationWindow,
    counters: FlowCounters,
}

#[derive(Debug, Default)]
pub struct FlowStatsCollector {
    flows: BTreeMap<FlowId, FlowEntry>,
    finalized: bool,
}

impl FlowStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, flow: FlowId, window: ObservationWindow) -> SimResult<()> {
        if self.flows.contains_key(&flow) {
            return Err(SimError::config(format!("flow {flow} registered twice")));
        }
        log::debug!("observing flow {flow} over [{}, {}]", window.start(), window.end());
        self.flows.insert(
            flow,
            FlowEntry {
                window,
                counters: FlowCounters::default(),
            },
        );
        Ok(())
    }

    fn entry_mut(&mut self, flow: &FlowId) -> SimResult<Option<&mut FlowEntry>> {
        let finalized = self.finalized;
        let entry = self.flows.get_mut(flow).ok_or_else(|| SimError::UnknownFlow(flow.clone()))?;
        if finalized {
            log::debug!("flow {flow}: ignoring update after finalization");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn record_tx(&mut self, flow: &FlowId, bytes: u32) -> SimResult<()> {
        if let Some(entry) = self.entry_mut(flow)? {
            entry.counters.tx_packets += 1;
            entry.counters.tx_bytes += u64::from(bytes);
        }
        Ok(())
    }

    pub fn record_loss(&mut self, flow: &FlowId) -> SimResult<()> {
        if let Some(entry) = self.entry_mut(flow)? {
            entry.counters.lost_packets += 1;
        }
        Ok(())
    }

    /// Count a successful reception at `now` of a packet sent at `sent_at`.
    ///
    /// Returns whether it fell inside the flow's observation window.
    pub fn record_rx(&mut self, flow: &FlowId, bytes: u32, sent_at: SimTime, now: SimTime) -> SimResult<bool> {
        let Some(entry) = self.entry_mut(flow)? else {
            return Ok(false);
        };
        if !entry.window.contains(now) {
            log::trace!("flow {flow}: reception at {now} outside observation window");
            return Ok(false);
        }
        let counters = &mut entry.counters;
        counters.bytes_received += u64::from(bytes);
        counters.packets_received += 1;
        counters.first_rx_time.get_or_insert(now);
        counters.last_rx_time = Some(now);
        counters.delay_sum = counters.delay_sum.saturating_add(now.saturating_sub(sent_at));
        Ok(true)
    }

    /// Freeze all counters.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn counters(&self, flow: &FlowId) -> SimResult<&FlowCounters> {
        self.flows.get(flow).map(|e| &e.counters).ok_or_else(|| SimError::UnknownFlow(flow.clone()))
    }

    pub fn window(&self, flow: &FlowId) -> SimResult<ObservationWindow> {
        self.flows.get(flow).map(|e| e.window).ok_or_else(|| SimError::UnknownFlow(flow.clone()))
    }

    /// `bytes_received · 8 / window duration`, in bits per second.
    pub fn throughput(&self, flow: &FlowId) -> SimResult<f64> {
        let entry = self.flows.get(flow).ok_or_else(|| SimError::UnknownFlow(flow.clone()))?;
        Ok(entry.counters.bytes_received as f64 * 8.0 / entry.window.duration_secs())
    }

    /// Sum of the per-flow throughputs.
    pub fn aggregate_throughput(&self) -> f64 {
        self.flows
            .values()
            .map(|e| e.counters.bytes_received as f64 * 8.0 / e.window.duration_secs())
            .sum()
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowId> {
        self.flows.keys()
    }

    pub fn snapshot(&self) -> BTreeMap<FlowId, FlowCounters> {
        self.flows.iter().map(|(id, e)| (id.clone(), e.counters.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> SimTime {
        SimTime::from_secs(s).unwrap()
    }

    fn collector_with(flow: &FlowId, start: f64, end: f64) -> FlowStatsCollector {
        let mut c = FlowStatsCollector::new();
        c.register(flow.clone(), ObservationWindow::from_secs(start, end).unwrap()).unwrap();
        c
    }

    #[test]
    fn counts_only_inside_window_inclusive() {
        let flow = FlowId::endpoints(0, 1, 9);
        let mut c = collector_with(&flow, 1.0, 10.0);
        assert!(!c.record_rx(&flow, 1000, secs(0.5), secs(0.9)).unwrap());
        assert!(c.record_rx(&flow, 1000, secs(0.9), secs(1.0)).unwrap());
        assert!(c.record_rx(&flow, 1000, secs(5.0), secs(5.5)).unwrap());
        assert!(c.record_rx(&flow, 1000, secs(9.9), secs(10.0)).unwrap());
        assert!(!c.record_rx(&flow, 1000, secs(10.0), secs(10.1)).unwrap());

        let counters = c.counters(&flow).unwrap();
        assert_eq!(counters.packets_received, 3);
        assert_eq!(counters.bytes_received, 3000);
        assert_eq!(counters.first_rx_time, Some(secs(1.0)));
        assert_eq!(counters.last_rx_time, Some(secs(10.0)));
        assert_eq!(counters.delay_sum, secs(0.7));
        assert_eq!(counters.mean_delay(), Some(SimTime::from_nanos(secs(0.7).as_nanos() / 3)));
    }

    #[test]
    fn throughput_uses_caller_window() {
        let flow = FlowId::label("bulk");
        let mut c = collector_with(&flow, 1.0, 10.0);
        for i in 0..1125 {
            let t = SimTime::from_nanos(1_000_000_000 + i * 8_000_000);
            c.record_rx(&flow, 1000, t, t).unwrap();
        }
        assert!((c.throughput(&flow).unwrap() - 1_000_000.0).abs() < 1e-6);
        assert!((c.aggregate_throughput() - 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn tx_and_loss_counters_cover_whole_run() {
        let flow = FlowId::endpoints(0, 1, 9);
        let mut c = collector_with(&flow, 1.0, 2.0);
        c.record_tx(&flow, 500).unwrap();
        c.record_tx(&flow, 500).unwrap();
        c.record_loss(&flow).unwrap();
        let counters = c.counters(&flow).unwrap();
        assert_eq!((counters.tx_packets, counters.tx_bytes, counters.lost_packets), (2, 1000, 1));
        assert_eq!(counters.loss_ratio(), 0.5);
        assert_eq!(counters.mean_delay(), None);
    }

    #[test]
    fn unknown_flows_are_errors() {
        let mut c = FlowStatsCollector::new();
        let ghost = FlowId::label("ghost");
        assert_eq!(c.counters(&ghost).unwrap_err(), SimError::UnknownFlow(ghost.clone()));
        assert!(c.throughput(&ghost).is_err());
        assert!(c.record_rx(&ghost, 1, SimTime::ZERO, SimTime::ZERO).is_err());
        assert!(c.record_tx(&ghost, 1).is_err());
    }

    #[test]
    fn duplicate_registration_and_empty_window_are_rejected() {
        let flow = FlowId::label("a");
        let mut c = collector_with(&flow, 0.0, 1.0);
        assert!(c.register(flow, ObservationWindow::from_secs(0.0, 1.0).unwrap()).is_err());
        assert!(ObservationWindow::from_secs(2.0, 2.0).is_err());
        assert!(ObservationWindow::from_secs(3.0, 2.0).is_err());
    }

    #[test]
    fn finalized_counters_do_not_change() {
        let flow = FlowId::label("a");
        let mut c = collector_with(&flow, 0.0, 10.0);
        c.record_rx(&flow, 100, secs(1.0), secs(1.0)).unwrap();
        c.finalize();
        assert!(!c.record_rx(&flow, 100, secs(2.0), secs(2.0)).unwrap());
        c.record_tx(&flow, 100).unwrap();
        let snapshot = c.snapshot();
        assert_eq!(snapshot[&flow].bytes_received, 100);
        assert_eq!(snapshot[&flow].tx_packets, 0);
    }

    #[test]
    fn flow_ids_display_readably() {
        assert_eq!(FlowId::endpoints(0, 3, 5000).to_string(), "0->3:5000");
        assert_eq!(FlowId::label("voice").to_string(), "voice");
    }
}
