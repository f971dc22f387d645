//! Experiment driver: one fully self-contained simulation run.
//!
//! An [`Experiment`] owns its topology and propagation model; [`Experiment::run`]
//! creates a fresh clock, sources, delivery evaluator and collector on every
//! call, so runs share no mutable state and can execute on separate threads.
//!
//! Control flow of a run:
//! 1) Schedule the global Stop at the stop time, then one Start per flow.
//! 2) Start activates the flow's on/off source and schedules its first Send.
//! 3) Send emits a packet, asks the delivery evaluator about the link, schedules
//!    a Receive on success, and schedules the next Send.
//! 4) Receive updates the collector, which applies the observation window.
//! 5) Stop finalizes the collector and halts the clock; anything later is
//!    discarded.

use std::collections::{BTreeMap, HashSet};

use super::clock::{Clock, SimTime};
use super::delivery::{DeliveryEvaluator, Verdict, validate_propagation_speed};
use super::error::{SimError, SimResult};
use super::signal_calculations::{FadingModel, PropagationModel, SPEED_OF_LIGHT};
use super::stats::{FlowCounters, FlowId, FlowStatsCollector, ObservationWindow};
use super::topology::Topology;
use super::traffic::{OnOffSource, packet_interval};

/// Caller-side description of one flow. Times are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSpec {
    pub id: FlowId,
    pub source: u32,
    pub destination: u32,
    pub start: f64,
    pub stop: f64,
    pub data_rate_bps: f64,
    pub packet_size: u32,
    /// Observation window; defaults to `[start, stop]`.
    pub observation: Option<(f64, f64)>,
}

impl FlowSpec {
    /// A 1 Mb/s flow of 1000-byte packets, active from 1 s to 10 s.
    pub fn new(source: u32, destination: u32, port: u16) -> Self {
        Self {
            id: FlowId::endpoints(source, destination, port),
            source,
            destination,
            start: 1.0,
            stop: 10.0,
            data_rate_bps: 1e6,
            packet_size: 1000,
            observation: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.id = FlowId::label(label);
        self
    }

    pub fn active(mut self, start: f64, stop: f64) -> Self {
        self.start = start;
        self.stop = stop;
        self
    }

    pub fn with_rate(mut self, data_rate_bps: f64) -> Self {
        self.data_rate_bps = data_rate_bps;
        self
    }

    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    pub fn observe(mut self, start: f64, end: f64) -> Self {
        self.observation = Some((start, end));
        self
    }
}

#[derive(Debug, Clone)]
struct PreparedFlow {
    spec: FlowSpec,
    start: SimTime,
    stop: SimTime,
    window: ObservationWindow,
}

/// Final outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentReport {
    pub counters: BTreeMap<FlowId, FlowCounters>,
    pub throughput_bps: BTreeMap<FlowId, f64>,
    pub aggregate_throughput_bps: f64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub events_dispatched: u64,
    pub end_time: SimTime,
}

impl ExperimentReport {
    pub fn counters(&self, flow: &FlowId) -> SimResult<&FlowCounters> {
        self.counters.get(flow).ok_or_else(|| SimError::UnknownFlow(flow.clone()))
    }

    pub fn throughput(&self, flow: &FlowId) -> SimResult<f64> {
        self.throughput_bps.get(flow).copied().ok_or_else(|| SimError::UnknownFlow(flow.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum EngineEvent {
    Start { flow: usize },
    Send { flow: usize },
    Receive { flow: usize, bytes: u32, sent_at: SimTime },
    Stop,
}

pub struct ExperimentBuilder {
    topology: Topology,
    model: PropagationModel,
    flows: Vec<FlowSpec>,
    stop_time: f64,
    seed: u64,
    fading: Option<FadingModel>,
    propagation_speed: f64,
}

impl ExperimentBuilder {
    pub fn new(topology: Topology, model: PropagationModel) -> Self {
        Self {
            topology,
            model,
            flows: Vec::new(),
            stop_time: 10.0,
            seed: 1,
            fading: None,
            propagation_speed: SPEED_OF_LIGHT,
        }
    }

    pub fn flow(mut self, flow: FlowSpec) -> Self {
        self.flows.push(flow);
        self
    }

    pub fn flows(mut self, flows: impl IntoIterator<Item = FlowSpec>) -> Self {
        self.flows.extend(flows);
        self
    }

    pub fn stop_time(mut self, secs: f64) -> Self {
        self.stop_time = secs;
        self
    }

    /// Seed for the fading generator. Unused without fading.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fading(mut self, fading: Option<FadingModel>) -> Self {
        self.fading = fading;
        self
    }

    pub fn propagation_speed(mut self, speed: f64) -> Self {
        self.propagation_speed = speed;
        self
    }

    /// Validate everything a run needs. Any error here means no event is ever
    /// processed.
    pub fn build(self) -> SimResult<Experiment> {
        let stop_time = SimTime::from_secs(self.stop_time)?;
        if let Some(fading) = &self.fading {
            fading.validate()?;
        }
        validate_propagation_speed(self.propagation_speed)?;

        let links = DeliveryEvaluator::new(&self.topology, &self.model);
        let mut seen = HashSet::new();
        let mut flows = Vec::with_capacity(self.flows.len());
        for spec in self.flows {
            if !seen.insert(spec.id.clone()) {
                return Err(SimError::config(format!("duplicate flow id {}", spec.id)));
            }
            flows.push(prepare_flow(&self.topology, &links, spec)?);
        }

        Ok(Experiment {
            topology: self.topology,
            model: self.model,
            flows,
            stop_time,
            seed: self.seed,
            fading: self.fading,
            propagation_speed: self.propagation_speed,
        })
    }
}

fn prepare_flow(topology: &Topology, links: &DeliveryEvaluator<'_>, spec: FlowSpec) -> SimResult<PreparedFlow> {
    let distance = topology.distance(spec.source, spec.destination)?;
    if spec.source == spec.destination {
        return Err(SimError::config(format!("flow {} sends to its own source node", spec.id)));
    }
    if distance <= 0.0 {
        return Err(SimError::config(format!(
            "flow {}: nodes {} and {} share a position",
            spec.id, spec.source, spec.destination
        )));
    }
    packet_interval(spec.packet_size, spec.data_rate_bps)?;
    let start = SimTime::from_secs(spec.start)?;
    let stop = SimTime::from_secs(spec.stop)?;
    if stop <= start {
        return Err(SimError::config(format!("flow {}: stop {} must be after start {}", spec.id, spec.stop, spec.start)));
    }
    let window = match spec.observation {
        Some((from, to)) => ObservationWindow::from_secs(from, to)?,
        None => ObservationWindow::new(start, stop)?,
    };
    // Models are pure, so an out-of-domain link fails now rather than mid-run.
    links.check_link(spec.source, spec.destination)?;
    Ok(PreparedFlow { spec, start, stop, window })
}

/// A validated, runnable experiment.
#[derive(Debug, Clone)]
pub struct Experiment {
    topology: Topology,
    model: PropagationModel,
    flows: Vec<PreparedFlow>,
    stop_time: SimTime,
    seed: u64,
    fading: Option<FadingModel>,
    propagation_speed: f64,
}

impl Experiment {
    pub fn builder(topology: Topology, model: PropagationModel) -> ExperimentBuilder {
        ExperimentBuilder::new(topology, model)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn model(&self) -> &PropagationModel {
        &self.model
    }

    pub fn stop_time(&self) -> SimTime {
        self.stop_time
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowSpec> {
        self.flows.iter().map(|f| &f.spec)
    }

    pub fn run(&self) -> SimResult<ExperimentReport> {
        log::info!(
            "running {} experiment: {} nodes, {} flows, stop at {}",
            self.model.name(),
            self.topology.len(),
            self.flows.len(),
            self.stop_time
        );

        let mut evaluator = DeliveryEvaluator::new(&self.topology, &self.model).with_propagation_speed(self.propagation_speed)?;
        if let Some(fading) = &self.fading {
            evaluator = evaluator.with_fading(fading.clone(), self.seed)?;
        }
        let mut collector = FlowStatsCollector::new();
        let mut sources = Vec::with_capacity(self.flows.len());
        let mut clock = Clock::new();

        clock.schedule(self.stop_time, EngineEvent::Stop)?;
        for (idx, flow) in self.flows.iter().enumerate() {
            collector.register(flow.spec.id.clone(), flow.window)?;
            let mut source = OnOffSource::new(flow.spec.packet_size, flow.spec.data_rate_bps)?;
            source.stop(flow.stop);
            sources.push(source);
            clock.schedule(flow.start, EngineEvent::Start { flow: idx })?;
        }

        let flows = &self.flows;
        let summary = clock.run(self.stop_time, |clock, now, event| {
            match event {
                EngineEvent::Start { flow } => {
                    log::debug!("{now}: flow {} starts", flows[flow].spec.id);
                    if let Some(first) = sources[flow].start(now)? {
                        clock.schedule(first, EngineEvent::Send { flow })?;
                    }
                }
                EngineEvent::Send { flow } => {
                    let Some(emission) = sources[flow].on_send(now) else {
                        return Ok(());
                    };
                    let spec = &flows[flow].spec;
                    collector.record_tx(&spec.id, emission.packet_size)?;
                    match evaluator.on_send(now, spec.source, spec.destination)? {
                        Verdict::Delivered { arrival, .. } => {
                            clock.schedule(
                                arrival,
                                EngineEvent::Receive {
                                    flow,
                                    bytes: emission.packet_size,
                                    sent_at: now,
                                },
                            )?;
                        }
                        Verdict::Dropped { .. } => collector.record_loss(&spec.id)?,
                    }
                    if let Some(next) = emission.next_send {
                        clock.schedule(next, EngineEvent::Send { flow })?;
                    }
                }
                EngineEvent::Receive { flow, bytes, sent_at } => {
                    collector.record_rx(&flows[flow].spec.id, bytes, sent_at, now)?;
                }
                EngineEvent::Stop => {
                    log::debug!("{now}: stop");
                    collector.finalize();
                    clock.halt();
                }
            }
            Ok(())
        })?;
        collector.finalize();

        let mut throughput_bps = BTreeMap::new();
        for id in collector.flows() {
            throughput_bps.insert(id.clone(), collector.throughput(id)?);
        }
        let report = ExperimentReport {
            counters: collector.snapshot(),
            throughput_bps,
            aggregate_throughput_bps: collector.aggregate_throughput(),
            frames_delivered: evaluator.delivered(),
            frames_dropped: evaluator.dropped(),
            events_dispatched: summary.dispatched,
            end_time: clock.now(),
        };
        log::info!(
            "run finished at {} after {} events ({:?}): {} frames delivered, {} dropped, {:.0} bps aggregate",
            report.end_time,
            report.events_dispatched,
            summary.reason,
            report.frames_delivered,
            report.frames_dropped,
            report.aggregate_throughput_bps
        );
        Ok(report)
    }
}

/// Build and run one experiment, returning the final per-flow counters.
pub fn run_experiment(
    topology: Topology,
    model: PropagationModel,
    flows: Vec<FlowSpec>,
    stop_time: f64,
) -> SimResult<BTreeMap<FlowId, FlowCounters>> {
    let experiment = Experiment::builder(topology, model).flows(flows).stop_time(stop_time).build()?;
    Ok(experiment.run()?.counters)
}
