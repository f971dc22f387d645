//! Parameter sweeps: many independent experiments over one base scenario.
//!
//! Every case owns its own [`Experiment`](crate::simulation::Experiment), so
//! cases run on a rayon pool with no shared simulation state. Results come
//! back in case order regardless of which worker finished first.

use std::io::Write;

use anyhow::Context;
use rayon::prelude::*;

use crate::common::scene::Scene;
use crate::control::config::SweepConfig;
use crate::simulation::error::{SimError, SimResult};
use crate::simulation::stats::FlowId;

/// Overrides applied to the base scenario for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepCase {
    /// Line layout spacing, metres.
    pub distance_m: Option<f64>,
    pub packet_size: Option<u32>,
    pub seed: Option<u64>,
}

/// One CSV row: the outcome of one flow in one case.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRow {
    pub model: &'static str,
    pub distance_m: f64,
    pub packet_size: u32,
    pub seed: u64,
    pub flow: FlowId,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub throughput_bps: f64,
}

pub const CSV_HEADER: &str = "model,distance_m,packet_size,seed,flow,rx_packets,rx_bytes,throughput_bps";

/// Cartesian product of the config's lists, distance outermost.
pub fn expand_cases(config: &SweepConfig) -> Vec<SweepCase> {
    fn axis<T: Copy>(values: &[T]) -> Vec<Option<T>> {
        if values.is_empty() { vec![None] } else { values.iter().copied().map(Some).collect() }
    }

    let mut cases = Vec::new();
    for distance_m in axis(&config.distances) {
        for packet_size in axis(&config.packet_sizes) {
            for seed in axis(&config.seeds) {
                cases.push(SweepCase {
                    distance_m,
                    packet_size,
                    seed,
                });
            }
        }
    }
    cases
}

/// Apply a case's overrides to a copy of the base scene.
pub fn apply_case(base: &Scene, case: &SweepCase) -> SimResult<Scene> {
    let mut scene = base.clone();
    if let Some(distance) = case.distance_m {
        let layout = scene
            .layout
            .as_mut()
            .ok_or_else(|| SimError::config("distance sweeps need a scenario with a line layout"))?;
        layout.spacing = distance;
    }
    if let Some(size) = case.packet_size {
        for flow in &mut scene.flows {
            flow.packet_size = size;
        }
    }
    if let Some(seed) = case.seed {
        scene.seed = seed;
    }
    Ok(scene)
}

/// Run a single case to completion.
pub fn run_case(base: &Scene, case: &SweepCase) -> SimResult<Vec<SweepRow>> {
    let scene = apply_case(base, case)?;
    let experiment = scene.experiment()?;
    let report = experiment.run()?;
    let topology = experiment.topology();

    let mut rows = Vec::with_capacity(scene.flows.len());
    for flow in experiment.flows() {
        let counters = report.counters(&flow.id)?;
        rows.push(SweepRow {
            model: experiment.model().name(),
            distance_m: topology.distance(flow.source, flow.destination)?,
            packet_size: flow.packet_size,
            seed: experiment.seed(),
            flow: flow.id.clone(),
            rx_packets: counters.packets_received,
            rx_bytes: counters.bytes_received,
            throughput_bps: report.throughput(&flow.id)?,
        });
    }
    Ok(rows)
}

/// Run all cases on `threads` workers (0 = one per core).
///
/// Fails with the first failing case, in case order.
pub fn run_sweep(base: &Scene, cases: &[SweepCase], threads: usize) -> anyhow::Result<Vec<SweepRow>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("sweep-{i}"))
        .build()
        .context("Failed to build sweep thread pool")?;
    log::info!("running {} sweep cases on {} threads", cases.len(), pool.current_num_threads());

    let results: Vec<SimResult<Vec<SweepRow>>> = pool.install(|| cases.par_iter().map(|case| run_case(base, case)).collect());

    let mut rows = Vec::new();
    for (case, result) in cases.iter().zip(results) {
        rows.extend(result.with_context(|| format!("sweep case {case:?} failed"))?);
    }
    Ok(rows)
}

/// Write rows as CSV with [`CSV_HEADER`].
pub fn write_csv<W: Write>(rows: &[SweepRow], mut out: W) -> std::io::Result<()> {
    writeln!(out, "{CSV_HEADER}")?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{},{},{},{:.3}",
            row.model, row.distance_m, row.packet_size, row.seed, row.flow, row.rx_packets, row.rx_bytes, row.throughput_bps
        )?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base_scene() -> Scene {
        Scene::from_json(
            r#"{
                "model": { "model": "friis" },
                "layout": { "count": 2, "spacing": 50.0 },
                "flows": [
                    { "source": 0, "destination": 1, "start": 1.0, "stop": 10.0,
                      "data_rate_bps": 1000000, "packet_size": 1000 }
                ],
                "stop_time": 10.0
            }"#,
        )
        .unwrap()
    }

    fn config(distances: Vec<f64>, packet_sizes: Vec<u32>, seeds: Vec<u64>) -> SweepConfig {
        SweepConfig {
            scenario: PathBuf::from("unused.json"),
            distances,
            packet_sizes,
            seeds,
            threads: 2,
            output: None,
        }
    }

    #[test]
    fn expands_cartesian_product_in_order() {
        let cases = expand_cases(&config(vec![10.0, 20.0], vec![500, 1000], vec![]));
        assert_eq!(cases.len(), 4);
        assert_eq!(cases[0].distance_m, Some(10.0));
        assert_eq!(cases[1].packet_size, Some(1000));
        assert_eq!(cases[2].distance_m, Some(20.0));
        assert!(cases.iter().all(|c| c.seed.is_none()));

        let single = expand_cases(&config(vec![], vec![], vec![]));
        assert_eq!(single, vec![SweepCase { distance_m: None, packet_size: None, seed: None }]);
    }

    #[test]
    fn parallel_results_keep_case_order() {
        let scene = base_scene();
        let cases = expand_cases(&config(vec![50.0, 4_000.0, 100.0], vec![500], vec![7]));
        let rows = run_sweep(&scene, &cases, 3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().map(|r| r.distance_m).collect::<Vec<_>>(), vec![50.0, 4_000.0, 100.0]);
        assert!((rows[0].throughput_bps - 1e6).abs() < 1e-6);
        // Beyond the free-space range at 5.15 GHz.
        assert_eq!(rows[1].rx_bytes, 0);
        assert_eq!(rows[2].rx_packets, 2250);
        assert!(rows.iter().all(|r| r.seed == 7 && r.packet_size == 500 && r.model == "friis"));
    }

    #[test]
    fn failing_case_fails_the_sweep() {
        let scene = base_scene();
        let mut cases = expand_cases(&config(vec![50.0], vec![], vec![]));
        cases.push(SweepCase { distance_m: Some(-1.0), packet_size: None, seed: None });
        assert!(run_sweep(&scene, &cases, 1).is_err());
    }

    #[test]
    fn distance_override_needs_layout() {
        let mut scene = base_scene();
        scene.nodes = scene.topology().unwrap().nodes().cloned().collect();
        scene.layout = None;
        let case = SweepCase { distance_m: Some(10.0), packet_size: None, seed: None };
        assert!(matches!(apply_case(&scene, &case), Err(SimError::Configuration(_))));
    }

    #[test]
    fn csv_has_header_and_one_line_per_row() {
        let rows = run_sweep(&base_scene(), &expand_cases(&config(vec![], vec![], vec![])), 1).unwrap();
        let mut out = Vec::new();
        write_csv(&rows, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "friis,50,1000,1,0->1:9,1125,1125000,1000000.000");
    }
}
