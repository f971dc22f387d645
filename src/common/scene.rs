//! Scenario loading, parsing, and validation logic.
//!
//! A scenario file is JSON and describes one complete experiment: node
//! placement, the propagation model, optional fading, the flows and the stop
//! time. Loading validates the file shape; [`Scene::experiment`] performs the
//! engine's own pre-flight checks.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::simulation::error::SimResult;
use crate::simulation::experiment::{Experiment, FlowSpec};
use crate::simulation::signal_calculations::{
    DEFAULT_RX_SENSITIVITY_DBM, FadingModel, LossModel, PropagationModel, SPEED_OF_LIGHT,
};
use crate::simulation::stats::FlowId;
use crate::simulation::topology::{Node, Topology};

const MAX_NODES: usize = 10_000;
const MIN_TX_POWER_DBM: f64 = -50.0;
const MAX_TX_POWER_DBM: f64 = 60.0;

/// Error type for scene loading failures.
#[derive(Debug, thiserror::Error)]
pub enum SceneLoadError {
    #[error("Failed to read file: {0}")]
    FileRead(String),
    #[error("Failed to parse JSON: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Nodes `0..count` placed on the x axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineLayout {
    pub count: u32,
    /// Distance between neighbouring nodes, metres.
    pub spacing: f64,
    #[serde(default)]
    pub height: f64,
}

/// One flow as written in the scenario file. Times are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub source: u32,
    pub destination: u32,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Overrides the endpoint-based flow id.
    #[serde(default)]
    pub label: Option<String>,
    pub start: f64,
    pub stop: f64,
    pub data_rate_bps: f64,
    pub packet_size: u32,
    #[serde(default)]
    pub observation_start: Option<f64>,
    #[serde(default)]
    pub observation_end: Option<f64>,
}

fn default_port() -> u16 {
    9
}

fn default_sensitivity() -> f64 {
    DEFAULT_RX_SENSITIVITY_DBM
}

fn default_speed() -> f64 {
    SPEED_OF_LIGHT
}

fn default_seed() -> u64 {
    1
}

/// Root structure of a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Path loss model and its parameters.
    pub model: LossModel,
    #[serde(default = "default_sensitivity")]
    pub rx_sensitivity_dbm: f64,
    #[serde(default)]
    pub fading: Option<FadingModel>,
    #[serde(default = "default_speed")]
    pub propagation_speed: f64,
    /// Explicit node list. Mutually exclusive with `layout`.
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub layout: Option<LineLayout>,
    pub flows: Vec<FlowEntry>,
    pub stop_time: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl From<&FlowEntry> for FlowSpec {
    fn from(entry: &FlowEntry) -> Self {
        let mut spec = FlowSpec::new(entry.source, entry.destination, entry.port)
            .active(entry.start, entry.stop)
            .with_rate(entry.data_rate_bps)
            .with_packet_size(entry.packet_size);
        if let Some(label) = &entry.label {
            spec = spec.with_label(label.clone());
        }
        if let (Some(from), Some(to)) = (entry.observation_start, entry.observation_end) {
            spec = spec.observe(from, to);
        }
        spec
    }
}

impl FlowEntry {
    pub fn id(&self) -> FlowId {
        match &self.label {
            Some(label) => FlowId::label(label.clone()),
            None => FlowId::endpoints(self.source, self.destination, self.port),
        }
    }
}

impl Scene {
    pub fn from_json(data: &str) -> Result<Self, SceneLoadError> {
        let scene: Scene = serde_json::from_str(data)
            .context("Invalid JSON format")
            .map_err(|e| SceneLoadError::Parse(format!("{e:#}")))?;
        validate_scene(&scene).map_err(SceneLoadError::Validation)?;
        Ok(scene)
    }

    pub fn topology(&self) -> SimResult<Topology> {
        match &self.layout {
            Some(layout) => Topology::line(layout.count, layout.spacing, layout.height),
            None => Topology::from_nodes(self.nodes.iter().cloned()),
        }
    }

    pub fn propagation_model(&self) -> SimResult<PropagationModel> {
        PropagationModel::new(self.model.clone())?.with_rx_sensitivity(self.rx_sensitivity_dbm)
    }

    pub fn flow_specs(&self) -> Vec<FlowSpec> {
        self.flows.iter().map(FlowSpec::from).collect()
    }

    /// Build a validated experiment from this scene.
    pub fn experiment(&self) -> SimResult<Experiment> {
        Experiment::builder(self.topology()?, self.propagation_model()?)
            .flows(self.flow_specs())
            .stop_time(self.stop_time)
            .seed(self.seed)
            .fading(self.fading.clone())
            .propagation_speed(self.propagation_speed)
            .build()
    }
}

/// Load and parse a scene from a file.
pub fn load_scene(path: &Path) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
        .map_err(|e| SceneLoadError::FileRead(format!("{e:#}")))?;
    let scene = Scene::from_json(&data)?;
    log::debug!(
        "loaded scene {}: {} model, {} flows, stop at {}s",
        path.display(),
        scene.model.name(),
        scene.flows.len(),
        scene.stop_time
    );
    Ok(scene)
}

/// Check the shape of a parsed scene.
///
/// Physical checks (reachability, model domains, rates) are left to the
/// experiment builder.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    match (&scene.layout, scene.nodes.is_empty()) {
        (Some(_), false) => return Err("Scene must use either 'nodes' or 'layout', not both".to_string()),
        (None, true) => return Err("Scene must contain at least one node".to_string()),
        _ => {}
    }

    if let Some(layout) = &scene.layout {
        if layout.count == 0 || layout.count as usize > MAX_NODES {
            return Err(format!("Layout count {} must be between 1 and {}", layout.count, MAX_NODES));
        }
        if !(layout.spacing.is_finite() && layout.spacing > 0.0) {
            return Err(format!("Invalid layout spacing {}, must be positive", layout.spacing));
        }
    }

    if scene.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.nodes.len(), MAX_NODES));
    }
    let mut node_ids = HashSet::new();
    for node in &scene.nodes {
        if !node_ids.insert(node.node_id) {
            return Err(format!("Duplicate node_id found: {}", node.node_id));
        }
        if !(MIN_TX_POWER_DBM..=MAX_TX_POWER_DBM).contains(&node.tx_power_dbm) {
            return Err(format!(
                "Node {} tx_power_dbm {} outside realistic range ({} to {} dBm)",
                node.node_id, node.tx_power_dbm, MIN_TX_POWER_DBM, MAX_TX_POWER_DBM
            ));
        }
    }

    if scene.flows.is_empty() {
        return Err("Scene must contain at least one flow".to_string());
    }
    for (idx, flow) in scene.flows.iter().enumerate() {
        if flow.observation_start.is_some() != flow.observation_end.is_some() {
            return Err(format!("Flow {idx} must set both observation_start and observation_end or neither"));
        }
    }

    if !(scene.stop_time.is_finite() && scene.stop_time > 0.0) {
        return Err(format!("Invalid stop_time {}, must be positive", scene.stop_time));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_NODE_FRIIS: &str = r#"{
        "model": { "model": "friis" },
        "layout": { "count": 2, "spacing": 50.0 },
        "flows": [
            { "source": 0, "destination": 1, "start": 1.0, "stop": 10.0,
              "data_rate_bps": 1000000, "packet_size": 1000 }
        ],
        "stop_time": 10.0
    }"#;

    #[test]
    fn loads_scene_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_NODE_FRIIS.as_bytes()).unwrap();
        let scene = load_scene(file.path()).unwrap();
        assert_eq!(scene.rx_sensitivity_dbm, DEFAULT_RX_SENSITIVITY_DBM);
        assert_eq!(scene.seed, 1);
        assert_eq!(scene.flows[0].port, 9);
        assert_eq!(scene.flows[0].id(), FlowId::endpoints(0, 1, 9));

        let report = scene.experiment().unwrap().run().unwrap();
        assert_eq!(report.counters(&scene.flows[0].id()).unwrap().bytes_received, 1_125_000);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_scene(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SceneLoadError::FileRead(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(Scene::from_json("{ not json"), Err(SceneLoadError::Parse(_))));
        let unknown_model = TWO_NODE_FRIIS.replace("\"friis\"", "\"okumura\"");
        assert!(matches!(Scene::from_json(&unknown_model), Err(SceneLoadError::Parse(_))));
    }

    #[test]
    fn explicit_nodes_and_model_parameters() {
        let scene = Scene::from_json(
            r#"{
                "model": { "model": "cost231_hata", "city_size": "large", "c_db": 3.0 },
                "rx_sensitivity_dbm": -95.0,
                "fading": { "fading": "shadowing", "sigma_db": 4.0 },
                "nodes": [
                    { "node_id": 7, "position": { "x": 0.0, "y": 0.0 }, "tx_power_dbm": 43.0 },
                    { "node_id": 8, "position": { "x": 1200.0, "y": 500.0, "z": 2.0 } }
                ],
                "flows": [
                    { "source": 7, "destination": 8, "label": "downlink", "start": 0.5, "stop": 4.0,
                      "data_rate_bps": 500000, "packet_size": 512,
                      "observation_start": 1.0, "observation_end": 4.0 }
                ],
                "stop_time": 5.0,
                "seed": 99
            }"#,
        )
        .unwrap();
        assert_eq!(scene.model.name(), "cost231_hata");
        assert_eq!(scene.topology().unwrap().len(), 2);
        let spec = &scene.flow_specs()[0];
        assert_eq!(spec.id, FlowId::label("downlink"));
        assert_eq!(spec.observation, Some((1.0, 4.0)));
        let experiment = scene.experiment().unwrap();
        assert_eq!(experiment.seed(), 99);
    }

    #[test]
    fn validation_rejects_bad_shapes() {
        let cases = [
            TWO_NODE_FRIIS.replace("\"stop_time\": 10.0", "\"stop_time\": 0.0"),
            TWO_NODE_FRIIS.replace("\"spacing\": 50.0", "\"spacing\": -5.0"),
            TWO_NODE_FRIIS.replace(
                "\"layout\": { \"count\": 2, \"spacing\": 50.0 }",
                "\"nodes\": [{ \"node_id\": 1, \"position\": { \"x\": 0, \"y\": 0 } }, { \"node_id\": 1, \"position\": { \"x\": 5, \"y\": 0 } }]",
            ),
            TWO_NODE_FRIIS.replace("\"packet_size\": 1000 }", "\"packet_size\": 1000, \"observation_start\": 2.0 }"),
            TWO_NODE_FRIIS.replace(
                "\"flows\": [",
                "\"nodes\": [{ \"node_id\": 0, \"position\": { \"x\": 0, \"y\": 0 } }], \"flows\": [",
            ),
        ];
        for json in cases {
            let err = Scene::from_json(&json).unwrap_err();
            assert!(matches!(err, SceneLoadError::Validation(_)), "{json}: {err}");
        }
    }

    #[test]
    fn engine_errors_surface_from_experiment() {
        let scene = Scene::from_json(&TWO_NODE_FRIIS.replace("\"destination\": 1", "\"destination\": 5")).unwrap();
        assert!(scene.experiment().is_err());
    }
}
