//! Static node placement for one run.
//!
//! Nodes are added while the topology is being built and never move afterwards;
//! the experiment only ever borrows the topology immutably.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{SimError, SimResult};
use super::geometry::Position;
use super::signal_calculations::DEFAULT_TX_POWER_DBM;

fn default_tx_power() -> f64 {
    DEFAULT_TX_POWER_DBM
}

/// A radio node: identifier, fixed position and transmit power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: u32,
    pub position: Position,
    /// Transmit power at the antenna port, in dBm.
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: f64,
}

impl Node {
    pub fn new(node_id: u32, position: Position) -> Self {
        Self {
            node_id,
            position,
            tx_power_dbm: DEFAULT_TX_POWER_DBM,
        }
    }

    pub fn with_tx_power(mut self, tx_power_dbm: f64) -> Self {
        self.tx_power_dbm = tx_power_dbm;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: BTreeMap<u32, Node>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a topology from a list of nodes, rejecting duplicate ids.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> SimResult<Self> {
        let mut topology = Self::new();
        for node in nodes {
            topology.add_node(node)?;
        }
        Ok(topology)
    }

    /// Nodes `0..count` on the x axis, `spacing` metres apart, all at `height`.
    ///
    /// This is the two-node link and the ad-hoc chain layout.
    pub fn line(count: u32, spacing: f64, height: f64) -> SimResult<Self> {
        if count == 0 {
            return Err(SimError::config("line topology needs at least one node"));
        }
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(SimError::config(format!("line spacing must be positive, got {spacing}")));
        }
        Self::from_nodes((0..count).map(|i| Node::new(i, Position::new(spacing * i as f64, 0.0, height))))
    }

    pub fn add_node(&mut self, node: Node) -> SimResult<()> {
        if !node.position.is_finite() {
            return Err(SimError::config(format!("node {} has a non-finite position", node.node_id)));
        }
        if !node.tx_power_dbm.is_finite() {
            return Err(SimError::config(format!("node {} has a non-finite transmit power", node.node_id)));
        }
        if self.nodes.contains_key(&node.node_id) {
            return Err(SimError::config(format!("duplicate node_id {}", node.node_id)));
        }
        self.nodes.insert(node.node_id, node);
        Ok(())
    }

    pub fn with_node(mut self, node: Node) -> SimResult<Self> {
        self.add_node(node)?;
        Ok(self)
    }

    pub fn node(&self, node_id: u32) -> SimResult<&Node> {
        self.nodes.get(&node_id).ok_or(SimError::UnknownNode(node_id))
    }

    pub fn position(&self, node_id: u32) -> SimResult<Position> {
        self.node(node_id).map(|n| n.position)
    }

    /// Distance in metres between two nodes.
    pub fn distance(&self, a: u32, b: u32) -> SimResult<f64> {
        Ok(self.position(a)?.distance(&self.position(b)?))
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_places_nodes_evenly() {
        let topo = Topology::line(4, 200.0, 1.5).unwrap();
        assert_eq!(topo.len(), 4);
        assert_eq!(topo.position(3).unwrap(), Position::new(600.0, 0.0, 1.5));
        assert_eq!(topo.distance(0, 3).unwrap(), 600.0);
        assert_eq!(topo.distance(2, 1).unwrap(), 200.0);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Topology::from_nodes([Node::new(1, Position::default()), Node::new(1, Position::new(5.0, 0.0, 0.0))]).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn unknown_nodes_are_reported() {
        let topo = Topology::line(2, 50.0, 0.0).unwrap();
        assert_eq!(topo.distance(0, 7).unwrap_err(), SimError::UnknownNode(7));
    }

    #[test]
    fn invalid_line_parameters() {
        assert!(Topology::line(0, 10.0, 0.0).is_err());
        assert!(Topology::line(3, 0.0, 0.0).is_err());
        assert!(Topology::line(3, -5.0, 0.0).is_err());
    }

    #[test]
    fn tx_power_defaults_and_overrides() {
        let node = Node::new(0, Position::default());
        assert_eq!(node.tx_power_dbm, DEFAULT_TX_POWER_DBM);
        let node: Node = serde_json::from_str(r#"{"node_id": 4, "position": {"x": 1.0, "y": 0.0}, "tx_power_dbm": 23.0}"#).unwrap();
        assert_eq!(node.tx_power_dbm, 23.0);
        assert_eq!(node.with_tx_power(10.0).tx_power_dbm, 10.0);
    }
}
