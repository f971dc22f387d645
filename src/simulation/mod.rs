//! Discrete-event simulation core.
//!
//! The engine is single-threaded per experiment: one [`clock::Clock`] drives
//! on/off traffic sources, a delivery evaluator decides each frame from a
//! propagation model, and a flow statistics collector accumulates what arrives
//! inside each flow's observation window.
//!
//! ## Module Organization
//!
//! - `clock`: simulated time and the pending-event queue
//! - `geometry`, `topology`: node placement
//! - `signal_calculations`: path loss models, fading and dBm helpers
//! - `delivery`: per-frame delivery decision and propagation delay
//! - `traffic`: constant-bit-rate on/off source
//! - `stats`: per-flow counters and throughput
//! - `experiment`: wires all of the above into one run
//!
//! Everything returns [`error::SimResult`]; nothing panics on bad input.

pub mod clock;
pub mod delivery;
pub mod error;
pub mod experiment;
pub mod geometry;
pub mod signal_calculations;
pub mod stats;
pub mod topology;
pub mod traffic;

pub use clock::{Clock, SimTime};
pub use error::{SimError, SimResult};
pub use experiment::{Experiment, ExperimentBuilder, ExperimentReport, FlowSpec, run_experiment};
pub use geometry::Position;
pub use signal_calculations::{FadingModel, LossModel, PropagationModel};
pub use stats::{FlowCounters, FlowId, ObservationWindow};
pub use topology::{Node, Topology};
