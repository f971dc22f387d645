//! Error taxonomy of the simulation core.
//!
//! Every error is reported synchronously to the caller of the operation that
//! detected it. A frame that the channel fails to deliver is not an error; it
//! only bumps the drop counter of the delivery evaluator.

use super::stats::FlowId;

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// An event was scheduled before the current simulated time.
    #[error("cannot schedule event at {requested}s, clock is already at {now}s")]
    InvalidTime { requested: f64, now: f64 },

    /// Propagation model input outside the model's validity domain.
    #[error("{model}: {parameter} = {value} outside valid range [{min}, {max}]")]
    OutOfRange {
        model: &'static str,
        parameter: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Statistics requested for a flow that was never registered.
    #[error("unknown flow: {0}")]
    UnknownFlow(FlowId),

    /// A flow or link references a node that is not part of the topology.
    #[error("unknown node: {0}")]
    UnknownNode(u32),

    /// Zero/negative rate, packet size or distance, duplicate ids, bad windows.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SimError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }
}
