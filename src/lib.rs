//! Radio link experiment engine.
//!
//! Runs discrete-event simulations of constant-bit-rate flows over a wireless
//! channel and reports per-flow received bytes and throughput, for a single
//! experiment or for a parameter sweep.

pub mod common;
pub mod control;
pub mod simulation;
pub mod sweep;
