//! Sweep configuration: which scenario to run and which parameters to vary.

pub mod config;

pub use config::SweepConfig;
