//! Configuration loading for parameter sweeps.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A sweep over one base scenario.
///
/// Empty lists leave the corresponding scenario value untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SweepConfig {
    /// Path of the base scenario JSON, relative to the config file.
    pub scenario: PathBuf,
    /// Node spacing values for line layouts, metres.
    #[serde(default)]
    pub distances: Vec<f64>,
    #[serde(default)]
    pub packet_sizes: Vec<u32>,
    #[serde(default)]
    pub seeds: Vec<u64>,
    /// Worker threads; 0 uses one per core.
    #[serde(default)]
    pub threads: usize,
    /// CSV destination. Standard output when absent.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl SweepConfig {
    /// Load configuration from a TOML file.
    ///
    /// Relative `scenario` and `output` paths are resolved against the
    /// directory holding the config file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let mut config: SweepConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        let base = config_path.parent().unwrap_or(Path::new("."));
        config.scenario = base.join(&config.scenario);
        config.output = config.output.map(|out| base.join(out));
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(d) = self.distances.iter().find(|d| !(d.is_finite() && **d > 0.0)) {
            anyhow::bail!("sweep distances must be positive, got {d}");
        }
        if self.packet_sizes.contains(&0) {
            anyhow::bail!("sweep packet sizes must be positive");
        }
        Ok(())
    }
}
