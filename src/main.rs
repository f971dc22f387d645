//! Command-line runner for single experiments and parameter sweeps.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{LevelFilter, info};

use radiolab_simulator::common::scene::load_scene;
use radiolab_simulator::control::config::SweepConfig;
use radiolab_simulator::sweep::{SweepCase, SweepRow, expand_cases, run_sweep, write_csv};

#[derive(Parser)]
#[command(
    name = "radiolab-simulator",
    about = "Discrete-event wireless link experiments",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario file and print per-flow results as CSV
    Run {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Override the scenario's random seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Write CSV here instead of standard output
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a parameter sweep described by a TOML file
    Sweep {
        /// Sweep configuration file
        config: PathBuf,

        /// Worker threads (overrides the config; 0 = one per core)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Write CSV here instead of the config's output
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("radiolab_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { scenario, seed, output } => {
            let scene = load_scene(&scenario)?;
            let case = SweepCase {
                distance_m: None,
                packet_size: None,
                seed,
            };
            let rows = run_sweep(&scene, &[case], 1)?;
            emit(&rows, output.as_deref())
        }
        Commands::Sweep { config, threads, output } => {
            let config = SweepConfig::load(&config)?;
            let scene = load_scene(&config.scenario)?;
            let cases = expand_cases(&config);
            let rows = run_sweep(&scene, &cases, threads.unwrap_or(config.threads))?;
            emit(&rows, output.as_deref().or(config.output.as_deref()))
        }
    }
}

fn emit(rows: &[SweepRow], output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            write_csv(rows, BufWriter::new(file)).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("wrote {} rows to {}", rows.len(), path.display());
        }
        None => write_csv(rows, io::stdout().lock()).context("Failed to write results")?,
    }
    Ok(())
}
