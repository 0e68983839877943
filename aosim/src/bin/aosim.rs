//! Adaptive-optics simulation runner
//!
//! Loads a YAML configuration, calibrates every mirror against its sensor,
//! runs the correction loop and prints a summary. Outputs go to
//! `<output-dir>/<simName>/<timestamp>/` unless `--no-save` is given.
//!
//! Usage:
//! ```
//! cargo run --release --bin aosim -- conf/sh_8x8_lgs-uplink.yaml --iters 100
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use log::info;

use aosim::atmosphere::{AsGiven, StrengthNormalization, SumToOne};
use aosim::{verbosity_level, Simulation, SimulationOptions};

/// How `scrnStrengths` become per-layer turbulence weights
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Normalization {
    /// Scale the strengths so they sum to one
    SumToOne,
    /// Use the strengths as given
    AsGiven,
}

impl Normalization {
    fn policy(self) -> Arc<dyn StrengthNormalization> {
        match self {
            Normalization::SumToOne => Arc::new(SumToOne),
            Normalization::AsGiven => Arc::new(AsGiven),
        }
    }
}

/// Command line arguments for a simulation run
#[derive(Parser, Debug)]
#[command(
    name = "aosim",
    about = "Runs a configuration-driven adaptive-optics simulation",
    long_about = None
)]
struct Args {
    /// Path to the YAML configuration
    config: PathBuf,

    /// Number of loop iterations (overrides nIters)
    #[arg(long)]
    iters: Option<usize>,

    /// Random seed for turbulence and detector noise (overrides Atmosphere.randomSeed)
    #[arg(long)]
    seed: Option<u64>,

    /// Root directory for run outputs
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Do not write any outputs
    #[arg(long, default_value_t = false)]
    no_save: bool,

    /// Directory with saved interaction matrices to use instead of measuring
    #[arg(long)]
    imat_dir: Option<PathBuf>,

    /// Layer strength normalization
    #[arg(long, value_enum, default_value_t = Normalization::SumToOne)]
    normalization: Normalization,

    /// Logging verbosity 0-3 (overrides the configuration)
    #[arg(short, long)]
    verbosity: Option<u8>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = aosim::config::load(&args.config)?;

    let level = verbosity_level(args.verbosity.unwrap_or(config.verbosity));
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    info!("Loaded {} from {}", config.sim_name, args.config.display());
    let options = SimulationOptions {
        iterations: args.iters,
        seed: args.seed,
        output_root: (!args.no_save).then_some(args.output_dir),
        interaction_matrices: args.imat_dir,
        normalization: Some(args.normalization.policy()),
    };

    let mut sim = Simulation::new(config, options)?;
    let report = sim.run()?;
    println!("{}", report.summary());
    if let Some(dir) = &report.output_dir {
        println!("Outputs saved to {}", dir.display());
    }
    Ok(())
}
