//! Adaptive-optics end-to-end simulation
//!
//! Builds a telescope, a layered frozen-flow atmosphere, wavefront sensors,
//! deformable mirrors, a reconstructor and science cameras from one YAML
//! configuration, then runs the correction loop. Laser guide star sensors can
//! model the upward propagation of the launched beam, which broadens their
//! spots before the return light is sensed.
//!
//! ```no_run
//! use aosim::{Simulation, SimulationOptions};
//!
//! let config = aosim::config::load("conf/sh_8x8_lgs-uplink.yaml")?;
//! let mut sim = Simulation::new(config, SimulationOptions::default())?;
//! let report = sim.run()?;
//! println!("{}", report.summary());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod atmosphere;
pub mod calibration;
pub mod config;
pub mod dm;
pub mod error;
pub mod line_of_sight;
pub mod pupil;
pub mod reconstructor;
pub mod recorder;
pub mod report;
pub mod science;
pub mod sim;
pub mod wfs;

pub use config::{ConfigError, SimulationConfig};
pub use error::{ComponentId, SimError};
pub use report::RunReport;
pub use sim::{LoopState, Simulation, SimulationOptions};

/// Log level for a configuration `verbosity` value
pub fn verbosity_level(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    }
}
