//! Run outputs
//!
//! Everything a run saves goes into one directory,
//! `<output root>/<simName>/<YYYYmmdd_HHMMSS>/`:
//!
//! | file                 | written when     |
//! |----------------------|------------------|
//! | `config.yaml`        | always           |
//! | `imat_dm<id>.json`   | `saveCMat`       |
//! | `cmat_dm<id>.json`   | `saveCMat`       |
//! | `slopes.json`        | `saveSlopes`     |
//! | `dm_commands.json`   | `saveDmCommands` |
//! | `lgs_psf.json`       | `saveLgsPsf`     |
//! | `sci_psf.json`       | `saveSciPsf`     |
//! | `report.json`        | always           |
//!
//! Per-iteration data is buffered in memory and written when the run finishes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Local;
use nalgebra::DMatrix;
use ndarray::Array2;
use serde::Serialize;
use thiserror::Error;

use crate::calibration::{CalibrationError, MatrixKind, MatrixRecord};
use crate::config::{to_yaml_string, ConfigError, SimulationConfig};
use crate::report::RunReport;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Matrix(#[from] CalibrationError),
}

/// Which per-iteration outputs are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveFlags {
    pub cmat: bool,
    pub slopes: bool,
    pub dm_commands: bool,
    pub lgs_psf: bool,
    pub sci_psf: bool,
}

impl SaveFlags {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            cmat: config.save_cmat,
            slopes: config.save_slopes,
            dm_commands: config.save_dm_commands,
            lgs_psf: config.save_lgs_psf,
            sci_psf: config.save_sci_psf,
        }
    }
}

/// Row-major nested form used for images in JSON
fn image_rows(image: &Array2<f64>) -> Vec<Vec<f64>> {
    image.outer_iter().map(|row| row.to_vec()).collect()
}

/// Writes one run's outputs
#[derive(Debug)]
pub struct Recorder {
    dir: PathBuf,
    flags: SaveFlags,
    /// `[iteration][wfs]`
    slopes: Vec<Vec<Vec<f64>>>,
    /// `[iteration][dm]`
    dm_commands: Vec<Vec<Vec<f64>>>,
    /// WFS id to per-iteration beacon images
    lgs_psf: BTreeMap<u32, Vec<Vec<Vec<f64>>>>,
}

impl Recorder {
    /// Create the timestamped run directory under `root` and store the configuration.
    pub fn create(root: &Path, config: &SimulationConfig) -> Result<Self, RecorderError> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let dir = root.join(&config.sim_name).join(timestamp);
        std::fs::create_dir_all(&dir).map_err(|source| RecorderError::Io {
            path: dir.clone(),
            source,
        })?;
        log::info!("Saving outputs to {}", dir.display());

        let recorder = Self {
            dir,
            flags: SaveFlags::from_config(config),
            slopes: Vec::new(),
            dm_commands: Vec::new(),
            lgs_psf: BTreeMap::new(),
        };
        let yaml = to_yaml_string(config)?;
        let path = recorder.dir.join("config.yaml");
        std::fs::write(&path, yaml).map_err(|source| RecorderError::Io { path, source })?;
        Ok(recorder)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn flags(&self) -> SaveFlags {
        self.flags
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), RecorderError> {
        let path = self.dir.join(name);
        let file = File::create(&path).map_err(|source| RecorderError::Io { path, source })?;
        serde_json::to_writer(BufWriter::new(file), value)?;
        Ok(())
    }

    /// Store a calibration matrix when `saveCMat` is set.
    pub fn save_matrix(&self, dm: u32, kind: MatrixKind, matrix: &DMatrix<f64>) -> Result<(), RecorderError> {
        if !self.flags.cmat {
            return Ok(());
        }
        MatrixRecord::from_matrix(dm, kind, matrix).save(self.dir.join(MatrixRecord::file_name(dm, kind)))?;
        Ok(())
    }

    /// Buffer one iteration's slopes (in sensor order) and commands (in mirror order).
    pub fn record_iteration<'a>(
        &mut self,
        slopes: impl IntoIterator<Item = &'a [f64]>,
        commands: impl IntoIterator<Item = &'a [f64]>,
    ) {
        if self.flags.slopes {
            self.slopes.push(slopes.into_iter().map(<[f64]>::to_vec).collect());
        }
        if self.flags.dm_commands {
            self.dm_commands.push(commands.into_iter().map(<[f64]>::to_vec).collect());
        }
    }

    pub fn record_lgs_psf(&mut self, wfs: u32, psf: &Array2<f64>) {
        if self.flags.lgs_psf {
            self.lgs_psf.entry(wfs).or_default().push(image_rows(psf));
        }
    }

    /// Write the buffered data, the science images and the report.
    pub fn finish(
        &mut self,
        science: &[(u32, Array2<f64>)],
        report: &RunReport,
    ) -> Result<(), RecorderError> {
        if self.flags.slopes {
            self.write_json("slopes.json", &self.slopes)?;
        }
        if self.flags.dm_commands {
            self.write_json("dm_commands.json", &self.dm_commands)?;
        }
        if self.flags.lgs_psf {
            self.write_json("lgs_psf.json", &self.lgs_psf)?;
        }
        if self.flags.sci_psf {
            let images: BTreeMap<u32, Vec<Vec<f64>>> =
                science.iter().map(|(id, image)| (*id, image_rows(image))).collect();
            self.write_json("sci_psf.json", &images)?;
        }
        self.write_json("report.json", report)?;
        log::info!("Run outputs written to {}", self.dir.display());
        Ok(())
    }
}
