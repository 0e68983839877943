//! Interaction matrices: measurement and persistence
//!
//! Column `i` of a mirror's interaction matrix is its sensor's noise-free
//! response to the mirror surface produced by a unit command on actuator `i`
//! (a poke of `iMatValue`). Matrices can be stored as JSON and loaded back to
//! skip the measurement on later runs.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dm::{DeformableMirror, DmError};
use crate::pupil::Pupil;
use crate::reconstructor::ReconstructorError;
use crate::wfs::WavefrontSensor;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stored matrix {path} is {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    Shape {
        path: PathBuf,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error(transparent)]
    Mirror(#[from] DmError),

    #[error(transparent)]
    Reconstructor(#[from] ReconstructorError),
}

/// Which matrix a [`MatrixRecord`] holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixKind {
    Interaction,
    Control,
}

/// JSON form of a matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRecord {
    pub dm: u32,
    pub kind: MatrixKind,
    pub rows: usize,
    pub cols: usize,
    /// Row-major values
    pub data: Vec<f64>,
    /// Creation time (RFC 3339)
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MatrixRecord {
    pub fn from_matrix(dm: u32, kind: MatrixKind, matrix: &DMatrix<f64>) -> Self {
        let (rows, cols) = matrix.shape();
        let data = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .map(|(r, c)| matrix[(r, c)])
            .collect();
        Self {
            dm,
            kind,
            rows,
            cols,
            data,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.rows, self.cols, &self.data)
    }

    /// File name used for this record inside an output directory
    pub fn file_name(dm: u32, kind: MatrixKind) -> String {
        match kind {
            MatrixKind::Interaction => format!("imat_dm{dm}.json"),
            MatrixKind::Control => format!("cmat_dm{dm}.json"),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let record: Self = serde_json::from_reader(reader)?;
        if record.data.len() != record.rows * record.cols {
            return Err(CalibrationError::Shape {
                path: path.to_path_buf(),
                rows: record.rows,
                cols: record.data.len() / record.rows.max(1),
                expected_rows: record.rows,
                expected_cols: record.cols,
            });
        }
        Ok(record)
    }
}

/// Poke every actuator of `dm` and record the response of `wfs`.
pub fn measure_interaction_matrix(
    dm: &DeformableMirror,
    wfs: &WavefrontSensor,
    pupil: &Pupil,
) -> DMatrix<f64> {
    let columns: Vec<Vec<f64>> = (0..dm.n_actuators())
        .into_par_iter()
        .map(|i| match dm.influence_function(i) {
            Some(shape) => wfs.calibration_slopes(pupil, shape).values,
            None => vec![0.0; wfs.n_slopes()],
        })
        .collect();
    DMatrix::from_fn(wfs.n_slopes(), dm.n_actuators(), |r, c| columns[c][r])
}

/// Load a stored interaction matrix for `dm` from `dir`, checking its shape.
pub fn load_interaction_matrix(
    dir: &Path,
    dm: &DeformableMirror,
    n_slopes: usize,
) -> Result<DMatrix<f64>, CalibrationError> {
    let path = dir.join(MatrixRecord::file_name(dm.id(), MatrixKind::Interaction));
    let record = MatrixRecord::load(&path)?;
    if record.rows != n_slopes || record.cols != dm.n_actuators() {
        return Err(CalibrationError::Shape {
            path,
            rows: record.rows,
            cols: record.cols,
            expected_rows: n_slopes,
            expected_cols: dm.n_actuators(),
        });
    }
    Ok(record.to_matrix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DmConfig, DmType, PropagationMode, ReconstructorConfig, ReconstructorType, WfsConfig, WfsType,
    };
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn setup() -> (Pupil, WavefrontSensor, DeformableMirror) {
        let pupil = Pupil::annulus(32, 4.0, 0.0);
        let wfs_config = WfsConfig {
            wfs_type: WfsType::Gradient,
            gs_position: [0.0, 0.0],
            gs_height: 0.0,
            gs_mag: 0.0,
            nx_subaps: 4,
            pxls_per_subap: 4,
            subap_fov: 4.0,
            wavelength: 500e-9,
            remove_tt: false,
            cent_threshold: 0.3,
            fft_oversamp: 2,
            propagation_mode: PropagationMode::Geometric,
            subap_threshold: 0.5,
            photon_noise: false,
            e_read_noise: 0.0,
            lgs: None,
        };
        let dm_config = DmConfig {
            dm_type: DmType::TipTilt,
            nx_actuators: 2,
            wfs: 0,
            imat_value: 0.5,
            gain: None,
            svd_conditioning: None,
            closed: true,
        };
        let recon = ReconstructorConfig {
            recon_type: ReconstructorType::MvmSeparateDms,
            svd_conditioning: 0.03,
            gain: 0.5,
        };
        let wfs = WavefrontSensor::new(0, &wfs_config, &pupil, 0.01);
        let dm = DeformableMirror::new(0, &dm_config, &recon, &pupil, 0);
        (pupil, wfs, dm)
    }

    #[test]
    fn test_tip_tilt_interaction_matrix() {
        let (pupil, wfs, dm) = setup();
        let imat = measure_interaction_matrix(&dm, &wfs, &pupil);
        let n = wfs.n_subaps();
        assert_eq!(imat.shape(), (2 * n, 2));
        for i in 0..n {
            // Half-arcsecond poke seen as half-arcsecond slope on its own axis only
            assert_relative_eq!(imat[(i, 0)], 0.5, epsilon = 1e-6);
            assert_relative_eq!(imat[(n + i, 0)], 0.0, epsilon = 1e-6);
            assert_relative_eq!(imat[(n + i, 1)], 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_saved_matrix_loads_back() {
        let (pupil, wfs, dm) = setup();
        let imat = measure_interaction_matrix(&dm, &wfs, &pupil);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MatrixRecord::file_name(0, MatrixKind::Interaction));
        MatrixRecord::from_matrix(0, MatrixKind::Interaction, &imat)
            .save(&path)
            .unwrap();

        let loaded = load_interaction_matrix(dir.path(), &dm, wfs.n_slopes()).unwrap();
        assert_eq!(loaded.shape(), imat.shape());
        for (a, b) in loaded.iter().zip(imat.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let (_, wfs, dm) = setup();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MatrixRecord::file_name(0, MatrixKind::Interaction));
        MatrixRecord::from_matrix(0, MatrixKind::Interaction, &DMatrix::zeros(3, 2))
            .save(&path)
            .unwrap();
        let err = load_interaction_matrix(dir.path(), &dm, wfs.n_slopes()).unwrap_err();
        assert!(matches!(err, CalibrationError::Shape { rows: 3, .. }));
    }
}
