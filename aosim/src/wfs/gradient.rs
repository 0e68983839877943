//! Gradient sensor: the least-squares phase plane over each subaperture.
//!
//! A fast idealised sensor with no optics and no detector. It always works on
//! the geometric phase and ignores noise settings.

use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;

use super::geometry::SubapGrid;
use super::slopes::SlopeVector;
use crate::config::{WfsConfig, ASEC2RAD};
use crate::pupil::Pupil;

#[derive(Debug, Clone)]
pub struct GradientSensor {
    grid: SubapGrid,
    pixel_scale: f64,
}

impl GradientSensor {
    pub fn new(config: &WfsConfig, pupil: &Pupil) -> Self {
        Self {
            grid: SubapGrid::new(pupil, config.nx_subaps, config.subap_threshold),
            pixel_scale: pupil.pixel_scale,
        }
    }

    pub fn grid(&self) -> &SubapGrid {
        &self.grid
    }

    /// Tilt of the best-fit plane in arcseconds, `None` when fewer than three
    /// illuminated pixels constrain it.
    fn fit(&self, phase: &Array2<f64>, mask: &Array2<f64>, row: usize, col: usize) -> Option<(f64, f64)> {
        let phase = self.grid.block(phase, row, col);
        let mask = self.grid.block(mask, row, col);

        let mut normal = Matrix3::<f64>::zeros();
        let mut rhs = Vector3::<f64>::zeros();
        let mut count = 0usize;
        for ((r, c), &m) in mask.indexed_iter() {
            if m <= 0.5 {
                continue;
            }
            let basis = Vector3::new(1.0, c as f64 * self.pixel_scale, r as f64 * self.pixel_scale);
            normal += basis * basis.transpose();
            rhs += basis * phase[[r, c]];
            count += 1;
        }
        if count < 3 {
            return None;
        }

        let solution = normal.lu().solve(&rhs)?;
        let to_arcsec = 1e-9 / ASEC2RAD;
        Some((solution[1] * to_arcsec, solution[2] * to_arcsec))
    }

    /// Slopes of a phase map in nm
    pub fn measure(&self, phase: &Array2<f64>, mask: &Array2<f64>) -> SlopeVector {
        let measurements: Vec<Option<(f64, f64)>> = self
            .grid
            .active
            .iter()
            .map(|&(row, col)| self.fit(phase, mask, row, col))
            .collect();
        SlopeVector::from_subaps(&measurements)
    }
}
