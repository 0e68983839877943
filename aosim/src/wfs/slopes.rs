//! Slope vectors with per-subaperture validity

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Measured slopes in arcseconds, laid out as `[x_0 .. x_n-1, y_0 .. y_n-1]`.
///
/// A subaperture without signal keeps the value 0.0 and has both of its
/// entries flagged invalid. Consumers must skip invalid entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlopeVector {
    pub values: Vec<f64>,
    pub valid: Vec<bool>,
}

impl SlopeVector {
    /// All-zero, all-valid vector for `n_subaps` subapertures
    pub fn zeros(n_subaps: usize) -> Self {
        Self {
            values: vec![0.0; 2 * n_subaps],
            valid: vec![true; 2 * n_subaps],
        }
    }

    /// Build from per-subaperture `(x, y)` measurements, `None` meaning no signal.
    pub fn from_subaps(measurements: &[Option<(f64, f64)>]) -> Self {
        let n = measurements.len();
        let mut slopes = Self::zeros(n);
        for (i, m) in measurements.iter().enumerate() {
            match m {
                Some((x, y)) => {
                    slopes.values[i] = *x;
                    slopes.values[n + i] = *y;
                }
                None => slopes.mark_no_signal(i),
            }
        }
        slopes
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn n_subaps(&self) -> usize {
        self.values.len() / 2
    }

    /// Flag subaperture `i` as having no signal.
    pub fn mark_no_signal(&mut self, i: usize) {
        let n = self.n_subaps();
        self.values[i] = 0.0;
        self.values[n + i] = 0.0;
        self.valid[i] = false;
        self.valid[n + i] = false;
    }

    pub fn is_no_signal(&self, subap: usize) -> bool {
        !self.valid[subap]
    }

    /// Number of subapertures flagged as having no signal
    pub fn n_no_signal(&self) -> usize {
        self.valid[..self.n_subaps()].iter().filter(|v| !**v).count()
    }

    pub fn all_valid(&self) -> bool {
        self.valid.iter().all(|v| *v)
    }

    /// Mean x and y slope over valid subapertures
    pub fn mean_tip_tilt(&self) -> (f64, f64) {
        let n = self.n_subaps();
        let mut sum = (0.0, 0.0);
        let mut count = 0usize;
        for i in (0..n).filter(|&i| self.valid[i]) {
            sum.0 += self.values[i];
            sum.1 += self.values[n + i];
            count += 1;
        }
        if count == 0 {
            (0.0, 0.0)
        } else {
            (sum.0 / count as f64, sum.1 / count as f64)
        }
    }

    /// Subtract the mean tip and tilt from every valid subaperture.
    pub fn remove_tip_tilt(&mut self) {
        let n = self.n_subaps();
        let (tip, tilt) = self.mean_tip_tilt();
        for i in (0..n).filter(|&i| self.valid[i]) {
            self.values[i] -= tip;
            self.values[n + i] -= tilt;
        }
    }

    /// Subtract `reference` entry-wise from valid entries.
    pub fn subtract(&mut self, reference: &[f64]) {
        for ((v, r), ok) in self.values.iter_mut().zip(reference).zip(&self.valid) {
            if *ok {
                *v -= r;
            }
        }
    }

    /// RMS over valid entries, 0.0 when none are valid
    pub fn rms(&self) -> f64 {
        let valid: Vec<f64> = self
            .values
            .iter()
            .zip(&self.valid)
            .filter(|(_, ok)| **ok)
            .map(|(v, _)| *v)
            .collect();
        ao_math::rms(&valid)
    }

    /// Indices of valid entries
    pub fn valid_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.valid[i]).collect()
    }

    pub fn to_dvector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.values)
    }
}
