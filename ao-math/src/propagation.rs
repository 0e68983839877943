//! Angular-spectrum propagation of complex optical fields
//!
//! Implements Fresnel propagation over a distance `z` by multiplying the
//! field's spatial spectrum with the paraxial transfer function
//! `H(fx, fy) = exp(-iπλz(fx² + fy²))`. The grid is periodic, so energy
//! leaving one edge re-enters at the opposite one; callers pick grids that
//! are large compared to the beam.

use ndarray::Array2;
use rustfft::num_complex::Complex64;
use std::f64::consts::PI;
use thiserror::Error;

use crate::fft::{fft2_inplace, FftDirection};

/// Numerical failure during propagation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropagationError {
    #[error("invalid propagation parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("propagated field contains {count} non-finite samples")]
    NonFinite { count: usize },
}

/// Spatial frequency of FFT bin `k` for an `n`-point grid with spacing `dx`.
fn frequency(k: usize, n: usize, dx: f64) -> f64 {
    let signed = if k < n.div_ceil(2) {
        k as f64
    } else {
        k as f64 - n as f64
    };
    signed / (n as f64 * dx)
}

/// Propagate `field` a distance `z` metres.
///
/// # Arguments
/// * `field` - Complex field sampled on a regular grid
/// * `wavelength` - Wavelength in metres
/// * `dx` - Grid spacing in metres
/// * `z` - Propagation distance in metres (zero returns a copy)
///
/// # Returns
/// * `Ok(Array2<Complex64>)` - The propagated field on the same grid
/// * `Err(PropagationError)` - On invalid parameters or a non-finite result
pub fn angular_spectrum(
    field: &Array2<Complex64>,
    wavelength: f64,
    dx: f64,
    z: f64,
) -> Result<Array2<Complex64>, PropagationError> {
    if !(wavelength.is_finite() && wavelength > 0.0) {
        return Err(PropagationError::InvalidParameter {
            name: "wavelength",
            value: wavelength,
        });
    }
    if !(dx.is_finite() && dx > 0.0) {
        return Err(PropagationError::InvalidParameter {
            name: "dx",
            value: dx,
        });
    }
    if !z.is_finite() {
        return Err(PropagationError::InvalidParameter {
            name: "z",
            value: z,
        });
    }
    if z == 0.0 {
        return Ok(field.clone());
    }

    let (rows, cols) = field.dim();
    let mut spectrum = field.clone();
    fft2_inplace(&mut spectrum, FftDirection::Forward);

    for ((r, c), value) in spectrum.indexed_iter_mut() {
        let fy = frequency(r, rows, dx);
        let fx = frequency(c, cols, dx);
        let transfer = Complex64::from_polar(1.0, -PI * wavelength * z * (fx * fx + fy * fy));
        *value *= transfer;
    }

    fft2_inplace(&mut spectrum, FftDirection::Inverse);
    let norm = (rows * cols) as f64;
    spectrum.mapv_inplace(|v| v / norm);

    let count = spectrum
        .iter()
        .filter(|v| !(v.re.is_finite() && v.im.is_finite()))
        .count();
    if count > 0 {
        return Err(PropagationError::NonFinite { count });
    }

    Ok(spectrum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_wave_is_unchanged() {
        let field = Array2::from_elem((16, 16), Complex64::new(1.0, 0.0));
        let out = angular_spectrum(&field, 600e-9, 0.01, 5000.0).unwrap();
        for v in out.iter() {
            assert_relative_eq!(v.re, 1.0, epsilon = 1e-9);
            assert_relative_eq!(v.im, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_energy_is_conserved() {
        let field = Array2::from_shape_fn((32, 32), |(r, c)| {
            let d2 = (r as f64 - 16.0).powi(2) + (c as f64 - 16.0).powi(2);
            Complex64::new((-d2 / 20.0).exp(), 0.0)
        });
        let before: f64 = field.iter().map(|v| v.norm_sqr()).sum();
        let out = angular_spectrum(&field, 500e-9, 0.005, 1000.0).unwrap();
        let after: f64 = out.iter().map(|v| v.norm_sqr()).sum();
        assert_relative_eq!(before, after, max_relative = 1e-9);
    }

    #[test]
    fn test_non_finite_input_is_reported() {
        let mut field = Array2::from_elem((8, 8), Complex64::new(1.0, 0.0));
        field[[3, 3]] = Complex64::new(f64::NAN, 0.0);
        let err = angular_spectrum(&field, 500e-9, 0.01, 10.0).unwrap_err();
        assert!(matches!(err, PropagationError::NonFinite { .. }));
    }

    #[test]
    fn test_invalid_wavelength_rejected() {
        let field = Array2::from_elem((4, 4), Complex64::new(1.0, 0.0));
        let err = angular_spectrum(&field, 0.0, 0.01, 10.0).unwrap_err();
        assert_eq!(
            err,
            PropagationError::InvalidParameter {
                name: "wavelength",
                value: 0.0
            }
        );
    }
}
