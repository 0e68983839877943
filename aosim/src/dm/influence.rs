//! Influence functions of the supported mirror types.
//!
//! All shapes are optical path in nm per unit command, restricted to the
//! pupil and with their piston removed.

use ndarray::Array2;

use ao_math::{masked_mean, zoom};

use crate::config::ASEC2RAD;
use crate::pupil::Pupil;

/// Minimum fraction of an actuator's influence that must fall inside the
/// pupil for it to be controlled.
pub const ACTIVE_OVERLAP: f64 = 0.25;

fn finish(mut shape: Array2<f64>, pupil: &Pupil, amplitude: f64) -> Array2<f64> {
    shape *= amplitude;
    shape *= &pupil.mask;
    let piston = masked_mean(&shape, &pupil.mask);
    shape.zip_mut_with(&pupil.mask, |v, &m| {
        if m > 0.5 {
            *v -= piston
        }
    });
    shape
}

/// Tip and tilt ramps for a one-arcsecond unit command, scaled by `amplitude`.
///
/// Returns `[x tilt, y tilt]`.
pub fn tip_tilt(pupil: &Pupil, amplitude: f64) -> Vec<Array2<f64>> {
    let nm_per_metre = ASEC2RAD * 1e9;
    (0..2)
        .map(|axis| {
            let ramp = Array2::from_shape_fn((pupil.size, pupil.size), |(r, c)| {
                let (x, y) = pupil.coords(r, c);
                if axis == 0 {
                    x * nm_per_metre
                } else {
                    y * nm_per_metre
                }
            });
            finish(ramp, pupil, amplitude)
        })
        .collect()
}

/// Actuator grid positions `(row, col)` whose influence overlaps the pupil
pub fn active_actuators(pupil: &Pupil, nx_actuators: usize) -> Vec<(usize, usize)> {
    let mut active = Vec::new();
    for row in 0..nx_actuators {
        for col in 0..nx_actuators {
            let raw = poke(pupil.size, nx_actuators, row, col);
            let total = raw.sum();
            let inside = (&raw * &pupil.mask).sum();
            if total > 0.0 && inside / total >= ACTIVE_OVERLAP {
                active.push((row, col));
            }
        }
    }
    active
}

/// Unit poke of one actuator on an `nx × nx` grid spanning the pupil, interpolated
/// to the pupil grid. A single actuator spans the whole pupil as a piston.
fn poke(size: usize, nx_actuators: usize, row: usize, col: usize) -> Array2<f64> {
    let mut grid = Array2::<f64>::zeros((nx_actuators, nx_actuators));
    grid[[row, col]] = 1.0;
    zoom(&grid, (size, size))
}

/// Influence functions of the given piezo actuators, scaled by `amplitude`.
pub fn piezo(
    pupil: &Pupil,
    nx_actuators: usize,
    actuators: &[(usize, usize)],
    amplitude: f64,
) -> Vec<Array2<f64>> {
    actuators
        .iter()
        .map(|&(row, col)| finish(poke(pupil.size, nx_actuators, row, col), pupil, amplitude))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tip_tilt_amplitude() {
        let pupil = Pupil::annulus(32, 4.0, 0.0);
        let shapes = tip_tilt(&pupil, 1.0);
        assert_eq!(shapes.len(), 2);
        // Slope of a one-arcsecond tilt in nm per metre along x
        let (x0, _) = pupil.coords(16, 10);
        let (x1, _) = pupil.coords(16, 20);
        let slope = (shapes[0][[16, 20]] - shapes[0][[16, 10]]) / (x1 - x0);
        assert_relative_eq!(slope, ASEC2RAD * 1e9, max_relative = 1e-9);
        // y tilt does not vary along a row
        assert_relative_eq!(shapes[1][[16, 10]], shapes[1][[16, 20]], epsilon = 1e-9);
    }

    #[test]
    fn test_shapes_are_piston_free_and_masked() {
        let pupil = Pupil::annulus(32, 4.0, 1.0);
        let actuators = active_actuators(&pupil, 5);
        for shape in piezo(&pupil, 5, &actuators, 100.0)
            .iter()
            .chain(tip_tilt(&pupil, 0.5).iter())
        {
            assert_relative_eq!(masked_mean(shape, &pupil.mask), 0.0, epsilon = 1e-9);
            assert_eq!(shape[[0, 0]], 0.0);
        }
    }

    #[test]
    fn test_corner_actuators_are_inactive() {
        let pupil = Pupil::annulus(40, 4.0, 0.0);
        let active = active_actuators(&pupil, 9);
        assert!(!active.contains(&(0, 0)));
        assert!(!active.contains(&(8, 8)));
        assert!(active.contains(&(4, 0)));
        assert!(active.len() < 81);
    }

    #[test]
    fn test_obstructed_centre_actuator_is_inactive() {
        let pupil = Pupil::annulus(40, 4.2, 1.2);
        let active = active_actuators(&pupil, 9);
        assert!(!active.contains(&(4, 4)));
    }
}
