//! Light paths from a source through the turbulence to the pupil
//!
//! Two models are provided. The geometric model samples every layer along
//! the line of sight and sums the optical path. The physical model carries a
//! complex field from the highest layer down to the pupil, applying each
//! layer's phase and Fresnel-propagating between layers on a grid padded to
//! twice the pupil size.
//!
//! For a source at finite range `H` the footprint on a layer at height `h`
//! shrinks by `1 - h / H` (cone effect); layers at or above the source do not
//! contribute.

use std::f64::consts::PI;

use ndarray::{s, Array2};
use rustfft::num_complex::Complex64;

use ao_math::{angular_spectrum, PropagationError};

use crate::atmosphere::Layer;
use crate::config::{PropagationMode, ASEC2RAD};
use crate::pupil::{centred_coords, Pupil};

/// Where a line of sight points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Direction {
    /// Angular position in arcseconds, `[x, y]`
    pub position: [f64; 2],
    /// Source altitude in metres, 0 for infinity
    pub height: f64,
}

impl Direction {
    pub fn on_axis() -> Self {
        Self {
            position: [0.0, 0.0],
            height: 0.0,
        }
    }

    /// Footprint scale and centre on a layer, `None` when the layer is not crossed
    fn footprint(&self, layer_height: f64) -> Option<(f64, [f64; 2])> {
        let scale = if self.height > 0.0 {
            1.0 - layer_height / self.height
        } else {
            1.0
        };
        if scale <= 0.0 {
            return None;
        }
        let centre = [
            layer_height * self.position[0] * ASEC2RAD,
            layer_height * self.position[1] * ASEC2RAD,
        ];
        Some((scale, centre))
    }
}

/// Radians of phase per nm of optical path at `wavelength` metres
pub fn radians_per_nm(wavelength: f64) -> f64 {
    2.0 * PI * 1e-9 / wavelength
}

/// Sum of every crossed layer over an `n × n` grid of spacing `spacing` metres.
fn summed_phase(layers: &[Layer], direction: Direction, n: usize, spacing: f64) -> Array2<f64> {
    let mut phase = Array2::<f64>::zeros((n, n));
    for layer in layers {
        let Some((scale, centre)) = direction.footprint(layer.height) else {
            continue;
        };
        for ((r, c), value) in phase.indexed_iter_mut() {
            let (x, y) = centred_coords(n, spacing, r, c);
            *value += layer.phase_at(centre[0] + x * scale, centre[1] + y * scale);
        }
    }
    phase
}

/// Geometric optical path over the pupil in nm (not masked).
pub fn geometric_phase(pupil: &Pupil, layers: &[Layer], direction: Direction) -> Array2<f64> {
    summed_phase(layers, direction, pupil.size, pupil.pixel_scale)
}

/// Masked complex field `mask × exp(i k φ)` for a phase map in nm.
pub fn phase_to_field(phase_nm: &Array2<f64>, mask: &Array2<f64>, wavelength: f64) -> Array2<Complex64> {
    let k = radians_per_nm(wavelength);
    let mut field = Array2::from_elem(phase_nm.dim(), Complex64::new(0.0, 0.0));
    ndarray::Zip::from(&mut field)
        .and(phase_nm)
        .and(mask)
        .for_each(|f, &p, &m| *f = Complex64::from_polar(m, k * p));
    field
}

/// Field at the pupil after diffraction through the layers.
///
/// The returned field is unmasked.
pub fn physical_field(
    pupil: &Pupil,
    layers: &[Layer],
    direction: Direction,
    wavelength: f64,
) -> Result<Array2<Complex64>, PropagationError> {
    let n = pupil.size;
    let padded = 2 * n;
    let k = radians_per_nm(wavelength);

    let mut crossed: Vec<&Layer> = layers
        .iter()
        .filter(|layer| direction.footprint(layer.height).is_some())
        .collect();
    crossed.sort_by(|a, b| b.height.total_cmp(&a.height));

    let mut field = Array2::from_elem((padded, padded), Complex64::new(1.0, 0.0));
    for (i, layer) in crossed.iter().enumerate() {
        let phase = summed_phase(
            std::slice::from_ref(*layer),
            direction,
            padded,
            pupil.pixel_scale,
        );
        ndarray::Zip::from(&mut field)
            .and(&phase)
            .for_each(|f, &p| *f *= Complex64::from_polar(1.0, k * p));

        let next_height = crossed.get(i + 1).map_or(0.0, |l| l.height);
        field = angular_spectrum(&field, wavelength, pupil.pixel_scale, layer.height - next_height)?;
    }

    let start = (padded - n) / 2;
    Ok(field.slice(s![start..start + n, start..start + n]).to_owned())
}

/// Masked pupil field seen along `direction`, with `correction` (nm) removed.
pub fn corrected_field(
    pupil: &Pupil,
    layers: &[Layer],
    direction: Direction,
    mode: PropagationMode,
    wavelength: f64,
    correction: Option<&Array2<f64>>,
) -> Result<Array2<Complex64>, PropagationError> {
    match mode {
        PropagationMode::Geometric => {
            let mut phase = geometric_phase(pupil, layers, direction);
            if let Some(correction) = correction {
                phase -= correction;
            }
            Ok(phase_to_field(&phase, &pupil.mask, wavelength))
        }
        PropagationMode::Physical => {
            let mut field = physical_field(pupil, layers, direction, wavelength)?;
            let correction_phase = match correction {
                Some(c) => c.mapv(|v| -v),
                None => Array2::zeros((pupil.size, pupil.size)),
            };
            let screen = phase_to_field(&correction_phase, &pupil.mask, wavelength);
            field.zip_mut_with(&screen, |f, s| *f *= *s);
            Ok(field)
        }
    }
}
