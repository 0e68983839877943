//! Laser guide star uplink
//!
//! The beacon's own image is the far-field pattern of the laser launched
//! through the turbulence. It is computed on a launch grid chosen so that one
//! FFT pixel equals one fine (pre-binning) pixel of the sensor, then every
//! subaperture spot is convolved with it.

use ndarray::Array2;
use rustfft::num_complex::Complex64;

use ao_math::{angular_spectrum, fft2, fftshift, PropagationError};

use crate::atmosphere::Layer;
use crate::config::{LgsConfig, PropagationMode, ASEC2RAD};
use crate::line_of_sight::radians_per_nm;
use crate::pupil::{annulus_mask, centred_coords, Pupil};

/// Uplink beam model for one laser guide star
#[derive(Debug, Clone)]
pub struct UplinkModel {
    mode: PropagationMode,
    wavelength: f64,
    /// Beacon altitude in metres
    height: f64,
    /// Pointing in arcseconds
    position: [f64; 2],
    precompensated: bool,
    /// Launch grid size, equal to the sensor's FFT size
    n: usize,
    /// Launch grid spacing in metres
    spacing: f64,
    launch_mask: Array2<f64>,
}

impl UplinkModel {
    /// # Arguments
    /// * `lgs` - Launch configuration
    /// * `position` - Beacon position in arcseconds
    /// * `gs_height` - Sensor guide star altitude, used when `lgs.height` is 0
    /// * `n` - Sensor FFT size
    /// * `fine_pixel` - Sensor fine pixel in radians
    pub fn new(lgs: &LgsConfig, position: [f64; 2], gs_height: f64, n: usize, fine_pixel: f64) -> Self {
        let spacing = lgs.wavelength / (n as f64 * fine_pixel);
        let extent = spacing * n as f64;
        if lgs.pupil_diam > extent {
            log::warn!(
                "Launch aperture {:.3} m exceeds the {:.3} m uplink grid; the beam is truncated",
                lgs.pupil_diam,
                extent
            );
        }
        let height = if lgs.height > 0.0 { lgs.height } else { gs_height };

        Self {
            mode: lgs.propagation_mode,
            wavelength: lgs.wavelength,
            height,
            position,
            precompensated: lgs.precompensated,
            n,
            spacing,
            launch_mask: annulus_mask(n, spacing, lgs.pupil_diam, lgs.obs_diam),
        }
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn grid_spacing(&self) -> f64 {
        self.spacing
    }

    /// Layers below the beacon, lowest first
    fn crossed_layers<'a>(&self, layers: &'a [Layer]) -> Vec<&'a Layer> {
        let mut crossed: Vec<&Layer> = layers.iter().filter(|l| l.height < self.height).collect();
        crossed.sort_by(|a, b| a.height.total_cmp(&b.height));
        crossed
    }

    /// Phase in nm of one layer over the launch grid
    fn layer_phase(&self, layer: &Layer) -> Array2<f64> {
        let centre = [
            layer.height * self.position[0] * ASEC2RAD,
            layer.height * self.position[1] * ASEC2RAD,
        ];
        Array2::from_shape_fn((self.n, self.n), |(r, c)| {
            let (x, y) = centred_coords(self.n, self.spacing, r, c);
            layer.phase_at(centre[0] + x, centre[1] + y)
        })
    }

    /// Tip-tilt of the mirror correction applied across the launch aperture, in nm
    fn launch_correction(&self, correction: &Array2<f64>, pupil: &Pupil) -> Array2<f64> {
        let (tip, tilt) = pupil_tilt(correction, pupil);
        Array2::from_shape_fn((self.n, self.n), |(r, c)| {
            let (x, y) = centred_coords(self.n, self.spacing, r, c);
            tip * x + tilt * y
        })
    }

    /// Beacon intensity on the sensor's fine pixel grid, centred at `n / 2` and
    /// normalized to unit sum.
    ///
    /// `correction` is the total mirror surface; it is only used when the
    /// launch is precompensated, in which case its full-pupil tip-tilt is
    /// taken out of the outgoing beam.
    pub fn psf(
        &self,
        layers: &[Layer],
        correction: Option<&Array2<f64>>,
        pupil: &Pupil,
    ) -> Result<Array2<f64>, PropagationError> {
        let k = radians_per_nm(self.wavelength);
        let precomp = match correction {
            Some(c) if self.precompensated => Some(self.launch_correction(c, pupil)),
            _ => None,
        };

        let mut field = self.launch_mask.mapv(|m| Complex64::new(m, 0.0));
        if let Some(precomp) = &precomp {
            field.zip_mut_with(precomp, |f, &p| *f *= Complex64::from_polar(1.0, -k * p));
        }

        let crossed = self.crossed_layers(layers);
        match self.mode {
            PropagationMode::Geometric => {
                for layer in crossed {
                    let phase = self.layer_phase(layer);
                    field.zip_mut_with(&phase, |f, &p| *f *= Complex64::from_polar(1.0, k * p));
                }
            }
            PropagationMode::Physical => {
                let mut altitude = 0.0;
                for layer in crossed {
                    field = angular_spectrum(&field, self.wavelength, self.spacing, layer.height - altitude)?;
                    let phase = self.layer_phase(layer);
                    field.zip_mut_with(&phase, |f, &p| *f *= Complex64::from_polar(1.0, k * p));
                    altitude = layer.height;
                }
            }
        }

        let far_field = fftshift(&fft2(&field).mapv(|v| v.norm_sqr()));
        let bad = far_field.iter().filter(|v| !v.is_finite()).count();
        if bad > 0 {
            return Err(PropagationError::NonFinite { count: bad });
        }
        let total = far_field.sum();
        if total <= 0.0 {
            return Err(PropagationError::InvalidParameter {
                name: "launch aperture flux",
                value: total,
            });
        }
        Ok(far_field / total)
    }
}

/// Least-squares gradient of `surface` over the illuminated pupil, in nm per
/// metre along `(x, y)`
fn pupil_tilt(surface: &Array2<f64>, pupil: &Pupil) -> (f64, f64) {
    let mut n = 0.0;
    let (mut sx, mut sy, mut sz) = (0.0, 0.0, 0.0);
    for ((r, c), &m) in pupil.mask.indexed_iter() {
        if m > 0.0 {
            let (x, y) = pupil.coords(r, c);
            n += 1.0;
            sx += x;
            sy += y;
            sz += surface[[r, c]];
        }
    }
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let (mx, my, mz) = (sx / n, sy / n, sz / n);

    let (mut xx, mut yy, mut xy, mut xz, mut yz) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for ((r, c), &m) in pupil.mask.indexed_iter() {
        if m > 0.0 {
            let (x, y) = pupil.coords(r, c);
            let (dx, dy, dz) = (x - mx, y - my, surface[[r, c]] - mz);
            xx += dx * dx;
            yy += dy * dy;
            xy += dx * dy;
            xz += dx * dz;
            yz += dy * dz;
        }
    }
    let det = xx * yy - xy * xy;
    if det.abs() <= f64::EPSILON * xx * yy {
        return (0.0, 0.0);
    }
    ((xz * yy - yz * xy) / det, (yz * xx - xz * xy) / det)
}

/// Width in fine pixels of the diffraction core of a launch aperture, for logging
pub fn diffraction_width_pixels(lgs: &LgsConfig, fine_pixel: f64) -> f64 {
    lgs.wavelength / lgs.pupil_diam / fine_pixel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::AtmosphereModel;
    use crate::config::AtmosphereConfig;
    use approx::assert_relative_eq;

    fn peak(psf: &Array2<f64>) -> (usize, usize) {
        let mut best = ((0, 0), f64::MIN);
        for (index, &v) in psf.indexed_iter() {
            if v > best.1 {
                best = (index, v);
            }
        }
        best.0
    }

    /// Masked surface tilted by `arcsec` along x, in nm
    fn tilted_surface(pupil: &Pupil, arcsec: f64) -> Array2<f64> {
        Array2::from_shape_fn((pupil.size, pupil.size), |(r, c)| {
            let (x, _) = pupil.coords(r, c);
            pupil.mask[[r, c]] * arcsec * ASEC2RAD * x * 1e9
        })
    }

    fn lgs(mode: PropagationMode) -> LgsConfig {
        LgsConfig {
            propagation_mode: mode,
            uplink: true,
            pupil_diam: 0.3,
            obs_diam: 0.0,
            wavelength: 600e-9,
            height: 0.0,
            precompensated: false,
        }
    }

    fn turbulence() -> Vec<Layer> {
        let config = AtmosphereConfig {
            scrn_no: 2,
            scrn_heights: vec![0.0, 8000.0],
            scrn_strengths: vec![0.6, 0.4],
            wind_dirs: vec![0.0, 0.0],
            wind_speeds: vec![0.0, 0.0],
            whole_scrn_size: 128,
            r0: 0.1,
            outer_scale: 25.0,
            random_seed: None,
        };
        let mut atmos = AtmosphereModel::new(&config, 0.05, 0.01);
        atmos.initialize(Some(21)).unwrap();
        atmos.snapshot().unwrap().layers.to_vec()
    }

    #[test]
    fn test_grid_matches_fine_pixel() {
        let fine = 0.2 * ASEC2RAD;
        let model = UplinkModel::new(&lgs(PropagationMode::Geometric), [0.0, 0.0], 90_000.0, 32, fine);
        assert_relative_eq!(model.grid_spacing() * 32.0 * fine, 600e-9, max_relative = 1e-12);
        assert_eq!(model.height(), 90_000.0);
    }

    #[test]
    fn test_vacuum_psf_is_centred_and_normalized() {
        let pupil = Pupil::annulus(16, 4.0, 0.0);
        let model = UplinkModel::new(&lgs(PropagationMode::Geometric), [0.0, 0.0], 90_000.0, 32, 0.2 * ASEC2RAD);
        let psf = model.psf(&[], None, &pupil).unwrap();
        assert_relative_eq!(psf.sum(), 1.0, epsilon = 1e-12);
        let peak = psf.iter().copied().fold(0.0, f64::max);
        assert_eq!(psf[[16, 16]], peak);
    }

    #[test]
    fn test_turbulence_broadens_beacon() {
        let pupil = Pupil::annulus(16, 4.0, 0.0);
        let layers = turbulence();
        for mode in [PropagationMode::Geometric, PropagationMode::Physical] {
            let model = UplinkModel::new(&lgs(mode), [0.0, 0.0], 90_000.0, 32, 0.2 * ASEC2RAD);
            let vacuum = model.psf(&[], None, &pupil).unwrap();
            let seen = model.psf(&layers, None, &pupil).unwrap();
            assert_relative_eq!(seen.sum(), 1.0, epsilon = 1e-9);
            assert!(seen[[16, 16]] < vacuum[[16, 16]]);
        }
    }

    #[test]
    fn test_layers_above_beacon_are_ignored() {
        let pupil = Pupil::annulus(16, 4.0, 0.0);
        let layers: Vec<Layer> = turbulence().into_iter().filter(|l| l.height > 0.0).collect();
        let model = UplinkModel::new(&lgs(PropagationMode::Geometric), [0.0, 0.0], 5_000.0, 32, 0.2 * ASEC2RAD);
        let vacuum = model.psf(&[], None, &pupil).unwrap();
        assert_eq!(model.psf(&layers, None, &pupil).unwrap(), vacuum);
    }

    #[test]
    fn test_pupil_tilt_fits_masked_ramp() {
        let pupil = Pupil::annulus(32, 4.2, 1.2);
        let (tip, tilt) = pupil_tilt(&tilted_surface(&pupil, 0.5), &pupil);
        assert_relative_eq!(tip, 0.5 * ASEC2RAD * 1e9, max_relative = 1e-9);
        assert!(tilt.abs() < 1e-6);
    }

    #[test]
    fn test_precompensation_steers_beacon() {
        // The launch sits inside the central obstruction, where the surface is zero
        let pupil = Pupil::annulus(32, 4.2, 1.2);
        let surface = tilted_surface(&pupil, 0.2);
        let fine = 0.2 * ASEC2RAD;

        let mut config = lgs(PropagationMode::Geometric);
        let plain = UplinkModel::new(&config, [0.0, 0.0], 90_000.0, 32, fine);
        config.precompensated = true;
        let steered = UplinkModel::new(&config, [0.0, 0.0], 90_000.0, 32, fine);

        let vacuum = plain.psf(&[], None, &pupil).unwrap();
        assert_eq!(plain.psf(&[], Some(&surface), &pupil).unwrap(), vacuum);

        let moved = steered.psf(&[], Some(&surface), &pupil).unwrap();
        assert_relative_eq!(moved.sum(), 1.0, epsilon = 1e-12);
        let (row, col) = peak(&moved);
        assert_eq!(row, 16);
        assert_eq!((col as i64 - 16).abs(), 1);
    }
}
