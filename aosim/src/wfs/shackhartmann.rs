//! Shack-Hartmann sensor
//!
//! Each used subaperture's pupil field is resampled so that its FFT lands on
//! a fine pixel grid `fftOversamp` times finer than the detector, padded,
//! transformed, optionally convolved with the beacon image, binned to the
//! detector and centroided.
//!
//! Sampling: with subaperture diameter `d` and field of view `FOV`, the
//! subaperture is resampled to `m = round(d × FOV / λ)` points and padded to
//! `pxlsPerSubap × fftOversamp`. The oversampling is raised when the padded
//! size would be smaller than `m`.

use std::f64::consts::PI;

use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};
use rustfft::num_complex::Complex64;

use ao_math::{bin_image, convolve_fft, fft2, fftshift, zoom};

use super::centroid::thresholded_centroid;
use super::geometry::SubapGrid;
use super::slopes::SlopeVector;
use crate::config::{WfsConfig, ASEC2RAD};
use crate::pupil::Pupil;

/// Photons per second per square metre from a magnitude-zero guide star
pub const PHOTON_ZERO_POINT: f64 = 1e10;

/// Photon and read noise applied to detector frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorNoise {
    /// Photons collected by a fully illuminated subaperture per frame
    pub photons_per_subap: f64,
    pub photon_noise: bool,
    /// Read noise in electrons RMS
    pub read_noise: f64,
}

impl DetectorNoise {
    pub fn from_config(config: &WfsConfig, subap_diameter: f64, loop_time: f64) -> Option<Self> {
        if !config.photon_noise && config.e_read_noise <= 0.0 {
            return None;
        }
        let photons = PHOTON_ZERO_POINT
            * 10f64.powf(-0.4 * config.gs_mag)
            * loop_time
            * subap_diameter
            * subap_diameter;
        Some(Self {
            photons_per_subap: photons,
            photon_noise: config.photon_noise,
            read_noise: config.e_read_noise,
        })
    }

    /// Scale a unit-flux frame to photo-electrons and add noise.
    fn apply<R: Rng>(&self, image: &mut Array2<f64>, rng: &mut R) {
        image.mapv_inplace(|v| v * self.photons_per_subap);
        if self.photon_noise {
            image.mapv_inplace(|v| match Poisson::new(v) {
                Ok(dist) => dist.sample(rng),
                Err(_) => 0.0,
            });
        }
        if let Ok(read) = Normal::new(0.0, self.read_noise) {
            if self.read_noise > 0.0 {
                image.mapv_inplace(|v| v + read.sample(rng));
            }
        }
    }
}

/// Shack-Hartmann optics and detector
#[derive(Debug, Clone)]
pub struct ShackHartmann {
    grid: SubapGrid,
    pxls: usize,
    oversamp: usize,
    npad: usize,
    fov_samples: usize,
    pixel_arcsec: f64,
    cent_threshold: f64,
    tilt_fix: Array2<Complex64>,
    reference: Option<Vec<f64>>,
    noise: Option<DetectorNoise>,
}

impl ShackHartmann {
    pub fn new(config: &WfsConfig, pupil: &Pupil, loop_time: f64) -> Self {
        let grid = SubapGrid::new(pupil, config.nx_subaps, config.subap_threshold);
        let subap_diameter = pupil.pixel_scale * grid.pixels as f64;
        let fov_rad = config.subap_fov * ASEC2RAD;
        let fov_samples = ((subap_diameter * fov_rad / config.wavelength).round() as usize).max(1);

        let pxls = config.pxls_per_subap;
        let mut oversamp = config.fft_oversamp;
        if pxls * oversamp < fov_samples {
            let raised = fov_samples.div_ceil(pxls);
            log::warn!(
                "FFT size {} smaller than {} field samples; raising fftOversamp from {} to {}",
                pxls * oversamp,
                fov_samples,
                oversamp,
                raised
            );
            oversamp = raised;
        }
        let npad = pxls * oversamp;

        // Shift every spot by half a fine pixel so it sits between the
        // central detector pixels.
        let tilt_fix = Array2::from_shape_fn((fov_samples, fov_samples), |(r, c)| {
            Complex64::from_polar(1.0, -PI * (r + c) as f64 / npad as f64)
        });

        let mut sensor = Self {
            grid,
            pxls,
            oversamp,
            npad,
            fov_samples,
            pixel_arcsec: config.subap_fov / pxls as f64,
            cent_threshold: config.cent_threshold,
            tilt_fix,
            reference: None,
            noise: DetectorNoise::from_config(config, subap_diameter, loop_time),
        };

        let flat = pupil.mask.mapv(|m| Complex64::new(m, 0.0));
        let reference = sensor.centroid(&sensor.detector_image(&flat, None, None));
        log::debug!(
            "Shack-Hartmann: {} of {} subapertures used, {} samples per subaperture, FFT size {}, reference rms {:.2e}\"",
            sensor.grid.n_active(),
            sensor.grid.nx * sensor.grid.nx,
            fov_samples,
            npad,
            reference.rms()
        );
        sensor.reference = Some(reference.values);
        sensor
    }

    pub fn grid(&self) -> &SubapGrid {
        &self.grid
    }

    /// Detector side length in pixels
    pub fn detector_size(&self) -> usize {
        self.grid.nx * self.pxls
    }

    pub fn fft_size(&self) -> usize {
        self.npad
    }

    pub fn oversamp(&self) -> usize {
        self.oversamp
    }

    pub fn fov_samples(&self) -> usize {
        self.fov_samples
    }

    /// Fine (pre-binning) pixel in radians
    pub fn fine_pixel(&self) -> f64 {
        self.pixel_arcsec * ASEC2RAD / self.oversamp as f64
    }

    pub fn has_noise(&self) -> bool {
        self.noise.is_some()
    }

    /// Spot of one subaperture on the fine pixel grid, with unit flux scaled by
    /// the subaperture's illuminated fraction.
    fn fine_spot(&self, field: &Array2<Complex64>, row: usize, col: usize) -> Array2<f64> {
        let block = self.grid.block(field, row, col);
        let intensity = block.iter().map(|v| v.norm_sqr()).sum::<f64>() / block.len() as f64;

        let m = self.fov_samples;
        let resampled = if block.dim() == (m, m) {
            block.to_owned()
        } else {
            let re = zoom(&block.mapv(|v| v.re), (m, m));
            let im = zoom(&block.mapv(|v| v.im), (m, m));
            let mut out = Array2::from_elem((m, m), Complex64::new(0.0, 0.0));
            ndarray::Zip::from(&mut out)
                .and(&re)
                .and(&im)
                .for_each(|o, &r, &i| *o = Complex64::new(r, i));
            out
        };

        let mut padded = Array2::from_elem((self.npad, self.npad), Complex64::new(0.0, 0.0));
        let mut window = padded.slice_mut(s![..m, ..m]);
        window.assign(&resampled);
        window.zip_mut_with(&self.tilt_fix, |v, t| *v *= *t);

        let spot = fftshift(&fft2(&padded).mapv(|v| v.norm_sqr()));
        let total = spot.sum();
        if total > 0.0 {
            spot * (intensity / total)
        } else {
            spot
        }
    }

    /// Detector frame of `nxSubaps × pxlsPerSubap` pixels per side.
    ///
    /// # Arguments
    /// * `field` - Masked pupil field at the sensing wavelength
    /// * `beacon` - Optional uplink image on the fine grid, centred and unit-sum
    /// * `rng` - Noise source; noise is only added when one is given and noise is configured
    pub fn detector_image(
        &self,
        field: &Array2<Complex64>,
        beacon: Option<&Array2<f64>>,
        rng: Option<&mut StdRng>,
    ) -> Array2<f64> {
        let size = self.detector_size();
        let mut image = Array2::<f64>::zeros((size, size));
        let p = self.pxls;
        for &(row, col) in &self.grid.active {
            let mut spot = self.fine_spot(field, row, col);
            if let Some(beacon) = beacon {
                spot = convolve_fft(&spot, beacon);
            }
            let binned = bin_image(&spot, self.oversamp);
            image
                .slice_mut(s![row * p..(row + 1) * p, col * p..(col + 1) * p])
                .assign(&binned);
        }
        if let (Some(noise), Some(rng)) = (self.noise, rng) {
            noise.apply(&mut image, rng);
        }
        image
    }

    /// Slopes in arcseconds from a detector frame, relative to the flat-wavefront reference.
    ///
    /// Subapertures whose flux is below `centThreshold` of the brightest one,
    /// or whose window is empty after thresholding, are flagged as no signal.
    pub fn centroid(&self, image: &Array2<f64>) -> SlopeVector {
        let p = self.pxls;
        let windows: Vec<_> = self
            .grid
            .active
            .iter()
            .map(|&(row, col)| image.slice(s![row * p..(row + 1) * p, col * p..(col + 1) * p]))
            .collect();
        let fluxes: Vec<f64> = windows.iter().map(|w| w.sum()).collect();
        let brightest = fluxes.iter().copied().fold(0.0, f64::max);

        let measurements: Vec<Option<(f64, f64)>> = windows
            .iter()
            .zip(&fluxes)
            .map(|(window, &flux)| {
                if brightest <= 0.0 || flux < self.cent_threshold * brightest {
                    return None;
                }
                thresholded_centroid(*window, self.cent_threshold)
                    .map(|c| (c.x * self.pixel_arcsec, c.y * self.pixel_arcsec))
            })
            .collect();

        let mut slopes = SlopeVector::from_subaps(&measurements);
        if let Some(reference) = &self.reference {
            slopes.subtract(reference);
        }
        slopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PropagationMode, WfsType};
    use crate::line_of_sight::phase_to_field;
    use rand::SeedableRng;

    fn wfs_config() -> WfsConfig {
        WfsConfig {
            wfs_type: WfsType::ShackHartmann,
            gs_position: [0.0, 0.0],
            gs_height: 0.0,
            gs_mag: 8.0,
            nx_subaps: 8,
            pxls_per_subap: 10,
            subap_fov: 5.0,
            wavelength: 600e-9,
            remove_tt: false,
            cent_threshold: 0.3,
            fft_oversamp: 3,
            propagation_mode: PropagationMode::Geometric,
            subap_threshold: 0.5,
            photon_noise: false,
            e_read_noise: 0.0,
            lgs: None,
        }
    }

    fn tilted_field(pupil: &Pupil, arcsec: f64) -> Array2<Complex64> {
        let phase = Array2::from_shape_fn((pupil.size, pupil.size), |(r, c)| {
            pupil.coords(r, c).0 * arcsec * ASEC2RAD * 1e9
        });
        phase_to_field(&phase, &pupil.mask, 600e-9)
    }

    #[test]
    fn test_detector_is_80_by_80() {
        let pupil = Pupil::annulus(64, 4.2, 1.2);
        let sh = ShackHartmann::new(&wfs_config(), &pupil, 0.0025);
        let image = sh.detector_image(&tilted_field(&pupil, 0.0), None, None);
        assert_eq!(image.dim(), (80, 80));
        assert_eq!(sh.detector_size(), 80);
    }

    #[test]
    fn test_flat_wavefront_gives_zero_slopes() {
        let pupil = Pupil::annulus(64, 4.2, 1.2);
        let sh = ShackHartmann::new(&wfs_config(), &pupil, 0.0025);
        let slopes = sh.centroid(&sh.detector_image(&tilted_field(&pupil, 0.0), None, None));
        assert!(slopes.all_valid());
        assert!(slopes.values.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_tilt_moves_spots_along_x() {
        let pupil = Pupil::annulus(64, 4.2, 1.2);
        let sh = ShackHartmann::new(&wfs_config(), &pupil, 0.0025);
        let slopes = sh.centroid(&sh.detector_image(&tilted_field(&pupil, 0.3), None, None));
        let (tip, tilt) = slopes.mean_tip_tilt();
        assert!(tip > 0.1, "tip {tip}");
        assert!(tilt.abs() < 0.05 * tip, "tilt {tilt}");
    }

    #[test]
    fn test_oversampling_raised_for_wide_field() {
        let mut config = wfs_config();
        config.fft_oversamp = 1;
        let pupil = Pupil::annulus(64, 4.2, 1.2);
        let sh = ShackHartmann::new(&config, &pupil, 0.0025);
        assert!(sh.fft_size() >= sh.fov_samples());
        assert_eq!(sh.fft_size() % 10, 0);
    }

    #[test]
    fn test_noise_is_reproducible_per_seed() {
        let mut config = wfs_config();
        config.photon_noise = true;
        config.e_read_noise = 1.0;
        let pupil = Pupil::annulus(64, 4.2, 1.2);
        let sh = ShackHartmann::new(&config, &pupil, 0.0025);
        let field = tilted_field(&pupil, 0.0);
        let a = sh.detector_image(&field, None, Some(&mut StdRng::seed_from_u64(3)));
        let b = sh.detector_image(&field, None, Some(&mut StdRng::seed_from_u64(3)));
        let clean = sh.detector_image(&field, None, None);
        assert_eq!(a, b);
        assert!(a.sum() > clean.sum() * 100.0);
    }
}
