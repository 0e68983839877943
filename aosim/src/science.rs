//! Science cameras
//!
//! A camera images the residual wavefront in its field direction and keeps a
//! running long-exposure image. Strehl ratios compare the peak of the
//! normalized PSF with the peak of the diffraction-limited PSF computed on the
//! same grid at construction.

use std::f64::consts::PI;

use ndarray::{s, Array2};
use rustfft::num_complex::Complex64;

use ao_math::{bin_image, fft2, fftshift, zoom};

use crate::atmosphere::Layer;
use crate::config::{ScienceConfig, ASEC2RAD};
use crate::line_of_sight::{geometric_phase, phase_to_field, Direction};
use crate::pupil::Pupil;

/// One science exposure
#[derive(Debug, Clone)]
pub struct Capture {
    /// `pxls × pxls` image, unit sum
    pub image: Array2<f64>,
    pub strehl: f64,
}

/// PSF camera for one field position
#[derive(Debug, Clone)]
pub struct ScienceCamera {
    id: u32,
    direction: Direction,
    wavelength: f64,
    pxls: usize,
    oversamp: usize,
    npad: usize,
    pupil_samples: usize,
    tilt_fix: Array2<Complex64>,
    /// Peak of the normalized diffraction-limited PSF on the fine grid
    perfect_peak: f64,
    long_exposure: Array2<f64>,
    frames: usize,
    strehl_sum: f64,
}

impl ScienceCamera {
    pub fn new(id: u32, config: &ScienceConfig, pupil: &Pupil) -> Self {
        let tel_diam = pupil.pixel_scale * pupil.size as f64;
        let fov_rad = config.fov * ASEC2RAD;
        let pupil_samples = ((tel_diam * fov_rad / config.wavelength).round() as usize).max(2);

        let mut oversamp = config.fft_oversamp;
        if config.pxls * oversamp < pupil_samples {
            let raised = pupil_samples.div_ceil(config.pxls);
            log::warn!(
                "Science {}: FFT size {} smaller than {} pupil samples; raising fftOversamp to {}",
                id,
                config.pxls * oversamp,
                pupil_samples,
                raised
            );
            oversamp = raised;
        }
        let npad = config.pxls * oversamp;
        let tilt_fix = Array2::from_shape_fn((pupil_samples, pupil_samples), |(r, c)| {
            Complex64::from_polar(1.0, -PI * (r + c) as f64 / npad as f64)
        });

        let mut camera = Self {
            id,
            direction: Direction {
                position: config.position,
                height: 0.0,
            },
            wavelength: config.wavelength,
            pxls: config.pxls,
            oversamp,
            npad,
            pupil_samples,
            tilt_fix,
            perfect_peak: 1.0,
            long_exposure: Array2::zeros((npad, npad)),
            frames: 0,
            strehl_sum: 0.0,
        };
        let perfect = camera.fine_psf(&phase_to_field(
            &Array2::zeros((pupil.size, pupil.size)),
            &pupil.mask,
            config.wavelength,
        ));
        camera.perfect_peak = perfect.iter().copied().fold(0.0, f64::max);
        log::debug!(
            "Science {}: {} pupil samples, FFT size {}, {:.4}\" pixels",
            id,
            pupil_samples,
            npad,
            config.fov / config.pxls as f64
        );
        camera
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Normalized PSF on the fine grid
    fn fine_psf(&self, field: &Array2<Complex64>) -> Array2<f64> {
        let m = self.pupil_samples;
        let re = zoom(&field.mapv(|v| v.re), (m, m));
        let im = zoom(&field.mapv(|v| v.im), (m, m));

        let mut padded = Array2::from_elem((self.npad, self.npad), Complex64::new(0.0, 0.0));
        {
            let mut window = padded.slice_mut(s![..m, ..m]);
            ndarray::Zip::from(&mut window)
                .and(&re)
                .and(&im)
                .and(&self.tilt_fix)
                .for_each(|w, &r, &i, &t| *w = Complex64::new(r, i) * t);
        }

        let psf = fftshift(&fft2(&padded).mapv(|v| v.norm_sqr()));
        let total = psf.sum();
        if total > 0.0 {
            psf / total
        } else {
            psf
        }
    }

    /// Image the residual of the turbulence after `correction` (nm).
    pub fn capture(&mut self, pupil: &Pupil, layers: &[Layer], correction: Option<&Array2<f64>>) -> Capture {
        let mut phase = geometric_phase(pupil, layers, self.direction);
        if let Some(correction) = correction {
            phase -= correction;
        }
        let fine = self.fine_psf(&phase_to_field(&phase, &pupil.mask, self.wavelength));

        let peak = fine.iter().copied().fold(0.0, f64::max);
        let strehl = if self.perfect_peak > 0.0 {
            peak / self.perfect_peak
        } else {
            0.0
        };

        self.long_exposure += &fine;
        self.frames += 1;
        self.strehl_sum += strehl;

        Capture {
            image: bin_image(&fine, self.oversamp),
            strehl,
        }
    }

    /// Accumulated image, `pxls × pxls` with unit sum; zeros before the first capture
    pub fn long_exposure_image(&self) -> Array2<f64> {
        if self.frames == 0 {
            return Array2::zeros((self.pxls, self.pxls));
        }
        bin_image(&self.long_exposure, self.oversamp) / self.frames as f64
    }

    /// Strehl ratio of the long-exposure image
    pub fn long_exposure_strehl(&self) -> f64 {
        if self.frames == 0 || self.perfect_peak <= 0.0 {
            return 0.0;
        }
        let peak = self.long_exposure.iter().copied().fold(0.0, f64::max) / self.frames as f64;
        peak / self.perfect_peak
    }

    /// Mean of the instantaneous Strehl ratios so far
    pub fn mean_strehl(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.strehl_sum / self.frames as f64
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }
}
