//! Wavefront sensors
//!
//! Every configured sensor is a [`WavefrontSensor`]: the sensing optics
//! ([`SensorModel`]) plus the pointing, the optional laser uplink and the
//! tip-tilt removal shared by all sensor types.
//!
//! A measurement never fails for lack of light. Subapertures without usable
//! signal are flagged in the returned [`SlopeVector`] and the caller works
//! with the remaining entries. Only numerical failures in physical
//! propagation are reported as errors.

pub mod centroid;
pub mod geometry;
pub mod gradient;
pub mod lgs;
pub mod shackhartmann;
pub mod slopes;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use ao_math::PropagationError;

use crate::atmosphere::Layer;
use crate::config::{PropagationMode, WfsConfig, WfsType};
use crate::line_of_sight::{corrected_field, geometric_phase, phase_to_field, Direction};
use crate::pupil::Pupil;

pub use gradient::GradientSensor;
pub use lgs::UplinkModel;
pub use shackhartmann::ShackHartmann;
pub use slopes::SlopeVector;

/// Sensing optics of one sensor
#[derive(Debug, Clone)]
pub enum SensorModel {
    ShackHartmann(ShackHartmann),
    Gradient(GradientSensor),
}

/// Inputs of one measurement, borrowed from the loop state
#[derive(Debug, Clone, Copy)]
pub struct MeasureInput<'a> {
    pub layers: &'a [Layer],
    /// Surface of the mirrors this sensor sees, in nm
    pub correction: Option<&'a Array2<f64>>,
    /// Surface of every mirror, for a precompensated launch
    pub launch_correction: Option<&'a Array2<f64>>,
    /// Seed of this measurement's detector noise
    pub noise_seed: u64,
}

/// Result of one measurement
#[derive(Debug, Clone)]
pub struct Measurement {
    pub slopes: SlopeVector,
    /// Beacon image on the fine pixel grid, when an uplink is simulated
    pub uplink_psf: Option<Array2<f64>>,
}

/// One configured wavefront sensor
#[derive(Debug, Clone)]
pub struct WavefrontSensor {
    id: u32,
    config: WfsConfig,
    direction: Direction,
    model: SensorModel,
    uplink: Option<UplinkModel>,
}

impl WavefrontSensor {
    pub fn new(id: u32, config: &WfsConfig, pupil: &Pupil, loop_time: f64) -> Self {
        let direction = Direction {
            position: config.gs_position,
            height: config.gs_height,
        };

        let model = match config.wfs_type {
            WfsType::ShackHartmann => SensorModel::ShackHartmann(ShackHartmann::new(config, pupil, loop_time)),
            WfsType::Gradient => {
                if config.propagation_mode == PropagationMode::Physical {
                    log::warn!("WFS {}: gradient sensors use geometric propagation", id);
                }
                SensorModel::Gradient(GradientSensor::new(config, pupil))
            }
        };

        if !config.is_lgs() && config.lgs.is_some() {
            log::debug!("WFS {}: natural guide star, lgs section ignored", id);
        }
        let uplink = match (config.uplink(), &model) {
            (Some(lgs), SensorModel::ShackHartmann(sh)) => {
                log::info!(
                    "WFS {}: {:?} uplink from a {} m launch, beacon core {:.2} fine pixels",
                    id,
                    lgs.propagation_mode,
                    lgs.pupil_diam,
                    lgs::diffraction_width_pixels(lgs, sh.fine_pixel())
                );
                Some(UplinkModel::new(
                    lgs,
                    config.gs_position,
                    config.gs_height,
                    sh.fft_size(),
                    sh.fine_pixel(),
                ))
            }
            (Some(_), SensorModel::Gradient(_)) => {
                log::warn!("WFS {}: gradient sensors have no spot image; uplink ignored", id);
                None
            }
            (None, _) => None,
        };

        Self {
            id,
            config: config.clone(),
            direction,
            model,
            uplink,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn config(&self) -> &WfsConfig {
        &self.config
    }

    pub fn model(&self) -> &SensorModel {
        &self.model
    }

    pub fn has_uplink(&self) -> bool {
        self.uplink.is_some()
    }

    pub fn n_subaps(&self) -> usize {
        match &self.model {
            SensorModel::ShackHartmann(sh) => sh.grid().n_active(),
            SensorModel::Gradient(g) => g.grid().n_active(),
        }
    }

    pub fn n_slopes(&self) -> usize {
        2 * self.n_subaps()
    }

    /// Detector side length, `None` for sensors without a detector
    pub fn detector_size(&self) -> Option<usize> {
        match &self.model {
            SensorModel::ShackHartmann(sh) => Some(sh.detector_size()),
            SensorModel::Gradient(_) => None,
        }
    }

    /// Measure slopes through the turbulence and mirror correction.
    pub fn measure(&self, pupil: &Pupil, input: MeasureInput<'_>) -> Result<Measurement, PropagationError> {
        let uplink_psf = match &self.uplink {
            Some(uplink) => Some(uplink.psf(input.layers, input.launch_correction, pupil)?),
            None => None,
        };

        let mut slopes = match &self.model {
            SensorModel::ShackHartmann(sh) => {
                let field = corrected_field(
                    pupil,
                    input.layers,
                    self.direction,
                    self.config.propagation_mode,
                    self.config.wavelength,
                    input.correction,
                )?;
                let mut rng = sh.has_noise().then(|| StdRng::seed_from_u64(input.noise_seed));
                let image = sh.detector_image(&field, uplink_psf.as_ref(), rng.as_mut());
                sh.centroid(&image)
            }
            SensorModel::Gradient(g) => {
                let mut phase = geometric_phase(pupil, input.layers, self.direction);
                if let Some(correction) = input.correction {
                    phase -= correction;
                }
                g.measure(&phase, &pupil.mask)
            }
        };

        if self.config.remove_tt {
            slopes.remove_tip_tilt();
        }
        Ok(Measurement { slopes, uplink_psf })
    }

    /// Noise-free response to a wavefront `phase` (nm) alone, for calibration.
    ///
    /// No turbulence and no uplink are involved.
    pub fn calibration_slopes(&self, pupil: &Pupil, phase: &Array2<f64>) -> SlopeVector {
        let mut slopes = match &self.model {
            SensorModel::ShackHartmann(sh) => {
                let field = phase_to_field(phase, &pupil.mask, self.config.wavelength);
                sh.centroid(&sh.detector_image(&field, None, None))
            }
            SensorModel::Gradient(g) => g.measure(phase, &pupil.mask),
        };
        if self.config.remove_tt {
            slopes.remove_tip_tilt();
        }
        slopes
    }
}
