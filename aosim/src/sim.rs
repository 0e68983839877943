//! Closed-loop driver
//!
//! A [`Simulation`] owns every component built from one configuration and
//! advances them in lock-step. Each iteration:
//!
//! 1. the atmosphere moves by one loop time,
//! 2. every sensor measures through the turbulence and the mirrors it sees
//!    (closed-loop mirrors only; the laser launch sees all mirrors),
//! 3. the reconstructor turns slopes into new commands,
//! 4. the commands are applied,
//! 5. every science camera images the residual after the updated mirrors.
//!
//! Sensors and cameras are independent within a step and run in parallel.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::Array2;
use rayon::prelude::*;

use crate::atmosphere::{AtmosphereModel, StrengthNormalization};
use crate::calibration::{self, MatrixKind};
use crate::config::{self, ConfigError, SimulationConfig};
use crate::dm::DeformableMirror;
use crate::error::{ComponentId, SimError};
use crate::pupil::Pupil;
use crate::reconstructor::{Reconstructor, ReconstructorError};
use crate::recorder::Recorder;
use crate::report::{IterationSummary, RunReport};
use crate::science::ScienceCamera;
use crate::wfs::{MeasureInput, SlopeVector, WavefrontSensor};

/// Run-time overrides of the configuration
#[derive(Debug, Clone, Default)]
pub struct SimulationOptions {
    /// Replaces `nIters`
    pub iterations: Option<usize>,
    /// Replaces `Atmosphere.randomSeed`; also seeds detector noise
    pub seed: Option<u64>,
    /// Root under which the run directory is created; nothing is saved when `None`
    pub output_root: Option<PathBuf>,
    /// Directory holding `imat_dm<id>.json` files to use instead of measuring
    pub interaction_matrices: Option<PathBuf>,
    /// Layer strength policy; strengths are scaled to sum to one when `None`
    pub normalization: Option<Arc<dyn StrengthNormalization>>,
}

/// Values carried from one iteration to the next
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    /// Iterations completed
    pub iteration: usize,
    /// Last slopes of every sensor
    pub slopes: Vec<SlopeVector>,
    /// Last beacon image of every sensor with an uplink
    pub uplink_psfs: Vec<Option<Array2<f64>>>,
    /// Last instantaneous Strehl of every camera
    pub strehl: Vec<f64>,
}

fn noise_seed(base: u64, iteration: usize, sensor: usize) -> u64 {
    base.wrapping_add((iteration as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(sensor as u64)
}

/// Summed surface of `dms` in nm, `None` when there are none
fn surface_sum<'a>(dms: impl Iterator<Item = &'a DeformableMirror>, size: usize) -> Option<Array2<f64>> {
    let mut total: Option<Array2<f64>> = None;
    for dm in dms {
        total
            .get_or_insert_with(|| Array2::zeros((size, size)))
            .zip_mut_with(dm.shape(), |t, s| *t += s);
    }
    total
}

fn reconstructor_component(err: &ReconstructorError) -> ComponentId {
    match err {
        ReconstructorError::MissingInteractionMatrix { dm }
        | ReconstructorError::PseudoInverse { dm, .. }
        | ReconstructorError::SlopeLength { dm, .. } => ComponentId::Dm(*dm),
    }
}

pub struct Simulation {
    config: SimulationConfig,
    options: SimulationOptions,
    pupil: Pupil,
    atmosphere: AtmosphereModel,
    wfss: Vec<WavefrontSensor>,
    dms: Vec<DeformableMirror>,
    science: Vec<ScienceCamera>,
    reconstructor: Option<Reconstructor>,
    state: LoopState,
    noise_seed: u64,
    report: RunReport,
    recorder: Option<Recorder>,
}

impl Simulation {
    /// Build every component and draw the turbulence.
    pub fn new(config: SimulationConfig, options: SimulationOptions) -> Result<Self, SimError> {
        config::validate(&config)?;
        let pupil = Pupil::from_config(&config.telescope, config.pupil_size);
        log::info!(
            "{}: {} m pupil on {} px ({:.4} m/px), {} sensors, {} mirrors, {} cameras",
            config.sim_name,
            config.telescope.tel_diam,
            config.pupil_size,
            config.pixel_scale(),
            config.n_gs,
            config.n_dm,
            config.n_sci
        );

        let seed = options.seed.or(config.atmosphere.random_seed);
        let mut atmosphere =
            AtmosphereModel::new(&config.atmosphere, config.pixel_scale(), config.loop_time);
        if let Some(normalization) = &options.normalization {
            log::info!("Layer strengths normalized by {:?}", normalization);
            atmosphere = atmosphere.with_normalization(Arc::clone(normalization));
        }
        atmosphere.initialize(seed)?;
        let noise_seed = match seed {
            Some(s) => s ^ 0x5DEE_CE66_D1CE_5EED,
            None => rand::random(),
        };

        let wfss = config
            .wfs
            .iter()
            .map(|(&id, c)| WavefrontSensor::new(id, c, &pupil, config.loop_time))
            .collect();

        let indices = config.dm_wfs_indices().ok_or_else(|| ConfigError::Invalid {
            field: "DM".to_string(),
            reason: "references an undefined WFS".to_string(),
        })?;
        let dms = config
            .dm
            .iter()
            .zip(indices)
            .map(|((&id, c), wfs_index)| {
                DeformableMirror::new(id, c, &config.reconstructor, &pupil, wfs_index)
            })
            .collect();

        let science = config
            .science
            .iter()
            .map(|(&id, c)| ScienceCamera::new(id, c, &pupil))
            .collect();

        let recorder = match &options.output_root {
            Some(root) => Some(Recorder::create(root, &config)?),
            None => None,
        };

        Ok(Self {
            report: RunReport::new(&config.sim_name),
            config,
            options,
            pupil,
            atmosphere,
            wfss,
            dms,
            science,
            reconstructor: None,
            state: LoopState::default(),
            noise_seed,
            recorder,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn pupil(&self) -> &Pupil {
        &self.pupil
    }

    pub fn atmosphere(&self) -> &AtmosphereModel {
        &self.atmosphere
    }

    pub fn wavefront_sensors(&self) -> &[WavefrontSensor] {
        &self.wfss
    }

    pub fn mirrors(&self) -> &[DeformableMirror] {
        &self.dms
    }

    pub fn science_cameras(&self) -> &[ScienceCamera] {
        &self.science
    }

    pub fn reconstructor(&self) -> Option<&Reconstructor> {
        self.reconstructor.as_ref()
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Run directory, when outputs are saved
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.recorder.as_ref().map(|r| r.dir().to_path_buf())
    }

    /// Measure (or load) every interaction matrix and build the control matrices.
    pub fn calibrate(&mut self) -> Result<(), SimError> {
        for dm in self.dms.iter_mut() {
            let id = dm.id();
            let wfs = &self.wfss[dm.wfs_index()];
            let imat = match &self.options.interaction_matrices {
                Some(dir) => calibration::load_interaction_matrix(dir, dm, wfs.n_slopes())
                    .map_err(|source| SimError::Calibration {
                        component: ComponentId::Dm(id),
                        source,
                    })?,
                None => calibration::measure_interaction_matrix(dm, wfs, &self.pupil),
            };
            log::info!(
                "DM {}: {}x{} interaction matrix against WFS {}",
                id,
                imat.nrows(),
                imat.ncols(),
                wfs.id()
            );
            if let Some(recorder) = &self.recorder {
                recorder.save_matrix(id, MatrixKind::Interaction, &imat)?;
            }
            dm.set_interaction_matrix(imat)
                .map_err(|source| SimError::Calibration {
                    component: ComponentId::Dm(id),
                    source: source.into(),
                })?;
        }

        let reconstructor = Reconstructor::build(&self.dms).map_err(|source| SimError::Calibration {
            component: reconstructor_component(&source),
            source: source.into(),
        })?;

        self.report.truncated_modes = self
            .dms
            .iter()
            .map(|dm| dm.id())
            .zip(reconstructor.discarded_modes())
            .collect();
        if let Some(recorder) = &self.recorder {
            for control in reconstructor.control_matrices() {
                recorder.save_matrix(control.dm, MatrixKind::Control, control.matrix())?;
            }
        }
        self.reconstructor = Some(reconstructor);
        Ok(())
    }

    /// Advance the loop by one iteration.
    pub fn step(&mut self) -> Result<IterationSummary, SimError> {
        let reconstructor = self.reconstructor.as_mut().ok_or(SimError::NotCalibrated)?;
        let iteration = self.state.iteration;
        let pupil = &self.pupil;

        self.atmosphere.step()?;
        let layers = self.atmosphere.snapshot()?.layers;

        let closed = surface_sum(self.dms.iter().filter(|d| d.is_closed_loop()), pupil.size);
        let launch = surface_sum(self.dms.iter(), pupil.size);
        let base_seed = self.noise_seed;
        let measurements = self
            .wfss
            .par_iter()
            .enumerate()
            .map(|(index, wfs)| {
                let input = MeasureInput {
                    layers,
                    correction: closed.as_ref(),
                    launch_correction: launch.as_ref(),
                    noise_seed: noise_seed(base_seed, iteration, index),
                };
                wfs.measure(pupil, input).map_err(|source| SimError::Propagation {
                    iteration,
                    component: ComponentId::Wfs(wfs.id()),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let (slopes, uplink_psfs): (Vec<_>, Vec<_>) =
            measurements.into_iter().map(|m| (m.slopes, m.uplink_psf)).unzip();

        let mut no_signal = 0;
        for (wfs, s) in self.wfss.iter().zip(&slopes) {
            let missing = s.n_no_signal();
            if missing > 0 {
                log::debug!(
                    "Iteration {}: WFS {} has {} of {} subapertures without signal",
                    iteration,
                    wfs.id(),
                    missing,
                    s.n_subaps()
                );
            }
            no_signal += missing;
        }

        let reconstruction = reconstructor
            .reconstruct(&self.dms, &slopes)
            .map_err(|source| SimError::Reconstruction {
                iteration,
                component: reconstructor_component(&source),
                source,
            })?;
        for deletion in &reconstruction.row_deletions {
            log::debug!(
                "Iteration {}: DM {} reconstructed without {} slope rows, {} modes discarded",
                iteration,
                deletion.dm,
                deletion.rows,
                deletion.discarded
            );
        }
        for (dm, commands) in self.dms.iter_mut().zip(&reconstruction.commands) {
            let id = dm.id();
            dm.apply(commands).map_err(|source| SimError::Mirror {
                iteration,
                component: ComponentId::Dm(id),
                source,
            })?;
        }

        let correction = surface_sum(self.dms.iter(), pupil.size);
        let strehl: Vec<f64> = self
            .science
            .par_iter_mut()
            .map(|camera| camera.capture(pupil, layers, correction.as_ref()).strehl)
            .collect();

        if let Some(recorder) = &mut self.recorder {
            recorder.record_iteration(
                slopes.iter().map(|s| s.values.as_slice()),
                self.dms.iter().map(|d| d.commands().as_slice()),
            );
            for (wfs, psf) in self.wfss.iter().zip(&uplink_psfs) {
                if let Some(psf) = psf {
                    recorder.record_lgs_psf(wfs.id(), psf);
                }
            }
        }

        let summary = IterationSummary {
            iteration,
            slope_rms: slopes.iter().map(SlopeVector::rms).collect(),
            strehl: strehl.clone(),
            no_signal_subaps: no_signal,
            row_deletions: reconstruction.row_deletions.len(),
        };
        let wfs_ids: Vec<u32> = self.wfss.iter().map(|w| w.id()).collect();
        let science_ids: Vec<u32> = self.science.iter().map(|c| c.id()).collect();
        self.report.record(&summary, &wfs_ids, &science_ids);

        self.state = LoopState {
            iteration: iteration + 1,
            slopes,
            uplink_psfs,
            strehl,
        };
        Ok(summary)
    }

    /// Calibrate if needed, run every iteration and write the outputs.
    pub fn run(&mut self) -> Result<RunReport, SimError> {
        if self.reconstructor.is_none() {
            self.calibrate()?;
        }
        let iterations = self.options.iterations.unwrap_or(self.config.n_iters);
        log::info!("{}: running {} iterations", self.config.sim_name, iterations);

        let progress = (iterations / 10).max(1);
        for _ in 0..iterations {
            let summary = self.step()?;
            if (summary.iteration + 1) % progress == 0 {
                log::info!(
                    "Iteration {}/{}: slope RMS {:?}, Strehl {:?}",
                    summary.iteration + 1,
                    iterations,
                    summary.slope_rms,
                    summary.strehl
                );
            }
        }
        self.finish()
    }

    /// Fill in the end-of-run figures and write the saved outputs.
    pub fn finish(&mut self) -> Result<RunReport, SimError> {
        self.report.simulated_time = self.atmosphere.elapsed();
        for camera in &self.science {
            self.report
                .long_exposure_strehl
                .insert(camera.id(), camera.long_exposure_strehl());
            self.report.mean_strehl.insert(camera.id(), camera.mean_strehl());
        }

        if let Some(recorder) = &mut self.recorder {
            self.report.output_dir = Some(recorder.dir().to_path_buf());
            let images: Vec<(u32, Array2<f64>)> = self
                .science
                .iter()
                .map(|c| (c.id(), c.long_exposure_image()))
                .collect();
            recorder.finish(&images, &self.report)?;
        }
        Ok(self.report.clone())
    }
}
