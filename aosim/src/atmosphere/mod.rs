//! Multi-layer frozen-flow turbulence
//!
//! The model owns one periodic phase screen per configured layer. Screens are
//! drawn once by [`AtmosphereModel::initialize`] and then translated by the
//! layer wind on every [`AtmosphereModel::step`]; the only way to restart the
//! sequence is to initialize again.
//!
//! ```text
//!   Uninitialized --initialize--> Initialized --step--> Stepping --step--> ...
//!         ^                            |                    |
//!         +-------- (re)initialize ----+--------------------+
//! ```
//!
//! Screen values are optical path differences in nm.

pub mod screen;
pub mod strength;

use std::sync::Arc;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use ao_math::sample_periodic;

use crate::config::AtmosphereConfig;
pub use strength::{AsGiven, StrengthNormalization, SumToOne};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AtmosphereError {
    #[error("atmosphere used before initialize()")]
    NotInitialized,

    #[error("invalid screen grid: {size} pixels at {pixel_scale} m/pixel")]
    InvalidGrid { size: usize, pixel_scale: f64 },
}

/// Lifecycle of the turbulence sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtmosphereState {
    Uninitialized,
    Initialized,
    Stepping,
}

/// One turbulence layer and its accumulated wind translation
#[derive(Debug, Clone)]
pub struct Layer {
    /// Altitude in metres
    pub height: f64,
    /// Periodic screen in nm
    pub screen: Array2<f64>,
    /// Accumulated translation in pixels, `[row, col]`
    pub offset: [f64; 2],
    /// Translation per step in pixels, `[row, col]`
    pub velocity: [f64; 2],
    pixel_scale: f64,
}

impl Layer {
    /// Phase in nm at `(x, y)` metres from the screen centre, after translation.
    pub fn phase_at(&self, x: f64, y: f64) -> f64 {
        let (rows, cols) = self.screen.dim();
        let row = rows as f64 / 2.0 + y / self.pixel_scale - self.offset[0];
        let col = cols as f64 / 2.0 + x / self.pixel_scale - self.offset[1];
        sample_periodic(&self.screen, row, col)
    }

    pub fn pixel_scale(&self) -> f64 {
        self.pixel_scale
    }
}

/// Read-only view of every layer at the current time step
#[derive(Debug, Clone, Copy)]
pub struct AtmosphereSnapshot<'a> {
    pub layers: &'a [Layer],
    pub step: usize,
}

/// Frozen-flow atmosphere driven by [`AtmosphereConfig`]
pub struct AtmosphereModel {
    config: AtmosphereConfig,
    pixel_scale: f64,
    loop_time: f64,
    normalization: Arc<dyn StrengthNormalization>,
    layers: Vec<Layer>,
    state: AtmosphereState,
    steps: usize,
}

impl AtmosphereModel {
    /// Create an uninitialized model with sum-to-one strength normalization.
    pub fn new(config: &AtmosphereConfig, pixel_scale: f64, loop_time: f64) -> Self {
        Self {
            config: config.clone(),
            pixel_scale,
            loop_time,
            normalization: Arc::new(SumToOne),
            layers: Vec::new(),
            state: AtmosphereState::Uninitialized,
            steps: 0,
        }
    }

    /// Replace the strength normalization policy. Takes effect on the next initialize.
    pub fn with_normalization(mut self, normalization: Arc<dyn StrengthNormalization>) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn state(&self) -> AtmosphereState {
        self.state
    }

    /// Number of steps taken since initialization
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Elapsed simulated time in seconds
    pub fn elapsed(&self) -> f64 {
        self.steps as f64 * self.loop_time
    }

    /// Draw every screen and reset the translation.
    ///
    /// `seed` of `None` draws from entropy.
    pub fn initialize(&mut self, seed: Option<u64>) -> Result<(), AtmosphereError> {
        let size = self.config.whole_scrn_size;
        if size == 0 || !(self.pixel_scale.is_finite() && self.pixel_scale > 0.0) {
            return Err(AtmosphereError::InvalidGrid {
                size,
                pixel_scale: self.pixel_scale,
            });
        }

        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let weights = self.normalization.weights(&self.config.scrn_strengths);
        let mut layers = Vec::with_capacity(self.config.scrn_no);
        for i in 0..self.config.scrn_no {
            let mut phase = match strength::layer_r0(self.config.r0, weights[i]) {
                Some(r0) => screen::phase_screen(
                    size,
                    self.pixel_scale,
                    r0,
                    self.config.outer_scale,
                    &mut rng,
                ),
                None => Array2::zeros((size, size)),
            };
            screen::radians_to_nm(&mut phase);

            let shift = self.config.wind_speeds[i] * self.loop_time / self.pixel_scale;
            let dir = self.config.wind_dirs[i].to_radians();
            log::debug!(
                "Layer {} at {} m: weight {:.3}, {:.3} px/step towards {}°",
                i,
                self.config.scrn_heights[i],
                weights[i],
                shift,
                self.config.wind_dirs[i]
            );

            layers.push(Layer {
                height: self.config.scrn_heights[i],
                screen: phase,
                offset: [0.0, 0.0],
                velocity: [shift * dir.sin(), shift * dir.cos()],
                pixel_scale: self.pixel_scale,
            });
        }

        self.layers = layers;
        self.steps = 0;
        self.state = AtmosphereState::Initialized;
        Ok(())
    }

    /// Advance every layer by one loop time and return the new snapshot.
    pub fn step(&mut self) -> Result<AtmosphereSnapshot<'_>, AtmosphereError> {
        if self.state == AtmosphereState::Uninitialized {
            return Err(AtmosphereError::NotInitialized);
        }
        for layer in &mut self.layers {
            layer.offset[0] += layer.velocity[0];
            layer.offset[1] += layer.velocity[1];
        }
        self.steps += 1;
        self.state = AtmosphereState::Stepping;
        self.snapshot()
    }

    /// Current layers without advancing time.
    pub fn snapshot(&self) -> Result<AtmosphereSnapshot<'_>, AtmosphereError> {
        if self.state == AtmosphereState::Uninitialized {
            return Err(AtmosphereError::NotInitialized);
        }
        Ok(AtmosphereSnapshot {
            layers: &self.layers,
            step: self.steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> AtmosphereConfig {
        AtmosphereConfig {
            scrn_no: 2,
            scrn_heights: vec![0.0, 5000.0],
            scrn_strengths: vec![0.5, 0.5],
            wind_dirs: vec![0.0, 90.0],
            wind_speeds: vec![10.0, 20.0],
            whole_scrn_size: 64,
            r0: 0.16,
            outer_scale: 25.0,
            random_seed: None,
        }
    }

    #[test]
    fn test_step_before_initialize_fails() {
        let mut atmos = AtmosphereModel::new(&config(), 0.05, 0.01);
        assert_eq!(atmos.state(), AtmosphereState::Uninitialized);
        assert_eq!(atmos.step().unwrap_err(), AtmosphereError::NotInitialized);
    }

    #[test]
    fn test_wind_translation_per_step() {
        let mut atmos = AtmosphereModel::new(&config(), 0.05, 0.01);
        atmos.initialize(Some(1)).unwrap();
        assert_eq!(atmos.state(), AtmosphereState::Initialized);
        atmos.step().unwrap();
        let snap = atmos.step().unwrap();

        assert_eq!(snap.step, 2);
        // 10 m/s * 0.01 s / 0.05 m = 2 px per step along x
        assert_relative_eq!(snap.layers[0].offset[1], 4.0, epsilon = 1e-12);
        assert_relative_eq!(snap.layers[0].offset[0], 0.0, epsilon = 1e-12);
        // 90 degrees moves along y
        assert_relative_eq!(snap.layers[1].offset[0], 8.0, epsilon = 1e-12);
        assert_relative_eq!(atmos.elapsed(), 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_translation_moves_screen_content() {
        let mut atmos = AtmosphereModel::new(&config(), 0.05, 0.01);
        atmos.initialize(Some(5)).unwrap();
        let before = atmos.snapshot().unwrap().layers[0].phase_at(0.0, 0.0);
        let snap = atmos.step().unwrap();
        // Content now seen 2 px (0.1 m) downwind
        assert_relative_eq!(snap.layers[0].phase_at(0.1, 0.0), before, epsilon = 1e-9);
    }

    #[test]
    fn test_reinitialize_restarts_sequence() {
        let mut atmos = AtmosphereModel::new(&config(), 0.05, 0.01);
        atmos.initialize(Some(9)).unwrap();
        let first = atmos.snapshot().unwrap().layers[1].screen.clone();
        atmos.step().unwrap();
        atmos.initialize(Some(9)).unwrap();
        let snap = atmos.snapshot().unwrap();
        assert_eq!(snap.step, 0);
        assert_eq!(snap.layers[1].screen, first);
        assert_eq!(snap.layers[1].offset, [0.0, 0.0]);
    }

    #[test]
    fn test_zero_strength_layer_is_flat() {
        let mut cfg = config();
        cfg.scrn_strengths = vec![1.0, 0.0];
        let mut atmos = AtmosphereModel::new(&cfg, 0.05, 0.01);
        atmos.initialize(Some(2)).unwrap();
        let snap = atmos.snapshot().unwrap();
        assert!(snap.layers[1].screen.iter().all(|&v| v == 0.0));
        assert!(snap.layers[0].screen.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_normalization_is_pluggable() {
        let mut cfg = config();
        cfg.scrn_strengths = vec![0.25, 0.25];
        let var = |model: AtmosphereModel| {
            let mut model = model;
            model.initialize(Some(4)).unwrap();
            let s = &model.snapshot().unwrap().layers[0].screen;
            s.mapv(|v| v * v).mean().unwrap_or(0.0)
        };
        let normalized = var(AtmosphereModel::new(&cfg, 0.05, 0.01));
        let raw = var(AtmosphereModel::new(&cfg, 0.05, 0.01).with_normalization(Arc::new(AsGiven)));
        // Sum-to-one doubles each weight relative to the raw 0.25
        assert_relative_eq!(normalized / raw, 2.0, max_relative = 1e-9);
    }
}
