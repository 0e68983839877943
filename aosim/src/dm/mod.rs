//! Deformable mirrors
//!
//! A mirror is a fixed set of influence functions on the pupil grid plus the
//! current command vector. Its surface is `Σ c_i × IF_i` in nm of optical
//! path, which the simulation subtracts from the incoming wavefront.
//!
//! Tip-tilt mirrors have two actuators (x and y tilt, unit = `iMatValue`
//! arcseconds). Piezo mirrors have one actuator per grid point whose
//! influence meaningfully overlaps the pupil.

pub mod influence;

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use thiserror::Error;

use crate::config::{DmConfig, DmType, ReconstructorConfig};
use crate::pupil::Pupil;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DmError {
    #[error("expected {expected} actuator commands, got {actual}")]
    CommandLength { expected: usize, actual: usize },

    #[error("command vector contains non-finite values")]
    NonFinite,
}

/// One deformable mirror and its current state
#[derive(Debug, Clone)]
pub struct DeformableMirror {
    id: u32,
    dm_type: DmType,
    wfs_index: usize,
    gain: f64,
    conditioning: f64,
    closed: bool,
    /// Grid position of each actuator, empty for tip-tilt
    actuators: Vec<(usize, usize)>,
    influence: Vec<Array2<f64>>,
    commands: DVector<f64>,
    shape: Array2<f64>,
    interaction: Option<DMatrix<f64>>,
}

impl DeformableMirror {
    /// Build a mirror on `pupil`.
    ///
    /// `wfs_index` is the resolved position of the driving sensor; gain and
    /// conditioning fall back to the reconstructor values when unset.
    pub fn new(
        id: u32,
        config: &DmConfig,
        recon: &ReconstructorConfig,
        pupil: &Pupil,
        wfs_index: usize,
    ) -> Self {
        let (actuators, influence) = match config.dm_type {
            DmType::TipTilt => (Vec::new(), influence::tip_tilt(pupil, config.imat_value)),
            DmType::Piezo => {
                let active = influence::active_actuators(pupil, config.nx_actuators);
                let shapes =
                    influence::piezo(pupil, config.nx_actuators, &active, config.imat_value);
                (active, shapes)
            }
        };
        log::info!(
            "DM {}: {:?} with {} active actuators, driven by WFS index {}",
            id,
            config.dm_type,
            influence.len(),
            wfs_index
        );

        let n = influence.len();
        Self {
            id,
            dm_type: config.dm_type,
            wfs_index,
            gain: config.gain.unwrap_or(recon.gain),
            conditioning: config.svd_conditioning.unwrap_or(recon.svd_conditioning),
            closed: config.closed,
            actuators,
            influence,
            commands: DVector::zeros(n),
            shape: Array2::zeros((pupil.size, pupil.size)),
            interaction: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn dm_type(&self) -> DmType {
        self.dm_type
    }

    /// Index of the sensor whose slopes drive this mirror
    pub fn wfs_index(&self) -> usize {
        self.wfs_index
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn conditioning(&self) -> f64 {
        self.conditioning
    }

    /// Whether the driving sensor sees this mirror's correction
    pub fn is_closed_loop(&self) -> bool {
        self.closed
    }

    pub fn n_actuators(&self) -> usize {
        self.influence.len()
    }

    /// Actuator grid positions (piezo only)
    pub fn actuator_positions(&self) -> &[(usize, usize)] {
        &self.actuators
    }

    pub fn commands(&self) -> &DVector<f64> {
        &self.commands
    }

    /// Current surface in nm
    pub fn shape(&self) -> &Array2<f64> {
        &self.shape
    }

    /// Surface produced by a unit command on actuator `index`
    pub fn influence_function(&self, index: usize) -> Option<&Array2<f64>> {
        self.influence.get(index)
    }

    /// Set the command vector and recompute the surface.
    pub fn apply(&mut self, commands: &DVector<f64>) -> Result<(), DmError> {
        if commands.len() != self.influence.len() {
            return Err(DmError::CommandLength {
                expected: self.influence.len(),
                actual: commands.len(),
            });
        }
        if commands.iter().any(|c| !c.is_finite()) {
            return Err(DmError::NonFinite);
        }

        self.shape.fill(0.0);
        for (c, shape) in commands.iter().zip(&self.influence) {
            if *c != 0.0 {
                self.shape.scaled_add(*c, shape);
            }
        }
        self.commands.copy_from(commands);
        Ok(())
    }

    /// Interaction matrix, if one has been measured or loaded
    pub fn interaction_matrix(&self) -> Option<&DMatrix<f64>> {
        self.interaction.as_ref()
    }

    /// Store the interaction matrix (`n_slopes × n_actuators`).
    pub fn set_interaction_matrix(&mut self, imat: DMatrix<f64>) -> Result<(), DmError> {
        if imat.ncols() != self.n_actuators() {
            return Err(DmError::CommandLength {
                expected: self.n_actuators(),
                actual: imat.ncols(),
            });
        }
        self.interaction = Some(imat);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconstructorType;
    use approx::assert_relative_eq;

    fn recon() -> ReconstructorConfig {
        ReconstructorConfig {
            recon_type: ReconstructorType::MvmSeparateDms,
            svd_conditioning: 0.05,
            gain: 0.4,
        }
    }

    fn dm_config(dm_type: DmType) -> DmConfig {
        DmConfig {
            dm_type,
            nx_actuators: 5,
            wfs: 0,
            imat_value: 2.0,
            gain: None,
            svd_conditioning: Some(0.03),
            closed: true,
        }
    }

    #[test]
    fn test_tip_tilt_has_two_actuators() {
        let pupil = Pupil::annulus(16, 4.0, 0.0);
        let dm = DeformableMirror::new(0, &dm_config(DmType::TipTilt), &recon(), &pupil, 0);
        assert_eq!(dm.n_actuators(), 2);
        assert!(dm.actuator_positions().is_empty());
    }

    #[test]
    fn test_fallbacks_to_reconstructor() {
        let pupil = Pupil::annulus(16, 4.0, 0.0);
        let dm = DeformableMirror::new(0, &dm_config(DmType::TipTilt), &recon(), &pupil, 0);
        assert_eq!(dm.gain(), 0.4);
        assert_eq!(dm.conditioning(), 0.03);
    }

    #[test]
    fn test_apply_is_linear_sum_of_influence() {
        let pupil = Pupil::annulus(24, 4.0, 0.0);
        let mut dm = DeformableMirror::new(1, &dm_config(DmType::Piezo), &recon(), &pupil, 0);
        let n = dm.n_actuators();
        let mut commands = DVector::zeros(n);
        commands[0] = 1.5;
        commands[n - 1] = -0.5;
        dm.apply(&commands).unwrap();

        let expected = dm.influence_function(0).unwrap() * 1.5
            + dm.influence_function(n - 1).unwrap() * -0.5;
        for (a, b) in dm.shape().iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
        assert_eq!(dm.commands(), &commands);
    }

    #[test]
    fn test_wrong_command_length_rejected() {
        let pupil = Pupil::annulus(16, 4.0, 0.0);
        let mut dm = DeformableMirror::new(0, &dm_config(DmType::TipTilt), &recon(), &pupil, 0);
        let err = dm.apply(&DVector::zeros(3)).unwrap_err();
        assert_eq!(err, DmError::CommandLength { expected: 2, actual: 3 });
        let err = dm.apply(&DVector::from_vec(vec![f64::NAN, 0.0])).unwrap_err();
        assert_eq!(err, DmError::NonFinite);
    }
}
