//! Matrix-vector reconstruction with one control matrix per mirror
//!
//! Each mirror's control matrix is the truncated-SVD pseudo-inverse of its
//! own interaction matrix. At run time the slopes of the mirror's sensor are
//! multiplied through it and integrated into the command vector.
//!
//! When some subapertures report no signal, the matching interaction-matrix
//! rows are deleted and a pseudo-inverse of the reduced matrix is used for
//! that step instead. Reduced inverses are kept per validity mask, so a set of
//! dead subapertures costs one SVD rather than one per step.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use ao_math::{truncated_pseudo_inverse, PseudoInverse, PseudoInverseError};

use crate::dm::DeformableMirror;
use crate::wfs::SlopeVector;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconstructorError {
    #[error("DM {dm} has no interaction matrix")]
    MissingInteractionMatrix { dm: u32 },

    #[error("DM {dm}: {source}")]
    PseudoInverse {
        dm: u32,
        #[source]
        source: PseudoInverseError,
    },

    #[error("DM {dm} expects {expected} slopes, got {actual}")]
    SlopeLength { dm: u32, expected: usize, actual: usize },
}

/// Reduced inverses kept per mirror before the cache is cleared
const MAX_REDUCED: usize = 16;

/// Control matrix of one mirror
#[derive(Debug, Clone)]
pub struct ControlMatrix {
    pub dm: u32,
    pub inverse: PseudoInverse,
    conditioning: f64,
    /// Pseudo-inverses with rows deleted, keyed by slope validity
    reduced: HashMap<Vec<bool>, PseudoInverse>,
}

impl ControlMatrix {
    /// Actuators × slopes
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.inverse.matrix
    }
}

/// Recovered degradation of one mirror's reconstruction in one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowDeletion {
    pub dm: u32,
    /// Interaction-matrix rows removed for missing slopes
    pub rows: usize,
    /// Modes discarded by the reduced pseudo-inverse
    pub discarded: usize,
}

/// New commands for every mirror
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub commands: Vec<DVector<f64>>,
    pub row_deletions: Vec<RowDeletion>,
}

/// `MVM_SeparateDMs` reconstructor
#[derive(Debug, Clone)]
pub struct Reconstructor {
    control: Vec<ControlMatrix>,
}

impl Reconstructor {
    /// Invert every mirror's interaction matrix.
    pub fn build(dms: &[DeformableMirror]) -> Result<Self, ReconstructorError> {
        let mut control = Vec::with_capacity(dms.len());
        for dm in dms {
            let imat = dm
                .interaction_matrix()
                .ok_or(ReconstructorError::MissingInteractionMatrix { dm: dm.id() })?;
            let inverse = truncated_pseudo_inverse(imat, dm.conditioning())
                .map_err(|source| ReconstructorError::PseudoInverse { dm: dm.id(), source })?;
            if inverse.discarded > 0 {
                log::info!(
                    "DM {}: {} of {} modes below {} x sigma_max ({:.3e}) excluded",
                    dm.id(),
                    inverse.discarded,
                    inverse.singular_values.len(),
                    dm.conditioning(),
                    inverse.max_singular_value()
                );
            }
            control.push(ControlMatrix {
                dm: dm.id(),
                inverse,
                conditioning: dm.conditioning(),
                reduced: HashMap::new(),
            });
        }
        Ok(Self { control })
    }

    pub fn control_matrices(&self) -> &[ControlMatrix] {
        &self.control
    }

    /// Modes excluded from each control matrix, in mirror order
    pub fn discarded_modes(&self) -> Vec<usize> {
        self.control.iter().map(|c| c.inverse.discarded).collect()
    }

    /// Number of cached reduced inverses, in mirror order
    pub fn cached_reductions(&self) -> Vec<usize> {
        self.control.iter().map(|c| c.reduced.len()).collect()
    }

    /// Correction for one mirror from its sensor's slopes
    fn correction(
        &mut self,
        index: usize,
        dm: &DeformableMirror,
        slopes: &SlopeVector,
    ) -> Result<(DVector<f64>, Option<RowDeletion>), ReconstructorError> {
        let control = &mut self.control[index];
        let expected = control.matrix().ncols();
        if slopes.len() != expected {
            return Err(ReconstructorError::SlopeLength {
                dm: dm.id(),
                expected,
                actual: slopes.len(),
            });
        }

        if slopes.all_valid() {
            return Ok((control.matrix() * slopes.to_dvector(), None));
        }

        let rows = slopes.valid_indices();
        let deleted = slopes.len() - rows.len();
        if rows.is_empty() {
            return Ok((
                DVector::zeros(dm.n_actuators()),
                Some(RowDeletion {
                    dm: dm.id(),
                    rows: deleted,
                    discarded: dm.n_actuators(),
                }),
            ));
        }

        if !control.reduced.contains_key(&slopes.valid) {
            let imat = dm
                .interaction_matrix()
                .ok_or(ReconstructorError::MissingInteractionMatrix { dm: dm.id() })?;
            let reduced = imat.select_rows(rows.iter());
            let inverse = truncated_pseudo_inverse(&reduced, control.conditioning)
                .map_err(|source| ReconstructorError::PseudoInverse { dm: dm.id(), source })?;
            if control.reduced.len() >= MAX_REDUCED {
                control.reduced.clear();
            }
            control.reduced.insert(slopes.valid.clone(), inverse);
        }
        let inverse = control
            .reduced
            .get(&slopes.valid)
            .ok_or(ReconstructorError::MissingInteractionMatrix { dm: dm.id() })?;

        let valid = DVector::from_iterator(rows.len(), rows.iter().map(|&i| slopes.values[i]));
        Ok((
            &inverse.matrix * valid,
            Some(RowDeletion {
                dm: dm.id(),
                rows: deleted,
                discarded: inverse.discarded,
            }),
        ))
    }

    /// New command vectors for every mirror.
    ///
    /// `slopes` is indexed by sensor; each mirror reads its own sensor's
    /// entry. Closed-loop mirrors integrate, `c + g × correction`; open-loop
    /// mirrors follow `(1 - g) × c + g × correction`.
    pub fn reconstruct(
        &mut self,
        dms: &[DeformableMirror],
        slopes: &[SlopeVector],
    ) -> Result<Reconstruction, ReconstructorError> {
        let mut commands = Vec::with_capacity(dms.len());
        let mut row_deletions = Vec::new();
        for (index, dm) in dms.iter().enumerate() {
            let (correction, deletion) = self.correction(index, dm, &slopes[dm.wfs_index()])?;
            if let Some(deletion) = deletion {
                row_deletions.push(deletion);
            }
            let gain = dm.gain();
            let new = if dm.is_closed_loop() {
                dm.commands() + correction * gain
            } else {
                dm.commands() * (1.0 - gain) + correction * gain
            };
            commands.push(new);
        }
        Ok(Reconstruction {
            commands,
            row_deletions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DmConfig, DmType, ReconstructorConfig, ReconstructorType};
    use crate::pupil::Pupil;
    use approx::assert_relative_eq;

    fn tip_tilt(closed: bool, imat: DMatrix<f64>) -> DeformableMirror {
        let config = DmConfig {
            dm_type: DmType::TipTilt,
            nx_actuators: 2,
            wfs: 0,
            imat_value: 1.0,
            gain: Some(0.5),
            svd_conditioning: None,
            closed,
        };
        let recon = ReconstructorConfig {
            recon_type: ReconstructorType::MvmSeparateDms,
            svd_conditioning: 0.03,
            gain: 0.6,
        };
        let mut dm = DeformableMirror::new(0, &config, &recon, &Pupil::annulus(8, 1.0, 0.0), 0);
        dm.set_interaction_matrix(imat).unwrap();
        dm
    }

    /// Three subapertures seeing a pure x/y tilt response
    fn imat() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            6,
            2,
            &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
        )
    }

    #[test]
    fn test_closed_loop_integrates() {
        let dm = tip_tilt(true, imat());
        let mut recon = Reconstructor::build(std::slice::from_ref(&dm)).unwrap();
        let slopes = SlopeVector {
            values: vec![0.2, 0.2, 0.2, -0.4, -0.4, -0.4],
            valid: vec![true; 6],
        };
        let out = recon.reconstruct(&[dm], &[slopes]).unwrap();
        assert_relative_eq!(out.commands[0][0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(out.commands[0][1], -0.2, epsilon = 1e-12);
        assert!(out.row_deletions.is_empty());
    }

    #[test]
    fn test_open_loop_leaks_old_commands() {
        let mut dm = tip_tilt(false, imat());
        dm.apply(&DVector::from_vec(vec![1.0, 1.0])).unwrap();
        let mut recon = Reconstructor::build(std::slice::from_ref(&dm)).unwrap();
        let out = recon.reconstruct(&[dm], &[SlopeVector::zeros(3)]).unwrap();
        assert_relative_eq!(out.commands[0][0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_slopes_delete_rows() {
        let dm = tip_tilt(true, imat());
        let mut recon = Reconstructor::build(std::slice::from_ref(&dm)).unwrap();
        let mut slopes = SlopeVector::from_subaps(&[Some((0.2, -0.4)), Some((0.2, -0.4)), None]);
        slopes.values[2] = 99.0;
        slopes.valid[2] = false;
        let out = recon.reconstruct(&[dm], &[slopes]).unwrap();
        assert_relative_eq!(out.commands[0][0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(out.commands[0][1], -0.2, epsilon = 1e-12);
        assert_eq!(out.row_deletions, vec![RowDeletion { dm: 0, rows: 2, discarded: 0 }]);
    }

    #[test]
    fn test_reduced_inverse_is_reused() {
        let dm = tip_tilt(true, imat());
        let mut recon = Reconstructor::build(std::slice::from_ref(&dm)).unwrap();
        let dead_last = SlopeVector::from_subaps(&[Some((0.2, -0.4)), Some((0.2, -0.4)), None]);
        let dead_first = SlopeVector::from_subaps(&[None, Some((0.2, -0.4)), Some((0.2, -0.4))]);
        let dms = std::slice::from_ref(&dm);

        let first = recon.reconstruct(dms, std::slice::from_ref(&dead_last)).unwrap();
        let again = recon.reconstruct(dms, std::slice::from_ref(&dead_last)).unwrap();
        assert_eq!(recon.cached_reductions(), vec![1]);
        assert_eq!(first.commands, again.commands);
        assert_eq!(first.row_deletions, again.row_deletions);

        recon.reconstruct(dms, &[dead_first]).unwrap();
        assert_eq!(recon.cached_reductions(), vec![2]);
        recon.reconstruct(dms, &[SlopeVector::zeros(3)]).unwrap();
        assert_eq!(recon.cached_reductions(), vec![2]);
    }

    #[test]
    fn test_no_signal_anywhere_gives_zero_correction() {
        let dm = tip_tilt(true, imat());
        let mut recon = Reconstructor::build(std::slice::from_ref(&dm)).unwrap();
        let slopes = SlopeVector::from_subaps(&[None, None, None]);
        let out = recon.reconstruct(&[dm], &[slopes]).unwrap();
        assert_eq!(out.commands[0], DVector::zeros(2));
    }

    #[test]
    fn test_degenerate_mode_is_truncated() {
        // Second actuator is barely sensed
        let mut m = imat();
        for r in 3..6 {
            m[(r, 1)] = 1e-4;
        }
        let dm = tip_tilt(true, m);
        let recon = Reconstructor::build(std::slice::from_ref(&dm)).unwrap();
        assert_eq!(recon.discarded_modes(), vec![1]);
    }

    #[test]
    fn test_missing_interaction_matrix_is_an_error() {
        let config = DmConfig {
            dm_type: DmType::TipTilt,
            nx_actuators: 2,
            wfs: 0,
            imat_value: 1.0,
            gain: None,
            svd_conditioning: None,
            closed: true,
        };
        let recon = ReconstructorConfig {
            recon_type: ReconstructorType::MvmSeparateDms,
            svd_conditioning: 0.03,
            gain: 0.6,
        };
        let dm = DeformableMirror::new(4, &config, &recon, &Pupil::annulus(8, 1.0, 0.0), 0);
        let err = Reconstructor::build(&[dm]).unwrap_err();
        assert_eq!(err, ReconstructorError::MissingInteractionMatrix { dm: 4 });
    }
}
