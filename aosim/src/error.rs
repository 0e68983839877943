//! Errors surfaced by a simulation run

use std::fmt;

use thiserror::Error;

use ao_math::PropagationError;

use crate::atmosphere::AtmosphereError;
use crate::calibration::CalibrationError;
use crate::config::ConfigError;
use crate::dm::DmError;
use crate::reconstructor::ReconstructorError;
use crate::recorder::RecorderError;

/// Component that raised a fatal error, identified by its configuration key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentId {
    Atmosphere,
    Wfs(u32),
    Dm(u32),
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentId::Atmosphere => write!(f, "atmosphere"),
            ComponentId::Wfs(id) => write!(f, "WFS {id}"),
            ComponentId::Dm(id) => write!(f, "DM {id}"),
        }
    }
}

/// Fatal simulation error
#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("atmosphere: {0}")]
    Atmosphere(#[from] AtmosphereError),

    #[error("iteration {iteration}, {component}: propagation failed: {source}")]
    Propagation {
        iteration: usize,
        component: ComponentId,
        #[source]
        source: PropagationError,
    },

    #[error("iteration {iteration}, {component}: {source}")]
    Reconstruction {
        iteration: usize,
        component: ComponentId,
        #[source]
        source: ReconstructorError,
    },

    #[error("iteration {iteration}, {component}: {source}")]
    Mirror {
        iteration: usize,
        component: ComponentId,
        #[source]
        source: DmError,
    },

    #[error("{component}: calibration failed: {source}")]
    Calibration {
        component: ComponentId,
        #[source]
        source: CalibrationError,
    },

    #[error("loop started before calibration")]
    NotCalibrated,

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

impl SimError {
    /// Loop iteration at which the error occurred, if it happened inside the loop
    pub fn iteration(&self) -> Option<usize> {
        match self {
            SimError::Propagation { iteration, .. }
            | SimError::Reconstruction { iteration, .. }
            | SimError::Mirror { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }

    /// Component that raised the error, if one is known
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            SimError::Propagation { component, .. }
            | SimError::Reconstruction { component, .. }
            | SimError::Mirror { component, .. }
            | SimError::Calibration { component, .. } => Some(*component),
            SimError::Atmosphere(_) => Some(ComponentId::Atmosphere),
            _ => None,
        }
    }
}
