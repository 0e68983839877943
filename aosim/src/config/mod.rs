//! Simulation configuration model
//!
//! Typed mirror of the YAML configuration document. Every section maps to one
//! struct; keys keep their on-disk spelling through explicit serde renames so
//! existing configuration files load unchanged.
//!
//! # Document layout
//!
//! ```text
//! simName, pupilSize, nGS, nDM, nSci, nIters, loopTime, verbosity, save*
//! Atmosphere:    per-layer turbulence description
//! Telescope:     aperture geometry
//! WFS:           { <id>: wavefront sensor, ... }
//! DM:            { <id>: deformable mirror, ... }
//! Reconstructor: control law
//! Science:       { <id>: science camera, ... }
//! ```
//!
//! Integer keys under `WFS`, `DM` and `Science` are stable identifiers. A DM
//! names the sensor that drives it through its `wfs` field; the loader checks
//! every such reference before a configuration is handed out.
//!
//! All configuration values are immutable once loaded.

pub mod loader;

pub use loader::{from_yaml_str, load, to_yaml_string, validate, ConfigError};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Arcseconds to radians
pub const ASEC2RAD: f64 = std::f64::consts::PI / (180.0 * 3600.0);

fn default_verbosity() -> u8 {
    2
}

fn default_cent_threshold() -> f64 {
    0.3
}

fn default_fft_oversamp() -> usize {
    2
}

fn default_subap_threshold() -> f64 {
    0.5
}

fn default_outer_scale() -> f64 {
    25.0
}

fn default_true() -> bool {
    true
}

/// Top-level simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Run identifier, also used as the output directory name
    #[serde(rename = "simName")]
    pub sim_name: String,
    /// Pupil diameter in phase pixels
    #[serde(rename = "pupilSize")]
    pub pupil_size: usize,
    /// Number of guide stars (must equal the number of WFS entries)
    #[serde(rename = "nGS")]
    pub n_gs: usize,
    /// Number of deformable mirrors (must equal the number of DM entries)
    #[serde(rename = "nDM")]
    pub n_dm: usize,
    /// Number of science channels (must equal the number of Science entries)
    #[serde(rename = "nSci")]
    pub n_sci: usize,
    /// Number of loop iterations to run
    #[serde(rename = "nIters")]
    pub n_iters: usize,
    /// Loop time step in seconds
    #[serde(rename = "loopTime")]
    pub loop_time: f64,
    /// Logging verbosity, 0 (errors only) to 3 (debug)
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    #[serde(rename = "saveCMat", default)]
    pub save_cmat: bool,
    #[serde(rename = "saveSlopes", default)]
    pub save_slopes: bool,
    #[serde(rename = "saveDmCommands", default)]
    pub save_dm_commands: bool,
    #[serde(rename = "saveLgsPsf", default)]
    pub save_lgs_psf: bool,
    #[serde(rename = "saveSciPsf", default)]
    pub save_sci_psf: bool,

    #[serde(rename = "Atmosphere")]
    pub atmosphere: AtmosphereConfig,
    #[serde(rename = "Telescope")]
    pub telescope: TelescopeConfig,
    #[serde(rename = "WFS")]
    pub wfs: BTreeMap<u32, WfsConfig>,
    #[serde(rename = "DM")]
    pub dm: BTreeMap<u32, DmConfig>,
    #[serde(rename = "Reconstructor")]
    pub reconstructor: ReconstructorConfig,
    #[serde(rename = "Science")]
    pub science: BTreeMap<u32, ScienceConfig>,
}

impl SimulationConfig {
    /// Telescope pixel scale in metres per phase pixel
    pub fn pixel_scale(&self) -> f64 {
        self.telescope.tel_diam / self.pupil_size as f64
    }

    /// Position of a WFS id in the ordered sensor list
    pub fn wfs_index(&self, id: u32) -> Option<usize> {
        self.wfs.keys().position(|&k| k == id)
    }

    /// Index of the sensor driving each DM, in DM order.
    ///
    /// Returns `None` if any reference dangles; [`validate`] rejects such
    /// configurations, so a loaded config always resolves.
    pub fn dm_wfs_indices(&self) -> Option<Vec<usize>> {
        self.dm.values().map(|dm| self.wfs_index(dm.wfs)).collect()
    }
}

/// Turbulence profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmosphereConfig {
    /// Number of turbulence layers
    #[serde(rename = "scrnNo")]
    pub scrn_no: usize,
    /// Layer altitudes in metres
    #[serde(rename = "scrnHeights")]
    pub scrn_heights: Vec<f64>,
    /// Relative layer strengths (share of the r0^(-5/3) budget)
    #[serde(rename = "scrnStrengths")]
    pub scrn_strengths: Vec<f64>,
    /// Wind directions in degrees
    #[serde(rename = "windDirs")]
    pub wind_dirs: Vec<f64>,
    /// Wind speeds in m/s
    #[serde(rename = "windSpeeds")]
    pub wind_speeds: Vec<f64>,
    /// Side length of each generated phase screen in pixels
    #[serde(rename = "wholeScrnSize")]
    pub whole_scrn_size: usize,
    /// Fried parameter at 500 nm in metres
    pub r0: f64,
    /// Von Karman outer scale in metres
    #[serde(rename = "L0", default = "default_outer_scale")]
    pub outer_scale: f64,
    /// Seed for screen generation; entropy-seeded when absent
    #[serde(rename = "randomSeed", default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
}

/// Aperture mask shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskShape {
    #[default]
    #[serde(rename = "circle")]
    Circle,
}

/// Telescope aperture geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelescopeConfig {
    /// Primary diameter in metres
    #[serde(rename = "telDiam")]
    pub tel_diam: f64,
    /// Central obstruction diameter in metres
    #[serde(rename = "obsDiam", default)]
    pub obs_diam: f64,
    #[serde(default)]
    pub mask: MaskShape,
}

/// Wavefront sensor model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WfsType {
    /// Lenslet array imaging one spot per subaperture
    ShackHartmann,
    /// Direct measurement of the mean phase gradient per subaperture
    Gradient,
}

/// How light is carried through the turbulence layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropagationMode {
    /// Phases of all layers are summed along the line of sight
    #[default]
    Geometric,
    /// The field is diffracted between layers
    Physical,
}

/// Wavefront sensor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WfsConfig {
    #[serde(rename = "type")]
    pub wfs_type: WfsType,
    /// Guide star position in arcseconds
    #[serde(rename = "GSPosition")]
    pub gs_position: [f64; 2],
    /// Guide star altitude in metres, 0 for a natural guide star at infinity
    #[serde(rename = "GSHeight", default)]
    pub gs_height: f64,
    #[serde(rename = "GSMag", default)]
    pub gs_mag: f64,
    #[serde(rename = "nxSubaps")]
    pub nx_subaps: usize,
    #[serde(rename = "pxlsPerSubap")]
    pub pxls_per_subap: usize,
    /// Subaperture field of view in arcseconds
    #[serde(rename = "subapFOV")]
    pub subap_fov: f64,
    /// Sensing wavelength in metres
    pub wavelength: f64,
    #[serde(rename = "removeTT", default)]
    pub remove_tt: bool,
    /// Relative flux threshold for centroiding and subaperture validity
    #[serde(rename = "centThreshold", default = "default_cent_threshold")]
    pub cent_threshold: f64,
    #[serde(rename = "fftOversamp", default = "default_fft_oversamp")]
    pub fft_oversamp: usize,
    #[serde(rename = "propagationMode", default)]
    pub propagation_mode: PropagationMode,
    /// Minimum pupil fill factor for a subaperture to be used
    #[serde(rename = "subapThreshold", default = "default_subap_threshold")]
    pub subap_threshold: f64,
    #[serde(rename = "photonNoise", default)]
    pub photon_noise: bool,
    /// Read noise in electrons RMS per pixel
    #[serde(rename = "eReadNoise", default)]
    pub e_read_noise: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lgs: Option<LgsConfig>,
}

impl WfsConfig {
    /// True for a laser guide star at finite range
    pub fn is_lgs(&self) -> bool {
        self.gs_height > 0.0
    }

    /// Uplink configuration, only for a finite-range star with `uplink` set.
    ///
    /// A natural guide star never has an uplink, even when the document
    /// carries an `lgs` block for it.
    pub fn uplink(&self) -> Option<&LgsConfig> {
        if !self.is_lgs() {
            return None;
        }
        self.lgs.as_ref().filter(|lgs| lgs.uplink)
    }

    /// Detector side length in pixels (`nxSubaps × pxlsPerSubap`)
    pub fn detector_pixels(&self) -> usize {
        self.nx_subaps * self.pxls_per_subap
    }
}

/// Laser guide star launch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LgsConfig {
    #[serde(rename = "propagationMode", default)]
    pub propagation_mode: PropagationMode,
    /// Simulate the upward path of the laser through turbulence
    #[serde(default)]
    pub uplink: bool,
    /// Launch aperture diameter in metres
    #[serde(rename = "pupilDiam")]
    pub pupil_diam: f64,
    /// Launch aperture obstruction diameter in metres
    #[serde(rename = "obsDiam", default)]
    pub obs_diam: f64,
    /// Laser wavelength in metres
    pub wavelength: f64,
    /// Beacon altitude in metres, 0 to use the sensor's `GSHeight`
    #[serde(default)]
    pub height: f64,
    /// Apply the current DM correction to the launched beam
    #[serde(default)]
    pub precompensated: bool,
}

/// Deformable mirror model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmType {
    /// Two-actuator tip-tilt mirror
    #[serde(rename = "TT")]
    TipTilt,
    /// Stack-array mirror with a square actuator grid
    Piezo,
}

/// Deformable mirror configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmConfig {
    #[serde(rename = "type")]
    pub dm_type: DmType,
    /// Actuators across the pupil (ignored for TT)
    #[serde(rename = "nxActuators")]
    pub nx_actuators: usize,
    /// Id of the WFS whose slopes drive this mirror
    pub wfs: u32,
    /// Actuator poke amplitude used for calibration, in nm of surface
    #[serde(rename = "iMatValue")]
    pub imat_value: f64,
    /// Loop gain; falls back to the reconstructor gain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
    /// Relative SVD cut; falls back to the reconstructor conditioning
    #[serde(rename = "svdConditioning", default, skip_serializing_if = "Option::is_none")]
    pub svd_conditioning: Option<f64>,
    /// Closed loop (sensor sees this mirror) or open loop
    #[serde(default = "default_true")]
    pub closed: bool,
}

/// Control law
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconstructorType {
    /// Independent matrix-vector reconstruction per mirror
    #[serde(rename = "MVM_SeparateDMs")]
    MvmSeparateDms,
}

/// Reconstructor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructorConfig {
    #[serde(rename = "type")]
    pub recon_type: ReconstructorType,
    #[serde(rename = "svdConditioning")]
    pub svd_conditioning: f64,
    pub gain: f64,
}

/// Science output type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScienceType {
    #[serde(rename = "PSF")]
    Psf,
}

/// Science camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScienceConfig {
    #[serde(rename = "type")]
    pub sci_type: ScienceType,
    /// Field position in arcseconds
    pub position: [f64; 2],
    /// Field of view in arcseconds
    #[serde(rename = "FOV")]
    pub fov: f64,
    /// Imaging wavelength in metres
    pub wavelength: f64,
    /// Output image side length in pixels
    pub pxls: usize,
    #[serde(rename = "fftOversamp", default = "default_fft_oversamp")]
    pub fft_oversamp: usize,
}
