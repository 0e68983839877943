//! YAML loading and validation of [`SimulationConfig`]

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::{SimulationConfig, WfsConfig};

/// Malformed or inconsistent configuration. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Dotted path of the offending field, when the error names one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Read, parse and validate a configuration file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<SimulationConfig, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = from_yaml_str(&text)?;
    log::debug!("Loaded configuration '{}' from {}", config.sim_name, path.display());
    Ok(config)
}

/// Parse and validate a configuration document.
pub fn from_yaml_str(text: &str) -> Result<SimulationConfig, ConfigError> {
    let config: SimulationConfig = serde_yaml::from_str(text)?;
    validate(&config)?;
    Ok(config)
}

/// Serialize a configuration back to YAML.
pub fn to_yaml_string(config: &SimulationConfig) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(config)?)
}

fn positive(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be > 0, got {value}")))
    }
}

fn finite(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be finite, got {value}")))
    }
}

fn finite_position(field: &str, position: [f64; 2]) -> Result<(), ConfigError> {
    for (axis, value) in position.into_iter().enumerate() {
        finite(format!("{field}[{axis}]"), value)?;
    }
    Ok(())
}

fn non_negative(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be >= 0, got {value}")))
    }
}

fn unit_closed(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must lie in [0, 1], got {value}")))
    }
}

fn unit_half_open(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must lie in [0, 1), got {value}")))
    }
}

fn count_matches(field: &str, declared: usize, section: &str, actual: usize) -> Result<(), ConfigError> {
    if declared == actual {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("declares {declared} but {section} has {actual} entries"),
        ))
    }
}

/// Check every cross-field and range constraint of a parsed configuration.
pub fn validate(config: &SimulationConfig) -> Result<(), ConfigError> {
    if config.sim_name.trim().is_empty() {
        return Err(ConfigError::invalid("simName", "must not be empty"));
    }
    if config.pupil_size == 0 {
        return Err(ConfigError::invalid("pupilSize", "must be > 0"));
    }
    positive("loopTime", config.loop_time)?;

    count_matches("nGS", config.n_gs, "WFS", config.wfs.len())?;
    count_matches("nDM", config.n_dm, "DM", config.dm.len())?;
    count_matches("nSci", config.n_sci, "Science", config.science.len())?;

    validate_atmosphere(config)?;

    let tel = &config.telescope;
    positive("Telescope.telDiam", tel.tel_diam)?;
    non_negative("Telescope.obsDiam", tel.obs_diam)?;
    if tel.obs_diam >= tel.tel_diam {
        return Err(ConfigError::invalid(
            "Telescope.obsDiam",
            format!("must be smaller than telDiam ({})", tel.tel_diam),
        ));
    }

    for (id, wfs) in &config.wfs {
        validate_wfs(&format!("WFS.{id}"), wfs, config.pupil_size)?;
    }

    for (id, dm) in &config.dm {
        let prefix = format!("DM.{id}");
        if config.wfs_index(dm.wfs).is_none() {
            return Err(ConfigError::invalid(
                format!("{prefix}.wfs"),
                format!("references WFS {} which is not defined", dm.wfs),
            ));
        }
        if dm.nx_actuators == 0 {
            return Err(ConfigError::invalid(format!("{prefix}.nxActuators"), "must be > 0"));
        }
        positive(format!("{prefix}.iMatValue"), dm.imat_value)?;
        if let Some(gain) = dm.gain {
            unit_closed(format!("{prefix}.gain"), gain)?;
        }
        if let Some(cond) = dm.svd_conditioning {
            unit_half_open(format!("{prefix}.svdConditioning"), cond)?;
        }
    }

    unit_half_open("Reconstructor.svdConditioning", config.reconstructor.svd_conditioning)?;
    unit_closed("Reconstructor.gain", config.reconstructor.gain)?;

    for (id, sci) in &config.science {
        let prefix = format!("Science.{id}");
        finite_position(&format!("{prefix}.position"), sci.position)?;
        positive(format!("{prefix}.FOV"), sci.fov)?;
        positive(format!("{prefix}.wavelength"), sci.wavelength)?;
        if sci.pxls == 0 {
            return Err(ConfigError::invalid(format!("{prefix}.pxls"), "must be > 0"));
        }
        if sci.fft_oversamp == 0 {
            return Err(ConfigError::invalid(format!("{prefix}.fftOversamp"), "must be >= 1"));
        }
    }

    Ok(())
}

fn validate_atmosphere(config: &SimulationConfig) -> Result<(), ConfigError> {
    let atmos = &config.atmosphere;
    if atmos.scrn_no == 0 {
        return Err(ConfigError::invalid("Atmosphere.scrnNo", "must be >= 1"));
    }
    for (name, len) in [
        ("scrnHeights", atmos.scrn_heights.len()),
        ("scrnStrengths", atmos.scrn_strengths.len()),
        ("windDirs", atmos.wind_dirs.len()),
        ("windSpeeds", atmos.wind_speeds.len()),
    ] {
        if len != atmos.scrn_no {
            return Err(ConfigError::invalid(
                format!("Atmosphere.{name}"),
                format!("has {len} entries, expected scrnNo = {}", atmos.scrn_no),
            ));
        }
    }

    for (i, &h) in atmos.scrn_heights.iter().enumerate() {
        non_negative(format!("Atmosphere.scrnHeights[{i}]"), h)?;
    }
    for (i, &w) in atmos.scrn_strengths.iter().enumerate() {
        non_negative(format!("Atmosphere.scrnStrengths[{i}]"), w)?;
    }
    if atmos.scrn_strengths.iter().sum::<f64>() <= 0.0 {
        return Err(ConfigError::invalid(
            "Atmosphere.scrnStrengths",
            "at least one layer must have non-zero strength",
        ));
    }
    for (i, &s) in atmos.wind_speeds.iter().enumerate() {
        non_negative(format!("Atmosphere.windSpeeds[{i}]"), s)?;
    }
    for (i, &d) in atmos.wind_dirs.iter().enumerate() {
        finite(format!("Atmosphere.windDirs[{i}]"), d)?;
    }

    positive("Atmosphere.r0", atmos.r0)?;
    positive("Atmosphere.L0", atmos.outer_scale)?;
    if atmos.whole_scrn_size < config.pupil_size {
        return Err(ConfigError::invalid(
            "Atmosphere.wholeScrnSize",
            format!("must be at least pupilSize ({})", config.pupil_size),
        ));
    }
    Ok(())
}

fn validate_wfs(prefix: &str, wfs: &WfsConfig, pupil_size: usize) -> Result<(), ConfigError> {
    if wfs.nx_subaps == 0 {
        return Err(ConfigError::invalid(format!("{prefix}.nxSubaps"), "must be > 0"));
    }
    if pupil_size % wfs.nx_subaps != 0 || pupil_size / wfs.nx_subaps < 2 {
        return Err(ConfigError::invalid(
            format!("{prefix}.nxSubaps"),
            format!(
                "pupilSize ({pupil_size}) must split into whole subapertures of at least 2 pixels"
            ),
        ));
    }
    finite_position(&format!("{prefix}.GSPosition"), wfs.gs_position)?;
    finite(format!("{prefix}.GSMag"), wfs.gs_mag)?;
    if wfs.pxls_per_subap == 0 {
        return Err(ConfigError::invalid(format!("{prefix}.pxlsPerSubap"), "must be > 0"));
    }
    positive(format!("{prefix}.subapFOV"), wfs.subap_fov)?;
    positive(format!("{prefix}.wavelength"), wfs.wavelength)?;
    non_negative(format!("{prefix}.GSHeight"), wfs.gs_height)?;
    unit_half_open(format!("{prefix}.centThreshold"), wfs.cent_threshold)?;
    unit_closed(format!("{prefix}.subapThreshold"), wfs.subap_threshold)?;
    non_negative(format!("{prefix}.eReadNoise"), wfs.e_read_noise)?;
    if wfs.fft_oversamp == 0 {
        return Err(ConfigError::invalid(format!("{prefix}.fftOversamp"), "must be >= 1"));
    }

    // The lgs block of a natural guide star is never used, so it is not checked.
    if let Some(lgs) = wfs.lgs.as_ref().filter(|_| wfs.is_lgs()) {
        positive(format!("{prefix}.lgs.pupilDiam"), lgs.pupil_diam)?;
        non_negative(format!("{prefix}.lgs.obsDiam"), lgs.obs_diam)?;
        if lgs.obs_diam >= lgs.pupil_diam {
            return Err(ConfigError::invalid(
                format!("{prefix}.lgs.obsDiam"),
                format!("must be smaller than pupilDiam ({})", lgs.pupil_diam),
            ));
        }
        positive(format!("{prefix}.lgs.wavelength"), lgs.wavelength)?;
        non_negative(format!("{prefix}.lgs.height"), lgs.height)?;
    }
    Ok(())
}
