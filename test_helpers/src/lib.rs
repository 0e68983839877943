//! Test fixtures shared by the aosim workspace
//!
//! Locates the workspace root and the bundled sample configurations under
//! `conf/`.

use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;

/// Sample configuration with a natural guide star driving a tip-tilt mirror
/// and a laser guide star driving a piezo mirror through a physical uplink.
pub const LGS_UPLINK_CONFIG: &str = "sh_8x8_lgs-uplink.yaml";

/// Sample configuration with a single natural guide star and piezo mirror
pub const NGS_CONFIG: &str = "sh_8x8.yaml";

#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("workspace root not found: {0}")]
    WorkspaceRootNotFound(String),

    #[error("sample configuration {0} does not exist")]
    MissingConfig(PathBuf),
}

/// Walk up from the current directory to the Cargo manifest declaring `[workspace]`.
pub fn find_workspace_root() -> Result<PathBuf, TestHelperError> {
    let mut dir = env::current_dir().map_err(|e| {
        TestHelperError::WorkspaceRootNotFound(format!("cannot read current directory: {e}"))
    })?;

    loop {
        let manifest = dir.join("Cargo.toml");
        if manifest.is_file() {
            let content = std::fs::read_to_string(&manifest).map_err(|e| {
                TestHelperError::WorkspaceRootNotFound(format!(
                    "cannot read {}: {e}",
                    manifest.display()
                ))
            })?;
            if content.contains("[workspace]") {
                return Ok(dir);
            }
        }
        if !dir.pop() {
            return Err(TestHelperError::WorkspaceRootNotFound(
                "no [workspace] manifest above the current directory".to_string(),
            ));
        }
    }
}

static WORKSPACE_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_workspace_root().expect("tests must run inside the workspace"));

/// Directory holding the sample configurations
pub fn conf_dir() -> PathBuf {
    WORKSPACE_ROOT.join("conf")
}

/// Path of a sample configuration, checked for existence
pub fn conf_path(name: &str) -> Result<PathBuf, TestHelperError> {
    let path = conf_dir().join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(TestHelperError::MissingConfig(path))
    }
}
