//! Manifest and tool-path configuration.
//!
//! The manifest is a JSON document listing the declared volume groups:
//!
//! ```json
//! {
//!   "volume_groups": [
//!     { "name": "data", "physical_volumes": ["/dev/sdb1"], "extent_size": "4M" },
//!     { "name": "scratch", "physical_volumes": ["/dev/sdc1"], "createonly": true }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{LvmTool, ToolPaths, UnknownTool};
use crate::reconciler::DesiredState;

/// Unit suffixes accepted by `vgcreate -s`
const EXTENT_UNITS: &str = "bBsSkKmMgGtTpPeE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid volume group name '{0}'")]
    InvalidName(String),

    #[error("volume group '{0}' declared more than once")]
    DuplicateGroup(String),

    #[error("volume group '{0}' lists an empty physical volume")]
    EmptyDevice(String),

    #[error("volume group '{group}' has invalid physical volume '{device}'")]
    InvalidDevice { group: String, device: String },

    #[error("volume group '{group}' lists physical volume {device} more than once")]
    DuplicateDevice { group: String, device: String },

    #[error("volume group '{group}' has invalid extent size '{value}'")]
    InvalidExtentSize { group: String, value: String },

    #[error("invalid tool override '{0}', expected NAME=PATH")]
    InvalidToolOverride(String),

    #[error(transparent)]
    UnknownTool(#[from] UnknownTool),
}

/// Declared volume groups for one host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub volume_groups: Vec<DesiredState>,
}

impl Manifest {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let manifest: Manifest = serde_json::from_str(contents)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for group in &self.volume_groups {
            validate_group(group)?;
            if !names.insert(group.name.as_str()) {
                return Err(ConfigError::DuplicateGroup(group.name.clone()));
            }
        }
        Ok(())
    }
}

pub fn validate_group(desired: &DesiredState) -> Result<(), ConfigError> {
    let name = &desired.name;
    if name.is_empty()
        || name.starts_with('-')
        || name.contains(['/', ','])
        || name.contains(char::is_whitespace)
    {
        return Err(ConfigError::InvalidName(name.clone()));
    }

    let mut seen = HashSet::new();
    for device in &desired.physical_volumes {
        if device.trim().is_empty() {
            return Err(ConfigError::EmptyDevice(name.clone()));
        }
        // would be parsed as an option by vgcreate/vgextend/vgreduce
        if device.starts_with('-') {
            return Err(ConfigError::InvalidDevice {
                group: name.clone(),
                device: device.clone(),
            });
        }
        if !seen.insert(device.as_str()) {
            return Err(ConfigError::DuplicateDevice {
                group: name.clone(),
                device: device.clone(),
            });
        }
    }

    if let Some(extent_size) = &desired.extent_size {
        if !is_valid_extent_size(extent_size) {
            return Err(ConfigError::InvalidExtentSize {
                group: name.clone(),
                value: extent_size.clone(),
            });
        }
    }

    Ok(())
}

/// `<digits>[.<digits>][unit]`, e.g. "4M", "32k", "4096", "4.00m"
pub fn is_valid_extent_size(value: &str) -> bool {
    let number = value.trim_end_matches(|c: char| EXTENT_UNITS.contains(c));
    if value.len() - number.len() > 1 {
        return false;
    }

    let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    match number.split_once('.') {
        Some((whole, fraction)) => is_digits(whole) && is_digits(fraction),
        None => is_digits(number),
    }
}

/// Parse a `NAME=PATH` override such as `vgs=/usr/local/sbin/vgs`
pub fn parse_tool_override(value: &str) -> Result<(LvmTool, PathBuf), ConfigError> {
    let (name, path) = value
        .split_once('=')
        .filter(|(_, path)| !path.is_empty())
        .ok_or_else(|| ConfigError::InvalidToolOverride(value.to_string()))?;
    Ok((name.parse::<LvmTool>()?, PathBuf::from(path)))
}

/// Resolve binary paths once at startup
pub fn tool_paths(bin_dir: Option<&Path>, overrides: &[(LvmTool, PathBuf)]) -> ToolPaths {
    let base = match bin_dir {
        Some(dir) => ToolPaths::in_dir(dir),
        None => ToolPaths::from_path_env(),
    };
    overrides
        .iter()
        .fold(base, |paths, (tool, path)| paths.with_override(*tool, path.clone()))
}
