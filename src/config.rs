//! Pipeline configuration.
//!
//! Defaults can be overridden by an INI file:
//!
//! ```ini
//! [paths]
//! newest = /data/Geodata_TAB
//! previous = /data/Geodata_ChangeDetection
//! output = /data/changes
//!
//! [processing]
//! target_crs = EPSG:3044
//! dataset_extension = geojson
//! write_deleted = true
//! ```
//!
//! Command line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use ini::Ini;

use crate::crs::Crs;
use crate::error::ConfigError;

pub const DEFAULT_TARGET_CRS: u32 = 3044;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Directory holding one folder per delivery of the newest data.
    pub newest_dir: PathBuf,
    /// Directory holding previous reports.
    pub previous_dir: PathBuf,
    pub output_dir: PathBuf,
    pub target_crs: Crs,
    /// Extension of dataset files; other files are ignored.
    pub dataset_extension: String,
    /// Also write the deleted features next to the added ones.
    pub write_deleted: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            newest_dir: PathBuf::from("Geodata_TAB"),
            previous_dir: PathBuf::from("Geodata_ChangeDetection"),
            output_dir: PathBuf::from("output"),
            target_crs: Crs::epsg(DEFAULT_TARGET_CRS),
            dataset_extension: "geojson".to_string(),
            write_deleted: true,
        }
    }
}

impl PipelineConfig {
    /// Defaults with every directory resolved against `base`.
    pub fn rooted_at(base: &Path) -> Self {
        let defaults = Self::default();
        Self {
            newest_dir: base.join(&defaults.newest_dir),
            previous_dir: base.join(&defaults.previous_dir),
            output_dir: base.join(&defaults.output_dir),
            ..defaults
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut config = Self::default();
        config.apply_ini(&ini)?;
        Ok(config)
    }

    pub fn from_ini_str(contents: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(contents).map_err(|e| ConfigError::Load {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        let mut config = Self::default();
        config.apply_ini(&ini)?;
        Ok(config)
    }

    fn apply_ini(&mut self, ini: &Ini) -> Result<(), ConfigError> {
        if let Some(paths) = ini.section(Some("paths")) {
            if let Some(value) = paths.get("newest") {
                self.newest_dir = PathBuf::from(value);
            }
            if let Some(value) = paths.get("previous") {
                self.previous_dir = PathBuf::from(value);
            }
            if let Some(value) = paths.get("output") {
                self.output_dir = PathBuf::from(value);
            }
        }
        if let Some(processing) = ini.section(Some("processing")) {
            if let Some(value) = processing.get("target_crs") {
                self.target_crs = value.parse()?;
            }
            if let Some(value) = processing.get("dataset_extension") {
                let extension = value.trim().trim_start_matches('.');
                if extension.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "dataset_extension".to_string(),
                        value: value.to_string(),
                    });
                }
                self.dataset_extension = extension.to_string();
            }
            if let Some(value) = processing.get("write_deleted") {
                self.write_deleted = parse_bool("write_deleted", value)?;
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
