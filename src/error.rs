//! Error types shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while opening, describing or writing a vector layer.
#[derive(Debug, Error)]
pub enum LayerError {
    /// The dataset could not be opened as a feature collection.
    #[error("Failed to load vector layer {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode layer {0}: {1}")]
    Encode(String, #[source] serde_json::Error),

    #[error("Invalid geometry in feature {id}: {reason}")]
    Geometry { id: u64, reason: String },
}

/// Errors raised while parsing a coordinate reference system identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrsError {
    #[error("Unrecognised CRS identifier: {0}")]
    Unrecognised(String),
}

/// Errors raised by the processing registry and its algorithms.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Algorithm not found: {0}")]
    UnknownAlgorithm(String),

    #[error("Invalid value for parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Output {0} was not produced")]
    MissingOutput(String),

    /// Both layers must share a coordinate reference system.
    #[error("CRS mismatch: {left} vs {right}")]
    CrsMismatch { left: String, right: String },

    #[error("Failed to create transformation {from} -> {to}: {reason}")]
    Transform {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Failed to reproject feature {id}: {reason}")]
    Reproject { id: u64, reason: String },

    #[error(transparent)]
    Layer(#[from] LayerError),
}

/// Errors raised while looking for the newest dataset snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Cannot read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No folders found in {0}")]
    NoFolders(PathBuf),

    #[error("No files found in {0}")]
    NoFiles(PathBuf),
}

/// Errors raised while loading the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error(transparent)]
    Crs(#[from] CrsError),
}

/// Top level error returned by the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Crs(#[from] CrsError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// True when the failure comes from two layers in different reference systems.
    pub fn is_crs_mismatch(&self) -> bool {
        matches!(self, Error::Processing(ProcessingError::CrsMismatch { .. }))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
