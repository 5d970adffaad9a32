//! Unified error type hierarchy for demoforge
//!
//! Provides structured error handling with BuildError, ConfigError, ProjectError,
//! PackError and DeviceError. The build entry point never returns these to the
//! caller directly; they are folded into a `BuildResult` plus log lines.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::BuildFailureKind;

/// Build pipeline errors, one variant per failure class.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Carries the full prerequisite report, header line included.
    #[error("{0}")]
    PrereqMissing(String),

    #[error("Invalid project input: {0}")]
    InvalidProjectInput(String),

    #[error("{step} failed: {message}")]
    ToolchainFailure { step: String, message: String },

    #[error("Packaging failed: {0}")]
    PackagingFailure(String),

    #[error("Build cancelled by user")]
    Cancelled,

    #[error("A build is already running")]
    AlreadyRunning,
}

impl BuildError {
    /// Failure class reported in `BuildResult::failure`.
    pub fn kind(&self) -> BuildFailureKind {
        match self {
            BuildError::PrereqMissing(_) => BuildFailureKind::PrereqMissing,
            BuildError::InvalidProjectInput(_) => BuildFailureKind::InvalidProjectInput,
            BuildError::ToolchainFailure { .. } => BuildFailureKind::ToolchainFailure,
            BuildError::PackagingFailure(_) => BuildFailureKind::PackagingFailure,
            BuildError::Cancelled => BuildFailureKind::Cancelled,
            BuildError::AlreadyRunning => BuildFailureKind::AlreadyRunning,
        }
    }

    /// Short, user-facing line for status bars and dialogs.
    pub fn user_message(&self) -> String {
        match self {
            BuildError::PrereqMissing(_) => {
                "Build tools are missing. See the build log for setup guidance.".to_string()
            }
            BuildError::InvalidProjectInput(msg) => format!("Project cannot be built: {}", msg),
            BuildError::ToolchainFailure { step, .. } => {
                format!("The '{}' step failed. See the build log for details.", step)
            }
            BuildError::PackagingFailure(msg) => format!("Could not write the executable: {}", msg),
            BuildError::Cancelled => "Build was cancelled.".to_string(),
            BuildError::AlreadyRunning => "Wait for the running build to finish.".to_string(),
        }
    }
}

impl From<ProjectError> for BuildError {
    fn from(err: ProjectError) -> Self {
        BuildError::InvalidProjectInput(err.to_string())
    }
}

impl From<PackError> for BuildError {
    fn from(err: PackError) -> Self {
        BuildError::PackagingFailure(err.to_string())
    }
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid TOML in toolchain profile: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Project description loading and validation errors.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Project file is not readable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Project file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Project validation failed: {0}")]
    Invalid(String),

    #[error("Linked source not found for {owner}: {}", .path.display())]
    MissingSource { owner: String, path: PathBuf },
}

/// Packed executable read/write errors.
#[derive(Error, Debug)]
pub enum PackError {
    #[error("IO error while packing: {0}")]
    Io(#[from] io::Error),

    #[error("Pack data is corrupt: {0}")]
    Corrupt(String),

    #[error("No pack entry named '{0}'")]
    EntryNotFound(String),

    #[error("Zip packaging failed: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// GPU device service errors.
///
/// `DeviceLost` means the device context must be recreated; the other
/// variants leave the device usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Invalid allocation request: {0}")]
    InvalidRequest(String),

    #[error("Out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("Graphics device lost: {0}")]
    DeviceLost(String),

    #[error("No graphics adapter available: {0}")]
    AdapterUnavailable(String),

    #[error("Compute effect error: {0}")]
    Effect(String),
}

/// Result alias for build pipeline internals.
pub type Result<T> = std::result::Result<T, BuildError>;
