//! demoforge: self-contained demo build pipeline
//!
//! Turns a demo project description (scenes, shaders, audio, textures, a
//! timeline track) into a single distributable executable. An external C++
//! toolchain compiles the player runtime; demoforge checks the toolchain,
//! consolidates the project into a pack and appends it to the runtime.
//!
//! The crate is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Build request, result and prerequisite report types
//! - **log_collector**: Build log sink and persistent log writer
//! - **config**: Toolchain profile (TOML) and persisted build settings (JSON)
//! - **system**: Tool lookup and the prerequisite checker
//! - **project**: Project description loading, validation and asset consolidation
//! - **pack**: Packed executable format and zip packaging
//! - **graphics**: GPU device service and compute effect management
//! - **orchestrator**: The 7-step build pipeline and background build service

pub mod config;
pub mod error;
pub mod graphics;
pub mod log_collector;
pub mod models;
pub mod orchestrator;
pub mod pack;
pub mod project;
pub mod system;

// Re-export the log crate for macro usage
pub use log;

pub use error::{BuildError, ConfigError, DeviceError, PackError, ProjectError, Result};
pub use log_collector::{LogCollector, LogLine, LogSink, NullSink};
pub use models::{
    BuildFailureKind, BuildMode, BuildPrereqReport, BuildRequest, BuildResult, BuildTargetKind,
    SizeTargetPreset, ToolStatus,
};

pub use config::{BuildSettings, SettingsManager, ToolchainProfile};
pub use graphics::compute::{ComputeEffectManager, ComputeShaderEffect, ShaderCompiler};
pub use graphics::headless::HeadlessDeviceService;
pub use graphics::GraphicsDeviceService;
pub use orchestrator::{
    build_self_contained, BuildEvent, BuildHandle, BuildOrchestrator, BuildService, BuildStep,
};
pub use pack::{PackBuilder, PackReader};
pub use system::prereq::check_prereqs;
pub use system::PrereqChecker;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_error_reexport() {
        let result: Result<()> = Err(BuildError::Cancelled);
        assert_eq!(result.unwrap_err().kind(), BuildFailureKind::Cancelled);
    }

    #[test]
    fn test_models_reexport() {
        assert_eq!(BuildTargetKind::default(), BuildTargetKind::SelfContainedDemo);
        assert_eq!(SizeTargetPreset::K64.budget_bytes(), 65_536);
    }
}
