//! Core data types for demoforge builds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// What kind of deliverable the build produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildTargetKind {
    /// Zip archive holding the runtime next to its project data.
    PackagedDemo,
    /// Single executable with the pack appended.
    SelfContainedDemo,
    /// Single executable built from the screensaver runtime target.
    SelfContainedScreenSaver,
    /// Single executable from the size-optimized runtime, pack always compressed.
    MicroDemo,
}

impl BuildTargetKind {
    /// Whether the artifact is a single executable (everything but the zip).
    pub fn is_self_contained(&self) -> bool {
        !matches!(self, BuildTargetKind::PackagedDemo)
    }

    /// Key used in toolchain profiles and settings files.
    pub fn key(&self) -> &'static str {
        match self {
            BuildTargetKind::PackagedDemo => "packaged",
            BuildTargetKind::SelfContainedDemo => "selfcontained",
            BuildTargetKind::SelfContainedScreenSaver => "screensaver",
            BuildTargetKind::MicroDemo => "micro",
        }
    }
}

impl fmt::Display for BuildTargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildTargetKind::PackagedDemo => write!(f, "Packaged demo"),
            BuildTargetKind::SelfContainedDemo => write!(f, "Self-contained demo"),
            BuildTargetKind::SelfContainedScreenSaver => write!(f, "Self-contained screensaver"),
            BuildTargetKind::MicroDemo => write!(f, "Micro demo"),
        }
    }
}

impl FromStr for BuildTargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "packaged" | "packaged-demo" => Ok(BuildTargetKind::PackagedDemo),
            "selfcontained" | "self-contained" | "self-contained-demo" => {
                Ok(BuildTargetKind::SelfContainedDemo)
            }
            "screensaver" | "selfcontained-screensaver" | "self-contained-screen-saver" => {
                Ok(BuildTargetKind::SelfContainedScreenSaver)
            }
            "micro" | "micro-demo" => Ok(BuildTargetKind::MicroDemo),
            _ => Err(format!("Unknown target kind: {}", s)),
        }
    }
}

impl Default for BuildTargetKind {
    fn default() -> Self {
        BuildTargetKind::SelfContainedDemo
    }
}

/// Release flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    Release,
    /// Release plus the executable compressor tool.
    ReleaseCompressed,
}

impl BuildMode {
    pub fn key(&self) -> &'static str {
        match self {
            BuildMode::Release => "release",
            BuildMode::ReleaseCompressed => "compressed",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Release => write!(f, "Release"),
            BuildMode::ReleaseCompressed => write!(f, "Release (compressed)"),
        }
    }
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "release" => Ok(BuildMode::Release),
            "compressed" | "release-compressed" => Ok(BuildMode::ReleaseCompressed),
            _ => Err(format!("Unknown build mode: {}", s)),
        }
    }
}

impl Default for BuildMode {
    fn default() -> Self {
        BuildMode::Release
    }
}

/// Optional size budget for the final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SizeTargetPreset {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "64k")]
    K64,
    #[serde(rename = "128k")]
    K128,
    #[serde(rename = "256k")]
    K256,
    #[serde(rename = "512k")]
    K512,
    #[serde(rename = "1024k")]
    K1024,
}

impl SizeTargetPreset {
    /// Budget in bytes, 0 when no target is set.
    pub fn budget_bytes(&self) -> u64 {
        let kib = match self {
            SizeTargetPreset::None => 0,
            SizeTargetPreset::K64 => 64,
            SizeTargetPreset::K128 => 128,
            SizeTargetPreset::K256 => 256,
            SizeTargetPreset::K512 => 512,
            SizeTargetPreset::K1024 => 1024,
        };
        kib * 1024
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, SizeTargetPreset::None)
    }
}

impl fmt::Display for SizeTargetPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeTargetPreset::None => write!(f, "none"),
            other => write!(f, "{}k", other.budget_bytes() / 1024),
        }
    }
}

impl FromStr for SizeTargetPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(SizeTargetPreset::None),
            "64k" => Ok(SizeTargetPreset::K64),
            "128k" => Ok(SizeTargetPreset::K128),
            "256k" => Ok(SizeTargetPreset::K256),
            "512k" => Ok(SizeTargetPreset::K512),
            "1024k" | "1m" => Ok(SizeTargetPreset::K1024),
            _ => Err(format!("Unknown size target: {}", s)),
        }
    }
}

impl Default for SizeTargetPreset {
    fn default() -> Self {
        SizeTargetPreset::None
    }
}

/// Outcome of a single prerequisite check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStatus {
    /// Display name, e.g. "CMake".
    pub name: String,
    /// Required in the checked mode; optional tools never fail the report.
    pub required: bool,
    /// Where the tool or SDK file was found.
    pub found: Option<PathBuf>,
    /// Parsed version when a version constraint applies.
    pub version: Option<String>,
    /// Why the check failed (missing, too old, unparseable version).
    pub problem: Option<String>,
}

impl ToolStatus {
    pub fn is_satisfied(&self) -> bool {
        self.problem.is_none()
    }
}

/// Result of one prerequisite check invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPrereqReport {
    pub ok: bool,
    pub message: String,
    /// Individual checks in the order they ran.
    pub checks: Vec<ToolStatus>,
}

impl BuildPrereqReport {
    /// First required check that failed, in check order.
    pub fn first_missing(&self) -> Option<&ToolStatus> {
        self.checks
            .iter()
            .find(|c| c.required && !c.is_satisfied())
    }

    pub fn is_found(&self, name: &str) -> bool {
        self.checks
            .iter()
            .any(|c| c.name == name && c.is_satisfied())
    }
}

/// Input for one build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Root of the authoring application (toolchain profile, runtime sources, vendored tools).
    pub app_root: PathBuf,
    /// Project description file.
    pub project_path: PathBuf,
    /// Where the final executable is written.
    pub target_exe_path: PathBuf,
    pub target_kind: BuildTargetKind,
    pub mode: BuildMode,
    pub size_target: SizeTargetPreset,
    /// Export a standalone solution directory here after packing.
    pub solution_root: Option<PathBuf>,
    /// Parent directory for the per-build scratch dir (system temp when unset).
    pub scratch_root: Option<PathBuf>,
    /// Ask the runtime to write a debug log when the demo starts.
    pub runtime_debug_log: bool,
    /// Tool name -> explicit binary (or directory holding it).
    pub tool_overrides: BTreeMap<String, PathBuf>,
}

impl BuildRequest {
    pub fn new(
        app_root: impl Into<PathBuf>,
        project_path: impl Into<PathBuf>,
        target_exe_path: impl Into<PathBuf>,
    ) -> Self {
        BuildRequest {
            app_root: app_root.into(),
            project_path: project_path.into(),
            target_exe_path: target_exe_path.into(),
            target_kind: BuildTargetKind::default(),
            mode: BuildMode::default(),
            size_target: SizeTargetPreset::default(),
            solution_root: None,
            scratch_root: None,
            runtime_debug_log: false,
            tool_overrides: BTreeMap::new(),
        }
    }

    /// Final artifact path; packaged demos always end in `.zip`.
    pub fn artifact_path(&self) -> PathBuf {
        match self.target_kind {
            BuildTargetKind::PackagedDemo => self.target_exe_path.with_extension("zip"),
            _ => self.target_exe_path.clone(),
        }
    }
}

/// Failure class of an unsuccessful build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildFailureKind {
    PrereqMissing,
    InvalidProjectInput,
    ToolchainFailure,
    PackagingFailure,
    Cancelled,
    AlreadyRunning,
}

impl fmt::Display for BuildFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildFailureKind::PrereqMissing => write!(f, "missing prerequisites"),
            BuildFailureKind::InvalidProjectInput => write!(f, "invalid project input"),
            BuildFailureKind::ToolchainFailure => write!(f, "toolchain failure"),
            BuildFailureKind::PackagingFailure => write!(f, "packaging failure"),
            BuildFailureKind::Cancelled => write!(f, "cancelled"),
            BuildFailureKind::AlreadyRunning => write!(f, "build already running"),
        }
    }
}

/// Terminal value of one build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub failure: Option<BuildFailureKind>,
    pub artifact_path: Option<PathBuf>,
    pub final_exe_bytes: u64,
    pub budget_bytes: u64,
    pub budget_hit: bool,
    pub size_report: String,
}

impl BuildResult {
    pub fn failed(kind: BuildFailureKind) -> Self {
        BuildResult {
            success: false,
            failure: Some(kind),
            artifact_path: None,
            final_exe_bytes: 0,
            budget_bytes: 0,
            budget_hit: false,
            size_report: String::new(),
        }
    }
}
