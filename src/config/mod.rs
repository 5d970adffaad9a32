//! Configuration for demoforge builds.
//!
//! Two independent sources feed a build:
//!
//! - `toolchain`: the TOML toolchain profile shipped with the application root
//!   (required tools, SDK files, compile steps).
//! - `BuildSettings`: the user's persisted build options (target kind, mode,
//!   size target, tool overrides) stored as JSON in the user config dir.
//!
//! `SettingsManager` loads settings leniently: a missing or unparseable file
//! yields defaults, and stale paths are dropped with a warning so an old
//! settings file never breaks a build.

pub mod loader;
pub mod toolchain;

use crate::error::ConfigError;
use crate::models::{BuildMode, BuildRequest, BuildTargetKind, SizeTargetPreset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use toolchain::{load_profile, ToolchainProfile};

/// Options remembered between builds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildOptions {
    pub target_kind: BuildTargetKind,
    pub mode: BuildMode,
    pub size_target: SizeTargetPreset,
    pub runtime_debug_log: bool,
    /// Empty when no solution export is wanted.
    pub solution_root: String,
    /// Empty means the system temp dir.
    pub scratch_root: String,
    /// Tool name -> binary path.
    pub tool_overrides: BTreeMap<String, String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            target_kind: BuildTargetKind::SelfContainedDemo,
            mode: BuildMode::Release,
            size_target: SizeTargetPreset::None,
            runtime_debug_log: false,
            solution_root: String::new(),
            scratch_root: String::new(),
            tool_overrides: BTreeMap::new(),
        }
    }
}

/// Persisted settings document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub build: BuildOptions,
}

impl BuildSettings {
    /// Fill request options from the remembered settings. Tool overrides
    /// already on the request win.
    pub fn apply_to(&self, request: &mut BuildRequest) {
        let opts = &self.build;
        request.target_kind = opts.target_kind;
        request.mode = opts.mode;
        request.size_target = opts.size_target;
        request.runtime_debug_log = opts.runtime_debug_log;
        if !opts.solution_root.is_empty() {
            request.solution_root = Some(PathBuf::from(&opts.solution_root));
        }
        if !opts.scratch_root.is_empty() {
            request.scratch_root = Some(PathBuf::from(&opts.scratch_root));
        }
        for (tool, path) in &opts.tool_overrides {
            request
                .tool_overrides
                .entry(tool.clone())
                .or_insert_with(|| PathBuf::from(path));
        }
    }

    /// Remember the options of a request the user just built.
    pub fn capture_from(&mut self, request: &BuildRequest) {
        let opts = &mut self.build;
        opts.target_kind = request.target_kind;
        opts.mode = request.mode;
        opts.size_target = request.size_target;
        opts.runtime_debug_log = request.runtime_debug_log;
        opts.solution_root = path_string(request.solution_root.as_deref());
        opts.scratch_root = path_string(request.scratch_root.as_deref());
        opts.tool_overrides = request
            .tool_overrides
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string_lossy().into_owned()))
            .collect();
    }

    /// Drop paths that point nowhere. Returns the names of reset fields.
    fn sanitize(&mut self) -> Vec<String> {
        let mut reset = Vec::new();
        let opts = &mut self.build;

        if !opts.scratch_root.is_empty() && !Path::new(&opts.scratch_root).is_dir() {
            log::warn!(
                "Scratch root '{}' does not exist, falling back to the system temp dir",
                opts.scratch_root
            );
            opts.scratch_root.clear();
            reset.push("scratchRoot".to_string());
        }

        let stale: Vec<String> = opts
            .tool_overrides
            .iter()
            .filter(|(_, path)| !Path::new(path.as_str()).exists())
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            log::warn!("Tool override for '{}' points at a missing path, ignoring it", name);
            opts.tool_overrides.remove(&name);
            reset.push(format!("toolOverrides.{}", name));
        }
        reset
    }
}

fn path_string(path: Option<&Path>) -> String {
    path.map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Loads and saves `BuildSettings`.
pub struct SettingsManager;

impl SettingsManager {
    /// Load settings from `path`, returning defaults when the file is missing
    /// or unparseable.
    pub fn load_from(path: &Path) -> Result<BuildSettings, ConfigError> {
        match loader::load_settings_from_file(path) {
            Ok(mut settings) => {
                let reset = settings.sanitize();
                if !reset.is_empty() {
                    log::debug!("Reset stale settings: {}", reset.join(", "));
                }
                Ok(settings)
            }
            Err(ConfigError::FileNotFound(_)) => Ok(BuildSettings::default()),
            Err(ConfigError::InvalidJson(e)) => {
                log::warn!(
                    "Failed to parse {}, falling back to defaults: {}",
                    path.display(),
                    e
                );
                Ok(BuildSettings::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn save_to(settings: &BuildSettings, path: &Path) -> Result<(), ConfigError> {
        loader::save_settings_to_file(settings, path)
    }
}
