//! Steps 1-3: prerequisites, project input and the scratch workspace.

use crate::config::toolchain::{self, ToolchainProfile};
use crate::error::{BuildError, ConfigError, ProjectError};
use crate::models::{BuildPrereqReport, BuildRequest};
use crate::project::{self, Project};
use crate::system::PrereqChecker;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch subdirectory the runtime is compiled into.
pub const BUILD_DIR: &str = "build";
/// Scratch subdirectory holding the files that go into the pack.
pub const PACK_DIR: &str = "pack";
/// Scratch subdirectory for shader compiler inputs and outputs.
pub const SHADER_DIR: &str = "shaders";

/// Loaded profile plus the tools the prerequisite check located.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub profile: ToolchainProfile,
    pub report: BuildPrereqReport,
    tools: BTreeMap<String, PathBuf>,
}

impl Toolchain {
    pub fn new(profile: ToolchainProfile, report: BuildPrereqReport) -> Self {
        let tools = report
            .checks
            .iter()
            .filter(|c| c.is_satisfied())
            .filter_map(|c| c.found.clone().map(|p| (c.name.clone(), p)))
            .collect();
        Toolchain {
            profile,
            report,
            tools,
        }
    }

    /// Resolved binary of a profile tool, if it was found.
    pub fn tool_path(&self, name: &str) -> Option<&Path> {
        self.tools.get(name).map(PathBuf::as_path)
    }
}

/// Load the toolchain profile and check it against the host.
///
/// The request's tool overrides take precedence over the checker's own.
pub fn check_prerequisites(
    checker: &PrereqChecker,
    request: &BuildRequest,
) -> Result<Toolchain, BuildError> {
    let profile = toolchain::load_profile(&request.app_root).map_err(|e| {
        BuildError::PrereqMissing(format!(
            "Missing build prerequisites:\n - {}: {}\n\nAfter installing, restart the editor and try again.",
            toolchain::PROFILE_FILE_NAME,
            profile_error_detail(&e)
        ))
    })?;

    let report = if request.tool_overrides.is_empty() {
        checker.check_with_profile(&request.app_root, request.mode, &profile)
    } else {
        checker
            .clone()
            .with_tool_overrides(request.tool_overrides.clone())
            .check_with_profile(&request.app_root, request.mode, &profile)
    };

    if !report.ok {
        return Err(BuildError::PrereqMissing(report.message));
    }
    Ok(Toolchain::new(profile, report))
}

fn profile_error_detail(err: &ConfigError) -> String {
    match err {
        ConfigError::InvalidToml(e) => e.message().to_string(),
        ConfigError::ValidationFailed(msg) | ConfigError::FileNotFound(msg) => msg.clone(),
        ConfigError::IoError(e) => e.to_string(),
        ConfigError::InvalidJson(e) => e.to_string(),
    }
}

/// Load and validate the project description named by the request.
pub fn validate_project_input(request: &BuildRequest) -> Result<Project, BuildError> {
    let path = &request.project_path;
    if !path.exists() {
        return Err(ProjectError::NotFound(path.clone()).into());
    }
    if !path.is_file() {
        return Err(ProjectError::Invalid(format!("{} is not a file", path.display())).into());
    }
    Ok(project::load_and_validate(path)?)
}

/// Create the unique per-build scratch directory with its subdirectories.
/// Dropping the returned `TempDir` removes everything.
pub fn prepare_scratch(request: &BuildRequest) -> Result<TempDir, BuildError> {
    let root = request
        .scratch_root
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    fs::create_dir_all(&root).map_err(|e| {
        BuildError::PackagingFailure(format!(
            "could not create scratch root {}: {}",
            root.display(),
            e
        ))
    })?;

    let scratch = tempfile::Builder::new()
        .prefix("demoforge-build-")
        .tempdir_in(&root)
        .map_err(|e| {
            BuildError::PackagingFailure(format!(
                "could not create scratch workspace under {}: {}",
                root.display(),
                e
            ))
        })?;

    for sub in [BUILD_DIR, PACK_DIR, SHADER_DIR] {
        let dir = scratch.path().join(sub);
        fs::create_dir_all(&dir).map_err(|e| {
            BuildError::PackagingFailure(format!("could not create {}: {}", dir.display(), e))
        })?;
    }
    log::debug!("Scratch workspace: {}", scratch.path().display());
    Ok(scratch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_project_is_invalid_input() {
        let temp = tempfile::tempdir().unwrap();
        let request = BuildRequest::new(temp.path(), temp.path().join("nope.json"), temp.path().join("out"));
        let err = validate_project_input(&request).unwrap_err();
        assert!(matches!(err, BuildError::InvalidProjectInput(_)));
        assert!(err.to_string().contains("nope.json"));
    }

    #[test]
    fn test_directory_is_not_a_project() {
        let temp = tempfile::tempdir().unwrap();
        let request = BuildRequest::new(temp.path(), temp.path(), temp.path().join("out"));
        let err = validate_project_input(&request).unwrap_err();
        assert!(err.to_string().contains("is not a file"));
    }

    #[test]
    fn test_malformed_project_is_invalid_input() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("project.json");
        fs::write(&path, "{ not json").unwrap();
        let request = BuildRequest::new(temp.path(), &path, temp.path().join("out"));
        assert!(matches!(
            validate_project_input(&request),
            Err(BuildError::InvalidProjectInput(_))
        ));
    }

    #[test]
    fn test_scratch_is_unique_and_removed_on_drop() {
        let temp = tempfile::tempdir().unwrap();
        let mut request = BuildRequest::new(temp.path(), temp.path().join("p.json"), temp.path().join("out"));
        request.scratch_root = Some(temp.path().join("scratch"));

        let a = prepare_scratch(&request).unwrap();
        let b = prepare_scratch(&request).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().join(BUILD_DIR).is_dir());
        assert!(a.path().join(PACK_DIR).is_dir());

        let kept = a.path().to_path_buf();
        drop(a);
        assert!(!kept.exists());
        assert!(b.path().exists());
    }

    #[test]
    fn test_malformed_profile_names_the_profile_once() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join(toolchain::PROFILE_FILE_NAME), "[[tool]\nname = ").unwrap();
        let request = BuildRequest::new(temp.path(), temp.path().join("p.json"), temp.path().join("out"));
        let err = check_prerequisites(&PrereqChecker::with_search_path(Vec::new()), &request)
            .map(|_| ())
            .unwrap_err();

        let text = err.to_string();
        assert_eq!(text.matches("Missing build prerequisites").count(), 1, "{}", text);
        assert!(text.contains(" - toolchain.toml: "), "{}", text);
        assert!(!text.contains("Invalid TOML in toolchain profile"), "{}", text);
    }

    #[test]
    fn test_dangling_shader_link_fails_validation() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("demo.json");
        fs::write(&path, r#"{"scenes":[{"name":"a","codePath":"missing.glsl"}]}"#).unwrap();
        let request = BuildRequest::new(temp.path(), &path, temp.path().join("out"));
        match validate_project_input(&request) {
            Err(BuildError::InvalidProjectInput(msg)) => assert!(msg.contains("missing.glsl"), "{}", msg),
            other => panic!("expected InvalidProjectInput, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_check_prerequisites_reports_missing_tool() {
        let temp = tempfile::tempdir().unwrap();
        let request = BuildRequest::new(temp.path(), temp.path().join("p.json"), temp.path().join("out"));
        let checker = PrereqChecker::with_search_path(Vec::new());
        match check_prerequisites(&checker, &request) {
            Err(BuildError::PrereqMissing(msg)) => {
                assert!(msg.starts_with("Missing build prerequisites:"));
                assert!(msg.contains("CMake"));
            }
            other => panic!("expected PrereqMissing, got {:?}", other.map(|_| ())),
        }
    }
}
