//! Step 4: compile the player runtime with the profile's toolchain steps.

use super::prep::{Toolchain, BUILD_DIR};
use crate::config::toolchain::expand_placeholders;
use crate::error::BuildError;
use crate::models::BuildRequest;
use crate::orchestrator::executor::ToolRunner;
use crate::orchestrator::state::StepReporter;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Placeholder values shared by every step of one build.
pub fn base_vars<'a>(
    request: &BuildRequest,
    toolchain: &Toolchain,
    scratch: &Path,
) -> BTreeMap<&'a str, String> {
    let runtime = &toolchain.profile.runtime;
    let mut vars = BTreeMap::new();
    vars.insert("app_root", request.app_root.display().to_string());
    vars.insert("source", request.app_root.join(&runtime.source).display().to_string());
    vars.insert("scratch", scratch.display().to_string());
    vars.insert("build_dir", scratch.join(BUILD_DIR).display().to_string());
    vars.insert("project", request.project_path.display().to_string());
    vars.insert("output", request.artifact_path().display().to_string());
    vars.insert("jobs", num_cpus::get().to_string());
    if let Some(target) = runtime.target_for(request.target_kind) {
        vars.insert("runtime_target", target.to_string());
    }
    vars
}

/// Run the compile steps for this request and return the runtime binary.
pub fn compile_runtime(
    request: &BuildRequest,
    toolchain: &Toolchain,
    scratch: &Path,
    runner: &ToolRunner,
    reporter: &StepReporter<'_>,
) -> Result<PathBuf, BuildError> {
    let runtime = &toolchain.profile.runtime;
    let target = runtime.target_for(request.target_kind).ok_or_else(|| {
        BuildError::ToolchainFailure {
            step: "Select runtime target".to_string(),
            message: format!("no runtime target is configured for '{}'", request.target_kind),
        }
    })?;
    reporter.line(&format!("Runtime target: {}", target));

    let vars = base_vars(request, toolchain, scratch);
    let steps = toolchain.profile.steps_for(request.mode, request.target_kind);
    for step in steps {
        let program = toolchain
            .tool_path(&step.tool)
            .ok_or_else(|| BuildError::ToolchainFailure {
                step: step.name.clone(),
                message: format!("tool '{}' was not found", step.tool),
            })?;
        let args: Vec<String> = step
            .args
            .iter()
            .map(|a| expand_placeholders(a, &vars))
            .collect();

        reporter.line(&format!("  {}...", step.name));
        runner.run(&step.name, program, &args, scratch, reporter.sink())?;
        reporter.line(&format!("  {}: done", step.name));
    }

    locate_runtime_binary(&runtime.artifacts, &vars, scratch)
}

/// First existing candidate wins. Relative candidates are resolved against
/// the scratch directory.
pub fn locate_runtime_binary(
    candidates: &[String],
    vars: &BTreeMap<&str, String>,
    scratch: &Path,
) -> Result<PathBuf, BuildError> {
    let expanded: Vec<PathBuf> = candidates
        .iter()
        .map(|c| {
            let path = PathBuf::from(expand_placeholders(c, vars));
            if path.is_absolute() {
                path
            } else {
                scratch.join(path)
            }
        })
        .collect();

    if let Some(found) = expanded.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }

    let mut message = String::from("runtime binary not found. Looked in:");
    for candidate in &expanded {
        message.push_str(&format!("\n  {}", candidate.display()));
    }
    Err(BuildError::ToolchainFailure {
        step: "Locate runtime binary".to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_locate_runtime_binary_first_hit() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("build/Release")).unwrap();
        fs::write(temp.path().join("build/Release/demo_player"), b"exe").unwrap();

        let mut vars = BTreeMap::new();
        vars.insert("runtime_target", "demo_player".to_string());
        let candidates = vec![
            "build/{runtime_target}".to_string(),
            "build/Release/{runtime_target}".to_string(),
        ];
        let found = locate_runtime_binary(&candidates, &vars, temp.path()).unwrap();
        assert_eq!(found, temp.path().join("build/Release/demo_player"));
    }

    #[test]
    fn test_locate_runtime_binary_lists_candidates() {
        let temp = tempfile::tempdir().unwrap();
        let mut vars = BTreeMap::new();
        vars.insert("runtime_target", "demo_micro".to_string());
        let candidates = vec!["build/{runtime_target}".to_string(), "out/{runtime_target}.exe".to_string()];

        let err = locate_runtime_binary(&candidates, &vars, temp.path()).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Locate runtime binary failed: runtime binary not found"));
        assert!(text.contains("build/demo_micro"));
        assert!(text.contains("out/demo_micro.exe"));
    }
}
