//! Build prerequisite checks.
//!
//! Silent, read-only inspection of the host: locates every tool named by the
//! toolchain profile, checks SDK files under the application root and
//! enforces minimum versions. Checks always run in profile order (tools,
//! then SDK entries) so the same environment always yields the same report.

use crate::config::toolchain::{self, SdkSpec, ToolSpec, ToolchainProfile};
use crate::models::{BuildMode, BuildPrereqReport, ToolStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)+)").expect("version regex"));

/// Where environment-variable overrides are read from.
#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Fixed(BTreeMap<String, OsString>),
}

/// Prerequisite checker bound to one search path.
#[derive(Debug, Clone)]
pub struct PrereqChecker {
    search_path: Vec<PathBuf>,
    env: EnvSource,
    overrides: BTreeMap<String, PathBuf>,
}

impl Default for PrereqChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl PrereqChecker {
    /// Checker using the process `PATH` and environment.
    pub fn new() -> Self {
        PrereqChecker {
            search_path: super::process_search_path(),
            env: EnvSource::Process,
            overrides: BTreeMap::new(),
        }
    }

    /// Checker with an explicit search path and no environment overrides.
    pub fn with_search_path(search_path: Vec<PathBuf>) -> Self {
        PrereqChecker {
            search_path,
            env: EnvSource::Fixed(BTreeMap::new()),
            overrides: BTreeMap::new(),
        }
    }

    /// Replace the environment seen by tool `env` lookups.
    pub fn with_env(mut self, env: BTreeMap<String, OsString>) -> Self {
        self.env = EnvSource::Fixed(env);
        self
    }

    /// Explicit tool locations (binary or directory) keyed by tool name.
    pub fn with_tool_overrides(mut self, overrides: BTreeMap<String, PathBuf>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    fn env_var(&self, key: &str) -> Option<OsString> {
        match &self.env {
            EnvSource::Process => std::env::var_os(key),
            EnvSource::Fixed(map) => map.get(key).cloned(),
        }
        .filter(|v| !v.is_empty())
    }

    /// Load the app root's toolchain profile and check it for `mode`.
    pub fn check(&self, app_root: &Path, mode: BuildMode) -> BuildPrereqReport {
        match toolchain::load_profile(app_root) {
            Ok(profile) => self.check_with_profile(app_root, mode, &profile),
            Err(e) => {
                let status = ToolStatus {
                    name: "Toolchain profile".to_string(),
                    required: true,
                    found: Some(app_root.join(toolchain::PROFILE_FILE_NAME)),
                    version: None,
                    problem: Some(e.to_string()),
                };
                let message = failure_message(&[&status], &[]);
                BuildPrereqReport {
                    ok: false,
                    message,
                    checks: vec![status],
                }
            }
        }
    }

    /// Check an already loaded profile.
    pub fn check_with_profile(
        &self,
        app_root: &Path,
        mode: BuildMode,
        profile: &ToolchainProfile,
    ) -> BuildPrereqReport {
        let mut checks: Vec<ToolStatus> = Vec::new();
        let mut guidance: Vec<String> = Vec::new();

        for tool in &profile.tools {
            let status = self.check_tool(app_root, mode, tool);
            if status.required && !status.is_satisfied() {
                if let Some(g) = &tool.guidance {
                    if !guidance.contains(g) {
                        guidance.push(g.clone());
                    }
                }
            }
            checks.push(status);
        }
        for sdk in &profile.sdks {
            let status = check_sdk(app_root, sdk);
            if !status.is_satisfied() {
                if let Some(g) = &sdk.guidance {
                    if !guidance.contains(g) {
                        guidance.push(g.clone());
                    }
                }
            }
            checks.push(status);
        }

        let failed: Vec<&ToolStatus> = checks
            .iter()
            .filter(|c| c.required && !c.is_satisfied())
            .collect();
        let optional_missing: Vec<&ToolStatus> = checks
            .iter()
            .filter(|c| !c.required && !c.is_satisfied())
            .collect();

        let (ok, message) = if !failed.is_empty() {
            (false, failure_message(&failed, &guidance))
        } else if !optional_missing.is_empty() {
            let mut msg = String::from("Optional tools not found:\n");
            for status in &optional_missing {
                msg.push_str(&format!(" - {}\n", status.name));
            }
            msg.push_str("\nYou can still build, but some features are disabled.");
            (true, msg)
        } else {
            (true, String::new())
        };

        BuildPrereqReport {
            ok,
            message,
            checks,
        }
    }

    fn check_tool(&self, app_root: &Path, mode: BuildMode, tool: &ToolSpec) -> ToolStatus {
        let required = tool.is_required_in(mode);
        let mut status = ToolStatus {
            name: tool.name.clone(),
            required,
            found: None,
            version: None,
            problem: None,
        };

        let Some(path) = self.locate_tool(app_root, tool) else {
            status.problem = Some(format!("not found ({})", describe_lookup(tool)));
            return status;
        };
        status.found = Some(path.clone());

        if let Some(min) = &tool.min_version {
            match query_version(&path, &tool.version_args) {
                Some(found) => {
                    if compare_versions(&found, min) == Ordering::Less {
                        status.problem =
                            Some(format!("version {} is older than required {}", found, min));
                    }
                    status.version = Some(found);
                }
                None => {
                    status.problem = Some(format!(
                        "could not determine version (need {} or newer)",
                        min
                    ));
                }
            }
        }
        status
    }

    /// Resolve a tool: explicit override, environment variable, search path,
    /// then vendored directories.
    pub fn locate_tool(&self, app_root: &Path, tool: &ToolSpec) -> Option<PathBuf> {
        if let Some(location) = self.overrides.get(&tool.name) {
            if let Some(found) = super::resolve_explicit_tool(location, &tool.binaries) {
                return Some(found);
            }
        }
        if let Some(var) = &tool.env {
            if let Some(value) = self.env_var(var) {
                if let Some(found) = super::resolve_explicit_tool(Path::new(&value), &tool.binaries)
                {
                    return Some(found);
                }
            }
        }
        if let Some(found) = super::find_on_path(&self.search_path, &tool.binaries) {
            return Some(found);
        }
        tool.vendored
            .iter()
            .find_map(|dir| super::find_in_dir(&app_root.join(dir), &tool.binaries))
    }
}

fn check_sdk(app_root: &Path, sdk: &SdkSpec) -> ToolStatus {
    let found = sdk
        .paths
        .iter()
        .map(|p| app_root.join(p))
        .find(|p| p.exists());
    let problem = match found {
        Some(_) => None,
        None => Some(format!("missing (expected {})", sdk.paths.join(" or "))),
    };
    ToolStatus {
        name: sdk.name.clone(),
        required: true,
        found,
        version: None,
        problem,
    }
}

fn describe_lookup(tool: &ToolSpec) -> String {
    let mut places = vec![format!("PATH: {}", tool.binaries.join(", "))];
    if let Some(var) = &tool.env {
        places.push(format!("${}", var));
    }
    if !tool.vendored.is_empty() {
        places.push(format!("vendored: {}", tool.vendored.join(", ")));
    }
    places.join("; ")
}

fn failure_message(failed: &[&ToolStatus], guidance: &[String]) -> String {
    let mut msg = String::from("Missing build prerequisites:\n");
    for status in failed {
        match &status.problem {
            Some(problem) => msg.push_str(&format!(" - {}: {}\n", status.name, problem)),
            None => msg.push_str(&format!(" - {}\n", status.name)),
        }
    }
    if !guidance.is_empty() {
        msg.push_str("\nSetup guidance:\n");
        for line in guidance {
            msg.push_str(&format!(" - {}\n", line));
        }
    }
    msg.push_str("\nAfter installing, restart the editor and try again.");
    msg
}

/// Run `binary <args>` and pull the first dotted version number from its output.
pub fn query_version(binary: &Path, args: &[String]) -> Option<String> {
    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .ok()?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push('\n');
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    parse_version(&text)
}

pub fn parse_version(text: &str) -> Option<String> {
    VERSION_RE
        .captures(text)
        .map(|caps| caps[1].to_string())
}

/// Component-wise numeric comparison; missing components count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| {
                part.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse::<u64>()
                    .unwrap_or(0)
            })
            .collect()
    };
    let (pa, pb) = (parse(a), parse(b));
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let x = pa.get(i).copied().unwrap_or(0);
        let y = pb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Check `app_root` with the process environment in release mode.
pub fn check_prereqs(app_root: &Path) -> BuildPrereqReport {
    PrereqChecker::new().check(app_root, BuildMode::Release)
}
