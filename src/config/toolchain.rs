//! Toolchain profile: which external tools a build needs and the step
//! pipeline that turns runtime sources into a player executable.
//!
//! Profiles are TOML. An application root may ship `toolchain.toml`; without
//! one the built-in profile (CMake + a C++ compiler) is used.
//!
//! ```toml
//! [[tool]]
//! name = "CMake"
//! binaries = ["cmake"]
//! vendored = ["tools/cmake/bin"]
//! env = "DEMOFORGE_CMAKE"
//! min_version = "3.16"
//!
//! [[step]]
//! name = "Configure runtime"
//! tool = "CMake"
//! args = ["-S", "{source}", "-B", "{build_dir}"]
//! ```

use crate::error::ConfigError;
use crate::models::{BuildMode, BuildTargetKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// File name looked up under the application root.
pub const PROFILE_FILE_NAME: &str = "toolchain.toml";

/// Placeholders the orchestrator knows how to expand.
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    "app_root",
    "source",
    "scratch",
    "build_dir",
    "project",
    "output",
    "runtime_target",
    "jobs",
    "compressor",
    "input",
    "entry",
    "profile",
];

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

fn default_version_args() -> Vec<String> {
    vec!["--version".to_string()]
}

/// An external tool the build may need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    /// Binary names tried in order, without platform extension.
    pub binaries: Vec<String>,
    /// Directories relative to the application root holding a bundled copy.
    #[serde(default)]
    pub vendored: Vec<String>,
    /// Environment variable that may point at the binary or its directory.
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub min_version: Option<String>,
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
    /// Modes (`release`, `compressed`) that require the tool. Absent means
    /// always required; an empty list means optional everywhere.
    #[serde(default)]
    pub required_in: Option<Vec<String>>,
    #[serde(default)]
    pub guidance: Option<String>,
}

impl ToolSpec {
    pub fn is_required_in(&self, mode: BuildMode) -> bool {
        match &self.required_in {
            None => true,
            Some(modes) => modes.iter().any(|m| m.eq_ignore_ascii_case(mode.key())),
        }
    }
}

/// SDK files that must exist under the application root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkSpec {
    pub name: String,
    /// Any one of these paths satisfies the check.
    pub paths: Vec<String>,
    #[serde(default)]
    pub guidance: Option<String>,
}

/// Where the player runtime sources live and what they produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Runtime source tree relative to the application root.
    pub source: String,
    /// Build target name per target kind key (`selfcontained`, `micro`, ...).
    pub targets: BTreeMap<String, String>,
    /// Candidate runtime binaries relative to the scratch dir, first hit wins.
    pub artifacts: Vec<String>,
}

impl RuntimeSpec {
    pub fn target_for(&self, kind: BuildTargetKind) -> Option<&str> {
        self.targets
            .get(kind.key())
            .or_else(|| self.targets.get(BuildTargetKind::SelfContainedDemo.key()))
            .map(String::as_str)
    }
}

/// One toolchain invocation in the compile pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    /// Name of a `[[tool]]` entry.
    pub tool: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Restrict to these modes (empty: all).
    #[serde(default)]
    pub modes: Vec<String>,
    /// Restrict to these target kinds (empty: all).
    #[serde(default)]
    pub targets: Vec<String>,
}

impl StepSpec {
    pub fn applies_to(&self, mode: BuildMode, kind: BuildTargetKind) -> bool {
        let mode_ok = self.modes.is_empty()
            || self.modes.iter().any(|m| m.eq_ignore_ascii_case(mode.key()));
        let kind_ok = self.targets.is_empty()
            || self.targets.iter().any(|t| t.eq_ignore_ascii_case(kind.key()));
        mode_ok && kind_ok
    }
}

/// Optional shader precompilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderCompilerSpec {
    pub tool: String,
    pub args: Vec<String>,
    #[serde(default = "default_scene_profile")]
    pub scene_profile: String,
    #[serde(default = "default_compute_profile")]
    pub compute_profile: String,
    /// Extension of compiled blobs inside the pack.
    #[serde(default = "default_blob_extension")]
    pub extension: String,
}

fn default_scene_profile() -> String {
    "frag".to_string()
}

fn default_compute_profile() -> String {
    "comp".to_string()
}

fn default_blob_extension() -> String {
    "spv".to_string()
}

/// Executable compressor run on the runtime binary in compressed mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressorSpec {
    pub tool: String,
    pub args: Vec<String>,
}

/// Complete toolchain description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainProfile {
    #[serde(rename = "tool", default)]
    pub tools: Vec<ToolSpec>,
    #[serde(rename = "sdk", default)]
    pub sdks: Vec<SdkSpec>,
    pub runtime: RuntimeSpec,
    #[serde(rename = "step", default)]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub shader_compiler: Option<ShaderCompilerSpec>,
    #[serde(default)]
    pub compressor: Option<CompressorSpec>,
}

impl ToolchainProfile {
    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Steps to run for this mode and target, in profile order.
    pub fn steps_for(&self, mode: BuildMode, kind: BuildTargetKind) -> Vec<&StepSpec> {
        self.steps
            .iter()
            .filter(|s| s.applies_to(mode, kind))
            .collect()
    }

    /// Structural checks: unique tool names, steps naming known tools, and
    /// only known placeholders.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for tool in &self.tools {
            if tool.binaries.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Tool '{}' lists no binaries",
                    tool.name
                )));
            }
            if !names.insert(tool.name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Tool '{}' is declared twice",
                    tool.name
                )));
            }
        }

        let mut referenced: Vec<(&str, &str, &[String])> = self
            .steps
            .iter()
            .map(|s| (s.name.as_str(), s.tool.as_str(), s.args.as_slice()))
            .collect();
        if let Some(sc) = &self.shader_compiler {
            referenced.push(("shader compiler", sc.tool.as_str(), sc.args.as_slice()));
        }
        if let Some(c) = &self.compressor {
            referenced.push(("compressor", c.tool.as_str(), c.args.as_slice()));
        }

        for (owner, tool, args) in referenced {
            if !names.contains(tool) {
                return Err(ConfigError::ValidationFailed(format!(
                    "'{}' uses undeclared tool '{}'",
                    owner, tool
                )));
            }
            for arg in args {
                check_placeholders(owner, arg)?;
            }
        }
        for artifact in &self.runtime.artifacts {
            check_placeholders("runtime artifacts", artifact)?;
        }
        Ok(())
    }
}

fn check_placeholders(owner: &str, template: &str) -> Result<(), ConfigError> {
    for cap in PLACEHOLDER_RE.captures_iter(template) {
        let key = &cap[1];
        if !KNOWN_PLACEHOLDERS.contains(&key) {
            return Err(ConfigError::ValidationFailed(format!(
                "'{}' uses unknown placeholder {{{}}}",
                owner, key
            )));
        }
    }
    Ok(())
}

/// Replace `{key}` placeholders with their values. Keys without a value stay
/// untouched.
pub fn expand_placeholders(template: &str, vars: &BTreeMap<&str, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

impl Default for ToolchainProfile {
    fn default() -> Self {
        let mut targets = BTreeMap::new();
        targets.insert("selfcontained".to_string(), "demo_player".to_string());
        targets.insert("packaged".to_string(), "demo_player".to_string());
        targets.insert("screensaver".to_string(), "demo_screensaver".to_string());
        targets.insert("micro".to_string(), "demo_micro".to_string());

        ToolchainProfile {
            tools: vec![
                ToolSpec {
                    name: "CMake".to_string(),
                    binaries: vec!["cmake".to_string()],
                    vendored: vec!["tools/cmake/bin".to_string()],
                    env: Some("DEMOFORGE_CMAKE".to_string()),
                    min_version: Some("3.16".to_string()),
                    version_args: default_version_args(),
                    required_in: None,
                    guidance: Some(
                        "Install CMake 3.16 or newer and make sure it is on PATH.".to_string(),
                    ),
                },
                ToolSpec {
                    name: "C++ compiler".to_string(),
                    binaries: vec!["c++".to_string(), "clang++".to_string(), "g++".to_string()],
                    vendored: vec!["tools/llvm/bin".to_string()],
                    env: Some("DEMOFORGE_CXX".to_string()),
                    min_version: None,
                    version_args: default_version_args(),
                    required_in: None,
                    guidance: Some("Install a C++17 compiler (clang or gcc).".to_string()),
                },
                ToolSpec {
                    name: "Shader compiler".to_string(),
                    binaries: vec!["glslangValidator".to_string()],
                    vendored: vec!["tools/glslang/bin".to_string(), "bin".to_string()],
                    env: Some("DEMOFORGE_SHADERC".to_string()),
                    min_version: None,
                    version_args: default_version_args(),
                    required_in: Some(Vec::new()),
                    guidance: Some(
                        "Install glslang to ship precompiled shaders (optional).".to_string(),
                    ),
                },
                ToolSpec {
                    name: "Executable compressor".to_string(),
                    binaries: vec!["upx".to_string()],
                    vendored: vec!["tools/upx".to_string()],
                    env: Some("DEMOFORGE_COMPRESSOR".to_string()),
                    min_version: None,
                    version_args: default_version_args(),
                    required_in: Some(vec!["compressed".to_string()]),
                    guidance: Some(
                        "Install UPX or point DEMOFORGE_COMPRESSOR at a compressor binary."
                            .to_string(),
                    ),
                },
            ],
            sdks: vec![SdkSpec {
                name: "Runtime sources".to_string(),
                paths: vec!["runtime/CMakeLists.txt".to_string()],
                guidance: Some(
                    "Reinstall demoforge: the player runtime sources are missing.".to_string(),
                ),
            }],
            runtime: RuntimeSpec {
                source: "runtime".to_string(),
                targets,
                artifacts: vec![
                    "build/{runtime_target}".to_string(),
                    "build/bin/{runtime_target}".to_string(),
                    "build/Release/{runtime_target}".to_string(),
                    "build/{runtime_target}.exe".to_string(),
                    "build/Release/{runtime_target}.exe".to_string(),
                ],
            },
            steps: vec![
                StepSpec {
                    name: "Configure runtime".to_string(),
                    tool: "CMake".to_string(),
                    args: vec![
                        "-S".to_string(),
                        "{source}".to_string(),
                        "-B".to_string(),
                        "{build_dir}".to_string(),
                        "-DCMAKE_BUILD_TYPE=Release".to_string(),
                    ],
                    modes: Vec::new(),
                    targets: Vec::new(),
                },
                StepSpec {
                    name: "Build runtime target".to_string(),
                    tool: "CMake".to_string(),
                    args: vec![
                        "--build".to_string(),
                        "{build_dir}".to_string(),
                        "--target".to_string(),
                        "{runtime_target}".to_string(),
                        "--config".to_string(),
                        "Release".to_string(),
                        "--parallel".to_string(),
                        "{jobs}".to_string(),
                    ],
                    modes: Vec::new(),
                    targets: Vec::new(),
                },
            ],
            shader_compiler: Some(ShaderCompilerSpec {
                tool: "Shader compiler".to_string(),
                // project shaders are HLSL: -D switches glslang to its HLSL front end
                args: vec![
                    "-V".to_string(),
                    "-D".to_string(),
                    "-S".to_string(),
                    "{profile}".to_string(),
                    "-e".to_string(),
                    "{entry}".to_string(),
                    "-o".to_string(),
                    "{output}".to_string(),
                    "{input}".to_string(),
                ],
                scene_profile: default_scene_profile(),
                compute_profile: default_compute_profile(),
                extension: default_blob_extension(),
            }),
            compressor: Some(CompressorSpec {
                tool: "Executable compressor".to_string(),
                args: vec!["--best".to_string(), "-q".to_string(), "{input}".to_string()],
            }),
        }
    }
}

/// Parse and validate a profile from TOML text.
pub fn parse_profile(content: &str) -> Result<ToolchainProfile, ConfigError> {
    let profile: ToolchainProfile = toml::from_str(content)?;
    profile.validate()?;
    Ok(profile)
}

/// Load `<app_root>/toolchain.toml`, or the built-in profile when the app
/// root has none.
pub fn load_profile(app_root: &Path) -> Result<ToolchainProfile, ConfigError> {
    let path = app_root.join(PROFILE_FILE_NAME);
    match fs::read_to_string(&path) {
        Ok(content) => {
            log::debug!("Loading toolchain profile from {}", path.display());
            parse_profile(&content)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No {} under {}, using built-in profile", PROFILE_FILE_NAME, app_root.display());
            Ok(ToolchainProfile::default())
        }
        Err(e) => Err(ConfigError::IoError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[tool]]
name = "builder"
binaries = ["build-runtime"]

[runtime]
source = "runtime"
targets = { selfcontained = "player" }
artifacts = ["out/{runtime_target}"]

[[step]]
name = "Build runtime"
tool = "builder"
args = ["{source}", "{scratch}/out/{runtime_target}"]
"#;

    #[test]
    fn test_default_profile_is_valid() {
        assert!(ToolchainProfile::default().validate().is_ok());
    }

    #[test]
    fn test_default_shader_compiler_reads_hlsl() {
        let profile = ToolchainProfile::default();
        let sc = profile.shader_compiler.as_ref().unwrap();
        let tool = profile.tool(&sc.tool).unwrap();
        assert_eq!(tool.binaries, vec!["glslangValidator"]);
        let hlsl = sc.args.iter().position(|a| a == "-D").unwrap();
        let stage = sc.args.iter().position(|a| a == "-S").unwrap();
        assert!(hlsl < stage);
        assert_eq!(sc.args[stage + 1], "{profile}");
    }

    #[test]
    fn test_parse_minimal_profile() {
        let profile = parse_profile(MINIMAL).unwrap();
        assert_eq!(profile.tools.len(), 1);
        assert_eq!(profile.tools[0].version_args, vec!["--version"]);
        assert!(profile.tools[0].is_required_in(BuildMode::Release));
        assert!(profile.shader_compiler.is_none());
        assert_eq!(profile.runtime.target_for(BuildTargetKind::MicroDemo), Some("player"));
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let bad = MINIMAL.replace("{source}", "{sauce}");
        match parse_profile(&bad) {
            Err(ConfigError::ValidationFailed(msg)) => assert!(msg.contains("{sauce}")),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_undeclared_tool_rejected() {
        let bad = MINIMAL.replace("tool = \"builder\"", "tool = \"make\"");
        assert!(matches!(parse_profile(&bad), Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_step_filters() {
        let step = StepSpec {
            name: "strip".into(),
            tool: "builder".into(),
            args: vec![],
            modes: vec!["compressed".into()],
            targets: vec![],
        };
        assert!(!step.applies_to(BuildMode::Release, BuildTargetKind::SelfContainedDemo));
        assert!(step.applies_to(BuildMode::ReleaseCompressed, BuildTargetKind::MicroDemo));
    }

    #[test]
    fn test_expand_placeholders_leaves_unknown() {
        let mut vars = BTreeMap::new();
        vars.insert("jobs", "8".to_string());
        assert_eq!(expand_placeholders("-j{jobs} {other}", &vars), "-j8 {other}");
    }

    #[test]
    fn test_optional_tool() {
        let profile = ToolchainProfile::default();
        let shader = profile.tool("Shader compiler").unwrap();
        assert!(!shader.is_required_in(BuildMode::Release));
        let compressor = profile.tool("Executable compressor").unwrap();
        assert!(!compressor.is_required_in(BuildMode::Release));
        assert!(compressor.is_required_in(BuildMode::ReleaseCompressed));
    }

    #[test]
    fn test_missing_profile_falls_back_to_default() {
        let temp = tempfile::tempdir().unwrap();
        let profile = load_profile(temp.path()).unwrap();
        assert_eq!(profile, ToolchainProfile::default());
    }
}
