//! Integration tests for the config module
//!
//! Covers the two configuration sources working together:
//! - toolchain: profile loading from an application root
//! - SettingsManager: persisted build options feeding a BuildRequest

use demoforge::config::toolchain::{load_profile, PROFILE_FILE_NAME};
use demoforge::config::{BuildSettings, SettingsManager};
use demoforge::error::ConfigError;
use demoforge::models::{BuildMode, BuildRequest, BuildTargetKind, SizeTargetPreset};
use std::fs;
use std::path::PathBuf;

const PROFILE: &str = r#"
[[tool]]
name = "ninja"
binaries = ["ninja"]
min_version = "1.10"

[[tool]]
name = "upx"
binaries = ["upx"]
required_in = ["compressed"]

[runtime]
source = "player"
artifacts = ["build/{runtime_target}"]

[runtime.targets]
selfcontained = "player"
micro = "player_tiny"

[[step]]
name = "Build"
tool = "ninja"
args = ["-C", "{build_dir}", "{runtime_target}", "-j{jobs}"]

[[step]]
name = "Strip"
tool = "ninja"
args = ["-C", "{build_dir}", "strip"]
targets = ["micro"]

[compressor]
tool = "upx"
args = ["--best", "{input}"]
"#;

#[test]
fn test_profile_loaded_from_app_root() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join(PROFILE_FILE_NAME), PROFILE).unwrap();

    let profile = load_profile(temp.path()).unwrap();
    assert_eq!(profile.tools.len(), 2);
    assert_eq!(profile.runtime.target_for(BuildTargetKind::MicroDemo), Some("player_tiny"));
    // unmapped kinds use the self-contained target
    assert_eq!(profile.runtime.target_for(BuildTargetKind::PackagedDemo), Some("player"));

    let names = |kind: BuildTargetKind| {
        profile
            .steps_for(BuildMode::Release, kind)
            .iter()
            .map(|s| s.name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(BuildTargetKind::SelfContainedDemo), vec!["Build"]);
    assert_eq!(names(BuildTargetKind::MicroDemo), vec!["Build", "Strip"]);
}

#[test]
fn test_malformed_profile_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join(PROFILE_FILE_NAME), "[[tool]\nname = ").unwrap();
    assert!(matches!(load_profile(temp.path()), Err(ConfigError::InvalidToml(_))));
}

#[test]
fn test_profile_with_unknown_placeholder_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(
        temp.path().join(PROFILE_FILE_NAME),
        PROFILE.replace("{jobs}", "{threads}"),
    )
    .unwrap();
    match load_profile(temp.path()) {
        Err(ConfigError::ValidationFailed(msg)) => assert!(msg.contains("{threads}")),
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[test]
fn test_settings_saved_and_applied_to_request() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nested").join("settings.json");
    let tool = temp.path().join("upx");
    fs::write(&tool, "").unwrap();

    let mut settings = BuildSettings::default();
    settings.build.target_kind = BuildTargetKind::MicroDemo;
    settings.build.mode = BuildMode::ReleaseCompressed;
    settings.build.size_target = SizeTargetPreset::K64;
    settings.build.scratch_root = temp.path().to_string_lossy().into_owned();
    settings
        .build
        .tool_overrides
        .insert("upx".to_string(), tool.to_string_lossy().into_owned());
    SettingsManager::save_to(&settings, &path).unwrap();

    let loaded = SettingsManager::load_from(&path).unwrap();
    assert_eq!(loaded, settings);

    let mut request = BuildRequest::new("/app", "/demo.json", "/out/demo");
    loaded.apply_to(&mut request);
    assert_eq!(request.target_kind, BuildTargetKind::MicroDemo);
    assert_eq!(request.mode, BuildMode::ReleaseCompressed);
    assert_eq!(request.size_target, SizeTargetPreset::K64);
    assert_eq!(request.scratch_root, Some(temp.path().to_path_buf()));
    assert_eq!(request.tool_overrides.get("upx"), Some(&tool));
}

#[test]
fn test_missing_settings_file_gives_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let settings = SettingsManager::load_from(&temp.path().join("settings.json")).unwrap();
    assert_eq!(settings, BuildSettings::default());

    let mut request = BuildRequest::new("/app", "/demo.json", "/out/demo");
    settings.apply_to(&mut request);
    assert_eq!(request.target_kind, BuildTargetKind::SelfContainedDemo);
    assert_eq!(request.solution_root, None::<PathBuf>);
}

#[test]
fn test_settings_require_json_extension() {
    let temp = tempfile::tempdir().unwrap();
    let result = SettingsManager::save_to(&BuildSettings::default(), &temp.path().join("settings.yaml"));
    assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
}
