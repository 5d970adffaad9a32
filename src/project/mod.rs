//! Project description model.
//!
//! A project is a JSON document listing scenes (shader code plus texture
//! bindings, post effects and compute effects), audio clips and the tracker
//! timeline that sequences them. Shader code is either inline or linked from
//! a file, either through `codePath` or an inline value of the form
//! `@file:relative/path.glsl`.

pub mod assets;
pub mod micro;

use crate::error::ProjectError;
use crate::graphics::compute::ComputeEffectType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix marking an inline `code` value as a file link.
pub const FILE_LINK_PREFIX: &str = "@file:";

/// Number of texture channels a scene can bind.
pub const MAX_CHANNELS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindType {
    Scene,
    File,
}

impl Default for BindType {
    fn default() -> Self {
        BindType::File
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureType {
    Texture2D,
    TextureCube,
    Texture3D,
}

impl Default for TextureType {
    fn default() -> Self {
        TextureType::Texture2D
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Binding {
    pub channel: u32,
    pub enabled: bool,
    pub bind_type: BindType,
    pub source_index: i32,
    pub path: String,
    #[serde(rename = "type")]
    pub texture_type: TextureType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PostFx {
    pub name: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precompiled: Option<String>,
}

impl Default for PostFx {
    fn default() -> Self {
        PostFx {
            name: String::new(),
            enabled: true,
            code: None,
            code_path: None,
            precompiled: None,
        }
    }
}

fn default_entry_point() -> String {
    "main".to_string()
}

/// Compute effect attached to a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComputeEffectDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub effect_type: ComputeEffectType,
    pub enabled: bool,
    pub thread_group_x: u32,
    pub thread_group_y: u32,
    pub thread_group_z: u32,
    pub param0: f32,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precompiled: Option<String>,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_count: Option<u32>,
}

impl Default for ComputeEffectDesc {
    fn default() -> Self {
        ComputeEffectDesc {
            name: String::new(),
            effect_type: ComputeEffectType::Custom,
            enabled: true,
            thread_group_x: 8,
            thread_group_y: 8,
            thread_group_z: 1,
            param0: 0.0,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            code: None,
            code_path: None,
            precompiled: None,
            entry_point: default_entry_point(),
            history_count: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Scene {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_path: Option<String>,
    pub bindings: Vec<Binding>,
    pub output_type: String,
    pub postfx: Vec<PostFx>,
    pub compute: Vec<ComputeEffectDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precompiled: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioClip {
    pub name: String,
    pub path: String,
    pub bpm: f32,
    #[serde(rename = "type")]
    pub clip_type: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackRow {
    pub id: i32,
    /// Scene index, -1 for none.
    pub scene: i32,
    /// Transition preset stem, empty for a hard cut.
    pub trans_stem: String,
    pub dur: f32,
    pub offset: f32,
    /// Audio clip index, -1 for none.
    pub music: i32,
    /// One-shot clip index, -1 for none.
    pub oneshot: i32,
    pub stop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trans_path: Option<String>,
}

impl Default for TrackRow {
    fn default() -> Self {
        TrackRow {
            id: 0,
            scene: -1,
            trans_stem: String::new(),
            dur: 0.0,
            offset: 0.0,
            music: -1,
            oneshot: -1,
            stop: false,
            trans_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Track {
    pub name: String,
    pub bpm: f32,
    pub len: u32,
    pub rows: Vec<TrackRow>,
}

/// Root of a project description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub scenes: Vec<Scene>,
    pub audio: Vec<AudioClip>,
    pub track: Track,
    pub bpm: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_description: Option<String>,
}

impl Project {
    /// Reject projects the runtime cannot play. Reports the first problem.
    pub fn validate(&self) -> Result<(), ProjectError> {
        if self.scenes.is_empty() {
            return Err(ProjectError::Invalid("project has no scenes".to_string()));
        }
        let scene_count = self.scenes.len() as i32;
        let audio_count = self.audio.len() as i32;

        for (i, scene) in self.scenes.iter().enumerate() {
            let label = scene_label(i, scene);
            if !has_source(&scene.code, &scene.code_path, &scene.precompiled) {
                return Err(ProjectError::Invalid(format!("{} has no shader code", label)));
            }
            for binding in scene.bindings.iter().filter(|b| b.enabled) {
                if binding.channel >= MAX_CHANNELS {
                    return Err(ProjectError::Invalid(format!(
                        "{} binds channel {} (only 0-{} exist)",
                        label,
                        binding.channel,
                        MAX_CHANNELS - 1
                    )));
                }
                if binding.bind_type == BindType::Scene
                    && (binding.source_index < 0 || binding.source_index >= scene_count)
                {
                    return Err(ProjectError::Invalid(format!(
                        "{} channel {} references missing scene {}",
                        label, binding.channel, binding.source_index
                    )));
                }
            }
            for fx in &scene.postfx {
                if !has_source(&fx.code, &fx.code_path, &fx.precompiled) {
                    return Err(ProjectError::Invalid(format!(
                        "post effect '{}' in {} has no shader code",
                        fx.name, label
                    )));
                }
            }
            for effect in &scene.compute {
                if !has_source(&effect.code, &effect.code_path, &effect.precompiled) {
                    return Err(ProjectError::Invalid(format!(
                        "compute effect '{}' in {} has no shader code",
                        effect.name, label
                    )));
                }
                let threads = effect.thread_group_x as u64
                    * effect.thread_group_y as u64
                    * effect.thread_group_z as u64;
                if threads == 0 || threads > 1024 {
                    return Err(ProjectError::Invalid(format!(
                        "compute effect '{}' in {} has an invalid thread group {}x{}x{}",
                        effect.name,
                        label,
                        effect.thread_group_x,
                        effect.thread_group_y,
                        effect.thread_group_z
                    )));
                }
            }
        }

        for row in &self.track.rows {
            if row.scene < -1 || row.scene >= scene_count {
                return Err(ProjectError::Invalid(format!(
                    "track row {} references missing scene {}",
                    row.id, row.scene
                )));
            }
            if row.music < -1 || row.music >= audio_count {
                return Err(ProjectError::Invalid(format!(
                    "track row {} references missing audio clip {}",
                    row.id, row.music
                )));
            }
        }
        Ok(())
    }
}

impl Project {
    /// Every `codePath` or `@file:` link must name an existing file.
    /// Checked before anything is built so a dangling link never costs a
    /// runtime compile.
    pub fn check_linked_sources(&self, project_dir: &Path) -> Result<(), ProjectError> {
        let check = |owner: String, code: &Option<String>, code_path: &Option<String>| {
            match source_link(code.as_deref(), code_path.as_deref()) {
                Some(link) => {
                    let path = resolve_project_path(project_dir, link);
                    if path.is_file() {
                        Ok(())
                    } else {
                        Err(ProjectError::MissingSource { owner, path })
                    }
                }
                None => Ok(()),
            }
        };

        for (i, scene) in self.scenes.iter().enumerate() {
            let label = scene_label(i, scene);
            check(label.clone(), &scene.code, &scene.code_path)?;
            for fx in &scene.postfx {
                check(format!("post effect '{}' in {}", fx.name, label), &fx.code, &fx.code_path)?;
            }
            for effect in &scene.compute {
                check(
                    format!("compute effect '{}' in {}", effect.name, label),
                    &effect.code,
                    &effect.code_path,
                )?;
            }
        }
        Ok(())
    }
}

fn has_source(code: &Option<String>, code_path: &Option<String>, precompiled: &Option<String>) -> bool {
    let non_empty = |s: &Option<String>| s.as_deref().map_or(false, |v| !v.trim().is_empty());
    non_empty(code) || non_empty(code_path) || non_empty(precompiled)
}

pub(crate) fn scene_label(index: usize, scene: &Scene) -> String {
    if scene.name.is_empty() {
        format!("scene {}", index)
    } else {
        format!("scene {} ('{}')", index, scene.name)
    }
}

/// Load a project description without validating it.
pub fn load_project(path: &Path) -> Result<Project, ProjectError> {
    if !path.exists() {
        return Err(ProjectError::NotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| ProjectError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let project: Project = serde_json::from_str(&content)?;
    Ok(project)
}

/// Load, validate and check that linked shader sources exist.
pub fn load_and_validate(path: &Path) -> Result<Project, ProjectError> {
    let project = load_project(path)?;
    project.validate()?;
    project.check_linked_sources(&project_dir(path))?;
    Ok(project)
}

/// Directory relative links are resolved against.
pub fn project_dir(project_path: &Path) -> PathBuf {
    project_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve a path stored in the project relative to the project directory.
pub fn resolve_project_path(project_dir: &Path, stored: &str) -> PathBuf {
    let path = PathBuf::from(stored.replace('\\', "/"));
    if path.is_absolute() {
        path
    } else {
        project_dir.join(path)
    }
}

/// Shader source text for an item: a `codePath` link, an `@file:` link in
/// `code`, or inline code, in that order.
pub fn resolve_source(
    owner: &str,
    code: Option<&str>,
    code_path: Option<&str>,
    project_dir: &Path,
) -> Result<Option<String>, ProjectError> {
    if let Some(link) = source_link(code, code_path) {
        let path = resolve_project_path(project_dir, link);
        return fs::read_to_string(&path)
            .map(Some)
            .map_err(|_| ProjectError::MissingSource {
                owner: owner.to_string(),
                path,
            });
    }
    Ok(code.map(str::to_string))
}

/// File link of an item, `codePath` first.
fn source_link<'a>(code: Option<&'a str>, code_path: Option<&'a str>) -> Option<&'a str> {
    code_path
        .filter(|p| !p.trim().is_empty())
        .or_else(|| code.and_then(|c| c.strip_prefix(FILE_LINK_PREFIX)).map(str::trim))
}

/// Temporal effects and shaders that sample a history texture need one
/// history buffer unless the project says otherwise.
pub fn infer_history_count(effect: &ComputeEffectDesc, source: Option<&str>) -> u32 {
    if let Some(count) = effect.history_count {
        return count;
    }
    if effect.effect_type == ComputeEffectType::Temporal {
        return 1;
    }
    match source {
        Some(code) => {
            let lower = code.to_lowercase();
            if lower.contains("historytexture") || lower.contains("register(t1)") {
                1
            } else {
                0
            }
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Project {
        Project {
            scenes: vec![Scene {
                name: "intro".into(),
                code: Some("void main() {}".into()),
                ..Scene::default()
            }],
            ..Project::default()
        }
    }

    #[test]
    fn test_parse_camel_case_document() {
        let json = r#"{
            "scenes": [{
                "name": "tunnel",
                "code": "@file:shaders/tunnel.glsl",
                "bindings": [{"channel": 0, "enabled": true, "bindType": "File",
                              "sourceIndex": -1, "path": "tex/noise.png", "type": "Texture2D"}],
                "outputType": "Texture2D",
                "compute": [{"name": "trail", "type": "Temporal", "threadGroupX": 16,
                             "code": "void main() {}"}]
            }],
            "audio": [{"name": "tune", "path": "music.ogg", "bpm": 120.0, "type": 0}],
            "track": {"name": "main", "bpm": 120.0, "len": 64,
                      "rows": [{"id": 0, "scene": 0, "music": 0, "dur": 8.0},
                               {"id": 1, "scene": 0, "transStem": "dip_to_black", "oneshot": 0}]},
            "bpm": 120.0,
            "demoTitle": "Party"
        }"#;
        let project: Project = serde_json::from_str(json).unwrap();
        assert_eq!(project.scenes[0].bindings[0].bind_type, BindType::File);
        assert_eq!(project.scenes[0].compute[0].thread_group_x, 16);
        assert_eq!(project.scenes[0].compute[0].thread_group_y, 8);
        assert_eq!(project.scenes[0].compute[0].entry_point, "main");
        assert_eq!(project.track.rows[0].trans_stem, "");
        assert_eq!(project.track.rows[0].oneshot, -1);
        assert_eq!(project.track.rows[1].trans_stem, "dip_to_black");
        assert_eq!(project.track.rows[1].oneshot, 0);
        assert_eq!(project.demo_title.as_deref(), Some("Party"));
        assert!(project.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_project() {
        assert!(matches!(Project::default().validate(), Err(ProjectError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_references() {
        let mut project = minimal();
        project.track.rows.push(TrackRow {
            id: 3,
            scene: 5,
            ..TrackRow::default()
        });
        let err = project.validate().unwrap_err().to_string();
        assert!(err.contains("missing scene 5"), "{}", err);

        let mut project = minimal();
        project.scenes[0].bindings.push(Binding {
            channel: 4,
            enabled: true,
            ..Binding::default()
        });
        assert!(project.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_sceneless_code() {
        let mut project = minimal();
        project.scenes[0].code = Some("   ".into());
        assert!(project.validate().is_err());
    }

    #[test]
    fn test_resolve_source_follows_links() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.glsl"), "linked").unwrap();

        let via_prefix = resolve_source("s", Some("@file:a.glsl"), None, temp.path()).unwrap();
        assert_eq!(via_prefix.as_deref(), Some("linked"));

        let via_path = resolve_source("s", Some("inline"), Some("a.glsl"), temp.path()).unwrap();
        assert_eq!(via_path.as_deref(), Some("linked"));

        let inline = resolve_source("s", Some("inline"), None, temp.path()).unwrap();
        assert_eq!(inline.as_deref(), Some("inline"));

        let missing = resolve_source("s", Some("@file:nope.glsl"), None, temp.path());
        assert!(matches!(missing, Err(ProjectError::MissingSource { .. })));
    }

    #[test]
    fn test_dangling_links_fail_load() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("scene.glsl"), "void main() {}").unwrap();
        let path = temp.path().join("demo.json");

        fs::write(&path, r#"{"scenes":[{"name":"a","codePath":"scene.glsl"}]}"#).unwrap();
        assert!(load_and_validate(&path).is_ok());

        fs::write(&path, r#"{"scenes":[{"name":"a","codePath":"missing.glsl"}]}"#).unwrap();
        match load_and_validate(&path) {
            Err(ProjectError::MissingSource { owner, path }) => {
                assert_eq!(owner, "scene 0 ('a')");
                assert!(path.ends_with("missing.glsl"));
            }
            other => panic!("expected MissingSource, got {:?}", other),
        }

        fs::write(
            &path,
            r#"{"scenes":[{"name":"a","code":"void main() {}",
                "postfx":[{"name":"glow","enabled":true,"code":"@file:fx/glow.glsl"}]}]}"#,
        )
        .unwrap();
        let err = load_and_validate(&path).unwrap_err().to_string();
        assert!(err.contains("post effect 'glow'"), "{}", err);
    }

    #[test]
    fn test_history_inference() {
        let mut effect = ComputeEffectDesc::default();
        assert_eq!(infer_history_count(&effect, Some("plain")), 0);
        assert_eq!(infer_history_count(&effect, Some("Texture2D HistoryTexture : register(t1);")), 1);
        effect.effect_type = ComputeEffectType::Temporal;
        assert_eq!(infer_history_count(&effect, None), 1);
        effect.history_count = Some(3);
        assert_eq!(infer_history_count(&effect, None), 3);
    }

    #[test]
    fn test_load_project_errors() {
        let temp = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_project(&temp.path().join("missing.json")),
            Err(ProjectError::NotFound(_))
        ));
        let bad = temp.path().join("bad.json");
        fs::write(&bad, "{ scenes: ").unwrap();
        assert!(matches!(load_project(&bad), Err(ProjectError::Malformed(_))));
        assert!(matches!(load_project(temp.path()), Err(ProjectError::Unreadable { .. })));
    }
}
