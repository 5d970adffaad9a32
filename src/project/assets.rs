//! Asset consolidation for packing.
//!
//! Rewrites a project so it no longer depends on the author's disk layout:
//! linked shader sources are inlined and every referenced asset file gets a
//! normalized pack path under `assets/`. Missing assets are reported as
//! warnings and left as-is; the runtime treats them as absent.

use super::{resolve_project_path, resolve_source, scene_label, BindType, Project};
use crate::error::ProjectError;
use crate::pack::normalize_pack_path;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A file on disk that goes into the pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedFile {
    pub pack_path: String,
    pub source: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConsolidatedProject {
    /// Project with inlined code and pack-relative asset paths.
    pub project: Project,
    /// Asset files in discovery order, one entry per distinct source file.
    pub files: Vec<PackedFile>,
    pub warnings: Vec<String>,
}

struct AssetTable {
    by_source: HashMap<PathBuf, String>,
    files: Vec<PackedFile>,
}

impl AssetTable {
    fn add(&mut self, source: PathBuf, pack_path: String) -> String {
        let key = source.canonicalize().unwrap_or_else(|_| source.clone());
        if let Some(existing) = self.by_source.get(&key) {
            return existing.clone();
        }
        let pack_path = normalize_pack_path(&pack_path);
        self.by_source.insert(key, pack_path.clone());
        self.files.push(PackedFile {
            pack_path: pack_path.clone(),
            source,
        });
        pack_path
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".to_string())
}

/// Inline shader code and map asset files to pack paths.
pub fn consolidate(project: &Project, project_dir: &Path) -> Result<ConsolidatedProject, ProjectError> {
    let mut out = project.clone();
    let mut table = AssetTable {
        by_source: HashMap::new(),
        files: Vec::new(),
    };
    let mut warnings = Vec::new();

    for (i, clip) in out.audio.iter_mut().enumerate() {
        if clip.path.trim().is_empty() {
            continue;
        }
        let source = resolve_project_path(project_dir, &clip.path);
        if !source.is_file() {
            warnings.push(format!(
                "Audio clip '{}' not found at {}",
                clip.name,
                source.display()
            ));
            continue;
        }
        let name = format!("assets/audio/{}_{}", i, file_name_of(&source));
        clip.path = table.add(source, name);
    }

    for (i, scene) in out.scenes.iter_mut().enumerate() {
        let label = scene_label(i, scene);

        let code = resolve_source(&label, scene.code.as_deref(), scene.code_path.as_deref(), project_dir)?;
        if code.is_some() {
            scene.code = code;
            scene.code_path = None;
        }

        for binding in scene.bindings.iter_mut() {
            if !binding.enabled || binding.bind_type != BindType::File || binding.path.trim().is_empty() {
                continue;
            }
            let source = resolve_project_path(project_dir, &binding.path);
            if !source.is_file() {
                warnings.push(format!(
                    "Texture for {} channel {} not found at {}",
                    label,
                    binding.channel,
                    source.display()
                ));
                continue;
            }
            let name = format!(
                "assets/textures/{}_{}_{}",
                i,
                binding.channel,
                file_name_of(&source)
            );
            binding.path = table.add(source, name);
        }

        for fx in scene.postfx.iter_mut() {
            let owner = format!("post effect '{}' in {}", fx.name, label);
            let code = resolve_source(&owner, fx.code.as_deref(), fx.code_path.as_deref(), project_dir)?;
            if code.is_some() {
                fx.code = code;
                fx.code_path = None;
            }
        }

        for effect in scene.compute.iter_mut() {
            let owner = format!("compute effect '{}' in {}", effect.name, label);
            let code = resolve_source(&owner, effect.code.as_deref(), effect.code_path.as_deref(), project_dir)?;
            effect.history_count = Some(super::infer_history_count(effect, code.as_deref()));
            if code.is_some() {
                effect.code = code;
                effect.code_path = None;
            }
        }
    }

    for row in out.track.rows.iter_mut() {
        let Some(trans) = row.trans_path.as_ref().filter(|p| !p.trim().is_empty()) else {
            continue;
        };
        let source = resolve_project_path(project_dir, trans);
        if !source.is_file() {
            warnings.push(format!(
                "Transition for track row {} not found at {}",
                row.id,
                source.display()
            ));
            continue;
        }
        let name = format!("assets/transitions/{}", file_name_of(&source));
        row.trans_path = Some(table.add(source, name));
    }

    Ok(ConsolidatedProject {
        project: out,
        files: table.files,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{AudioClip, Binding, Scene};
    use std::fs;

    #[test]
    fn test_consolidate_rewrites_paths_and_inlines_code() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        fs::create_dir_all(dir.join("shaders")).unwrap();
        fs::write(dir.join("shaders/intro.glsl"), "void main() { /* intro */ }").unwrap();
        fs::write(dir.join("noise.png"), [1u8, 2, 3]).unwrap();
        fs::write(dir.join("tune.ogg"), [9u8; 16]).unwrap();

        let project = Project {
            scenes: vec![Scene {
                name: "intro".into(),
                code: Some("@file:shaders/intro.glsl".into()),
                bindings: vec![
                    Binding {
                        channel: 0,
                        enabled: true,
                        path: "noise.png".into(),
                        ..Binding::default()
                    },
                    Binding {
                        channel: 1,
                        enabled: true,
                        path: "./noise.png".into(),
                        ..Binding::default()
                    },
                ],
                ..Scene::default()
            }],
            audio: vec![AudioClip {
                name: "tune".into(),
                path: "tune.ogg".into(),
                ..AudioClip::default()
            }],
            ..Project::default()
        };

        let result = consolidate(&project, dir).unwrap();
        let scene = &result.project.scenes[0];
        assert_eq!(scene.code.as_deref(), Some("void main() { /* intro */ }"));
        assert_eq!(result.project.audio[0].path, "assets/audio/0_tune.ogg");
        assert_eq!(scene.bindings[0].path, "assets/textures/0_0_noise.png");
        // same file bound twice is packed once
        assert_eq!(scene.bindings[1].path, scene.bindings[0].path);
        assert_eq!(result.files.len(), 2);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_asset_is_a_warning() {
        let temp = tempfile::tempdir().unwrap();
        let project = Project {
            scenes: vec![Scene {
                code: Some("void main() {}".into()),
                ..Scene::default()
            }],
            audio: vec![AudioClip {
                name: "gone".into(),
                path: "gone.ogg".into(),
                ..AudioClip::default()
            }],
            ..Project::default()
        };
        let result = consolidate(&project, temp.path()).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.project.audio[0].path, "gone.ogg");
        assert!(result.files.is_empty());
    }

    #[test]
    fn test_missing_linked_shader_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let project = Project {
            scenes: vec![Scene {
                code_path: Some("absent.glsl".into()),
                ..Scene::default()
            }],
            ..Project::default()
        };
        assert!(matches!(
            consolidate(&project, temp.path()),
            Err(ProjectError::MissingSource { .. })
        ));
    }
}
