//! Step 5: consolidate the project into the scratch pack directory.
//!
//! Layout of the pack directory (and of the pack itself):
//!
//! ```text
//! project.json            consolidated project, inlined code, pack-relative paths
//! runtime.json            runtime settings for this build
//! assets/audio/...        copied asset files
//! assets/textures/...
//! assets/transitions/...
//! assets/shaders/...      precompiled shader blobs, when a compiler is available
//! assets/track.bin        compact timeline (micro demos)
//! assets/modules.txt      minified shader modules (micro demos)
//! ```
//!
//! Micro demos ship a stripped `project.json`: the timeline and the scene and
//! post effect code move into the two binary entries above.

use super::prep::{Toolchain, PACK_DIR, SHADER_DIR};
use super::shaders::ExternalShaderCompiler;
use crate::error::BuildError;
use crate::graphics::compute::{ComputeEffectManager, ComputeShaderEffect, ShaderCompiler};
use crate::graphics::headless::HeadlessDeviceService;
use crate::models::{BuildRequest, BuildTargetKind};
use crate::orchestrator::executor::ToolRunner;
use crate::orchestrator::state::StepReporter;
use crate::pack::PackBuilder;
use crate::project::{self, assets, micro, Project};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROJECT_ENTRY: &str = "project.json";
pub const RUNTIME_ENTRY: &str = "runtime.json";
pub const TRACK_ENTRY: &str = "assets/track.bin";
pub const MODULES_ENTRY: &str = "assets/modules.txt";

/// Runtime settings written next to the project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeManifest {
    pub generator: String,
    pub target_kind: BuildTargetKind,
    pub mode: String,
    pub size_target: String,
    pub debug_log: bool,
    pub screensaver: bool,
    pub title: Option<String>,
    pub author: Option<String>,
    pub compute_effects: Vec<String>,
    pub precompiled_shaders: bool,
    pub compact_track: bool,
}

/// Output of the pack step.
#[derive(Debug)]
pub struct PackedProject {
    pub pack_dir: PathBuf,
    pub project: Project,
    pub builder: PackBuilder,
    pub shader_blobs: usize,
}

fn io_failure(what: &str, path: &Path, e: std::io::Error) -> BuildError {
    BuildError::PackagingFailure(format!("could not {} {}: {}", what, path.display(), e))
}

fn write_pack_file(pack_dir: &Path, rel: &str, data: &[u8]) -> Result<PathBuf, BuildError> {
    let dest = pack_dir.join(rel);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| io_failure("create", parent, e))?;
    }
    fs::write(&dest, data).map_err(|e| io_failure("write", &dest, e))?;
    Ok(dest)
}

fn shader_failure(e: impl std::fmt::Display) -> BuildError {
    BuildError::ToolchainFailure {
        step: "Shader precompile".to_string(),
        message: e.to_string(),
    }
}

pub fn pack_project_data(
    request: &BuildRequest,
    toolchain: &Toolchain,
    project: &Project,
    scratch: &Path,
    runner: &ToolRunner,
    reporter: &StepReporter<'_>,
) -> Result<PackedProject, BuildError> {
    let pack_dir = scratch.join(PACK_DIR);
    let consolidated =
        assets::consolidate(project, &project::project_dir(&request.project_path))?;
    for warning in &consolidated.warnings {
        reporter.warn(warning);
    }
    let mut project = consolidated.project;

    let mut asset_paths = Vec::with_capacity(consolidated.files.len());
    for file in &consolidated.files {
        let dest = pack_dir.join(&file.pack_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| io_failure("create", parent, e))?;
        }
        fs::copy(&file.source, &dest).map_err(|e| io_failure("copy", &file.source, e))?;
        asset_paths.push(file.pack_path.clone());
    }
    reporter.line(&format!("Consolidated {} asset file(s)", asset_paths.len()));

    let compiler = toolchain.profile.shader_compiler.as_ref().and_then(|spec| {
        toolchain.tool_path(&spec.tool).map(|program| {
            ExternalShaderCompiler::new(program, spec, &scratch.join(SHADER_DIR), runner, reporter.sink())
        })
    });
    if compiler.is_none() {
        reporter.line("Shader compiler not available, shipping shader sources");
    }

    let effect_names = register_compute_effects(&project)?;
    let blobs = match &compiler {
        Some(compiler) => precompile_shaders(&mut project, compiler, &pack_dir)?,
        None => Vec::new(),
    };
    if !blobs.is_empty() {
        reporter.line(&format!("Precompiled {} shader(s)", blobs.len()));
    }

    let micro_build = request.target_kind == BuildTargetKind::MicroDemo;
    let mut compact_entries = Vec::new();
    let project_json = if micro_build {
        let modules = micro::ModuleMap::build(&project);
        let track = micro::compact_track(&project, &modules);
        write_pack_file(&pack_dir, TRACK_ENTRY, &track)?;
        write_pack_file(&pack_dir, MODULES_ENTRY, &modules.to_blob())?;
        reporter.line(&format!(
            "Compact track: {} bytes, {} shader module(s)",
            track.len(),
            modules.modules.len()
        ));
        compact_entries.push(TRACK_ENTRY.to_string());
        compact_entries.push(MODULES_ENTRY.to_string());
        serde_json::to_vec(&micro::strip_for_micro(&project))
    } else {
        serde_json::to_vec_pretty(&project)
    }
    .map_err(|e| BuildError::PackagingFailure(format!("could not serialize project: {}", e)))?;
    write_pack_file(&pack_dir, PROJECT_ENTRY, &project_json)?;

    let manifest = RuntimeManifest {
        generator: format!("demoforge {}", crate::VERSION),
        target_kind: request.target_kind,
        mode: request.mode.key().to_string(),
        size_target: request.size_target.to_string(),
        debug_log: request.runtime_debug_log,
        screensaver: request.target_kind == BuildTargetKind::SelfContainedScreenSaver,
        title: project.demo_title.clone(),
        author: project.demo_author.clone(),
        compute_effects: effect_names,
        precompiled_shaders: !blobs.is_empty(),
        compact_track: micro_build,
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| BuildError::PackagingFailure(format!("could not serialize runtime settings: {}", e)))?;
    write_pack_file(&pack_dir, RUNTIME_ENTRY, &manifest_json)?;

    let compress = micro_build || request.size_target.is_set();
    let mut builder = PackBuilder::new(compress);
    for entry in [PROJECT_ENTRY, RUNTIME_ENTRY]
        .iter()
        .map(|s| s.to_string())
        .chain(asset_paths)
        .chain(blobs.iter().cloned())
        .chain(compact_entries)
    {
        builder
            .add_file(&entry, &pack_dir.join(&entry))
            .map_err(BuildError::from)?;
    }
    reporter.line(&format!(
        "Pack contains {} entries{}",
        builder.len(),
        if compress { " (compressed)" } else { "" }
    ));

    Ok(PackedProject {
        pack_dir,
        project,
        builder,
        shader_blobs: blobs.len(),
    })
}

/// Register every enabled compute effect with an effect manager, which
/// rejects duplicate names and bad thread groups before anything is packed.
fn register_compute_effects(project: &Project) -> Result<Vec<String>, BuildError> {
    let mut manager: ComputeEffectManager<HeadlessDeviceService> = ComputeEffectManager::new("comp");
    for (i, scene) in project.scenes.iter().enumerate() {
        for desc in scene.compute.iter().filter(|d| d.enabled) {
            manager
                .add_effect(effect_from_desc(i, desc))
                .map_err(|e| BuildError::InvalidProjectInput(e.to_string()))?;
        }
    }
    Ok(manager.effect_names().iter().map(|s| s.to_string()).collect())
}

fn effect_from_desc(scene: usize, desc: &project::ComputeEffectDesc) -> ComputeShaderEffect {
    let mut effect = ComputeShaderEffect::new(
        format!("scene{}/{}", scene, desc.name),
        desc.effect_type,
        desc.code.clone().unwrap_or_default(),
    );
    effect.entry_point = desc.entry_point.clone();
    effect.thread_group = [desc.thread_group_x, desc.thread_group_y, desc.thread_group_z];
    effect.history_count = desc.history_count.unwrap_or(effect.history_count);
    effect
}

/// Compile scene, post effect and compute shaders into `assets/shaders/`,
/// recording each blob path in the project. Returns the blob pack paths.
fn precompile_shaders(
    project: &mut Project,
    compiler: &ExternalShaderCompiler<'_>,
    pack_dir: &Path,
) -> Result<Vec<String>, BuildError> {
    let spec = compiler.spec().clone();
    let mut blobs = Vec::new();
    let mut effects: ComputeEffectManager<HeadlessDeviceService> =
        ComputeEffectManager::new(spec.compute_profile.clone());

    for (i, scene) in project.scenes.iter_mut().enumerate() {
        if let Some(code) = scene.code.as_deref().filter(|c| !c.trim().is_empty()) {
            let bytes = compiler
                .compile(code, "main", &spec.scene_profile)
                .map_err(|e| shader_failure(format!("scene {}: {}", i, e)))?;
            let rel = format!("assets/shaders/scene_{}.{}", i, spec.extension);
            write_pack_file(pack_dir, &rel, &bytes)?;
            scene.precompiled = Some(rel.clone());
            blobs.push(rel);
        }

        for (j, fx) in scene.postfx.iter_mut().enumerate() {
            let Some(code) = fx.code.as_deref().filter(|c| !c.trim().is_empty()) else {
                continue;
            };
            let bytes = compiler
                .compile(code, "main", &spec.scene_profile)
                .map_err(|e| shader_failure(format!("post effect '{}': {}", fx.name, e)))?;
            let rel = format!("assets/shaders/scene_{}_fx_{}.{}", i, j, spec.extension);
            write_pack_file(pack_dir, &rel, &bytes)?;
            fx.precompiled = Some(rel.clone());
            blobs.push(rel);
        }

        for (k, desc) in scene.compute.iter_mut().enumerate() {
            if !desc.enabled || desc.code.as_deref().map_or(true, |c| c.trim().is_empty()) {
                continue;
            }
            let effect = effect_from_desc(i, desc);
            let name = effect.name.clone();
            effects.add_effect(effect).map_err(shader_failure)?;
            effects.compile_effect(&name, compiler).map_err(shader_failure)?;
            let bytes = effects.bytecode(&name).unwrap_or_default();
            let rel = format!("assets/shaders/scene_{}_cs_{}.{}", i, k, spec.extension);
            write_pack_file(pack_dir, &rel, bytes)?;
            desc.precompiled = Some(rel.clone());
            blobs.push(rel);
        }
    }
    Ok(blobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ComputeEffectDesc, Scene};

    fn scene_with_effects(names: &[&str]) -> Scene {
        Scene {
            name: "main".into(),
            code: Some("void main() {}".into()),
            compute: names
                .iter()
                .map(|n| ComputeEffectDesc {
                    name: n.to_string(),
                    code: Some("void main() {}".into()),
                    ..ComputeEffectDesc::default()
                })
                .collect(),
            ..Scene::default()
        }
    }

    #[test]
    fn test_compute_effects_are_registered_per_scene() {
        let project = Project {
            scenes: vec![scene_with_effects(&["blur", "grain"]), scene_with_effects(&["blur"])],
            ..Project::default()
        };
        let names = register_compute_effects(&project).unwrap();
        assert_eq!(names, vec!["scene0/blur", "scene0/grain", "scene1/blur"]);
    }

    #[test]
    fn test_duplicate_compute_effect_is_rejected() {
        let project = Project {
            scenes: vec![scene_with_effects(&["blur", "blur"])],
            ..Project::default()
        };
        assert!(matches!(
            register_compute_effects(&project),
            Err(BuildError::InvalidProjectInput(_))
        ));
    }

    #[test]
    fn test_disabled_effects_are_skipped() {
        let mut scene = scene_with_effects(&["blur", "grain"]);
        scene.compute[1].enabled = false;
        let project = Project {
            scenes: vec![scene],
            ..Project::default()
        };
        assert_eq!(register_compute_effects(&project).unwrap(), vec!["scene0/blur"]);
    }
}
