//! Clean solution export.
//!
//! Writes a standalone source tree next to the build: the runtime sources,
//! the packed assets and a project whose shaders are linked `@file:` sources
//! instead of inline code. The directory is regenerated on every build.

use super::package::{PackedProject, PROJECT_ENTRY, RUNTIME_ENTRY};
use super::prep::Toolchain;
use crate::models::BuildRequest;
use crate::project::FILE_LINK_PREFIX;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const README_NAME: &str = "README_SOLUTION.txt";

/// Copy a file or a directory tree. Missing sources are an error.
pub fn copy_recursive(source: &Path, dest: &Path) -> io::Result<()> {
    if source.is_dir() {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest).map(|_| ())
    }
}

/// Solution directory for this request: `<solution_root>/<project stem>_solution`.
pub fn solution_dir(request: &BuildRequest, solution_root: &Path) -> PathBuf {
    let stem = request
        .project_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "demo".to_string());
    solution_root.join(format!("{}_solution", stem))
}

fn write_text(path: &Path, text: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("could not create {}: {}", parent.display(), e))?;
    }
    fs::write(path, text).map_err(|e| format!("could not write {}: {}", path.display(), e))
}

/// Export the solution. Errors are plain strings: the caller only warns.
pub fn export_solution(
    request: &BuildRequest,
    toolchain: &Toolchain,
    packed: &PackedProject,
    solution_root: &Path,
) -> Result<PathBuf, String> {
    let out = solution_dir(request, solution_root);
    if out.exists() {
        fs::remove_dir_all(&out).map_err(|e| format!("could not clear {}: {}", out.display(), e))?;
    }
    fs::create_dir_all(&out).map_err(|e| format!("could not create {}: {}", out.display(), e))?;

    let runtime_src = request.app_root.join(&toolchain.profile.runtime.source);
    copy_recursive(&runtime_src, &out.join("runtime"))
        .map_err(|e| format!("could not copy runtime sources from {}: {}", runtime_src.display(), e))?;

    let assets = packed.pack_dir.join("assets");
    if assets.is_dir() {
        copy_recursive(&assets, &out.join("assets"))
            .map_err(|e| format!("could not copy assets: {}", e))?;
    }
    copy_recursive(&packed.pack_dir.join(RUNTIME_ENTRY), &out.join(RUNTIME_ENTRY))
        .map_err(|e| format!("could not copy {}: {}", RUNTIME_ENTRY, e))?;

    let mut project = packed.project.clone();
    for (i, scene) in project.scenes.iter_mut().enumerate() {
        if let Some(code) = scene.code.take() {
            let rel = format!("assets/shaders/src/scene_{}.glsl", i);
            write_text(&out.join(&rel), &code)?;
            scene.code = Some(format!("{}{}", FILE_LINK_PREFIX, rel));
        }
        for (j, fx) in scene.postfx.iter_mut().enumerate() {
            if let Some(code) = fx.code.take() {
                let rel = format!("assets/shaders/src/scene_{}_fx_{}.glsl", i, j);
                write_text(&out.join(&rel), &code)?;
                fx.code = Some(format!("{}{}", FILE_LINK_PREFIX, rel));
            }
        }
        for (k, effect) in scene.compute.iter_mut().enumerate() {
            if let Some(code) = effect.code.take() {
                let rel = format!("assets/shaders/src/scene_{}_cs_{}.comp", i, k);
                write_text(&out.join(&rel), &code)?;
                effect.code = Some(format!("{}{}", FILE_LINK_PREFIX, rel));
            }
        }
    }
    let json = serde_json::to_string_pretty(&project).map_err(|e| format!("could not serialize project: {}", e))?;
    write_text(&out.join(PROJECT_ENTRY), &json)?;

    let target = toolchain
        .profile
        .runtime
        .target_for(request.target_kind)
        .unwrap_or("demo_player");
    let readme = format!(
        "demoforge clean solution\n\
         ========================\n\n\
         Regenerated on every build. Contains the player runtime sources,\n\
         the packed project assets and project.json with linked shaders.\n\n\
         Build:\n  \
         cmake -S runtime -B build -DCMAKE_BUILD_TYPE=Release\n  \
         cmake --build build --target {} --config Release\n",
        target
    );
    write_text(&out.join(README_NAME), &readme)?;
    Ok(out)
}
