//! Step 6: write the final artifact.
//!
//! The artifact is written to a temporary file next to the target and then
//! persisted over it, so a failed build never leaves a half-written file at
//! `target_exe_path`.

use super::compile::base_vars;
use super::package::PackedProject;
use super::prep::Toolchain;
use crate::config::toolchain::expand_placeholders;
use crate::error::BuildError;
use crate::models::{BuildMode, BuildRequest, BuildTargetKind};
use crate::orchestrator::executor::ToolRunner;
use crate::orchestrator::state::StepReporter;
use std::ffi::OsStr;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn failure(msg: String) -> BuildError {
    BuildError::PackagingFailure(msg)
}

/// Runtime bytes that go into the artifact. In compressed mode the profile's
/// compressor runs on a copy of the binary first, before any pack data is
/// appended.
pub fn runtime_bytes(
    request: &BuildRequest,
    toolchain: &Toolchain,
    runtime_bin: &Path,
    scratch: &Path,
    runner: &ToolRunner,
    reporter: &StepReporter<'_>,
) -> Result<Vec<u8>, BuildError> {
    if request.mode != BuildMode::ReleaseCompressed {
        return fs::read(runtime_bin)
            .map_err(|e| failure(format!("could not read runtime {}: {}", runtime_bin.display(), e)));
    }

    let spec = toolchain.profile.compressor.as_ref().ok_or_else(|| BuildError::ToolchainFailure {
        step: "Compress runtime".to_string(),
        message: "the toolchain profile has no compressor".to_string(),
    })?;
    let program = toolchain
        .tool_path(&spec.tool)
        .ok_or_else(|| BuildError::ToolchainFailure {
            step: "Compress runtime".to_string(),
            message: format!("tool '{}' was not found", spec.tool),
        })?;

    let work = scratch.join("compress");
    fs::create_dir_all(&work).map_err(|e| failure(format!("could not create {}: {}", work.display(), e)))?;
    let copy = work.join(runtime_bin.file_name().unwrap_or_else(|| OsStr::new("runtime")));
    fs::copy(runtime_bin, &copy)
        .map_err(|e| failure(format!("could not copy runtime to {}: {}", copy.display(), e)))?;
    let before = fs::metadata(&copy).map(|m| m.len()).unwrap_or(0);

    let mut vars = base_vars(request, toolchain, scratch);
    vars.insert("input", copy.display().to_string());
    vars.insert("compressor", program.display().to_string());
    let args: Vec<String> = spec.args.iter().map(|a| expand_placeholders(a, &vars)).collect();

    reporter.line("  Compress runtime...");
    runner.run("Compress runtime", program, &args, &work, reporter.sink())?;
    let bytes = fs::read(&copy).map_err(|e| failure(format!("could not read {}: {}", copy.display(), e)))?;
    reporter.line(&format!("  Compress runtime: done ({} -> {} bytes)", before, bytes.len()));
    Ok(bytes)
}

/// Make sure the target's parent directory exists.
pub fn ensure_output_dir(target: &Path) -> Result<PathBuf, BuildError> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| {
        failure(format!("cannot create output directory {}: {}", parent.display(), e))
    })?;
    if target.is_dir() {
        return Err(failure(format!("{} is a directory", target.display())));
    }
    Ok(parent)
}

/// Write the artifact for `request` and return its path.
pub fn create_artifact(
    request: &BuildRequest,
    runtime_name: &str,
    runtime: &[u8],
    packed: &PackedProject,
    reporter: &StepReporter<'_>,
) -> Result<PathBuf, BuildError> {
    let target = request.artifact_path();
    let parent = ensure_output_dir(&target)?;

    let mut tmp = NamedTempFile::new_in(&parent)
        .map_err(|e| failure(format!("cannot write to {}: {}", parent.display(), e)))?;

    if request.target_kind == BuildTargetKind::PackagedDemo {
        packed
            .builder
            .write_zip(runtime_name, runtime, tmp.as_file_mut())?;
        reporter.line(&format!(
            "Packaged {} with {} data file(s)",
            runtime_name,
            packed.builder.len()
        ));
    } else {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let (directory, total) = packed.builder.write_packed(runtime, &mut writer)?;
        writer
            .flush()
            .map_err(|e| failure(format!("could not flush {}: {}", target.display(), e)))?;
        drop(writer);
        reporter.line(&format!(
            "Appended {} pack entries ({} bytes total)",
            directory.len(),
            total
        ));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o755))
                .map_err(|e| failure(format!("could not mark {} executable: {}", tmp.path().display(), e)))?;
        }
    }

    tmp.as_file()
        .sync_all()
        .map_err(|e| failure(format!("could not sync {}: {}", tmp.path().display(), e)))?;
    tmp.persist(&target)
        .map_err(|e| failure(format!("could not write {}: {}", target.display(), e.error)))?;
    reporter.line(&format!("Output: {}", target.display()));
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_collector::NullSink;
    use crate::pack::{PackBuilder, PackReader};
    use crate::project::Project;

    fn packed(compress: bool) -> PackedProject {
        let mut builder = PackBuilder::new(compress);
        builder.add_bytes("project.json", b"{\"scenes\":[]}".to_vec());
        builder.add_bytes("assets/audio/0_tune.ogg", vec![7u8; 32]);
        PackedProject {
            pack_dir: PathBuf::from("unused"),
            project: Project::default(),
            builder,
            shader_blobs: 0,
        }
    }

    #[test]
    fn test_self_contained_artifact_creates_parent_and_packs() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("nested/out/demo");
        let request = BuildRequest::new(temp.path(), temp.path().join("p.json"), &target);
        let reporter = StepReporter::new(&NullSink);

        let written = create_artifact(&request, "demo_player", b"RUNTIME", &packed(false), &reporter).unwrap();
        assert_eq!(written, target);

        let reader = PackReader::open(&target).unwrap();
        assert_eq!(reader.executable_len(), 7);
        assert_eq!(reader.read("project.json").unwrap(), b"{\"scenes\":[]}");
        assert_eq!(reader.entries().len(), 2);

        // no temp files left behind
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_packaged_artifact_is_zip() {
        let temp = tempfile::tempdir().unwrap();
        let mut request = BuildRequest::new(temp.path(), temp.path().join("p.json"), temp.path().join("demo.exe"));
        request.target_kind = BuildTargetKind::PackagedDemo;
        let reporter = StepReporter::new(&NullSink);

        let written = create_artifact(&request, "demo_player", b"RUNTIME", &packed(false), &reporter).unwrap();
        assert_eq!(written, temp.path().join("demo.zip"));

        let mut archive = zip::ZipArchive::new(fs::File::open(&written).unwrap()).unwrap();
        assert!(archive.by_name("demo_player").is_ok());
        assert!(archive.by_name("assets/audio/0_tune.ogg").is_ok());
    }

    #[test]
    fn test_output_dir_that_is_a_file_fails() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let err = ensure_output_dir(&blocker.join("demo")).unwrap_err();
        assert!(matches!(err, BuildError::PackagingFailure(_)));
        assert!(err.to_string().contains("cannot create output directory"));
    }
}
