//! Shader precompilation through the profile's external compiler.

use crate::config::toolchain::{expand_placeholders, ShaderCompilerSpec};
use crate::graphics::compute::ShaderCompiler;
use crate::log_collector::LogSink;
use crate::orchestrator::executor::ToolRunner;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Runs the configured shader compiler once per source, using files in a
/// work directory for input and output.
pub struct ExternalShaderCompiler<'a> {
    program: PathBuf,
    spec: &'a ShaderCompilerSpec,
    work_dir: PathBuf,
    runner: &'a ToolRunner,
    sink: &'a dyn LogSink,
    counter: Cell<u32>,
}

impl<'a> ExternalShaderCompiler<'a> {
    pub fn new(
        program: &Path,
        spec: &'a ShaderCompilerSpec,
        work_dir: &Path,
        runner: &'a ToolRunner,
        sink: &'a dyn LogSink,
    ) -> Self {
        ExternalShaderCompiler {
            program: program.to_path_buf(),
            spec,
            work_dir: work_dir.to_path_buf(),
            runner,
            sink,
            counter: Cell::new(0),
        }
    }

    pub fn spec(&self) -> &ShaderCompilerSpec {
        self.spec
    }
}

impl ShaderCompiler for ExternalShaderCompiler<'_> {
    fn compile(&self, source: &str, entry_point: &str, profile: &str) -> Result<Vec<u8>, String> {
        let n = self.counter.get();
        self.counter.set(n + 1);
        let input = self.work_dir.join(format!("shader_{}.{}", n, profile));
        let output = self.work_dir.join(format!("shader_{}.{}", n, self.spec.extension));
        fs::write(&input, source).map_err(|e| format!("could not write {}: {}", input.display(), e))?;

        let mut vars = BTreeMap::new();
        vars.insert("input", input.display().to_string());
        vars.insert("output", output.display().to_string());
        vars.insert("entry", entry_point.to_string());
        vars.insert("profile", profile.to_string());
        let args: Vec<String> = self
            .spec
            .args
            .iter()
            .map(|a| expand_placeholders(a, &vars))
            .collect();

        self.runner
            .run("Shader compiler", &self.program, &args, &self.work_dir, self.sink)
            .map_err(|e| e.to_string())?;

        match fs::read(&output) {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            Ok(_) => Err(format!("{} is empty", output.display())),
            Err(e) => Err(format!("no output at {}: {}", output.display(), e)),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::log_collector::NullSink;
    use std::os::unix::fs::PermissionsExt;

    fn copy_compiler(dir: &Path) -> PathBuf {
        // copies the input to the output, failing on sources containing "error"
        let path = dir.join("fake-shaderc");
        fs::write(
            &path,
            "#!/bin/sh\nif grep -q error \"$2\"; then echo \"$2: syntax error\"; exit 1; fi\ncp \"$2\" \"$1\"\n",
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn spec() -> ShaderCompilerSpec {
        ShaderCompilerSpec {
            tool: "Shader compiler".into(),
            args: vec!["{output}".into(), "{input}".into()],
            scene_profile: "frag".into(),
            compute_profile: "comp".into(),
            extension: "spv".into(),
        }
    }

    #[test]
    fn test_compiles_through_external_tool() {
        let temp = tempfile::tempdir().unwrap();
        let program = copy_compiler(temp.path());
        let spec = spec();
        let runner = ToolRunner::new();
        let compiler = ExternalShaderCompiler::new(&program, &spec, temp.path(), &runner, &NullSink);

        let first = compiler.compile("void main() {}", "main", "frag").unwrap();
        let second = compiler.compile("void other() {}", "main", "comp").unwrap();
        assert_eq!(first, b"void main() {}");
        assert_eq!(second, b"void other() {}");
    }

    #[test]
    fn test_compile_error_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let program = copy_compiler(temp.path());
        let spec = spec();
        let runner = ToolRunner::new();
        let compiler = ExternalShaderCompiler::new(&program, &spec, temp.path(), &runner, &NullSink);

        let err = compiler.compile("this is an error", "main", "frag").unwrap_err();
        assert!(err.contains("status 1"), "{}", err);
    }
}
