//! Build Orchestration: the 7-step self-contained demo pipeline.
//!
//! ```text
//! [1/7] Check prerequisites
//! [2/7] Validate project input
//! [3/7] Prepare scratch workspace
//! [4/7] Compile runtime
//! [5/7] Pack project data
//! [6/7] Create final artifact
//! [7/7] Verify output artifact
//! ```
//!
//! A build is one-shot and synchronous: it blocks the caller, streams every
//! line to the caller's sink in order and always ends in a `BuildResult`.
//! Failures stop the pipeline at the step that detected them. Nothing is
//! retried and no state survives between invocations.

pub mod background;
pub mod executor;
pub mod phases;
pub mod state;

use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::watch;

pub use background::{BuildEvent, BuildHandle, BuildService};
pub use executor::{parse_build_progress, ToolRunner};
pub use state::{BuildStep, StepReporter, StepStatus};

use crate::error::BuildError;
use crate::log_collector::LogSink;
use crate::models::{BuildRequest, BuildResult};
use crate::system::PrereqChecker;
use phases::{artifact, compile, package, prep, solution, verify};

/// Runs builds. Cheap to clone; holds no per-build state.
#[derive(Clone, Default)]
pub struct BuildOrchestrator {
    checker: PrereqChecker,
    runner: ToolRunner,
    /// Checked between steps; `true` cancels the build.
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl BuildOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `checker` for step 1 (explicit search path, tool overrides).
    pub fn with_checker(mut self, checker: PrereqChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_runner(mut self, runner: ToolRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Attach a cancellation signal. Running tools are never killed; the
    /// build stops before the next step.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn checker(&self) -> &PrereqChecker {
        &self.checker
    }

    fn check_cancelled(&self) -> Result<(), BuildError> {
        match &self.cancel_rx {
            Some(rx) if *rx.borrow() => Err(BuildError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Run one step: cancel check, header, body, then `done` or `FAILED`.
    fn step<'a, T>(
        &self,
        reporter: &mut StepReporter<'a>,
        step: BuildStep,
        body: impl FnOnce(&StepReporter<'a>) -> Result<T, BuildError>,
    ) -> Result<T, BuildError> {
        self.check_cancelled()?;
        reporter.begin(step);
        match body(&*reporter) {
            Ok(value) => {
                reporter.done();
                Ok(value)
            }
            Err(err) => {
                reporter.fail(&err);
                Err(err)
            }
        }
    }

    /// Build the executable described by `request`, streaming progress to `sink`.
    ///
    /// Never panics on a bad environment or input and never returns an error:
    /// failures are classified in the result and described in the log.
    pub fn build_self_contained(&self, request: &BuildRequest, sink: &dyn LogSink) -> BuildResult {
        let started = Instant::now();
        log::info!(
            target: "parsed",
            "Building {} ({}, {}) -> {}",
            request.project_path.display(),
            request.target_kind,
            request.mode,
            request.artifact_path().display()
        );

        let mut reporter = StepReporter::new(sink);
        let outcome = self.run_pipeline(request, &mut reporter);

        match outcome {
            Ok(result) => {
                reporter.finish(None);
                log::info!(
                    target: "parsed",
                    "Build finished in {:.1}s: {} bytes",
                    started.elapsed().as_secs_f64(),
                    result.final_exe_bytes
                );
                result
            }
            Err(err) => {
                if err == BuildError::Cancelled {
                    sink.emit(&err.to_string());
                }
                reporter.finish(Some(&err));
                log::error!(target: "parsed", "Build failed: {}", err.user_message());
                BuildResult::failed(err.kind())
            }
        }
    }

    fn run_pipeline(
        &self,
        request: &BuildRequest,
        reporter: &mut StepReporter<'_>,
    ) -> Result<BuildResult, BuildError> {
        let toolchain = self.step(reporter, BuildStep::CheckPrerequisites, |r| {
            let toolchain = prep::check_prerequisites(&self.checker, request)?;
            for check in toolchain.report.checks.iter().filter(|c| c.is_satisfied()) {
                if let Some(found) = &check.found {
                    match &check.version {
                        Some(v) => r.line(&format!("Found {}: {} ({})", check.name, found.display(), v)),
                        None => r.line(&format!("Found {}: {}", check.name, found.display())),
                    }
                }
            }
            if !toolchain.report.message.is_empty() {
                r.line(&toolchain.report.message);
            }
            Ok(toolchain)
        })?;

        let project = self.step(reporter, BuildStep::ValidateProject, |r| {
            let project = prep::validate_project_input(request)?;
            r.line(&format!("Project: {} scene(s)", project.scenes.len()));
            Ok(project)
        })?;

        // Removed on drop, whichever way this function returns.
        let scratch = self.step(reporter, BuildStep::PrepareScratch, |_| {
            prep::prepare_scratch(request)
        })?;
        let scratch_path = scratch.path();

        let runtime_bin = self.step(reporter, BuildStep::CompileRuntime, |r| {
            let bin = compile::compile_runtime(request, &toolchain, scratch_path, &self.runner, r)?;
            r.line(&format!("Runtime binary: {}", bin.display()));
            Ok(bin)
        })?;

        let packed = self.step(reporter, BuildStep::PackProjectData, |r| {
            package::pack_project_data(request, &toolchain, &project, scratch_path, &self.runner, r)
        })?;

        let artifact_path: PathBuf = self.step(reporter, BuildStep::CreateArtifact, |r| {
            let runtime =
                artifact::runtime_bytes(request, &toolchain, &runtime_bin, scratch_path, &self.runner, r)?;
            let runtime_name = runtime_bin
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "demo_player".to_string());
            let path = artifact::create_artifact(request, &runtime_name, &runtime, &packed, r)?;

            if let Some(root) = &request.solution_root {
                match solution::export_solution(request, &toolchain, &packed, root) {
                    Ok(dir) => r.line(&format!("Clean solution exported to {}", dir.display())),
                    Err(e) => r.warn(&format!("Clean solution export failed: {}", e)),
                }
            }
            Ok(path)
        })?;

        // Past this point the artifact is in place; a late cancel request
        // is ignored rather than reporting failure over a written file.
        reporter.begin(BuildStep::VerifyArtifact);
        let size = match verify::verify_artifact(&artifact_path, request.target_kind, request.size_target) {
            Ok(size) => size,
            Err(err) => {
                reporter.fail(&err);
                return Err(err);
            }
        };
        reporter.line(&format!("Final size: {} bytes", size.final_bytes));
        if !size.message.is_empty() {
            reporter.line(&size.message);
        }
        reporter.done();

        Ok(BuildResult {
            success: true,
            failure: None,
            artifact_path: Some(artifact_path),
            final_exe_bytes: size.final_bytes,
            budget_bytes: size.budget_bytes,
            budget_hit: size.budget_hit,
            size_report: size.message,
        })
    }
}

/// Build with a default orchestrator (process `PATH`, no cancellation).
pub fn build_self_contained(request: &BuildRequest, sink: &dyn LogSink) -> BuildResult {
    BuildOrchestrator::new().build_self_contained(request, sink)
}
