//! Build step tracking.
//!
//! `BuildStep` is the fixed, ordered list of pipeline steps. `StepReporter`
//! is the only thing that writes step lines to the sink, which keeps the
//! `[n/7]` lines monotonic: a step can only start after the previous one
//! finished, and nothing starts after a failure.

use crate::error::BuildError;
use crate::log_collector::LogSink;
use serde::{Deserialize, Serialize};

/// Pipeline steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildStep {
    CheckPrerequisites,
    ValidateProject,
    PrepareScratch,
    CompileRuntime,
    PackProjectData,
    CreateArtifact,
    VerifyArtifact,
}

impl BuildStep {
    pub const ALL: [BuildStep; 7] = [
        BuildStep::CheckPrerequisites,
        BuildStep::ValidateProject,
        BuildStep::PrepareScratch,
        BuildStep::CompileRuntime,
        BuildStep::PackProjectData,
        BuildStep::CreateArtifact,
        BuildStep::VerifyArtifact,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// 1-based position in the pipeline.
    pub fn number(&self) -> usize {
        *self as usize + 1
    }

    pub fn title(&self) -> &'static str {
        match self {
            BuildStep::CheckPrerequisites => "Check prerequisites",
            BuildStep::ValidateProject => "Validate project input",
            BuildStep::PrepareScratch => "Prepare scratch workspace",
            BuildStep::CompileRuntime => "Compile runtime",
            BuildStep::PackProjectData => "Pack project data",
            BuildStep::CreateArtifact => "Create final artifact",
            BuildStep::VerifyArtifact => "Verify output artifact",
        }
    }

    /// Step that follows this one, `None` for the last.
    pub fn next(&self) -> Option<BuildStep> {
        Self::ALL.get(self.number()).copied()
    }

    /// `[n/7] <title>`
    pub fn header(&self) -> String {
        format!("[{}/{}] {}", self.number(), Self::COUNT, self.title())
    }
}

/// Where the reporter is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    NotStarted,
    Running(BuildStep),
    Done(BuildStep),
    Failed(BuildStep),
}

/// Writes step lines for one build.
pub struct StepReporter<'a> {
    sink: &'a dyn LogSink,
    status: StepStatus,
}

impl<'a> StepReporter<'a> {
    pub fn new(sink: &'a dyn LogSink) -> Self {
        StepReporter {
            sink,
            status: StepStatus::NotStarted,
        }
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn sink(&self) -> &'a dyn LogSink {
        self.sink
    }

    /// Whether `step` may start now.
    pub fn can_start(&self, step: BuildStep) -> bool {
        match self.status {
            StepStatus::NotStarted => step == BuildStep::CheckPrerequisites,
            StepStatus::Done(prev) => prev.next() == Some(step),
            StepStatus::Running(_) | StepStatus::Failed(_) => false,
        }
    }

    pub fn begin(&mut self, step: BuildStep) {
        debug_assert!(self.can_start(step), "{:?} cannot start from {:?}", step, self.status);
        self.sink.emit(&step.header());
        self.status = StepStatus::Running(step);
    }

    /// Detail line inside the running step.
    pub fn line(&self, text: &str) {
        for line in text.lines() {
            self.sink.emit(line);
        }
    }

    pub fn warn(&self, text: &str) {
        self.sink.emit(&format!("Warning: {}", text));
    }

    pub fn done(&mut self) {
        if let StepStatus::Running(step) = self.status {
            self.sink.emit(&format!("{}: done", step.header()));
            self.status = StepStatus::Done(step);
        }
    }

    /// Close the running step as failed. The step line carries a one-line
    /// reason; the rest of the diagnostic follows verbatim.
    pub fn fail(&mut self, err: &BuildError) {
        let StepStatus::Running(step) = self.status else {
            return;
        };
        let (reason, diagnostic) = match err {
            BuildError::PrereqMissing(report) => {
                ("required build tools are missing".to_string(), Some(report.clone()))
            }
            other => {
                let text = other.to_string();
                match text.split_once('\n') {
                    Some((first, rest)) => (first.to_string(), Some(rest.to_string())),
                    None => (text, None),
                }
            }
        };
        self.sink.emit(&format!("{}: FAILED: {}", step.header(), reason));
        if let Some(diag) = diagnostic {
            self.line(&diag);
        }
        self.status = StepStatus::Failed(step);
    }

    /// Terminal line. Only valid once the pipeline has failed or finished.
    pub fn finish(&self, err: Option<&BuildError>) {
        match err {
            None => self.sink.emit("BUILD SUCCESSFUL"),
            Some(e) => self.sink.emit(&format!("BUILD FAILED ({})", e.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_prereq_failure_prints_report_verbatim() {
        let lines = RefCell::new(Vec::new());
        let sink = |l: &str| lines.borrow_mut().push(l.to_string());
        let mut reporter = StepReporter::new(&sink);

        reporter.begin(BuildStep::CheckPrerequisites);
        let err = BuildError::PrereqMissing("Missing build prerequisites:\n - CMake: not found".into());
        reporter.fail(&err);
        reporter.finish(Some(&err));

        assert_eq!(
            lines.into_inner(),
            vec![
                "[1/7] Check prerequisites",
                "[1/7] Check prerequisites: FAILED: required build tools are missing",
                "Missing build prerequisites:",
                " - CMake: not found",
                "BUILD FAILED (missing prerequisites)",
            ]
        );
    }

    #[test]
    fn test_step_numbers_and_headers() {
        assert_eq!(BuildStep::CheckPrerequisites.number(), 1);
        assert_eq!(BuildStep::VerifyArtifact.number(), 7);
        assert_eq!(BuildStep::CompileRuntime.header(), "[4/7] Compile runtime");
        assert_eq!(BuildStep::CreateArtifact.next(), Some(BuildStep::VerifyArtifact));
        assert_eq!(BuildStep::VerifyArtifact.next(), None);
    }

    #[test]
    fn test_reporter_sequence() {
        let lines = RefCell::new(Vec::new());
        let sink = |l: &str| lines.borrow_mut().push(l.to_string());
        let mut reporter = StepReporter::new(&sink);

        assert!(reporter.can_start(BuildStep::CheckPrerequisites));
        assert!(!reporter.can_start(BuildStep::ValidateProject));

        reporter.begin(BuildStep::CheckPrerequisites);
        assert!(!reporter.can_start(BuildStep::ValidateProject));
        reporter.done();
        assert!(reporter.can_start(BuildStep::ValidateProject));

        reporter.begin(BuildStep::ValidateProject);
        let err = BuildError::ToolchainFailure {
            step: "Locate runtime binary".into(),
            message: "runtime binary not found. Looked in:\n  one\n  two".into(),
        };
        reporter.fail(&err);
        assert_eq!(reporter.status(), StepStatus::Failed(BuildStep::ValidateProject));
        assert!(!reporter.can_start(BuildStep::PrepareScratch));
        reporter.finish(Some(&err));

        assert_eq!(
            lines.into_inner(),
            vec![
                "[1/7] Check prerequisites",
                "[1/7] Check prerequisites: done",
                "[2/7] Validate project input",
                "[2/7] Validate project input: FAILED: Locate runtime binary failed: runtime binary not found. Looked in:",
                "  one",
                "  two",
                "BUILD FAILED (toolchain failure)",
            ]
        );
    }
}
