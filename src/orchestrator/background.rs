//! Background build service for the IDE.
//!
//! `build_self_contained` blocks, so the IDE runs it on tokio's blocking pool
//! and consumes the lines as events:
//!
//! ```text
//! BuildService::spawn(request)
//!     |
//! spawn_blocking --> BuildOrchestrator::build_self_contained
//!     |                 |
//!     |            sink closure --> LogCollector (optional)
//!     |                 |
//!     v                 v
//! BuildHandle.events: Log / Progress ... Finished(result)
//! ```
//!
//! Only one build runs per service. A second `spawn` while one is in flight
//! is refused with `BuildError::AlreadyRunning`.

use super::executor::parse_build_progress;
use super::BuildOrchestrator;
use crate::error::BuildError;
use crate::log_collector::{LogCollector, LogSink};
use crate::models::{BuildRequest, BuildResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

/// Events delivered to the UI while a background build runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    /// One build log line, in emission order.
    Log(String),
    /// Percentage parsed from an `[x/y]` or `[ NN%]` line.
    Progress(u32),
    /// Always the last event of a build.
    Finished(BuildResult),
}

/// Clears the running flag when the build thread finishes, even on panic.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunningGuard(Arc::clone(flag)))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs builds off the caller's thread, one at a time.
#[derive(Clone)]
pub struct BuildService {
    orchestrator: BuildOrchestrator,
    running: Arc<AtomicBool>,
    log_collector: Option<LogCollector>,
}

impl BuildService {
    pub fn new(orchestrator: BuildOrchestrator) -> Self {
        BuildService {
            orchestrator,
            running: Arc::new(AtomicBool::new(false)),
            log_collector: None,
        }
    }

    /// Also persist every line through `collector`, one session per build.
    pub fn with_log_collector(mut self, collector: LogCollector) -> Self {
        self.log_collector = Some(collector);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a build on the blocking pool. Must be called inside a tokio runtime.
    pub fn spawn(&self, request: BuildRequest) -> Result<BuildHandle, BuildError> {
        let guard = RunningGuard::acquire(&self.running).ok_or(BuildError::AlreadyRunning)?;

        let (event_tx, events) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let orchestrator = self.orchestrator.clone().with_cancel(cancel_rx);
        let collector = self.log_collector.clone();

        if let Some(collector) = &collector {
            if let Err(e) = collector.start_build_session() {
                log::warn!("Could not start build log session: {}", e);
            }
        }

        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let sink = |line: &str| {
                if let Some(collector) = &collector {
                    collector.emit(line);
                }
                if let Some(percent) = parse_build_progress(line) {
                    let _ = event_tx.send(BuildEvent::Progress(percent));
                }
                let _ = event_tx.send(BuildEvent::Log(line.to_string()));
            };

            let result = orchestrator.build_self_contained(&request, &sink);

            if let Some(collector) = &collector {
                if let Err(e) = collector.flush_blocking() {
                    log::warn!("Build log flush failed: {}", e);
                }
            }
            let _ = event_tx.send(BuildEvent::Finished(result.clone()));
            result
        });

        Ok(BuildHandle {
            events,
            cancel_tx,
            task,
        })
    }
}

/// Handle to one background build.
pub struct BuildHandle {
    pub events: mpsc::UnboundedReceiver<BuildEvent>,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<BuildResult>,
}

impl BuildHandle {
    /// Ask the build to stop before its next step.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub async fn next_event(&mut self) -> Option<BuildEvent> {
        self.events.recv().await
    }

    /// Wait for the build thread and return its result.
    pub async fn wait(self) -> Result<BuildResult, JoinError> {
        self.task.await
    }
}
