//! Toolchain step execution: spawning, output streaming, exit handling.
//!
//! Each toolchain invocation runs as a plain child process. Two reader
//! threads forward stdout and stderr lines into one crossbeam channel so the
//! build thread sees them in arrival order and can emit them to the sink
//! synchronously. When a step stays silent for the heartbeat interval the
//! sink gets a "still running" line so the IDE log never looks frozen.

use crate::error::BuildError;
use crate::log_collector::LogSink;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

/// Silence interval after which a heartbeat line is emitted.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub const HEARTBEAT_LINE: &str = "...build still running (long step in progress)...";

static FRACTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*(\d+)/(\d+)\]").expect("fraction progress regex"));
static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*(\d+)%\]").expect("percent progress regex"));

/// Parses `[X/Y]` (ninja and our own step lines) or `[ N%]` (make/cmake)
/// progress markers into a 0-100 value.
pub fn parse_build_progress(line: &str) -> Option<u32> {
    if let Some(caps) = FRACTION_RE.captures(line) {
        if let (Ok(current), Ok(total)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
            if total > 0 {
                return Some(((current.min(total) * 100) / total) as u32);
            }
        }
    }
    if let Some(caps) = PERCENT_RE.captures(line) {
        if let Ok(progress) = caps[1].parse::<u32>() {
            return Some(progress.min(100));
        }
    }
    None
}

enum StreamEvent {
    Line(String),
    Closed,
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, tx: Sender<StreamEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(StreamEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Line(format!("output read error: {}", e)));
                    break;
                }
            }
        }
        let _ = tx.send(StreamEvent::Closed);
    })
}

/// Runs external tools on behalf of one build.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    heartbeat: Duration,
    env: BTreeMap<String, String>,
}

impl Default for ToolRunner {
    fn default() -> Self {
        ToolRunner {
            heartbeat: HEARTBEAT_INTERVAL,
            env: BTreeMap::new(),
        }
    }
}

impl ToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    /// Extra environment variables for every child process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run `program args...` in `cwd`, streaming its output to `sink`.
    ///
    /// Succeeds on exit status 0. Anything else, including a failure to
    /// spawn, is a `ToolchainFailure` attributed to `step`.
    pub fn run(
        &self,
        step: &str,
        program: &Path,
        args: &[String],
        cwd: &Path,
        sink: &dyn LogSink,
    ) -> Result<(), BuildError> {
        let failure = |message: String| BuildError::ToolchainFailure {
            step: step.to_string(),
            message,
        };
        log::debug!("[{}] {} {}", step, program.display(), args.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| failure(format!("could not start {}: {}", program.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| failure("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| failure("failed to capture stderr".to_string()))?;

        let (tx, rx) = unbounded();
        let readers = [spawn_reader(stdout, tx.clone()), spawn_reader(stderr, tx)];

        let mut open_streams = readers.len();
        while open_streams > 0 {
            match rx.recv_timeout(self.heartbeat) {
                Ok(StreamEvent::Line(line)) => sink.emit(&line),
                Ok(StreamEvent::Closed) => open_streams -= 1,
                Err(RecvTimeoutError::Timeout) => sink.emit(HEARTBEAT_LINE),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        for reader in readers {
            let _ = reader.join();
        }

        let status = child
            .wait()
            .map_err(|e| failure(format!("could not wait for {}: {}", program.display(), e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(failure(describe_exit(program, status)))
        }
    }
}

fn describe_exit(program: &Path, status: ExitStatus) -> String {
    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    match status.code() {
        Some(code) => format!("{} exited with status {}", name, code),
        None => format!("{} was terminated by a signal", name),
    }
}
