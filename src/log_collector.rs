//! Build log sink and the persistent log pipeline behind it.
//!
//! The orchestrator only knows the [`LogSink`] trait: a caller-owned receiver
//! that gets every progress line synchronously, in emission order. Any
//! `Fn(&str)` closure is a sink, so the IDE can hand in a closure that pushes
//! into its own log panel.
//!
//! [`LogCollector`] is the sink used by the CLI and the background build
//! service. It persists lines to disk and forwards them to a UI channel:
//!
//! ```text
//! Build thread
//!     |
//! [LogCollector] (crossbeam unbounded, never blocks the build)
//!     |
//! [writer thread] --> logs/full/<session>.log    (every line)
//!     |           --> logs/parsed/<session>.log  (step and result lines)
//!     v
//! UI channel (tokio mpsc, try_send, dropped when full)
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Log, Metadata, Record};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Caller-supplied receiver of build progress lines.
///
/// Called from whatever thread runs the build. Implementations shared with a
/// UI thread must be `Sync` themselves or marshal lines over a channel.
pub trait LogSink {
    fn emit(&self, line: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str),
{
    fn emit(&self, line: &str) {
        self(line)
    }
}

/// Sink that drops everything (headless checks, tests).
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _line: &str) {}
}

/// Whether a build line belongs in the condensed "parsed" log.
pub fn is_milestone_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    (trimmed.starts_with('[') && trimmed[1..].split('/').next().map_or(false, |n| {
        !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())
    })) || trimmed.starts_with("BUILD ")
        || trimmed.starts_with("Size target")
        || trimmed.starts_with("Missing build prerequisites")
        || trimmed.starts_with("Warning:")
}

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the writer signals once everything queued before it is on disk.
    Flush(std::sync::mpsc::Sender<()>),
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    /// "full" or "parsed"
    pub log_type: String,
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            log_type: "full".to_string(),
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            log_type: "parsed".to_string(),
            ..LogLine::new(message)
        }
    }
}

#[derive(Clone, Debug, Default)]
struct SessionState {
    name: Option<String>,
    /// Bumped on every new session so the writer reopens its files.
    generation: u64,
}

/// Persistent build log writer.
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    ui_tx: Option<tokio::sync::mpsc::Sender<LogLine>>,
    session: Arc<Mutex<SessionState>>,
}

impl LogCollector {
    /// Create the collector and its writer thread. `ui_tx` receives a copy of
    /// every line when set.
    pub fn new(
        log_dir: PathBuf,
        ui_tx: Option<tokio::sync::mpsc::Sender<LogLine>>,
    ) -> Result<Self, String> {
        std::fs::create_dir_all(log_dir.join("full"))
            .map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(log_dir.join("parsed"))
            .map_err(|e| format!("Failed to create parsed log dir: {}", e))?;

        let (tx, rx) = unbounded::<LogMessage>();
        let session = Arc::new(Mutex::new(SessionState::default()));

        let writer_dir = log_dir.clone();
        let writer_ui = ui_tx.clone();
        let writer_session = Arc::clone(&session);

        // Plain OS thread: works the same whether lines come from a tokio
        // worker, the blocking pool, or a bare std::thread.
        std::thread::spawn(move || {
            let mut files: HashMap<&'static str, File> = HashMap::new();
            let mut seen_generation = 0u64;

            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let name = match writer_session.lock() {
                            Ok(state) => {
                                if state.generation != seen_generation {
                                    files.clear();
                                    seen_generation = state.generation;
                                }
                                state.name.clone()
                            }
                            Err(_) => None,
                        };
                        let name = name.unwrap_or_else(default_session_name);

                        let formatted = format!("[{}] {}\n", line.timestamp, line.message);
                        write_to(&mut files, "full", &writer_dir, &name, &formatted);
                        if line.log_type == "parsed" {
                            write_to(&mut files, "parsed", &writer_dir, &name, &formatted);
                        }

                        if let Some(ui) = &writer_ui {
                            let _ = ui.try_send(line);
                        }
                    }
                    LogMessage::Flush(done) => {
                        for file in files.values_mut() {
                            let _ = file.flush();
                        }
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            log_dir,
            ui_tx,
            session,
        })
    }

    /// Route subsequent lines into `logs/{full,parsed}/<filename>`.
    pub fn start_new_session(&self, filename: &str) -> Result<PathBuf, String> {
        let mut state = self
            .session
            .lock()
            .map_err(|e| format!("Failed to lock session state: {}", e))?;
        state.name = Some(filename.to_string());
        state.generation = state.generation.wrapping_add(1);
        log::debug!("New build log session: {}", filename);
        Ok(self.log_dir.join("full").join(filename))
    }

    /// Start a session named after the current time, e.g. `build_20260101_120000.log`.
    pub fn start_build_session(&self) -> Result<PathBuf, String> {
        let name = format!("build_{}.log", Local::now().format("%Y%m%d_%H%M%S%.3f"));
        self.start_new_session(&name)
    }

    pub fn session_log_path(&self) -> Option<PathBuf> {
        self.session
            .lock()
            .ok()
            .and_then(|s| s.name.clone())
            .map(|name| self.log_dir.join("full").join(name))
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Queue a line. Never blocks and never fails.
    pub fn log(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log(LogLine::new(message.into()));
    }

    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log(LogLine::parsed(message.into()));
    }

    /// Block until every line queued before this call is flushed.
    pub fn flush_blocking(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        done_rx
            .recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Async flavor of [`flush_blocking`](Self::flush_blocking) for tokio callers.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let collector = self.clone();
        tokio::task::spawn_blocking(move || collector.flush_blocking())
            .await
            .map_err(|e| format!("Flush task failed: {}", e))?
    }
}

impl Clone for LogCollector {
    fn clone(&self) -> Self {
        LogCollector {
            tx: self.tx.clone(),
            log_dir: self.log_dir.clone(),
            ui_tx: self.ui_tx.clone(),
            session: Arc::clone(&self.session),
        }
    }
}

impl LogSink for LogCollector {
    fn emit(&self, line: &str) {
        if is_milestone_line(line) {
            self.log_parsed(line);
        } else {
            self.log_str(line);
        }
    }
}

/// Wires `log::info!()` and friends into the collector. Records with target
/// "parsed" also land in the condensed log.
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("[{}] {}", record.level(), record.args());
        if record.target() == "parsed" {
            self.log_parsed(message);
        } else {
            self.log_str(message);
        }
    }

    fn flush(&self) {
        let _ = self.flush_blocking();
    }
}

fn default_session_name() -> String {
    format!("{}.log", Local::now().format("%Y%m%d"))
}

fn write_to(
    files: &mut HashMap<&'static str, File>,
    kind: &'static str,
    log_dir: &Path,
    session_name: &str,
    formatted: &str,
) {
    if !files.contains_key(kind) {
        let path = log_dir.join(kind).join(session_name);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                files.insert(kind, file);
            }
            Err(e) => {
                eprintln!("[Log] Failed to open {}: {}", path.display(), e);
                return;
            }
        }
    }
    if let Some(file) = files.get_mut(kind) {
        let _ = file.write_all(formatted.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    #[test]
    fn test_closure_is_a_sink() {
        let lines = Mutex::new(Vec::new());
        let sink = |line: &str| lines.lock().unwrap().push(line.to_string());
        sink.emit("one");
        sink.emit("two");
        assert_eq!(*lines.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_milestone_detection() {
        assert!(is_milestone_line("[3/7] Prepare scratch workspace"));
        assert!(is_milestone_line("BUILD SUCCESSFUL"));
        assert!(is_milestone_line("Size target 64k hit. 10 bytes left in budget."));
        assert!(!is_milestone_line("[Build] compiler chatter"));
        assert!(!is_milestone_line("-- Configuring done"));
    }

    #[test]
    fn test_collector_creates_directories() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("logs");
        let collector = LogCollector::new(dir.clone(), None);
        assert!(collector.is_ok());
        assert!(dir.join("full").exists());
        assert!(dir.join("parsed").exists());
    }

    #[test]
    fn test_session_routes_lines() {
        let temp = tempfile::tempdir().unwrap();
        let collector = LogCollector::new(temp.path().to_path_buf(), None).unwrap();
        let path = collector.start_new_session("session.log").unwrap();

        collector.emit("[1/7] Check prerequisites");
        collector.emit("compiler noise");
        collector.flush_blocking().unwrap();

        let full = fs::read_to_string(&path).unwrap();
        assert!(full.contains("[1/7] Check prerequisites"));
        assert!(full.contains("compiler noise"));

        let parsed = fs::read_to_string(temp.path().join("parsed").join("session.log")).unwrap();
        assert!(parsed.contains("[1/7] Check prerequisites"));
        assert!(!parsed.contains("compiler noise"));
    }

    #[tokio::test]
    async fn test_lines_forwarded_to_ui() {
        let temp = tempfile::tempdir().unwrap();
        let (ui_tx, mut ui_rx) = tokio::sync::mpsc::channel(16);
        let collector = LogCollector::new(temp.path().to_path_buf(), Some(ui_tx)).unwrap();

        collector.emit("hello");
        collector.wait_for_empty().await.unwrap();

        let line = ui_rx.recv().await.unwrap();
        assert_eq!(line.message, "hello");
        assert_eq!(line.log_type, "full");
    }
}
