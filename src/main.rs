use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use demoforge::config::SettingsManager;
use demoforge::orchestrator::{BuildEvent, BuildOrchestrator, BuildService};
use demoforge::system::{resolve_app_root, PrereqChecker};
use demoforge::{BuildMode, BuildRequest, BuildTargetKind, LogCollector, PackReader, SizeTargetPreset};

#[derive(Parser, Debug)]
#[command(name = "demoforge", version, about = "Build self-contained demo executables")]
struct Cli {
    /// Debug-level logging in the session log.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a project into an executable.
    Build(BuildArgs),
    /// Check build prerequisites without building.
    Check {
        #[arg(long)]
        app_root: Option<PathBuf>,
        #[arg(long, default_value = "release")]
        mode: BuildMode,
    },
    /// List the pack entries of a built executable or packaged zip.
    Inspect { artifact: PathBuf },
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[arg(long)]
    project: PathBuf,
    #[arg(long)]
    output: PathBuf,
    #[arg(long)]
    app_root: Option<PathBuf>,
    #[arg(long)]
    solution_root: Option<PathBuf>,
    #[arg(long)]
    scratch_root: Option<PathBuf>,
    /// selfcontained, packaged, screensaver or micro
    #[arg(long)]
    target: Option<BuildTargetKind>,
    /// release or compressed
    #[arg(long)]
    mode: Option<BuildMode>,
    /// none, 64k, 128k, 256k, 512k or 1024k
    #[arg(long)]
    size: Option<SizeTargetPreset>,
    #[arg(long)]
    runtime_debug: bool,
    /// Explicit tool location, e.g. --tool CMake=/opt/cmake/bin/cmake
    #[arg(long = "tool", value_parser = parse_tool_override)]
    tools: Vec<(String, PathBuf)>,
    /// Settings file to read defaults from (default: user config dir).
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Save this build's options back to the settings file.
    #[arg(long)]
    remember: bool,
}

fn parse_tool_override(value: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{}'", value))?;
    if name.trim().is_empty() || path.trim().is_empty() {
        return Err(format!("expected NAME=PATH, got '{}'", value));
    }
    Ok((name.trim().to_string(), PathBuf::from(path.trim())))
}

fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("demoforge")
        .join("logs")
}

/// Install the collector as the global `log` backend.
fn init_logging(verbose: bool) -> Option<LogCollector> {
    match LogCollector::new(log_dir(), None) {
        Ok(collector) => {
            if log::set_boxed_logger(Box::new(collector.clone())).is_ok() {
                log::set_max_level(if verbose {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                });
            }
            Some(collector)
        }
        Err(e) => {
            eprintln!("warning: build logs will not be saved: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let collector = init_logging(cli.verbose);

    let outcome = match cli.command {
        Command::Build(args) => run_build(args, collector.clone()).await,
        Command::Check { app_root, mode } => run_check(app_root.as_deref(), mode),
        Command::Inspect { artifact } => run_inspect(&artifact),
    };

    if let Some(collector) = &collector {
        let _ = collector.wait_for_empty().await;
    }

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run_build(args: BuildArgs, collector: Option<LogCollector>) -> anyhow::Result<bool> {
    let settings_path = match &args.settings {
        Some(p) => p.clone(),
        None => demoforge::config::loader::get_global_settings_path()
            .context("cannot locate the settings file")?,
    };
    let mut settings = SettingsManager::load_from(&settings_path)
        .with_context(|| format!("cannot load settings from {}", settings_path.display()))?;

    let app_root = resolve_app_root(args.app_root.as_deref());
    let mut request = BuildRequest::new(app_root, &args.project, &args.output);
    settings.apply_to(&mut request);

    if let Some(target) = args.target {
        request.target_kind = target;
    }
    if let Some(mode) = args.mode {
        request.mode = mode;
    }
    if let Some(size) = args.size {
        request.size_target = size;
    }
    if args.runtime_debug {
        request.runtime_debug_log = true;
    }
    if args.solution_root.is_some() {
        request.solution_root = args.solution_root.clone();
    }
    if args.scratch_root.is_some() {
        request.scratch_root = args.scratch_root.clone();
    }
    for (name, path) in &args.tools {
        request.tool_overrides.insert(name.clone(), path.clone());
    }

    if args.remember {
        settings.capture_from(&request);
        SettingsManager::save_to(&settings, &settings_path)
            .with_context(|| format!("cannot save settings to {}", settings_path.display()))?;
    }

    let mut service = BuildService::new(BuildOrchestrator::new());
    if let Some(collector) = collector.clone() {
        service = service.with_log_collector(collector);
    }
    let mut handle = service.spawn(request)?;

    let mut result = None;
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(BuildEvent::Log(line)) => println!("{}", line),
                Some(BuildEvent::Progress(_)) => {}
                Some(BuildEvent::Finished(r)) => result = Some(r),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling after the current step...");
                handle.cancel();
            }
        }
    }
    let waited = handle.wait().await.context("build task panicked")?;
    let result = result.unwrap_or(waited);

    if let Some(log) = collector.as_ref().and_then(|c| c.session_log_path()) {
        eprintln!("Build log: {}", log.display());
    }
    Ok(result.success)
}

fn run_check(app_root: Option<&Path>, mode: BuildMode) -> anyhow::Result<bool> {
    let root = resolve_app_root(app_root);
    let report = PrereqChecker::new().check(&root, mode);

    println!("Application root: {}", root.display());
    for check in &report.checks {
        let state = if check.is_satisfied() {
            "ok"
        } else if check.required {
            "MISSING"
        } else {
            "optional, missing"
        };
        match (&check.found, &check.version) {
            (Some(path), Some(v)) => println!("  {:<24} {} ({}, {})", check.name, state, path.display(), v),
            (Some(path), None) => println!("  {:<24} {} ({})", check.name, state, path.display()),
            _ => println!("  {:<24} {}", check.name, state),
        }
    }
    if !report.message.is_empty() {
        println!();
        println!("{}", report.message);
    }
    Ok(report.ok)
}

fn run_inspect(artifact: &Path) -> anyhow::Result<bool> {
    if artifact.extension().and_then(|e| e.to_str()) == Some("zip") {
        let file = std::fs::File::open(artifact)
            .with_context(|| format!("cannot open {}", artifact.display()))?;
        let mut archive = zip::ZipArchive::new(file).context("not a zip archive")?;
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            println!("{:>10}  {}", entry.size(), entry.name());
        }
        return Ok(true);
    }

    let reader = PackReader::open(artifact)
        .with_context(|| format!("cannot read pack from {}", artifact.display()))?;
    println!("runtime: {} bytes", reader.executable_len());
    if reader.entries().is_empty() {
        bail!("{} has an empty pack", artifact.display());
    }
    for entry in reader.entries() {
        let size = reader.read(&entry.path).map(|d| d.len()).unwrap_or(0);
        println!("{:>10}  {:>10}  {}", entry.size, size, entry.path);
    }
    Ok(true)
}
