//! System module: tool lookup on a search path, vendored tool directories and
//! application root resolution.
//!
//! Nothing here mutates process state. The search path is always passed in so
//! callers decide whether it comes from `PATH` or from a hermetic test setup.

pub mod prereq;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub use prereq::PrereqChecker;

/// Split a `PATH`-style value into directories, skipping empty entries.
pub fn split_search_path(value: &OsString) -> Vec<PathBuf> {
    std::env::split_paths(value)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

/// The current process `PATH`, captured once.
pub fn process_search_path() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|v| split_search_path(&v))
        .unwrap_or_default()
}

/// Whether `path` is a regular file we may execute.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Candidate file names for a binary: the bare name plus the platform suffix.
fn binary_file_names(name: &str) -> Vec<String> {
    let suffix = std::env::consts::EXE_SUFFIX;
    if suffix.is_empty() || name.ends_with(suffix) {
        vec![name.to_string()]
    } else {
        vec![format!("{}{}", name, suffix), name.to_string()]
    }
}

/// Find the first of `names` inside `dir`.
pub fn find_in_dir(dir: &Path, names: &[String]) -> Option<PathBuf> {
    names
        .iter()
        .flat_map(|n| binary_file_names(n))
        .map(|file| dir.join(file))
        .find(|candidate| is_executable(candidate))
}

/// Find the first of `names` on the given search path. Directory order wins
/// over name order, matching how a shell resolves commands.
pub fn find_on_path(search_path: &[PathBuf], names: &[String]) -> Option<PathBuf> {
    search_path.iter().find_map(|dir| find_in_dir(dir, names))
}

/// Resolve an explicit tool location that may be the binary itself or a
/// directory containing it.
pub fn resolve_explicit_tool(location: &Path, names: &[String]) -> Option<PathBuf> {
    if location.is_dir() {
        find_in_dir(location, names)
    } else if is_executable(location) {
        Some(location.to_path_buf())
    } else {
        None
    }
}

/// An application root is usable when it ships a toolchain profile or the
/// runtime sources.
pub fn is_usable_app_root(root: &Path) -> bool {
    root.join(crate::config::toolchain::PROFILE_FILE_NAME).is_file()
        || root.join("runtime").join("CMakeLists.txt").is_file()
}

/// Pick the application root: the requested one if usable, else the
/// executable's directory, its parent, then the working directory. Falls back
/// to the requested path so the prereq check can report what is missing.
pub fn resolve_app_root(requested: Option<&Path>) -> PathBuf {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(root) = requested {
        candidates.push(root.to_path_buf());
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.to_path_buf());
            if let Some(parent) = dir.parent() {
                candidates.push(parent.to_path_buf());
            }
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd);
    }

    for candidate in &candidates {
        if is_usable_app_root(candidate) {
            return candidate.clone();
        }
    }
    requested
        .map(Path::to_path_buf)
        .or_else(|| candidates.into_iter().next())
        .unwrap_or_else(|| PathBuf::from("."))
}
