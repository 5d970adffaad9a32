//! Step 7: check the written artifact and report the size budget.

use super::package::PROJECT_ENTRY;
use crate::error::BuildError;
use crate::models::{BuildTargetKind, SizeTargetPreset};
use crate::pack::PackReader;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeReport {
    pub final_bytes: u64,
    pub budget_bytes: u64,
    pub budget_hit: bool,
    /// Empty when no size target is set.
    pub message: String,
}

/// Compare `final_bytes` against the preset. A miss is reported, never an error.
pub fn size_report(final_bytes: u64, preset: SizeTargetPreset) -> SizeReport {
    let budget = preset.budget_bytes();
    if budget == 0 {
        return SizeReport {
            final_bytes,
            budget_bytes: 0,
            budget_hit: false,
            message: String::new(),
        };
    }
    let (hit, message) = if final_bytes <= budget {
        (
            true,
            format!(
                "Size target {} hit. {} bytes left in budget.",
                preset,
                budget - final_bytes
            ),
        )
    } else {
        (
            false,
            format!(
                "Size target {} missed. Overshot by {} bytes.",
                preset,
                final_bytes - budget
            ),
        )
    };
    SizeReport {
        final_bytes,
        budget_bytes: budget,
        budget_hit: hit,
        message,
    }
}

/// The artifact must exist, be non-empty and carry the project.
pub fn verify_artifact(
    path: &Path,
    kind: BuildTargetKind,
    preset: SizeTargetPreset,
) -> Result<SizeReport, BuildError> {
    let meta = fs::metadata(path).map_err(|e| {
        BuildError::PackagingFailure(format!("output artifact {} is missing: {}", path.display(), e))
    })?;
    if !meta.is_file() || meta.len() == 0 {
        return Err(BuildError::PackagingFailure(format!(
            "output artifact {} is empty",
            path.display()
        )));
    }

    if kind == BuildTargetKind::PackagedDemo {
        let file = fs::File::open(path)
            .map_err(|e| BuildError::PackagingFailure(format!("cannot reopen {}: {}", path.display(), e)))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| BuildError::PackagingFailure(format!("{} is not a valid zip: {}", path.display(), e)))?;
        archive
            .by_name(PROJECT_ENTRY)
            .map_err(|_| BuildError::PackagingFailure(format!("{} has no {}", path.display(), PROJECT_ENTRY)))?;
    } else {
        let reader = PackReader::open(path)?;
        reader.raw(PROJECT_ENTRY)?;
    }

    Ok(size_report(meta.len(), preset))
}
