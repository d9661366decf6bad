//! Non-fatal distribution warnings.
//!
//! An uneven split of frames across worker processes does not stop a run.
//! Each occurrence is logged when raised and collected here so the run
//! summary can report it once at the end.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionWarning {
    pub plugin: String,
    pub dataset: String,
    pub total_frames: usize,
    pub max_frames_transfer: usize,
    pub processes: usize,
    /// Fill of the last transfer block, in `(0, 1)`.
    pub utilisation: f64,
}

impl fmt::Display for DistributionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} frames of '{}' in blocks of {} across {} processes leaves the last block {:.0}% full",
            self.plugin,
            self.total_frames,
            self.dataset,
            self.max_frames_transfer,
            self.processes,
            self.utilisation * 100.0
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarningLog {
    warnings: Vec<DistributionWarning>,
}

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: DistributionWarning) {
        tracing::warn!("Uneven frame distribution: {}", warning);
        self.warnings.push(warning);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DistributionWarning> {
        self.warnings.iter()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_vec(self) -> Vec<DistributionWarning> {
        self.warnings
    }
}
