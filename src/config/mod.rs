//! Configuration module for tomoflow
//!
//! This module handles the process list: the description of a run that the
//! binary loads from disk and hands to the runner. It includes:
//! - Negotiation settings (worker count, utilisation threshold, frame cap)
//! - Loaders, which define the datasets a run starts from
//! - Plugin entries, in execution order
//! - Iterate groups over contiguous plugin ranges
//!
//! # Indexing
//!
//! Process-list entries are numbered from 1 and loaders come first, so with
//! two loaders the first plugin is entry 3. Iterate group bounds use this
//! numbering.
//!
//! # Formats
//!
//! Files ending in `.json` are read and written as JSON, everything else as
//! TOML.
//!
//! # Example
//!
//! ```toml
//! [negotiation]
//! processes = 2
//!
//! [[loaders]]
//! name = "tomo"
//! shape = [8, 4, 4]
//! patterns = [{ name = "PROJECTION", core_dims = [1, 2], slice_dims = [0] }]
//! fill = { kind = "ramp" }
//!
//! [[plugins]]
//! kind = "accumulate"
//! in_datasets = ["tomo"]
//! out_datasets = ["tomo"]
//! params = { increment = 1.0 }
//!
//! [[iterate_groups]]
//! start = 2
//! end = 2
//! iterations = 3
//! ```

pub mod settings;

pub use settings::{NegotiationSettings, DEFAULT_UTILISATION_THRESHOLD};

use crate::data::Dataset;
use crate::error::{Result, TomoflowError};
use crate::pipeline::plugin::AnyPlugin;
use crate::pipeline::plugin_kind::PluginKind;
use crate::types::DType;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A complete run description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessList {
    #[serde(default)]
    pub negotiation: NegotiationSettings,

    #[serde(default)]
    pub loaders: Vec<LoaderConfig>,

    #[serde(default)]
    pub plugins: Vec<PluginEntry>,

    #[serde(default)]
    pub iterate_groups: Vec<IterateGroupConfig>,
}

/// One pattern of a loaded dataset. Negative dims count from the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub name: String,
    pub core_dims: Vec<isize>,
    pub slice_dims: Vec<isize>,
}

/// Initial contents of a loaded dataset
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Fill {
    #[default]
    Zeros,
    Constant {
        value: f32,
    },
    /// Each element holds its flat (row-major) index.
    Ramp,
}

/// A dataset the run starts from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub name: String,
    pub shape: Vec<usize>,

    #[serde(default)]
    pub dtype: DType,

    /// `name.unit` per dimension, or empty
    #[serde(default)]
    pub axis_labels: Vec<String>,

    #[serde(default)]
    pub patterns: Vec<PatternConfig>,

    /// Dims holding x, y and z, to add the VOLUME_* patterns
    #[serde(default)]
    pub volume_patterns: Option<[usize; 3]>,

    #[serde(default)]
    pub fill: Fill,
}

impl LoaderConfig {
    /// The dataset this loader defines, patterns included.
    pub fn dataset(&self) -> Result<Dataset> {
        let mut dataset = Dataset::new(self.name.clone(), self.shape.clone(), self.dtype);
        if !self.axis_labels.is_empty() {
            dataset.set_axis_labels(&self.axis_labels)?;
        }
        for pattern in &self.patterns {
            dataset.add_pattern(&pattern.name, &pattern.core_dims, &pattern.slice_dims)?;
        }
        if let Some([x, y, z]) = self.volume_patterns {
            dataset.add_volume_patterns(x, y, z)?;
        }
        Ok(dataset)
    }

    /// Initial contents of the dataset.
    pub fn initial_data(&self) -> Result<ArrayD<f32>> {
        let shape = IxDyn(&self.shape);
        Ok(match &self.fill {
            Fill::Zeros => ArrayD::zeros(shape),
            Fill::Constant { value } => ArrayD::from_elem(shape, *value),
            Fill::Ramp => {
                let len: usize = self.shape.iter().product();
                ArrayD::from_shape_vec(shape, (0..len).map(|i| i as f32).collect()).map_err(
                    |e| TomoflowError::Configuration(format!("loader {}: {}", self.name, e)),
                )?
            }
        })
    }
}

/// One plugin of the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub kind: PluginKind,

    /// Defaults to the kind's name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub in_datasets: Vec<String>,

    #[serde(default)]
    pub out_datasets: Vec<String>,

    #[serde(default)]
    pub params: toml::Table,
}

impl PluginEntry {
    pub fn new(kind: PluginKind) -> Self {
        Self {
            kind,
            name: None,
            in_datasets: Vec::new(),
            out_datasets: Vec::new(),
            params: toml::Table::new(),
        }
    }

    pub fn plugin_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.display_name().to_lowercase())
    }

    pub fn build(&self) -> Result<AnyPlugin> {
        self.kind.build(&self.plugin_name(), &self.params)
    }
}

/// Plugins `start..=end` (process-list numbering) repeated `iterations` times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterateGroupConfig {
    pub start: usize,
    pub end: usize,
    pub iterations: usize,
}

impl ProcessList {
    /// Load a process list from a TOML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TomoflowError::Configuration(format!("Failed to read process list {:?}: {}", path, e))
        })?;

        let list: ProcessList = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                TomoflowError::Configuration(format!(
                    "Failed to parse process list {:?}: {}",
                    path, e
                ))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                TomoflowError::Configuration(format!(
                    "Failed to parse process list {:?}: {}",
                    path, e
                ))
            })?
        };
        list.validate()?;
        tracing::debug!(
            "Loaded process list {:?}: {} loaders, {} plugins, {} iterate groups",
            path,
            list.loaders.len(),
            list.plugins.len(),
            list.iterate_groups.len()
        );
        Ok(list)
    }

    /// Save the process list, choosing the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TomoflowError::Configuration(format!(
                        "Failed to create directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| {
                TomoflowError::Configuration(format!("Failed to serialize process list: {}", e))
            })?
        } else {
            toml::to_string_pretty(self).map_err(|e| {
                TomoflowError::Configuration(format!("Failed to serialize process list: {}", e))
            })?
        };

        std::fs::write(path, content).map_err(|e| {
            TomoflowError::Configuration(format!("Failed to write process list {:?}: {}", path, e))
        })
    }

    pub fn n_loaders(&self) -> usize {
        self.loaders.len()
    }

    /// Check everything that can be checked without running setup.
    pub fn validate(&self) -> Result<()> {
        self.negotiation.validate()?;
        let n_loaders = self.n_loaders();
        let last = n_loaders + self.plugins.len();
        let mut groups = self.iterate_groups.clone();
        groups.sort_by_key(|g| g.start);
        for group in &groups {
            let bad = |message: &str| TomoflowError::IterationGroup {
                start: group.start,
                end: group.end,
                message: message.to_string(),
            };
            if group.start <= n_loaders {
                return Err(bad("the group starts on a loader"));
            }
            if group.end > last {
                return Err(bad("the group ends after the last plugin"));
            }
            if group.start > group.end {
                return Err(bad("the group ends before it starts"));
            }
            if group.iterations == 0 {
                return Err(bad("the group must iterate at least once"));
            }
        }
        for pair in groups.windows(2) {
            if pair[1].start <= pair[0].end {
                return Err(TomoflowError::IterationGroup {
                    start: pair[1].start,
                    end: pair[1].end,
                    message: format!(
                        "overlaps the group ({}, {})",
                        pair[0].start, pair[0].end
                    ),
                });
            }
        }
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
