//! A dataset: shape, element type, axis labels and its pattern registry.

use super::id::DatasetId;
use super::pattern::{Pattern, PatternRegistry};
use crate::error::{Result, TomoflowError};
use crate::types::DType;
use serde::{Deserialize, Serialize};

/// Marker carried by the generated name of every clone dataset.
pub const CLONE_MARKER: &str = "itr_clone";

/// One axis label, written as `name.unit` in process lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisLabel {
    pub name: String,
    pub unit: String,
}

impl AxisLabel {
    pub fn parse(label: &str) -> Result<Self> {
        match label.split_once('.') {
            Some((name, unit)) if !name.is_empty() => Ok(Self {
                name: name.to_string(),
                unit: unit.to_string(),
            }),
            _ => Err(TomoflowError::Configuration(format!(
                "axis label '{}' is not of the form name.unit",
                label
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    name: String,
    shape: Vec<usize>,
    dtype: DType,
    patterns: PatternRegistry,
    axis_labels: Vec<AxisLabel>,
    /// Garbage at teardown.
    pub remove: bool,
    /// Set on clones: the dataset this one duplicates.
    pub clone_of: Option<DatasetId>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, dtype: DType) -> Self {
        let name = name.into();
        let ndims = shape.len();
        Self {
            patterns: PatternRegistry::new(name.clone(), ndims),
            name,
            shape,
            dtype,
            axis_labels: Vec::new(),
            remove: false,
            clone_of: None,
        }
    }

    /// A new dataset mirroring `other`: shape, dtype, labels and a deep copy
    /// of every pattern.
    pub fn create_from(name: impl Into<String>, other: &Dataset) -> Self {
        let name = name.into();
        let mut patterns = other.patterns.clone();
        patterns.set_owner(name.clone());
        Self {
            name,
            shape: other.shape.clone(),
            dtype: other.dtype,
            patterns,
            axis_labels: other.axis_labels.clone(),
            remove: false,
            clone_of: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.patterns.set_owner(self.name.clone());
    }

    pub fn is_clone(&self) -> bool {
        self.name.contains(CLONE_MARKER)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndims(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn itemsize(&self) -> usize {
        self.dtype.itemsize()
    }

    pub fn patterns(&self) -> &PatternRegistry {
        &self.patterns
    }

    pub fn add_pattern(&mut self, name: &str, core_dims: &[isize], slice_dims: &[isize]) -> Result<()> {
        self.patterns.add_pattern(name, core_dims, slice_dims)
    }

    pub fn get_pattern(&self, name: &str) -> Result<&Pattern> {
        self.patterns.get_pattern(name)
    }

    pub fn add_volume_patterns(&mut self, x: usize, y: usize, z: usize) -> Result<()> {
        self.patterns.add_volume_patterns(x, y, z)
    }

    // ── Axis labels ──────────────────────────────────────────────────

    pub fn axis_labels(&self) -> &[AxisLabel] {
        &self.axis_labels
    }

    /// Set one `name.unit` label per dimension.
    pub fn set_axis_labels<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<()> {
        if labels.len() != self.ndims() {
            return Err(TomoflowError::Configuration(format!(
                "dataset {} has {} dimensions but {} axis labels were given",
                self.name,
                self.ndims(),
                labels.len()
            )));
        }
        self.axis_labels = labels
            .iter()
            .map(|l| AxisLabel::parse(l.as_ref()))
            .collect::<Result<_>>()?;
        Ok(())
    }

    /// Dimension whose label name equals `label`, or contains it when
    /// `contains` is set.
    pub fn find_axis_label_dimension(&self, label: &str, contains: bool) -> Result<usize> {
        self.axis_labels
            .iter()
            .position(|l| {
                if contains {
                    l.name.contains(label)
                } else {
                    l.name == label
                }
            })
            .ok_or_else(|| TomoflowError::MissingMetadata {
                what: format!("axis label of dataset {}", self.name),
                key: label.to_string(),
            })
    }

    // ── Shape transforms ─────────────────────────────────────────────

    /// Permute the axes. `perm[new_axis] = old_axis`.
    pub fn transpose(&mut self, perm: &[usize]) -> Result<()> {
        self.patterns.remap_dims(perm)?;
        self.shape = perm.iter().map(|&d| self.shape[d]).collect();
        if !self.axis_labels.is_empty() {
            self.axis_labels = perm.iter().map(|&d| self.axis_labels[d].clone()).collect();
        }
        Ok(())
    }

    /// Drop dimensions, keeping only patterns that still have core and
    /// slice dimensions.
    pub fn remove_dimensions(&mut self, dims: &[usize]) -> Result<()> {
        let patterns = self.patterns.without_dims(dims)?;
        self.shape = keep_except(&self.shape, dims);
        if !self.axis_labels.is_empty() {
            self.axis_labels = keep_except(&self.axis_labels, dims);
        }
        self.patterns = patterns;
        Ok(())
    }

    /// Change the length of one dimension; patterns are unaffected.
    pub fn resize_dim(&mut self, dim: usize, size: usize) -> Result<()> {
        if dim >= self.ndims() || size == 0 {
            return Err(TomoflowError::Configuration(format!(
                "cannot resize dimension {} of {} to {}",
                dim, self.name, size
            )));
        }
        self.shape[dim] = size;
        Ok(())
    }

    /// Append trailing dimensions, each a slice dim of every pattern.
    pub fn add_dimensions(&mut self, sizes: &[usize], labels: &[AxisLabel]) {
        self.shape.extend_from_slice(sizes);
        self.patterns.extend_dims(sizes.len());
        if !self.axis_labels.is_empty() {
            self.axis_labels.extend_from_slice(labels);
        }
    }
}

fn keep_except<T: Clone>(items: &[T], removed: &[usize]) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter(|(i, _)| !removed.contains(i))
        .map(|(_, v)| v.clone())
        .collect()
}
