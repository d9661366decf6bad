//! Experiment-wide index of datasets.
//!
//! Datasets live in an arena addressed by [`DatasetId`]. Two logical-name
//! maps sit on top: `in_data` holds what the next plugin may read and
//! `out_data` what the current plugin is producing. The iteration
//! machinery swaps identities only through [`ExperimentIndex::rebind`].

use super::dataset::Dataset;
use super::id::DatasetId;
use crate::error::{Result, TomoflowError};
use crate::types::DType;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataRole {
    In,
    Out,
}

impl fmt::Display for DataRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRole::In => write!(f, "in"),
            DataRole::Out => write!(f, "out"),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExperimentIndex {
    datasets: Vec<Dataset>,
    in_data: BTreeMap<String, DatasetId>,
    out_data: BTreeMap<String, DatasetId>,
}

impl ExperimentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, role: DataRole) -> &BTreeMap<String, DatasetId> {
        match role {
            DataRole::In => &self.in_data,
            DataRole::Out => &self.out_data,
        }
    }

    fn map_mut(&mut self, role: DataRole) -> &mut BTreeMap<String, DatasetId> {
        match role {
            DataRole::In => &mut self.in_data,
            DataRole::Out => &mut self.out_data,
        }
    }

    /// Add a dataset to the arena and bind it under its own name,
    /// replacing any existing binding of that name.
    pub fn insert(&mut self, role: DataRole, dataset: Dataset) -> DatasetId {
        let id = DatasetId(self.datasets.len() as u32);
        let name = dataset.name().to_string();
        self.datasets.push(dataset);
        if let Some(old) = self.map_mut(role).insert(name.clone(), id) {
            tracing::debug!("{} dataset {} overrides {}", role, name, old);
        }
        id
    }

    /// Create an empty dataset under `name`.
    pub fn create(&mut self, role: DataRole, name: &str, shape: Vec<usize>, dtype: DType) -> DatasetId {
        self.insert(role, Dataset::new(name, shape, dtype))
    }

    pub fn lookup(&self, role: DataRole, name: &str) -> Result<DatasetId> {
        self.map(role)
            .get(name)
            .copied()
            .ok_or_else(|| TomoflowError::UnknownDataset {
                role: role.to_string(),
                name: name.to_string(),
            })
    }

    pub fn contains(&self, role: DataRole, name: &str) -> bool {
        self.map(role).contains_key(name)
    }

    pub fn get(&self, id: DatasetId) -> Result<&Dataset> {
        self.datasets
            .get(id.index())
            .ok_or_else(|| TomoflowError::MissingMetadata {
                what: "dataset".to_string(),
                key: id.to_string(),
            })
    }

    pub fn get_mut(&mut self, id: DatasetId) -> Result<&mut Dataset> {
        self.datasets
            .get_mut(id.index())
            .ok_or_else(|| TomoflowError::MissingMetadata {
                what: "dataset".to_string(),
                key: id.to_string(),
            })
    }

    /// Point `logical_name` at `id` in the given role.
    pub fn rebind(&mut self, role: DataRole, logical_name: &str, id: DatasetId) -> Result<()> {
        self.get(id)?;
        tracing::debug!("Rebinding {} dataset {} to {}", role, logical_name, id);
        self.map_mut(role).insert(logical_name.to_string(), id);
        Ok(())
    }

    pub fn names(&self, role: DataRole) -> impl Iterator<Item = &str> {
        self.map(role).keys().map(|k| k.as_str())
    }

    pub fn bindings(&self, role: DataRole) -> impl Iterator<Item = (&str, DatasetId)> {
        self.map(role).iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Move every out dataset not marked `remove` into `in_data`, clearing
    /// `out_data`. Returns the ids of the datasets marked `remove`.
    pub fn merge_out_to_in(&mut self) -> Vec<DatasetId> {
        let out = std::mem::take(&mut self.out_data);
        let mut removed = Vec::new();
        for (name, id) in out {
            let marked = self
                .datasets
                .get(id.index())
                .map(|d| d.remove)
                .unwrap_or(true);
            if marked {
                if !removed.contains(&id) {
                    removed.push(id);
                }
                continue;
            }
            self.in_data.insert(name, id);
        }
        // a removed dataset must not stay readable under another name
        self.in_data
            .retain(|_, id| !self.datasets.get(id.index()).map(|d| d.remove).unwrap_or(true));
        removed
    }

    /// Names of the in datasets, excluding clones.
    pub fn user_dataset_names(&self) -> Vec<String> {
        self.in_data
            .iter()
            .filter(|(_, id)| self.datasets.get(id.index()).map(|d| !d.is_clone()).unwrap_or(false))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}
