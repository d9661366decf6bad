//! Named dimension patterns of a dataset.
//!
//! A pattern partitions every dimension of a dataset into *core* dimensions
//! (kept whole for one unit of work) and *slice* dimensions (iterated over).
//! The first slice dimension varies fastest when frames are enumerated.
//!
//! The registry enforces the partition invariant on insertion: core and
//! slice dims are disjoint and together cover `0..ndims` exactly once.
//! Dimension remaps are applied to every registered pattern at once.

use crate::error::{Result, TomoflowError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pattern names a dataset may carry.
pub const KNOWN_PATTERNS: &[&str] = &[
    "SINOGRAM",
    "PROJECTION",
    "VOLUME_YZ",
    "VOLUME_XZ",
    "VOLUME_XY",
    "VOLUME_3D",
    "SPECTRUM",
    "DIFFRACTION",
    "CHANNEL",
    "SPECTRUM_STACK",
    "PROJECTION_STACK",
    "METADATA",
];

/// Core/slice partition of a dataset's dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    core_dims: Vec<usize>,
    slice_dims: Vec<usize>,
}

impl Pattern {
    /// Build a pattern without validation; the registry validates on insert.
    pub fn new(core_dims: Vec<usize>, slice_dims: Vec<usize>) -> Self {
        Self {
            core_dims,
            slice_dims,
        }
    }

    pub fn core_dims(&self) -> &[usize] {
        &self.core_dims
    }

    pub fn slice_dims(&self) -> &[usize] {
        &self.slice_dims
    }

    pub fn ndims(&self) -> usize {
        self.core_dims.len() + self.slice_dims.len()
    }

    /// The fastest-varying slice dimension, if any.
    pub fn main_slice_dim(&self) -> Option<usize> {
        self.slice_dims.first().copied()
    }

    /// Check that this pattern partitions `0..ndims`.
    pub fn validate(&self, name: &str, ndims: usize) -> Result<()> {
        let mut seen = vec![false; ndims];
        for &dim in self.core_dims.iter().chain(self.slice_dims.iter()) {
            if dim >= ndims {
                return Err(TomoflowError::Configuration(format!(
                    "pattern {} uses dimension {} but the dataset has {} dimensions",
                    name, dim, ndims
                )));
            }
            if seen[dim] {
                return Err(TomoflowError::Configuration(format!(
                    "pattern {} lists dimension {} more than once",
                    name, dim
                )));
            }
            seen[dim] = true;
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(TomoflowError::Configuration(format!(
                "pattern {} has an incorrect number of dimensions: {} required but {} specified \
                 (dimension {} is neither core nor slice)",
                name,
                ndims,
                self.ndims(),
                missing
            )));
        }
        Ok(())
    }

    /// Move `dim` to the front of the slice dims so it varies fastest.
    pub fn promote_slice_dim(&mut self, dim: usize) -> Result<()> {
        let pos = self.slice_dims.iter().position(|&d| d == dim).ok_or_else(|| {
            TomoflowError::Configuration(format!(
                "dimension {} is not a slice dimension of {:?}",
                dim, self.slice_dims
            ))
        })?;
        let d = self.slice_dims.remove(pos);
        self.slice_dims.insert(0, d);
        Ok(())
    }

    /// Reorder slice dims. `order` holds positions into the current slice
    /// dims; positions not named keep their relative order at the back.
    pub fn reorder_slice_dims(&mut self, order: &[usize]) -> Result<()> {
        if order.len() > self.slice_dims.len() {
            return Err(TomoflowError::Configuration(format!(
                "slicing order {:?} names more dimensions than the {} slice dimensions",
                order,
                self.slice_dims.len()
            )));
        }
        let mut ordered = Vec::with_capacity(self.slice_dims.len());
        for &pos in order {
            let dim = *self.slice_dims.get(pos).ok_or_else(|| {
                TomoflowError::Configuration(format!("slicing order entry {} out of range", pos))
            })?;
            if ordered.contains(&dim) {
                return Err(TomoflowError::Configuration(format!(
                    "slicing order {:?} repeats an entry",
                    order
                )));
            }
            ordered.push(dim);
        }
        let remaining: Vec<usize> = self
            .slice_dims
            .iter()
            .copied()
            .filter(|d| !ordered.contains(d))
            .collect();
        ordered.extend(remaining);
        self.slice_dims = ordered;
        Ok(())
    }

    /// Move a slice dimension into the core dims (fetch it whole).
    pub fn move_to_core(&mut self, dim: usize) -> Result<()> {
        let pos = self.slice_dims.iter().position(|&d| d == dim).ok_or_else(|| {
            TomoflowError::Configuration(format!(
                "dimension {} is not a slice dimension of {:?}",
                dim, self.slice_dims
            ))
        })?;
        self.slice_dims.remove(pos);
        self.core_dims.push(dim);
        self.core_dims.sort_unstable();
        Ok(())
    }

    fn mapped(&self, new_position: &[usize]) -> Pattern {
        Pattern {
            core_dims: self.core_dims.iter().map(|&d| new_position[d]).collect(),
            slice_dims: self.slice_dims.iter().map(|&d| new_position[d]).collect(),
        }
    }
}

/// Resolve possibly negative dimension indices against `ndims`.
pub fn non_negative_dims(dims: &[isize], ndims: usize) -> Result<Vec<usize>> {
    dims.iter()
        .map(|&d| {
            let resolved = if d < 0 { ndims as isize + d } else { d };
            if resolved < 0 || resolved as usize >= ndims {
                Err(TomoflowError::Configuration(format!(
                    "dimension {} is out of range for {} dimensions",
                    d, ndims
                )))
            } else {
                Ok(resolved as usize)
            }
        })
        .collect()
}

/// All patterns registered on one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatternRegistry {
    owner: String,
    ndims: usize,
    patterns: BTreeMap<String, Pattern>,
}

impl PatternRegistry {
    pub fn new(owner: impl Into<String>, ndims: usize) -> Self {
        Self {
            owner: owner.into(),
            ndims,
            patterns: BTreeMap::new(),
        }
    }

    pub fn ndims(&self) -> usize {
        self.ndims
    }

    pub(crate) fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    /// Register a pattern. Negative dims count from the end.
    pub fn add_pattern(&mut self, name: &str, core_dims: &[isize], slice_dims: &[isize]) -> Result<()> {
        let core = non_negative_dims(core_dims, self.ndims)?;
        let slice = non_negative_dims(slice_dims, self.ndims)?;
        self.insert(name, Pattern::new(core, slice))
    }

    /// Register an already-built pattern.
    pub fn insert(&mut self, name: &str, pattern: Pattern) -> Result<()> {
        if !KNOWN_PATTERNS.contains(&name) {
            return Err(TomoflowError::Configuration(format!(
                "the data pattern '{}' does not exist, choose from {:?}",
                name, KNOWN_PATTERNS
            )));
        }
        pattern.validate(name, self.ndims)?;
        self.patterns.insert(name.to_string(), pattern);
        Ok(())
    }

    pub fn get_pattern(&self, name: &str) -> Result<&Pattern> {
        self.patterns
            .get(name)
            .ok_or_else(|| TomoflowError::UnknownPattern {
                dataset: self.owner.clone(),
                pattern: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pattern)> {
        self.patterns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Add VOLUME_YZ, VOLUME_XZ and VOLUME_XY for a volume with axes x, y, z.
    pub fn add_volume_patterns(&mut self, x: usize, y: usize, z: usize) -> Result<()> {
        self.insert("VOLUME_YZ", self.volume_pattern(y, z, x))?;
        self.insert("VOLUME_XZ", self.volume_pattern(x, z, y))?;
        self.insert("VOLUME_XY", self.volume_pattern(x, y, z))
    }

    fn volume_pattern(&self, dim1: usize, dim2: usize, slice: usize) -> Pattern {
        let mut slice_dims = vec![slice];
        slice_dims.extend((0..self.ndims).filter(|d| ![dim1, dim2, slice].contains(d)));
        Pattern::new(vec![dim1, dim2], slice_dims)
    }

    /// Rewrite every pattern after the dataset axes are permuted.
    ///
    /// `perm[new_axis] = old_axis`, as in an array transpose.
    pub fn remap_dims(&mut self, perm: &[usize]) -> Result<()> {
        if perm.len() != self.ndims {
            return Err(TomoflowError::Configuration(format!(
                "dimension map {:?} does not cover {} dimensions",
                perm, self.ndims
            )));
        }
        let mut new_position = vec![usize::MAX; self.ndims];
        for (new_axis, &old_axis) in perm.iter().enumerate() {
            if old_axis >= self.ndims || new_position[old_axis] != usize::MAX {
                return Err(TomoflowError::Configuration(format!(
                    "dimension map {:?} is not a permutation",
                    perm
                )));
            }
            new_position[old_axis] = new_axis;
        }
        self.patterns = self
            .patterns
            .iter()
            .map(|(name, p)| (name.clone(), p.mapped(&new_position)))
            .collect();
        Ok(())
    }

    /// Registry for the same data with `removed` dimensions dropped.
    ///
    /// Patterns left without any core or without any slice dimension are
    /// dropped.
    pub fn without_dims(&self, removed: &[usize]) -> Result<PatternRegistry> {
        if let Some(&bad) = removed.iter().find(|&&d| d >= self.ndims) {
            return Err(TomoflowError::Configuration(format!(
                "cannot remove dimension {} from a {}-dimensional dataset",
                bad, self.ndims
            )));
        }
        let kept: Vec<usize> = (0..self.ndims).filter(|d| !removed.contains(d)).collect();
        let mut new_position = vec![usize::MAX; self.ndims];
        for (i, &d) in kept.iter().enumerate() {
            new_position[d] = i;
        }
        let mut out = PatternRegistry::new(self.owner.clone(), kept.len());
        for (name, p) in &self.patterns {
            let core: Vec<usize> = p
                .core_dims
                .iter()
                .filter(|d| !removed.contains(d))
                .map(|&d| new_position[d])
                .collect();
            let slice: Vec<usize> = p
                .slice_dims
                .iter()
                .filter(|d| !removed.contains(d))
                .map(|&d| new_position[d])
                .collect();
            if core.is_empty() || slice.is_empty() {
                tracing::debug!("Dropping pattern {} after removing dims {:?}", name, removed);
                continue;
            }
            out.patterns.insert(name.clone(), Pattern::new(core, slice));
        }
        Ok(out)
    }

    /// Append `extra` trailing dimensions as slice dims of every pattern.
    pub fn extend_dims(&mut self, extra: usize) {
        let new_dims: Vec<usize> = (self.ndims..self.ndims + extra).collect();
        for p in self.patterns.values_mut() {
            p.slice_dims.extend(new_dims.iter().copied());
        }
        self.ndims += extra;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tomo_registry() -> PatternRegistry {
        let mut reg = PatternRegistry::new("tomo", 3);
        reg.add_pattern("SINOGRAM", &[0, 2], &[1]).unwrap();
        reg.add_pattern("PROJECTION", &[1, 2], &[0]).unwrap();
        reg
    }

    #[test]
    fn test_add_and_get_pattern() {
        let reg = tomo_registry();
        let sino = reg.get_pattern("SINOGRAM").unwrap();
        assert_eq!(sino.core_dims(), &[0, 2]);
        assert_eq!(sino.slice_dims(), &[1]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_overlapping_dims_rejected() {
        let mut reg = PatternRegistry::new("tomo", 3);
        let err = reg.add_pattern("SINOGRAM", &[0, 1], &[1, 2]).unwrap_err();
        assert!(matches!(err, TomoflowError::Configuration(_)));
    }

    #[test]
    fn test_incomplete_partition_rejected() {
        let mut reg = PatternRegistry::new("tomo", 3);
        let err = reg.add_pattern("SINOGRAM", &[0], &[1]).unwrap_err();
        assert!(err.to_string().contains("incorrect number of dimensions"));
    }

    #[test]
    fn test_unknown_pattern_name_rejected() {
        let mut reg = PatternRegistry::new("tomo", 3);
        assert!(reg.add_pattern("BANANA", &[0, 1], &[2]).is_err());
    }

    #[test]
    fn test_missing_pattern_lookup() {
        let reg = tomo_registry();
        match reg.get_pattern("SPECTRUM").unwrap_err() {
            TomoflowError::UnknownPattern { dataset, pattern } => {
                assert_eq!(dataset, "tomo");
                assert_eq!(pattern, "SPECTRUM");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_negative_dims() {
        let mut reg = PatternRegistry::new("tomo", 3);
        reg.add_pattern("PROJECTION", &[-2, -1], &[0]).unwrap();
        assert_eq!(reg.get_pattern("PROJECTION").unwrap().core_dims(), &[1, 2]);
    }

    #[test]
    fn test_remap_rewrites_every_pattern() {
        let mut reg = tomo_registry();
        // swap axes 0 and 1
        reg.remap_dims(&[1, 0, 2]).unwrap();
        let sino = reg.get_pattern("SINOGRAM").unwrap();
        assert_eq!(sino.core_dims(), &[1, 2]);
        assert_eq!(sino.slice_dims(), &[0]);
        let proj = reg.get_pattern("PROJECTION").unwrap();
        assert_eq!(proj.core_dims(), &[0, 2]);
        assert_eq!(proj.slice_dims(), &[1]);
    }

    #[test]
    fn test_remap_rejects_non_permutation() {
        let mut reg = tomo_registry();
        let before = reg.clone();
        assert!(reg.remap_dims(&[0, 0, 2]).is_err());
        assert_eq!(reg, before);
    }

    #[test]
    fn test_volume_patterns() {
        let mut reg = PatternRegistry::new("vol", 4);
        reg.add_volume_patterns(0, 1, 2).unwrap();
        let yz = reg.get_pattern("VOLUME_YZ").unwrap();
        assert_eq!(yz.core_dims(), &[1, 2]);
        assert_eq!(yz.slice_dims(), &[0, 3]);
        let xy = reg.get_pattern("VOLUME_XY").unwrap();
        assert_eq!(xy.slice_dims(), &[2, 3]);
    }

    #[test]
    fn test_without_dims_drops_degenerate_patterns() {
        let reg = tomo_registry();
        let reduced = reg.without_dims(&[0]).unwrap();
        assert_eq!(reduced.ndims(), 2);
        // PROJECTION loses its only slice dim
        assert!(!reduced.contains("PROJECTION"));
        let sino = reduced.get_pattern("SINOGRAM").unwrap();
        assert_eq!(sino.core_dims(), &[1]);
        assert_eq!(sino.slice_dims(), &[0]);
    }

    #[test]
    fn test_extend_dims_appends_slice_dims() {
        let mut reg = tomo_registry();
        reg.extend_dims(1);
        assert_eq!(reg.ndims(), 4);
        assert_eq!(reg.get_pattern("SINOGRAM").unwrap().slice_dims(), &[1, 3]);
    }

    #[test]
    fn test_promote_and_reorder_slice_dims() {
        let mut p = Pattern::new(vec![2], vec![0, 1, 3]);
        p.promote_slice_dim(3).unwrap();
        assert_eq!(p.slice_dims(), &[3, 0, 1]);
        p.reorder_slice_dims(&[2]).unwrap();
        assert_eq!(p.slice_dims(), &[1, 3, 0]);
        assert!(p.promote_slice_dim(2).is_err());
    }

    fn partition_strategy() -> impl Strategy<Value = (usize, Vec<usize>, usize)> {
        (1usize..7).prop_flat_map(|n| {
            (
                Just(n),
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
                0..=n,
            )
        })
    }

    proptest! {
        #[test]
        fn test_valid_partitions_are_accepted((n, dims, split) in partition_strategy()) {
            let core: Vec<usize> = dims[..split].to_vec();
            let slice: Vec<usize> = dims[split..].to_vec();
            let p = Pattern::new(core.clone(), slice.clone());
            prop_assert!(p.validate("PROJECTION", n).is_ok());
            // Property: disjoint and covering
            let mut all: Vec<usize> = core.iter().chain(slice.iter()).copied().collect();
            all.sort_unstable();
            prop_assert_eq!(all, (0..n).collect::<Vec<_>>());
        }

        #[test]
        fn test_remap_preserves_partition((n, dims, split) in partition_strategy()) {
            let mut reg = PatternRegistry::new("d", n);
            reg.insert("PROJECTION", Pattern::new(dims[..split].to_vec(), dims[split..].to_vec())).unwrap();
            let perm: Vec<usize> = (0..n).rev().collect();
            reg.remap_dims(&perm).unwrap();
            let p = reg.get_pattern("PROJECTION").unwrap();
            prop_assert!(p.validate("PROJECTION", n).is_ok());
        }
    }
}
