//! Conversion between process-list and execution plugin indices.
//!
//! Process lists number entries from 1 and count loaders; execution counts
//! plugins only, from 0. Every comparison between an iteration group's
//! bounds and the running plugin counter goes through these functions.

use crate::error::{Result, TomoflowError};

/// `index - 1 - n_loaders`: 1-based loader-inclusive to 0-based plugin index.
pub fn shift_plugin_index(n_loaders: usize, index: usize) -> Result<usize> {
    index
        .checked_sub(1 + n_loaders)
        .ok_or_else(|| {
            TomoflowError::Configuration(format!(
                "process list index {} refers to a loader or is out of range ({} loaders)",
                index, n_loaders
            ))
        })
}

/// Inverse of [`shift_plugin_index`].
pub fn unshift_plugin_index(n_loaders: usize, index: usize) -> usize {
    index + 1 + n_loaders
}

/// Whether execution index `plugin_index` lies within a group given by its
/// process-list bounds.
pub fn check_if_in_iterative_loop(
    n_loaders: usize,
    start: usize,
    end: usize,
    plugin_index: usize,
) -> Result<bool> {
    let start = shift_plugin_index(n_loaders, start)?;
    let end = shift_plugin_index(n_loaders, end)?;
    Ok(start <= plugin_index && plugin_index <= end)
}

/// Whether execution index `plugin_index` ends a group given by its
/// process-list bounds.
pub fn check_if_end_plugin_in_iterate_group(
    n_loaders: usize,
    end: usize,
    plugin_index: usize,
) -> Result<bool> {
    Ok(shift_plugin_index(n_loaders, end)? == plugin_index)
}
