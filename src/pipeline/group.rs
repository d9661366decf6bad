//! A contiguous run of plugins repeated a fixed number of times.
//!
//! The group's start plugin reads the previous iteration's result and its
//! end plugin writes alternately into an original dataset and its clone.
//! A single iterative plugin is a group whose start and end coincide; it
//! keeps its original input and receives the previous result as an extra,
//! last input.
//!
//! | iteration | start plugin reads            | end plugin writes |
//! |-----------|-------------------------------|-------------------|
//! | 0         | its own inputs                | original          |
//! | 1         | original                      | clone             |
//! | 2, 4, ... | clone                         | original          |
//! | 3, 5, ... | original                      | clone             |

use crate::data::{DatasetId, ExperimentIndex};
use crate::error::{Result, TomoflowError};
use crate::pipeline::group_utils::{shift_plugin_index, unshift_plugin_index};
use crate::pipeline::iteration::{FinalisedPair, IterationScheduler};
use crate::pipeline::iterative_plugin::IterativePlugin;
use crate::pipeline::plugin_datasets::PluginDatasets;
use std::ops::RangeInclusive;

/// Where a plugin sits in its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPosition {
    /// The group has one plugin.
    Only,
    Start,
    Inner,
    End,
}

#[derive(Debug, Clone)]
pub struct IteratePluginGroup {
    /// Process-list bounds, reported in errors.
    raw_start: usize,
    raw_end: usize,
    n_loaders: usize,
    start: usize,
    end: usize,
    scheduler: IterationScheduler,
}

impl IteratePluginGroup {
    /// A group from process-list bounds (1-based, loaders included).
    pub fn new(n_loaders: usize, raw_start: usize, raw_end: usize, iterations: usize) -> Result<Self> {
        let range_error = |message: String| TomoflowError::IterationGroup {
            start: raw_start,
            end: raw_end,
            message,
        };
        let start = shift_plugin_index(n_loaders, raw_start)
            .map_err(|e| range_error(e.to_string()))?;
        let end = shift_plugin_index(n_loaders, raw_end).map_err(|e| range_error(e.to_string()))?;
        if start > end {
            return Err(range_error("the group ends before it starts".to_string()));
        }
        let scheduler = IterationScheduler::new(iterations).map_err(|e| range_error(e.to_string()))?;
        Ok(Self {
            raw_start,
            raw_end,
            n_loaders,
            start,
            end,
            scheduler,
        })
    }

    /// A group of the single plugin at execution index `plugin_index`.
    pub fn single(n_loaders: usize, plugin_index: usize, iterations: usize) -> Result<Self> {
        let raw = unshift_plugin_index(n_loaders, plugin_index);
        Self::new(n_loaders, raw, raw, iterations)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn raw_bounds(&self) -> (usize, usize) {
        (self.raw_start, self.raw_end)
    }

    pub fn range(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iterations(&self) -> usize {
        self.scheduler.fixed_iterations()
    }

    pub fn scheduler(&self) -> &IterationScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut IterationScheduler {
        &mut self.scheduler
    }

    pub fn contains(&self, plugin_index: usize) -> bool {
        self.range().contains(&plugin_index)
    }

    pub fn overlaps(&self, other: &IteratePluginGroup) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Error carrying this group's process-list bounds.
    pub fn error(&self, message: impl Into<String>) -> TomoflowError {
        TomoflowError::IterationGroup {
            start: self.raw_start,
            end: self.raw_end,
            message: message.into(),
        }
    }

    pub fn position(&self, plugin_index: usize) -> Result<GroupPosition> {
        match plugin_index {
            i if i == self.start && i == self.end => Ok(GroupPosition::Only),
            i if i == self.start => Ok(GroupPosition::Start),
            i if i == self.end => Ok(GroupPosition::End),
            i if self.start < i && i < self.end => Ok(GroupPosition::Inner),
            i => Err(self.error(format!(
                "plugin {} is not in the group",
                unshift_plugin_index(self.n_loaders, i)
            ))),
        }
    }

    /// Register the iteration bindings once every plugin in the group is
    /// set up. `datasets` holds the group's plugins in order; the last one
    /// must have been set up through [`IterativePlugin`].
    pub fn configure(&mut self, index: &ExperimentIndex, datasets: &mut [PluginDatasets]) -> Result<()> {
        if datasets.len() != self.len() {
            return Err(self.error(format!(
                "{} plugins set up for a group of {}",
                datasets.len(),
                self.len()
            )));
        }
        let last = datasets.len() - 1;
        let (orig, clone) = IterativePlugin::alternating_pair(&datasets[last])?;
        let end_outputs: Vec<DatasetId> = datasets[last]
            .out_ids()
            .iter()
            .copied()
            .filter(|id| !datasets[last].clone_ids().contains(id))
            .collect();
        let swapped: Vec<DatasetId> = end_outputs
            .iter()
            .map(|&id| if id == orig { clone } else { id })
            .collect();

        let start = &mut datasets[0];
        let start_inputs = start.in_ids().to_vec();
        let first_input = *start_inputs
            .first()
            .ok_or_else(|| self.error("the start plugin has no input dataset"))?;
        let iteration_1_inputs = if last == 0 {
            let mut inputs = start_inputs.clone();
            inputs.push(orig);
            inputs
        } else {
            let mut inputs = start_inputs.clone();
            inputs[0] = orig;
            inputs
        };

        for id in [orig, clone] {
            start.adopt_input(first_input, id, index.get(id)?)?;
        }
        start.check_frame_totals()?;

        let scheduler = &mut self.scheduler;
        scheduler.set_iteration_datasets(0, start_inputs, end_outputs)?;
        scheduler.set_iteration_datasets(1, iteration_1_inputs, swapped)?;
        scheduler.set_alternating_datasets(index, orig, clone)?;
        tracing::debug!(
            "Iteration group ({}, {}) alternates {} and {}",
            self.raw_start,
            self.raw_end,
            orig,
            clone
        );
        Ok(())
    }

    /// Datasets the plugin at `plugin_index` reads this iteration.
    pub fn inputs_for(&self, plugin_index: usize, own: &PluginDatasets) -> Result<Vec<DatasetId>> {
        Ok(match self.position(plugin_index)? {
            GroupPosition::Only | GroupPosition::Start => self.scheduler.binding().inputs.clone(),
            GroupPosition::Inner | GroupPosition::End => own.in_ids().to_vec(),
        })
    }

    /// Datasets the plugin at `plugin_index` writes this iteration.
    pub fn outputs_for(&self, plugin_index: usize, own: &PluginDatasets) -> Result<Vec<DatasetId>> {
        Ok(match self.position(plugin_index)? {
            GroupPosition::Only | GroupPosition::End => self.scheduler.binding().outputs.clone(),
            GroupPosition::Start | GroupPosition::Inner => own
                .out_ids()
                .iter()
                .copied()
                .filter(|id| !own.clone_ids().contains(id))
                .collect(),
        })
    }

    pub fn finalise(&mut self, index: &mut ExperimentIndex) -> Result<Vec<FinalisedPair>> {
        self.scheduler.finalise(index)
    }
}
