//! Plugin abstraction for the pipeline.
//!
//! Two-layer design, as for the processing stages:
//! - **`Plugin` trait**: the stage interface. Hook points run in the order
//!   `before_setup`, `setup`, `after_setup`, then `pre_process`,
//!   `process_frames` once per process call, and `post_process`.
//! - **`BuiltinPlugin` enum**: the plugins shipped with the crate, dispatched
//!   by match.
//!
//! `AnyPlugin` wraps either so the runner handles both uniformly. Iteration
//! awareness is added by composition, see
//! [`crate::pipeline::iterative_plugin::IterativePlugin`].

use crate::data::{Dataset, DatasetId, ExperimentIndex};
use crate::error::{Result, TomoflowError};
use crate::pipeline::plugin_data::{PatternSetup, PluginData};
use crate::pipeline::plugin_datasets::PluginDatasets;
use crate::pipeline::plugins::{AccumulatePlugin, DownsamplePlugin, PassthroughPlugin};
use crate::types::Padding;
use ndarray::ArrayD;

/// Access to the experiment index and the plugin's datasets during setup.
pub struct SetupContext<'a> {
    pub index: &'a mut ExperimentIndex,
    pub datasets: &'a mut PluginDatasets,
}

impl<'a> SetupContext<'a> {
    pub fn new(index: &'a mut ExperimentIndex, datasets: &'a mut PluginDatasets) -> Self {
        Self { index, datasets }
    }

    pub fn plugin(&self) -> &str {
        self.datasets.plugin()
    }

    pub fn in_id(&self, n: usize) -> Result<DatasetId> {
        self.datasets.in_id(n)
    }

    pub fn out_id(&self, n: usize) -> Result<DatasetId> {
        self.datasets.out_id(n)
    }

    pub fn in_dataset(&self, n: usize) -> Result<&Dataset> {
        self.index.get(self.datasets.in_id(n)?)
    }

    pub fn out_dataset(&self, n: usize) -> Result<&Dataset> {
        self.index.get(self.datasets.out_id(n)?)
    }

    pub fn out_dataset_mut(&mut self, n: usize) -> Result<&mut Dataset> {
        let id = self.datasets.out_id(n)?;
        self.index.get_mut(id)
    }

    /// Make out dataset `n` a copy of `source` in shape and patterns,
    /// keeping its own name.
    pub fn create_out_from(&mut self, n: usize, source: DatasetId) -> Result<DatasetId> {
        let id = self.datasets.out_id(n)?;
        let name = self.index.get(id)?.name().to_string();
        let copy = Dataset::create_from(name, self.index.get(source)?);
        *self.index.get_mut(id)? = copy;
        Ok(id)
    }

    /// Replace out dataset `n` with `dataset`, keeping the out name.
    pub fn define_out(&mut self, n: usize, mut dataset: Dataset) -> Result<DatasetId> {
        let id = self.datasets.out_id(n)?;
        dataset.set_name(self.index.get(id)?.name().to_string());
        *self.index.get_mut(id)? = dataset;
        Ok(id)
    }

    pub fn setup_in(&mut self, n: usize, setup: PatternSetup) -> Result<&mut PluginData> {
        let id = self.datasets.in_id(n)?;
        self.datasets.setup_plugin_data(self.index, id, setup)
    }

    pub fn setup_out(&mut self, n: usize, setup: PatternSetup) -> Result<&mut PluginData> {
        let id = self.datasets.out_id(n)?;
        self.datasets.setup_plugin_data(self.index, id, setup)
    }

    pub fn plugin_data(&self, id: DatasetId) -> Result<&PluginData> {
        self.datasets.plugin_data(id)
    }

    pub fn plugin_data_mut(&mut self, id: DatasetId) -> Result<&mut PluginData> {
        self.datasets.plugin_data_mut(id)
    }

    /// Turn the empty `slot` into a clone of `original`: same shape and
    /// patterns, and a copy of the original's PluginData and padding.
    pub fn make_clone(&mut self, original: DatasetId, slot: DatasetId) -> Result<()> {
        let slot_name = self.index.get(slot)?.name().to_string();
        let mut clone = Dataset::create_from(slot_name, self.index.get(original)?);
        clone.clone_of = Some(original);
        *self.index.get_mut(slot)? = clone;
        let dataset = self.index.get(slot)?;
        self.datasets.adopt(original, slot, dataset)?;
        tracing::debug!("Created clone {} of {}", slot, original);
        Ok(())
    }
}

/// What a plugin sees on each process call.
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    pub rank: usize,
    pub processes: usize,
    /// 0-based, 0 outside iteration groups.
    pub iteration: usize,
    pub iterations: usize,
    /// Process calls made so far on this rank.
    pub pcount: usize,
    /// Frame indices of the driving dataset for this call.
    pub frame_indices: Vec<usize>,
}

/// The pipeline stage interface.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn n_input_datasets(&self) -> usize {
        1
    }

    fn n_output_datasets(&self) -> usize {
        1
    }

    /// Extra out slots the iteration machinery fills with clones.
    fn n_clone_datasets(&self) -> usize {
        0
    }

    /// Fixed number of times this plugin runs on its own.
    fn iterations(&self) -> usize {
        1
    }

    fn before_setup(&mut self, _ctx: &mut SetupContext) -> Result<()> {
        Ok(())
    }

    /// Define out datasets and bind every dataset to a pattern.
    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()>;

    fn after_setup(&mut self, _ctx: &mut SetupContext) -> Result<()> {
        Ok(())
    }

    /// Padding required on the in datasets.
    fn filter_padding(&self) -> Option<Padding> {
        None
    }

    fn pre_process(&mut self, _ctx: &ProcessContext) -> Result<()> {
        Ok(())
    }

    /// One `[n, core...]` block per input, one per output back.
    fn process_frames(
        &mut self,
        frames: Vec<ArrayD<f32>>,
        ctx: &ProcessContext,
    ) -> Result<Vec<ArrayD<f32>>>;

    fn post_process(&mut self, _ctx: &ProcessContext) -> Result<()> {
        Ok(())
    }
}

/// Enum dispatch for built-in plugins.
pub enum BuiltinPlugin {
    Passthrough(PassthroughPlugin),
    Accumulate(AccumulatePlugin),
    Downsample(DownsamplePlugin),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            BuiltinPlugin::Passthrough($p) => $body,
            BuiltinPlugin::Accumulate($p) => $body,
            BuiltinPlugin::Downsample($p) => $body,
        }
    };
}

impl Plugin for BuiltinPlugin {
    fn name(&self) -> &str {
        dispatch!(self, p => p.name())
    }

    fn n_input_datasets(&self) -> usize {
        dispatch!(self, p => p.n_input_datasets())
    }

    fn n_output_datasets(&self) -> usize {
        dispatch!(self, p => p.n_output_datasets())
    }

    fn n_clone_datasets(&self) -> usize {
        dispatch!(self, p => p.n_clone_datasets())
    }

    fn iterations(&self) -> usize {
        dispatch!(self, p => p.iterations())
    }

    fn before_setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        dispatch!(self, p => p.before_setup(ctx))
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        dispatch!(self, p => p.setup(ctx))
    }

    fn after_setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        dispatch!(self, p => p.after_setup(ctx))
    }

    fn filter_padding(&self) -> Option<Padding> {
        dispatch!(self, p => p.filter_padding())
    }

    fn pre_process(&mut self, ctx: &ProcessContext) -> Result<()> {
        dispatch!(self, p => p.pre_process(ctx))
    }

    fn process_frames(
        &mut self,
        frames: Vec<ArrayD<f32>>,
        ctx: &ProcessContext,
    ) -> Result<Vec<ArrayD<f32>>> {
        dispatch!(self, p => p.process_frames(frames, ctx))
    }

    fn post_process(&mut self, ctx: &ProcessContext) -> Result<()> {
        dispatch!(self, p => p.post_process(ctx))
    }
}

/// Wrapper that holds either a built-in plugin or a trait object.
pub enum AnyPlugin {
    Builtin(BuiltinPlugin),
    Custom(Box<dyn Plugin>),
}

impl std::fmt::Debug for AnyPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            AnyPlugin::Builtin(_) => "Builtin",
            AnyPlugin::Custom(_) => "Custom",
        };
        f.debug_tuple(variant).field(&self.name()).finish()
    }
}

impl AnyPlugin {
    pub fn custom(plugin: impl Plugin + 'static) -> Self {
        AnyPlugin::Custom(Box::new(plugin))
    }

    fn inner(&self) -> &dyn Plugin {
        match self {
            AnyPlugin::Builtin(p) => p,
            AnyPlugin::Custom(p) => p.as_ref(),
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Plugin {
        match self {
            AnyPlugin::Builtin(p) => p,
            AnyPlugin::Custom(p) => p.as_mut(),
        }
    }
}

impl Plugin for AnyPlugin {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn n_input_datasets(&self) -> usize {
        self.inner().n_input_datasets()
    }

    fn n_output_datasets(&self) -> usize {
        self.inner().n_output_datasets()
    }

    fn n_clone_datasets(&self) -> usize {
        self.inner().n_clone_datasets()
    }

    fn iterations(&self) -> usize {
        self.inner().iterations()
    }

    fn before_setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        self.inner_mut().before_setup(ctx)
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        self.inner_mut().setup(ctx)
    }

    fn after_setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        self.inner_mut().after_setup(ctx)
    }

    fn filter_padding(&self) -> Option<Padding> {
        self.inner().filter_padding()
    }

    fn pre_process(&mut self, ctx: &ProcessContext) -> Result<()> {
        self.inner_mut().pre_process(ctx)
    }

    fn process_frames(
        &mut self,
        frames: Vec<ArrayD<f32>>,
        ctx: &ProcessContext,
    ) -> Result<Vec<ArrayD<f32>>> {
        self.inner_mut().process_frames(frames, ctx)
    }

    fn post_process(&mut self, ctx: &ProcessContext) -> Result<()> {
        self.inner_mut().post_process(ctx)
    }
}

/// Check that a plugin returned one block per output.
pub fn check_outputs(plugin: &str, expected: usize, outputs: &[ArrayD<f32>]) -> Result<()> {
    if outputs.len() != expected {
        return Err(TomoflowError::plugin(
            plugin,
            format!("returned {} output blocks, expected {}", outputs.len(), expected),
        ));
    }
    Ok(())
}
