//! Iteration-aware plugin wrapper.
//!
//! Wraps a plain plugin and adds one clone slot to its outputs. After the
//! wrapped plugin's own setup, the slot becomes a clone of the first output
//! with the same pattern, frame counts and padding. The pair
//! (first output, clone) is what an [`crate::pipeline::group::IteratePluginGroup`]
//! alternates between.

use crate::data::DatasetId;
use crate::error::{Result, TomoflowError};
use crate::pipeline::plugin::{AnyPlugin, Plugin, ProcessContext, SetupContext};
use crate::pipeline::plugin_datasets::PluginDatasets;
use crate::types::Padding;
use ndarray::ArrayD;

pub struct IterativePlugin {
    inner: Box<dyn Plugin>,
    iterations: usize,
}

impl IterativePlugin {
    pub fn new(inner: Box<dyn Plugin>, iterations: usize) -> Self {
        Self { inner, iterations }
    }

    /// Wrap `plugin` so it iterates on its own, using its declared count.
    pub fn wrap(plugin: AnyPlugin) -> AnyPlugin {
        let iterations = plugin.iterations();
        AnyPlugin::custom(Self::new(Box::new(plugin), iterations))
    }

    /// Wrap `plugin` as the end of a group, where the group owns the count.
    pub fn wrap_group_end(plugin: AnyPlugin) -> AnyPlugin {
        AnyPlugin::custom(Self::new(Box::new(plugin), 1))
    }

    /// The (original, clone) pair of a plugin set up through this wrapper.
    pub fn alternating_pair(datasets: &PluginDatasets) -> Result<(DatasetId, DatasetId)> {
        let original = datasets.out_id(0)?;
        let clone = datasets.clone_ids().last().copied().ok_or_else(|| {
            TomoflowError::Configuration(format!(
                "plugin {} has no clone dataset to iterate with",
                datasets.plugin()
            ))
        })?;
        Ok((original, clone))
    }
}

impl Plugin for IterativePlugin {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn n_input_datasets(&self) -> usize {
        self.inner.n_input_datasets()
    }

    fn n_output_datasets(&self) -> usize {
        self.inner.n_output_datasets()
    }

    fn n_clone_datasets(&self) -> usize {
        self.inner.n_clone_datasets() + 1
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    fn before_setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        self.inner.before_setup(ctx)
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        self.inner.setup(ctx)
    }

    fn after_setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        self.inner.after_setup(ctx)?;
        let (original, clone) = Self::alternating_pair(ctx.datasets)?;
        ctx.make_clone(original, clone)
    }

    fn filter_padding(&self) -> Option<Padding> {
        self.inner.filter_padding()
    }

    fn pre_process(&mut self, ctx: &ProcessContext) -> Result<()> {
        self.inner.pre_process(ctx)
    }

    fn process_frames(
        &mut self,
        frames: Vec<ArrayD<f32>>,
        ctx: &ProcessContext,
    ) -> Result<Vec<ArrayD<f32>>> {
        self.inner.process_frames(frames, ctx)
    }

    fn post_process(&mut self, ctx: &ProcessContext) -> Result<()> {
        self.inner.post_process(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataRole, Dataset, ExperimentIndex};
    use crate::pipeline::plugin_kind::PluginKind;
    use crate::types::{DType, Padding};

    #[test]
    fn test_clone_mirrors_first_output() {
        let mut index = ExperimentIndex::new();
        let mut tomo = Dataset::new("tomo", vec![6, 4, 4], DType::Float32);
        tomo.add_pattern("PROJECTION", &[1, 2], &[0]).unwrap();
        index.insert(DataRole::In, tomo);

        let params: toml::Table = toml::from_str("iterations = 3").unwrap();
        let plugin = PluginKind::Accumulate.build("acc", &params).unwrap();
        let mut plugin = IterativePlugin::wrap(plugin);
        assert_eq!(plugin.iterations(), 3);
        assert_eq!(plugin.n_clone_datasets(), 1);

        let mut datasets = PluginDatasets::set_plugin_datasets(
            &mut index,
            "acc",
            &["tomo".to_string()],
            &["tomo".to_string()],
            plugin.n_clone_datasets(),
        )
        .unwrap();
        {
            let mut ctx = SetupContext::new(&mut index, &mut datasets);
            plugin.setup(&mut ctx).unwrap();
            let out = ctx.out_id(0).unwrap();
            ctx.plugin_data_mut(out)
                .unwrap()
                .set_padding(Some(Padding::frame_edges(1)));
            plugin.after_setup(&mut ctx).unwrap();
        }

        let (orig, clone) = IterativePlugin::alternating_pair(&datasets).unwrap();
        let clone_ds = index.get(clone).unwrap();
        assert_eq!(clone_ds.name(), "itr_clone1");
        assert_eq!(clone_ds.shape(), &[6, 4, 4]);
        assert_eq!(clone_ds.clone_of, Some(orig));
        let pd = datasets.plugin_data(clone).unwrap();
        assert_eq!(pd.pattern_name().unwrap(), "PROJECTION");
        assert_eq!(pd.padding(), Some(&Padding::frame_edges(1)));
    }
}
