//! Plugin runner: executes a process list on one rank.
//!
//! Every rank builds the same experiment index and the same plugin
//! instances from the process list, so dataset ids and negotiated frame
//! counts agree without any exchange. Frame data lives in a [`FrameStore`]
//! shared by all ranks.
//!
//! For each plugin, in order:
//! 1. Bind its datasets and run `before_setup`, `setup`, `after_setup`.
//! 2. Apply the plugin's padding to its inputs and reconcile frame counts.
//! 3. Allocate its outputs, then `pre_process`, one `process_frames` per
//!    process call of this rank, and `post_process`, with a barrier after
//!    each phase.
//! 4. Move its outputs into the in datasets of the next plugin.
//!
//! Iterate groups repeat steps 3 for every plugin of the group before the
//! scheduler advances; their end plugin's outputs are merged only once the
//! last iteration has been finalised.

use crate::config::{NegotiationSettings, PluginEntry, ProcessList};
use crate::data::{DataRole, DatasetId, ExperimentIndex};
use crate::error::{Result, ResultExt, TomoflowError};
use crate::pipeline::comm::{Communicator, LocalCluster};
use crate::pipeline::distribution::FrameDistribution;
use crate::pipeline::group::IteratePluginGroup;
use crate::pipeline::group_utils::{check_if_end_plugin_in_iterate_group, check_if_in_iterative_loop};
use crate::pipeline::iteration::{FinalisedPair, IterationPhase};
use crate::pipeline::iterative_plugin::IterativePlugin;
use crate::pipeline::plugin::{check_outputs, AnyPlugin, Plugin, ProcessContext, SetupContext};
use crate::pipeline::plugin_data::PluginData;
use crate::pipeline::plugin_datasets::PluginDatasets;
use crate::pipeline::store::FrameStore;
use crate::pipeline::transport::Transport;
use crate::pipeline::warnings::{DistributionWarning, WarningLog};
use chrono::{DateTime, Utc};
use ndarray::ArrayD;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

// ── Summary ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub id: DatasetId,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    /// Process-list bounds.
    pub start: usize,
    pub end: usize,
    pub iterations: usize,
    /// Logical names of the iterated datasets.
    pub datasets: Vec<String>,
}

/// What a run produced, as seen from one rank.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processes: usize,
    pub plugins_run: usize,
    pub datasets: Vec<DatasetSummary>,
    pub groups: Vec<GroupSummary>,
    pub warnings: Vec<DistributionWarning>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.finished_at - self.started_at;
        writeln!(
            f,
            "Ran {} plugins on {} processes in {} ms",
            self.plugins_run,
            self.processes,
            elapsed.num_milliseconds()
        )?;
        writeln!(f, "Datasets:")?;
        for d in &self.datasets {
            writeln!(f, "  {} {:?}", d.name, d.shape)?;
        }
        for g in &self.groups {
            writeln!(
                f,
                "Iterated plugins {}..={} {} times ({})",
                g.start,
                g.end,
                g.iterations,
                g.datasets.join(", ")
            )?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "Warnings:")?;
            for w in &self.warnings {
                writeln!(f, "  {}", w)?;
            }
        }
        Ok(())
    }
}

// ── Runner ───────────────────────────────────────────────────────────

pub struct PluginRunner<C: Communicator> {
    comm: C,
    store: Arc<dyn FrameStore>,
    transport: Box<dyn Transport + Send + Sync>,
    settings: NegotiationSettings,
    index: ExperimentIndex,
    warnings: WarningLog,
    plugins_run: usize,
}

impl<C: Communicator> PluginRunner<C> {
    pub fn new(comm: C, store: Arc<dyn FrameStore>, settings: NegotiationSettings) -> Self {
        let transport = Box::new(settings.transport());
        Self {
            comm,
            store,
            transport,
            settings,
            index: ExperimentIndex::new(),
            warnings: WarningLog::new(),
            plugins_run: 0,
        }
    }

    /// Negotiate frame counts with `transport` instead of the default.
    pub fn with_transport(mut self, transport: impl Transport + Send + Sync + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    pub fn index(&self) -> &ExperimentIndex {
        &self.index
    }

    pub fn store(&self) -> &Arc<dyn FrameStore> {
        &self.store
    }

    pub fn warnings(&self) -> &WarningLog {
        &self.warnings
    }

    /// Current contents of the in dataset called `name`.
    pub fn dataset_data(&self, name: &str) -> Result<ArrayD<f32>> {
        let id = self.index.lookup(DataRole::In, name)?;
        self.store.snapshot(id)
    }

    fn processes(&self) -> usize {
        self.comm.size()
    }

    pub fn run(&mut self, list: &ProcessList) -> Result<RunSummary> {
        let started_at = Utc::now();
        list.validate()?;
        if self.settings.processes != self.comm.size() {
            tracing::debug!(
                "Configured for {} processes, running on {}",
                self.settings.processes,
                self.comm.size()
            );
        }

        self.load(list)?;
        let mut groups = self.build_groups(list)?;
        let mut plugins = self.build_plugins(list, &groups)?;
        let mut group_summaries = Vec::new();

        let mut idx = 0;
        while idx < plugins.len() {
            match groups.iter().position(|g| g.start() == idx) {
                Some(pos) => {
                    let group = &mut groups[pos];
                    let range = group.range();
                    let finalised =
                        self.run_group(group, &list.plugins[range.clone()], &mut plugins[range])?;
                    let (start, end) = group.raw_bounds();
                    group_summaries.push(GroupSummary {
                        start,
                        end,
                        iterations: group.iterations(),
                        datasets: finalised.into_iter().map(|p| p.logical_name).collect(),
                    });
                    idx = group.end() + 1;
                }
                None => {
                    self.run_single(&list.plugins[idx], &mut plugins[idx])?;
                    idx += 1;
                }
            }
        }

        let datasets = self
            .index
            .user_dataset_names()
            .into_iter()
            .map(|name| {
                let id = self.index.lookup(DataRole::In, &name)?;
                let shape = self.index.get(id)?.shape().to_vec();
                Ok(DatasetSummary { name, id, shape })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RunSummary {
            started_at,
            finished_at: Utc::now(),
            processes: self.processes(),
            plugins_run: self.plugins_run,
            datasets,
            groups: group_summaries,
            warnings: self.warnings.clone().into_vec(),
        })
    }

    // ── Building ─────────────────────────────────────────────────────

    fn load(&mut self, list: &ProcessList) -> Result<()> {
        for loader in &list.loaders {
            let dataset = loader
                .dataset()
                .with_context(|| format!("Loading dataset '{}'", loader.name))?;
            let id = self.index.insert(DataRole::In, dataset);
            if self.comm.is_root() {
                self.store.fill(id, loader.initial_data()?)?;
            }
            tracing::info!("Loaded dataset {} {:?} as {}", loader.name, loader.shape, id);
        }
        self.comm.barrier();
        Ok(())
    }

    /// Configured groups plus one single-plugin group per plugin that
    /// iterates on its own.
    fn build_groups(&self, list: &ProcessList) -> Result<Vec<IteratePluginGroup>> {
        let n_loaders = list.n_loaders();
        let mut groups = list
            .iterate_groups
            .iter()
            .map(|g| IteratePluginGroup::new(n_loaders, g.start, g.end, g.iterations))
            .collect::<Result<Vec<_>>>()?;

        for (idx, entry) in list.plugins.iter().enumerate() {
            let iterations = entry.build()?.iterations();
            if iterations <= 1 {
                continue;
            }
            for g in &list.iterate_groups {
                if check_if_in_iterative_loop(n_loaders, g.start, g.end, idx)? {
                    return Err(TomoflowError::IterationGroup {
                        start: g.start,
                        end: g.end,
                        message: format!(
                            "plugin {} iterates on its own inside an iterate group",
                            entry.plugin_name()
                        ),
                    });
                }
            }
            groups.push(IteratePluginGroup::single(n_loaders, idx, iterations)?);
        }
        groups.sort_by_key(|g| g.start());
        Ok(groups)
    }

    fn build_plugins(&self, list: &ProcessList, groups: &[IteratePluginGroup]) -> Result<Vec<AnyPlugin>> {
        let n_loaders = list.n_loaders();
        let mut plugins = Vec::with_capacity(list.plugins.len());
        for (idx, entry) in list.plugins.iter().enumerate() {
            let plugin = entry
                .build()
                .with_context(|| format!("Building plugin '{}'", entry.plugin_name()))?;
            let mut ends_group = false;
            for group in groups {
                let (_, raw_end) = group.raw_bounds();
                if check_if_end_plugin_in_iterate_group(n_loaders, raw_end, idx)? {
                    ends_group = true;
                }
            }
            let plugin = match (ends_group, plugin.iterations() > 1) {
                (true, true) => IterativePlugin::wrap(plugin),
                (true, false) => IterativePlugin::wrap_group_end(plugin),
                (false, _) => plugin,
            };
            plugins.push(plugin);
        }
        Ok(plugins)
    }

    // ── Setup ────────────────────────────────────────────────────────

    fn setup_plugin(&mut self, entry: &PluginEntry, plugin: &mut AnyPlugin) -> Result<PluginDatasets> {
        let name = plugin.name().to_string();
        let context = || format!("Setting up plugin '{}'", name);
        if entry.in_datasets.len() != plugin.n_input_datasets()
            || entry.out_datasets.len() != plugin.n_output_datasets()
        {
            return Err(TomoflowError::Configuration(format!(
                "plugin {} takes {} in and {} out datasets, the process list gives {} and {}",
                name,
                plugin.n_input_datasets(),
                plugin.n_output_datasets(),
                entry.in_datasets.len(),
                entry.out_datasets.len()
            )));
        }

        let mut datasets = PluginDatasets::set_plugin_datasets(
            &mut self.index,
            &name,
            &entry.in_datasets,
            &entry.out_datasets,
            plugin.n_clone_datasets(),
        )
        .with_context(context)?;

        {
            let mut ctx = SetupContext::new(&mut self.index, &mut datasets);
            plugin.before_setup(&mut ctx).with_context(context)?;
            plugin.setup(&mut ctx).with_context(context)?;
            plugin.after_setup(&mut ctx).with_context(context)?;
        }

        if let Some(padding) = plugin.filter_padding() {
            let in_ids = datasets.in_ids().to_vec();
            for id in in_ids {
                if datasets.has_plugin_data(id) {
                    datasets.set_padding(id, Some(padding.clone()))?;
                }
            }
        }

        datasets
            .finalise_plugin_datasets(
                &*self.transport,
                self.processes(),
                self.settings.utilisation_threshold,
                &mut self.warnings,
            )
            .with_context(context)?;

        for &id in datasets.out_ids() {
            self.store.allocate(id, self.index.get(id)?.shape())?;
        }
        Ok(datasets)
    }

    // ── Execution ────────────────────────────────────────────────────

    fn run_single(&mut self, entry: &PluginEntry, plugin: &mut AnyPlugin) -> Result<()> {
        let datasets = self.setup_plugin(entry, plugin)?;
        let inputs = datasets.in_ids().to_vec();
        let outputs: Vec<DatasetId> = datasets
            .out_ids()
            .iter()
            .copied()
            .filter(|id| !datasets.clone_ids().contains(id))
            .collect();
        self.run_plugin(plugin, &datasets, &inputs, &outputs, 0, 1)?;
        self.merge()
    }

    fn run_group(
        &mut self,
        group: &mut IteratePluginGroup,
        entries: &[PluginEntry],
        plugins: &mut [AnyPlugin],
    ) -> Result<Vec<FinalisedPair>> {
        let mut all = Vec::with_capacity(group.len());
        for (offset, (entry, plugin)) in entries.iter().zip(plugins.iter_mut()).enumerate() {
            let datasets = self.setup_plugin(entry, plugin)?;
            all.push(datasets);
            if group.start() + offset != group.end() {
                // later plugins of the group read what this one writes
                self.merge()?;
            }
        }
        group.configure(&self.index, &mut all)?;

        let iterations = group.iterations();
        group.scheduler_mut().start()?;
        loop {
            let iteration = group.scheduler().current_iteration().unwrap_or_default();
            for (offset, plugin) in plugins.iter_mut().enumerate() {
                let idx = group.start() + offset;
                let inputs = group.inputs_for(idx, &all[offset])?;
                let outputs = group.outputs_for(idx, &all[offset])?;
                self.run_plugin(plugin, &all[offset], &inputs, &outputs, iteration, iterations)?;
            }
            if group.scheduler_mut().advance()? == IterationPhase::Complete {
                break;
            }
        }

        let finalised = group.finalise(&mut self.index)?;
        self.merge()?;
        Ok(finalised)
    }

    /// Move out datasets to in datasets and drop the backing data of
    /// removed ones.
    fn merge(&mut self) -> Result<()> {
        let removed = self.index.merge_out_to_in();
        self.comm.barrier();
        if self.comm.is_root() {
            for id in removed {
                self.store.release(id)?;
            }
        }
        Ok(())
    }

    fn run_plugin(
        &mut self,
        plugin: &mut AnyPlugin,
        datasets: &PluginDatasets,
        inputs: &[DatasetId],
        outputs: &[DatasetId],
        iteration: usize,
        iterations: usize,
    ) -> Result<()> {
        let name = plugin.name().to_string();
        let driving = match (inputs.first(), outputs.first()) {
            (Some(&id), _) => datasets.input_data(id)?,
            (None, Some(&id)) => datasets.plugin_data(id)?,
            (None, None) => {
                return Err(TomoflowError::plugin(&name, "has no datasets to drive it"))
            }
        };
        let distribution = FrameDistribution::new(
            driving.get_total_frames()?,
            driving.max_frames_transfer()?,
            driving.max_frames_process()?,
            self.processes(),
        );
        let rank = self.comm.rank();
        let offset = distribution.rank_offset(rank);
        let calls = distribution.rank_process_calls(rank).len();

        let mut ctx = ProcessContext {
            rank,
            processes: self.processes(),
            iteration,
            iterations,
            pcount: 0,
            frame_indices: Vec::new(),
        };
        if rank == 0 {
            tracing::info!(
                "Running {} ({} process calls over {} processes)",
                name,
                distribution.n_process_calls(),
                self.processes()
            );
        }

        plugin
            .pre_process(&ctx)
            .map_err(|e| e.with_context(format!("Plugin '{}' pre_process", name)))?;
        self.comm.barrier();

        for pcount in 0..calls {
            ctx.pcount = pcount;
            ctx.frame_indices = driving.get_current_frame_idx(pcount, offset)?;
            let frames = inputs
                .iter()
                .map(|&id| self.read_input(datasets.input_data(id)?, pcount, offset))
                .collect::<Result<Vec<_>>>()?;
            let results = plugin
                .process_frames(frames, &ctx)
                .map_err(|e| e.with_context(format!("Plugin '{}' process_frames", name)))?;
            check_outputs(&name, outputs.len(), &results)?;
            for (&id, block) in outputs.iter().zip(results.iter()) {
                self.write_output(datasets.plugin_data(id)?, pcount, offset, block)?;
            }
        }
        self.comm.barrier();

        plugin
            .post_process(&ctx)
            .map_err(|e| e.with_context(format!("Plugin '{}' post_process", name)))?;
        self.comm.barrier();
        self.plugins_run += 1;
        Ok(())
    }

    fn slice_indices(pd: &PluginData, frames: &[usize]) -> Result<Vec<Vec<usize>>> {
        frames.iter().map(|&f| pd.frame_to_slice_index(f)).collect()
    }

    fn read_input(&self, pd: &PluginData, pcount: usize, offset: usize) -> Result<ArrayD<f32>> {
        let mut frames = pd.get_current_frame_idx(pcount, offset)?;
        if !pd.fixed_length() {
            frames.truncate(pd.valid_frame_count(pcount, offset)?);
        }
        let slices = Self::slice_indices(pd, &frames)?;
        self.store
            .read_frames(pd.dataset_id(), pd.pattern()?, &slices, pd.padding())
    }

    fn write_output(&self, pd: &PluginData, pcount: usize, offset: usize, block: &ArrayD<f32>) -> Result<()> {
        let mut frames = pd.get_current_frame_idx(pcount, offset)?;
        frames.truncate(pd.valid_frame_count(pcount, offset)?);
        let slices = Self::slice_indices(pd, &frames)?;
        self.store
            .write_frames(pd.dataset_id(), pd.pattern()?, &slices, block)
    }
}

/// Run `list` on an in-process cluster of `list.negotiation.processes`
/// ranks sharing `store`. Returns rank 0's summary.
pub fn run_local(list: &ProcessList, store: Arc<dyn FrameStore>) -> Result<RunSummary> {
    let cluster = LocalCluster::new(list.negotiation.processes)?;
    let summaries = cluster.run(|comm| {
        PluginRunner::new(comm, Arc::clone(&store), list.negotiation.clone()).run(list)
    })?;
    summaries
        .into_iter()
        .next()
        .ok_or_else(|| TomoflowError::Transport("no rank produced a summary".to_string()))
}
