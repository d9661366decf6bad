//! The datasets bound to one plugin instance.
//!
//! Resolves the plugin's in/out dataset names against the experiment index,
//! creates the out datasets (and clone slots), owns one [`PluginData`] per
//! bound dataset, and reconciles their frame counts in
//! [`PluginDatasets::finalise_plugin_datasets`].
//!
//! # Reconciliation
//!
//! The PluginData moving the most bytes is authoritative and alone talks to
//! the transport. Every other one either copies its counts (same number of
//! frames) or scales them by the authoritative frames-per-call ratio. A
//! `multiple` request on a dataset with a different frame count cannot be
//! resolved and fails.

use crate::data::{DataRole, Dataset, DatasetId, ExperimentIndex, CLONE_MARKER};
use crate::error::{Result, TomoflowError};
use crate::pipeline::plugin_data::{PatternSetup, PluginData, TransferInfo};
use crate::pipeline::transport::{transfer_shape, Transport};
use crate::pipeline::warnings::WarningLog;
use crate::types::{DType, Padding};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct PluginDatasets {
    plugin: String,
    in_ids: Vec<DatasetId>,
    out_ids: Vec<DatasetId>,
    clone_ids: Vec<DatasetId>,
    plugin_data: BTreeMap<DatasetId, PluginData>,
    /// Views used when a dataset rebound by the iteration machinery is read.
    input_views: BTreeMap<DatasetId, PluginData>,
}

/// Generated name of the `n`th clone dataset (1-based).
pub fn clone_name(n: usize) -> String {
    format!("{}{}", CLONE_MARKER, n)
}

impl PluginDatasets {
    /// Resolve in datasets by name and create empty out datasets and
    /// `n_clones` clone slots in `out_data`.
    pub fn set_plugin_datasets(
        index: &mut ExperimentIndex,
        plugin: &str,
        in_names: &[String],
        out_names: &[String],
        n_clones: usize,
    ) -> Result<Self> {
        let in_ids = in_names
            .iter()
            .map(|name| index.lookup(DataRole::In, name))
            .collect::<Result<Vec<_>>>()?;

        let mut out_ids = Vec::with_capacity(out_names.len() + n_clones);
        for name in out_names {
            if index.contains(DataRole::Out, name) {
                return Err(TomoflowError::Configuration(format!(
                    "plugin {} lists out dataset {} twice",
                    plugin, name
                )));
            }
            out_ids.push(index.create(DataRole::Out, name, Vec::new(), DType::default()));
        }
        let mut clone_ids = Vec::with_capacity(n_clones);
        for n in 1..=n_clones {
            let id = index.create(DataRole::Out, &clone_name(n), Vec::new(), DType::default());
            out_ids.push(id);
            clone_ids.push(id);
        }

        tracing::debug!(
            "Plugin {} bound to in {:?} and out {:?}",
            plugin,
            in_names,
            out_names
        );
        Ok(Self {
            plugin: plugin.to_string(),
            in_ids,
            out_ids,
            clone_ids,
            plugin_data: BTreeMap::new(),
            input_views: BTreeMap::new(),
        })
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn in_ids(&self) -> &[DatasetId] {
        &self.in_ids
    }

    /// Out datasets, clone slots last.
    pub fn out_ids(&self) -> &[DatasetId] {
        &self.out_ids
    }

    pub fn clone_ids(&self) -> &[DatasetId] {
        &self.clone_ids
    }

    pub fn in_id(&self, n: usize) -> Result<DatasetId> {
        self.in_ids.get(n).copied().ok_or_else(|| TomoflowError::Configuration(format!(
            "plugin {} has no in dataset {}",
            self.plugin, n
        )))
    }

    pub fn out_id(&self, n: usize) -> Result<DatasetId> {
        self.out_ids.get(n).copied().ok_or_else(|| TomoflowError::Configuration(format!(
            "plugin {} has no out dataset {}",
            self.plugin, n
        )))
    }

    // ── PluginData ───────────────────────────────────────────────────

    /// Create the PluginData for `id` and bind it to a pattern.
    pub fn setup_plugin_data(
        &mut self,
        index: &ExperimentIndex,
        id: DatasetId,
        setup: PatternSetup,
    ) -> Result<&mut PluginData> {
        let dataset = index.get(id)?;
        let mut pd = PluginData::new(id, dataset);
        pd.setup(dataset, setup)?;
        self.plugin_data.insert(id, pd);
        self.plugin_data_mut(id)
    }

    pub fn plugin_data(&self, id: DatasetId) -> Result<&PluginData> {
        self.plugin_data
            .get(&id)
            .ok_or_else(|| TomoflowError::MissingMetadata {
                what: format!("plugin data of {}", self.plugin),
                key: id.to_string(),
            })
    }

    pub fn plugin_data_mut(&mut self, id: DatasetId) -> Result<&mut PluginData> {
        let plugin = &self.plugin;
        self.plugin_data
            .get_mut(&id)
            .ok_or_else(|| TomoflowError::MissingMetadata {
                what: format!("plugin data of {}", plugin),
                key: id.to_string(),
            })
    }

    pub fn has_plugin_data(&self, id: DatasetId) -> bool {
        self.plugin_data.contains_key(&id)
    }

    /// Give `id` a copy of `template`'s PluginData, padding included.
    pub fn adopt(&mut self, template: DatasetId, id: DatasetId, dataset: &Dataset) -> Result<()> {
        if self.plugin_data.contains_key(&id) {
            return Ok(());
        }
        let pd = self.plugin_data(template)?.rebound(id, dataset)?;
        self.plugin_data.insert(id, pd);
        Ok(())
    }

    /// Read `id` through a copy of `template`'s PluginData from now on.
    /// Negotiated counts and padding are copied with it.
    pub fn adopt_input(&mut self, template: DatasetId, id: DatasetId, dataset: &Dataset) -> Result<()> {
        let pd = self.plugin_data(template)?.rebound(id, dataset)?;
        self.input_views.insert(id, pd);
        Ok(())
    }

    /// The view to read `id` through.
    pub fn input_data(&self, id: DatasetId) -> Result<&PluginData> {
        match self.input_views.get(&id) {
            Some(pd) => Ok(pd),
            None => self.plugin_data(id),
        }
    }

    pub fn set_padding(&mut self, id: DatasetId, padding: Option<Padding>) -> Result<()> {
        self.plugin_data_mut(id)?.set_padding(padding);
        Ok(())
    }

    /// Bound datasets, inputs first, each once.
    fn bound_ids(&self) -> Vec<DatasetId> {
        let mut ids: Vec<DatasetId> = Vec::with_capacity(self.in_ids.len() + self.out_ids.len());
        for &id in self.in_ids.iter().chain(self.out_ids.iter()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    // ── Finalisation ─────────────────────────────────────────────────

    /// Reconcile frame counts across every bound dataset.
    pub fn finalise_plugin_datasets(
        &mut self,
        transport: &dyn Transport,
        processes: usize,
        threshold: f64,
        warnings: &mut WarningLog,
    ) -> Result<()> {
        let ids = self.bound_ids();
        if ids.is_empty() {
            return Ok(());
        }

        let mut sizes = Vec::with_capacity(ids.len());
        for &id in &ids {
            let pd = self.plugin_data(id)?;
            sizes.push((id, pd.transfer_bytes()?, pd.get_total_frames()?));
        }
        self.check_frame_totals()?;

        // strict comparison keeps the first of equal sizes
        let mut auth = sizes[0];
        for &entry in &sizes[1..] {
            if entry.1 > auth.1 {
                auth = entry;
            }
        }
        let (auth_id, _, auth_total) = auth;

        let plugin = self.plugin.clone();
        let info = {
            let pd = self.plugin_data_mut(auth_id)?;
            pd.compute_transfer_frames(transport, processes, threshold, &plugin, warnings)?;
            pd.transfer()?.clone()
        };

        for &(id, _, total) in &sizes {
            if id == auth_id {
                continue;
            }
            let pd = self.plugin_data_mut(id)?;
            let derived = derive_transfer(pd, &info, auth_total, total, processes)?;
            pd.set_transfer(derived);
        }
        Ok(())
    }

    /// Every view of the same dataset must agree on the frame total.
    pub fn check_frame_totals(&self) -> Result<()> {
        let mut totals: BTreeMap<DatasetId, usize> = BTreeMap::new();
        for pd in self.plugin_data.values().chain(self.input_views.values()) {
            let total = pd.get_total_frames()?;
            if let Some(&seen) = totals.get(&pd.dataset_id()) {
                if seen != total {
                    return Err(TomoflowError::Configuration(format!(
                        "plugin {}: dataset {} reports {} and {} frames",
                        self.plugin,
                        pd.dataset_name(),
                        seen,
                        total
                    )));
                }
            }
            totals.insert(pd.dataset_id(), total);
        }
        Ok(())
    }
}

fn derive_transfer(
    pd: &PluginData,
    auth: &TransferInfo,
    auth_total: usize,
    total: usize,
    processes: usize,
) -> Result<TransferInfo> {
    let request = pd.transfer_request(processes)?;
    if total == auth_total {
        return Ok(TransferInfo {
            max_frames_transfer: auth.max_frames_transfer,
            transfer_shape: transfer_shape(&request, auth.max_frames_transfer),
            max_frames_process: auth.max_frames_process,
            no_squeeze: auth.max_frames_process == 1 && pd.frames().is_multiple(),
        });
    }
    if pd.frames().is_multiple() {
        return Err(TomoflowError::IncompatibleFrameSpec {
            dataset: pd.dataset_name().to_string(),
            message: format!(
                "'multiple' frames requested on a dataset with {} frames while the plugin \
                 is driven by {} frames",
                total, auth_total
            ),
        });
    }
    let scaled = total * auth.max_frames_process;
    if auth_total == 0 || scaled % auth_total != 0 || scaled == 0 {
        return Err(TomoflowError::IncompatibleFrameSpec {
            dataset: pd.dataset_name().to_string(),
            message: format!(
                "{} frames cannot be processed in step with {} frames taken {} at a time",
                total, auth_total, auth.max_frames_process
            ),
        });
    }
    let mfp = scaled / auth_total;
    let calls_per_transfer = auth.max_frames_transfer / auth.max_frames_process;
    let mft = mfp * calls_per_transfer.max(1);
    tracing::debug!(
        "{}: derived mft={} mfp={} from {} -> {} frames",
        pd.dataset_name(),
        mft,
        mfp,
        auth_total,
        total
    );
    Ok(TransferInfo {
        max_frames_transfer: mft,
        transfer_shape: transfer_shape(&request, mft),
        max_frames_process: mfp,
        no_squeeze: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transport::{BlockTransport, MockTransport};
    use crate::types::FrameSpec;

    fn index_with(shape: Vec<usize>) -> ExperimentIndex {
        let mut index = ExperimentIndex::new();
        let mut d = Dataset::new("tomo", shape, DType::Float32);
        d.add_pattern("PROJECTION", &[1, 2], &[0]).unwrap();
        d.add_pattern("SINOGRAM", &[0, 2], &[1]).unwrap();
        index.insert(DataRole::In, d);
        index
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn define_out(index: &mut ExperimentIndex, id: DatasetId, shape: Vec<usize>) {
        let name = index.get(id).unwrap().name().to_string();
        let mut d = Dataset::new(name, shape, DType::Float32);
        d.add_pattern("PROJECTION", &[1, 2], &[0]).unwrap();
        *index.get_mut(id).unwrap() = d;
    }

    #[test]
    fn test_set_plugin_datasets_creates_outs_and_clones() {
        let mut index = index_with(vec![8, 4, 4]);
        let ds = PluginDatasets::set_plugin_datasets(
            &mut index,
            "p",
            &names(&["tomo"]),
            &names(&["tomo"]),
            1,
        )
        .unwrap();
        assert_eq!(ds.in_ids().len(), 1);
        assert_eq!(ds.out_ids().len(), 2);
        assert_eq!(ds.clone_ids(), &ds.out_ids()[1..]);
        assert_eq!(
            index.lookup(DataRole::Out, "itr_clone1").unwrap(),
            ds.clone_ids()[0]
        );
        assert_ne!(ds.in_ids()[0], ds.out_ids()[0]);
    }

    #[test]
    fn test_unknown_in_dataset() {
        let mut index = index_with(vec![8, 4, 4]);
        let err = PluginDatasets::set_plugin_datasets(
            &mut index,
            "p",
            &names(&["missing"]),
            &names(&[]),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, TomoflowError::UnknownDataset { .. }));
    }

    #[test]
    fn test_equal_totals_copy_counts() {
        let mut index = index_with(vec![100, 8, 8]);
        let mut ds = PluginDatasets::set_plugin_datasets(
            &mut index,
            "p",
            &names(&["tomo"]),
            &names(&["out"]),
            0,
        )
        .unwrap();
        let (in_id, out_id) = (ds.in_ids()[0], ds.out_ids()[0]);
        define_out(&mut index, out_id, vec![100, 8, 8]);
        ds.setup_plugin_data(&index, in_id, PatternSetup::new("PROJECTION", FrameSpec::multiple()))
            .unwrap();
        ds.setup_plugin_data(&index, out_id, PatternSetup::new("PROJECTION", FrameSpec::multiple()))
            .unwrap();
        let mut warnings = WarningLog::new();
        ds.finalise_plugin_datasets(&BlockTransport::default(), 4, 0.85, &mut warnings)
            .unwrap();
        for id in [in_id, out_id] {
            let pd = ds.plugin_data(id).unwrap();
            assert_eq!(pd.get_total_frames().unwrap(), 100);
            assert_eq!(pd.max_frames_transfer().unwrap(), 25);
            assert_eq!(pd.max_frames_process().unwrap(), 25);
        }
    }

    #[test]
    fn test_reducing_dataset_scales_counts() {
        let mut index = index_with(vec![12, 8, 8]);
        let mut ds = PluginDatasets::set_plugin_datasets(
            &mut index,
            "p",
            &names(&["tomo"]),
            &names(&["binned"]),
            0,
        )
        .unwrap();
        let (in_id, out_id) = (ds.in_ids()[0], ds.out_ids()[0]);
        define_out(&mut index, out_id, vec![4, 8, 8]);
        ds.setup_plugin_data(
            &index,
            in_id,
            PatternSetup::new("PROJECTION", FrameSpec::count(3).unwrap()),
        )
        .unwrap();
        ds.setup_plugin_data(&index, out_id, PatternSetup::new("PROJECTION", FrameSpec::single()))
            .unwrap();
        let mut warnings = WarningLog::new();
        ds.finalise_plugin_datasets(&BlockTransport::default(), 2, 0.85, &mut warnings)
            .unwrap();
        let inp = ds.plugin_data(in_id).unwrap();
        let out = ds.plugin_data(out_id).unwrap();
        assert_eq!(inp.max_frames_transfer().unwrap(), 6);
        assert_eq!(inp.max_frames_process().unwrap(), 3);
        assert_eq!(out.max_frames_process().unwrap(), 1);
        assert_eq!(out.max_frames_transfer().unwrap(), 2);
    }

    #[test]
    fn test_multiple_on_reducing_dataset_is_incompatible() {
        let mut index = index_with(vec![12, 8, 8]);
        let mut ds = PluginDatasets::set_plugin_datasets(
            &mut index,
            "p",
            &names(&[]),
            &names(&["big", "small"]),
            0,
        )
        .unwrap();
        let (big, small) = (ds.out_ids()[0], ds.out_ids()[1]);
        define_out(&mut index, big, vec![12, 8, 8]);
        define_out(&mut index, small, vec![4, 8, 8]);
        ds.setup_plugin_data(&index, big, PatternSetup::new("PROJECTION", FrameSpec::single()))
            .unwrap();
        ds.setup_plugin_data(&index, small, PatternSetup::new("PROJECTION", FrameSpec::multiple()))
            .unwrap();
        let mut warnings = WarningLog::new();
        let err = ds
            .finalise_plugin_datasets(&BlockTransport::default(), 1, 0.85, &mut warnings)
            .unwrap_err();
        match err {
            TomoflowError::IncompatibleFrameSpec { dataset, .. } => assert_eq!(dataset, "small"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_only_authoritative_dataset_asks_transport() {
        let mut index = index_with(vec![10, 8, 8]);
        let mut ds = PluginDatasets::set_plugin_datasets(
            &mut index,
            "p",
            &names(&["tomo"]),
            &names(&["out"]),
            0,
        )
        .unwrap();
        let (in_id, out_id) = (ds.in_ids()[0], ds.out_ids()[0]);
        // the output is larger per frame, so it drives the negotiation
        let name = index.get(out_id).unwrap().name().to_string();
        let mut d = Dataset::new(name, vec![10, 8, 8], DType::Float64);
        d.add_pattern("PROJECTION", &[1, 2], &[0]).unwrap();
        *index.get_mut(out_id).unwrap() = d;

        ds.setup_plugin_data(&index, in_id, PatternSetup::new("PROJECTION", FrameSpec::single()))
            .unwrap();
        ds.setup_plugin_data(&index, out_id, PatternSetup::new("PROJECTION", FrameSpec::single()))
            .unwrap();

        let mut mock = MockTransport::new();
        mock.expect_calc_max_frames_transfer()
            .times(1)
            .withf(|req| req.total_frames == 10)
            .returning(|req| Ok((5, vec![5, req.shape[1], req.shape[2]])));
        mock.expect_calc_max_frames_process()
            .times(1)
            .returning(|_, _| Ok(1));
        let mut warnings = WarningLog::new();
        ds.finalise_plugin_datasets(&mock, 2, 0.85, &mut warnings)
            .unwrap();
        assert_eq!(ds.plugin_data(in_id).unwrap().max_frames_transfer().unwrap(), 5);
        assert_eq!(ds.plugin_data(in_id).unwrap().max_frames_process().unwrap(), 1);
    }

    #[test]
    fn test_missing_plugin_data_fails_finalise() {
        let mut index = index_with(vec![10, 8, 8]);
        let mut ds = PluginDatasets::set_plugin_datasets(
            &mut index,
            "p",
            &names(&["tomo"]),
            &names(&[]),
            0,
        )
        .unwrap();
        let mut warnings = WarningLog::new();
        assert!(matches!(
            ds.finalise_plugin_datasets(&BlockTransport::default(), 1, 0.85, &mut warnings),
            Err(TomoflowError::MissingMetadata { .. })
        ));
    }

    #[test]
    fn test_adopt_copies_padding() {
        let mut index = index_with(vec![10, 8, 8]);
        let mut ds = PluginDatasets::set_plugin_datasets(
            &mut index,
            "p",
            &names(&["tomo"]),
            &names(&[]),
            0,
        )
        .unwrap();
        let in_id = ds.in_ids()[0];
        ds.setup_plugin_data(&index, in_id, PatternSetup::new("PROJECTION", FrameSpec::single()))
            .unwrap();
        ds.set_padding(in_id, Some(Padding::frame_edges(1))).unwrap();
        let other = Dataset::create_from("itr_clone1", index.get(in_id).unwrap());
        let other_id = index.insert(DataRole::Out, other);
        let other = index.get(other_id).unwrap().clone();
        ds.adopt(in_id, other_id, &other).unwrap();
        assert_eq!(
            ds.plugin_data(other_id).unwrap().padding(),
            Some(&Padding::frame_edges(1))
        );
    }

    #[test]
    fn test_adopt_input_shadows_own_view() {
        let mut index = index_with(vec![10, 8, 8]);
        let mut ds = PluginDatasets::set_plugin_datasets(
            &mut index,
            "p",
            &names(&["tomo"]),
            &names(&["out"]),
            0,
        )
        .unwrap();
        let (in_id, out_id) = (ds.in_ids()[0], ds.out_ids()[0]);
        define_out(&mut index, out_id, vec![10, 8, 8]);
        ds.setup_plugin_data(&index, in_id, PatternSetup::new("PROJECTION", FrameSpec::single()))
            .unwrap();
        ds.setup_plugin_data(&index, out_id, PatternSetup::new("PROJECTION", FrameSpec::single()))
            .unwrap();
        ds.set_padding(in_id, Some(Padding::frame_edges(2))).unwrap();
        assert!(ds.input_data(out_id).unwrap().padding().is_none());

        let out = index.get(out_id).unwrap().clone();
        ds.adopt_input(in_id, out_id, &out).unwrap();
        assert_eq!(
            ds.input_data(out_id).unwrap().padding(),
            Some(&Padding::frame_edges(2))
        );
        // the write view is untouched
        assert!(ds.plugin_data(out_id).unwrap().padding().is_none());
    }
}
