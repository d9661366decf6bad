//! Per-plugin view of one dataset.
//!
//! A `PluginData` binds a dataset to one pattern for the lifetime of a
//! plugin instance, and carries the result of the frame-count negotiation:
//! how many frames one I/O call fetches (mft), how many one process call
//! receives (mfp), and what padding the store must add.
//!
//! # Frame indices
//!
//! Flat frame indices enumerate the slice dimensions with `slice_dims[0]`
//! varying fastest. Fixed dimensions contribute a single index.

use crate::data::{Dataset, DatasetId, Pattern};
use crate::error::{Result, TomoflowError};
use crate::pipeline::distribution::{is_uneven, last_block_utilisation};
use crate::pipeline::transport::{transfer_shape, TransferRequest, Transport};
use crate::pipeline::warnings::{DistributionWarning, WarningLog};
use crate::types::{FrameRequest, FrameSpec, Padding};

/// Selects a dimension by index or by axis label name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisSelector {
    Dim(usize),
    Label(String),
}

impl AxisSelector {
    fn resolve(&self, dataset: &Dataset) -> Result<usize> {
        match self {
            AxisSelector::Dim(d) if *d < dataset.ndims() => Ok(*d),
            AxisSelector::Dim(d) => Err(TomoflowError::Configuration(format!(
                "dimension {} is out of range for dataset {}",
                d,
                dataset.name()
            ))),
            AxisSelector::Label(label) => dataset.find_axis_label_dimension(label, true),
        }
    }
}

impl From<usize> for AxisSelector {
    fn from(d: usize) -> Self {
        AxisSelector::Dim(d)
    }
}

impl From<&str> for AxisSelector {
    fn from(label: &str) -> Self {
        AxisSelector::Label(label.to_string())
    }
}

/// Arguments of [`PluginData::setup`].
#[derive(Debug, Clone)]
pub struct PatternSetup {
    pub pattern: String,
    pub frames: FrameSpec,
    /// Promoted to the fastest-varying slice dimension.
    pub slice_axis: Option<AxisSelector>,
    /// A slice dimension fetched whole, as an extra core dimension.
    pub getall: Option<AxisSelector>,
    /// Pad the last block of frames to full length.
    pub fixed_length: bool,
}

impl PatternSetup {
    pub fn new(pattern: impl Into<String>, frames: FrameSpec) -> Self {
        Self {
            pattern: pattern.into(),
            frames,
            slice_axis: None,
            getall: None,
            fixed_length: true,
        }
    }

    pub fn slice_axis(mut self, axis: impl Into<AxisSelector>) -> Self {
        self.slice_axis = Some(axis.into());
        self
    }

    pub fn getall(mut self, axis: impl Into<AxisSelector>) -> Self {
        self.getall = Some(axis.into());
        self
    }

    pub fn fixed_length(mut self, fixed_length: bool) -> Self {
        self.fixed_length = fixed_length;
        self
    }
}

/// Negotiated transfer sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub max_frames_transfer: usize,
    pub transfer_shape: Vec<usize>,
    pub max_frames_process: usize,
    /// Keep the frame axis even when only one frame is processed.
    pub no_squeeze: bool,
}

#[derive(Debug, Clone)]
pub struct PluginData {
    dataset: DatasetId,
    dataset_name: String,
    shape: Vec<usize>,
    itemsize: usize,
    pattern_name: Option<String>,
    pattern: Option<Pattern>,
    frames: FrameSpec,
    fixed_length: bool,
    padding: Option<Padding>,
    fixed_dims: Vec<(usize, usize)>,
    transfer: Option<TransferInfo>,
}

impl PluginData {
    pub fn new(id: DatasetId, dataset: &Dataset) -> Self {
        Self {
            dataset: id,
            dataset_name: dataset.name().to_string(),
            shape: dataset.shape().to_vec(),
            itemsize: dataset.itemsize(),
            pattern_name: None,
            pattern: None,
            frames: FrameSpec::default(),
            fixed_length: true,
            padding: None,
            fixed_dims: Vec::new(),
            transfer: None,
        }
    }

    /// The same view bound to another dataset of identical shape.
    pub fn rebound(&self, id: DatasetId, dataset: &Dataset) -> Result<Self> {
        if dataset.shape() != self.shape.as_slice() {
            return Err(TomoflowError::Configuration(format!(
                "cannot bind dataset {} with shape {:?} in place of {} with shape {:?}",
                dataset.name(),
                dataset.shape(),
                self.dataset_name,
                self.shape
            )));
        }
        let mut copy = self.clone();
        copy.dataset = id;
        copy.dataset_name = dataset.name().to_string();
        Ok(copy)
    }

    /// Bind this view to one of the dataset's patterns.
    pub fn setup(&mut self, dataset: &Dataset, setup: PatternSetup) -> Result<()> {
        let mut pattern = dataset.get_pattern(&setup.pattern)?.clone();
        if let Some(axis) = &setup.getall {
            let dim = axis.resolve(dataset)?;
            pattern.move_to_core(dim)?;
        }
        if let Some(axis) = &setup.slice_axis {
            let dim = axis.resolve(dataset)?;
            pattern.promote_slice_dim(dim)?;
        }
        self.shape = dataset.shape().to_vec();
        self.itemsize = dataset.itemsize();
        self.pattern_name = Some(setup.pattern);
        self.pattern = Some(pattern);
        self.frames = setup.frames;
        self.fixed_length = setup.fixed_length;
        self.transfer = None;
        tracing::debug!(
            "Dataset {} uses pattern {} with {} frames",
            self.dataset_name,
            self.pattern_name.as_deref().unwrap_or_default(),
            self.frames
        );
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn dataset_id(&self) -> DatasetId {
        self.dataset
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn pattern_name(&self) -> Result<&str> {
        self.pattern_name
            .as_deref()
            .ok_or_else(|| self.missing("pattern"))
    }

    pub fn pattern(&self) -> Result<&Pattern> {
        self.pattern.as_ref().ok_or_else(|| self.missing("pattern"))
    }

    pub fn frames(&self) -> FrameSpec {
        self.frames
    }

    pub fn fixed_length(&self) -> bool {
        self.fixed_length
    }

    pub fn itemsize(&self) -> usize {
        self.itemsize
    }

    pub fn get_shape(&self) -> &[usize] {
        &self.shape
    }

    /// Sizes of the core dimensions, in ascending dimension order.
    pub fn core_shape(&self) -> Result<Vec<usize>> {
        let mut core = self.pattern()?.core_dims().to_vec();
        core.sort_unstable();
        Ok(core.iter().map(|&d| self.shape[d]).collect())
    }

    /// The fastest-varying slice dimension.
    pub fn main_slice_dim(&self) -> Result<usize> {
        self.pattern()?
            .main_slice_dim()
            .ok_or_else(|| self.missing("slice dimension"))
    }

    pub fn padding(&self) -> Option<&Padding> {
        self.padding.as_ref()
    }

    pub fn set_padding(&mut self, padding: Option<Padding>) {
        self.padding = padding.filter(|p| !p.is_empty());
    }

    pub fn transfer(&self) -> Result<&TransferInfo> {
        self.transfer
            .as_ref()
            .ok_or_else(|| self.missing("transfer frames"))
    }

    pub fn max_frames_transfer(&self) -> Result<usize> {
        Ok(self.transfer()?.max_frames_transfer)
    }

    pub fn max_frames_process(&self) -> Result<usize> {
        Ok(self.transfer()?.max_frames_process)
    }

    pub(crate) fn set_transfer(&mut self, info: TransferInfo) {
        self.transfer = Some(info);
    }

    fn missing(&self, what: &str) -> TomoflowError {
        TomoflowError::MissingMetadata {
            what: what.to_string(),
            key: self.dataset_name.clone(),
        }
    }

    // ── Slicing ──────────────────────────────────────────────────────

    /// Reorder the slice dimensions; see [`Pattern::reorder_slice_dims`].
    pub fn set_slicing_order(&mut self, order: &[usize]) -> Result<()> {
        let name = self.dataset_name.clone();
        let pattern = self.pattern.as_mut().ok_or_else(|| TomoflowError::MissingMetadata {
            what: "pattern".to_string(),
            key: name,
        })?;
        pattern.reorder_slice_dims(order)
    }

    /// Pin slice dimensions to a single index each.
    pub fn set_fixed_dimensions(&mut self, dims: &[usize], values: &[usize]) -> Result<()> {
        if dims.len() != values.len() {
            return Err(TomoflowError::Configuration(format!(
                "{} fixed dimensions but {} values",
                dims.len(),
                values.len()
            )));
        }
        let slice_dims = self.pattern()?.slice_dims().to_vec();
        let mut fixed = Vec::with_capacity(dims.len());
        for (&dim, &value) in dims.iter().zip(values) {
            if !slice_dims.contains(&dim) {
                return Err(TomoflowError::Configuration(format!(
                    "dimension {} of {} is not a slice dimension and cannot be fixed",
                    dim, self.dataset_name
                )));
            }
            if value >= self.shape[dim] {
                return Err(TomoflowError::Configuration(format!(
                    "fixed index {} is out of range for dimension {} of {} (size {})",
                    value, dim, self.dataset_name, self.shape[dim]
                )));
            }
            fixed.push((dim, value));
        }
        self.fixed_dims = fixed;
        self.transfer = None;
        Ok(())
    }

    pub fn fixed_dimensions(&self) -> &[(usize, usize)] {
        &self.fixed_dims
    }

    fn fixed_value(&self, dim: usize) -> Option<usize> {
        self.fixed_dims
            .iter()
            .find(|(d, _)| *d == dim)
            .map(|(_, v)| *v)
    }

    /// Product of the slice dimension sizes; fixed dims count once.
    pub fn get_total_frames(&self) -> Result<usize> {
        Ok(self
            .pattern()?
            .slice_dims()
            .iter()
            .map(|&d| {
                if self.fixed_value(d).is_some() {
                    1
                } else {
                    self.shape[d]
                }
            })
            .product())
    }

    /// Index along each slice dimension for a flat frame index, in the
    /// order of the pattern's slice dims.
    pub fn frame_to_slice_index(&self, frame: usize) -> Result<Vec<usize>> {
        let total = self.get_total_frames()?;
        if frame >= total {
            return Err(TomoflowError::Configuration(format!(
                "frame {} is out of range for {} ({} frames)",
                frame, self.dataset_name, total
            )));
        }
        let mut rest = frame;
        let mut index = Vec::new();
        for &d in self.pattern()?.slice_dims() {
            match self.fixed_value(d) {
                Some(v) => index.push(v),
                None => {
                    index.push(rest % self.shape[d]);
                    rest /= self.shape[d];
                }
            }
        }
        Ok(index)
    }

    /// Absolute frame indices of the current process call, clipped to the
    /// last frame.
    ///
    /// `pcount` counts this rank's process calls so far and `rank_offset`
    /// is the rank's first global process-call index.
    pub fn get_current_frame_idx(&self, pcount: usize, rank_offset: usize) -> Result<Vec<usize>> {
        let mfp = self.max_frames_process()?;
        let last = self.get_total_frames()?.saturating_sub(1);
        let start = (rank_offset + pcount) * mfp;
        Ok((start..start + mfp).map(|f| f.min(last)).collect())
    }

    /// Frames of the current call that lie inside the dataset.
    pub fn valid_frame_count(&self, pcount: usize, rank_offset: usize) -> Result<usize> {
        let mfp = self.max_frames_process()?;
        let total = self.get_total_frames()?;
        let start = (rank_offset + pcount) * mfp;
        Ok(total.saturating_sub(start).min(mfp))
    }

    // ── Negotiation ──────────────────────────────────────────────────

    pub fn transfer_request(&self, processes: usize) -> Result<TransferRequest> {
        let pattern = self.pattern()?;
        Ok(TransferRequest {
            shape: self.shape.clone(),
            core_dims: pattern.core_dims().to_vec(),
            slice_dims: pattern.slice_dims().to_vec(),
            total_frames: self.get_total_frames()?,
            frames: self.frames.request,
            processes,
        })
    }

    /// Bytes moved to process the whole dataset.
    pub fn transfer_bytes(&self) -> Result<usize> {
        let core: usize = self.core_shape()?.iter().product();
        Ok(self.itemsize * core * self.get_total_frames()?)
    }

    /// Ask the transport for mft/mfp and record the result.
    pub fn compute_transfer_frames(
        &mut self,
        transport: &dyn Transport,
        processes: usize,
        threshold: f64,
        plugin: &str,
        warnings: &mut WarningLog,
    ) -> Result<()> {
        if let FrameRequest::Count(0) = self.frames.request {
            return Err(TomoflowError::InvalidFrameSpec(
                "a frame count must be a positive integer".to_string(),
            ));
        }
        let request = self.transfer_request(processes)?;
        let (mut mft, mut shape) = transport.calc_max_frames_transfer(&request)?;
        let mut mfp = transport.calc_max_frames_process(&request, mft)?;
        if mft == 0 || mfp == 0 {
            return Err(TomoflowError::Transport(format!(
                "transport returned zero frames for {}",
                self.dataset_name
            )));
        }
        mfp = mfp.min(mft);
        if let Some(limit) = self.frames.hard_limit {
            mfp = mfp.min(limit);
            mft = mft.min(limit);
            mft = (mft / mfp).max(1) * mfp;
            shape = transfer_shape(&request, mft);
        }

        if is_uneven(request.total_frames, mft, threshold) {
            warnings.push(DistributionWarning {
                plugin: plugin.to_string(),
                dataset: self.dataset_name.clone(),
                total_frames: request.total_frames,
                max_frames_transfer: mft,
                processes,
                utilisation: last_block_utilisation(request.total_frames, mft),
            });
        }

        let no_squeeze = mfp == 1 && self.frames.is_multiple();
        tracing::debug!(
            "{}: {} frames of {}, mft={} mfp={}{}",
            plugin,
            request.total_frames,
            self.dataset_name,
            mft,
            mfp,
            if no_squeeze { " (no squeeze)" } else { "" }
        );
        self.transfer = Some(TransferInfo {
            max_frames_transfer: mft,
            transfer_shape: shape,
            max_frames_process: mfp,
            no_squeeze,
        });
        Ok(())
    }
}
