//! Frame storage.
//!
//! A [`FrameStore`] holds the backing data of every dataset and moves
//! frames in and out of it. Frames are addressed by their index along each
//! slice dimension of a pattern; a fetched frame keeps the core dimensions
//! in ascending order. Reads of several frames stack them on a new leading
//! axis.

use crate::data::{DatasetId, Pattern};
use crate::error::{Result, TomoflowError};
use crate::types::Padding;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, Dimension, IxDyn};
use std::collections::HashMap;
use std::sync::RwLock;

pub trait FrameStore: Send + Sync {
    /// Create zeroed backing data. Allocating an existing dataset is a no-op.
    fn allocate(&self, id: DatasetId, shape: &[usize]) -> Result<()>;

    /// Overwrite the whole dataset.
    fn fill(&self, id: DatasetId, data: ArrayD<f32>) -> Result<()>;

    /// Fetch frames as one `[n, core...]` block, padding core dims by edge
    /// replication. Padding along the main slice dim adds a neighbour axis,
    /// giving `[n, before + 1 + after, core...]` with indices clamped to the
    /// ends of the dimension.
    fn read_frames(
        &self,
        id: DatasetId,
        pattern: &Pattern,
        frames: &[Vec<usize>],
        padding: Option<&Padding>,
    ) -> Result<ArrayD<f32>>;

    /// Store the first `frames.len()` entries of a `[n, core...]` block.
    fn write_frames(
        &self,
        id: DatasetId,
        pattern: &Pattern,
        frames: &[Vec<usize>],
        data: &ArrayD<f32>,
    ) -> Result<()>;

    fn snapshot(&self, id: DatasetId) -> Result<ArrayD<f32>>;

    fn release(&self, id: DatasetId) -> Result<()>;

    fn contains(&self, id: DatasetId) -> bool;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    arrays: RwLock<HashMap<DatasetId, ArrayD<f32>>>,
}

fn poisoned<T>(_: T) -> TomoflowError {
    TomoflowError::Transport("frame store lock poisoned".to_string())
}

fn missing(id: DatasetId) -> TomoflowError {
    TomoflowError::Transport(format!("no backing data for {}", id))
}

/// Slice dims paired with their index, highest dim first so removing one
/// axis leaves the lower ones in place.
fn slice_positions(pattern: &Pattern, index: &[usize], shape: &[usize]) -> Result<Vec<(usize, usize)>> {
    if index.len() != pattern.slice_dims().len() {
        return Err(TomoflowError::Transport(format!(
            "frame index {:?} does not match slice dims {:?}",
            index,
            pattern.slice_dims()
        )));
    }
    let mut positions: Vec<(usize, usize)> = pattern
        .slice_dims()
        .iter()
        .copied()
        .zip(index.iter().copied())
        .collect();
    for &(dim, i) in &positions {
        if dim >= shape.len() || i >= shape[dim] {
            return Err(TomoflowError::Transport(format!(
                "frame index {} out of range for dimension {} of shape {:?}",
                i, dim, shape
            )));
        }
    }
    positions.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    Ok(positions)
}

fn frame_view<'a>(array: &'a ArrayD<f32>, positions: &[(usize, usize)]) -> ArrayViewD<'a, f32> {
    let mut view = array.view();
    for &(dim, i) in positions {
        view = view.index_axis_move(Axis(dim), i);
    }
    view
}

fn frame_view_mut<'a>(array: &'a mut ArrayD<f32>, positions: &[(usize, usize)]) -> ArrayViewMutD<'a, f32> {
    let mut view = array.view_mut();
    for &(dim, i) in positions {
        view = view.index_axis_move(Axis(dim), i);
    }
    view
}

/// Pad every axis of `frame` by replicating its edges.
fn pad_edges(frame: ArrayViewD<'_, f32>, pads: &[(usize, usize)]) -> ArrayD<f32> {
    let src_shape = frame.shape().to_vec();
    let shape: Vec<usize> = src_shape
        .iter()
        .zip(pads)
        .map(|(&n, &(before, after))| n + before + after)
        .collect();
    ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
        let src: Vec<usize> = (0..idx.ndim())
            .map(|ax| {
                let (before, _) = pads[ax];
                idx[ax]
                    .saturating_sub(before)
                    .min(src_shape[ax].saturating_sub(1))
            })
            .collect();
        frame[IxDyn(&src)]
    })
}

/// (before, after) neighbour frames along the main slice dim. Padding on
/// any other slice dim cannot be honoured and is rejected.
fn slice_padding(pattern: &Pattern, padding: &Padding, core_dims: &[usize]) -> Result<(usize, usize)> {
    let mut slice_dims = pattern.slice_dims().iter().copied();
    let Some(main) = slice_dims.next() else {
        return Ok((0, 0));
    };
    for dim in slice_dims {
        if padding.amount(dim, core_dims) != (0, 0) {
            return Err(TomoflowError::Configuration(format!(
                "padding on slice dimension {} is not supported, only on the main slice dimension {}",
                dim, main
            )));
        }
    }
    let (before, after) = padding.amount(main, core_dims);
    Ok((
        before + padding.pad_multi_frames,
        after + padding.pad_multi_frames,
    ))
}

impl FrameStore for MemoryStore {
    fn allocate(&self, id: DatasetId, shape: &[usize]) -> Result<()> {
        let mut arrays = self.arrays.write().map_err(poisoned)?;
        arrays
            .entry(id)
            .or_insert_with(|| ArrayD::zeros(IxDyn(shape)));
        Ok(())
    }

    fn fill(&self, id: DatasetId, data: ArrayD<f32>) -> Result<()> {
        let mut arrays = self.arrays.write().map_err(poisoned)?;
        arrays.insert(id, data);
        Ok(())
    }

    fn read_frames(
        &self,
        id: DatasetId,
        pattern: &Pattern,
        frames: &[Vec<usize>],
        padding: Option<&Padding>,
    ) -> Result<ArrayD<f32>> {
        let arrays = self.arrays.read().map_err(poisoned)?;
        let array = arrays.get(&id).ok_or_else(|| missing(id))?;
        let mut core_dims = pattern.core_dims().to_vec();
        core_dims.sort_unstable();
        let padding = padding.filter(|p| !p.is_empty());
        let (before, after) = match padding {
            Some(p) => slice_padding(pattern, p, &core_dims)?,
            None => (0, 0),
        };

        let read_one = |index: &[usize]| -> Result<ArrayD<f32>> {
            let positions = slice_positions(pattern, index, array.shape())?;
            let view = frame_view(array, &positions);
            Ok(match padding {
                Some(p) => {
                    let pads: Vec<(usize, usize)> =
                        core_dims.iter().map(|&d| p.amount(d, &core_dims)).collect();
                    pad_edges(view, &pads)
                }
                None => view.to_owned(),
            })
        };

        let mut blocks = Vec::with_capacity(frames.len());
        for index in frames {
            if before == 0 && after == 0 {
                blocks.push(read_one(index.as_slice())?);
                continue;
            }
            // out-of-range frames fail before clamping hides them
            slice_positions(pattern, index, array.shape())?;
            // main slice dim is the first entry of the frame index
            let len = pattern
                .main_slice_dim()
                .and_then(|d| array.shape().get(d).copied())
                .unwrap_or(1);
            let centre = index.first().copied().unwrap_or(0);
            let mut neighbours = Vec::with_capacity(before + 1 + after);
            for offset in 0..before + 1 + after {
                let mut shifted = index.clone();
                if let Some(first) = shifted.first_mut() {
                    *first = (centre + offset)
                        .saturating_sub(before)
                        .min(len.saturating_sub(1));
                }
                neighbours.push(read_one(shifted.as_slice())?);
            }
            let views: Vec<ArrayViewD<'_, f32>> = neighbours.iter().map(|b| b.view()).collect();
            blocks.push(ndarray::stack(Axis(0), &views).map_err(|e| {
                TomoflowError::Transport(format!("stacking neighbours of {}: {}", id, e))
            })?);
        }
        let views: Vec<ArrayViewD<'_, f32>> = blocks.iter().map(|b| b.view()).collect();
        ndarray::stack(Axis(0), &views)
            .map_err(|e| TomoflowError::Transport(format!("stacking frames of {}: {}", id, e)))
    }

    fn write_frames(
        &self,
        id: DatasetId,
        pattern: &Pattern,
        frames: &[Vec<usize>],
        data: &ArrayD<f32>,
    ) -> Result<()> {
        let mut arrays = self.arrays.write().map_err(poisoned)?;
        let array = arrays.get_mut(&id).ok_or_else(|| missing(id))?;
        if data.ndim() == 0 || data.shape()[0] < frames.len() {
            return Err(TomoflowError::Transport(format!(
                "{} frames to write to {} but the block has shape {:?}",
                frames.len(),
                id,
                data.shape()
            )));
        }
        for (n, index) in frames.iter().enumerate() {
            let positions = slice_positions(pattern, index, array.shape())?;
            let src = data.index_axis(Axis(0), n);
            let mut dst = frame_view_mut(array, &positions);
            if dst.shape() != src.shape() {
                return Err(TomoflowError::Transport(format!(
                    "frame of shape {:?} does not fit {:?} in {}",
                    src.shape(),
                    dst.shape(),
                    id
                )));
            }
            dst.assign(&src);
        }
        Ok(())
    }

    fn snapshot(&self, id: DatasetId) -> Result<ArrayD<f32>> {
        let arrays = self.arrays.read().map_err(poisoned)?;
        arrays.get(&id).cloned().ok_or_else(|| missing(id))
    }

    fn release(&self, id: DatasetId) -> Result<()> {
        let mut arrays = self.arrays.write().map_err(poisoned)?;
        if arrays.remove(&id).is_some() {
            tracing::debug!("Released backing data of {}", id);
        }
        Ok(())
    }

    fn contains(&self, id: DatasetId) -> bool {
        self.arrays
            .read()
            .map(|arrays| arrays.contains_key(&id))
            .unwrap_or(false)
    }
}
