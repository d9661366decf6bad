//! Frame-count negotiation with the storage transport.
//!
//! The transport decides how many frames one I/O call fetches (mft) and how
//! many of those one process call receives (mfp). The negotiation in
//! [`crate::pipeline::plugin_data`] treats it as opaque.

use crate::error::{Result, TomoflowError};
use crate::types::FrameRequest;

/// What a PluginData asks the transport about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub shape: Vec<usize>,
    pub core_dims: Vec<usize>,
    /// Fastest-varying first.
    pub slice_dims: Vec<usize>,
    pub total_frames: usize,
    pub frames: FrameRequest,
    pub processes: usize,
}

#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Frames per transfer and the per-dimension size of one transfer.
    fn calc_max_frames_transfer(&self, request: &TransferRequest) -> Result<(usize, Vec<usize>)>;

    /// Frames per process call, given the negotiated transfer size.
    fn calc_max_frames_process(&self, request: &TransferRequest, mft: usize) -> Result<usize>;
}

/// Splits the frames evenly across processes in contiguous blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockTransport {
    /// Upper bound on frames per transfer.
    pub max_frames_cap: Option<usize>,
}

impl BlockTransport {
    pub fn new(max_frames_cap: Option<usize>) -> Self {
        Self { max_frames_cap }
    }
}

/// Nearest positive multiple of `n` to `target`; ties round up.
fn nearest_multiple(target: usize, n: usize) -> usize {
    let below = (target / n) * n;
    let above = below + n;
    if below == 0 || above - target <= target - below {
        above
    } else {
        below
    }
}

/// Size of one transfer along each dimension. Slice dims are filled
/// fastest first.
pub fn transfer_shape(request: &TransferRequest, mft: usize) -> Vec<usize> {
    let mut shape = request.shape.clone();
    for &d in &request.slice_dims {
        shape[d] = 1;
    }
    let mut remaining = mft;
    for &d in &request.slice_dims {
        if remaining <= 1 {
            break;
        }
        let size = remaining.min(request.shape[d]).max(1);
        shape[d] = size;
        remaining = remaining.div_ceil(size);
    }
    shape
}

impl Transport for BlockTransport {
    fn calc_max_frames_transfer(&self, request: &TransferRequest) -> Result<(usize, Vec<usize>)> {
        if request.processes == 0 {
            return Err(TomoflowError::Transport(
                "at least one process is required".to_string(),
            ));
        }
        let mut per_process = request.total_frames.div_ceil(request.processes).max(1);
        if let Some(cap) = self.max_frames_cap {
            per_process = per_process.min(cap.max(1));
        }
        let mft = match request.frames {
            FrameRequest::Single | FrameRequest::Multiple => per_process,
            FrameRequest::Count(n) => nearest_multiple(per_process, n.max(1)),
        };
        Ok((mft, transfer_shape(request, mft)))
    }

    fn calc_max_frames_process(&self, request: &TransferRequest, mft: usize) -> Result<usize> {
        Ok(match request.frames {
            FrameRequest::Single => 1,
            FrameRequest::Multiple => mft,
            FrameRequest::Count(n) => n.min(mft).max(1),
        })
    }
}
