//! Assignment of frames to worker processes.
//!
//! Every rank computes the same split from (total frames, mft, mfp,
//! processes), so no message is exchanged to agree on it. Transfers of
//! `mft` frames are dealt out contiguously; the first
//! `transfers % processes` ranks take one extra transfer.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDistribution {
    total_frames: usize,
    max_frames_transfer: usize,
    max_frames_process: usize,
    processes: usize,
}

impl FrameDistribution {
    /// Zero counts are clamped to one.
    pub fn new(total_frames: usize, mft: usize, mfp: usize, processes: usize) -> Self {
        let mft = mft.max(1);
        Self {
            total_frames,
            max_frames_transfer: mft,
            max_frames_process: mfp.clamp(1, mft),
            processes: processes.max(1),
        }
    }

    pub fn n_transfers(&self) -> usize {
        self.total_frames.div_ceil(self.max_frames_transfer)
    }

    /// Process calls needed for the whole dataset.
    pub fn n_process_calls(&self) -> usize {
        self.total_frames.div_ceil(self.max_frames_process)
    }

    fn calls_per_transfer(&self) -> usize {
        self.max_frames_transfer.div_ceil(self.max_frames_process)
    }

    /// Transfer indices handled by `rank`.
    pub fn rank_transfers(&self, rank: usize) -> Range<usize> {
        let n = self.n_transfers();
        let base = n / self.processes;
        let extra = n % self.processes;
        let start = rank * base + rank.min(extra);
        let len = if rank < extra { base + 1 } else { base };
        let start = start.min(n);
        start..(start + len).min(n)
    }

    /// Global process-call indices handled by `rank`.
    pub fn rank_process_calls(&self, rank: usize) -> Range<usize> {
        let transfers = self.rank_transfers(rank);
        let cpt = self.calls_per_transfer();
        let total = self.n_process_calls();
        let start = (transfers.start * cpt).min(total);
        let end = (transfers.end * cpt).min(total);
        start..end
    }

    /// First global process-call index of `rank`.
    pub fn rank_offset(&self, rank: usize) -> usize {
        self.rank_process_calls(rank).start
    }

    /// Frames fetched by one transfer.
    pub fn transfer_frames(&self, transfer: usize) -> Range<usize> {
        let start = (transfer * self.max_frames_transfer).min(self.total_frames);
        start..(start + self.max_frames_transfer).min(self.total_frames)
    }
}

/// Fill of the last transfer block: `frac(total / mft)`.
pub fn last_block_utilisation(total_frames: usize, mft: usize) -> f64 {
    let ratio = total_frames as f64 / mft.max(1) as f64;
    ratio - ratio.floor()
}

/// An uneven split is one whose last block is partly filled and no fuller
/// than `threshold`.
pub fn is_uneven(total_frames: usize, mft: usize, threshold: f64) -> bool {
    let util = last_block_utilisation(total_frames, mft);
    util > 0.0 && util <= threshold
}
