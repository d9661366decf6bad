//! Rank communication.
//!
//! A run is carried out by `size` ranks in lock step. Ranks share the frame
//! store and meet at barriers between a plugin's phases. [`LocalCluster`]
//! runs every rank as a thread of the current process.

use crate::error::{Result, TomoflowError};
use crossbeam_channel::unbounded;
use std::sync::{Arc, Barrier};
use std::thread;

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Block until every rank has reached this point.
    fn barrier(&self);

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// The only rank of a one-process run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}
}

/// One rank of a [`LocalCluster`].
#[derive(Debug, Clone)]
pub struct LocalRank {
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
}

impl Communicator for LocalRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.barrier.wait();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocalCluster {
    processes: usize,
}

impl LocalCluster {
    pub fn new(processes: usize) -> Result<Self> {
        if processes == 0 {
            return Err(TomoflowError::Configuration(
                "a run needs at least one process".to_string(),
            ));
        }
        Ok(Self { processes })
    }

    pub fn processes(&self) -> usize {
        self.processes
    }

    /// Run `f` once per rank on scoped threads and collect the results in
    /// rank order. The first failing rank's error is returned.
    pub fn run<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(LocalRank) -> Result<T> + Send + Sync,
    {
        let barrier = Arc::new(Barrier::new(self.processes));
        let (tx, rx) = unbounded();
        let f = &f;

        thread::scope(|scope| {
            for rank in 0..self.processes {
                let comm = LocalRank {
                    rank,
                    size: self.processes,
                    barrier: Arc::clone(&barrier),
                };
                let tx = tx.clone();
                scope.spawn(move || {
                    let result = f(comm);
                    if let Err(e) = &result {
                        tracing::error!("Rank {} failed: {}", rank, e);
                    }
                    // the receiver outlives the scope
                    let _ = tx.send((rank, result));
                });
            }
        });
        drop(tx);

        let mut results: Vec<(usize, Result<T>)> = rx.iter().collect();
        if results.len() != self.processes {
            return Err(TomoflowError::Transport(format!(
                "{} of {} ranks reported back",
                results.len(),
                self.processes
            )));
        }
        results.sort_by_key(|(rank, _)| *rank);
        results.into_iter().map(|(_, result)| result).collect()
    }
}
