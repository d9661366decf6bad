//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use ndarray::ArrayD;
use std::sync::Arc;
use tomoflow::config::ProcessList;
use tomoflow::data::DataRole;
use tomoflow::pipeline::{run_local, FrameStore, MemoryStore, PluginRunner, RunSummary, SingleProcess};

/// Run `list` on its configured number of ranks and return the summary
/// with the final contents of `dataset`.
pub fn run_and_fetch(list: &ProcessList, dataset: &str) -> (RunSummary, ArrayD<f32>) {
    let store: Arc<dyn FrameStore> = Arc::new(MemoryStore::default());
    let summary = run_local(list, Arc::clone(&store)).expect("run failed");
    let id = summary
        .datasets
        .iter()
        .find(|d| d.name == dataset)
        .unwrap_or_else(|| panic!("no dataset {} in {:?}", dataset, summary.datasets))
        .id;
    let data = store.snapshot(id).expect("dataset has no backing data");
    (summary, data)
}

/// Run `list` on a single rank, keeping the runner for inspection.
pub fn run_single(list: &ProcessList) -> PluginRunner<SingleProcess> {
    let mut runner = PluginRunner::new(
        SingleProcess,
        Arc::new(MemoryStore::default()),
        list.negotiation.clone(),
    );
    runner.run(list).expect("run failed");
    runner
}

/// Names bound as in datasets after a run.
pub fn in_names(runner: &PluginRunner<SingleProcess>) -> Vec<String> {
    runner
        .index()
        .names(DataRole::In)
        .map(|s| s.to_string())
        .collect()
}

/// Assert two arrays are approximately equal
pub fn assert_array_eq(a: &ArrayD<f32>, b: &ArrayD<f32>, epsilon: f32) {
    assert_eq!(a.shape(), b.shape(), "shapes differ");
    for (x, y) in a.iter().zip(b.iter()) {
        assert!(
            (x - y).abs() < epsilon,
            "Expected {} to be approximately equal to {} (epsilon: {})",
            x,
            y,
            epsilon
        );
    }
}
