//! Integration tests for iterative plugins and iterate groups
//!
//! These tests validate:
//! - Alternation between an original dataset and its clone
//! - Which member survives finalisation and under what name
//! - Single-plugin iteration, multi-plugin groups and multi-rank runs
//! - Index shifting between process-list and execution numbering

mod common;

use common::builders::{LoaderBuilder, ProcessListBuilder};
use common::{assert_array_eq, in_names, run_and_fetch, run_single};
use tomoflow::data::{DataRole, ExperimentIndex};
use tomoflow::pipeline::{
    shift_plugin_index, unshift_plugin_index, IterationPhase, IterationScheduler, PluginKind,
};
use tomoflow::types::DType;

#[test]
fn test_structural_check_keeps_clone_when_it_holds_the_last_result() {
    // iteration 0 writes the clone, so after three iterations the clone
    // holds the result
    let mut index = ExperimentIndex::new();
    let input = index.create(DataRole::In, "tomo", vec![4, 2, 2], DType::Float32);
    let orig = index.create(DataRole::Out, "tomo", vec![4, 2, 2], DType::Float32);
    let clone = index.create(DataRole::Out, "itr_clone1", vec![4, 2, 2], DType::Float32);

    let mut scheduler = IterationScheduler::new(3).unwrap();
    scheduler
        .set_iteration_datasets(0, vec![input], vec![clone])
        .unwrap();
    scheduler
        .set_iteration_datasets(1, vec![input, clone], vec![orig])
        .unwrap();
    scheduler
        .set_alternating_datasets(&index, orig, clone)
        .unwrap();

    assert_eq!(scheduler.start().unwrap().outputs, vec![clone]);
    assert_eq!(
        scheduler.advance().unwrap(),
        IterationPhase::Running { iteration: 1 }
    );
    assert_eq!(scheduler.binding().outputs, vec![orig]);
    scheduler.advance().unwrap();
    assert_eq!(scheduler.binding().outputs, vec![clone]);
    assert_eq!(scheduler.advance().unwrap(), IterationPhase::Complete);

    let finalised = scheduler.finalise(&mut index).unwrap();
    assert_eq!(finalised[0].kept, clone);
    assert_eq!(finalised[0].logical_name, "tomo");
    assert_eq!(index.lookup(DataRole::Out, "tomo").unwrap(), clone);
    assert!(index.get(orig).unwrap().remove);
}

#[test]
fn test_shift_with_two_loaders() {
    assert_eq!(shift_plugin_index(2, 5).unwrap(), 2);
    assert_eq!(unshift_plugin_index(2, 2), 5);
}

#[test]
fn test_self_iterating_accumulate_odd_count() {
    let list = ProcessListBuilder::new()
        .loader(LoaderBuilder::new("tomo", &[6, 3, 2]).build())
        .plugin(
            PluginKind::Accumulate,
            &["tomo"],
            &["tomo"],
            "iterations = 3\nincrement = 0.5",
        )
        .build();

    let runner = run_single(&list);
    let expected = runner.index().get(runner.index().lookup(DataRole::In, "tomo").unwrap());
    assert!(!expected.unwrap().is_clone());
    let data = runner.dataset_data("tomo").unwrap();
    assert_eq!(data[[0, 0, 0]], 1.5);
    assert_eq!(data[[5, 2, 1]], 35.0 + 1.5);
    assert_eq!(in_names(&runner), vec!["tomo".to_string()]);
}

#[test]
fn test_self_iterating_accumulate_even_count_keeps_clone_under_logical_name() {
    let list = ProcessListBuilder::new()
        .loader(LoaderBuilder::new("tomo", &[6, 3, 2]).build())
        .plugin(
            PluginKind::Accumulate,
            &["tomo"],
            &["tomo"],
            "iterations = 4\nincrement = 1.0",
        )
        .build();

    let runner = run_single(&list);
    let id = runner.index().lookup(DataRole::In, "tomo").unwrap();
    let kept = runner.index().get(id).unwrap();
    assert_eq!(kept.name(), "tomo");
    assert!(kept.clone_of.is_some());
    assert_eq!(runner.dataset_data("tomo").unwrap()[[2, 1, 0]], 14.0 + 4.0);
    // the removed member's backing data is released
    assert!(runner.index().get(kept.clone_of.unwrap()).unwrap().remove);
    assert!(!runner.store().contains(kept.clone_of.unwrap()));
}

#[test]
fn test_group_of_two_plugins() {
    // loader at entry 1, plugins at entries 2 and 3
    let list = ProcessListBuilder::new()
        .loader(LoaderBuilder::new("tomo", &[4, 2, 2]).build())
        .plugin(PluginKind::Passthrough, &["tomo"], &["mid"], "")
        .plugin(PluginKind::Accumulate, &["mid"], &["tomo"], "increment = 1.0")
        .group(2, 3, 3)
        .build();

    let runner = run_single(&list);
    let data = runner.dataset_data("tomo").unwrap();
    assert_eq!(data[[1, 1, 1]], 7.0 + 3.0);
    // 'mid' holds the input of the last accumulate pass
    assert_eq!(runner.dataset_data("mid").unwrap()[[1, 1, 1]], 7.0 + 2.0);
    assert_eq!(in_names(&runner), vec!["mid".to_string(), "tomo".to_string()]);
}

#[test]
fn test_padded_group_start_keeps_padding_on_rebound_input() {
    // from iteration 1 the passthrough reads the previous 'tomo' output,
    // which must be fetched with the same edge padding
    let list = ProcessListBuilder::new()
        .processes(2)
        .loader(LoaderBuilder::new("tomo", &[4, 3, 3]).build())
        .plugin(PluginKind::Passthrough, &["tomo"], &["mid"], "pad = 1")
        .plugin(PluginKind::Accumulate, &["mid"], &["tomo"], "increment = 1.0")
        .group(2, 3, 4)
        .build();

    let (summary, data) = run_and_fetch(&list, "tomo");
    assert_eq!(data.shape(), &[4, 3, 3]);
    assert_eq!(data[[1, 1, 1]], 13.0 + 4.0);
    assert_eq!(data[[3, 2, 2]], 35.0 + 4.0);
    assert_eq!(summary.groups[0].iterations, 4);
}

#[test]
fn test_group_summary() {
    let list = ProcessListBuilder::new()
        .loader(LoaderBuilder::new("tomo", &[4, 2, 2]).build())
        .plugin(PluginKind::Passthrough, &["tomo"], &["copy"], "")
        .plugin(PluginKind::Accumulate, &["copy"], &["tomo"], "")
        .plugin(PluginKind::Passthrough, &["tomo"], &["final"], "")
        .group(2, 3, 2)
        .build();

    let (summary, data) = run_and_fetch(&list, "final");
    assert_eq!(summary.groups.len(), 1);
    assert_eq!(summary.groups[0].start, 2);
    assert_eq!(summary.groups[0].end, 3);
    assert_eq!(summary.groups[0].datasets, vec!["tomo".to_string()]);
    assert_eq!(summary.plugins_run, 5);
    assert_eq!(data[[3, 0, 0]], 12.0 + 2.0);
}

#[test]
fn test_multi_rank_iteration_matches_single_rank() {
    let build = |processes| {
        ProcessListBuilder::new()
            .processes(processes)
            .loader(LoaderBuilder::new("tomo", &[12, 2, 3]).build())
            .plugin(
                PluginKind::Accumulate,
                &["tomo"],
                &["tomo"],
                "iterations = 2\nincrement = 3.0\nframes = \"single\"",
            )
            .build()
    };

    let (_, single) = run_and_fetch(&build(1), "tomo");
    let (summary, multi) = run_and_fetch(&build(3), "tomo");
    assert_eq!(summary.processes, 3);
    assert_array_eq(&single, &multi, 1e-6);
    assert_eq!(multi[[11, 1, 2]], 71.0 + 6.0);
}

#[test]
fn test_downsample_reduces_frames() {
    let list = ProcessListBuilder::new()
        .processes(2)
        .loader(LoaderBuilder::new("tomo", &[8, 2, 2]).build())
        .plugin(PluginKind::Downsample, &["tomo"], &["binned"], "bin = 2")
        .build();

    let (summary, binned) = run_and_fetch(&list, "binned");
    assert_eq!(binned.shape(), &[4, 2, 2]);
    // mean of frames 2 and 3 of a ramp
    assert_eq!(binned[[1, 0, 0]], 10.0);
    assert_eq!(binned[[3, 1, 1]], 8.0 * 3.0 + 2.0 + 3.0);
    let entry = summary.datasets.iter().find(|d| d.name == "binned").unwrap();
    assert_eq!(entry.shape, vec![4, 2, 2]);
}

#[test]
fn test_group_outside_plugins_rejected() {
    let list = ProcessListBuilder::new()
        .loader(LoaderBuilder::new("tomo", &[4, 2, 2]).build())
        .plugin(PluginKind::Passthrough, &["tomo"], &["copy"], "")
        .group(2, 3, 2)
        .build();
    let store = std::sync::Arc::new(tomoflow::pipeline::MemoryStore::default());
    let err = tomoflow::pipeline::run_local(&list, store).unwrap_err();
    assert!(matches!(
        err.root(),
        tomoflow::TomoflowError::IterationGroup { start: 2, end: 3, .. }
    ));
}
