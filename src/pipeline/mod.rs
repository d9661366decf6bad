//! Plugin pipeline: frame negotiation, execution and iteration.
//!
//! Plugins run one after another over datasets held in a frame store. Each
//! plugin binds its in/out datasets to access patterns, the frame counts of
//! every bound dataset are reconciled with the transport, and the runner
//! hands each rank its share of process calls.
//!
//! # Architecture
//!
//! ```text
//! ProcessList ─► PluginRunner ─► PluginDatasets ─► PluginData ─► Transport
//!                     │                                 │
//!                     ├─► IteratePluginGroup ─► IterationScheduler
//!                     └─► FrameStore ◄── read_frames / write_frames
//! ```
//!
//! # Design
//!
//! - **Enum dispatch for built-in plugins**: `BuiltinPlugin`, with
//!   `AnyPlugin::Custom` for boxed trait objects.
//! - **Iteration by composition**: `IterativePlugin` wraps any plugin and adds
//!   the clone dataset the group alternates with.
//! - **Ids, not names**: the iteration machinery tracks datasets by
//!   `DatasetId` and only rebinds logical names when it finalises.

pub mod comm;
pub mod distribution;
pub mod group;
pub mod group_utils;
pub mod iteration;
pub mod iterative_plugin;
pub mod plugin;
pub mod plugin_data;
pub mod plugin_datasets;
pub mod plugin_kind;
pub mod plugins;
pub mod runner;
pub mod store;
pub mod transport;
pub mod warnings;

pub use comm::{Communicator, LocalCluster, LocalRank, SingleProcess};
pub use distribution::{is_uneven, last_block_utilisation, FrameDistribution};
pub use group::{GroupPosition, IteratePluginGroup};
pub use group_utils::{
    check_if_end_plugin_in_iterate_group, check_if_in_iterative_loop, shift_plugin_index,
    unshift_plugin_index,
};
pub use iteration::{Binding, FinalisedPair, IterationPhase, IterationPlan, IterationScheduler};
pub use iterative_plugin::IterativePlugin;
pub use plugin::{AnyPlugin, BuiltinPlugin, Plugin, ProcessContext, SetupContext};
pub use plugin_data::{AxisSelector, PatternSetup, PluginData, TransferInfo};
pub use plugin_datasets::PluginDatasets;
pub use plugin_kind::PluginKind;
pub use runner::{run_local, PluginRunner, RunSummary};
pub use store::{FrameStore, MemoryStore};
pub use transport::{BlockTransport, TransferRequest, Transport};
pub use warnings::{DistributionWarning, WarningLog};
