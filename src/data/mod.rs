//! Dataset model
//!
//! - [`id`] - `DatasetId` arena handles
//! - [`pattern`] - named core/slice partitions and the registry that validates them
//! - [`dataset`] - shape, dtype, axis labels and patterns of one dataset
//! - [`index`] - the experiment-wide name → dataset index

pub mod dataset;
pub mod id;
pub mod index;
pub mod pattern;

pub use dataset::{AxisLabel, Dataset, CLONE_MARKER};
pub use id::DatasetId;
pub use index::{DataRole, ExperimentIndex};
pub use pattern::{Pattern, PatternRegistry, KNOWN_PATTERNS};
