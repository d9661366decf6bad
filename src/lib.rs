//! # tomoflow: plugin pipelines over large N-dimensional datasets
//!
//! A process list names the datasets a run starts from and the plugins
//! that transform them. Each plugin reads its datasets through an access
//! pattern that splits every dimension into core dimensions (the shape of
//! one frame) and slice dimensions (which frames there are). The pipeline
//! negotiates how many frames move per transfer and per process call,
//! spreads the work across worker ranks, and can repeat a plugin or a run
//! of plugins a fixed number of times.
//!
//! ## Architecture
//!
//! - **Data**: datasets, patterns and the experiment index ([`data`])
//! - **Pipeline**: negotiation, storage, plugins, iteration and the runner
//!   ([`pipeline`])
//! - **Configuration**: process lists loaded from TOML or JSON ([`config`])
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tomoflow::{config::ProcessList, pipeline::{run_local, MemoryStore}};
//!
//! let list = ProcessList::load("reconstruction.toml")?;
//! let summary = run_local(&list, Arc::new(MemoryStore::default()))?;
//! println!("{}", summary);
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod types;

// Re-export commonly used types
pub use config::{NegotiationSettings, ProcessList};
pub use data::{Dataset, DatasetId, ExperimentIndex, Pattern};
pub use error::{Result, ResultExt, TomoflowError};
pub use pipeline::{PluginRunner, RunSummary};
pub use types::{DType, FrameRequest, FrameSpec, Padding};
