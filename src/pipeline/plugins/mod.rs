//! Built-in plugin implementations.
//!
//! These exercise the negotiation and iteration machinery; they are not
//! scientific algorithms.

pub mod accumulate;
pub mod downsample;
pub mod passthrough;

pub use accumulate::{AccumulateParams, AccumulatePlugin};
pub use downsample::{DownsampleParams, DownsamplePlugin};
pub use passthrough::{PassthroughParams, PassthroughPlugin};

use crate::error::{Result, ResultExt, TomoflowError};
use crate::types::FrameSpec;
use serde::de::DeserializeOwned;

/// Deserialize a plugin's parameter table. A malformed `frames` entry
/// fails as an invalid frame spec.
pub(crate) fn parse_params<T: DeserializeOwned>(plugin: &str, params: &toml::Table) -> Result<T> {
    if let Some(frames) = params.get("frames") {
        FrameSpec::from_toml(frames)
            .with_context(|| format!("Parameters of plugin '{}'", plugin))?;
    }
    toml::Value::Table(params.clone())
        .try_into::<T>()
        .map_err(TomoflowError::from)
        .with_context(|| format!("Parameters of plugin '{}'", plugin))
}
