//! DownsamplePlugin: averages every `bin` consecutive frames into one.
//!
//! The output has fewer frames than the input, so its frame counts are
//! derived from the input's during reconciliation.

use crate::error::{Result, TomoflowError};
use crate::pipeline::plugin::{Plugin, ProcessContext, SetupContext};
use crate::pipeline::plugin_data::PatternSetup;
use crate::types::FrameSpec;
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownsampleParams {
    pub pattern: String,
    pub bin: usize,
}

impl Default for DownsampleParams {
    fn default() -> Self {
        Self {
            pattern: "PROJECTION".to_string(),
            bin: 2,
        }
    }
}

pub struct DownsamplePlugin {
    name: String,
    params: DownsampleParams,
}

impl DownsamplePlugin {
    pub fn new(name: impl Into<String>, params: DownsampleParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl Plugin for DownsamplePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        let bin = self.params.bin;
        let in_id = ctx.in_id(0)?;
        let frames = FrameSpec::count(bin)?;
        let dim = {
            let pd = ctx.setup_in(0, PatternSetup::new(self.params.pattern.clone(), frames))?;
            if pd.pattern()?.slice_dims().len() != 1 {
                return Err(TomoflowError::Configuration(format!(
                    "{} needs a pattern with a single slice dimension",
                    self.name
                )));
            }
            pd.main_slice_dim()?
        };
        let len = ctx.in_dataset(0)?.shape()[dim];
        if len % bin != 0 {
            return Err(TomoflowError::Configuration(format!(
                "{}: {} frames cannot be binned by {}",
                self.name, len, bin
            )));
        }
        ctx.create_out_from(0, in_id)?;
        ctx.out_dataset_mut(0)?.resize_dim(dim, len / bin)?;
        ctx.setup_out(0, PatternSetup::new(self.params.pattern.clone(), FrameSpec::single()))?;
        Ok(())
    }

    fn process_frames(
        &mut self,
        frames: Vec<ArrayD<f32>>,
        _ctx: &ProcessContext,
    ) -> Result<Vec<ArrayD<f32>>> {
        let block = frames
            .first()
            .ok_or_else(|| TomoflowError::plugin(&self.name, "no input frames"))?;
        let mean = block
            .mean_axis(Axis(0))
            .ok_or_else(|| TomoflowError::plugin(&self.name, "empty frame block"))?;
        Ok(vec![mean.insert_axis(Axis(0))])
    }
}
