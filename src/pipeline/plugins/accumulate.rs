//! AccumulatePlugin: adds a constant to the most recent estimate.
//!
//! Run for `iterations > 1` it becomes iterative: from iteration 1 on it
//! also receives its previous output as the last input, so after `k`
//! iterations the result is `input + k * increment`.

use crate::error::{Result, TomoflowError};
use crate::pipeline::plugin::{Plugin, ProcessContext, SetupContext};
use crate::pipeline::plugin_data::PatternSetup;
use crate::types::FrameSpec;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulateParams {
    pub pattern: String,
    pub frames: FrameSpec,
    pub increment: f32,
    pub iterations: usize,
}

impl Default for AccumulateParams {
    fn default() -> Self {
        Self {
            pattern: "PROJECTION".to_string(),
            frames: FrameSpec::multiple(),
            increment: 1.0,
            iterations: 1,
        }
    }
}

pub struct AccumulatePlugin {
    name: String,
    params: AccumulateParams,
}

impl AccumulatePlugin {
    pub fn new(name: impl Into<String>, params: AccumulateParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl Plugin for AccumulatePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn iterations(&self) -> usize {
        self.params.iterations.max(1)
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        let in_id = ctx.in_id(0)?;
        ctx.create_out_from(0, in_id)?;
        let setup = PatternSetup::new(self.params.pattern.clone(), self.params.frames);
        ctx.setup_in(0, setup.clone())?;
        ctx.setup_out(0, setup)?;
        Ok(())
    }

    fn process_frames(
        &mut self,
        mut frames: Vec<ArrayD<f32>>,
        _ctx: &ProcessContext,
    ) -> Result<Vec<ArrayD<f32>>> {
        let latest = frames
            .pop()
            .ok_or_else(|| TomoflowError::plugin(&self.name, "no input frames"))?;
        Ok(vec![latest + self.params.increment])
    }
}
