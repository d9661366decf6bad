//! PassthroughPlugin: copies its input frames to a mirrored output.
//!
//! With `pad > 0` it asks for edge padding on its input and crops it off
//! again, which exercises the padding path of the frame store.

use crate::error::{Result, TomoflowError};
use crate::pipeline::plugin::{Plugin, ProcessContext, SetupContext};
use crate::pipeline::plugin_data::PatternSetup;
use crate::types::{FrameSpec, Padding};
use ndarray::{ArrayD, Slice};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassthroughParams {
    pub pattern: String,
    pub frames: FrameSpec,
    pub pad: usize,
}

impl Default for PassthroughParams {
    fn default() -> Self {
        Self {
            pattern: "PROJECTION".to_string(),
            frames: FrameSpec::single(),
            pad: 0,
        }
    }
}

pub struct PassthroughPlugin {
    name: String,
    params: PassthroughParams,
}

impl PassthroughPlugin {
    pub fn new(name: impl Into<String>, params: PassthroughParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    fn crop(&self, block: ArrayD<f32>) -> ArrayD<f32> {
        let pad = self.params.pad;
        if pad == 0 {
            return block;
        }
        block
            .slice_each_axis(|ax| {
                if ax.axis.index() == 0 {
                    Slice::from(..)
                } else {
                    // padded blocks are at least 2 * pad long
                    Slice::from(pad..ax.len - pad)
                }
            })
            .to_owned()
    }
}

impl Plugin for PassthroughPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        let in_id = ctx.in_id(0)?;
        ctx.create_out_from(0, in_id)?;
        let setup = PatternSetup::new(self.params.pattern.clone(), self.params.frames);
        ctx.setup_in(0, setup.clone())?;
        ctx.setup_out(0, setup)?;
        Ok(())
    }

    fn filter_padding(&self) -> Option<Padding> {
        (self.params.pad > 0).then(|| Padding::frame_edges(self.params.pad))
    }

    fn process_frames(
        &mut self,
        mut frames: Vec<ArrayD<f32>>,
        _ctx: &ProcessContext,
    ) -> Result<Vec<ArrayD<f32>>> {
        let block = frames
            .pop()
            .ok_or_else(|| TomoflowError::plugin(&self.name, "no input frames"))?;
        Ok(vec![self.crop(block)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_crop_removes_padding() {
        let plugin = PassthroughPlugin::new(
            "passthrough",
            PassthroughParams {
                pad: 1,
                ..Default::default()
            },
        );
        let block = ArrayD::from_shape_fn(IxDyn(&[2, 4, 4]), |i| (i[1] * 4 + i[2]) as f32);
        let cropped = plugin.crop(block);
        assert_eq!(cropped.shape(), &[2, 2, 2]);
        assert_eq!(cropped[[0, 0, 0]], 5.0);
        assert_eq!(plugin.filter_padding(), Some(Padding::frame_edges(1)));
    }

    #[test]
    fn test_no_padding_by_default() {
        let plugin = PassthroughPlugin::new("p", PassthroughParams::default());
        assert!(plugin.filter_padding().is_none());
    }
}
