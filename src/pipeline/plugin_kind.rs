//! Plugin kind enumeration for building plugins from a process list.

use crate::error::Result;
use crate::pipeline::plugin::{AnyPlugin, BuiltinPlugin};
use crate::pipeline::plugins::{parse_params, AccumulatePlugin, DownsamplePlugin, PassthroughPlugin};
use serde::{Deserialize, Serialize};

/// Kinds of plugin a process list can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Copies frames unchanged.
    Passthrough,
    /// Adds a constant; iterative with `iterations > 1`.
    Accumulate,
    /// Averages consecutive frames, reducing the frame count.
    Downsample,
}

impl PluginKind {
    /// Get the display name for this plugin kind.
    pub fn display_name(&self) -> &'static str {
        match self {
            PluginKind::Passthrough => "Passthrough",
            PluginKind::Accumulate => "Accumulate",
            PluginKind::Downsample => "Downsample",
        }
    }

    /// Get all available plugin kinds.
    pub fn all() -> &'static [PluginKind] {
        &[
            PluginKind::Passthrough,
            PluginKind::Accumulate,
            PluginKind::Downsample,
        ]
    }

    pub fn description(&self) -> &'static str {
        match self {
            PluginKind::Passthrough =>
                "Copies input frames to a mirrored output.\n\
                 Optional edge padding is requested and cropped.",

            PluginKind::Accumulate =>
                "Adds `increment` to the latest estimate.\n\
                 With `iterations` > 1 it feeds its output back in.",

            PluginKind::Downsample =>
                "Averages every `bin` frames into one.\n\
                 The output has fewer frames than the input.",
        }
    }

    /// Build a plugin of this kind from its parameter table.
    pub fn build(&self, name: &str, params: &toml::Table) -> Result<AnyPlugin> {
        let plugin = match self {
            PluginKind::Passthrough => {
                BuiltinPlugin::Passthrough(PassthroughPlugin::new(name, parse_params(name, params)?))
            }
            PluginKind::Accumulate => {
                BuiltinPlugin::Accumulate(AccumulatePlugin::new(name, parse_params(name, params)?))
            }
            PluginKind::Downsample => {
                BuiltinPlugin::Downsample(DownsamplePlugin::new(name, parse_params(name, params)?))
            }
        };
        Ok(AnyPlugin::Builtin(plugin))
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
