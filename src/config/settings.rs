//! Run-wide negotiation settings
//!
//! These control how frame counts are negotiated with the transport and how
//! the resulting blocks are spread across worker processes.
//!
//! # Main Types
//!
//! - [`NegotiationSettings`] - worker count, utilisation threshold and an
//!   optional cap on frames per transfer

use crate::error::{Result, TomoflowError};
use crate::pipeline::transport::BlockTransport;
use serde::{Deserialize, Serialize};

/// Fraction of the last transfer block below which a warning is raised
pub const DEFAULT_UTILISATION_THRESHOLD: f64 = 0.85;

/// Settings shared by every plugin of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationSettings {
    /// Number of worker processes (ranks)
    #[serde(default = "default_processes")]
    pub processes: usize,

    /// Warn when the last transfer block is at most this full
    #[serde(default = "default_utilisation_threshold")]
    pub utilisation_threshold: f64,

    /// Upper bound on frames per transfer, e.g. from device memory
    #[serde(default)]
    pub max_frames_cap: Option<usize>,
}

fn default_processes() -> usize {
    1
}

fn default_utilisation_threshold() -> f64 {
    DEFAULT_UTILISATION_THRESHOLD
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            processes: default_processes(),
            utilisation_threshold: default_utilisation_threshold(),
            max_frames_cap: None,
        }
    }
}

impl NegotiationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.processes == 0 {
            return Err(TomoflowError::Configuration(
                "processes must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.utilisation_threshold) {
            return Err(TomoflowError::Configuration(format!(
                "utilisation_threshold {} is outside [0, 1]",
                self.utilisation_threshold
            )));
        }
        if self.max_frames_cap == Some(0) {
            return Err(TomoflowError::Configuration(
                "max_frames_cap must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The transport these settings describe
    pub fn transport(&self) -> BlockTransport {
        BlockTransport::new(self.max_frames_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = NegotiationSettings::default();
        assert_eq!(settings.processes, 1);
        assert_eq!(settings.utilisation_threshold, 0.85);
        assert!(settings.max_frames_cap.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: NegotiationSettings = toml::from_str("processes = 4").unwrap();
        assert_eq!(settings.processes, 4);
        assert_eq!(settings.utilisation_threshold, 0.85);
    }

    #[test]
    fn test_validation() {
        let mut settings = NegotiationSettings {
            processes: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        settings.processes = 2;
        settings.utilisation_threshold = 1.5;
        assert!(settings.validate().is_err());
        settings.utilisation_threshold = 0.5;
        settings.max_frames_cap = Some(0);
        assert!(settings.validate().is_err());
    }
}
