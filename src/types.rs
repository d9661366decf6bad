//! Core value types shared by the data model and the pipeline
//!
//! # Main Types
//!
//! - [`DType`] - Element type of a dataset, used for transfer-size estimates
//! - [`FrameRequest`] / [`FrameSpec`] - How many frames a plugin wants per call
//! - [`Padding`] - Frame padding a plugin requires from the storage layer
//!
//! # Frame specs
//!
//! A frame spec is written in a process list as one of:
//!
//! - `"single"` - one frame per process call
//! - `"multiple"` - as many frames per call as the transport allows
//! - a positive integer - a fixed number of frames per call
//! - `[spec, hard_limit]` - any of the above, capped at `hard_limit`

use crate::error::{Result, TomoflowError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    UInt8,
    UInt16,
    Int32,
    #[default]
    Float32,
    Float64,
}

impl DType {
    /// Size of one element in bytes
    pub fn itemsize(&self) -> usize {
        match self {
            DType::UInt8 => 1,
            DType::UInt16 => 2,
            DType::Int32 | DType::Float32 => 4,
            DType::Float64 => 8,
        }
    }
}

/// Frame granularity requested by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameRequest {
    /// One frame per process call.
    Single,
    /// As many frames per call as the transport can hand over.
    Multiple,
    /// A fixed number of frames per call. This is a first-class request,
    /// typically computed by a plugin from device memory at setup time.
    Count(usize),
}

impl fmt::Display for FrameRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRequest::Single => write!(f, "single"),
            FrameRequest::Multiple => write!(f, "multiple"),
            FrameRequest::Count(n) => write!(f, "{}", n),
        }
    }
}

/// A frame request with an optional hard limit on the frame count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFrameSpec", into = "RawFrameSpec")]
pub struct FrameSpec {
    pub request: FrameRequest,
    pub hard_limit: Option<usize>,
}

impl FrameSpec {
    pub const fn single() -> Self {
        Self {
            request: FrameRequest::Single,
            hard_limit: None,
        }
    }

    pub const fn multiple() -> Self {
        Self {
            request: FrameRequest::Multiple,
            hard_limit: None,
        }
    }

    /// A fixed frame count. Zero is rejected.
    pub fn count(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(TomoflowError::InvalidFrameSpec(
                "a frame count must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            request: FrameRequest::Count(n),
            hard_limit: None,
        })
    }

    /// Cap this spec at `limit` frames.
    pub fn with_hard_limit(mut self, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(TomoflowError::InvalidFrameSpec(
                "a hard frame limit must be a positive integer".to_string(),
            ));
        }
        self.hard_limit = Some(limit);
        Ok(self)
    }

    pub fn is_multiple(&self) -> bool {
        self.request == FrameRequest::Multiple
    }

    /// Parse a frame spec from a JSON value.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value::<FrameSpec>(value.clone())
            .map_err(|e| TomoflowError::InvalidFrameSpec(format!("{}: {}", value, e)))
    }

    /// Parse a frame spec from a TOML value (plugin parameters).
    pub fn from_toml(value: &toml::Value) -> Result<Self> {
        value
            .clone()
            .try_into::<FrameSpec>()
            .map_err(|e| TomoflowError::InvalidFrameSpec(format!("{}: {}", value, e)))
    }
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self::single()
    }
}

impl fmt::Display for FrameSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hard_limit {
            Some(limit) => write!(f, "[{}, {}]", self.request, limit),
            None => write!(f, "{}", self.request),
        }
    }
}

/// Wire form of a frame spec as it appears in process lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawFrameSpec {
    Keyword(String),
    Count(i64),
    Limited(Box<RawFrameSpec>, i64),
}

fn request_from_raw(raw: &RawFrameSpec) -> Result<FrameRequest> {
    match raw {
        RawFrameSpec::Keyword(word) => match word.as_str() {
            "single" => Ok(FrameRequest::Single),
            "multiple" => Ok(FrameRequest::Multiple),
            other => Err(TomoflowError::InvalidFrameSpec(format!(
                "'{}' is not one of 'single' or 'multiple'",
                other
            ))),
        },
        RawFrameSpec::Count(n) if *n > 0 => Ok(FrameRequest::Count(*n as usize)),
        RawFrameSpec::Count(n) => Err(TomoflowError::InvalidFrameSpec(format!(
            "frame count {} must be a positive integer",
            n
        ))),
        RawFrameSpec::Limited(..) => Err(TomoflowError::InvalidFrameSpec(
            "hard limits cannot be nested".to_string(),
        )),
    }
}

impl TryFrom<RawFrameSpec> for FrameSpec {
    type Error = TomoflowError;

    fn try_from(raw: RawFrameSpec) -> Result<Self> {
        match raw {
            RawFrameSpec::Limited(inner, limit) => {
                let request = request_from_raw(&inner)?;
                if limit <= 0 {
                    return Err(TomoflowError::InvalidFrameSpec(format!(
                        "hard limit {} must be a positive integer",
                        limit
                    )));
                }
                Ok(FrameSpec {
                    request,
                    hard_limit: Some(limit as usize),
                })
            }
            other => Ok(FrameSpec {
                request: request_from_raw(&other)?,
                hard_limit: None,
            }),
        }
    }
}

impl From<FrameSpec> for RawFrameSpec {
    fn from(spec: FrameSpec) -> Self {
        let request = match spec.request {
            FrameRequest::Single => RawFrameSpec::Keyword("single".to_string()),
            FrameRequest::Multiple => RawFrameSpec::Keyword("multiple".to_string()),
            FrameRequest::Count(n) => RawFrameSpec::Count(n as i64),
        };
        match spec.hard_limit {
            Some(limit) => RawFrameSpec::Limited(Box::new(request), limit as i64),
            None => request,
        }
    }
}

/// Explicit padding of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadDirection {
    pub dim: usize,
    pub before: usize,
    pub after: usize,
}

/// Padding a plugin needs around each frame.
///
/// The storage layer honours this when fetching frames; plugin data only
/// carries the requirement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Padding {
    /// Extra neighbouring frames on each side along the main slice dimension.
    #[serde(default)]
    pub pad_multi_frames: usize,
    /// Per-dimension padding.
    #[serde(default)]
    pub pad_directions: Vec<PadDirection>,
    /// Padding applied to both ends of every core dimension.
    #[serde(default)]
    pub pad_frame_edges: usize,
}

impl Padding {
    pub fn is_empty(&self) -> bool {
        self.pad_multi_frames == 0 && self.pad_frame_edges == 0 && self.pad_directions.is_empty()
    }

    /// Pad every core dimension by `n` on both sides.
    pub fn frame_edges(n: usize) -> Self {
        Self {
            pad_frame_edges: n,
            ..Self::default()
        }
    }

    /// Total (before, after) padding for `dim`, given the core dims.
    pub fn amount(&self, dim: usize, core_dims: &[usize]) -> (usize, usize) {
        let edge = if core_dims.contains(&dim) {
            self.pad_frame_edges
        } else {
            0
        };
        self.pad_directions
            .iter()
            .filter(|p| p.dim == dim)
            .fold((edge, edge), |(b, a), p| (b + p.before, a + p.after))
    }
}
