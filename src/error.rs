//! Error handling for tomoflow
//!
//! This module defines the crate-wide error type and a Result alias.
//! Every fatal condition raised while building or running a pipeline maps
//! to one variant here. Uneven frame distribution is not an error; see
//! [`crate::pipeline::warnings`].

use thiserror::Error;

/// Main error type for tomoflow operations
#[derive(Error, Debug)]
pub enum TomoflowError {
    /// Malformed pattern definitions, bad dataset wiring or similar
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A pattern name was requested that the dataset does not carry
    #[error("Unknown pattern '{pattern}' for dataset '{dataset}'")]
    UnknownPattern { dataset: String, pattern: String },

    /// A frame request outside 'single', 'multiple', an integer or [spec, limit]
    #[error("Invalid frame spec: {0}")]
    InvalidFrameSpec(String),

    /// Cross-dataset frame reconciliation could not be resolved
    #[error("Incompatible frame spec for dataset '{dataset}': {message}")]
    IncompatibleFrameSpec { dataset: String, message: String },

    /// A value was read before it was set
    #[error("Missing {what}: '{key}'")]
    MissingMetadata { what: String, key: String },

    /// A logical dataset name is not present in the experiment index
    #[error("Unknown {role} dataset '{name}'")]
    UnknownDataset { role: String, name: String },

    /// A plugin was positioned outside its iteration group
    #[error("Iteration group ({start}, {end}): {message}")]
    IterationGroup {
        start: usize,
        end: usize,
        message: String,
    },

    /// An alternating pair without a clone dataset
    #[error(
        "Alternating datasets must contain a clone, got '{first}' and '{second}'"
    )]
    CloneNaming { first: String, second: String },

    /// Frame storage/transport failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// A plugin failed inside one of its hooks
    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TomoflowError>,
    },
}

impl TomoflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TomoflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a plugin failure
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        TomoflowError::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &TomoflowError {
        match self {
            TomoflowError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<toml::de::Error> for TomoflowError {
    fn from(err: toml::de::Error) -> Self {
        TomoflowError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for TomoflowError {
    fn from(err: toml::ser::Error) -> Self {
        TomoflowError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for TomoflowError {
    fn from(err: serde_json::Error) -> Self {
        TomoflowError::Serialization(err.to_string())
    }
}

/// Result type alias for tomoflow operations
pub type Result<T> = std::result::Result<T, TomoflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
