//! Error types for the query engine.

use crate::feature::FeatureId;
use geoquery_types::GeometryError;
use thiserror::Error;

/// Errors returned by store, index, query and loader operations.
///
/// None of these are retried internally; a failed write leaves the store
/// exactly as it was.
#[derive(Error, Debug)]
pub enum GeoQueryError {
    /// Malformed geometry, rejected before it reached the store.
    #[error("Invalid geometry: {0}")]
    Geometry(#[from] GeometryError),

    /// The referenced feature id is not in the store.
    #[error("Feature not found: {0}")]
    NotFound(FeatureId),

    /// A query parameter was outside its contract (k < 1, min > max, NaN).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Extent or statistics requested on a store with no features.
    #[error("Store is empty")]
    EmptyStore,

    /// The interchange document was malformed, or one of its features was.
    #[error("{}", format_parse_error(.index, .message))]
    Parse {
        index: Option<usize>,
        message: String,
    },

    /// A cancellable query observed its cancellation token.
    #[error("Query cancelled")]
    Cancelled,

    /// Export could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while reading an interchange document from disk.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_parse_error(index: &Option<usize>, message: &str) -> String {
    match index {
        Some(index) => format!("Parse error at feature {}: {}", index, message),
        None => format!("Parse error: {}", message),
    }
}

impl GeoQueryError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            index: None,
            message: message.into(),
        }
    }

    pub(crate) fn parse_at(index: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            index: Some(index),
            message: message.into(),
        }
    }
}

/// Result type for query engine operations.
pub type Result<T> = std::result::Result<T, GeoQueryError>;
