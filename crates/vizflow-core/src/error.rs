//! Error types for vizflow.

use thiserror::Error;

use crate::object::ObjectId;

/// The main error type for vizflow core operations.
#[derive(Error, Debug)]
pub enum VizflowError {
    /// The handle refers to an object that has already been deleted.
    #[error("object {0} has been deleted")]
    StaleObject(ObjectId),

    /// A reference was released that was never registered.
    #[error("object {target} holds no reference owned by {owner}")]
    MissingReference { target: ObjectId, owner: String },

    /// A deferred-collection pop without a matching push.
    #[error("deferred collection popped without a matching push")]
    UnbalancedCollection,

    /// A configuration value is out of range.
    #[error("invalid option '{name}': {reason}")]
    InvalidOption { name: &'static str, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A specialized Result type for vizflow core operations.
pub type Result<T> = std::result::Result<T, VizflowError>;
