//! Error types for the pipeline.

use thiserror::Error;
use vizflow_core::VizflowError;

use crate::executive::NodeId;
use crate::extent::Extent;

/// Errors raised while building or updating a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A requested update extent reaches outside the whole extent.
    #[error("{node} port {port}: update extent {requested} lies outside whole extent {whole}")]
    ExtentOutOfBounds {
        node: NodeId,
        port: usize,
        requested: Extent,
        whole: Extent,
    },

    /// The request cannot be expressed as a single streamed piece.
    #[error("{node} port {port}: unsupported streaming request: {reason}")]
    UnsupportedStreaming {
        node: NodeId,
        port: usize,
        reason: String,
    },

    /// An algorithm upstream of the requested port failed.
    #[error("{algorithm} ({node}) failed: {source}")]
    UpstreamFailure {
        node: NodeId,
        algorithm: &'static str,
        #[source]
        source: Box<PipelineError>,
    },

    /// A port index is out of range for its node.
    #[error("{node} has no {kind} port {port}")]
    InvalidPort {
        node: NodeId,
        kind: &'static str,
        port: usize,
    },

    /// The node handle does not belong to this pipeline.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A required input port has no connection.
    #[error("{node} input port {port} is not connected")]
    MissingInput { node: NodeId, port: usize },

    /// An algorithm got an input of a type it cannot process.
    #[error("{node} input port {port}: {reason}")]
    InputTypeMismatch {
        node: NodeId,
        port: usize,
        reason: String,
    },

    /// An output port never reported a whole extent.
    #[error("{node} port {port} has no whole extent")]
    MissingWholeExtent { node: NodeId, port: usize },

    /// The connection would close a loop in the graph.
    #[error("connecting {from} to {to} would create a cycle")]
    WouldCreateCycle { from: NodeId, to: NodeId },

    /// The node was not created with an extent cache.
    #[error("{0} has no extent cache")]
    NotCached(NodeId),

    /// An algorithm reported a failure from one of its passes.
    #[error("{0}")]
    AlgorithmFailed(String),

    /// The update was cancelled before this node executed.
    #[error("update cancelled before {0} executed")]
    Cancelled(NodeId),

    /// Error from the core crate.
    #[error(transparent)]
    Core(#[from] VizflowError),
}

impl PipelineError {
    /// Returns the innermost error, unwrapping nested upstream failures.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::UpstreamFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
