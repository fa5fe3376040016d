//! Execution events and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::NodeId;

/// What a node reports to its observers during an update.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// `request_data` is about to run.
    StartExecute,
    /// Progress in `[0, 1]` reported by the algorithm.
    Progress(f64),
    /// `request_data` finished and the outputs were published.
    EndExecute,
    /// A request pass failed; the message describes the error.
    Failed(String),
    /// The node's extent cache answered the request.
    CacheHit,
}

/// An observer callback.
pub type PipelineCallback = Box<dyn FnMut(NodeId, &PipelineEvent) + Send>;

pub(crate) fn emit(observers: &mut [PipelineCallback], node: NodeId, event: &PipelineEvent) {
    for observer in observers.iter_mut() {
        observer(node, event);
    }
}

/// Shared flag that aborts an update between `request_data` invocations.
///
/// Clones share the flag, so another thread can cancel a running update.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation so the token can be reused.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!other.is_cancelled());
    }
}
