//! Core abstractions for vizflow.
//!
//! This crate provides the fundamental types the pipeline is built on:
//! - [`ObjectDomain`] arena of reference-counted objects with cycle-safe collection
//! - [`DeferredCollection`] scoped guard for batched collection
//! - [`TimeStamp`] modification clock shared by objects and pipeline nodes
//! - Configuration options and the error type

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod object;
pub mod options;
pub mod timestamp;

pub use error::{Result, VizflowError};
pub use object::{
    CollectionReport, CollectorState, CollectorStats, DeferredCollection, ObjectDomain,
    ObjectEvent, ObjectId, ObserverTag, SharedDomain, WeakObject,
};
pub use options::{CollectorOptions, Options, PipelineOptions};
pub use timestamp::{ModifiedClock, TimeStamp};
