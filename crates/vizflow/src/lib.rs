//! vizflow: a demand-driven visualization pipeline.
//!
//! vizflow connects algorithms into a graph that is executed on demand:
//! asking an output for a region of data runs only the algorithms, and only
//! the regions, needed to produce it. Alongside the pipeline sits an object
//! model with reference counting that also reclaims reference cycles.
//!
//! # Quick Start
//!
//! ```
//! use vizflow::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!
//!     let mut pipeline = Pipeline::new();
//!     let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 63, 0, 63, 0, 0)));
//!     let scale = pipeline.add_algorithm(ImageShiftScale::new(0.0, 0.5));
//!     pipeline.connect(source, 0, scale, 0)?;
//!
//!     // Only the requested rows are computed.
//!     pipeline.set_update_extent(scale, 0, Extent::new(0, 63, 0, 15, 0, 0))?;
//!     pipeline.update(scale)?;
//!
//!     let output = pipeline.output(scale, 0)?.expect("updated");
//!     assert_eq!(output.extent(), Extent::new(0, 63, 0, 15, 0, 0));
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`ObjectDomain`] owns reference-counted objects; [`DeferredCollection`]
//!   batches cycle collection
//! - [`Pipeline`] owns [`Algorithm`] nodes and runs the information,
//!   update-extent and data passes
//! - Nodes added with [`Pipeline::add_cached_algorithm`] keep an
//!   [`ExtentCache`] of earlier outputs

use std::path::Path;

use thiserror::Error;

pub use glam::DVec3;

pub use vizflow_core::{
    CollectionReport, CollectorOptions, CollectorState, CollectorStats, DeferredCollection,
    ModifiedClock, ObjectDomain, ObjectEvent, ObjectId, ObserverTag, Options, PipelineOptions,
    SharedDomain, TimeStamp, VizflowError, WeakObject,
};

pub use vizflow_pipeline::algorithms::{
    ImageAppend, ImageCacheFilter, ImageClip, ImageShiftScale, ImageSource,
};
pub use vizflow_pipeline::{
    Algorithm, CacheKey, CancellationToken, CombineMode, Connection, DataInformation, DataObject,
    ExecuteContext, Extent, ExtentCache, ExtentTranslator, ImageData, NodeId, OutputInformation,
    Pipeline, PipelineCallback, PipelineError, PipelineEvent, PortState, SplitMode, UpdateRequest,
};

/// Any error vizflow can report.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration or object model error.
    #[error(transparent)]
    Core(#[from] VizflowError),

    /// Pipeline construction or update error.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// A specialized Result type for vizflow.
pub type Result<T> = std::result::Result<T, Error>;

/// Initializes `env_logger`. Calling it more than once is harmless.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Loads and validates options from a JSON file.
pub fn load_options(path: impl AsRef<Path>) -> Result<Options> {
    let path = path.as_ref();
    let options = Options::from_json_file(path)?;
    log::info!("loaded options from {}", path.display());
    Ok(options)
}

/// Creates an empty pipeline configured by `options`.
pub fn pipeline_from_options(options: &Options) -> Result<Pipeline> {
    options.validate()?;
    Ok(Pipeline::with_options(options.pipeline.clone()))
}

/// Creates an empty object domain configured by `options`.
pub fn domain_from_options<T>(options: &Options) -> Result<ObjectDomain<T>> {
    options.validate()?;
    Ok(ObjectDomain::with_options(options.collector.clone()))
}
