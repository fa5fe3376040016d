//! Demand-driven streaming pipeline for vizflow.
//!
//! This crate provides:
//! - [`Extent`] algebra and [`ExtentTranslator`] piece splitting
//! - [`Algorithm`], the contract every processing step implements
//! - [`Pipeline`], the executive running the information, update-extent
//!   and data passes
//! - [`ExtentCache`], the LRU behind cached nodes
//! - A handful of image [`algorithms`]
//!
//! ```
//! use vizflow_pipeline::algorithms::{ImageClip, ImageSource};
//! use vizflow_pipeline::{Extent, Pipeline};
//!
//! let mut pipeline = Pipeline::new();
//! let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 100, 0, 100, 0, 0)));
//! let rows = Extent::new(0, 100, 0, 20, 0, 0);
//! let clip = pipeline.add_algorithm(ImageClip::with_output_extent(rows));
//! pipeline.connect(source, 0, clip, 0)?;
//!
//! pipeline.update(clip)?;
//! let output = pipeline.output(clip, 0)?.expect("clip produced data");
//! assert_eq!(output.extent(), Extent::new(0, 100, 0, 20, 0, 0));
//! # Ok::<(), vizflow_pipeline::PipelineError>(())
//! ```

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
// Extents use i32 indices while buffers use usize
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod algorithm;
pub mod algorithms;
pub mod cache;
pub mod data;
pub mod error;
pub mod executive;
pub mod extent;
pub mod information;

pub use algorithm::{Algorithm, ExecuteContext};
pub use cache::{CacheKey, ExtentCache};
pub use data::{DataInformation, DataObject, ImageData};
pub use error::{PipelineError, Result};
pub use executive::{
    CancellationToken, Connection, NodeId, Pipeline, PipelineCallback, PipelineEvent, PortState,
};
pub use extent::{Extent, ExtentTranslator, SplitMode};
pub use information::{CombineMode, OutputInformation, UpdateRequest};
