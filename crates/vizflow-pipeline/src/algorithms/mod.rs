//! Algorithms bundled with the pipeline.

mod append;
mod cache_filter;
mod clip;
mod shift_scale;
mod source;

pub use append::ImageAppend;
pub use cache_filter::ImageCacheFilter;
pub use clip::ImageClip;
pub use shift_scale::ImageShiftScale;
pub use source::ImageSource;
