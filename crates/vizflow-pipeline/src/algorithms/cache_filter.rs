use std::any::Any;

use crate::algorithm::{Algorithm, ExecuteContext};
use crate::error::Result;

/// Forwards its input unchanged.
///
/// Add it with [`Pipeline::add_cached_algorithm`](crate::Pipeline::add_cached_algorithm)
/// to keep earlier outputs around: requests the cache can answer stop here
/// and never reach the upstream algorithms.
#[derive(Debug, Clone, Default)]
pub struct ImageCacheFilter;

impl ImageCacheFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Algorithm for ImageCacheFilter {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        "ImageCacheFilter"
    }

    fn request_data(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<()> {
        ctx.pass_input(0, 0)
    }
}
