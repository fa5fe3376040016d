use std::any::Any;

use crate::algorithm::{Algorithm, ExecuteContext};
use crate::error::Result;

/// Maps every scalar `v` to `(v + shift) * scale`.
#[derive(Debug, Clone)]
pub struct ImageShiftScale {
    shift: f64,
    scale: f64,
}

impl ImageShiftScale {
    pub fn new(shift: f64, scale: f64) -> Self {
        Self { shift, scale }
    }

    pub fn shift(&self) -> f64 {
        self.shift
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_shift(&mut self, shift: f64) {
        self.shift = shift;
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }
}

impl Algorithm for ImageShiftScale {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        "ImageShiftScale"
    }

    fn request_data(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<()> {
        let input = ctx.input(0, 0)?;
        let time_step = input.time_step();
        let mut image = input.image().crop(&ctx.execution_extent(0));
        for value in image.scalars_mut() {
            *value = (*value + self.shift) * self.scale;
        }
        ctx.set_output_image(0, image)?;
        if let Some(t) = time_step {
            ctx.set_data_time_step(0, t);
        }
        Ok(())
    }
}
