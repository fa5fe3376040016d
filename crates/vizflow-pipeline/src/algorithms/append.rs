use std::any::Any;

use crate::algorithm::{Algorithm, ExecuteContext};
use crate::data::ImageData;
use crate::error::{PipelineError, Result};
use crate::extent::Extent;
use crate::information::{OutputInformation, UpdateRequest};

/// Joins any number of images into one covering their union.
///
/// All inputs must have the same number of components. Where inputs
/// overlap, later connections win. Each input is asked only
/// for the part of the request inside its own whole extent.
#[derive(Debug, Clone, Default)]
pub struct ImageAppend;

impl ImageAppend {
    pub fn new() -> Self {
        Self
    }
}

impl Algorithm for ImageAppend {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        "ImageAppend"
    }

    fn input_port_repeatable(&self, _port: usize) -> bool {
        true
    }

    fn request_information(
        &mut self,
        inputs: &[Vec<OutputInformation>],
        outputs: &mut [OutputInformation],
    ) -> Result<()> {
        let connections = inputs.first().map_or(&[][..], Vec::as_slice);
        let Some(first) = connections.first() else {
            return Ok(());
        };
        let mut info = first.clone();
        let whole = connections
            .iter()
            .filter_map(|input| input.whole_extent)
            .fold(Extent::EMPTY, |acc, e| acc.union(&e));
        info.whole_extent = Some(whole);
        info.can_produce_sub_extent = true;
        outputs[0] = info;
        Ok(())
    }

    fn request_update_extent(
        &mut self,
        _output_port: usize,
        request: &UpdateRequest,
        inputs: &mut [Vec<UpdateRequest>],
        input_information: &[Vec<OutputInformation>],
    ) -> Result<()> {
        let wanted = request.extent.unwrap_or(Extent::EMPTY);
        let (Some(requests), Some(infos)) = (inputs.get_mut(0), input_information.first()) else {
            return Ok(());
        };
        for (upstream, info) in requests.iter_mut().zip(infos) {
            let whole = info.whole_extent.unwrap_or(Extent::EMPTY);
            upstream.extent = Some(wanted.intersection(&whole));
        }
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<()> {
        let extent = ctx.execution_extent(0);
        let components = ctx
            .output_information(0)
            .map_or(1, |info| info.number_of_components);
        if let Some(n) = ctx
            .input_connections(0)
            .iter()
            .position(|input| input.image().number_of_components() != components)
        {
            return Err(PipelineError::InputTypeMismatch {
                node: ctx.node(),
                port: 0,
                reason: format!("connection {n} does not have {components} components"),
            });
        }
        let mut image = match ctx.input_connections(0).first() {
            Some(first) => ImageData::new(extent, components)
                .with_geometry(first.image().origin(), first.image().spacing()),
            None => ImageData::new(extent, components),
        };
        let inputs = ctx.input_connections(0).len();
        for (n, input) in ctx.input_connections(0).iter().enumerate() {
            image.copy_region_from(input.image());
            log::trace!("appended input {n} of {inputs}");
        }
        ctx.set_output_image(0, image)?;
        Ok(())
    }
}
