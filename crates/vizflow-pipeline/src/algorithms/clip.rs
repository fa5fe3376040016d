use std::any::Any;

use crate::algorithm::{Algorithm, ExecuteContext};
use crate::error::{PipelineError, Result};
use crate::extent::Extent;
use crate::information::{OutputInformation, UpdateRequest};

/// Restricts its input to a sub-extent.
///
/// The output whole extent is the input's whole extent clipped to
/// [`set_output_extent`](Self::set_output_extent); only the clipped region
/// is requested upstream.
#[derive(Debug, Clone, Default)]
pub struct ImageClip {
    output_extent: Option<Extent>,
}

impl ImageClip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_extent(extent: Extent) -> Self {
        Self {
            output_extent: Some(extent),
        }
    }

    pub fn set_output_extent(&mut self, extent: Extent) {
        self.output_extent = Some(extent);
    }

    /// Passes the whole input extent through again.
    pub fn reset_output_extent(&mut self) {
        self.output_extent = None;
    }

    pub fn output_extent(&self) -> Option<Extent> {
        self.output_extent
    }
}

impl Algorithm for ImageClip {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        "ImageClip"
    }

    fn request_information(
        &mut self,
        inputs: &[Vec<OutputInformation>],
        outputs: &mut [OutputInformation],
    ) -> Result<()> {
        let Some(input) = inputs.first().and_then(|port| port.first()) else {
            return Ok(());
        };
        let mut info = input.clone();
        if let (Some(whole), Some(clip)) = (info.whole_extent, self.output_extent) {
            info.whole_extent = Some(whole.intersection(&clip));
        }
        info.can_produce_sub_extent = true;
        outputs[0] = info;
        Ok(())
    }

    fn request_update_extent(
        &mut self,
        _output_port: usize,
        _request: &UpdateRequest,
        inputs: &mut [Vec<UpdateRequest>],
        input_information: &[Vec<OutputInformation>],
    ) -> Result<()> {
        if let (Some(request), Some(info)) = (
            inputs.get_mut(0).and_then(|port| port.first_mut()),
            input_information.first().and_then(|port| port.first()),
        ) {
            if let (Some(extent), Some(whole)) = (request.extent, info.whole_extent) {
                request.extent = Some(extent.intersection(&whole));
            }
        }
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<()> {
        let extent = ctx.execution_extent(0);
        let input = ctx.input(0, 0)?;
        if !input.extent().contains(&extent) {
            return Err(PipelineError::AlgorithmFailed(format!(
                "clip needs {extent} but its input holds {}",
                input.extent()
            )));
        }
        let time_step = input.time_step();
        let image = input.image().crop(&extent);
        ctx.set_output_image(0, image)?;
        if let Some(t) = time_step {
            ctx.set_data_time_step(0, t);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_extent_is_clipped() {
        let mut clip = ImageClip::with_output_extent(Extent::new(5, 50, 0, 200, 0, 0));
        let whole = Extent::new(0, 100, 0, 100, 0, 0);
        let inputs = vec![vec![OutputInformation::with_whole_extent(whole)]];
        let mut outputs = vec![OutputInformation::default()];
        clip.request_information(&inputs, &mut outputs).unwrap();
        assert_eq!(outputs[0].whole_extent, Some(Extent::new(5, 50, 0, 100, 0, 0)));
    }

    #[test]
    fn test_without_output_extent_passes_whole() {
        let mut clip = ImageClip::new();
        let whole = Extent::new(0, 10, 0, 10, 0, 0);
        let inputs = vec![vec![OutputInformation::with_whole_extent(whole)]];
        let mut outputs = vec![OutputInformation::default()];
        clip.request_information(&inputs, &mut outputs).unwrap();
        assert_eq!(outputs[0].whole_extent, Some(whole));
    }
}
