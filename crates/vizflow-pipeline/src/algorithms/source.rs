//! Synthetic image source.

use std::any::Any;

use glam::DVec3;

use crate::algorithm::{Algorithm, ExecuteContext};
use crate::data::ImageData;
use crate::error::Result;
use crate::extent::Extent;
use crate::information::OutputInformation;

/// Produces an analytic scalar field over a configurable whole extent.
///
/// The source can generate any sub-extent and answers piece requests, so it
/// only computes the points a request asks for. Time-varying output is
/// enabled with [`with_time_steps`](Self::with_time_steps).
#[derive(Debug, Clone)]
pub struct ImageSource {
    whole_extent: Extent,
    origin: DVec3,
    spacing: DVec3,
    maximum: f64,
    time_steps: Vec<f64>,
    executions: usize,
    last_extent: Extent,
}

impl ImageSource {
    pub fn new(whole_extent: Extent) -> Self {
        Self {
            whole_extent,
            origin: DVec3::ZERO,
            spacing: DVec3::ONE,
            maximum: 255.0,
            time_steps: Vec::new(),
            executions: 0,
            last_extent: Extent::EMPTY,
        }
    }

    /// Makes the source time-varying over the given steps.
    #[must_use]
    pub fn with_time_steps(mut self, mut steps: Vec<f64>) -> Self {
        steps.sort_by(f64::total_cmp);
        self.time_steps = steps;
        self
    }

    #[must_use]
    pub fn with_geometry(mut self, origin: DVec3, spacing: DVec3) -> Self {
        self.origin = origin;
        self.spacing = spacing;
        self
    }

    pub fn set_whole_extent(&mut self, whole_extent: Extent) {
        self.whole_extent = whole_extent;
    }

    pub fn whole_extent(&self) -> Extent {
        self.whole_extent
    }

    pub fn set_maximum(&mut self, maximum: f64) {
        self.maximum = maximum;
    }

    /// How many times `request_data` has run.
    pub fn execution_count(&self) -> usize {
        self.executions
    }

    /// The extent the last execution produced.
    pub fn last_extent(&self) -> Extent {
        self.last_extent
    }

    /// The field value at point `(i, j, k)` and time `t`.
    pub fn value_at(&self, i: i32, j: i32, k: i32, t: f64) -> f64 {
        let (x, y, z) = (f64::from(i), f64::from(j), f64::from(k));
        self.maximum * (0.1 * x).sin() * (0.1 * y).cos() + 0.5 * z + t
    }
}

impl Algorithm for ImageSource {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        "ImageSource"
    }

    fn number_of_input_ports(&self) -> usize {
        0
    }

    fn request_information(
        &mut self,
        _inputs: &[Vec<OutputInformation>],
        outputs: &mut [OutputInformation],
    ) -> Result<()> {
        let time_range = match (self.time_steps.first(), self.time_steps.last()) {
            (Some(&first), Some(&last)) => Some((first, last)),
            _ => None,
        };
        outputs[0] = OutputInformation {
            whole_extent: Some(self.whole_extent),
            time_steps: self.time_steps.clone(),
            time_range,
            origin: self.origin,
            spacing: self.spacing,
            number_of_components: 1,
            can_produce_sub_extent: true,
            can_handle_piece_request: true,
        };
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<()> {
        let extent = ctx.execution_extent(0);
        let time = match ctx.request(0).and_then(|r| r.time) {
            Some(t) if !self.time_steps.is_empty() => Some(
                ctx.output_information(0)
                    .map_or(t, |info| info.snap_time(t)),
            ),
            _ => None,
        };

        let t = time.unwrap_or(0.0);
        let image = ImageData::from_fn(extent, |i, j, k| self.value_at(i, j, k, t))
            .with_geometry(self.origin, self.spacing);
        ctx.update_progress(1.0);
        ctx.set_output_image(0, image)?;
        if let Some(t) = time {
            ctx.set_data_time_step(0, t);
        }

        self.executions += 1;
        self.last_extent = extent;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information() {
        let mut source =
            ImageSource::new(Extent::new(0, 4, 0, 4, 0, 0)).with_time_steps(vec![2.0, 0.0]);
        let mut outputs = vec![OutputInformation::default()];
        source.request_information(&[], &mut outputs).unwrap();
        assert_eq!(outputs[0].whole_extent, Some(Extent::new(0, 4, 0, 4, 0, 0)));
        assert_eq!(outputs[0].time_steps, vec![0.0, 2.0]);
        assert_eq!(outputs[0].time_range, Some((0.0, 2.0)));
        assert!(outputs[0].can_produce_sub_extent);
    }

    #[test]
    fn test_value_depends_on_time() {
        let source = ImageSource::new(Extent::new(0, 4, 0, 4, 0, 0));
        let a = source.value_at(1, 2, 0, 0.0);
        let b = source.value_at(1, 2, 0, 1.0);
        assert!((b - a - 1.0).abs() < 1e-12);
    }
}
