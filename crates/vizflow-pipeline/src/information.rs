//! Typed request and response records exchanged by the request passes.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::extent::{Extent, ExtentTranslator, SplitMode};

/// Meta-information an output port advertises during `RequestInformation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputInformation {
    /// Largest extent the port can produce.
    pub whole_extent: Option<Extent>,
    /// Discrete time steps, in increasing order.
    pub time_steps: Vec<f64>,
    /// Continuous time range, if the port is time-varying.
    pub time_range: Option<(f64, f64)>,
    /// World position of point `(0, 0, 0)`.
    pub origin: DVec3,
    /// Distance between neighbouring points.
    pub spacing: DVec3,
    /// Scalar components per point.
    pub number_of_components: usize,
    /// The producer can generate any sub-extent of its whole extent.
    pub can_produce_sub_extent: bool,
    /// The producer understands piece requests directly.
    pub can_handle_piece_request: bool,
}

impl Default for OutputInformation {
    fn default() -> Self {
        Self {
            whole_extent: None,
            time_steps: Vec::new(),
            time_range: None,
            origin: DVec3::ZERO,
            spacing: DVec3::ONE,
            number_of_components: 1,
            can_produce_sub_extent: false,
            can_handle_piece_request: false,
        }
    }
}

impl OutputInformation {
    /// Information for a structured port covering `whole_extent`.
    pub fn with_whole_extent(whole_extent: Extent) -> Self {
        Self {
            whole_extent: Some(whole_extent),
            ..Self::default()
        }
    }

    /// Returns true if the port produces time-varying data.
    pub fn is_time_varying(&self) -> bool {
        self.time_range.is_some() || !self.time_steps.is_empty()
    }

    /// Snaps a requested time to the largest step not after it.
    ///
    /// Requests before the first step return the first step. Without
    /// discrete steps the time is clamped to the range.
    pub fn snap_time(&self, time: f64) -> f64 {
        if let Some(step) = self.time_steps.iter().rev().find(|&&t| t <= time) {
            return *step;
        }
        if let Some(first) = self.time_steps.first() {
            return *first;
        }
        match self.time_range {
            Some((lo, hi)) => time.clamp(lo, hi),
            None => time,
        }
    }
}

/// How a new request is merged into a port's combined update extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CombineMode {
    /// Union the request with extents already requested this pass.
    #[default]
    Combine,
    /// Discard earlier requests and use this one alone.
    Replace,
}

/// What a consumer asks of an output port during `RequestUpdateExtent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Requested structured extent; `None` means the whole extent.
    pub extent: Option<Extent>,
    /// Requested piece.
    pub piece: u32,
    /// Number of pieces the data is split into.
    pub number_of_pieces: u32,
    /// Layers of ghost points around the piece.
    pub ghost_levels: u32,
    /// Requested time, if any.
    pub time: Option<f64>,
    /// Crop the produced data to exactly the requested extent.
    pub exact_extent: bool,
    /// Whether this request unions with or replaces earlier ones.
    pub mode: CombineMode,
}

impl Default for UpdateRequest {
    fn default() -> Self {
        Self {
            extent: None,
            piece: 0,
            number_of_pieces: 1,
            ghost_levels: 0,
            time: None,
            exact_extent: false,
            mode: CombineMode::Combine,
        }
    }
}

impl UpdateRequest {
    /// A request for exactly `extent`.
    pub fn for_extent(extent: Extent) -> Self {
        Self {
            extent: Some(extent),
            ..Self::default()
        }
    }

    /// A request for one piece of the whole extent.
    pub fn for_piece(piece: u32, number_of_pieces: u32, ghost_levels: u32) -> Self {
        Self {
            piece,
            number_of_pieces,
            ghost_levels,
            ..Self::default()
        }
    }

    /// Resolves the structured extent this request asks for.
    ///
    /// An explicit extent wins. Otherwise the piece is translated against
    /// `whole`; `None` means the piece does not exist.
    pub fn resolve_extent(&self, whole: &Extent) -> Option<Extent> {
        if let Some(extent) = self.extent {
            return Some(extent);
        }
        if self.number_of_pieces <= 1 {
            return Some(*whole);
        }
        ExtentTranslator::piece_to_extent(
            self.piece,
            self.number_of_pieces,
            self.ghost_levels,
            whole,
            SplitMode::Block,
        )
    }
}
