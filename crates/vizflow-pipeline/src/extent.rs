//! Structured extents and piece splitting.
//!
//! An [`Extent`] is an inclusive box of point indices
//! `(x0, x1, y0, y1, z0, z1)`. Any axis with `min > max` makes the extent
//! empty; [`Extent::EMPTY`] is the canonical empty value and doubles as the
//! "not set" marker for combined update extents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An inclusive index box `(x0, x1, y0, y1, z0, z1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent(pub [i32; 6]);

impl Default for Extent {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Extent {
    /// The canonical empty extent.
    pub const EMPTY: Self = Self([0, -1, 0, -1, 0, -1]);

    /// Creates an extent from its six bounds.
    pub const fn new(x0: i32, x1: i32, y0: i32, y1: i32, z0: i32, z1: i32) -> Self {
        Self([x0, x1, y0, y1, z0, z1])
    }

    /// Returns the raw bounds.
    pub fn as_array(&self) -> [i32; 6] {
        self.0
    }

    /// Returns `(min, max)` along `axis` (0, 1 or 2).
    pub fn axis(&self, axis: usize) -> (i32, i32) {
        (self.0[2 * axis], self.0[2 * axis + 1])
    }

    /// Returns true if the extent contains no points.
    pub fn is_empty(&self) -> bool {
        (0..3).any(|a| {
            let (lo, hi) = self.axis(a);
            lo > hi
        })
    }

    /// Returns true if every point of `other` lies inside `self`.
    ///
    /// The empty extent is contained in everything.
    pub fn contains(&self, other: &Extent) -> bool {
        if other.is_empty() {
            return true;
        }
        if self.is_empty() {
            return false;
        }
        (0..3).all(|a| {
            let (lo, hi) = self.axis(a);
            let (olo, ohi) = other.axis(a);
            lo <= olo && ohi <= hi
        })
    }

    /// Returns true if the point `(i, j, k)` lies inside the extent.
    pub fn contains_point(&self, i: i32, j: i32, k: i32) -> bool {
        let [x0, x1, y0, y1, z0, z1] = self.0;
        (x0..=x1).contains(&i) && (y0..=y1).contains(&j) && (z0..=z1).contains(&k)
    }

    /// Returns the smallest extent containing both. Empty operands are ignored.
    #[must_use]
    pub fn union(&self, other: &Extent) -> Extent {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let mut out = [0; 6];
        for a in 0..3 {
            out[2 * a] = self.0[2 * a].min(other.0[2 * a]);
            out[2 * a + 1] = self.0[2 * a + 1].max(other.0[2 * a + 1]);
        }
        Extent(out)
    }

    /// Returns the overlap of both extents, or [`Extent::EMPTY`].
    #[must_use]
    pub fn intersection(&self, other: &Extent) -> Extent {
        let mut out = [0; 6];
        for a in 0..3 {
            out[2 * a] = self.0[2 * a].max(other.0[2 * a]);
            out[2 * a + 1] = self.0[2 * a + 1].min(other.0[2 * a + 1]);
        }
        let out = Extent(out);
        if out.is_empty() || self.is_empty() || other.is_empty() {
            Extent::EMPTY
        } else {
            out
        }
    }

    /// Clamps the extent to `bounds`.
    #[must_use]
    pub fn clamp_to(&self, bounds: &Extent) -> Extent {
        self.intersection(bounds)
    }

    /// Grows every non-degenerate axis by `levels` layers, staying inside `bounds`.
    #[must_use]
    pub fn grow(&self, levels: u32, bounds: &Extent) -> Extent {
        if self.is_empty() || levels == 0 {
            return *self;
        }
        let levels = i32::try_from(levels).unwrap_or(i32::MAX);
        let mut out = self.0;
        for a in 0..3 {
            let (blo, bhi) = bounds.axis(a);
            if blo == bhi {
                continue;
            }
            out[2 * a] = out[2 * a].saturating_sub(levels).max(blo);
            out[2 * a + 1] = out[2 * a + 1].saturating_add(levels).min(bhi);
        }
        Extent(out)
    }

    /// Number of points along each axis.
    pub fn dimensions(&self) -> [usize; 3] {
        if self.is_empty() {
            return [0; 3];
        }
        let mut dims = [0; 3];
        for (a, dim) in dims.iter_mut().enumerate() {
            let (lo, hi) = self.axis(a);
            *dim = usize::try_from(i64::from(hi) - i64::from(lo) + 1).unwrap_or(0);
        }
        dims
    }

    /// Total number of points.
    pub fn number_of_points(&self) -> usize {
        self.dimensions().iter().product()
    }
}

impl From<[i32; 6]> for Extent {
    fn from(bounds: [i32; 6]) -> Self {
        Self(bounds)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x0, x1, y0, y1, z0, z1] = self.0;
        write!(f, "({x0}, {x1}, {y0}, {y1}, {z0}, {z1})")
    }
}

/// How a structured extent is divided into pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitMode {
    /// Recursively halve the longest axis.
    #[default]
    Block,
    /// Split along X only.
    XSlab,
    /// Split along Y only.
    YSlab,
    /// Split along Z only.
    ZSlab,
}

/// Maps `(piece, number_of_pieces)` requests onto structured sub-extents.
pub struct ExtentTranslator;

impl ExtentTranslator {
    /// Returns the sub-extent of `whole` assigned to `piece`, grown by
    /// `ghost_levels` inside `whole`.
    ///
    /// Neighbouring pieces share their boundary points. Returns `None` when
    /// the request is invalid or `whole` cannot be divided into that many
    /// pieces.
    pub fn piece_to_extent(
        piece: u32,
        number_of_pieces: u32,
        ghost_levels: u32,
        whole: &Extent,
        mode: SplitMode,
    ) -> Option<Extent> {
        if number_of_pieces == 0 || piece >= number_of_pieces || whole.is_empty() {
            return None;
        }
        let mut ext = whole.0;
        if !Self::split(piece, number_of_pieces, &mut ext, mode) {
            return None;
        }
        Some(Extent(ext).grow(ghost_levels, whole))
    }

    fn split(mut piece: u32, mut pieces: u32, ext: &mut [i32; 6], mode: SplitMode) -> bool {
        while pieces > 1 {
            let size = [0, 1, 2].map(|a| i64::from(ext[2 * a + 1]) - i64::from(ext[2 * a]));
            let axis = match mode {
                SplitMode::Block => {
                    if size[2] >= size[1] && size[2] >= size[0] && size[2] / 2 >= 1 {
                        Some(2)
                    } else if size[1] >= size[0] && size[1] / 2 >= 1 {
                        Some(1)
                    } else if size[0] / 2 >= 1 {
                        Some(0)
                    } else {
                        None
                    }
                }
                SplitMode::XSlab => (size[0] / 2 >= 1).then_some(0),
                SplitMode::YSlab => (size[1] / 2 >= 1).then_some(1),
                SplitMode::ZSlab => (size[2] / 2 >= 1).then_some(2),
            };

            let Some(axis) = axis else {
                // Nothing left to split: piece 0 keeps the remainder.
                return piece == 0;
            };

            let first_half = pieces / 2;
            let offset = size[axis] * i64::from(first_half) / i64::from(pieces);
            let lo = ext[2 * axis];
            let mid = i32::try_from(i64::from(lo) + offset).unwrap_or(lo);
            if piece < first_half {
                ext[2 * axis + 1] = mid;
                pieces = first_half;
            } else {
                ext[2 * axis] = mid;
                piece -= first_half;
                pieces -= first_half;
            }
        }
        true
    }
}
