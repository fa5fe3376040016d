//! Structured image data and the published data object.

use glam::DVec3;

use crate::extent::Extent;

/// Point scalars on a regular grid covering `extent`.
///
/// Scalars are stored x-fastest, then y, then z, with `components` values
/// per point.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    extent: Extent,
    origin: DVec3,
    spacing: DVec3,
    components: usize,
    scalars: Vec<f64>,
}

impl ImageData {
    /// Creates zero-filled data over `extent`.
    pub fn new(extent: Extent, components: usize) -> Self {
        let components = components.max(1);
        Self {
            extent,
            origin: DVec3::ZERO,
            spacing: DVec3::ONE,
            components,
            scalars: vec![0.0; extent.number_of_points() * components],
        }
    }

    /// Creates data over `extent` filled by `f(i, j, k)` for a single component.
    pub fn from_fn(extent: Extent, mut f: impl FnMut(i32, i32, i32) -> f64) -> Self {
        let mut image = Self::new(extent, 1);
        if extent.is_empty() {
            return image;
        }
        let [x0, x1, y0, y1, z0, z1] = extent.0;
        let mut n = 0;
        for k in z0..=z1 {
            for j in y0..=y1 {
                for i in x0..=x1 {
                    image.scalars[n] = f(i, j, k);
                    n += 1;
                }
            }
        }
        image
    }

    /// Sets the grid geometry.
    #[must_use]
    pub fn with_geometry(mut self, origin: DVec3, spacing: DVec3) -> Self {
        self.origin = origin;
        self.spacing = spacing;
        self
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn spacing(&self) -> DVec3 {
        self.spacing
    }

    pub fn number_of_components(&self) -> usize {
        self.components
    }

    pub fn number_of_points(&self) -> usize {
        self.extent.number_of_points()
    }

    /// Raw scalar storage.
    pub fn scalars(&self) -> &[f64] {
        &self.scalars
    }

    /// Mutable raw scalar storage.
    pub fn scalars_mut(&mut self) -> &mut [f64] {
        &mut self.scalars
    }

    fn offset(&self, i: i32, j: i32, k: i32, c: usize) -> Option<usize> {
        if c >= self.components || !self.extent.contains_point(i, j, k) {
            return None;
        }
        let [nx, ny, _] = self.extent.dimensions();
        let [x0, _, y0, _, z0, _] = self.extent.0;
        let di = usize::try_from(i - x0).ok()?;
        let dj = usize::try_from(j - y0).ok()?;
        let dk = usize::try_from(k - z0).ok()?;
        Some(((dk * ny + dj) * nx + di) * self.components + c)
    }

    /// Value of component `c` at point `(i, j, k)`, or `None` outside the extent.
    pub fn value(&self, i: i32, j: i32, k: i32, c: usize) -> Option<f64> {
        self.offset(i, j, k, c).map(|n| self.scalars[n])
    }

    /// Writes component `c` at point `(i, j, k)`. Returns false outside the extent.
    pub fn set_value(&mut self, i: i32, j: i32, k: i32, c: usize, value: f64) -> bool {
        match self.offset(i, j, k, c) {
            Some(n) => {
                self.scalars[n] = value;
                true
            }
            None => false,
        }
    }

    /// World position of point `(i, j, k)`.
    pub fn point(&self, i: i32, j: i32, k: i32) -> DVec3 {
        self.origin + self.spacing * DVec3::new(f64::from(i), f64::from(j), f64::from(k))
    }

    /// Copies the overlap of `self` and `extent` into new data.
    pub fn crop(&self, extent: &Extent) -> ImageData {
        let target = self.extent.intersection(extent);
        let mut out =
            ImageData::new(target, self.components).with_geometry(self.origin, self.spacing);
        out.copy_region_from(self);
        out
    }

    /// Copies every point of `source` that falls inside `self`.
    ///
    /// Returns the number of points copied.
    pub fn copy_region_from(&mut self, source: &ImageData) -> usize {
        let overlap = self.extent.intersection(&source.extent);
        if overlap.is_empty() {
            return 0;
        }
        let components = self.components.min(source.components);
        let [x0, x1, y0, y1, z0, z1] = overlap.0;
        let mut copied = 0;
        for k in z0..=z1 {
            for j in y0..=y1 {
                for i in x0..=x1 {
                    for c in 0..components {
                        if let (Some(src), Some(dst)) =
                            (source.offset(i, j, k, c), self.offset(i, j, k, c))
                        {
                            self.scalars[dst] = source.scalars[src];
                        }
                    }
                    copied += 1;
                }
            }
        }
        copied
    }

    /// Smallest and largest scalar value, or `None` when empty.
    pub fn scalar_range(&self) -> Option<(f64, f64)> {
        self.scalars.iter().fold(None, |range, &v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Describes what a published data object actually holds.
#[derive(Debug, Clone, PartialEq)]
pub struct DataInformation {
    pub extent: Extent,
    pub piece: u32,
    pub number_of_pieces: u32,
    pub ghost_levels: u32,
    pub time_step: Option<f64>,
}

impl Default for DataInformation {
    fn default() -> Self {
        Self {
            extent: Extent::EMPTY,
            piece: 0,
            number_of_pieces: 1,
            ghost_levels: 0,
            time_step: None,
        }
    }
}

/// Data published on an output port.
///
/// Published objects are shared through `Arc` and never mutated; an
/// algorithm that changes data produces a new object.
#[derive(Debug, Clone, PartialEq)]
pub struct DataObject {
    image: ImageData,
    info: DataInformation,
}

impl DataObject {
    /// Wraps `image`, taking the data extent from it.
    pub fn new(image: ImageData) -> Self {
        let info = DataInformation {
            extent: image.extent(),
            ..DataInformation::default()
        };
        Self { image, info }
    }

    pub fn with_information(image: ImageData, info: DataInformation) -> Self {
        Self { image, info }
    }

    pub fn image(&self) -> &ImageData {
        &self.image
    }

    pub fn information(&self) -> &DataInformation {
        &self.info
    }

    pub fn extent(&self) -> Extent {
        self.info.extent
    }

    pub fn time_step(&self) -> Option<f64> {
        self.info.time_step
    }

    pub fn into_image(self) -> ImageData {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(extent: Extent) -> ImageData {
        ImageData::from_fn(extent, |i, j, k| f64::from(i + 10 * j + 100 * k))
    }

    #[test]
    fn test_value_indexing() {
        let image = ramp(Extent::new(2, 4, 1, 3, 0, 1));
        assert_eq!(image.number_of_points(), 18);
        assert_eq!(image.value(3, 2, 1, 0), Some(123.0));
        assert_eq!(image.value(5, 2, 1, 0), None);
        assert_eq!(image.value(3, 2, 1, 1), None);
    }

    #[test]
    fn test_set_value() {
        let mut image = ImageData::new(Extent::new(0, 1, 0, 1, 0, 0), 2);
        assert!(image.set_value(1, 1, 0, 1, 7.5));
        assert!(!image.set_value(2, 1, 0, 0, 1.0));
        assert_eq!(image.value(1, 1, 0, 1), Some(7.5));
        assert_eq!(image.value(1, 1, 0, 0), Some(0.0));
    }

    #[test]
    fn test_crop() {
        let image = ramp(Extent::new(0, 9, 0, 9, 0, 0));
        let cropped = image.crop(&Extent::new(2, 3, 5, 20, 0, 0));
        assert_eq!(cropped.extent(), Extent::new(2, 3, 5, 9, 0, 0));
        assert_eq!(cropped.value(3, 7, 0, 0), Some(73.0));
    }

    #[test]
    fn test_copy_region() {
        let source = ramp(Extent::new(0, 4, 0, 0, 0, 0));
        let mut target = ImageData::new(Extent::new(3, 8, 0, 0, 0, 0), 1);
        assert_eq!(target.copy_region_from(&source), 2);
        assert_eq!(target.value(4, 0, 0, 0), Some(4.0));
        assert_eq!(target.value(5, 0, 0, 0), Some(0.0));
    }

    #[test]
    fn test_point_geometry() {
        let image = ImageData::new(Extent::new(0, 1, 0, 1, 0, 0), 1)
            .with_geometry(DVec3::new(1.0, 0.0, 0.0), DVec3::splat(0.5));
        assert_eq!(image.point(1, 1, 0), DVec3::new(1.5, 0.5, 0.0));
    }

    #[test]
    fn test_data_object_info() {
        let object = DataObject::new(ramp(Extent::new(0, 2, 0, 0, 0, 0)));
        assert_eq!(object.extent(), Extent::new(0, 2, 0, 0, 0, 0));
        assert_eq!(object.information().number_of_pieces, 1);
        assert_eq!(object.image().scalar_range(), Some((0.0, 2.0)));
    }
}
