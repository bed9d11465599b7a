use crate::enums::Orientation;

use ndarray::{Array3, ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct Volume {
    /// Voxels indexed as (k, j, i): slice, row, column.
    pub data: Array3<u16>,
    /// Spacing along (i, j, k).
    pub spacing: (f32, f32, f32),
    /// Position of the first voxel in LPS millimetres.
    pub origin: [f64; 3],
    /// Direction cosines of the i, j and k axes in LPS.
    pub direction: [[f64; 3]; 3],
}

/// Which volume axis (0 = i, 1 = j, 2 = k) runs along each LPS axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LpsOrientation {
    /// `lps_of[c]` is the LPS axis volume axis `c` is closest to.
    lps_of: [usize; 3],
    /// Absolute cosine between volume axis `c` and its LPS axis.
    cosines: [f64; 3],
}

impl LpsOrientation {
    /// Assign each volume axis to a distinct LPS axis, strongest alignment first.
    pub fn from_direction(direction: &[[f64; 3]; 3]) -> Self {
        let mut columns = [0usize, 1, 2];
        let strongest = |c: usize| {
            direction[c]
                .iter()
                .fold(0.0f64, |acc, value| acc.max(value.abs()))
        };
        columns.sort_by(|a, b| strongest(*b).total_cmp(&strongest(*a)));

        let mut taken = [false; 3];
        let mut lps_of = [0usize; 3];
        let mut cosines = [0.0f64; 3];
        for c in columns {
            let best = (0..3)
                .filter(|axis| !taken[*axis])
                .max_by(|a, b| direction[c][*a].abs().total_cmp(&direction[c][*b].abs()))
                .unwrap_or(0);
            taken[best] = true;
            lps_of[c] = best;
            cosines[c] = direction[c][best].abs();
        }
        Self { lps_of, cosines }
    }

    /// Volume axis displayed by `orientation`'s view as its slicing axis.
    pub fn volume_axis(&self, orientation: Orientation) -> usize {
        let lps_axis = orientation.lps_axis();
        self.lps_of
            .iter()
            .position(|axis| *axis == lps_axis)
            .unwrap_or(2)
    }

    /// The view in which the acquired slices are seen face on.
    pub fn primary(&self) -> Orientation {
        Orientation::from_lps_axis(self.lps_of[2]).unwrap_or(Orientation::Axial)
    }

    /// Alignment of the slice stacking axis with its LPS axis.
    pub fn stacking_cosine(&self) -> f64 {
        self.cosines[2]
    }
}

/// Pixel value range of one acquired slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataRange {
    pub min: u16,
    pub max: u16,
}

pub const IDENTITY_DIRECTION: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

impl Volume {
    pub fn new(data: Array3<u16>, spacing: (f32, f32, f32)) -> Self {
        Self {
            data,
            spacing,
            origin: [0.0; 3],
            direction: IDENTITY_DIRECTION,
        }
    }

    pub fn with_geometry(mut self, origin: [f64; 3], direction: [[f64; 3]; 3]) -> Self {
        self.origin = origin;
        self.direction = direction;
        self
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<u16> {
        &mut self.data
    }

    pub fn lps_orientation(&self) -> LpsOrientation {
        LpsOrientation::from_direction(&self.direction)
    }

    /// Number of slices a view of `orientation` can step through.
    pub fn slice_count(&self, orientation: Orientation) -> usize {
        let axis = self.array_axis(orientation);
        self.data.len_of(axis)
    }

    fn array_axis(&self, orientation: Orientation) -> Axis {
        Axis(2 - self.lps_orientation().volume_axis(orientation))
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, u16>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        Some(self.data.index_axis(self.array_axis(orientation), index))
    }

    /// Min and max of every acquired slice, in slice order.
    pub fn slice_ranges(&self) -> Vec<DataRange> {
        self.data
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|slice| {
                let (min, max) = slice
                    .iter()
                    .fold((u16::MAX, u16::MIN), |(min, max), &v| (min.min(v), max.max(v)));
                if min > max {
                    DataRange { min: 0, max: 0 }
                } else {
                    DataRange { min, max }
                }
            })
            .collect()
    }

    fn is_valid_index(&self, index: usize, orientation: Orientation) -> bool {
        index < self.slice_count(orientation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(depth: usize, height: usize, width: usize) -> Array3<u16> {
        Array3::from_shape_fn((depth, height, width), |(k, j, i)| {
            (k * 100 + j * 10 + i) as u16
        })
    }

    #[test]
    fn axial_acquisition_slices_along_depth() {
        let volume = Volume::new(ramp(3, 4, 5), (1.0, 1.0, 2.0));
        assert_eq!(volume.lps_orientation().primary(), Orientation::Axial);
        assert_eq!(volume.slice_count(Orientation::Axial), 3);
        assert_eq!(volume.slice_count(Orientation::Coronal), 4);
        assert_eq!(volume.slice_count(Orientation::Sagittal), 5);

        let slice = volume.get_slice_from_axis(2, Orientation::Axial).unwrap();
        assert_eq!(slice.dim(), (4, 5));
        assert_eq!(slice[[0, 0]], 200);
        assert!(volume.get_slice_from_axis(3, Orientation::Axial).is_none());
    }

    #[test]
    fn coronal_acquisition_is_detected() {
        // rows run along S, slices along P
        let direction = [[1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]];
        let volume = Volume::new(ramp(3, 4, 5), (1.0, 1.0, 1.0)).with_geometry([0.0; 3], direction);
        let lps = volume.lps_orientation();
        assert_eq!(lps.primary(), Orientation::Coronal);
        assert_eq!(volume.slice_count(Orientation::Coronal), 3);
        assert_eq!(volume.slice_count(Orientation::Axial), 4);
    }

    #[test]
    fn slice_ranges_follow_slices() {
        let volume = Volume::new(ramp(2, 2, 2), (1.0, 1.0, 1.0));
        assert_eq!(
            volume.slice_ranges(),
            vec![DataRange { min: 0, max: 11 }, DataRange { min: 100, max: 111 }]
        );
    }
}
