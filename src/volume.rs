use crate::derivation::{DerivationReferenceBuilder, InstanceReference};
use crate::frame::{FrameDescriptor, FrameKey};
use crate::geometry::VolumeGeometry;
use crate::slice_map::SliceToFrameMap;

use nalgebra::Point3;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Array3, ArrayView2, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Volume data shape {actual:?} does not match geometry extent {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Frame {frame} has shape {actual:?}, expected {expected:?}")]
    FrameShape {
        frame: FrameKey,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Frame {0} does not project into the volume")]
    FrameOutsideVolume(FrameKey),
}

/// One frame to emit for a slice of the volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFrame {
    pub slice_index: usize,
    /// 1-based value within the frame position dimension.
    pub dimension_index_value: usize,
    /// Physical position of the frame's top-left pixel.
    pub position: Point3<f64>,
    pub derivation: Vec<InstanceReference>,
}

#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f32>,
    pub geometry: VolumeGeometry,
}

impl Volume {
    /// `data` is indexed (slice, row, column) and must match the extent.
    pub fn new(data: Array3<f32>, geometry: VolumeGeometry) -> Result<Self, VolumeError> {
        let [nx, ny, nz] = geometry.extent;
        let expected = (nz, ny, nx);
        if data.dim() != expected {
            return Err(VolumeError::ShapeMismatch {
                expected,
                actual: data.dim(),
            });
        }
        Ok(Self { data, geometry })
    }

    /// Assemble a volume from decoded frames, each placed at the slice its
    /// position projects onto. Slices without a frame stay zero.
    pub fn from_frames(
        geometry: VolumeGeometry,
        frames: &[(FrameDescriptor, Array2<f32>)],
    ) -> Result<Self, VolumeError> {
        let [nx, ny, nz] = geometry.extent;
        let mut data = Array3::<f32>::zeros((nz, ny, nx));

        for (frame, image) in frames {
            let index = frame
                .position
                .and_then(|position| geometry.slice_index_of(&position))
                .ok_or_else(|| VolumeError::FrameOutsideVolume(frame.key()))?;
            if image.dim() != (ny, nx) {
                return Err(VolumeError::FrameShape {
                    frame: frame.key(),
                    expected: (ny, nx),
                    actual: image.dim(),
                });
            }
            debug!("Frame {} -> slice {index}", frame.key());
            data.slice_mut(s![index, .., ..]).assign(image);
        }

        Ok(Self { data, geometry })
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        (index < self.dim().0).then(|| self.data.slice(s![index, .., ..]))
    }

    /// One output frame per slice, with the slice's derivation sources when
    /// a slice map is given.
    pub fn frame_plan(&self, slice_map: Option<&SliceToFrameMap>) -> Vec<OutputFrame> {
        (0..self.geometry.slice_count())
            .map(|slice_index| OutputFrame {
                slice_index,
                dimension_index_value: slice_index + 1,
                position: self.geometry.slice_position(slice_index),
                derivation: slice_map
                    .map(|map| DerivationReferenceBuilder::slice_sources(map, slice_index))
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Smallest and largest voxel value; `None` for an empty volume.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        if self.data.is_empty() {
            return None;
        }
        Some(
            self.data
                .par_iter()
                .fold(
                    || (f32::INFINITY, f32::NEG_INFINITY),
                    |(min, max), &v| (min.min(v), max.max(v)),
                )
                .reduce(
                    || (f32::INFINITY, f32::NEG_INFINITY),
                    |a, b| (a.0.min(b.0), a.1.max(b.1)),
                ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::ProvenanceMode;
    use crate::slice_map::SliceFrameMapper;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix3, Vector3};

    fn geometry() -> VolumeGeometry {
        VolumeGeometry::new(
            Point3::new(-5.0, -5.0, 20.0),
            Vector3::new(0.5, 0.5, 2.0),
            Matrix3::identity(),
            [3, 2, 4],
        )
        .expect("should be a valid geometry")
    }

    fn frame(z: f64, instance: &str) -> FrameDescriptor {
        FrameDescriptor::new(Point3::new(-5.0, -5.0, z), "1.2.3", instance, 0)
    }

    #[test]
    fn data_must_match_extent() {
        assert!(Volume::new(Array3::zeros((4, 2, 3)), geometry()).is_ok());
        assert!(matches!(
            Volume::new(Array3::zeros((3, 2, 4)), geometry()),
            Err(VolumeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn frames_are_placed_by_position() {
        let frames = vec![
            (frame(26.0, "c"), Array2::from_elem((2, 3), 3.0)),
            (frame(20.0, "a"), Array2::from_elem((2, 3), -1.0)),
        ];
        let volume = Volume::from_frames(geometry(), &frames).expect("should assemble volume");
        assert_eq!(volume.dim(), (4, 2, 3));
        assert_eq!(volume.data[[3, 1, 2]], 3.0);
        assert_eq!(volume.data[[0, 0, 0]], -1.0);
        assert_eq!(volume.data[[1, 0, 0]], 0.0);
        assert_eq!(volume.value_range(), Some((-1.0, 3.0)));
        assert!(volume.slice(4).is_none());
        assert_eq!(volume.slice(3).map(|s| s.dim()), Some((2, 3)));
    }

    #[test]
    fn frames_outside_or_misshapen_are_rejected() {
        let outside = vec![(frame(40.0, "x"), Array2::zeros((2, 3)))];
        assert!(matches!(
            Volume::from_frames(geometry(), &outside),
            Err(VolumeError::FrameOutsideVolume(_))
        ));
        let misshapen = vec![(frame(22.0, "y"), Array2::zeros((3, 3)))];
        assert!(matches!(
            Volume::from_frames(geometry(), &misshapen),
            Err(VolumeError::FrameShape { .. })
        ));
    }

    #[test]
    fn frame_plan_carries_positions_and_sources() {
        let volume = Volume::new(Array3::zeros((4, 2, 3)), geometry()).expect("should build volume");
        let geometry = volume.geometry.clone();
        let candidates = [frame(22.0, "b"), frame(22.1, "b2"), frame(26.0, "d")];
        let mapping = SliceFrameMapper::new(&geometry, ProvenanceMode::PostPass).map(&candidates);

        let plan = volume.frame_plan(Some(&mapping.slice_map));
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[2].dimension_index_value, 3);
        assert_abs_diff_eq!(plan[2].position.z, 24.0, epsilon = 1e-12);
        assert_eq!(plan[1].derivation.len(), 2);
        assert!(plan[0].derivation.is_empty());
        assert!(volume.frame_plan(None).iter().all(|f| f.derivation.is_empty()));
    }
}
