use std::fmt;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::enums::FrameKind;
use crate::geometry::{GeometryError, missing_position};

/// Read-only attribute interface of a source object.
///
/// Frame number 0 addresses the object itself (legacy single-frame objects);
/// frame numbers from 1 address the frames of a multi-frame object.
pub trait FrameRecord {
    /// Present only for multi-frame objects.
    fn number_of_frames(&self) -> Option<u32>;
    fn image_position(&self, frame_number: u32) -> Option<[f64; 3]>;
    /// Row direction followed by column direction.
    fn image_orientation(&self) -> Option<[f64; 6]>;
    /// Row spacing followed by column spacing.
    fn pixel_spacing(&self) -> Option<[f64; 2]>;
    fn spacing_between_slices(&self) -> Option<f64>;
    fn slice_thickness(&self) -> Option<f64>;
    fn rows(&self) -> Option<u32>;
    fn columns(&self) -> Option<u32>;
    fn series_uid(&self) -> Option<String>;
    fn instance_uid(&self) -> Option<String>;
    fn class_uid(&self) -> Option<String>;
}

/// Identity of a frame: owning instance plus frame number.
///
/// Ordering is lexicographic, instance UID first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameKey {
    pub instance_uid: String,
    pub frame_number: u32,
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frame_number == 0 {
            write!(f, "{}", self.instance_uid)
        } else {
            write!(f, "{}[{}]", self.instance_uid, self.frame_number)
        }
    }
}

/// Normalized spatial attributes and identifiers of one source frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    /// Physical position of the top-left pixel.
    pub position: Option<Point3<f64>>,
    pub row_direction: Option<Vector3<f64>>,
    pub column_direction: Option<Vector3<f64>>,
    /// 0 for single-frame objects, 1-based for multi-frame objects.
    pub frame_number: u32,
    pub series_uid: String,
    pub instance_uid: String,
    pub class_uid: String,
}

impl FrameDescriptor {
    pub fn new(
        position: Point3<f64>,
        series_uid: impl Into<String>,
        instance_uid: impl Into<String>,
        frame_number: u32,
    ) -> Self {
        Self {
            position: Some(position),
            row_direction: None,
            column_direction: None,
            frame_number,
            series_uid: series_uid.into(),
            instance_uid: instance_uid.into(),
            class_uid: String::new(),
        }
    }

    pub fn with_orientation(self, row: Vector3<f64>, column: Vector3<f64>) -> Self {
        Self {
            row_direction: Some(row),
            column_direction: Some(column),
            ..self
        }
    }

    pub fn with_class_uid(self, class_uid: impl Into<String>) -> Self {
        Self {
            class_uid: class_uid.into(),
            ..self
        }
    }

    /// Extract one frame of a record. Missing identifiers become empty strings.
    pub fn from_record<R: FrameRecord + ?Sized>(record: &R, frame_number: u32) -> Self {
        let (row_direction, column_direction) = match record.image_orientation() {
            Some(iop) => (
                Some(Vector3::new(iop[0], iop[1], iop[2])),
                Some(Vector3::new(iop[3], iop[4], iop[5])),
            ),
            None => (None, None),
        };

        Self {
            position: record
                .image_position(frame_number)
                .map(|[x, y, z]| Point3::new(x, y, z)),
            row_direction,
            column_direction,
            frame_number,
            series_uid: record.series_uid().unwrap_or_default(),
            instance_uid: record.instance_uid().unwrap_or_default(),
            class_uid: record.class_uid().unwrap_or_default(),
        }
    }

    /// One descriptor per frame of the record.
    pub fn all_from_record<R: FrameRecord + ?Sized>(record: &R) -> Vec<Self> {
        match record.number_of_frames() {
            Some(count) => (1..=count)
                .map(|frame_number| Self::from_record(record, frame_number))
                .collect(),
            None => vec![Self::from_record(record, 0)],
        }
    }

    pub fn key(&self) -> FrameKey {
        FrameKey {
            instance_uid: self.instance_uid.clone(),
            frame_number: self.frame_number,
        }
    }

    pub fn kind(&self) -> FrameKind {
        FrameKind::of_frame_number(self.frame_number)
    }

    pub fn orientation(&self) -> Option<(Vector3<f64>, Vector3<f64>)> {
        Some((self.row_direction?, self.column_direction?))
    }

    /// Position for geometry computations; `index` identifies the frame in errors.
    pub fn require_position(&self, index: usize) -> Result<Point3<f64>, GeometryError> {
        self.position.ok_or_else(|| missing_position(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnhancedRecord;

    impl FrameRecord for EnhancedRecord {
        fn number_of_frames(&self) -> Option<u32> {
            Some(3)
        }
        fn image_position(&self, frame_number: u32) -> Option<[f64; 3]> {
            (frame_number > 0).then(|| [0.0, 0.0, frame_number as f64 * 2.0])
        }
        fn image_orientation(&self) -> Option<[f64; 6]> {
            Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0])
        }
        fn pixel_spacing(&self) -> Option<[f64; 2]> {
            None
        }
        fn spacing_between_slices(&self) -> Option<f64> {
            None
        }
        fn slice_thickness(&self) -> Option<f64> {
            None
        }
        fn rows(&self) -> Option<u32> {
            None
        }
        fn columns(&self) -> Option<u32> {
            None
        }
        fn series_uid(&self) -> Option<String> {
            Some("1.2.3".into())
        }
        fn instance_uid(&self) -> Option<String> {
            Some("1.2.3.4".into())
        }
        fn class_uid(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn multiframe_record_yields_one_descriptor_per_frame() {
        let frames = FrameDescriptor::all_from_record(&EnhancedRecord);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].frame_number, 1);
        assert_eq!(frames[2].position, Some(Point3::new(0.0, 0.0, 6.0)));
        assert!(frames.iter().all(|f| f.kind() == FrameKind::Enhanced));
        assert!(frames.iter().all(|f| f.orientation().is_some()));
        assert_eq!(frames[1].class_uid, "");
    }

    #[test]
    fn frame_keys_order_lexicographically() {
        let a = FrameKey {
            instance_uid: "1.2.1".into(),
            frame_number: 5,
        };
        let b = FrameKey {
            instance_uid: "1.2.2".into(),
            frame_number: 1,
        };
        let c = FrameKey {
            instance_uid: "1.2.2".into(),
            frame_number: 2,
        };
        assert!(a < b);
        assert!(b < c);
        assert_ne!(a, b);
    }

    #[test]
    fn missing_position_is_reported_for_geometry() {
        let mut frame = FrameDescriptor::new(Point3::origin(), "s", "i", 0);
        frame.position = None;
        assert!(matches!(
            frame.require_position(7),
            Err(GeometryError::MissingGeometryAttribute { frame: 7, .. })
        ));
    }
}
