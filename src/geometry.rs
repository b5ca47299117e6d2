use std::fmt;

use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::enums::SpacingSource;
use crate::frame::{FrameDescriptor, FrameRecord};
use crate::options::ReconstructionOptions;

/// Tolerance used when validating a geometry handed in by a caller.
const ORTHONORMAL_TOLERANCE: f64 = 1e-4;

pub(crate) fn missing_position(frame: usize) -> GeometryError {
    GeometryError::MissingGeometryAttribute {
        attribute: "ImagePositionPatient",
        frame,
    }
}

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("Missing {attribute} for frame {frame}")]
    MissingGeometryAttribute {
        attribute: &'static str,
        frame: usize,
    },

    #[error("No frames to reconstruct a volume from")]
    NoFrames,

    #[error("Row and column directions are not orthonormal")]
    InvalidOrientation,

    #[error("Orientation of frame {frame} differs from the first frame")]
    InconsistentOrientation { frame: usize },

    #[error("Invalid volume geometry: {0}")]
    InvalidGeometry(&'static str),
}

/// Non-fatal findings of a reconstruction. Processing continues with the
/// value named in each variant's description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeometryWarning {
    /// Declared and computed slice spacing disagree; the declared value is used.
    GeometryInconsistency { declared: f64, computed: f64 },
    /// Slice thickness stood in for a missing spacing between slices.
    SliceThicknessAsSpacing { thickness: f64 },
    /// A gap between consecutive slice positions differs from the computed spacing.
    NonUniformSpacing {
        gap_index: usize,
        gap: f64,
        expected: f64,
    },
    /// No pixel spacing declared; unit in-plane spacing is used.
    PixelSpacingUnavailable,
    /// Slice spacing can be neither computed nor read; unit spacing is used.
    SliceSpacingUnavailable,
    /// A declared slice spacing that is not a finite number was skipped.
    InvalidDeclaredSpacing { source: SpacingSource, value: f64 },
}

impl fmt::Display for GeometryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryWarning::GeometryInconsistency { declared, computed } => write!(
                f,
                "declared slice spacing {declared} differs from computed {computed}, using declared"
            ),
            GeometryWarning::SliceThicknessAsSpacing { thickness } => {
                write!(f, "using slice thickness {thickness} as slice spacing")
            }
            GeometryWarning::NonUniformSpacing {
                gap_index,
                gap,
                expected,
            } => write!(
                f,
                "gap {gap_index} between slice positions is {gap}, expected {expected}"
            ),
            GeometryWarning::PixelSpacingUnavailable => {
                write!(f, "pixel spacing unavailable, using 1.0")
            }
            GeometryWarning::SliceSpacingUnavailable => {
                write!(f, "slice spacing unavailable, using 1.0")
            }
            GeometryWarning::InvalidDeclaredSpacing { source, value } => {
                write!(f, "ignoring invalid declared slice spacing {value} ({source:?})")
            }
        }
    }
}

/// Spacing values declared by the source object itself.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredSpacing {
    /// Row spacing followed by column spacing.
    pub pixel_spacing: Option<[f64; 2]>,
    pub spacing_between_slices: Option<f64>,
    pub slice_thickness: Option<f64>,
}

impl DeclaredSpacing {
    pub fn from_record<R: FrameRecord + ?Sized>(record: &R) -> Self {
        Self {
            pixel_spacing: record.pixel_spacing(),
            spacing_between_slices: record.spacing_between_slices(),
            slice_thickness: record.slice_thickness(),
        }
    }
}

/// Reconstruction input for one derivation source: every frame position in
/// frame order and the single orientation shared by all frames.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameStack {
    pub row_direction: Option<Vector3<f64>>,
    pub column_direction: Option<Vector3<f64>>,
    pub positions: Vec<Option<Point3<f64>>>,
    pub declared: DeclaredSpacing,
    /// 0 when not declared.
    pub rows: u32,
    /// 0 when not declared.
    pub columns: u32,
}

impl FrameStack {
    pub fn new(row: Vector3<f64>, column: Vector3<f64>, positions: Vec<Point3<f64>>) -> Self {
        Self {
            row_direction: Some(row),
            column_direction: Some(column),
            positions: positions.into_iter().map(Some).collect(),
            ..Default::default()
        }
    }

    pub fn with_declared(self, declared: DeclaredSpacing) -> Self {
        Self { declared, ..self }
    }

    pub fn with_dimensions(self, rows: u32, columns: u32) -> Self {
        Self {
            rows,
            columns,
            ..self
        }
    }

    /// Stack of all frames of one record; a single-frame record yields a
    /// stack of one.
    pub fn from_record<R: FrameRecord + ?Sized>(record: &R) -> Self {
        let frame_numbers: Vec<u32> = match record.number_of_frames() {
            Some(count) => (1..=count).collect(),
            None => vec![0],
        };
        let (row_direction, column_direction) = match record.image_orientation() {
            Some(iop) => (
                Some(Vector3::new(iop[0], iop[1], iop[2])),
                Some(Vector3::new(iop[3], iop[4], iop[5])),
            ),
            None => (None, None),
        };

        Self {
            row_direction,
            column_direction,
            positions: frame_numbers
                .into_iter()
                .map(|n| record.image_position(n).map(|[x, y, z]| Point3::new(x, y, z)))
                .collect(),
            declared: DeclaredSpacing::from_record(record),
            rows: record.rows().unwrap_or(0),
            columns: record.columns().unwrap_or(0),
        }
    }

    /// Stack of single-frame descriptors. All of them must carry the same
    /// orientation within `tolerance`.
    pub fn from_descriptors(
        frames: &[FrameDescriptor],
        tolerance: f64,
    ) -> Result<Self, GeometryError> {
        let first = frames.first().ok_or(GeometryError::NoFrames)?;
        let missing = |frame| GeometryError::MissingGeometryAttribute {
            attribute: "ImageOrientationPatient",
            frame,
        };
        let (row, column) = first.orientation().ok_or_else(|| missing(0))?;

        let mut positions = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            let (frame_row, frame_column) = frame.orientation().ok_or_else(|| missing(index))?;
            if (frame_row - row).amax() > tolerance || (frame_column - column).amax() > tolerance {
                return Err(GeometryError::InconsistentOrientation { frame: index });
            }
            positions.push(Some(frame.require_position(index)?));
        }

        Ok(Self {
            row_direction: Some(row),
            column_direction: Some(column),
            positions,
            ..Default::default()
        })
    }
}

/// Physical description of the reconstructed volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeGeometry {
    pub origin: Point3<f64>,
    /// (dx, dy, dz): column spacing, row spacing, slice spacing.
    pub spacing: Vector3<f64>,
    /// Columns are the row direction, the column direction and the slice normal.
    pub direction: Matrix3<f64>,
    /// (nx, ny, nz) voxel counts.
    pub extent: [usize; 3],
}

impl VolumeGeometry {
    pub fn new(
        origin: Point3<f64>,
        spacing: Vector3<f64>,
        direction: Matrix3<f64>,
        extent: [usize; 3],
    ) -> Result<Self, GeometryError> {
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(GeometryError::InvalidGeometry("spacing must be positive"));
        }
        if (direction.transpose() * direction - Matrix3::identity()).amax() > ORTHONORMAL_TOLERANCE
        {
            return Err(GeometryError::InvalidGeometry(
                "direction must be orthonormal",
            ));
        }
        Ok(Self {
            origin,
            spacing,
            direction,
            extent,
        })
    }

    pub fn row_direction(&self) -> Vector3<f64> {
        self.direction.column(0).into_owned()
    }

    pub fn column_direction(&self) -> Vector3<f64> {
        self.direction.column(1).into_owned()
    }

    pub fn normal(&self) -> Vector3<f64> {
        self.direction.column(2).into_owned()
    }

    pub fn slice_count(&self) -> usize {
        self.extent[2]
    }

    /// Continuous (i, j, k) index of a physical point.
    pub fn physical_to_continuous_index(&self, point: &Point3<f64>) -> Vector3<f64> {
        // direction is orthonormal, so its transpose is its inverse
        (self.direction.transpose() * (point - self.origin)).component_div(&self.spacing)
    }

    /// Physical point of a (possibly fractional) index.
    pub fn index_to_physical(&self, index: &Vector3<f64>) -> Point3<f64> {
        self.origin + self.direction * index.component_mul(&self.spacing)
    }

    /// Nearest slice a point projects onto, or `None` outside `[0, nz)`.
    pub fn slice_index_of(&self, point: &Point3<f64>) -> Option<usize> {
        let k = (self.physical_to_continuous_index(point).z + 0.5).floor();
        (k >= 0.0 && k < self.slice_count() as f64).then_some(k as usize)
    }

    /// Physical position of the first voxel of slice `index`.
    pub fn slice_position(&self, index: usize) -> Point3<f64> {
        self.index_to_physical(&Vector3::new(0.0, 0.0, index as f64))
    }
}

/// One distinct frame position and how many frames share it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionBucket {
    pub position: Point3<f64>,
    /// Signed distance from the first frame along the slice normal.
    pub distance: f64,
    pub overlap: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionReport {
    pub total_frames: usize,
    pub positions: Vec<PositionBucket>,
    /// Sorted ascending.
    pub distinct_distances: Vec<f64>,
    /// 0 when fewer than two distinct distances exist.
    pub computed_spacing: f64,
    pub computed_extent: f64,
    pub spacing_source: SpacingSource,
    pub warnings: Vec<GeometryWarning>,
}

impl ReconstructionReport {
    pub fn overlapping_positions(&self) -> usize {
        self.positions.iter().filter(|b| b.overlap > 1).count()
    }

    pub fn has_inconsistency(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, GeometryWarning::GeometryInconsistency { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub geometry: VolumeGeometry,
    pub report: ReconstructionReport,
}

/// Groups positions that lie within `tolerance` of each other.
struct PositionBuckets {
    tolerance: f64,
    buckets: Vec<PositionBucket>,
}

impl PositionBuckets {
    fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            buckets: Vec::new(),
        }
    }

    /// Returns true when the position opened a new bucket.
    fn insert(&mut self, position: Point3<f64>, distance: f64) -> bool {
        let tolerance = self.tolerance;
        match self
            .buckets
            .iter_mut()
            .find(|b| (b.position - position).norm() <= tolerance)
        {
            Some(bucket) => {
                bucket.overlap += 1;
                false
            }
            None => {
                self.buckets.push(PositionBucket {
                    position,
                    distance,
                    overlap: 1,
                });
                true
            }
        }
    }

    fn distinct_distances(&self) -> Vec<f64> {
        let mut distances: Vec<f64> = self.buckets.iter().map(|b| b.distance).collect();
        distances.sort_by(f64::total_cmp);
        distances.dedup_by(|a, b| (*a - *b).abs() <= self.tolerance);
        distances
    }
}

pub struct GeometryReconstructor {
    options: ReconstructionOptions,
}

impl GeometryReconstructor {
    pub fn new(options: ReconstructionOptions) -> Self {
        Self { options }
    }

    /// Reconstruct the volume geometry of one derivation source.
    ///
    /// # Errors
    ///
    /// Fails when the orientation or any frame position is missing, or the
    /// orientation is not orthonormal. Disagreements between declared and
    /// computed spacing are reported as warnings instead.
    pub fn reconstruct(&self, stack: &FrameStack) -> Result<Reconstruction, GeometryError> {
        let (row, column, normal) = self.directions(stack)?;

        let positions = stack
            .positions
            .iter()
            .enumerate()
            .map(|(frame, position)| position.ok_or(missing_position(frame)))
            .collect::<Result<Vec<_>, _>>()?;
        let reference = *positions.first().ok_or(GeometryError::NoFrames)?;

        let mut buckets = PositionBuckets::new(self.options.position_tolerance);
        let mut origin = reference;
        let mut min_distance = 0.0;
        for position in &positions {
            let distance = (position - reference).dot(&normal);
            if buckets.insert(*position, distance) && distance < min_distance {
                min_distance = distance;
                origin = *position;
            }
        }

        let distances = buckets.distinct_distances();
        let (computed_spacing, computed_extent) = match distances.as_slice() {
            [first, second, .., last] => ((first - second).abs(), (first - last).abs()),
            [first, second] => ((first - second).abs(), (first - second).abs()),
            _ => (0.0, 0.0),
        };

        let mut warnings = Vec::new();
        self.check_gaps(&distances, computed_spacing, &mut warnings);
        let (slice_spacing, spacing_source) =
            self.reconcile(&stack.declared, computed_spacing, distances.len(), &mut warnings);
        let usable = |s: f64| s.is_finite() && s > 0.0;
        let (dx, dy) = match stack.declared.pixel_spacing {
            Some([row_spacing, column_spacing]) if usable(row_spacing) && usable(column_spacing) => {
                (column_spacing, row_spacing)
            }
            _ => {
                Self::report(&mut warnings, GeometryWarning::PixelSpacingUnavailable);
                (1.0, 1.0)
            }
        };

        let slices = self.slice_count(computed_extent, slice_spacing)?;
        debug!("computed extent: {computed_extent}/{slice_spacing} -> {slices} slices");

        let report = ReconstructionReport {
            total_frames: positions.len(),
            positions: buckets.buckets,
            distinct_distances: distances,
            computed_spacing,
            computed_extent,
            spacing_source,
            warnings,
        };
        info!(
            "Total frames: {}, with unique position: {}, overlapping: {}, origin: {:?}",
            report.total_frames,
            report.positions.len(),
            report.overlapping_positions(),
            origin
        );

        let geometry = VolumeGeometry::new(
            origin,
            Vector3::new(dx, dy, slice_spacing),
            Matrix3::from_columns(&[row, column, normal]),
            [stack.columns as usize, stack.rows as usize, slices],
        )?;
        Ok(Reconstruction { geometry, report })
    }

    fn directions(
        &self,
        stack: &FrameStack,
    ) -> Result<(Vector3<f64>, Vector3<f64>, Vector3<f64>), GeometryError> {
        let missing = || GeometryError::MissingGeometryAttribute {
            attribute: "ImageOrientationPatient",
            frame: 0,
        };
        let row = stack.row_direction.ok_or_else(missing)?;
        let column = stack.column_direction.ok_or_else(missing)?;

        let tolerance = self.options.orientation_tolerance;
        if (row.norm() - 1.0).abs() > tolerance
            || (column.norm() - 1.0).abs() > tolerance
            || row.dot(&column).abs() > tolerance
        {
            return Err(GeometryError::InvalidOrientation);
        }

        // re-orthonormalize within tolerance, keeping the row direction
        let row = row.normalize();
        let normal = row.cross(&column).normalize();
        let column = normal.cross(&row);
        debug!("Row direction: {row:?}, column direction: {column:?}, normal: {normal:?}");
        Ok((row, column, normal))
    }

    fn check_gaps(&self, distances: &[f64], expected: f64, warnings: &mut Vec<GeometryWarning>) {
        for (gap_index, pair) in distances.windows(2).enumerate() {
            let gap = (pair[1] - pair[0]).abs();
            debug!("Spacing between slice {gap_index} and {}: {gap}", gap_index + 1);
            if (gap - expected).abs() > self.options.spacing_tolerance {
                Self::report(
                    warnings,
                    GeometryWarning::NonUniformSpacing {
                        gap_index,
                        gap,
                        expected,
                    },
                );
            }
        }
    }

    /// Slice spacing declared by metadata or by the record, in that order of
    /// preference. Zero means not declared; NaN and infinite values are
    /// skipped with a warning.
    fn declared_slice_spacing(
        &self,
        declared: &DeclaredSpacing,
        warnings: &mut Vec<GeometryWarning>,
    ) -> Option<(f64, SpacingSource)> {
        let candidates = [
            (self.options.declared_slice_spacing, SpacingSource::Metadata),
            (declared.spacing_between_slices, SpacingSource::SpacingBetweenSlices),
            (declared.slice_thickness, SpacingSource::SliceThickness),
        ];

        for (value, source) in candidates {
            let Some(value) = value.filter(|s| *s != 0.0) else {
                continue;
            };
            if !value.is_finite() {
                Self::report(
                    warnings,
                    GeometryWarning::InvalidDeclaredSpacing { source, value },
                );
                continue;
            }
            if source == SpacingSource::SliceThickness {
                Self::report(
                    warnings,
                    GeometryWarning::SliceThicknessAsSpacing { thickness: value },
                );
            }
            return Some((value.abs(), source));
        }
        None
    }

    /// nz = round(extent / spacing) + 1, bounded by `max_slices`.
    fn slice_count(&self, extent: f64, spacing: f64) -> Result<usize, GeometryError> {
        let too_many = GeometryError::InvalidGeometry("slice count exceeds the configured maximum");
        let steps = (extent / spacing).round();
        if !steps.is_finite() || steps < 0.0 || steps >= self.options.max_slices as f64 {
            return Err(too_many);
        }
        (steps as usize).checked_add(1).ok_or(too_many)
    }

    fn reconcile(
        &self,
        declared: &DeclaredSpacing,
        computed: f64,
        distinct: usize,
        warnings: &mut Vec<GeometryWarning>,
    ) -> (f64, SpacingSource) {
        match self.declared_slice_spacing(declared, warnings) {
            Some((declared, source)) => {
                if distinct > 1 && (declared - computed).abs() > self.options.spacing_tolerance {
                    Self::report(
                        warnings,
                        GeometryWarning::GeometryInconsistency { declared, computed },
                    );
                }
                (declared, source)
            }
            None if distinct > 1 => (computed, SpacingSource::Computed),
            None => {
                Self::report(warnings, GeometryWarning::SliceSpacingUnavailable);
                (1.0, SpacingSource::Unit)
            }
        }
    }

    fn report(warnings: &mut Vec<GeometryWarning>, warning: GeometryWarning) {
        warn!("{warning}");
        warnings.push(warning);
    }
}
