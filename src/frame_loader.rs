use crate::{
    frame::{FrameDescriptor, FrameRecord},
    geometry::{DeclaredSpacing, FrameStack, GeometryError},
};

use dicom::core::Tag;
use dicom::object::{FileDicomObject, InMemDicomObject, open_file};
use dicom_dictionary_std::tags;
use rayon::prelude::*;
use std::{fs, path::Path};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("No DICOM objects found")]
    NoObjects,

    #[error("No single-frame objects to build a stack from")]
    NoSingleFrameObjects,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),
}

fn first_item(object: &InMemDicomObject, sequence: Tag) -> Option<&InMemDicomObject> {
    object.element(sequence).ok()?.items()?.first()
}

fn floats<const N: usize>(object: &InMemDicomObject, tag: Tag) -> Option<[f64; N]> {
    let values = object.element(tag).ok()?.to_multi_float64().ok()?;
    values.get(..N)?.try_into().ok()
}

fn float(object: &InMemDicomObject, tag: Tag) -> Option<f64> {
    object.element(tag).ok()?.to_float64().ok()
}

fn uid(object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches(['\0', ' ']);
    (!value.is_empty()).then(|| value.to_string())
}

/// Look an attribute up on the object itself, then in the shared functional
/// group macro `group`, then in the first per-frame functional group.
fn lookup<T>(
    object: &InMemDicomObject,
    group: Tag,
    read: impl Fn(&InMemDicomObject) -> Option<T>,
) -> Option<T> {
    read(object)
        .or_else(|| {
            let shared = first_item(object, tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE)?;
            read(first_item(shared, group)?)
        })
        .or_else(|| {
            let per_frame = first_item(object, tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)?;
            read(first_item(per_frame, group)?)
        })
}

impl FrameRecord for InMemDicomObject {
    /// Objects declaring a frame count without per-frame functional groups
    /// are read as single-frame objects.
    fn number_of_frames(&self) -> Option<u32> {
        self.element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE).ok()?;
        self.element(tags::NUMBER_OF_FRAMES)
            .ok()?
            .to_int::<u32>()
            .ok()
    }

    fn image_position(&self, frame_number: u32) -> Option<[f64; 3]> {
        if frame_number == 0 {
            return floats(self, tags::IMAGE_POSITION_PATIENT);
        }
        let per_frame = self
            .element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
            .ok()?
            .items()?
            .get(frame_number as usize - 1)?;
        floats(
            first_item(per_frame, tags::PLANE_POSITION_SEQUENCE)?,
            tags::IMAGE_POSITION_PATIENT,
        )
    }

    fn image_orientation(&self) -> Option<[f64; 6]> {
        lookup(self, tags::PLANE_ORIENTATION_SEQUENCE, |o| {
            floats(o, tags::IMAGE_ORIENTATION_PATIENT)
        })
    }

    fn pixel_spacing(&self) -> Option<[f64; 2]> {
        lookup(self, tags::PIXEL_MEASURES_SEQUENCE, |o| {
            floats(o, tags::PIXEL_SPACING)
        })
    }

    fn spacing_between_slices(&self) -> Option<f64> {
        lookup(self, tags::PIXEL_MEASURES_SEQUENCE, |o| {
            float(o, tags::SPACING_BETWEEN_SLICES)
        })
    }

    fn slice_thickness(&self) -> Option<f64> {
        lookup(self, tags::PIXEL_MEASURES_SEQUENCE, |o| {
            float(o, tags::SLICE_THICKNESS)
        })
    }

    fn rows(&self) -> Option<u32> {
        self.element(tags::ROWS).ok()?.to_int::<u32>().ok()
    }

    fn columns(&self) -> Option<u32> {
        self.element(tags::COLUMNS).ok()?.to_int::<u32>().ok()
    }

    fn series_uid(&self) -> Option<String> {
        uid(self, tags::SERIES_INSTANCE_UID)
    }

    fn instance_uid(&self) -> Option<String> {
        uid(self, tags::SOP_INSTANCE_UID)
    }

    fn class_uid(&self) -> Option<String> {
        uid(self, tags::SOP_CLASS_UID)
    }
}

pub struct FrameLoader;

impl FrameLoader {
    /// Open DICOM files in parallel, keeping the order of `paths`.
    pub fn load_from_file_paths<P>(
        paths: &[P],
    ) -> Result<Vec<FileDicomObject<InMemDicomObject>>, LoaderError>
    where
        P: AsRef<Path> + Sync,
    {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();
        let objects = objects?;
        info!("Loaded {} DICOM objects", objects.len());
        Ok(objects)
    }

    /// Load every ".dcm" file of a directory, sorted by file name.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
    ) -> Result<Vec<FileDicomObject<InMemDicomObject>>, LoaderError> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(LoaderError::NoObjects);
        }
        paths.sort();

        Self::load_from_file_paths(&paths)
    }

    /// Descriptors of every frame of every object, in object order.
    pub fn descriptors(objects: &[FileDicomObject<InMemDicomObject>]) -> Vec<FrameDescriptor> {
        objects
            .iter()
            .flat_map(|object| FrameDescriptor::all_from_record(&**object))
            .collect()
    }

    /// Reconstruction input from the frames of one multi-frame object.
    pub fn stack_from_object(object: &InMemDicomObject) -> FrameStack {
        FrameStack::from_record(object)
    }

    /// Reconstruction input from all single-frame objects of `objects`.
    /// Declared spacing and dimensions are taken from the first of them.
    ///
    /// # Errors
    ///
    /// Fails when there is no single-frame object or when the objects do not
    /// share one orientation.
    pub fn stack_from_single_frames(
        objects: &[FileDicomObject<InMemDicomObject>],
        orientation_tolerance: f64,
    ) -> Result<FrameStack, LoaderError> {
        let singles: Vec<&InMemDicomObject> = objects
            .iter()
            .map(|object| &**object)
            .filter(|object| object.number_of_frames().is_none())
            .collect();
        let first = singles.first().ok_or(LoaderError::NoSingleFrameObjects)?;
        debug!("Building stack from {} single-frame objects", singles.len());

        let descriptors: Vec<_> = singles
            .iter()
            .map(|object| FrameDescriptor::from_record(*object, 0))
            .collect();

        Ok(
            FrameStack::from_descriptors(&descriptors, orientation_tolerance)?
                .with_declared(DeclaredSpacing::from_record(*first))
                .with_dimensions(first.rows().unwrap_or(0), first.columns().unwrap_or(0)),
        )
    }
}
