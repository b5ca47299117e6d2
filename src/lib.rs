//! # DICOM-derivation library
//!
//! This crate reconstructs the geometry of a volume from the frames of DICOM
//! objects and tracks which source frames every slice of that volume derives
//! from.
//!
//! This library builds on the dicom-rs ecosystem. Frames are described by
//! their spatial attributes (Image Position and Image Orientation (Patient),
//! pixel measures) either from legacy single-frame objects or from the
//! functional groups of enhanced multi-frame objects. From the frames of one
//! derivation source a [`VolumeGeometry`] is reconstructed:
//!  - Direction from the shared orientation, with the slice normal as the
//!    cross product of row and column direction
//!  - Origin at the frame with minimal distance along the normal
//!  - Slice spacing from the distinct frame positions, reconciled with any
//!    declared spacing (declared spacing wins, disagreements are reported)
//!  - Number of slices from the distance covered by the frames
//!
//!  Candidate frames, possibly from several series, are then assigned to the
//!  slice they project onto. The resulting [`SliceToFrameMap`] is regrouped
//!  by series into a [`DerivationSeriesIndex`], the list of referenced
//!  instances (and frames of multi-frame instances) a derived object has to
//!  record.
//!
//!  Overlapping frames (several frames at one position) are counted but do
//!  not add slices. Frames that do not project into the volume are dropped.
//!
//! # Examples
//!
//! ## Mapping source images onto the slices of a multi-frame object
//!
//! ```no_run
//! # use dicom_derivation::{DerivationConverter, FrameLoader, ReconstructionOptions};
//! let objects = FrameLoader::load_from_directory("dicom")
//!     .expect("should have loaded files from directory");
//! let conversion = DerivationConverter::new(ReconstructionOptions::default())
//!     .convert_objects(&objects[0], &objects[1..])
//!     .expect("should have reconstructed the volume geometry");
//! for series in conversion.series_index.series() {
//!     println!("{}: {} instances", series.series_uid, series.instances.len());
//! }
//! ```

pub mod converter;
pub mod derivation;
pub mod enums;
pub mod frame;
pub mod frame_loader;
pub mod geometry;
pub mod options;
pub mod slice_map;
#[cfg(test)]
mod test_utils;
pub mod volume;

pub use converter::{Conversion, DerivationConverter};
pub use derivation::{
    DerivationReferenceBuilder, DerivationSeriesIndex, InstanceReference, SeriesReference,
};
pub use enums::{FrameKind, ProvenanceMode, SpacingSource};
pub use frame::{FrameDescriptor, FrameKey, FrameRecord};
pub use frame_loader::{FrameLoader, LoaderError};
pub use geometry::{
    DeclaredSpacing, FrameStack, GeometryError, GeometryReconstructor, GeometryWarning,
    Reconstruction, ReconstructionReport, VolumeGeometry,
};
pub use options::ReconstructionOptions;
pub use slice_map::{SliceFrameMapper, SliceMapping, SliceToFrameMap};
pub use volume::{OutputFrame, Volume, VolumeError};
