use dicom::object::{FileDicomObject, InMemDicomObject};
use tracing::info;

use crate::derivation::{DerivationReferenceBuilder, DerivationSeriesIndex};
use crate::frame::{FrameDescriptor, FrameKey};
use crate::frame_loader::{FrameLoader, LoaderError};
use crate::geometry::{
    FrameStack, GeometryError, GeometryReconstructor, Reconstruction, ReconstructionReport,
    VolumeGeometry,
};
use crate::options::ReconstructionOptions;
use crate::slice_map::{SliceFrameMapper, SliceMapping, SliceToFrameMap};

/// Everything one conversion pass produces for a derivation source.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub geometry: VolumeGeometry,
    pub report: ReconstructionReport,
    pub slice_map: SliceToFrameMap,
    pub series_index: DerivationSeriesIndex,
    pub unassigned: Vec<FrameKey>,
}

impl Conversion {
    pub fn requires_derivation(&self) -> bool {
        DerivationReferenceBuilder::requires_derivation(&self.slice_map)
    }
}

#[derive(Debug, Default)]
pub struct DerivationConverter {
    options: ReconstructionOptions,
}

impl DerivationConverter {
    pub fn new(options: ReconstructionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconstructionOptions {
        &self.options
    }

    /// Reconstruct the geometry of `stack`, then map `candidates` onto its
    /// slices and collect their provenance.
    ///
    /// # Errors
    ///
    /// Returns the reconstruction error; nothing is mapped in that case.
    pub fn convert(
        &self,
        stack: &FrameStack,
        candidates: &[FrameDescriptor],
    ) -> Result<Conversion, GeometryError> {
        let Reconstruction { geometry, report } =
            GeometryReconstructor::new(self.options.clone()).reconstruct(stack)?;

        let SliceMapping {
            slice_map,
            unassigned,
            incremental_index,
        } = SliceFrameMapper::new(&geometry, self.options.provenance).map(candidates);

        let series_index = match incremental_index {
            Some(index) => index,
            None => DerivationReferenceBuilder::build(&slice_map),
        };

        info!(
            "Volume of {:?} voxels, {} source frames in {} series, {} unassigned",
            geometry.extent,
            slice_map.frame_count(),
            series_index.len(),
            unassigned.len()
        );

        Ok(Conversion {
            geometry,
            report,
            slice_map,
            series_index,
            unassigned,
        })
    }

    /// Convert with the frames of a multi-frame `source` object as the
    /// geometry and every frame of `candidates` as possible derivation sources.
    pub fn convert_objects(
        &self,
        source: &InMemDicomObject,
        candidates: &[FileDicomObject<InMemDicomObject>],
    ) -> Result<Conversion, LoaderError> {
        let stack = FrameLoader::stack_from_object(source);
        let descriptors = FrameLoader::descriptors(candidates);
        Ok(self.convert(&stack, &descriptors)?)
    }
}
