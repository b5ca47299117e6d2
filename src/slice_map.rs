use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use rayon::prelude::*;
use tracing::debug;

use crate::derivation::DerivationSeriesIndex;
use crate::enums::ProvenanceMode;
use crate::frame::{FrameDescriptor, FrameKey};
use crate::geometry::VolumeGeometry;

/// For each slice of a volume, the source frames projecting onto it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceToFrameMap {
    slices: Vec<BTreeMap<FrameKey, FrameDescriptor>>,
}

impl SliceToFrameMap {
    pub fn with_slices(count: usize) -> Self {
        Self {
            slices: vec![BTreeMap::new(); count],
        }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Add a frame to a slice. Returns false when the slice is out of range
    /// or already holds a frame with the same key.
    pub fn insert(&mut self, slice: usize, frame: FrameDescriptor) -> bool {
        let Some(frames) = self.slices.get_mut(slice) else {
            return false;
        };
        match frames.entry(frame.key()) {
            Entry::Vacant(entry) => {
                entry.insert(frame);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Frames of one slice ordered by key; empty for an out-of-range slice.
    pub fn slice(&self, index: usize) -> impl Iterator<Item = &FrameDescriptor> {
        self.slices
            .get(index)
            .into_iter()
            .flat_map(|frames| frames.values())
    }

    pub fn contains(&self, slice: usize, key: &FrameKey) -> bool {
        self.slices
            .get(slice)
            .is_some_and(|frames| frames.contains_key(key))
    }

    /// Every (slice, frame) pair, slice by slice.
    pub fn frames(&self) -> impl Iterator<Item = (usize, &FrameDescriptor)> {
        self.slices
            .iter()
            .enumerate()
            .flat_map(|(slice, frames)| frames.values().map(move |frame| (slice, frame)))
    }

    pub fn frame_count(&self) -> usize {
        self.slices.iter().map(BTreeMap::len).sum()
    }

    pub fn empty_slices(&self) -> usize {
        self.slices.iter().filter(|frames| frames.is_empty()).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SliceMapping {
    pub slice_map: SliceToFrameMap,
    /// Candidates without a position or projecting outside the volume.
    pub unassigned: Vec<FrameKey>,
    /// Provenance registered while assigning; only in incremental mode.
    pub incremental_index: Option<DerivationSeriesIndex>,
}

pub struct SliceFrameMapper<'a> {
    geometry: &'a VolumeGeometry,
    provenance: ProvenanceMode,
}

impl<'a> SliceFrameMapper<'a> {
    pub fn new(geometry: &'a VolumeGeometry, provenance: ProvenanceMode) -> Self {
        Self {
            geometry,
            provenance,
        }
    }

    /// Assign every candidate to the slice its position projects onto.
    ///
    /// Candidates outside the volume are left out of the map and listed in
    /// [`SliceMapping::unassigned`].
    pub fn map(&self, candidates: &[FrameDescriptor]) -> SliceMapping {
        let projected: Vec<Option<usize>> = candidates
            .par_iter()
            .map(|frame| {
                frame
                    .position
                    .and_then(|position| self.geometry.slice_index_of(&position))
            })
            .collect();

        let mut slice_map = SliceToFrameMap::with_slices(self.geometry.slice_count());
        let mut unassigned = Vec::new();
        let mut incremental_index = match self.provenance {
            ProvenanceMode::Incremental => Some(DerivationSeriesIndex::default()),
            ProvenanceMode::PostPass => None,
        };

        for (frame, slice) in candidates.iter().zip(projected) {
            match slice {
                Some(slice) => {
                    if slice_map.insert(slice, frame.clone()) {
                        if let Some(index) = incremental_index.as_mut() {
                            index.insert_frame(frame);
                        }
                    }
                }
                None => {
                    debug!("Frame {} does not project into the volume", frame.key());
                    unassigned.push(frame.key());
                }
            }
        }

        debug!(
            "Mapped {} of {} frames onto {} slices, {} slices without source",
            slice_map.frame_count(),
            candidates.len(),
            slice_map.len(),
            slice_map.empty_slices()
        );

        SliceMapping {
            slice_map,
            unassigned,
            incremental_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivation::DerivationReferenceBuilder;
    use nalgebra::{Matrix3, Point3, Vector3};

    fn geometry(slices: usize, spacing: f64) -> VolumeGeometry {
        VolumeGeometry::new(
            Point3::new(0.0, 0.0, 10.0),
            Vector3::new(1.0, 1.0, spacing),
            Matrix3::identity(),
            [8, 8, slices],
        )
        .expect("should be a valid geometry")
    }

    fn at(z: f64, series: &str, instance: &str, frame_number: u32) -> FrameDescriptor {
        FrameDescriptor::new(Point3::new(0.0, 0.0, z), series, instance, frame_number)
    }

    #[test]
    fn frame_on_grid_point_lands_in_that_slice_only() {
        let geometry = geometry(4, 2.0);
        let candidates = [at(14.0, "s", "a", 0)];
        let mapping = SliceFrameMapper::new(&geometry, ProvenanceMode::PostPass).map(&candidates);

        let key = candidates[0].key();
        let hits: Vec<usize> = (0..4).filter(|k| mapping.slice_map.contains(*k, &key)).collect();
        assert_eq!(hits, vec![2]);
        assert!(mapping.unassigned.is_empty());
        assert!(mapping.incremental_index.is_none());
    }

    #[test]
    fn frames_outside_the_volume_are_dropped() {
        let geometry = geometry(3, 1.0);
        let mut no_position = at(0.0, "s", "c", 0);
        no_position.position = None;
        let candidates = [at(9.0, "s", "a", 0), at(13.0, "s", "b", 0), no_position];

        let mapping = SliceFrameMapper::new(&geometry, ProvenanceMode::PostPass).map(&candidates);
        assert_eq!(mapping.slice_map.frame_count(), 0);
        assert_eq!(mapping.unassigned.len(), 3);
        assert_eq!(mapping.slice_map.len(), 3);
    }

    #[test]
    fn slices_collect_frames_from_several_series() {
        let geometry = geometry(2, 1.0);
        let candidates = [
            at(10.0, "echo1", "a", 0),
            at(10.2, "echo2", "b", 0),
            at(11.0, "echo1", "c", 0),
        ];
        let mapping = SliceFrameMapper::new(&geometry, ProvenanceMode::PostPass).map(&candidates);

        let slice0: Vec<_> = mapping.slice_map.slice(0).map(|f| f.series_uid.as_str()).collect();
        assert_eq!(slice0, ["echo1", "echo2"]);
        assert_eq!(mapping.slice_map.slice(1).count(), 1);
        assert_eq!(mapping.slice_map.empty_slices(), 0);
    }

    #[test]
    fn frames_are_unique_and_ordered_by_key() {
        let geometry = geometry(1, 1.0);
        let candidates = [
            at(10.0, "s", "2", 1),
            at(10.0, "s", "1", 3),
            at(10.0, "s", "1", 2),
            at(10.0, "s", "2", 1),
        ];
        let mapping = SliceFrameMapper::new(&geometry, ProvenanceMode::PostPass).map(&candidates);

        let keys: Vec<_> = mapping.slice_map.slice(0).map(|f| f.key().to_string()).collect();
        assert_eq!(keys, ["1[2]", "1[3]", "2[1]"]);
    }

    #[test]
    fn incremental_provenance_matches_post_pass() {
        let geometry = geometry(3, 1.0);
        let candidates = [
            at(12.0, "s2", "z", 0),
            at(10.0, "s1", "mf", 1),
            at(11.0, "s1", "mf", 2),
            at(40.0, "s3", "outside", 0),
        ];
        let mapping = SliceFrameMapper::new(&geometry, ProvenanceMode::Incremental).map(&candidates);
        let incremental = mapping
            .incremental_index
            .expect("should register provenance while mapping");
        let post_pass = DerivationReferenceBuilder::build(&mapping.slice_map);

        assert!(incremental.same_references(&post_pass));
        assert!(incremental.get("s3").is_none());
        // registration order follows candidates, the post-pass follows slices
        assert_eq!(incremental.series()[0].series_uid, "s2");
        assert_eq!(post_pass.series()[0].series_uid, "s1");
    }
}
