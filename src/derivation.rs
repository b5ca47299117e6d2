use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::enums::FrameKind;
use crate::frame::FrameDescriptor;
use crate::slice_map::SliceToFrameMap;

/// A referenced instance and, for multi-frame instances, the referenced frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceReference {
    pub instance_uid: String,
    pub class_uid: String,
    /// Distinct frame numbers in first-seen order; empty for single-frame instances.
    pub frame_numbers: Vec<u32>,
}

impl InstanceReference {
    fn new(frame: &FrameDescriptor) -> Self {
        let mut reference = Self {
            instance_uid: frame.instance_uid.clone(),
            class_uid: frame.class_uid.clone(),
            frame_numbers: Vec::new(),
        };
        reference.add_frame(frame);
        reference
    }

    /// Legacy frames reference the whole instance and add no frame number.
    fn add_frame(&mut self, frame: &FrameDescriptor) {
        if frame.kind() == FrameKind::Enhanced && !self.frame_numbers.contains(&frame.frame_number)
        {
            self.frame_numbers.push(frame.frame_number);
        }
    }
}

/// All referenced instances of one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesReference {
    pub series_uid: String,
    pub instances: Vec<InstanceReference>,
}

impl SeriesReference {
    pub fn instance(&self, instance_uid: &str) -> Option<&InstanceReference> {
        self.instances
            .iter()
            .find(|instance| instance.instance_uid == instance_uid)
    }
}

/// Referenced series in order of first encounter, each with its distinct
/// instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationSeriesIndex {
    series: Vec<SeriesReference>,
}

impl DerivationSeriesIndex {
    pub fn insert_frame(&mut self, frame: &FrameDescriptor) {
        let series = match self
            .series
            .iter()
            .position(|series| series.series_uid == frame.series_uid)
        {
            Some(position) => &mut self.series[position],
            None => {
                self.series.push(SeriesReference {
                    series_uid: frame.series_uid.clone(),
                    instances: Vec::new(),
                });
                let last = self.series.len() - 1;
                &mut self.series[last]
            }
        };

        match series
            .instances
            .iter_mut()
            .find(|instance| instance.instance_uid == frame.instance_uid)
        {
            Some(instance) => instance.add_frame(frame),
            None => series.instances.push(InstanceReference::new(frame)),
        }
    }

    pub fn series(&self) -> &[SeriesReference] {
        &self.series
    }

    pub fn get(&self, series_uid: &str) -> Option<&SeriesReference> {
        self.series.iter().find(|series| series.series_uid == series_uid)
    }

    pub fn contains(&self, series_uid: &str, instance_uid: &str) -> bool {
        self.get(series_uid)
            .is_some_and(|series| series.instance(instance_uid).is_some())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn instance_count(&self) -> usize {
        self.series.iter().map(|series| series.instances.len()).sum()
    }

    /// Same series, instances and frame numbers, regardless of order.
    pub fn same_references(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.instance_count() == other.instance_count()
            && self.series.iter().all(|series| {
                series.instances.iter().all(|instance| {
                    other
                        .get(&series.series_uid)
                        .and_then(|s| s.instance(&instance.instance_uid))
                        .is_some_and(|o| {
                            o.frame_numbers.len() == instance.frame_numbers.len()
                                && instance
                                    .frame_numbers
                                    .iter()
                                    .all(|n| o.frame_numbers.contains(n))
                        })
                })
            })
    }
}

pub struct DerivationReferenceBuilder;

impl DerivationReferenceBuilder {
    /// Group every frame of the map by series, walking slices in order.
    pub fn build(slice_map: &SliceToFrameMap) -> DerivationSeriesIndex {
        let mut index = DerivationSeriesIndex::default();
        for (_, frame) in slice_map.frames() {
            index.insert_frame(frame);
        }
        debug!(
            "Derivation references: {} series, {} instances",
            index.len(),
            index.instance_count()
        );
        index
    }

    /// Sources of one output slice, frames of the same instance collapsed
    /// into a single reference.
    pub fn slice_sources(slice_map: &SliceToFrameMap, slice: usize) -> Vec<InstanceReference> {
        let mut sources: Vec<InstanceReference> = Vec::new();
        for frame in slice_map.slice(slice) {
            match sources
                .iter_mut()
                .find(|source| source.instance_uid == frame.instance_uid)
            {
                Some(source) => source.add_frame(frame),
                None => sources.push(InstanceReference::new(frame)),
            }
        }
        sources
    }

    /// Whether any output slice has a derivation source.
    pub fn requires_derivation(slice_map: &SliceToFrameMap) -> bool {
        slice_map.frame_count() > 0
    }
}
