use serde::{Deserialize, Serialize};

/// Distinguishes frames of legacy single-frame objects from frames of
/// enhanced multi-frame objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Legacy,
    Enhanced,
}

impl FrameKind {
    pub fn of_frame_number(frame_number: u32) -> Self {
        if frame_number == 0 {
            FrameKind::Legacy
        } else {
            FrameKind::Enhanced
        }
    }
}

/// When series/instance provenance is recorded during slice mapping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvenanceMode {
    /// Built from the completed slice map, independent of candidate order.
    #[default]
    PostPass,
    /// Registered as each frame is assigned to a slice, in candidate order.
    Incremental,
}

/// Where the final inter-slice spacing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpacingSource {
    SpacingBetweenSlices,
    SliceThickness,
    Metadata,
    Computed,
    Unit,
}
