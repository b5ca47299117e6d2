use serde::{Deserialize, Serialize};

use crate::enums::ProvenanceMode;

/// Tunables for one conversion pass.
///
/// Tolerances are in physical units (millimetres for patient coordinates)
/// except `orientation_tolerance`, which applies to unit direction vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionOptions {
    /// Maximum tolerated difference between declared and computed slice spacing.
    pub spacing_tolerance: f64,
    /// Positions closer than this are treated as the same slice position.
    pub position_tolerance: f64,
    /// Allowed deviation from unit length / orthogonality of the orientation.
    pub orientation_tolerance: f64,
    pub provenance: ProvenanceMode,
    /// Slice spacing declared by descriptive metadata. Overrides the record's
    /// own pixel measures when set and nonzero.
    pub declared_slice_spacing: Option<f64>,
    /// Upper bound on the number of reconstructed slices.
    pub max_slices: usize,
}

impl Default for ReconstructionOptions {
    fn default() -> Self {
        Self {
            spacing_tolerance: 1e-5,
            position_tolerance: 1e-4,
            orientation_tolerance: 1e-4,
            provenance: ProvenanceMode::default(),
            declared_slice_spacing: None,
            max_slices: 100_000,
        }
    }
}

impl ReconstructionOptions {
    pub fn with_spacing_tolerance(self, spacing_tolerance: f64) -> Self {
        Self {
            spacing_tolerance,
            ..self
        }
    }

    pub fn with_position_tolerance(self, position_tolerance: f64) -> Self {
        Self {
            position_tolerance,
            ..self
        }
    }

    pub fn with_orientation_tolerance(self, orientation_tolerance: f64) -> Self {
        Self {
            orientation_tolerance,
            ..self
        }
    }

    pub fn with_provenance(self, provenance: ProvenanceMode) -> Self {
        Self { provenance, ..self }
    }

    pub fn with_declared_slice_spacing(self, spacing: f64) -> Self {
        Self {
            declared_slice_spacing: Some(spacing),
            ..self
        }
    }

    pub fn with_max_slices(self, max_slices: usize) -> Self {
        Self { max_slices, ..self }
    }
}
