//! Error types for the cloth solver.

use thiserror::Error;

use crate::param::SimulationMode;

/// Errors that can occur while building or running a cloth simulation.
///
/// Topology and resource errors are fatal for [`simulation_init`]: the
/// controller releases whatever it allocated and stays in
/// [`SimulationMode::NotInitialized`].
///
/// [`simulation_init`]: crate::ClothManager::simulation_init
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClothError {
    /// An edge is shared by more than two triangles.
    #[error("non-manifold edge ({v0}, {v1}) has {faces} incident triangles")]
    NonManifoldEdge {
        /// First edge endpoint (global index).
        v0: usize,
        /// Second edge endpoint (global index).
        v1: usize,
        /// Number of incident triangles found.
        faces: usize,
    },

    /// Triangle data is unusable (index out of range, repeated vertex).
    #[error("invalid mesh topology: {0}")]
    InvalidTopology(String),

    /// A neighbor slot expected from the edge list is missing in the one-ring graph.
    #[error("vertex {neighbor} is not in the one-ring of vertex {vertex}")]
    NeighborNotFound {
        /// Row being searched.
        vertex: usize,
        /// Neighbor that was expected.
        neighbor: usize,
    },

    /// A device buffer exceeds the configured element limit.
    #[error("device buffer '{label}' needs {requested} elements, limit: {limit}")]
    BufferTooLarge {
        /// Buffer label.
        label: &'static str,
        /// Requested element count.
        requested: usize,
        /// Maximum element count allowed.
        limit: usize,
    },

    /// Device memory could not be reserved.
    #[error("failed to allocate {requested} elements for device buffer '{label}'")]
    Allocation {
        /// Buffer label.
        label: &'static str,
        /// Requested element count.
        requested: usize,
    },

    /// Host and device array lengths disagree during a transfer.
    #[error("transfer size mismatch for '{label}': device holds {expected}, host has {actual}")]
    TransferSizeMismatch {
        /// Buffer label.
        label: &'static str,
        /// Device element count.
        expected: usize,
        /// Host element count.
        actual: usize,
    },

    /// The requested mode change is not a valid state-machine transition.
    #[error("invalid simulation transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current mode.
        from: SimulationMode,
        /// Requested mode.
        to: SimulationMode,
    },

    /// The operation needs initialized simulation state.
    #[error("simulation is not initialized")]
    NotInitialized,

    /// Simulation parameters failed validation.
    #[error("invalid simulation parameter: {0}")]
    InvalidParam(String),

    /// Body distance field has inconsistent dimensions or spacing.
    #[error("invalid body distance field: {0}")]
    InvalidBodyField(String),

    /// Piece or vertex index out of bounds.
    #[error("index out of bounds: {0}")]
    IndexOutOfBounds(String),

    /// Diagnostic dump could not be written.
    #[error("diagnostic dump failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ClothError {
    /// Create an invalid topology error.
    pub fn invalid_topology(msg: impl Into<String>) -> Self {
        Self::InvalidTopology(msg.into())
    }

    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Create an invalid body field error.
    pub fn invalid_body_field(msg: impl Into<String>) -> Self {
        Self::InvalidBodyField(msg.into())
    }

    /// Create an index out of bounds error.
    pub fn index_out_of_bounds(msg: impl Into<String>) -> Self {
        Self::IndexOutOfBounds(msg.into())
    }

    /// Whether this error comes from mesh connectivity.
    #[must_use]
    pub const fn is_topology(&self) -> bool {
        matches!(
            self,
            Self::NonManifoldEdge { .. } | Self::InvalidTopology(_) | Self::NeighborNotFound { .. }
        )
    }

    /// Whether this error comes from device buffer allocation or transfer.
    #[must_use]
    pub const fn is_resource(&self) -> bool {
        matches!(
            self,
            Self::BufferTooLarge { .. } | Self::Allocation { .. } | Self::TransferSizeMismatch { .. }
        )
    }
}

/// Result type for cloth operations.
pub type Result<T> = std::result::Result<T, ClothError>;
