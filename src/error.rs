//! Error types for the simulation boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised when building contexts, tracks and vehicles.
///
/// The physics step itself never fails; these only come out of the
/// operations a host calls to set a simulation up or query it.
#[derive(Debug, Error)]
pub enum SimError {
    /// A track or config file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A track or config file is not valid JSON for its format.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The point list is empty or has an odd number of points.
    #[error("Track has no segments ({points} control points)")]
    EmptyTrack {
        /// Number of control points that were supplied.
        points: usize,
    },

    /// A vehicle was requested but no track is loaded.
    #[error("No track loaded")]
    NoTrack,

    /// The vehicle id does not belong to this simulation.
    #[error("Unknown vehicle id {0}")]
    UnknownVehicle(u32),
}

/// Result type for simulation boundary operations.
pub type SimResult<T> = std::result::Result<T, SimError>;
