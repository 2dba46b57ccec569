//! Error types for the correction core.
//!
//! Per-anchor failures (insufficient candidates, an unaligned pair, a
//! refinement loop that hits its iteration cap, a duplicate flag claim) are
//! not represented here: they are recovered from locally inside the
//! pipeline and never escape as a [`CareError`]. Only conditions that abort
//! an entire build or an entire worker are typed errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CareError {
    /// Requested `k` exceeds the codec's encoding limit, or `num_maps` exceeds 16.
    #[error("index parameters out of range: k={k} (max {k_max}), num_maps={num_maps} (max {num_maps_max})")]
    IndexOverLimit {
        k: usize,
        k_max: usize,
        num_maps: usize,
        num_maps_max: usize,
    },

    /// The build could not fit a single hash map within the given memory budget.
    #[error("memory budget {budget_bytes} bytes too small to build even one hash map")]
    MemoryExhaustedDuringBuild { budget_bytes: usize },

    /// A worker's scratch file write failed; the run-wide abort flag should be raised.
    #[error("scratch write failed for worker {worker}: {source}")]
    IoError {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, CareError>;
