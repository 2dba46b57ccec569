//! Run configuration: the closed set of options that tune candidate search,
//! alignment, and correction.

use crate::error::CareError;
use crate::index::{MAX_K, MAX_MAPS};

#[derive(Clone, Debug)]
pub struct Config {
    pub k: usize,
    pub num_maps: usize,
    /// `0` means auto-estimate: `mean + 2.5 * stddev` over a deterministic
    /// sample of the first `N / 10` reads.
    pub max_candidates_per_anchor: usize,
    pub min_overlap: i32,
    pub min_overlap_ratio: f32,
    pub max_error_rate: f32,
    pub estimated_coverage: f32,
    pub estimated_error_rate: f32,
    pub m_coverage: f32,
    pub use_quality_scores: bool,
    pub correct_candidates: bool,
    pub exclude_ambiguous_reads: bool,
    pub new_columns_to_correct: i32,
    pub neighbor_region_size: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub stripe_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            k: 16,
            num_maps: 4,
            max_candidates_per_anchor: 0,
            min_overlap: 30,
            min_overlap_ratio: 0.5,
            max_error_rate: 0.1,
            estimated_coverage: 30.0,
            estimated_error_rate: 0.01,
            m_coverage: 0.6,
            use_quality_scores: true,
            correct_candidates: true,
            exclude_ambiguous_reads: true,
            new_columns_to_correct: 15,
            neighbor_region_size: 3,
            batch_size: 1000,
            num_workers: 1,
            stripe_count: 256,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), CareError> {
        if self.k == 0 || self.k > MAX_K {
            return Err(CareError::InvalidConfig(format!("k must be in 1..={MAX_K}, got {}", self.k)));
        }
        if self.num_maps == 0 || self.num_maps > MAX_MAPS {
            return Err(CareError::InvalidConfig(format!(
                "num_maps must be in 1..={MAX_MAPS}, got {}",
                self.num_maps
            )));
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(CareError::InvalidConfig(format!(
                "max_error_rate must be in [0, 1], got {}",
                self.max_error_rate
            )));
        }
        if self.estimated_coverage <= 0.0 {
            return Err(CareError::InvalidConfig("estimated_coverage must be positive".into()));
        }
        if self.num_workers == 0 {
            return Err(CareError::InvalidConfig("num_workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(CareError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.stripe_count == 0 {
            return Err(CareError::InvalidConfig("stripe_count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Deterministic auto-estimate for `max_candidates_per_anchor` when the
/// config asks for `0`: `mean + 2.5 * stddev` of per-read candidate counts
/// over the first `N / 10` reads. The sample is the prefix of the read set
/// so that estimation never depends on thread scheduling.
pub fn auto_estimate_max_candidates(sample_counts: &[usize]) -> usize {
    if sample_counts.is_empty() {
        return usize::MAX;
    }
    let n = sample_counts.len() as f64;
    let mean = sample_counts.iter().sum::<usize>() as f64 / n;
    let variance = sample_counts.iter().map(|&c| (c as f64 - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    (mean + 2.5 * stddev).round().max(0.0) as usize
}
