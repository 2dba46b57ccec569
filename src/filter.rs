//! Mismatch-ratio filter: an adaptive threshold on alignment mismatch ratio,
//! chosen so the surviving candidate count reaches a coverage target.

use crate::align::AlignmentRecord;

/// Candidates (by index into the caller's arrays) that pass the filter, or
/// `None` if no multiplier reaches the coverage target (anchor left
/// uncorrected).
pub fn filter_by_mismatch_ratio(
    records: &[AlignmentRecord],
    estimated_error_rate: f32,
    estimated_coverage: f32,
    m_coverage: f32,
) -> Option<Vec<usize>> {
    let target = (estimated_coverage * m_coverage).ceil() as usize;
    let base = estimated_error_rate;

    for multiplier in [2.0f32, 3.0, 4.0] {
        let threshold = multiplier * base;
        let bucket: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.valid && r.overlap > 0 && (r.n_mismatches as f32 / r.overlap as f32) < threshold)
            .map(|(i, _)| i)
            .collect();
        if bucket.len() >= target {
            return Some(bucket);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(overlap: i32, mismatches: i32) -> AlignmentRecord {
        AlignmentRecord {
            shift: 0,
            overlap,
            n_mismatches: mismatches,
            score: mismatches,
            valid: true,
        }
    }

    #[test]
    fn picks_smallest_multiplier_reaching_target() {
        // base=0.01, target=5: 5 candidates at ratio 0.015 (< 2*base fails, < 3*base passes)
        let records: Vec<_> = (0..5).map(|_| rec(100, 2)).collect(); // ratio 0.02
        let result = filter_by_mismatch_ratio(&records, 0.01, 5.0, 1.0).unwrap();
        assert_eq!(result.len(), 5);
    }

    #[test]
    fn discards_all_when_target_unreachable() {
        let records: Vec<_> = (0..2).map(|_| rec(100, 50)).collect(); // ratio 0.5, way above 4*base
        let result = filter_by_mismatch_ratio(&records, 0.01, 10.0, 1.0);
        assert!(result.is_none());
    }

    #[test]
    fn invalid_records_never_survive() {
        let mut records: Vec<_> = (0..5).map(|_| rec(100, 1)).collect();
        records[0].valid = false;
        let result = filter_by_mismatch_ratio(&records, 0.01, 5.0, 1.0).unwrap();
        assert!(!result.contains(&0));
    }
}
