//! Alignment direction selection: pick forward vs. reverse-complement per
//! candidate, discard the losing direction, and reorient the candidate's
//! encoded sequence to match the winner.

use crate::align::AlignmentRecord;
use crate::codec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    ReverseComplement,
    None,
}

/// Returns the winning direction and its alignment record. `None` means
/// both directions were invalid and the candidate should be dropped.
pub fn select_direction(
    forward: AlignmentRecord,
    reverse_complement: AlignmentRecord,
) -> (Direction, AlignmentRecord) {
    match (forward.valid, reverse_complement.valid) {
        (false, false) => (Direction::None, AlignmentRecord::invalid()),
        (true, false) => (Direction::Forward, forward),
        (false, true) => (Direction::ReverseComplement, reverse_complement),
        (true, true) => {
            let fwd_quality = forward.overlap - forward.n_mismatches;
            let rc_quality = reverse_complement.overlap - reverse_complement.n_mismatches;
            let forward_wins = match fwd_quality.cmp(&rc_quality) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => match forward.overlap.cmp(&reverse_complement.overlap) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => forward.shift > 0 || reverse_complement.shift <= 0,
                },
            };
            if forward_wins {
                (Direction::Forward, forward)
            } else {
                (Direction::ReverseComplement, reverse_complement)
            }
        }
    }
}

/// Rewrite a candidate's packed encoding to match the chosen direction, so
/// downstream code always sees it in anchor orientation.
pub fn reorient(candidate_encoded: &[u32], len: usize, direction: Direction) -> Vec<u32> {
    match direction {
        Direction::ReverseComplement => codec::reverse_complement(candidate_encoded, len),
        _ => candidate_encoded.to_vec(),
    }
}
