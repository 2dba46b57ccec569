//! Consensus-based read correction: turning a refined MSA back into
//! per-read corrections.

use crate::codec;
use crate::msa::{CandidateAlignment, Msa, MsaColumn};

/// The per-column decision that distinguishes correction strategies: given a
/// column's tally and the read's original base, pick the corrected base.
/// Classic / Forest / Print alternatives would differ only in this decision;
/// this crate implements only `Classic`.
pub trait CorrectionStrategy {
    fn decide(&self, column: &MsaColumn, orig_base: u8) -> u8;
}

pub struct Classic;

impl CorrectionStrategy for Classic {
    fn decide(&self, column: &MsaColumn, _orig_base: u8) -> u8 {
        column.consensus
    }
}

/// One edit: replace the base at `pos` with `base` (a decoded ASCII byte).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edit {
    pub pos: u32,
    pub base: u8,
}

pub enum CorrectedPayload {
    Full(Vec<u8>),
    Edits(Vec<Edit>),
}

/// Diff `original` against `corrected` and pick the smaller representation.
/// Edits are only used when the original read has no ambiguous base and the
/// edit count is at most `length / 7`; otherwise the full corrected sequence
/// is stored.
pub fn encode_correction(original: &[u8], corrected: &[u8], original_has_ambiguous: bool) -> CorrectedPayload {
    debug_assert_eq!(original.len(), corrected.len());
    let edits: Vec<Edit> = original
        .iter()
        .zip(corrected.iter())
        .enumerate()
        .filter(|(_, (&o, &c))| o != c)
        .map(|(pos, (_, &c))| Edit { pos: pos as u32, base: c })
        .collect();

    if !original_has_ambiguous && edits.len() <= corrected.len() / 7 {
        CorrectedPayload::Edits(edits)
    } else {
        CorrectedPayload::Full(corrected.to_vec())
    }
}

pub struct AnchorCorrection {
    pub is_hq: bool,
    pub corrected_codes: Vec<u8>,
    pub changed: bool,
    /// Anchor-local positions where the anchor disagreed with consensus but
    /// the neighborhood check didn't clear the position for correction.
    pub uncorrected_no_consensus: Vec<u32>,
}

struct Thresholds {
    avg_support: f32,
    min_support: f32,
    min_coverage: f32,
}

fn thresholds(estimated_error_rate: f32, estimated_coverage: f32, m_coverage: f32) -> Thresholds {
    Thresholds {
        avg_support: 1.0 - estimated_error_rate,
        min_support: 1.0 - 3.0 * estimated_error_rate,
        min_coverage: estimated_coverage * m_coverage / 6.0,
    }
}

/// Anchor correction. `anchor_codes` are the anchor's own 2-bit codes; `msa`
/// must have been built (and, ideally, refined) from the anchor plus its
/// surviving candidates.
pub fn correct_anchor(
    msa: &Msa,
    anchor_codes: &[u8],
    estimated_error_rate: f32,
    estimated_coverage: f32,
    m_coverage: f32,
    neighbor_region_size: usize,
    strategy: &dyn CorrectionStrategy,
) -> AnchorCorrection {
    let anchor_cols = &msa.columns[msa.anchor_columns_begin..msa.anchor_columns_end];
    let n = anchor_cols.len();
    let avg_support: f32 = anchor_cols.iter().map(|c| c.support).sum::<f32>() / n as f32;
    let min_support = anchor_cols.iter().map(|c| c.support).fold(f32::INFINITY, f32::min);
    let min_coverage = anchor_cols.iter().map(|c| c.coverage).min().unwrap_or(0);

    let t = thresholds(estimated_error_rate, estimated_coverage, m_coverage);
    let is_hq = avg_support >= t.avg_support && min_support >= t.min_support && (min_coverage as f32) >= t.min_coverage;

    let mut corrected = anchor_codes.to_vec();
    let mut changed = false;
    let mut uncorrected_no_consensus = Vec::new();

    if is_hq {
        for (i, column) in anchor_cols.iter().enumerate() {
            let base = strategy.decide(column, anchor_codes[i]);
            if base != corrected[i] {
                changed = true;
            }
            corrected[i] = base;
        }
    } else {
        for (i, column) in anchor_cols.iter().enumerate() {
            let orig_base = anchor_codes[i];
            if column.support <= 0.5 || (column.orig_coverage as f32) >= t.min_coverage {
                continue;
            }

            let lo = i.saturating_sub(neighbor_region_size);
            let hi = (i + neighbor_region_size + 1).min(n);
            let window = &anchor_cols[lo..hi];
            let window_avg_support: f32 = window.iter().map(|c| c.support).sum::<f32>() / window.len() as f32;
            let window_min_coverage = window.iter().map(|c| c.coverage).min().unwrap_or(0);

            if window_avg_support >= 1.0 - estimated_error_rate && (window_min_coverage as f32) >= t.min_coverage {
                let base = strategy.decide(column, orig_base);
                if base != corrected[i] {
                    changed = true;
                }
                corrected[i] = base;
            } else if column.consensus != orig_base {
                uncorrected_no_consensus.push(i as u32);
            }
        }
    }

    AnchorCorrection {
        is_hq,
        corrected_codes: corrected,
        changed,
        uncorrected_no_consensus,
    }
}

/// Candidate correction, only attempted when the anchor is HQ and the
/// caller opted in. Returns the corrected sequence in the candidate's
/// *original* orientation, or `None` if the candidate's columns fall outside
/// the anchor span extended by `new_columns_to_correct`.
pub fn correct_candidate(
    msa: &Msa,
    candidate: &CandidateAlignment,
    new_columns_to_correct: i32,
    strategy: &dyn CorrectionStrategy,
) -> Option<Vec<u8>> {
    let cand_col_begin = msa.column_of_global(candidate.shift);
    let cand_col_end = msa.column_of_global(candidate.shift + candidate.length);

    let extended_begin = msa.anchor_columns_begin as i32 - new_columns_to_correct;
    let extended_end = msa.anchor_columns_end as i32 + new_columns_to_correct;

    if (cand_col_begin as i32) < extended_begin || (cand_col_end as i32) > extended_end {
        return None;
    }

    let orig_codes = codec::codes_of(&candidate.encoded, candidate.length as usize);
    let mut codes: Vec<u8> = (cand_col_begin..cand_col_end)
        .enumerate()
        .map(|(j, col)| strategy.decide(&msa.columns[col], orig_codes[j]))
        .collect();

    if candidate.direction == crate::select::Direction::ReverseComplement {
        codes = codec::reverse_complement_codes(&codes);
    }

    Some(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::base_to_code;
    use crate::msa::{build_msa, default_weight};
    use crate::select::Direction;

    fn codes(s: &[u8]) -> Vec<u8> {
        s.iter().map(|&b| base_to_code(b).unwrap()).collect()
    }

    fn make_candidate(seq: &[u8], shift: i32, n_mismatches: i32, overlap: i32) -> CandidateAlignment {
        CandidateAlignment {
            read_id: 0,
            shift,
            length: seq.len() as i32,
            encoded: codec::encode(seq).unwrap(),
            quality: vec![b'I'; seq.len()],
            n_mismatches,
            overlap,
            weight: default_weight(n_mismatches, overlap, 0.1),
            direction: Direction::Forward,
        }
    }

    #[test]
    fn hq_anchor_leaves_correct_sequence_unchanged() {
        let anchor = b"ACGTACGTACGTACGTACGT";
        let anchor_codes = codes(anchor);
        let anchor_qual = vec![b'I'; anchor.len()];
        let cands: Vec<_> = (0..5).map(|_| make_candidate(b"ACGTACGTACGTACGTACGT", 0, 1, 20)).collect();
        let active = vec![true; cands.len()];
        let msa = build_msa(&anchor_codes, &anchor_qual, &cands, &active, false);
        let result = correct_anchor(&msa, &anchor_codes, 0.15, 10.0, 0.6, 3, &Classic);
        assert!(result.is_hq);
        assert!(!result.changed);
        assert_eq!(result.corrected_codes, anchor_codes);
    }

    #[test]
    fn hq_anchor_corrects_to_consensus() {
        let anchor = b"ACGTACGTACGTACGTACGA"; // last base wrong
        let anchor_codes = codes(anchor);
        let anchor_qual = vec![b'I'; anchor.len()];
        let cands: Vec<_> = (0..5).map(|_| make_candidate(b"ACGTACGTACGTACGTACGT", 0, 0, 20)).collect();
        let active = vec![true; cands.len()];
        let msa = build_msa(&anchor_codes, &anchor_qual, &cands, &active, false);
        // 6x coverage caps a single dissenting column's support at 5/6, so
        // the error rate here is higher than a realistic 1% to keep the
        // HQ thresholds reachable at this small scale.
        let result = correct_anchor(&msa, &anchor_codes, 0.15, 10.0, 0.6, 3, &Classic);
        assert!(result.is_hq);
        assert!(result.changed);
        assert_eq!(result.corrected_codes.last(), Some(&base_to_code(b'T').unwrap()));

        let corrected_ascii: Vec<u8> = result.corrected_codes.iter().map(|&c| codec::code_to_base(c)).collect();
        let payload = encode_correction(anchor, &corrected_ascii, false);
        match payload {
            CorrectedPayload::Edits(edits) => {
                assert_eq!(edits, vec![Edit { pos: 19, base: b'T' }]);
            }
            CorrectedPayload::Full(_) => panic!("expected edit encoding for a single-base correction"),
        }
    }

    #[test]
    fn candidate_outside_extended_span_is_dropped() {
        let anchor = b"ACGTACGTACGTACGTACGT";
        let anchor_codes = codes(anchor);
        let anchor_qual = vec![b'I'; anchor.len()];
        let far_candidate = make_candidate(b"ACGTACGTACGTACGTACGT", 100, 0, 20);
        let cands = vec![far_candidate];
        let active = vec![true];
        let msa = build_msa(&anchor_codes, &anchor_qual, &cands, &active, false);
        let out = correct_candidate(&msa, &cands[0], 15, &Classic);
        assert!(out.is_none());
    }

    #[test]
    fn candidate_within_span_is_corrected_and_reoriented() {
        let anchor = b"ACGTACGTACGTACGTACGT";
        let anchor_codes = codes(anchor);
        let anchor_qual = vec![b'I'; anchor.len()];
        let mut cand = make_candidate(b"ACGTACGTACGTACGTACGT", 0, 0, 20);
        cand.direction = Direction::ReverseComplement;
        let cands = vec![cand];
        let active = vec![true];
        let msa = build_msa(&anchor_codes, &anchor_qual, &cands, &active, false);
        let out = correct_candidate(&msa, &cands[0], 15, &Classic).unwrap();
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn edit_encoding_falls_back_to_full_when_ambiguous() {
        let original = b"ACGT";
        let corrected = b"ACGA";
        let payload = encode_correction(original, corrected, true);
        assert!(matches!(payload, CorrectedPayload::Full(_)));
    }

    #[test]
    fn edit_round_trip_reproduces_corrected() {
        let original = b"ACGTACGTAC";
        let corrected = b"ACCTACGTAG";
        let payload = encode_correction(original, corrected, false);
        let mut applied = original.to_vec();
        if let CorrectedPayload::Edits(edits) = payload {
            for e in edits {
                applied[e.pos as usize] = e.base;
            }
        } else {
            panic!("expected edits");
        }
        assert_eq!(applied, corrected);
    }
}
