//! Weighted MSA construction and iterative refinement.

use crate::codec;
use crate::quality::quality_weight;
use crate::select::Direction;

/// One surviving candidate's alignment, already reoriented into anchor
/// orientation. `weight` is the per-read `default_weight`, computed once
/// from the alignment's mismatch/overlap ratio.
#[derive(Clone)]
pub struct CandidateAlignment {
    pub read_id: u32,
    pub shift: i32,
    pub length: i32,
    pub encoded: Vec<u32>,
    pub quality: Vec<u8>,
    pub n_mismatches: i32,
    pub overlap: i32,
    pub weight: f32,
    pub direction: Direction,
}

/// `default_weight = 1 - sqrt(n_mismatches / (overlap * max_error_rate))`,
/// clamped to `[0, 1]`. Negative-under-the-root (more mismatches than the
/// error budget allows) is a conscious clamp-to-zero.
pub fn default_weight(n_mismatches: i32, overlap: i32, max_error_rate: f32) -> f32 {
    let denom = overlap as f32 * max_error_rate;
    if denom <= 0.0 {
        return if n_mismatches == 0 { 1.0 } else { 0.0 };
    }
    let ratio = n_mismatches as f32 / denom;
    (1.0 - ratio.sqrt()).clamp(0.0, 1.0)
}

#[derive(Clone, Copy, Default)]
pub struct MsaColumn {
    pub counts: [i32; 4],
    pub weights: [f32; 4],
    pub coverage: i32,
    pub consensus: u8,
    pub support: f32,
    pub orig_weight: f32,
    pub orig_coverage: i32,
}

pub struct Msa {
    pub n_columns: usize,
    pub anchor_columns_begin: usize,
    pub anchor_columns_end: usize,
    pub columns: Vec<MsaColumn>,
    pub candidates_active: Vec<bool>,
}

impl Msa {
    #[inline]
    fn left(&self) -> i32 {
        -(self.anchor_columns_begin as i32)
    }

    #[inline]
    pub fn column_of_global(&self, pos: i32) -> usize {
        (pos - self.left()) as usize
    }
}

/// Build (or rebuild) an MSA from the anchor plus whichever candidates have
/// `active[i] == true`.
pub fn build_msa(
    anchor_codes: &[u8],
    anchor_qual: &[u8],
    candidates: &[CandidateAlignment],
    active: &[bool],
    use_quality: bool,
) -> Msa {
    let len_a = anchor_codes.len() as i32;

    let min_shift = candidates
        .iter()
        .zip(active)
        .filter(|(_, &a)| a)
        .map(|(c, _)| c.shift)
        .fold(0, i32::min);
    let max_end = candidates
        .iter()
        .zip(active)
        .filter(|(_, &a)| a)
        .map(|(c, _)| c.shift + c.length)
        .fold(len_a, i32::max);

    let left = min_shift;
    let right = max_end;
    let n_columns = (right - left) as usize;
    let anchor_columns_begin = (-left) as usize;
    let anchor_columns_end = anchor_columns_begin + len_a as usize;

    let mut columns = vec![MsaColumn::default(); n_columns];

    for (i, &code) in anchor_codes.iter().enumerate() {
        let col = anchor_columns_begin + i;
        let q_w = if use_quality { quality_weight(anchor_qual[i]) } else { 1.0 };
        columns[col].counts[code as usize] += 1;
        columns[col].weights[code as usize] += q_w;
        columns[col].coverage += 1;
    }

    for (cand, &is_active) in candidates.iter().zip(active) {
        if !is_active {
            continue;
        }
        let codes = codec::codes_of(&cand.encoded, cand.length as usize);
        for (j, &code) in codes.iter().enumerate() {
            let global = cand.shift + j as i32;
            let col = (global - left) as usize;
            let q_w = if use_quality { quality_weight(cand.quality[j]) } else { 1.0 };
            columns[col].counts[code as usize] += 1;
            columns[col].weights[code as usize] += cand.weight * q_w;
            columns[col].coverage += 1;
        }
    }

    for col in columns.iter_mut() {
        let sum: f32 = col.weights.iter().sum();
        let mut best_code = 0usize;
        let mut best_weight = col.weights[0];
        for code in 1..4 {
            if col.weights[code] > best_weight {
                best_weight = col.weights[code];
                best_code = code;
            }
        }
        col.consensus = best_code as u8;
        col.support = if sum > 0.0 { best_weight / sum } else { 0.0 };
    }

    for (i, &code) in anchor_codes.iter().enumerate() {
        let col = anchor_columns_begin + i;
        columns[col].orig_weight = columns[col].weights[code as usize];
        columns[col].orig_coverage = columns[col].counts[code as usize];
    }

    Msa {
        n_columns,
        anchor_columns_begin,
        anchor_columns_end,
        columns,
        candidates_active: active.to_vec(),
    }
}

/// Iteratively drop candidates belonging to the "wrong side" of a
/// significant minority variant and rebuild, up to 5 iterations.
/// Returns the final MSA; `candidates_active` reflects every exclusion
/// applied across every iteration (monotonically non-increasing, property 5).
pub fn refine_msa(
    mut msa: Msa,
    anchor_codes: &[u8],
    anchor_qual: &[u8],
    candidates: &[CandidateAlignment],
    dataset_coverage: f32,
    use_quality: bool,
) -> Msa {
    const MAX_ITERATIONS: usize = 5;

    if anchor_matches_consensus_everywhere(&msa, anchor_codes) {
        return msa;
    }

    for _ in 0..MAX_ITERATIONS {
        let Some((variant_col, variant_base)) = find_significant_variant(&msa, dataset_coverage) else {
            break;
        };

        let anchor_global = variant_col as i32 + msa.left();
        let anchor_base = anchor_codes[anchor_global as usize];

        let mut to_drop = Vec::new();
        for (i, cand) in candidates.iter().enumerate() {
            if !msa.candidates_active[i] {
                continue;
            }
            let global = variant_col as i32 + msa.left();
            if global < cand.shift || global >= cand.shift + cand.length {
                continue;
            }
            let pos = (global - cand.shift) as usize;
            let codes = codec::codes_of(&cand.encoded, cand.length as usize);
            let cand_base = codes[pos];

            let drop = if anchor_base == variant_base {
                cand_base != variant_base
            } else {
                cand_base == variant_base
            };
            if drop {
                to_drop.push(i);
            }
        }

        if to_drop.is_empty() {
            break;
        }
        if to_drop.iter().any(|&i| candidates[i].weight >= 0.9) {
            break;
        }

        for &i in &to_drop {
            msa.candidates_active[i] = false;
        }
        msa = build_msa(anchor_codes, anchor_qual, candidates, &msa.candidates_active, use_quality);
    }

    msa
}

/// `true` iff the anchor's own base already equals the column consensus at
/// every anchor column. When this holds, minimization is skipped entirely:
/// there is no minority variant to resolve against the anchor's own reading,
/// so `support`/`coverage` stay whatever the unrefined pool produced.
fn anchor_matches_consensus_everywhere(msa: &Msa, anchor_codes: &[u8]) -> bool {
    (msa.anchor_columns_begin..msa.anchor_columns_end)
        .all(|col| msa.columns[col].consensus == anchor_codes[col - msa.anchor_columns_begin])
}

/// Scan anchor columns for the first column where some non-consensus base
/// reaches `0.3 * dataset_coverage`. Returns the column index and the
/// variant base code (highest count among qualifying non-consensus bases,
/// ties broken by smallest code).
fn find_significant_variant(msa: &Msa, dataset_coverage: f32) -> Option<(usize, u8)> {
    let threshold = 0.3 * dataset_coverage;
    for col in msa.anchor_columns_begin..msa.anchor_columns_end {
        let column = &msa.columns[col];
        let mut best: Option<(i32, u8)> = None;
        for code in 0..4u8 {
            if code == column.consensus {
                continue;
            }
            let count = column.counts[code as usize];
            if (count as f32) >= threshold {
                match best {
                    Some((best_count, _)) if count <= best_count => {}
                    _ => best = Some((count, code)),
                }
            }
        }
        if let Some((_, base)) = best {
            return Some((col, base));
        }
    }
    None
}
