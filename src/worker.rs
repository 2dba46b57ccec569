//! Worker pool and the per-anchor pipeline it drives.
//!
//! Scheduling is OS threads, one per worker, via [`std::thread::scope`] — no
//! async runtime, no cooperative yields. The only shared mutable state on
//! the hot path is the anchor-id cursor, the flag bitmap, and (briefly) the
//! abort flag; each worker's scratch file is touched by that worker alone.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::align::align_bitpar;
use crate::codec;
use crate::config::Config;
use crate::correct::{correct_anchor, correct_candidate, encode_correction, Classic};
use crate::error::CareError;
use crate::filter::filter_by_mismatch_ratio;
use crate::flags::CorrectionFlags;
use crate::index::Index;
use crate::msa::{build_msa, default_weight, refine_msa, CandidateAlignment};
use crate::select::{select_direction, Direction};
use crate::store::ReadStore;
use crate::writer::{RecordKind, ScratchWriter};

/// One scratch file per worker, opened up front so that the scope below
/// only ever borrows disjoint elements.
pub struct WorkerWriters {
    files: Vec<File>,
}

impl WorkerWriters {
    pub fn create_in_dir(dir: &Path, num_workers: usize) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let files = (0..num_workers)
            .map(|i| File::create(dir.join(format!("worker-{i}.scratch"))))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { files })
    }
}

/// Run the full correction pass. Blocks until every anchor has been
/// claimed and processed (or the run aborts on an IO error).
pub fn correct_reads(index: &Index, reads: &ReadStore, config: &Config, out: &mut WorkerWriters) -> Result<(), CareError> {
    config.validate()?;

    let effective_max_candidates = if config.max_candidates_per_anchor != 0 {
        config.max_candidates_per_anchor
    } else {
        estimate_max_candidates(index, reads, config)
    };

    let flags = CorrectionFlags::new(reads.num_reads());
    let cursor = AtomicU32::new(0);
    let abort = AtomicBool::new(false);
    let n = reads.num_reads() as u32;

    assert_eq!(out.files.len(), config.num_workers, "one scratch file per worker is required");

    tracing::info!(num_workers = config.num_workers, num_reads = n, effective_max_candidates, "worker pool starting");

    let result: Result<(), CareError> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.num_workers);
        for (worker_id, file) in out.files.iter_mut().enumerate() {
            let flags = &flags;
            let cursor = &cursor;
            let abort = &abort;
            handles.push(scope.spawn(move || -> Result<(), CareError> {
                let _worker_span = tracing::info_span!("worker", worker_id).entered();
                let mut writer = ScratchWriter::new(BufWriter::new(file));
                loop {
                    if abort.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    let start = cursor.fetch_add(config.batch_size as u32, Ordering::Relaxed);
                    if start >= n {
                        return Ok(());
                    }
                    let end = (start + config.batch_size as u32).min(n);
                    for id in start..end {
                        process_anchor(id, index, reads, config, flags, effective_max_candidates, &mut writer).map_err(
                            |source| CareError::IoError { worker: worker_id, source },
                        )?;
                    }
                    writer.flush().map_err(|source| CareError::IoError { worker: worker_id, source })?;
                }
            }));
        }

        let mut first_err = None;
        for handle in handles {
            match handle.join().expect("worker thread panicked") {
                Ok(()) => {}
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    tracing::info!(ok = result.is_ok(), "worker pool finished");
    result
}

/// Deterministic auto-estimate sample: the first `N / 10` reads, in id
/// order.
fn estimate_max_candidates(index: &Index, reads: &ReadStore, config: &Config) -> usize {
    let sample_size = reads.num_reads() / 10;
    let noise_cutoff = (2.5 * config.estimated_coverage).ceil() as usize;
    let sample_counts: Vec<usize> = (0..sample_size as u32)
        .map(|id| {
            let codes = codec::codes_of(reads.encoded(id), reads.length(id) as usize);
            index.query(&codes, id, noise_cutoff, None).len()
        })
        .collect();
    crate::config::auto_estimate_max_candidates(&sample_counts)
}

/// An anchor with no usable candidates is still emitted, unchanged and
/// marked non-HQ, rather than silently dropped from the scratch file.
fn write_uncorrected_anchor<W: Write>(id: u32, reads: &ReadStore, anchor_len: usize, writer: &mut ScratchWriter<W>) -> io::Result<()> {
    let original = codec::decode(reads.encoded(id), anchor_len);
    let payload = encode_correction(&original, &original, reads.contains_n(id));
    writer.write_record(id, RecordKind::Anchor, false, &payload, None)
}

/// Run the whole per-anchor pipeline (index query through correction) for
/// one anchor id and append whatever records it produces to `writer`.
fn process_anchor<W: Write>(
    id: u32,
    index: &Index,
    reads: &ReadStore,
    config: &Config,
    flags: &CorrectionFlags,
    max_candidates: usize,
    writer: &mut ScratchWriter<W>,
) -> io::Result<()> {
    let _anchor_span = tracing::trace_span!("anchor", id).entered();

    if !flags.try_claim_anchor(id) {
        tracing::trace!(id, "duplicate flag claim, skipping");
        return Ok(());
    }
    if config.exclude_ambiguous_reads && reads.contains_n(id) {
        return Ok(());
    }

    let anchor_len = reads.length(id) as usize;
    let anchor_codes = codec::codes_of(reads.encoded(id), anchor_len);
    let anchor_qual = reads.quality(id);

    let noise_cutoff = (2.5 * config.estimated_coverage).ceil() as usize;
    let mut hits = index.query(&anchor_codes, id, noise_cutoff, None);
    if config.exclude_ambiguous_reads {
        hits.retain(|&c| !reads.contains_n(c));
    }
    hits.truncate(max_candidates);
    tracing::trace!(id, num_hits = hits.len(), "minhash candidates found");

    if hits.is_empty() {
        tracing::debug!(id, "insufficient candidates after minhash, emitting anchor uncorrected");
        return write_uncorrected_anchor(id, reads, anchor_len, writer);
    }

    let mut candidates = Vec::with_capacity(hits.len());
    let mut records = Vec::with_capacity(hits.len());

    for &cid in &hits {
        let c_len = reads.length(cid) as usize;
        let c_codes = codec::codes_of(reads.encoded(cid), c_len);
        let rc_codes = codec::reverse_complement_codes(&c_codes);

        let fwd = align_bitpar(&anchor_codes, &c_codes, config.min_overlap, config.min_overlap_ratio, config.max_error_rate);
        let rc = align_bitpar(&anchor_codes, &rc_codes, config.min_overlap, config.min_overlap_ratio, config.max_error_rate);
        let (direction, rec) = select_direction(fwd, rc);
        if direction == Direction::None {
            continue;
        }

        let (reoriented_codes, reoriented_qual): (Vec<u8>, Vec<u8>) = match direction {
            Direction::ReverseComplement => {
                let q: Vec<u8> = reads.quality(cid).iter().rev().copied().collect();
                (rc_codes, q)
            }
            _ => (c_codes, reads.quality(cid).to_vec()),
        };

        let weight = default_weight(rec.n_mismatches, rec.overlap, config.max_error_rate);
        candidates.push(CandidateAlignment {
            read_id: cid,
            shift: rec.shift,
            length: c_len as i32,
            encoded: codec::encode_codes(&reoriented_codes),
            quality: reoriented_qual,
            n_mismatches: rec.n_mismatches,
            overlap: rec.overlap,
            weight,
            direction,
        });
        records.push(rec);
    }

    if candidates.is_empty() {
        tracing::debug!(id, "no candidate aligned in either direction, emitting anchor uncorrected");
        return write_uncorrected_anchor(id, reads, anchor_len, writer);
    }

    let Some(surviving) = filter_by_mismatch_ratio(&records, config.estimated_error_rate, config.estimated_coverage, config.m_coverage)
    else {
        tracing::debug!(id, "mismatch-ratio filter reached no coverage target, emitting anchor uncorrected");
        return write_uncorrected_anchor(id, reads, anchor_len, writer);
    };

    let candidates: Vec<CandidateAlignment> = surviving.into_iter().map(|i| candidates[i].clone()).collect();
    let active = vec![true; candidates.len()];

    let msa = build_msa(&anchor_codes, anchor_qual, &candidates, &active, config.use_quality_scores);
    let refined = refine_msa(
        msa,
        &anchor_codes,
        anchor_qual,
        &candidates,
        config.estimated_coverage,
        config.use_quality_scores,
    );

    let result = correct_anchor(
        &refined,
        &anchor_codes,
        config.estimated_error_rate,
        config.estimated_coverage,
        config.m_coverage,
        config.neighbor_region_size,
        &Classic,
    );

    tracing::trace!(id, is_hq = result.is_hq, changed = result.changed, num_candidates = candidates.len(), "anchor corrected");

    let original_ascii = codec::decode(reads.encoded(id), anchor_len);
    let corrected_ascii: Vec<u8> = result.corrected_codes.iter().map(|&c| codec::code_to_base(c)).collect();
    let payload = encode_correction(&original_ascii, &corrected_ascii, reads.contains_n(id));
    writer.write_record(id, RecordKind::Anchor, result.is_hq, &payload, None)?;

    if result.is_hq {
        flags.try_set_hq(id);
    }

    if result.is_hq && config.correct_candidates {
        for (i, cand) in candidates.iter().enumerate() {
            if !refined.candidates_active[i] {
                continue;
            }
            if flags.is_hq(cand.read_id) {
                continue;
            }
            if !flags.try_claim_anchor(cand.read_id) {
                continue;
            }
            let Some(codes) = correct_candidate(&refined, cand, config.new_columns_to_correct, &Classic) else {
                continue;
            };
            let ascii: Vec<u8> = codes.iter().map(|&c| codec::code_to_base(c)).collect();
            let orig_ascii = codec::decode(reads.encoded(cand.read_id), cand.length as usize);
            let payload = encode_correction(&orig_ascii, &ascii, reads.contains_n(cand.read_id));
            writer.write_record(cand.read_id, RecordKind::Candidate, false, &payload, Some(cand.shift))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::read_record;

    fn store_of(seqs: &[&[u8]]) -> ReadStore {
        let quals: Vec<Vec<u8>> = seqs.iter().map(|s| vec![b'I'; s.len()]).collect();
        let qual_refs: Vec<&[u8]> = quals.iter().map(|v| v.as_slice()).collect();
        ReadStore::build(seqs, &qual_refs)
    }

    // A handful of reads can't reach realistic coverage, so a single
    // dissenting column caps support at 5/6: the thresholds below are
    // loosened (relative to Config::default) to match that scale rather
    // than a 1% real-world error rate.
    fn test_config() -> Config {
        Config {
            k: 5,
            num_maps: 3,
            min_overlap: 10,
            max_error_rate: 0.3,
            estimated_coverage: 10.0,
            estimated_error_rate: 0.15,
            m_coverage: 0.5,
            use_quality_scores: false,
            ..Config::default()
        }
    }

    #[test]
    fn anchor_with_no_candidates_is_emitted_uncorrected() {
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTACGTACGTACGT"];
        let store = store_of(&seqs);
        let index = crate::index::build_index(&store, 5, 3, 1 << 20).unwrap();
        let config = test_config();
        let flags = CorrectionFlags::new(store.num_reads());
        let mut buf: Vec<u8> = Vec::new();
        let mut writer = ScratchWriter::new(&mut buf);
        process_anchor(0, &index, &store, &config, &flags, 100, &mut writer).unwrap();
        let rec = read_record(&mut &buf[..]).unwrap();
        assert_eq!(rec.id, 0);
        assert!(!rec.is_hq);
    }

    #[test]
    fn hq_anchor_corrects_single_error() {
        let seqs: Vec<&[u8]> = vec![
            b"ACGTACGTACGTACGTACGA", // anchor, last base wrong
            b"ACGTACGTACGTACGTACGT",
            b"ACGTACGTACGTACGTACGT",
            b"ACGTACGTACGTACGTACGT",
            b"ACGTACGTACGTACGTACGT",
            b"ACGTACGTACGTACGTACGT",
        ];
        let store = store_of(&seqs);
        let index = crate::index::build_index(&store, 5, 3, 1 << 20).unwrap();
        let config = test_config();
        let flags = CorrectionFlags::new(store.num_reads());
        let mut buf: Vec<u8> = Vec::new();
        let mut writer = ScratchWriter::new(&mut buf);
        process_anchor(0, &index, &store, &config, &flags, 100, &mut writer).unwrap();
        let rec = read_record(&mut &buf[..]).unwrap();
        assert!(rec.is_hq);
    }

    #[test]
    fn already_claimed_anchor_is_skipped() {
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTACGTACGTACGT"];
        let store = store_of(&seqs);
        let index = crate::index::build_index(&store, 5, 3, 1 << 20).unwrap();
        let config = test_config();
        let flags = CorrectionFlags::new(store.num_reads());
        flags.try_claim_anchor(0);
        let mut buf: Vec<u8> = Vec::new();
        let mut writer = ScratchWriter::new(&mut buf);
        process_anchor(0, &index, &store, &config, &flags, 100, &mut writer).unwrap();
        assert!(buf.is_empty());
    }
}
