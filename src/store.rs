//! Random-access read storage.
//!
//! Sequences are kept 2-bit packed; qualities are kept as raw Phred+33
//! bytes. Everything is read-only after [`ReadStore::build`]; there is no
//! per-call allocation on any accessor.

use crate::codec;

pub struct ReadStore {
    lengths: Vec<u32>,
    offsets: Vec<u32>, // word offset into `encoded` per read, len N+1
    encoded: Vec<u32>,
    qual_offsets: Vec<u32>, // byte offset into `qualities` per read, len N+1
    qualities: Vec<u8>,
    contains_n: Vec<bool>,
}

impl ReadStore {
    /// Build from parallel slices of ASCII sequence and quality strings.
    /// A sequence containing a base outside `{A,C,G,T}` is recorded as
    /// `contains_n` and stored with ambiguous bases coerced to `A` so that
    /// the packed representation stays well-formed; callers should gate on
    /// `contains_n` rather than relying on the packed value.
    pub fn build(sequences: &[&[u8]], qualities: &[&[u8]]) -> Self {
        assert_eq!(sequences.len(), qualities.len());
        let n = sequences.len();
        let mut lengths = Vec::with_capacity(n);
        let mut offsets = Vec::with_capacity(n + 1);
        let mut encoded = Vec::new();
        let mut qual_offsets = Vec::with_capacity(n + 1);
        let mut quals = Vec::new();
        let mut contains_n = Vec::with_capacity(n);

        offsets.push(0);
        qual_offsets.push(0);
        for (seq, qual) in sequences.iter().zip(qualities.iter()) {
            assert_eq!(seq.len(), qual.len(), "sequence/quality length mismatch");
            lengths.push(seq.len() as u32);
            let has_n = seq.iter().any(|&b| codec::base_to_code(b).is_none());
            contains_n.push(has_n);
            let packed = if has_n {
                let cleaned: Vec<u8> = seq
                    .iter()
                    .map(|&b| if codec::base_to_code(b).is_some() { b } else { b'A' })
                    .collect();
                codec::encode(&cleaned).expect("cleaned sequence is always encodable")
            } else {
                codec::encode(seq).expect("validated sequence is always encodable")
            };
            encoded.extend_from_slice(&packed);
            offsets.push(encoded.len() as u32);
            quals.extend_from_slice(qual);
            qual_offsets.push(quals.len() as u32);
        }

        Self {
            lengths,
            offsets,
            encoded,
            qual_offsets,
            qualities: quals,
            contains_n,
        }
    }

    pub fn num_reads(&self) -> usize {
        self.lengths.len()
    }

    #[inline]
    pub fn length(&self, id: u32) -> u32 {
        self.lengths[id as usize]
    }

    #[inline]
    pub fn contains_n(&self, id: u32) -> bool {
        self.contains_n[id as usize]
    }

    #[inline]
    pub fn encoded(&self, id: u32) -> &[u32] {
        let i = id as usize;
        &self.encoded[self.offsets[i] as usize..self.offsets[i + 1] as usize]
    }

    #[inline]
    pub fn quality(&self, id: u32) -> &[u8] {
        let i = id as usize;
        &self.qualities[self.qual_offsets[i] as usize..self.qual_offsets[i + 1] as usize]
    }

    /// Copy `ids.len()` decoded sequences into `out`, each padded to `pitch`
    /// bytes, one row per id. `out` must already have room (`ids.len() * pitch`).
    pub fn gather_decoded(&self, ids: &[u32], pitch: usize, out: &mut [u8]) {
        debug_assert!(out.len() >= ids.len() * pitch);
        for (row, &id) in ids.iter().enumerate() {
            let len = self.length(id) as usize;
            debug_assert!(len <= pitch);
            let dst = &mut out[row * pitch..row * pitch + len];
            let enc = self.encoded(id);
            for (i, slot) in dst.iter_mut().enumerate() {
                *slot = codec::code_to_base(codec::get_code(enc, i));
            }
        }
    }

    /// Copy `ids.len()` quality strings into `out`, each padded to `pitch` bytes.
    pub fn gather_quality(&self, ids: &[u32], pitch: usize, out: &mut [u8]) {
        debug_assert!(out.len() >= ids.len() * pitch);
        for (row, &id) in ids.iter().enumerate() {
            let q = self.quality(id);
            debug_assert!(q.len() <= pitch);
            out[row * pitch..row * pitch + q.len()].copy_from_slice(q);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_accessors() {
        let seqs: Vec<&[u8]> = vec![b"ACGT", b"TTTTGG"];
        let quals: Vec<&[u8]> = vec![b"IIII", b"IIIIII"];
        let store = ReadStore::build(&seqs, &quals);
        assert_eq!(store.num_reads(), 2);
        assert_eq!(store.length(0), 4);
        assert_eq!(store.length(1), 6);
        assert!(!store.contains_n(0));
        assert_eq!(codec::decode(store.encoded(1), 6), b"TTTTGG");
    }

    #[test]
    fn flags_ambiguous_bases() {
        let seqs: Vec<&[u8]> = vec![b"ACGN"];
        let quals: Vec<&[u8]> = vec![b"IIII"];
        let store = ReadStore::build(&seqs, &quals);
        assert!(store.contains_n(0));
    }

    #[test]
    fn gather_decoded_matches_encoded() {
        let seqs: Vec<&[u8]> = vec![b"ACGT", b"GGCCAA"];
        let quals: Vec<&[u8]> = vec![b"IIII", b"IIIIII"];
        let store = ReadStore::build(&seqs, &quals);
        let mut buf = vec![0u8; 2 * 8];
        store.gather_decoded(&[0, 1], 8, &mut buf);
        assert_eq!(&buf[0..4], b"ACGT");
        assert_eq!(&buf[8..14], b"GGCCAA");
    }
}
