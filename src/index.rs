//! Minhash candidate index: M inverted tables mapping a canonical k-mer
//! signature to a sorted, deduplicated list of read ids.

use std::io::{self, Read, Write};

use itertools::Itertools;

use crate::codec::{self, KmerHashIter};
use crate::error::CareError;
use crate::store::ReadStore;

pub const MAX_MAPS: usize = 16;
pub const MAX_K: usize = 32;

/// One CSR-style shard: for each of `keys[i]`, the ids are
/// `values[offsets[i]..offsets[i+1]]`, sorted ascending and deduplicated.
struct HashMapShard {
    keys: Vec<u64>,
    offsets: Vec<u32>,
    values: Vec<u32>,
}

impl HashMapShard {
    fn finalize(mut entries: Vec<(u64, u32)>) -> Self {
        entries.sort_unstable();
        entries.dedup();

        let mut keys = Vec::new();
        let mut offsets = vec![0u32];
        let mut values = Vec::with_capacity(entries.len());

        for (key, group) in &entries.into_iter().chunk_by(|&(k, _)| k) {
            keys.push(key);
            for (_, id) in group {
                values.push(id);
            }
            offsets.push(values.len() as u32);
        }

        Self { keys, offsets, values }
    }

    fn lookup(&self, key: u64) -> Option<&[u32]> {
        let idx = self.keys.binary_search(&key).ok()?;
        Some(&self.values[self.offsets[idx] as usize..self.offsets[idx + 1] as usize])
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&(self.keys.len() as u32).to_le_bytes())?;
        for k in &self.keys {
            w.write_all(&k.to_le_bytes())?;
        }
        for o in &self.offsets {
            w.write_all(&o.to_le_bytes())?;
        }
        for v in &self.values {
            w.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_keys = read_u32(r)? as usize;
        let keys = (0..num_keys).map(|_| read_u64(r)).collect::<io::Result<Vec<_>>>()?;
        let offsets = (0..=num_keys).map(|_| read_u32(r)).collect::<io::Result<Vec<_>>>()?;
        let num_values = offsets[num_keys] as usize;
        let values = (0..num_values).map(|_| read_u32(r)).collect::<io::Result<Vec<_>>>()?;
        Ok(Self { keys, offsets, values })
    }
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Deterministic per-map salts, generated with a fixed splitmix64 stream so
/// that rebuilding an index with the same `num_maps` always produces the
/// same salts (and therefore the same signatures).
fn salts(num_maps: usize) -> Vec<u64> {
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    (0..num_maps)
        .map(|_| {
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^ (z >> 31)
        })
        .collect()
}

pub struct Index {
    k: usize,
    num_maps: usize,
    /// Reserved metadata slot in the persisted header; the live noise-cutoff
    /// threshold is always supplied by the caller's `Config` at query time
    /// because it depends on `estimated_coverage`, which can differ between
    /// the run that built the index and the run that queries it.
    threshold: u32,
    salts: Vec<u64>,
    maps: Vec<HashMapShard>,
}

impl Index {
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn num_maps(&self) -> usize {
        self.maps.len()
    }

    fn signature(&self, codes: &[u8]) -> Vec<u64> {
        let mut mins = vec![u64::MAX; self.salts.len()];
        if codes.len() >= self.k {
            for (fwd, rev, is_fwd) in KmerHashIter::new(codes, self.k) {
                let canon = if is_fwd { fwd } else { rev };
                for (m, &salt) in self.salts.iter().enumerate() {
                    let h = canon ^ salt;
                    if h < mins[m] {
                        mins[m] = h;
                    }
                }
            }
        }
        mins
    }

    /// Look up candidates for a query sequence (already decoded to 2-bit
    /// codes). `max_results_per_map_query` implements the noise cutoff: a
    /// per-map hit list longer than this is treated as empty. `num_hits`,
    /// when `Some(n)`, keeps only ids that hit at least `n` maps.
    pub fn query(
        &self,
        query_codes: &[u8],
        exclude_id: u32,
        max_results_per_map_query: usize,
        num_hits: Option<usize>,
    ) -> Vec<u32> {
        let sig = self.signature(query_codes);
        let mut lists: Vec<&[u32]> = Vec::with_capacity(self.maps.len());
        for (map, &key) in self.maps.iter().zip(sig.iter()) {
            if key == u64::MAX {
                continue;
            }
            if let Some(ids) = map.lookup(key) {
                if ids.len() <= max_results_per_map_query {
                    lists.push(ids);
                }
            }
        }

        let merged = itertools::kmerge(lists.iter().map(|s| s.iter().copied())).dedup_with_count();
        let min_hits = num_hits.unwrap_or(1).max(1);
        merged
            .filter(|&(count, id)| count >= min_hits && id != exclude_id)
            .map(|(_, id)| id)
            .collect()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&(self.k as u32).to_le_bytes())?;
        w.write_all(&(self.num_maps as u32).to_le_bytes())?;
        w.write_all(&self.threshold.to_le_bytes())?;
        for map in &self.maps {
            map.write_to(w)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let k = read_u32(r)? as usize;
        let num_maps = read_u32(r)? as usize;
        let threshold = read_u32(r)?;
        let maps = (0..num_maps)
            .map(|_| HashMapShard::read_from(r))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            k,
            num_maps,
            threshold,
            salts: salts(num_maps),
            maps,
        })
    }
}

/// Build an index over every read in `reads`.
///
/// The build is staged to respect `memory_budget_bytes`: only as many maps
/// as fit in the budget are constructed per pass, and each pass touches
/// every read exactly once.
pub fn build_index(
    reads: &ReadStore,
    k: usize,
    num_maps: usize,
    memory_budget_bytes: usize,
) -> Result<Index, CareError> {
    if k == 0 || k > MAX_K || num_maps == 0 || num_maps > MAX_MAPS {
        return Err(CareError::IndexOverLimit {
            k,
            k_max: MAX_K,
            num_maps,
            num_maps_max: MAX_MAPS,
        });
    }

    let n = reads.num_reads();
    // Rough per-map working-set estimate: one (u64 key, u32 id) entry per read.
    let bytes_per_map = (n * 12).max(1);
    let maps_per_pass = memory_budget_bytes / bytes_per_map;
    let maps_per_pass = if maps_per_pass == 0 {
        if memory_budget_bytes == 0 {
            return Err(CareError::MemoryExhaustedDuringBuild {
                budget_bytes: memory_budget_bytes,
            });
        }
        tracing::warn!(
            memory_budget_bytes,
            bytes_per_map,
            "memory budget fits less than one full map per pass; proceeding one map at a time"
        );
        1
    } else {
        maps_per_pass.min(num_maps)
    };

    let all_salts = salts(num_maps);
    let mut maps = Vec::with_capacity(num_maps);
    let mut next_map = 0;

    while next_map < num_maps {
        let this_pass = maps_per_pass.min(num_maps - next_map);
        tracing::info!(pass_maps = this_pass, next_map, "minhash build pass");
        let pass_salts = &all_salts[next_map..next_map + this_pass];
        let mut shards: Vec<Vec<(u64, u32)>> = vec![Vec::new(); this_pass];

        for id in 0..n as u32 {
            let codes = codec::codes_of(reads.encoded(id), reads.length(id) as usize);
            if codes.len() < k {
                continue;
            }
            let mut mins = vec![u64::MAX; this_pass];
            for (fwd, rev, is_fwd) in KmerHashIter::new(&codes, k) {
                let canon = if is_fwd { fwd } else { rev };
                for (m, &salt) in pass_salts.iter().enumerate() {
                    let h = canon ^ salt;
                    if h < mins[m] {
                        mins[m] = h;
                    }
                }
            }
            for (m, &min_hash) in mins.iter().enumerate() {
                if min_hash != u64::MAX {
                    shards[m].push((min_hash, id));
                }
            }
        }

        for shard in shards {
            maps.push(HashMapShard::finalize(shard));
        }
        next_map += this_pass;
    }

    Ok(Index {
        k,
        num_maps,
        threshold: 0,
        salts: all_salts,
        maps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_of(seqs: &[&[u8]]) -> ReadStore {
        let quals: Vec<Vec<u8>> = seqs.iter().map(|s| vec![b'I'; s.len()]).collect();
        let qual_refs: Vec<&[u8]> = quals.iter().map(|v| v.as_slice()).collect();
        ReadStore::build(seqs, &qual_refs)
    }

    #[test]
    fn finds_self_similar_reads() {
        let seqs: Vec<&[u8]> = vec![
            b"ACGTACGTACGTACGTACGT",
            b"ACGTACGTACGTACGTACGA", // one mismatch
            b"TTTTTTTTTTTTTTTTTTTT", // unrelated
        ];
        let store = store_of(&seqs);
        let index = build_index(&store, 5, 3, 1 << 20).unwrap();
        let codes = codec::codes_of(store.encoded(0), store.length(0) as usize);
        let hits = index.query(&codes, 0, 1000, None);
        assert!(hits.contains(&1));
        assert!(!hits.contains(&0));
    }

    #[test]
    fn rejects_oversized_params() {
        let store = store_of(&[b"ACGT"]);
        assert!(build_index(&store, 33, 1, 1 << 20).is_err());
        assert!(build_index(&store, 4, 17, 1 << 20).is_err());
    }

    #[test]
    fn zero_budget_is_fatal() {
        let store = store_of(&[b"ACGT"]);
        assert!(matches!(
            build_index(&store, 4, 1, 0),
            Err(CareError::MemoryExhaustedDuringBuild { .. })
        ));
    }

    #[test]
    fn num_hits_mode_requires_multiple_map_agreement() {
        let seqs: Vec<&[u8]> = vec![
            b"ACGTACGTACGTACGTACGT",
            b"ACGTACGTACGTACGTACGT", // identical: should hit every map
            b"ACGTACGTACGTACGTACGA", // one mismatch: may only hit some maps
        ];
        let store = store_of(&seqs);
        let index = build_index(&store, 5, 4, 1 << 20).unwrap();
        let codes = codec::codes_of(store.encoded(0), store.length(0) as usize);

        let loose = index.query(&codes, 0, 1000, Some(1));
        let strict = index.query(&codes, 0, 1000, Some(4));
        // requiring agreement across every map can only shrink the result set
        assert!(strict.iter().all(|id| loose.contains(id)));
        assert!(strict.len() <= loose.len());
        assert!(loose.contains(&1));
    }

    #[test]
    fn persisted_roundtrip() {
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTACGTACGTACGT", b"TTTTTTTTTTTTTTTTTTTT"];
        let store = store_of(&seqs);
        let index = build_index(&store, 5, 2, 1 << 20).unwrap();
        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        let reloaded = Index::read_from(&mut &buf[..]).unwrap();
        assert_eq!(reloaded.k(), index.k());
        assert_eq!(reloaded.num_maps(), index.num_maps());
        let codes = codec::codes_of(store.encoded(0), store.length(0) as usize);
        assert_eq!(
            index.query(&codes, 0, 1000, None),
            reloaded.query(&codes, 0, 1000, None)
        );
    }
}
