//! Process-wide correction-flags bitmap.
//!
//! One `AtomicU8` per read id with two meaningful bits gives an
//! at-most-once guarantee per id without a lock on the hot path. A striped
//! mutex (`id % stripe_count`) is the documented fallback for id spaces too
//! large for a dense atomic array; this crate targets in-memory datasets
//! where the dense array is always affordable, so only that path is built.

use std::sync::atomic::{AtomicU8, Ordering};

const ANCHOR_CLAIMED: u8 = 0b01;
const HQ_CLAIMED: u8 = 0b10;

pub struct CorrectionFlags {
    bits: Vec<AtomicU8>,
}

impl CorrectionFlags {
    pub fn new(num_reads: usize) -> Self {
        Self {
            bits: (0..num_reads).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Try to become the worker responsible for correcting `id` as an
    /// anchor. Returns `false` if another worker already claimed it.
    pub fn try_claim_anchor(&self, id: u32) -> bool {
        let cell = &self.bits[id as usize];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            if current & ANCHOR_CLAIMED != 0 {
                return false;
            }
            match cell.compare_exchange_weak(
                current,
                current | ANCHOR_CLAIMED,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Monotonic: once set, stays set. Returns `true` if this call is the
    /// one that set it.
    pub fn try_set_hq(&self, id: u32) -> bool {
        let cell = &self.bits[id as usize];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            if current & HQ_CLAIMED != 0 {
                return false;
            }
            match cell.compare_exchange_weak(current, current | HQ_CLAIMED, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn is_anchor_claimed(&self, id: u32) -> bool {
        self.bits[id as usize].load(Ordering::Acquire) & ANCHOR_CLAIMED != 0
    }

    pub fn is_hq(&self, id: u32) -> bool {
        self.bits[id as usize].load(Ordering::Acquire) & HQ_CLAIMED != 0
    }
}
