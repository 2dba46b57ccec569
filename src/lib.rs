//! # care-core
//!
//! Consensus-based sequencing error correction. A read (the *anchor*) is
//! corrected by finding similar reads via a minhash index, aligning each
//! with a shifted-Hamming bit-parallel aligner, assembling the survivors
//! into a weighted multiple-sequence alignment, refining that alignment
//! against its own minority variants, and emitting a consensus correction
//! when the alignment is judged high quality.
//!
//! ## Pipeline
//!
//! 1. [`index`] — minhash candidate search over a [`store::ReadStore`].
//! 2. [`align`] — shifted-Hamming alignment, forward and reverse-complement.
//! 3. [`select`] — direction selection and reorientation into anchor space.
//! 4. [`filter`] — adaptive mismatch-ratio filtering to a coverage target.
//! 5. [`msa`] — weighted column tally, consensus, and iterative refinement.
//! 6. [`correct`] — HQ-gated anchor and candidate correction, edit encoding.
//! 7. [`worker`] — the OS-thread pool driving the above over every anchor.
//! 8. [`writer`] — each worker's self-describing scratch-file output.
//!
//! ## Usage
//!
//! ```no_run
//! use care_core::{build_index, correct_reads, Config};
//! use care_core::store::ReadStore;
//! use care_core::worker::WorkerWriters;
//!
//! let sequences: Vec<&[u8]> = vec![b"ACGTACGTACGTACGTACGT", b"ACGTACGTACGTACGTACGA"];
//! let qualities: Vec<&[u8]> = vec![b"IIIIIIIIIIIIIIIIIIII", b"IIIIIIIIIIIIIIIIIIII"];
//! let reads = ReadStore::build(&sequences, &qualities);
//!
//! let config = Config::default();
//! let index = build_index(&reads, config.k, config.num_maps, 1 << 30).unwrap();
//!
//! let mut out = WorkerWriters::create_in_dir(std::path::Path::new("/tmp/care-scratch"), config.num_workers).unwrap();
//! correct_reads(&index, &reads, &config, &mut out).unwrap();
//! ```

pub mod align;
pub mod codec;
pub mod config;
pub mod correct;
pub mod error;
pub mod filter;
pub mod flags;
pub mod index;
pub mod msa;
pub mod quality;
pub mod select;
pub mod store;
pub mod worker;
pub mod writer;

pub use config::Config;
pub use error::{CareError, Result};
pub use index::{build_index, Index};
pub use worker::{correct_reads, WorkerWriters};
