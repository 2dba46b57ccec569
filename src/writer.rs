//! Per-worker scratch file writer.
//!
//! Record layout: `{id: varint, kind: u8, flags: u8, payload}`, where
//! `payload` is `{count: varint, (pos: varint, base: u8) * count}` when the
//! edits bit is set, else `{length: varint, bases[length]}`; a `Candidate`
//! record additionally trails a little-endian `i32` shift.

use std::io::{self, Read, Write};

use crate::correct::{CorrectedPayload, Edit};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Anchor,
    Candidate,
}

const FLAG_HQ: u8 = 0b01;
const FLAG_EDITS: u8 = 0b10;

fn write_varint<W: Write>(w: &mut W, mut v: u64) -> io::Result<()> {
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        w.write_all(&[byte])?;
        if v == 0 {
            return Ok(());
        }
    }
}

fn read_varint<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        result |= ((byte[0] & 0x7f) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

pub struct ScratchRecord {
    pub id: u32,
    pub kind: RecordKind,
    pub is_hq: bool,
    pub payload: CorrectedPayload,
    pub shift: Option<i32>,
}

pub struct ScratchWriter<W> {
    inner: W,
}

impl<W: Write> ScratchWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_record(
        &mut self,
        id: u32,
        kind: RecordKind,
        is_hq: bool,
        payload: &CorrectedPayload,
        shift: Option<i32>,
    ) -> io::Result<()> {
        write_varint(&mut self.inner, id as u64)?;
        self.inner.write_all(&[match kind {
            RecordKind::Anchor => 0,
            RecordKind::Candidate => 1,
        }])?;

        let mut flags = 0u8;
        if is_hq {
            flags |= FLAG_HQ;
        }
        if matches!(payload, CorrectedPayload::Edits(_)) {
            flags |= FLAG_EDITS;
        }
        self.inner.write_all(&[flags])?;

        match payload {
            CorrectedPayload::Edits(edits) => {
                write_varint(&mut self.inner, edits.len() as u64)?;
                for e in edits {
                    write_varint(&mut self.inner, e.pos as u64)?;
                    self.inner.write_all(&[e.base])?;
                }
            }
            CorrectedPayload::Full(bases) => {
                write_varint(&mut self.inner, bases.len() as u64)?;
                self.inner.write_all(bases)?;
            }
        }

        if kind == RecordKind::Candidate {
            self.inner.write_all(&shift.expect("candidate record requires a shift").to_le_bytes())?;
        }

        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn read_record<R: Read>(r: &mut R) -> io::Result<ScratchRecord> {
    let id = read_varint(r)? as u32;
    let mut kind_byte = [0u8; 1];
    r.read_exact(&mut kind_byte)?;
    let kind = if kind_byte[0] == 0 { RecordKind::Anchor } else { RecordKind::Candidate };

    let mut flags_byte = [0u8; 1];
    r.read_exact(&mut flags_byte)?;
    let is_hq = flags_byte[0] & FLAG_HQ != 0;
    let use_edits = flags_byte[0] & FLAG_EDITS != 0;

    let payload = if use_edits {
        let count = read_varint(r)? as usize;
        let mut edits = Vec::with_capacity(count);
        for _ in 0..count {
            let pos = read_varint(r)? as u32;
            let mut base = [0u8; 1];
            r.read_exact(&mut base)?;
            edits.push(Edit { pos, base: base[0] });
        }
        CorrectedPayload::Edits(edits)
    } else {
        let length = read_varint(r)? as usize;
        let mut bases = vec![0u8; length];
        r.read_exact(&mut bases)?;
        CorrectedPayload::Full(bases)
    };

    let shift = if kind == RecordKind::Candidate {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        Some(i32::from_le_bytes(buf))
    } else {
        None
    };

    Ok(ScratchRecord { id, kind, is_hq, payload, shift })
}
