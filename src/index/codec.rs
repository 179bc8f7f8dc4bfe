//! Binary index file format.
//!
//! Layout (all integers little-endian):
//! - 4 bytes: magic `FRVX`
//! - 4 bytes: format version (u32)
//! - 1 byte: index kind tag
//! - 1 byte: normalize flag
//! - 2 bytes: reserved
//! - 4 bytes: dimension D (u32)
//! - 8 bytes: commit generation (u64)
//! - 8 bytes: entry count N (u64)
//! - N entries: id length (u32), id bytes (UTF-8), D * f32 values
//! - IVF only: nlist (u32), cell count C (u32), C * D * f32 centroids
//!
//! Centroids trained for a different `nlist` are discarded on load and the
//! partition is retrained.
//!
//! Only live vectors are written, so saving also compacts.

use tracing::warn;

use super::{IndexSpec, Strategy, VectorIndex};
use crate::{
    config::IndexKind,
    error::{Error, Result},
};

const MAGIC: &[u8; 4] = b"FRVX";
const FORMAT_VERSION: u32 = 1;

pub(super) fn encode(index: &VectorIndex) -> Vec<u8> {
    let spec = index.spec();
    let slots = index.strategy().slots();
    let dim = spec.dimension;

    let mut out = Vec::with_capacity(32 + slots.len() * (dim * 4 + 20));
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(spec.kind.tag());
    out.push(u8::from(spec.normalize));
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    out.extend_from_slice(&index.generation().to_le_bytes());

    // Sorted by ID so identical contents always encode to identical bytes.
    let mut live: Vec<usize> = slots.live_slots().collect();
    live.sort_by(|&a, &b| slots.id(a).cmp(slots.id(b)));

    out.extend_from_slice(&(live.len() as u64).to_le_bytes());
    for slot in live {
        let id = slots.id(slot).as_bytes();
        out.extend_from_slice(&(id.len() as u32).to_le_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(bytemuck::cast_slice(slots.vector(slot)));
    }

    if let Strategy::Ivf(ivf) = &index.strategy {
        let centroids = ivf.centroids();
        out.extend_from_slice(&(ivf.nlist() as u32).to_le_bytes());
        out.extend_from_slice(&((centroids.len() / dim) as u32).to_le_bytes());
        out.extend_from_slice(bytemuck::cast_slice(centroids));
    }

    out
}

pub(super) fn decode(bytes: &[u8], expected: &IndexSpec) -> Result<VectorIndex> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.take(4)? != MAGIC {
        return Err(Error::IncompatibleIndex("not a finrag index file".into()));
    }
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(Error::IncompatibleIndex(format!(
            "unsupported index format version {version} (expected {FORMAT_VERSION})"
        )));
    }

    let tag = reader.u8()?;
    let kind = IndexKind::from_tag(tag).ok_or_else(|| {
        Error::IncompatibleIndex(format!("unknown index kind tag {tag}"))
    })?;
    let normalize = reader.u8()? != 0;
    reader.take(2)?;
    let dimension = reader.u32()? as usize;
    let generation = reader.u64()?;

    if kind != expected.kind {
        return Err(Error::IncompatibleIndex(format!(
            "index kind is {kind}, configuration expects {}",
            expected.kind
        )));
    }
    if dimension != expected.dimension {
        return Err(Error::IncompatibleIndex(format!(
            "index dimension is {dimension}, configuration expects {}",
            expected.dimension
        )));
    }
    if normalize != expected.normalize {
        return Err(Error::IncompatibleIndex(format!(
            "index normalize={normalize}, configuration expects {}",
            expected.normalize
        )));
    }

    let mut index = VectorIndex::new(expected.clone());
    index.generation = generation;

    let count = reader.u64()?;
    let mut vector = Vec::with_capacity(dimension);
    for _ in 0..count {
        let id_len = reader.u32()? as usize;
        let id = std::str::from_utf8(reader.take(id_len)?)
            .map_err(|_| Error::IncompatibleIndex("non UTF-8 chunk id".into()))?
            .to_string();
        vector.clear();
        vector.extend(reader.f32s(dimension)?);
        index.strategy.insert_raw(id, &vector);
    }

    if let Strategy::Ivf(ivf) = &mut index.strategy {
        let stored_nlist = reader.u32()? as usize;
        let cells = reader.u32()? as usize;
        let centroids = reader.f32s(cells * dimension)?;
        if stored_nlist == ivf.nlist() {
            ivf.restore_centroids(centroids);
        } else {
            warn!(
                stored_nlist,
                configured_nlist = ivf.nlist(),
                "IVF cell count changed; retraining partition"
            );
            ivf.train();
        }
    }

    if reader.pos != bytes.len() {
        return Err(Error::IncompatibleIndex(
            "trailing bytes after index data".into(),
        ));
    }

    Ok(index)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                Error::IncompatibleIndex("truncated index file".into())
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn f32s(&mut self, count: usize) -> Result<Vec<f32>> {
        let len = count.checked_mul(4).ok_or_else(|| {
            Error::IncompatibleIndex("vector block too large".into())
        })?;
        // The slice is not guaranteed to be 4-byte aligned.
        Ok(self
            .take(len)?
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}
