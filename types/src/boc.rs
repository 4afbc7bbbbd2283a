//! Bag-of-cells codec: the standard binary envelope for cell DAGs.
//!
//! Cells are emitted in topological order (every reference points to a cell
//! with a larger index), so decoding builds the DAG back to front without
//! recursion. An optional trailing CRC-32/ISCSI checksum covers the whole
//! byte stream before it.

use std::collections::HashMap;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use crc::Crc;
use smallvec::SmallVec;

use crate::cell::{Cell, CellDescriptor, CellParts};
use crate::error::Error;

const BOC_GENERIC_TAG: u32 = 0xb5ee9c72;

const CRC_32C: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Errors produced while reading a bag of cells.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BocError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unknown magic {0:#010x}")]
    UnknownBocTag(u32),
    #[error("unsupported size of {0}: {1} bytes")]
    InvalidSize(&'static str, u8),
    #[error("root index {0} out of bounds")]
    RootIndexOutOfBounds(usize),
    #[error("reference from cell {0} points backwards or to itself")]
    InvalidRef(usize),
    #[error("cell {0} is malformed: {1}")]
    InvalidCell(usize, Error),
    #[error("checksum mismatch")]
    InvalidChecksum,
    #[error("expected exactly one root cell, got {0}")]
    RootCountMismatch(usize),
    #[error("invalid base64: {0}")]
    InvalidBase64(String),
}

/// Bag-of-cells entry points.
pub struct Boc;

impl Boc {
    /// Serializes a single-root DAG without index or checksum.
    pub fn encode(root: &Cell) -> Vec<u8> {
        encode_ext(root, false)
    }

    /// Serializes a single-root DAG with a trailing CRC-32/ISCSI checksum.
    pub fn encode_with_crc(root: &Cell) -> Vec<u8> {
        encode_ext(root, true)
    }

    pub fn encode_base64(root: &Cell) -> String {
        BASE64_STANDARD.encode(Self::encode(root))
    }

    /// Parses a bag of cells and returns its single root.
    pub fn decode(data: &[u8]) -> Result<Cell, BocError> {
        let roots = ok!(Self::decode_roots(data));
        match <[Cell; 1]>::try_from(roots) {
            Ok([root]) => Ok(root),
            Err(roots) => Err(BocError::RootCountMismatch(roots.len())),
        }
    }

    pub fn decode_base64(data: impl AsRef<str>) -> Result<Cell, BocError> {
        match BASE64_STANDARD.decode(data.as_ref()) {
            Ok(bytes) => Self::decode(&bytes),
            Err(e) => Err(BocError::InvalidBase64(e.to_string())),
        }
    }

    /// Parses a bag of cells with any number of roots.
    pub fn decode_roots(data: &[u8]) -> Result<Vec<Cell>, BocError> {
        decode_ext(data)
    }
}

fn encode_ext(root: &Cell, with_crc: bool) -> Vec<u8> {
    // reverse post-order of the memoized DFS is a topological order
    let mut post_order = Vec::new();
    let mut indices = HashMap::new();
    let mut stack = vec![(root.clone(), 0u8)];
    while let Some((cell, next_ref)) = stack.last_mut() {
        if *next_ref < cell.reference_count() {
            let child = cell
                .reference_cloned(*next_ref)
                .expect("ref count checked above");
            *next_ref += 1;
            if !indices.contains_key(child.repr_hash()) {
                // reserve the slot so diamond sharing visits each cell once
                indices.insert(*child.repr_hash(), usize::MAX);
                stack.push((child, 0));
            }
        } else {
            let (cell, _) = stack.pop().expect("stack is non-empty");
            indices.insert(*cell.repr_hash(), usize::MAX);
            post_order.push(cell);
        }
    }

    let cell_count = post_order.len();
    for (i, cell) in post_order.iter().rev().enumerate() {
        indices.insert(*cell.repr_hash(), i);
    }

    let mut total_size = 0u64;
    for cell in &post_order {
        total_size += 2 + cell.descriptor().byte_len() as u64;
    }
    let ref_size = min_bytes_for(cell_count as u64);
    total_size += post_order
        .iter()
        .map(|c| c.reference_count() as u64 * ref_size as u64)
        .sum::<u64>();
    let off_bytes = min_bytes_for(total_size);

    let mut out = Vec::with_capacity(32 + total_size as usize);
    out.extend_from_slice(&BOC_GENERIC_TAG.to_be_bytes());
    out.push(((with_crc as u8) << 6) | ref_size);
    out.push(off_bytes);
    write_be(&mut out, cell_count as u64, ref_size);
    write_be(&mut out, 1, ref_size); // roots
    write_be(&mut out, 0, ref_size); // absent
    write_be(&mut out, total_size, off_bytes);
    write_be(&mut out, 0, ref_size); // root index

    for cell in post_order.iter().rev() {
        out.extend_from_slice(&cell.raw_data_with_descriptors());
        for child in cell.references() {
            let index = indices[child.repr_hash()];
            write_be(&mut out, index as u64, ref_size);
        }
    }

    if with_crc {
        let checksum = CRC_32C.checksum(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
    }
    out
}

fn decode_ext(data: &[u8]) -> Result<Vec<Cell>, BocError> {
    let mut reader = ByteReader::new(data);

    let magic = ok!(reader.read_u32());
    if magic != BOC_GENERIC_TAG {
        return Err(BocError::UnknownBocTag(magic));
    }

    let flags = ok!(reader.read_byte());
    let has_index = flags & 0b1000_0000 != 0;
    let has_crc = flags & 0b0100_0000 != 0;
    let ref_size = flags & 0b0000_0111;
    if ref_size == 0 || ref_size > 4 {
        return Err(BocError::InvalidSize("ref", ref_size));
    }
    let off_bytes = ok!(reader.read_byte());
    if off_bytes == 0 || off_bytes > 8 {
        return Err(BocError::InvalidSize("offset", off_bytes));
    }

    let cell_count = ok!(reader.read_be(ref_size)) as usize;
    let root_count = ok!(reader.read_be(ref_size)) as usize;
    let absent_count = ok!(reader.read_be(ref_size)) as usize;
    if absent_count != 0 || root_count == 0 {
        return Err(BocError::InvalidSize("root/absent count", 0));
    }
    let _total_size = ok!(reader.read_be(off_bytes));

    let mut root_indices = Vec::with_capacity(root_count);
    for _ in 0..root_count {
        let index = ok!(reader.read_be(ref_size)) as usize;
        if index >= cell_count {
            return Err(BocError::RootIndexOutOfBounds(index));
        }
        root_indices.push(index);
    }

    if has_index {
        ok!(reader.skip(cell_count * off_bytes as usize));
    }

    // first pass: raw descriptors, payload spans and reference indices
    struct RawCell<'a> {
        descriptor: CellDescriptor,
        data: &'a [u8],
        refs: SmallVec<[usize; 4]>,
    }
    let mut raw_cells = Vec::with_capacity(cell_count);
    for i in 0..cell_count {
        let d1 = ok!(reader.read_byte());
        let d2 = ok!(reader.read_byte());
        let descriptor = CellDescriptor::new(d1, d2);
        if descriptor.reference_count() > 4 {
            return Err(BocError::InvalidCell(i, Error::InvalidData));
        }
        let data = ok!(reader.read_slice(descriptor.byte_len()));
        let mut refs = SmallVec::new();
        for _ in 0..descriptor.reference_count() {
            let index = ok!(reader.read_be(ref_size)) as usize;
            if index <= i || index >= cell_count {
                return Err(BocError::InvalidRef(i));
            }
            refs.push(index);
        }
        raw_cells.push(RawCell {
            descriptor,
            data,
            refs,
        });
    }

    if has_crc {
        let consumed = reader.offset;
        let expected = u32::from_le_bytes(match ok!(reader.read_slice(4)).try_into() {
            Ok(bytes) => bytes,
            Err(_) => return Err(BocError::UnexpectedEof),
        });
        if CRC_32C.checksum(&data[..consumed]) != expected {
            return Err(BocError::InvalidChecksum);
        }
    }

    // second pass back to front: children always exist before their parent
    let mut cells: Vec<Option<Cell>> = vec![None; cell_count];
    for i in (0..cell_count).rev() {
        let raw = &raw_cells[i];
        let (data, bit_len) = ok!(unpack_data(raw.descriptor, raw.data)
            .map_err(|e| BocError::InvalidCell(i, e)));
        let mut references = SmallVec::new();
        for &child in &raw.refs {
            match &cells[child] {
                Some(cell) => references.push(cell.clone()),
                None => return Err(BocError::InvalidRef(i)),
            }
        }
        let cell = ok!(Cell::finalize_parts(CellParts {
            data: &data,
            bit_len,
            references,
            is_exotic: raw.descriptor.is_exotic(),
        })
        .map_err(|e| BocError::InvalidCell(i, e)));
        cells[i] = Some(cell);
    }

    let mut roots = Vec::with_capacity(root_count);
    for index in root_indices {
        match &cells[index] {
            Some(cell) => roots.push(cell.clone()),
            None => return Err(BocError::RootIndexOutOfBounds(index)),
        }
    }
    Ok(roots)
}

/// Strips the completion tag and recovers the exact bit length.
fn unpack_data(descriptor: CellDescriptor, data: &[u8]) -> Result<(Vec<u8>, u16), Error> {
    let byte_len = descriptor.byte_len();
    let mut data = data[..byte_len].to_vec();
    let bit_len = if descriptor.has_partial_byte() {
        let last = match data.last_mut() {
            Some(last) if *last != 0 => last,
            _ => return Err(Error::InvalidData),
        };
        let tag_pos = last.trailing_zeros() as u16;
        *last &= !(1 << tag_pos);
        (byte_len as u16 - 1) * 8 + (7 - tag_pos)
    } else {
        byte_len as u16 * 8
    };
    Ok((data, bit_len))
}

fn min_bytes_for(value: u64) -> u8 {
    (((64 - value.leading_zeros() as u16) + 7) / 8).max(1) as u8
}

fn write_be(out: &mut Vec<u8>, value: u64, size: u8) {
    out.extend_from_slice(&value.to_be_bytes()[8 - size as usize..]);
}

struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn read_byte(&mut self) -> Result<u8, BocError> {
        match self.data.get(self.offset) {
            Some(&byte) => {
                self.offset += 1;
                Ok(byte)
            }
            None => Err(BocError::UnexpectedEof),
        }
    }

    fn read_u32(&mut self) -> Result<u32, BocError> {
        let slice = ok!(self.read_slice(4));
        Ok(u32::from_be_bytes(slice.try_into().expect("4 bytes")))
    }

    fn read_be(&mut self, size: u8) -> Result<u64, BocError> {
        let slice = ok!(self.read_slice(size as usize));
        let mut value = 0u64;
        for &byte in slice {
            value = (value << 8) | byte as u64;
        }
        Ok(value)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], BocError> {
        match self.data.get(self.offset..self.offset + len) {
            Some(slice) => {
                self.offset += len;
                Ok(slice)
            }
            None => Err(BocError::UnexpectedEof),
        }
    }

    fn skip(&mut self, len: usize) -> Result<(), BocError> {
        if self.offset + len > self.data.len() {
            return Err(BocError::UnexpectedEof);
        }
        self.offset += len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;

    fn sample_tree() -> Cell {
        let mut leaf = CellBuilder::new();
        leaf.store_u64(0x0123_4567_89ab_cdef).unwrap();
        let leaf = leaf.build().unwrap();

        let mut mid = CellBuilder::new();
        mid.store_uint(0b101, 3).unwrap();
        mid.store_reference(leaf.clone()).unwrap();
        mid.store_reference(leaf.clone()).unwrap();
        let mid = mid.build().unwrap();

        let mut root = CellBuilder::new();
        root.store_u32(0xdead_beef).unwrap();
        root.store_reference(mid).unwrap();
        root.store_reference(leaf).unwrap();
        root.build().unwrap()
    }

    #[test]
    fn round_trip_preserves_hash() {
        let root = sample_tree();
        let bytes = Boc::encode(&root);
        let decoded = Boc::decode(&bytes).unwrap();
        assert_eq!(decoded.repr_hash(), root.repr_hash());
        assert_eq!(decoded.bit_len(), root.bit_len());
    }

    #[test]
    fn round_trip_with_crc() {
        let root = sample_tree();
        let bytes = Boc::encode_with_crc(&root);
        assert_eq!(Boc::decode(&bytes).unwrap(), root);

        let mut corrupted = bytes;
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;
        assert!(matches!(
            Boc::decode(&corrupted),
            Err(BocError::InvalidChecksum)
        ));
    }

    #[test]
    fn shared_subtrees_are_deduplicated() {
        let root = sample_tree();
        let bytes = Boc::encode(&root);
        // root + mid + leaf, the leaf stored once despite three references
        // ref_size = 1, off_bytes = 1
        let cell_count = bytes[6];
        assert_eq!(cell_count, 3);
    }

    #[test]
    fn base64_round_trip() {
        let root = sample_tree();
        let encoded = Boc::encode_base64(&root);
        assert_eq!(Boc::decode_base64(encoded).unwrap(), root);
    }

    #[test]
    fn known_empty_cell_encoding() {
        let bytes = Boc::encode(&Cell::empty_cell());
        assert_eq!(bytes, b"\xb5\xee\x9c\x72\x01\x01\x01\x01\x00\x02\x00\x00\x00");
        assert_eq!(Boc::decode(&bytes).unwrap(), Cell::empty_cell());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Boc::decode(&[0, 1, 2, 3, 4, 5]),
            Err(BocError::UnknownBocTag(_))
        ));
        assert!(matches!(Boc::decode(&[]), Err(BocError::UnexpectedEof)));
    }
}
