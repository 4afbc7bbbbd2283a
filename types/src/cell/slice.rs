use crate::cell::{Cell, HashBytes};
use crate::error::Error;

/// Cursor bounds over a cell, detached from the cell itself so it can be
/// stored and re-applied (continuation code windows, owned slices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSliceRange {
    bits_start: u16,
    bits_end: u16,
    refs_start: u8,
    refs_end: u8,
}

impl CellSliceRange {
    /// Range spanning the whole cell.
    pub fn full(cell: &Cell) -> Self {
        Self {
            bits_start: 0,
            bits_end: cell.bit_len(),
            refs_start: 0,
            refs_end: cell.reference_count(),
        }
    }

    pub const fn empty() -> Self {
        Self {
            bits_start: 0,
            bits_end: 0,
            refs_start: 0,
            refs_end: 0,
        }
    }

    #[inline]
    pub const fn size_bits(&self) -> u16 {
        self.bits_end - self.bits_start
    }

    #[inline]
    pub const fn size_refs(&self) -> u8 {
        self.refs_end - self.refs_start
    }

    #[inline]
    pub const fn offset_bits(&self) -> u16 {
        self.bits_start
    }

    #[inline]
    pub const fn offset_refs(&self) -> u8 {
        self.refs_start
    }

    pub const fn is_empty(&self) -> bool {
        self.size_bits() == 0 && self.size_refs() == 0
    }

    pub const fn has_remaining(&self, bits: u16, refs: u8) -> bool {
        self.size_bits() >= bits && self.size_refs() >= refs
    }

    /// Binds the range to a cell, rejecting exotic cells.
    pub fn apply(self, cell: &Cell) -> Result<CellSlice<'_>, Error> {
        if cell.is_exotic() {
            return Err(Error::PrunedBranchAccess);
        }
        Ok(self.apply_unchecked(cell))
    }

    /// Binds the range to a cell without the exotic check.
    pub fn apply_unchecked(self, cell: &Cell) -> CellSlice<'_> {
        debug_assert!(self.bits_end <= cell.bit_len());
        debug_assert!(self.refs_end <= cell.reference_count());
        CellSlice { cell, range: self }
    }

    /// Moves the start of the range forward without bounds checks beyond
    /// the range itself.
    pub fn try_advance(&mut self, bits: u16, refs: u8) -> bool {
        if self.bits_start + bits > self.bits_end || self.refs_start + refs > self.refs_end {
            return false;
        }
        self.bits_start += bits;
        self.refs_start += refs;
        true
    }
}

/// A borrowed read cursor over a cell's payload bits and references.
///
/// All `load_*` methods advance the cursor; `get_*` methods peek at an
/// offset without advancing.
#[derive(Clone, Copy)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    range: CellSliceRange,
}

impl<'a> CellSlice<'a> {
    pub fn new(cell: &'a Cell) -> Result<Self, Error> {
        CellSliceRange::full(cell).apply(cell)
    }

    #[inline]
    pub fn cell(&self) -> &'a Cell {
        self.cell
    }

    #[inline]
    pub fn range(&self) -> CellSliceRange {
        self.range
    }

    #[inline]
    pub fn size_bits(&self) -> u16 {
        self.range.size_bits()
    }

    #[inline]
    pub fn size_refs(&self) -> u8 {
        self.range.size_refs()
    }

    #[inline]
    pub fn offset_bits(&self) -> u16 {
        self.range.offset_bits()
    }

    pub fn is_data_empty(&self) -> bool {
        self.range.size_bits() == 0
    }

    pub fn is_refs_empty(&self) -> bool {
        self.range.size_refs() == 0
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn has_remaining(&self, bits: u16, refs: u8) -> bool {
        self.range.size_bits() >= bits && self.range.size_refs() >= refs
    }

    /// Advances the cursor if enough bits and refs remain.
    pub fn try_advance(&mut self, bits: u16, refs: u8) -> bool {
        self.range.try_advance(bits, refs)
    }

    pub fn skip_first(&mut self, bits: u16, refs: u8) -> Result<(), Error> {
        if self.try_advance(bits, refs) {
            Ok(())
        } else {
            Err(Error::CellUnderflow)
        }
    }

    /// Truncates the slice to its first `bits` bits and `refs` refs.
    pub fn only_first(&mut self, bits: u16, refs: u8) -> Result<(), Error> {
        if self.range.size_bits() < bits || self.range.size_refs() < refs {
            return Err(Error::CellUnderflow);
        }
        self.range.bits_end = self.range.bits_start + bits;
        self.range.refs_end = self.range.refs_start + refs;
        Ok(())
    }

    /// Peeks at a single bit at `offset` from the cursor.
    pub fn get_bit(&self, offset: u16) -> Result<bool, Error> {
        let index = self.range.bits_start + offset;
        if index >= self.range.bits_end {
            return Err(Error::CellUnderflow);
        }
        let byte = self.cell.data()[(index / 8) as usize];
        Ok(byte & (1 << (7 - index % 8)) != 0)
    }

    pub fn load_bit(&mut self) -> Result<bool, Error> {
        let bit = ok!(self.get_bit(0));
        self.range.bits_start += 1;
        Ok(bit)
    }

    /// Peeks at up to 64 bits at `offset` as a big-endian unsigned integer.
    pub fn get_uint(&self, offset: u16, bits: u16) -> Result<u64, Error> {
        if bits == 0 {
            return Ok(0);
        }
        if bits > 64 {
            return Err(Error::IntOverflow);
        }
        let start = self.range.bits_start + offset;
        if start + bits > self.range.bits_end {
            return Err(Error::CellUnderflow);
        }

        let data = self.cell.data();
        let first = (start / 8) as usize;
        let last = ((start + bits - 1) / 8) as usize;
        let mut acc = 0u128;
        for &byte in &data[first..=last] {
            acc = (acc << 8) | byte as u128;
        }
        let shift = (last + 1 - first) * 8 - (start % 8) as usize - bits as usize;
        let value = (acc >> shift) as u64;
        Ok(if bits == 64 {
            value
        } else {
            value & ((1u64 << bits) - 1)
        })
    }

    pub fn get_small_uint(&self, offset: u16, bits: u16) -> Result<u8, Error> {
        debug_assert!(bits <= 8);
        Ok(ok!(self.get_uint(offset, bits)) as u8)
    }

    /// Loads up to 64 bits as a big-endian unsigned integer.
    pub fn load_uint(&mut self, bits: u16) -> Result<u64, Error> {
        let value = ok!(self.get_uint(0, bits));
        self.range.bits_start += bits;
        Ok(value)
    }

    /// Loads up to 8 bits.
    pub fn load_small_uint(&mut self, bits: u16) -> Result<u8, Error> {
        debug_assert!(bits <= 8);
        Ok(ok!(self.load_uint(bits)) as u8)
    }

    pub fn load_u8(&mut self) -> Result<u8, Error> {
        Ok(ok!(self.load_uint(8)) as u8)
    }

    pub fn load_u16(&mut self) -> Result<u16, Error> {
        Ok(ok!(self.load_uint(16)) as u16)
    }

    pub fn load_u32(&mut self) -> Result<u32, Error> {
        Ok(ok!(self.load_uint(32)) as u32)
    }

    pub fn load_u64(&mut self) -> Result<u64, Error> {
        self.load_uint(64)
    }

    pub fn load_u128(&mut self) -> Result<u128, Error> {
        let high = ok!(self.load_uint(64)) as u128;
        let low = ok!(self.load_uint(64)) as u128;
        Ok((high << 64) | low)
    }

    pub fn load_u256(&mut self) -> Result<HashBytes, Error> {
        let mut bytes = [0u8; 32];
        for chunk in bytes.chunks_exact_mut(8) {
            chunk.copy_from_slice(&ok!(self.load_uint(64)).to_be_bytes());
        }
        Ok(HashBytes(bytes))
    }

    /// Loads a signed big-endian integer of up to 64 bits.
    pub fn load_int(&mut self, bits: u16) -> Result<i64, Error> {
        let value = ok!(self.load_uint(bits));
        if bits == 0 {
            return Ok(0);
        }
        let shift = 64 - bits;
        Ok(((value << shift) as i64) >> shift)
    }

    /// Copies `bits` bits into `target`, MSB-aligned, and advances.
    pub fn load_raw<'b>(&mut self, target: &'b mut [u8], bits: u16) -> Result<&'b [u8], Error> {
        if self.range.size_bits() < bits {
            return Err(Error::CellUnderflow);
        }
        let byte_len = bits.div_ceil(8) as usize;
        if target.len() < byte_len {
            return Err(Error::InvalidData);
        }
        let mut remaining = bits;
        let mut i = 0;
        while remaining > 0 {
            let take = remaining.min(8);
            let byte = ok!(self.load_uint(take)) as u8;
            target[i] = byte << (8 - take);
            remaining -= take;
            i += 1;
        }
        Ok(&target[..byte_len])
    }

    pub fn get_reference(&self, index: u8) -> Result<&'a Cell, Error> {
        if index >= self.range.size_refs() {
            return Err(Error::CellUnderflow);
        }
        match self.cell.reference(self.range.refs_start + index) {
            Some(cell) => Ok(cell),
            None => Err(Error::CellUnderflow),
        }
    }

    pub fn get_reference_cloned(&self, index: u8) -> Result<Cell, Error> {
        Ok(ok!(self.get_reference(index)).clone())
    }

    pub fn load_reference(&mut self) -> Result<&'a Cell, Error> {
        let cell = ok!(self.get_reference(0));
        self.range.refs_start += 1;
        Ok(cell)
    }

    pub fn load_reference_cloned(&mut self) -> Result<Cell, Error> {
        Ok(ok!(self.load_reference()).clone())
    }

    /// Takes the rest of the slice, leaving this one empty.
    pub fn load_remaining(&mut self) -> CellSlice<'a> {
        let result = *self;
        self.range.bits_start = self.range.bits_end;
        self.range.refs_start = self.range.refs_end;
        result
    }

    /// Length of the longest common bit prefix with `other`.
    pub fn longest_common_data_prefix(&self, other: &CellSlice<'_>) -> u16 {
        let max = self.size_bits().min(other.size_bits());
        let mut i = 0;
        while i < max {
            match (self.get_bit(i), other.get_bit(i)) {
                (Ok(a), Ok(b)) if a == b => i += 1,
                _ => break,
            }
        }
        i
    }

    /// Whether the remaining data bits of both slices are identical.
    pub fn contents_eq(&self, other: &CellSlice<'_>) -> Result<bool, Error> {
        if self.size_bits() != other.size_bits() {
            return Ok(false);
        }
        let mut a = *self;
        let mut b = *other;
        let mut remaining = a.size_bits();
        while remaining > 0 {
            let take = remaining.min(64);
            if ok!(a.load_uint(take)) != ok!(b.load_uint(take)) {
                return Ok(false);
            }
            remaining -= take;
        }
        Ok(true)
    }
}

impl std::fmt::Debug for CellSlice<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellSlice")
            .field("bits", &self.range.size_bits())
            .field("refs", &self.range.size_refs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::cell::CellBuilder;

    #[test]
    fn unaligned_reads() -> anyhow::Result<()> {
        let mut b = CellBuilder::new();
        b.store_bit(true)?;
        b.store_uint(0b1011, 4)?;
        b.store_u32(0xdead_beef)?;
        let cell = b.build()?;

        let mut cs = cell.as_slice()?;
        assert!(cs.load_bit()?);
        assert_eq!(cs.load_uint(4)?, 0b1011);
        assert_eq!(cs.load_u32()?, 0xdead_beef);
        assert!(cs.is_data_empty());
        assert!(cs.load_bit().is_err());
        Ok(())
    }

    #[test]
    fn peek_does_not_advance() -> anyhow::Result<()> {
        let mut b = CellBuilder::new();
        b.store_u16(0b1010_1010_0101_0101)?;
        let cell = b.build()?;

        let cs = cell.as_slice()?;
        assert_eq!(cs.get_uint(0, 8)?, 0b1010_1010);
        assert_eq!(cs.get_uint(8, 8)?, 0b0101_0101);
        assert_eq!(cs.size_bits(), 16);
        Ok(())
    }
}
