use smallvec::SmallVec;

use crate::cell::{
    Cell, CellContext, CellParts, CellSlice, EmptyCellContext, HashBytes, MAX_BIT_LEN,
    MAX_REF_COUNT,
};
use crate::error::Error;

/// Accumulates bits and references for a new cell.
///
/// All `store_*` methods fail with [`Error::CellOverflow`] once the 1023-bit
/// or 4-reference capacity would be exceeded, leaving the builder unchanged.
#[derive(Clone)]
pub struct CellBuilder {
    data: [u8; 128],
    bit_len: u16,
    references: SmallVec<[Cell; MAX_REF_COUNT]>,
    is_exotic: bool,
}

impl Default for CellBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CellBuilder {
    pub fn new() -> Self {
        Self {
            data: [0; 128],
            bit_len: 0,
            references: SmallVec::new(),
            is_exotic: false,
        }
    }

    #[inline]
    pub fn size_bits(&self) -> u16 {
        self.bit_len
    }

    #[inline]
    pub fn size_refs(&self) -> u8 {
        self.references.len() as u8
    }

    #[inline]
    pub fn spare_bits_capacity(&self) -> u16 {
        MAX_BIT_LEN - self.bit_len
    }

    #[inline]
    pub fn spare_refs_capacity(&self) -> u8 {
        (MAX_REF_COUNT - self.references.len()) as u8
    }

    pub fn has_capacity(&self, bits: u16, refs: u8) -> bool {
        self.bit_len + bits <= MAX_BIT_LEN
            && self.references.len() + refs as usize <= MAX_REF_COUNT
    }

    /// Marks the built cell as exotic; its payload must then follow one of
    /// the special layouts.
    pub fn set_exotic(&mut self, is_exotic: bool) {
        self.is_exotic = is_exotic;
    }

    pub fn references(&self) -> &[Cell] {
        &self.references
    }

    /// Raw view of the accumulated data, bits beyond `size_bits` are zero.
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<(), Error> {
        if self.bit_len >= MAX_BIT_LEN {
            return Err(Error::CellOverflow);
        }
        if bit {
            self.data[(self.bit_len / 8) as usize] |= 1 << (7 - self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(())
    }

    #[inline]
    pub fn store_bit_zero(&mut self) -> Result<(), Error> {
        self.store_bit(false)
    }

    #[inline]
    pub fn store_bit_one(&mut self) -> Result<(), Error> {
        self.store_bit(true)
    }

    /// Stores the `bits` low bits of `value` big-endian.
    pub fn store_uint(&mut self, value: u64, bits: u16) -> Result<(), Error> {
        if bits > 64 {
            return Err(Error::IntOverflow);
        }
        if bits == 0 {
            return Ok(());
        }
        let aligned = (value << (64 - bits)).to_be_bytes();
        self.store_raw(&aligned, bits)
    }

    /// Stores up to 8 bits.
    pub fn store_small_uint(&mut self, value: u8, bits: u16) -> Result<(), Error> {
        debug_assert!(bits <= 8);
        self.store_uint(value as u64, bits)
    }

    pub fn store_u8(&mut self, value: u8) -> Result<(), Error> {
        self.store_raw(&[value], 8)
    }

    pub fn store_u16(&mut self, value: u16) -> Result<(), Error> {
        self.store_raw(&value.to_be_bytes(), 16)
    }

    pub fn store_u32(&mut self, value: u32) -> Result<(), Error> {
        self.store_raw(&value.to_be_bytes(), 32)
    }

    pub fn store_u64(&mut self, value: u64) -> Result<(), Error> {
        self.store_raw(&value.to_be_bytes(), 64)
    }

    pub fn store_u128(&mut self, value: u128) -> Result<(), Error> {
        self.store_raw(&value.to_be_bytes(), 128)
    }

    pub fn store_u256(&mut self, value: &HashBytes) -> Result<(), Error> {
        self.store_raw(value.as_slice(), 256)
    }

    /// Stores a signed integer in two's complement, `bits` wide.
    pub fn store_int(&mut self, value: i64, bits: u16) -> Result<(), Error> {
        self.store_uint(value as u64 & bits_mask(bits), bits)
    }

    pub fn store_zeros(&mut self, bits: u16) -> Result<(), Error> {
        if self.bit_len + bits > MAX_BIT_LEN {
            return Err(Error::CellOverflow);
        }
        self.bit_len += bits;
        Ok(())
    }

    pub fn store_ones(&mut self, bits: u16) -> Result<(), Error> {
        const ONES: [u8; 128] = [0xff; 128];
        self.store_raw(&ONES, bits)
    }

    /// Appends `bits` bits from `data`, MSB-first.
    pub fn store_raw(&mut self, data: &[u8], bits: u16) -> Result<(), Error> {
        if self.bit_len + bits > MAX_BIT_LEN {
            return Err(Error::CellOverflow);
        }
        if (data.len() as u32) * 8 < bits as u32 {
            return Err(Error::InvalidData);
        }
        if bits == 0 {
            return Ok(());
        }

        let shift = (self.bit_len % 8) as usize;
        let q = (self.bit_len / 8) as usize;
        let byte_len = bits.div_ceil(8) as usize;

        if shift == 0 {
            self.data[q..q + byte_len].copy_from_slice(&data[..byte_len]);
        } else {
            for (i, &byte) in data[..byte_len].iter().enumerate() {
                self.data[q + i] |= byte >> shift;
                if q + i + 1 < self.data.len() {
                    self.data[q + i + 1] = byte << (8 - shift);
                }
            }
        }
        self.bit_len += bits;

        // keep bits past the cursor zeroed so later merges stay pure ORs
        let rem = (self.bit_len % 8) as usize;
        let end = self.bit_len.div_ceil(8) as usize;
        if rem != 0 {
            self.data[end - 1] &= !(0xffu8 >> rem);
        }
        for byte in &mut self.data[end..(q + byte_len + 1).min(128)] {
            *byte = 0;
        }
        Ok(())
    }

    /// Appends the remaining bits and references of a slice.
    pub fn store_slice(&mut self, slice: &CellSlice<'_>) -> Result<(), Error> {
        if !self.has_capacity(slice.size_bits(), slice.size_refs()) {
            return Err(Error::CellOverflow);
        }
        ok!(self.store_slice_data(slice));
        for i in 0..slice.size_refs() {
            ok!(self.store_reference(ok!(slice.get_reference_cloned(i))));
        }
        Ok(())
    }

    /// Appends only the remaining data bits of a slice.
    pub fn store_slice_data(&mut self, slice: &CellSlice<'_>) -> Result<(), Error> {
        let mut cursor = *slice;
        let mut remaining = cursor.size_bits();
        while remaining > 0 {
            let take = remaining.min(64);
            let value = ok!(cursor.load_uint(take));
            ok!(self.store_uint(value, take));
            remaining -= take;
        }
        Ok(())
    }

    /// Appends the data and references of another builder.
    pub fn store_builder(&mut self, other: &CellBuilder) -> Result<(), Error> {
        if !self.has_capacity(other.bit_len, other.size_refs()) {
            return Err(Error::CellOverflow);
        }
        ok!(self.store_raw(&other.data, other.bit_len));
        for cell in other.references.iter() {
            ok!(self.store_reference(cell.clone()));
        }
        Ok(())
    }

    pub fn store_reference(&mut self, cell: Cell) -> Result<(), Error> {
        if self.references.len() >= MAX_REF_COUNT {
            return Err(Error::CellOverflow);
        }
        self.references.push(cell);
        Ok(())
    }

    /// Finalizes through a context (metered inside the VM).
    pub fn build_ext(self, context: &mut dyn CellContext) -> Result<Cell, Error> {
        let byte_len = self.bit_len.div_ceil(8) as usize;
        context.finalize_cell(CellParts {
            data: &self.data[..byte_len],
            bit_len: self.bit_len,
            references: self.references,
            is_exotic: self.is_exotic,
        })
    }

    /// Finalizes without metering.
    pub fn build(self) -> Result<Cell, Error> {
        self.build_ext(&mut EmptyCellContext)
    }
}

/// Single-value convenience: a cell holding just `value`.
pub fn make_cell<T: crate::cell::Store>(value: &T) -> Result<Cell, Error> {
    let mut builder = CellBuilder::new();
    ok!(value.store_into(&mut builder, &mut EmptyCellContext));
    builder.build()
}

const fn bits_mask(bits: u16) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

impl std::fmt::Debug for CellBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellBuilder")
            .field("bits", &self.bit_len)
            .field("refs", &self.references.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_limits() {
        let mut b = CellBuilder::new();
        for _ in 0..MAX_BIT_LEN {
            b.store_bit(true).unwrap();
        }
        assert_eq!(b.size_bits(), MAX_BIT_LEN);
        assert!(matches!(b.store_bit(false), Err(Error::CellOverflow)));

        let mut b = CellBuilder::new();
        for _ in 0..MAX_REF_COUNT {
            b.store_reference(Cell::empty_cell()).unwrap();
        }
        assert!(matches!(
            b.store_reference(Cell::empty_cell()),
            Err(Error::CellOverflow)
        ));
    }

    #[test]
    fn overflowing_store_leaves_builder_unchanged() {
        let mut b = CellBuilder::new();
        b.store_zeros(1020).unwrap();
        assert!(b.store_u8(0xff).is_err());
        assert_eq!(b.size_bits(), 1020);
        b.store_small_uint(0b101, 3).unwrap();
        assert_eq!(b.size_bits(), MAX_BIT_LEN);
    }

    #[test]
    fn unaligned_raw_merge() {
        let mut b = CellBuilder::new();
        b.store_small_uint(0b1, 1).unwrap();
        b.store_raw(&[0xff, 0xff], 15).unwrap();
        let cell = b.build().unwrap();
        assert_eq!(cell.bit_len(), 16);
        assert_eq!(cell.data(), &[0xff, 0xff]);
    }

    #[test]
    fn same_bits_same_hash() {
        let build = || {
            let mut b = CellBuilder::new();
            b.store_u32(0xcafe_babe).unwrap();
            b.store_reference(Cell::empty_cell()).unwrap();
            b.build().unwrap()
        };
        assert_eq!(build().repr_hash(), build().repr_hash());
        assert_eq!(build(), build());
    }
}
