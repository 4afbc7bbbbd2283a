use std::rc::Rc;
use std::sync::OnceLock;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};
use tonkit_types::cell::{
    Cell, CellBuilder, CellContext, CellSlice, CellSliceParts, CellSliceRange, Load, Store,
};
use tonkit_types::dict::DictKey;
use tonkit_types::error::Error;

/// A cell slice that owns its cell, so it can live on the stack and in
/// continuations without borrowing.
#[derive(Debug, Clone)]
#[repr(transparent)]
pub struct OwnedCellSlice(CellSliceParts);

impl Default for OwnedCellSlice {
    fn default() -> Self {
        Self::new(Cell::empty_cell())
    }
}

impl OwnedCellSlice {
    pub fn new(cell: Cell) -> Self {
        let range = CellSliceRange::full(&cell);
        Self((cell, range))
    }

    pub fn apply(&self) -> Result<CellSlice<'_>, Error> {
        self.range().apply(self.cell())
    }

    #[inline]
    pub fn range(&self) -> CellSliceRange {
        self.0 .1
    }

    #[inline]
    pub fn range_mut(&mut self) -> &mut CellSliceRange {
        &mut self.0 .1
    }

    #[inline]
    pub fn cell(&self) -> &Cell {
        &self.0 .0
    }

    #[inline]
    pub fn set_range(&mut self, range: CellSliceRange) {
        self.0 .1 = range
    }

    pub fn is_empty(&self) -> bool {
        self.range().is_empty()
    }
}

impl From<Cell> for OwnedCellSlice {
    #[inline]
    fn from(value: Cell) -> Self {
        Self::new(value)
    }
}

impl From<CellSliceParts> for OwnedCellSlice {
    #[inline]
    fn from(parts: CellSliceParts) -> Self {
        Self(parts)
    }
}

impl PartialEq<CellSlice<'_>> for OwnedCellSlice {
    fn eq(&self, right: &CellSlice<'_>) -> bool {
        if let Ok(left) = self.apply() {
            if let Ok(true) = left.contents_eq(right) {
                return left.size_refs() == right.size_refs();
            }
        }
        false
    }
}

/// Control register index as a dictionary key.
#[repr(transparent)]
pub struct Uint4(pub usize);

impl DictKey for Uint4 {
    const BITS: u16 = 4;

    fn serialize_key(&self, builder: &mut CellBuilder) -> Result<(), Error> {
        if self.0 > 0xf {
            return Err(Error::IntOverflow);
        }
        builder.store_small_uint(self.0 as _, 4)
    }

    fn deserialize_key(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self(ok!(slice.load_small_uint(4)) as usize))
    }
}

impl Store for Uint4 {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        if self.0 > 0xf {
            return Err(Error::IntOverflow);
        }
        builder.store_small_uint(self.0 as _, 4)
    }
}

impl Load<'_> for Uint4 {
    #[inline]
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self(ok!(slice.load_small_uint(4)) as usize))
    }
}

pub fn ensure_empty_slice(slice: &CellSlice) -> Result<(), Error> {
    if slice.is_data_empty() && slice.is_refs_empty() {
        Ok(())
    } else {
        Err(Error::InvalidData)
    }
}

pub fn store_int_to_builder(
    int: &BigInt,
    bits: u16,
    signed: bool,
    builder: &mut CellBuilder,
) -> Result<(), Error> {
    let is_negative = int.sign() == Sign::Minus;
    if (is_negative && !signed) || bitsize(int, signed) > bits {
        return Err(Error::IntOverflow);
    }

    let bytes = to_signed_bytes_be(is_negative, int.magnitude());
    let value_bits = (bytes.len() * 8) as u16;

    if bytes.is_empty() {
        builder.store_zeros(bits)
    } else if bits > value_bits {
        let diff = bits - value_bits;
        ok!(if is_negative {
            builder.store_ones(diff)
        } else {
            builder.store_zeros(diff)
        });
        builder.store_raw(&bytes, value_bits)
    } else {
        let bits_offset = value_bits - bits;
        let bytes_offset = (bits_offset / 8) as usize;
        let rem = bits_offset % 8;

        let (left, right) = bytes.split_at(bytes_offset + 1);
        if let Some(left) = left.last() {
            ok!(builder.store_small_uint(*left << rem, 8 - rem));
        }
        if !right.is_empty() {
            ok!(builder.store_raw(right, (right.len() * 8) as u16));
        }
        Ok(())
    }
}

/// Loads a big-endian integer of up to 257 bits.
pub fn load_int_from_slice(
    slice: &mut CellSlice<'_>,
    bits: u16,
    signed: bool,
) -> Result<BigInt, Error> {
    if bits == 0 {
        return Ok(BigInt::zero());
    }
    if bits > 257 {
        return Err(Error::IntOverflow);
    }

    let mut bytes = [0u8; 33];
    let byte_len = bits.div_ceil(8) as usize;
    ok!(slice.load_raw(&mut bytes, bits));

    // `load_raw` aligns to the MSB, so drop the unused low bits after parsing
    let mut int = if signed {
        BigInt::from_signed_bytes_be(&bytes[..byte_len])
    } else {
        BigInt::from_bytes_be(Sign::Plus, &bytes[..byte_len])
    };
    let rem = bits % 8;
    if rem != 0 {
        int >>= 8 - rem;
    }
    Ok(int)
}

/// Loads a `VarInteger n`: a `len_bits`-bit byte-length prefix followed
/// by that many big-endian bytes.
pub fn load_varint_from_slice(
    slice: &mut CellSlice<'_>,
    len_bits: u16,
    signed: bool,
) -> Result<BigInt, Error> {
    let bytes = ok!(slice.load_uint(len_bits)) as u16;
    load_int_from_slice(slice, bytes * 8, signed)
}

pub fn store_varint_to_builder(
    int: &BigInt,
    len_bits: u16,
    signed: bool,
    builder: &mut CellBuilder,
) -> Result<(), Error> {
    let bytes = bitsize(int, signed).div_ceil(8);
    if bytes >= (1 << len_bits) {
        return Err(Error::IntOverflow);
    }
    ok!(builder.store_uint(bytes as u64, len_bits));
    store_int_to_builder(int, bytes * 8, signed, builder)
}

pub fn bitsize(int: &BigInt, signed: bool) -> u16 {
    fn minus_one() -> &'static BigInt {
        static MINUS_ONE: OnceLock<BigInt> = OnceLock::new();
        MINUS_ONE.get_or_init(|| BigInt::from_biguint(Sign::Minus, BigUint::one()))
    }

    let mut bits = int.bits() as u16;
    if signed {
        if int.is_zero() {
            return 0;
        } else if int == minus_one() {
            return 1;
        } else if int.sign() == Sign::Plus {
            return bits + 1;
        }

        let mut modpow2 = int.magnitude().clone();
        modpow2 &= &modpow2 - 1u32;
        if !modpow2.is_zero() {
            bits += 1;
        }
    }

    bits
}

pub fn to_signed_bytes_be(is_negative: bool, value: &BigUint) -> Vec<u8> {
    #[inline]
    fn is_zero(value: &u8) -> bool {
        *value == 0
    }

    #[inline]
    fn twos_complement_le(digits: &mut [u8]) {
        let mut carry = true;
        for digit in digits {
            *digit = !*digit;
            if carry {
                let (d, c) = digit.overflowing_add(1);
                *digit = d;
                carry = c;
            }
        }
    }

    fn negative_to_signed_bytes_be(value: &BigUint) -> Vec<u8> {
        let mut bytes = value.to_bytes_le();
        let last_byte = bytes.last().cloned().unwrap_or(0);
        if last_byte > 0x7f && !(last_byte == 0x80 && bytes.iter().rev().skip(1).all(is_zero)) {
            // msb used by magnitude, extend by 1 byte
            bytes.push(0);
        }
        twos_complement_le(&mut bytes);
        bytes.reverse();
        bytes
    }

    if is_negative {
        negative_to_signed_bytes_be(value)
    } else {
        value.to_bytes_be()
    }
}

#[inline]
pub fn rc_ptr_eq<T1: ?Sized, T2: ?Sized>(lhs: &Rc<T1>, rhs: &Rc<T2>) -> bool {
    let lhs = Rc::as_ptr(lhs) as *const ();
    let rhs = Rc::as_ptr(rhs) as *const ();
    lhs == rhs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trip_through_builder() {
        for value in [
            BigInt::from(0),
            BigInt::from(1),
            BigInt::from(-1),
            BigInt::from(i64::MAX),
            BigInt::from(i64::MIN),
            BigInt::from(1u128) << 200u32,
            -(BigInt::from(1u128) << 200u32),
        ] {
            let mut b = CellBuilder::new();
            store_int_to_builder(&value, 257, true, &mut b).unwrap();
            let cell = b.build().unwrap();
            let mut cs = cell.as_slice().unwrap();
            let loaded = load_int_from_slice(&mut cs, 257, true).unwrap();
            assert_eq!(loaded, value, "round trip failed for {value}");
        }
    }

    #[test]
    fn bitsize_signed_and_unsigned() {
        assert_eq!(bitsize(&BigInt::from(0), true), 0);
        assert_eq!(bitsize(&BigInt::from(-1), true), 1);
        assert_eq!(bitsize(&BigInt::from(1), true), 2);
        assert_eq!(bitsize(&BigInt::from(-2), true), 2);
        assert_eq!(bitsize(&BigInt::from(127), true), 8);
        assert_eq!(bitsize(&BigInt::from(-128), true), 8);
        assert_eq!(bitsize(&BigInt::from(128), true), 9);
        assert_eq!(bitsize(&BigInt::from(255), false), 8);
    }
}
