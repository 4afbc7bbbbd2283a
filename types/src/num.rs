//! Variable-length integers used by the currency and counter TL-B types.

use crate::cell::{CellBuilder, CellContext, CellSlice, Load, Store};
use crate::error::Error;

/// Native coin amount, stored as `VarUInteger 16`: a 4-bit byte-length
/// prefix followed by that many big-endian magnitude bytes. Values are
/// canonical (no leading zero bytes) and strictly below 2^120.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Tokens(u128);

impl Tokens {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self((1u128 << 120) - 1);

    /// Maximum number of bits the serialized form occupies.
    pub const MAX_BITS: u16 = 4 + 15 * 8;

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn into_inner(self) -> u128 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whether the value fits the 120-bit serialized range.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 <= Self::MAX.0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(value) if value <= Self::MAX.0 => Some(Self(value)),
            _ => None,
        }
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_mul(self, rhs: u128) -> Option<Self> {
        match self.0.checked_mul(rhs) {
            Some(value) if value <= Self::MAX.0 => Some(Self(value)),
            _ => None,
        }
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0).min(Self::MAX.0))
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn min(self, rhs: Self) -> Self {
        Self(self.0.min(rhs.0))
    }

    /// Bit length of the serialized form.
    pub const fn unpacked_len(self) -> u16 {
        let bytes = (128 - self.0.leading_zeros() as u16 + 7) / 8;
        4 + bytes * 8
    }
}

impl From<u64> for Tokens {
    fn from(value: u64) -> Self {
        Self(value as u128)
    }
}

impl std::fmt::Display for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl Store for Tokens {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        if !self.is_valid() {
            return Err(Error::IntOverflow);
        }
        let bytes = ((128 - self.0.leading_zeros() as u16) + 7) / 8;
        ok!(builder.store_small_uint(bytes as u8, 4));
        builder.store_raw(&self.0.to_be_bytes()[16 - bytes as usize..], bytes * 8)
    }
}

impl Load<'_> for Tokens {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        let bytes = ok!(slice.load_small_uint(4)) as u16;
        let mut value = 0u128;
        let mut remaining = bytes * 8;
        while remaining > 0 {
            let take = remaining.min(64);
            value = (value << take) | ok!(slice.load_uint(take)) as u128;
            remaining -= take;
        }
        Ok(Self(value))
    }
}

macro_rules! impl_var_uint {
    ($(#[doc = $doc:literal])* $name:ident($inner:ty), len_bits: $len_bits:literal) => {
        $(#[doc = $doc])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name($inner);

        impl $name {
            pub const ZERO: Self = Self(0);

            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            #[inline]
            pub const fn into_inner(self) -> $inner {
                self.0
            }

            pub fn checked_add(self, rhs: Self) -> Option<Self> {
                self.0.checked_add(rhs.0).map(Self)
            }
        }

        impl Store for $name {
            fn store_into(
                &self,
                builder: &mut CellBuilder,
                _: &mut dyn CellContext,
            ) -> Result<(), Error> {
                let bytes = ((<$inner>::BITS - self.0.leading_zeros() as u32 + 7) / 8) as u16;
                if bytes >= (1 << $len_bits) {
                    return Err(Error::IntOverflow);
                }
                ok!(builder.store_small_uint(bytes as u8, $len_bits));
                builder.store_uint(self.0 as u64, bytes * 8)
            }
        }

        impl Load<'_> for $name {
            fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
                let bytes = ok!(slice.load_small_uint($len_bits)) as u16;
                let value = ok!(slice.load_uint(bytes * 8));
                match <$inner>::try_from(value) {
                    Ok(value) => Ok(Self(value)),
                    Err(_) => Err(Error::IntOverflow),
                }
            }
        }
    };
}

impl_var_uint! {
    /// `VarUInteger 3`: message and cell counters in transaction totals.
    VarUint24(u32), len_bits: 2
}

impl_var_uint! {
    /// `VarUInteger 7`: gas and fee counters in phase descriptions.
    VarUint56(u64), len_bits: 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellBuilder, EmptyCellContext};

    fn round_trip(value: Tokens) -> Tokens {
        let mut b = CellBuilder::new();
        value.store_into(&mut b, &mut EmptyCellContext).unwrap();
        assert_eq!(b.size_bits(), value.unpacked_len());
        let cell = b.build().unwrap();
        cell.parse::<Tokens>().unwrap()
    }

    #[test]
    fn coin_encoding_boundaries() {
        for value in [
            Tokens::ZERO,
            Tokens::new(1),
            Tokens::new(255),
            Tokens::new(256),
            Tokens::new(1_000_000_000),
            Tokens::new(u64::MAX as u128),
            Tokens::new((1u128 << 120) - 1),
        ] {
            assert_eq!(round_trip(value), value);
        }
    }

    #[test]
    fn zero_is_four_bits() {
        assert_eq!(Tokens::ZERO.unpacked_len(), 4);
    }

    #[test]
    fn overflowing_coins_do_not_serialize() {
        let mut b = CellBuilder::new();
        let too_big = Tokens::new(1u128 << 120);
        assert!(matches!(
            too_big.store_into(&mut b, &mut EmptyCellContext),
            Err(Error::IntOverflow)
        ));
    }

    #[test]
    fn checked_math_respects_cap() {
        assert_eq!(Tokens::MAX.checked_add(Tokens::new(1)), None);
        assert_eq!(
            Tokens::new(5).checked_sub(Tokens::new(7)),
            None
        );
        assert_eq!(
            Tokens::new(5).checked_add(Tokens::new(7)),
            Some(Tokens::new(12))
        );
    }

    #[test]
    fn var_uint_counters() {
        let mut b = CellBuilder::new();
        VarUint24::new(300)
            .store_into(&mut b, &mut EmptyCellContext)
            .unwrap();
        VarUint56::new(1_000_000)
            .store_into(&mut b, &mut EmptyCellContext)
            .unwrap();
        let cell = b.build().unwrap();
        let mut cs = cell.as_slice().unwrap();
        assert_eq!(VarUint24::load_from(&mut cs).unwrap().into_inner(), 300);
        assert_eq!(
            VarUint56::load_from(&mut cs).unwrap().into_inner(),
            1_000_000
        );
    }
}
