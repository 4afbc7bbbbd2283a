//! Price and limit records stored in the blockchain config dictionary.

use crate::cell::{CellBuilder, CellContext, CellSlice, Load, Store};
use crate::error::Error;
use crate::num::Tokens;

/// Rounds a 2^16 fixed-point price up to whole token units.
pub const fn shift_ceil_price(value: u128) -> u128 {
    let r = value & 0xffff;
    (value >> 16) + (r != 0) as u128
}

/// Params 20 (masterchain) and 21 (base workchains).
///
/// `gas_flat_pfx#d1` wraps `gas_prices_ext#de` (or the legacy
/// `gas_prices#dd`) with a flat prefix that covers small transactions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GasLimitsPrices {
    pub gas_price: u64,
    pub gas_limit: u64,
    pub special_gas_limit: u64,
    pub gas_credit: u64,
    pub block_gas_limit: u64,
    pub freeze_due_limit: u64,
    pub delete_due_limit: u64,
    pub flat_gas_limit: u64,
    pub flat_gas_price: u64,
}

impl GasLimitsPrices {
    const TAG_BASE: u8 = 0xdd;
    const TAG_EXT: u8 = 0xde;
    const TAG_FLAT_PFX: u8 = 0xd1;

    /// Computes the amount of gas which can be bought for the specified
    /// number of tokens. The flat prefix buys `flat_gas_limit` units at a
    /// fixed price, the rest is linear in `gas_price`.
    pub fn bought_gas_limit(&self, tokens: Tokens) -> u64 {
        let tokens = tokens.into_inner();
        if tokens < self.flat_gas_price as u128 {
            return 0;
        }
        let extra = (tokens - self.flat_gas_price as u128)
            .saturating_mul(1 << 16)
            .checked_div(self.gas_price as u128)
            .unwrap_or(u128::MAX);
        let bought = (self.flat_gas_limit as u128).saturating_add(extra);
        std::cmp::min(bought, self.gas_limit as u128) as u64
    }

    /// Computes the fee for the consumed amount of gas.
    pub fn compute_gas_fee(&self, gas_used: u64) -> Tokens {
        if gas_used <= self.flat_gas_limit {
            return Tokens::new(self.flat_gas_price as u128);
        }
        let extra = (self.gas_price as u128).saturating_mul((gas_used - self.flat_gas_limit) as u128);
        Tokens::new((self.flat_gas_price as u128).saturating_add(shift_ceil_price(extra)))
    }
}

impl Store for GasLimitsPrices {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        ok!(builder.store_u8(Self::TAG_FLAT_PFX));
        ok!(builder.store_u64(self.flat_gas_limit));
        ok!(builder.store_u64(self.flat_gas_price));
        ok!(builder.store_u8(Self::TAG_EXT));
        ok!(builder.store_u64(self.gas_price));
        ok!(builder.store_u64(self.gas_limit));
        ok!(builder.store_u64(self.special_gas_limit));
        ok!(builder.store_u64(self.gas_credit));
        ok!(builder.store_u64(self.block_gas_limit));
        ok!(builder.store_u64(self.freeze_due_limit));
        builder.store_u64(self.delete_due_limit)
    }
}

impl Load<'_> for GasLimitsPrices {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        let mut result = Self::default();
        loop {
            match ok!(slice.load_u8()) {
                Self::TAG_FLAT_PFX => {
                    result.flat_gas_limit = ok!(slice.load_u64());
                    result.flat_gas_price = ok!(slice.load_u64());
                }
                Self::TAG_EXT => {
                    result.gas_price = ok!(slice.load_u64());
                    result.gas_limit = ok!(slice.load_u64());
                    result.special_gas_limit = ok!(slice.load_u64());
                    result.gas_credit = ok!(slice.load_u64());
                    result.block_gas_limit = ok!(slice.load_u64());
                    result.freeze_due_limit = ok!(slice.load_u64());
                    result.delete_due_limit = ok!(slice.load_u64());
                    return Ok(result);
                }
                Self::TAG_BASE => {
                    result.gas_price = ok!(slice.load_u64());
                    result.gas_limit = ok!(slice.load_u64());
                    result.special_gas_limit = result.gas_limit;
                    result.gas_credit = ok!(slice.load_u64());
                    result.block_gas_limit = ok!(slice.load_u64());
                    result.freeze_due_limit = ok!(slice.load_u64());
                    result.delete_due_limit = ok!(slice.load_u64());
                    return Ok(result);
                }
                _ => return Err(Error::InvalidTag),
            }
        }
    }
}

/// Params 24 (masterchain) and 25 (base workchains): `msg_forward_prices#ea`.
///
/// Fees are fixed-point with a 2^16 denominator: the lump price is charged
/// once, the bit/cell prices per unit of the serialized message, and
/// `first_frac`/`next_frac` split the total between the validators of each
/// hop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MsgForwardPrices {
    pub lump_price: u64,
    pub bit_price: u64,
    pub cell_price: u64,
    pub ihr_price_factor: u32,
    pub first_frac: u16,
    pub next_frac: u16,
}

impl MsgForwardPrices {
    const TAG: u8 = 0xea;

    /// Computes the full forwarding fee for a message of the given size.
    pub fn compute_fwd_fee(&self, cells: u64, bits: u64) -> Tokens {
        let size_fee = (self.bit_price as u128)
            .saturating_mul(bits as u128)
            .saturating_add((self.cell_price as u128).saturating_mul(cells as u128));
        Tokens::new((self.lump_price as u128).saturating_add(shift_ceil_price(size_fee)))
    }

    /// The part of the forwarding fee which is kept by the first validator.
    pub fn get_first_part(&self, total: Tokens) -> Tokens {
        Tokens::new((total.into_inner().saturating_mul(self.first_frac as u128)) >> 16)
    }

    /// The part of a remaining forwarding fee which is kept on each
    /// further hop.
    pub fn get_next_part(&self, total: Tokens) -> Tokens {
        Tokens::new((total.into_inner().saturating_mul(self.next_frac as u128)) >> 16)
    }
}

impl Store for MsgForwardPrices {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        ok!(builder.store_u8(Self::TAG));
        ok!(builder.store_u64(self.lump_price));
        ok!(builder.store_u64(self.bit_price));
        ok!(builder.store_u64(self.cell_price));
        ok!(builder.store_u32(self.ihr_price_factor));
        ok!(builder.store_u16(self.first_frac));
        builder.store_u16(self.next_frac)
    }
}

impl Load<'_> for MsgForwardPrices {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        if ok!(slice.load_u8()) != Self::TAG {
            return Err(Error::InvalidTag);
        }
        Ok(Self {
            lump_price: ok!(slice.load_u64()),
            bit_price: ok!(slice.load_u64()),
            cell_price: ok!(slice.load_u64()),
            ihr_price_factor: ok!(slice.load_u32()),
            first_frac: ok!(slice.load_u16()),
            next_frac: ok!(slice.load_u16()),
        })
    }
}

/// One segment of param 18: `_#cc utime_since:uint32 ...`.
///
/// Bit/cell prices are fixed-point with a 2^16 denominator and apply from
/// `utime_since` until the next segment starts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoragePrices {
    pub utime_since: u32,
    pub bit_price_ps: u64,
    pub cell_price_ps: u64,
    pub mc_bit_price_ps: u64,
    pub mc_cell_price_ps: u64,
}

impl StoragePrices {
    const TAG: u8 = 0xcc;
}

impl Store for StoragePrices {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        ok!(builder.store_u8(Self::TAG));
        ok!(builder.store_u32(self.utime_since));
        ok!(builder.store_u64(self.bit_price_ps));
        ok!(builder.store_u64(self.cell_price_ps));
        ok!(builder.store_u64(self.mc_bit_price_ps));
        builder.store_u64(self.mc_cell_price_ps)
    }
}

impl Load<'_> for StoragePrices {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        if ok!(slice.load_u8()) != Self::TAG {
            return Err(Error::InvalidTag);
        }
        Ok(Self {
            utime_since: ok!(slice.load_u32()),
            bit_price_ps: ok!(slice.load_u64()),
            cell_price_ps: ok!(slice.load_u64()),
            mc_bit_price_ps: ok!(slice.load_u64()),
            mc_cell_price_ps: ok!(slice.load_u64()),
        })
    }
}

/// Param 43: `size_limits_config#01` or `size_limits_config_v2#02`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimitsConfig {
    pub max_size: u32,
    pub max_depth: u16,
    pub max_msg_bits: u32,
    pub max_msg_cells: u32,
    pub max_library_cells: u32,
    pub max_vm_data_depth: u16,
    pub max_ext_msg_size: u32,
    pub max_ext_msg_depth: u16,
    pub max_acc_state_cells: u32,
    pub max_acc_state_bits: u32,
}

impl Default for SizeLimitsConfig {
    fn default() -> Self {
        Self {
            max_size: 1 << 21,
            max_depth: 512,
            max_msg_bits: 1 << 21,
            max_msg_cells: 1 << 13,
            max_library_cells: 1000,
            max_vm_data_depth: 512,
            max_ext_msg_size: 65535,
            max_ext_msg_depth: 512,
            max_acc_state_cells: 1 << 16,
            max_acc_state_bits: (1 << 16) * 1023,
        }
    }
}

impl Store for SizeLimitsConfig {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        ok!(builder.store_u8(0x02));
        ok!(builder.store_u32(self.max_size));
        ok!(builder.store_u16(self.max_depth));
        ok!(builder.store_u32(self.max_msg_bits));
        ok!(builder.store_u32(self.max_msg_cells));
        ok!(builder.store_u32(self.max_library_cells));
        ok!(builder.store_u16(self.max_vm_data_depth));
        ok!(builder.store_u32(self.max_ext_msg_size));
        ok!(builder.store_u16(self.max_ext_msg_depth));
        ok!(builder.store_u32(self.max_acc_state_cells));
        builder.store_u32(self.max_acc_state_bits)
    }
}

impl Load<'_> for SizeLimitsConfig {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        let tag = ok!(slice.load_u8());
        let mut result = Self {
            max_size: ok!(slice.load_u32()),
            max_depth: ok!(slice.load_u16()),
            max_msg_bits: ok!(slice.load_u32()),
            max_msg_cells: ok!(slice.load_u32()),
            max_library_cells: ok!(slice.load_u32()),
            max_vm_data_depth: ok!(slice.load_u16()),
            max_ext_msg_size: ok!(slice.load_u32()),
            max_ext_msg_depth: ok!(slice.load_u16()),
            ..Default::default()
        };
        match tag {
            0x01 => {}
            0x02 => {
                result.max_acc_state_cells = ok!(slice.load_u32());
                result.max_acc_state_bits = ok!(slice.load_u32());
            }
            _ => return Err(Error::InvalidTag),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellBuilder, EmptyCellContext};

    fn round_trip<T>(value: &T) -> T
    where
        T: Store + for<'a> Load<'a>,
    {
        let mut b = CellBuilder::new();
        value.store_into(&mut b, &mut EmptyCellContext).unwrap();
        b.build().unwrap().parse().unwrap()
    }

    #[test]
    fn gas_prices_round_trip() {
        let prices = GasLimitsPrices {
            gas_price: 655_360_000,
            gas_limit: 1_000_000,
            special_gas_limit: 100_000_000,
            gas_credit: 10_000,
            block_gas_limit: 10_000_000,
            freeze_due_limit: 100_000_000,
            delete_due_limit: 1_000_000_000,
            flat_gas_limit: 100,
            flat_gas_price: 40_000,
        };
        assert_eq!(round_trip(&prices), prices);
    }

    #[test]
    fn legacy_gas_prices_tag() {
        let mut b = CellBuilder::new();
        b.store_u8(0xdd).unwrap();
        for value in [1000u64, 500_000, 10_000, 5_000_000, 50, 100] {
            b.store_u64(value).unwrap();
        }
        let cell = b.build().unwrap();
        let prices = cell.parse::<GasLimitsPrices>().unwrap();
        assert_eq!(prices.gas_price, 1000);
        assert_eq!(prices.special_gas_limit, prices.gas_limit);
        assert_eq!(prices.flat_gas_limit, 0);
    }

    #[test]
    fn fwd_and_storage_prices_round_trip() {
        let fwd = MsgForwardPrices {
            lump_price: 400_000,
            bit_price: 26_214_400,
            cell_price: 2_621_440_000,
            ihr_price_factor: 98_304,
            first_frac: 21_845,
            next_frac: 21_845,
        };
        assert_eq!(round_trip(&fwd), fwd);

        let storage = StoragePrices {
            utime_since: 0,
            bit_price_ps: 1,
            cell_price_ps: 500,
            mc_bit_price_ps: 1000,
            mc_cell_price_ps: 500_000,
        };
        assert_eq!(round_trip(&storage), storage);
    }

    #[test]
    fn gas_fee_is_flat_below_the_prefix() {
        let prices = GasLimitsPrices {
            gas_price: 26_214_400, // 400 << 16
            gas_limit: 1_000_000,
            flat_gas_limit: 100,
            flat_gas_price: 40_000,
            ..Default::default()
        };
        assert_eq!(prices.compute_gas_fee(0), Tokens::new(40_000));
        assert_eq!(prices.compute_gas_fee(100), Tokens::new(40_000));
        assert_eq!(prices.compute_gas_fee(101), Tokens::new(40_400));
        assert_eq!(prices.compute_gas_fee(1100), Tokens::new(440_000));
    }

    #[test]
    fn gas_bought_caps_at_the_limit() {
        let prices = GasLimitsPrices {
            gas_price: 26_214_400,
            gas_limit: 1_000_000,
            flat_gas_limit: 100,
            flat_gas_price: 40_000,
            ..Default::default()
        };
        assert_eq!(prices.bought_gas_limit(Tokens::new(0)), 0);
        assert_eq!(prices.bought_gas_limit(Tokens::new(39_999)), 0);
        assert_eq!(prices.bought_gas_limit(Tokens::new(40_000)), 100);
        assert_eq!(prices.bought_gas_limit(Tokens::new(440_000)), 1100);
        assert_eq!(prices.bought_gas_limit(Tokens::MAX), 1_000_000);
    }

    #[test]
    fn fwd_fee_and_fractions() {
        let fwd = MsgForwardPrices {
            lump_price: 400_000,
            bit_price: 26_214_400,
            cell_price: 2_621_440_000,
            ihr_price_factor: 98_304,
            first_frac: 21_845,
            next_frac: 21_845,
        };
        // one cell, zero bits
        let fee = fwd.compute_fwd_fee(1, 0);
        assert_eq!(fee, Tokens::new(400_000 + 40_000));
        // the first-hop fraction is approximately a third
        let first = fwd.get_first_part(fee);
        assert_eq!(first, Tokens::new(440_000 * 21_845 >> 16));
        assert!(first < fee);
    }

    #[test]
    fn price_rounding_is_upward() {
        assert_eq!(shift_ceil_price(0), 0);
        assert_eq!(shift_ceil_price(1), 1);
        assert_eq!(shift_ceil_price(1 << 16), 1);
        assert_eq!(shift_ceil_price((1 << 16) + 1), 2);
    }
}
