//! Blockchain addresses.

use std::str::FromStr;

use crate::cell::{CellBuilder, CellContext, CellSlice, HashBytes, Load, Store};
use crate::error::Error;

/// Standard internal address: `addr_std$10` without anycast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StdAddr {
    pub workchain: i8,
    pub address: HashBytes,
}

impl StdAddr {
    pub const BITS: u16 = 2 + 1 + 8 + 256;

    pub const fn new(workchain: i8, address: HashBytes) -> Self {
        Self { workchain, address }
    }

    pub const fn is_masterchain(&self) -> bool {
        self.workchain == -1
    }
}

impl std::fmt::Display for StdAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.workchain, self.address)
    }
}

impl FromStr for StdAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((workchain, address)) = s.split_once(':') else {
            return Err(Error::InvalidData);
        };
        let Ok(workchain) = workchain.parse::<i8>() else {
            return Err(Error::InvalidData);
        };
        Ok(Self {
            workchain,
            address: ok!(HashBytes::from_str(address)),
        })
    }
}

impl Store for StdAddr {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        ok!(builder.store_small_uint(0b10, 2));
        ok!(builder.store_bit_zero()); // no anycast
        ok!(builder.store_u8(self.workchain as u8));
        builder.store_u256(&self.address)
    }
}

impl Load<'_> for StdAddr {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        if ok!(slice.load_small_uint(2)) != 0b10 {
            return Err(Error::InvalidTag);
        }
        if ok!(slice.load_bit()) {
            // anycast addresses were never activated on mainnet
            return Err(Error::InvalidData);
        }
        Ok(Self {
            workchain: ok!(slice.load_u8()) as i8,
            address: ok!(slice.load_u256()),
        })
    }
}

/// Internal address in any of its representations. Only `addr_std` is
/// meaningful today; the enum leaves room for `addr_var`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntAddr {
    Std(StdAddr),
}

impl IntAddr {
    pub fn as_std(&self) -> &StdAddr {
        match self {
            Self::Std(addr) => addr,
        }
    }

    pub fn workchain(&self) -> i8 {
        match self {
            Self::Std(addr) => addr.workchain,
        }
    }
}

impl Default for IntAddr {
    fn default() -> Self {
        Self::Std(StdAddr::default())
    }
}

impl From<StdAddr> for IntAddr {
    fn from(addr: StdAddr) -> Self {
        Self::Std(addr)
    }
}

impl std::fmt::Display for IntAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Std(addr) => std::fmt::Display::fmt(addr, f),
        }
    }
}

impl Store for IntAddr {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        match self {
            Self::Std(addr) => addr.store_into(builder, context),
        }
    }
}

impl Load<'_> for IntAddr {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self::Std(ok!(StdAddr::load_from(slice))))
    }
}

/// External address payload: `addr_extern$01 len:(## 9) data:(bits len)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtAddr {
    pub data_bit_len: u16,
    pub data: Vec<u8>,
}

impl Store for ExtAddr {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        if self.data_bit_len >= 512 {
            return Err(Error::IntOverflow);
        }
        ok!(builder.store_small_uint(0b01, 2));
        ok!(builder.store_uint(self.data_bit_len as u64, 9));
        builder.store_raw(&self.data, self.data_bit_len)
    }
}

impl Load<'_> for ExtAddr {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        if ok!(slice.load_small_uint(2)) != 0b01 {
            return Err(Error::InvalidTag);
        }
        let data_bit_len = ok!(slice.load_uint(9)) as u16;
        let mut data = vec![0; data_bit_len.div_ceil(8) as usize];
        ok!(slice.load_raw(&mut data, data_bit_len));
        Ok(Self { data_bit_len, data })
    }
}

/// `addr_none$00` or `addr_extern$01`, used for external message endpoints.
pub fn store_opt_ext_addr(
    addr: &Option<ExtAddr>,
    builder: &mut CellBuilder,
    context: &mut dyn CellContext,
) -> Result<(), Error> {
    match addr {
        Some(addr) => addr.store_into(builder, context),
        None => builder.store_small_uint(0b00, 2),
    }
}

pub fn load_opt_ext_addr(slice: &mut CellSlice<'_>) -> Result<Option<ExtAddr>, Error> {
    match ok!(slice.get_small_uint(0, 2)) {
        0b00 => {
            ok!(slice.skip_first(2, 0));
            Ok(None)
        }
        0b01 => Ok(Some(ok!(ExtAddr::load_from(slice)))),
        _ => Err(Error::InvalidTag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellBuilder, EmptyCellContext};

    #[test]
    fn std_addr_round_trip() {
        let addr = StdAddr::new(-1, HashBytes([0x33; 32]));
        let mut b = CellBuilder::new();
        addr.store_into(&mut b, &mut EmptyCellContext).unwrap();
        assert_eq!(b.size_bits(), StdAddr::BITS);
        let cell = b.build().unwrap();
        assert_eq!(cell.parse::<StdAddr>().unwrap(), addr);
    }

    #[test]
    fn parse_display_round_trip() {
        let addr: StdAddr =
            "0:3333333333333333333333333333333333333333333333333333333333333333"
                .parse()
                .unwrap();
        assert_eq!(addr.workchain, 0);
        assert_eq!(addr.address, HashBytes([0x33; 32]));
        assert_eq!(addr.to_string().parse::<StdAddr>().unwrap(), addr);
    }
}
