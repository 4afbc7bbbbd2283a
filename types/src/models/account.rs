//! Account state and its storage envelope.

use crate::cell::{Cell, CellBuilder, CellContext, CellSlice, HashBytes, Load, Store};
use crate::dict::Dict;
use crate::error::Error;
use crate::models::address::IntAddr;
use crate::num::{Tokens, VarUint56};

/// Native token amount plus the (unused here) extra-currency dictionary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CurrencyCollection {
    pub tokens: Tokens,
    pub other: Option<Cell>,
}

impl CurrencyCollection {
    pub const ZERO: Self = Self {
        tokens: Tokens::ZERO,
        other: None,
    };

    pub const fn new(tokens: u128) -> Self {
        Self {
            tokens: Tokens::new(tokens),
            other: None,
        }
    }
}

impl From<Tokens> for CurrencyCollection {
    fn from(tokens: Tokens) -> Self {
        Self {
            tokens,
            other: None,
        }
    }
}

impl Store for CurrencyCollection {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(self.tokens.store_into(builder, context));
        match &self.other {
            Some(dict) => {
                ok!(builder.store_bit_one());
                builder.store_reference(dict.clone())
            }
            None => builder.store_bit_zero(),
        }
    }
}

impl Load<'_> for CurrencyCollection {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self {
            tokens: ok!(Tokens::load_from(slice)),
            other: ok!(Option::<Cell>::load_from(slice)),
        })
    }
}

/// Account status, also used as transaction `orig_status`/`end_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Uninit,
    Frozen,
    Active,
    NotExists,
}

impl Store for AccountStatus {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        let bits = match self {
            Self::Uninit => 0b00,
            Self::Frozen => 0b01,
            Self::Active => 0b10,
            Self::NotExists => 0b11,
        };
        builder.store_small_uint(bits, 2)
    }
}

impl Load<'_> for AccountStatus {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(match ok!(slice.load_small_uint(2)) {
            0b00 => Self::Uninit,
            0b01 => Self::Frozen,
            0b10 => Self::Active,
            _ => Self::NotExists,
        })
    }
}

/// Tick-tock flags of special (system) accounts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickTock {
    pub tick: bool,
    pub tock: bool,
}

impl Store for TickTock {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        ok!(builder.store_bit(self.tick));
        builder.store_bit(self.tock)
    }
}

impl Load<'_> for TickTock {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self {
            tick: ok!(slice.load_bit()),
            tock: ok!(slice.load_bit()),
        })
    }
}

/// A single entry of an account's public library dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleLib {
    pub public: bool,
    pub root: Cell,
}

impl Store for SimpleLib {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        ok!(builder.store_bit(self.public));
        builder.store_reference(self.root.clone())
    }
}

impl Load<'_> for SimpleLib {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self {
            public: ok!(slice.load_bit()),
            root: ok!(slice.load_reference_cloned()),
        })
    }
}

/// Deployed contract image: code, data and per-account libraries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateInit {
    pub split_depth: Option<u8>,
    pub special: Option<TickTock>,
    pub code: Option<Cell>,
    pub data: Option<Cell>,
    pub libraries: Dict<HashBytes, SimpleLib>,
}

impl Store for StateInit {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        match self.split_depth {
            Some(depth) => {
                ok!(builder.store_bit_one());
                ok!(builder.store_small_uint(depth, 5));
            }
            None => ok!(builder.store_bit_zero()),
        }
        ok!(self.special.store_into(builder, context));
        ok!(self.code.store_into(builder, context));
        ok!(self.data.store_into(builder, context));
        self.libraries.store_into(builder, context)
    }
}

impl Load<'_> for StateInit {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        let split_depth = match ok!(slice.load_bit()) {
            true => Some(ok!(slice.load_small_uint(5))),
            false => None,
        };
        Ok(Self {
            split_depth,
            special: ok!(Option::<TickTock>::load_from(slice)),
            code: ok!(Option::<Cell>::load_from(slice)),
            data: ok!(Option::<Cell>::load_from(slice)),
            libraries: ok!(Dict::load_from(slice)),
        })
    }
}

/// `account_active$1`, `account_uninit$00` or `account_frozen$01`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountState {
    Uninit,
    Active(StateInit),
    Frozen(HashBytes),
}

impl AccountState {
    pub const fn status(&self) -> AccountStatus {
        match self {
            Self::Uninit => AccountStatus::Uninit,
            Self::Active(_) => AccountStatus::Active,
            Self::Frozen(_) => AccountStatus::Frozen,
        }
    }
}

impl Store for AccountState {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        match self {
            Self::Uninit => builder.store_small_uint(0b00, 2),
            Self::Active(state_init) => {
                ok!(builder.store_bit_one());
                state_init.store_into(builder, context)
            }
            Self::Frozen(state_hash) => {
                ok!(builder.store_small_uint(0b01, 2));
                builder.store_u256(state_hash)
            }
        }
    }
}

impl Load<'_> for AccountState {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(if ok!(slice.load_bit()) {
            Self::Active(ok!(StateInit::load_from(slice)))
        } else if ok!(slice.load_bit()) {
            Self::Frozen(ok!(slice.load_u256()))
        } else {
            Self::Uninit
        })
    }
}

/// Storage statistics tracked per account.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageUsed {
    pub cells: VarUint56,
    pub bits: VarUint56,
}

impl Store for StorageUsed {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(self.cells.store_into(builder, context));
        self.bits.store_into(builder, context)
    }
}

impl Load<'_> for StorageUsed {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self {
            cells: ok!(VarUint56::load_from(slice)),
            bits: ok!(VarUint56::load_from(slice)),
        })
    }
}

/// `storage_info$_ used:StorageUsed storage_extra:... last_paid:uint32
/// due_payment:(Maybe Grams)`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub used: StorageUsed,
    pub last_paid: u32,
    pub due_payment: Option<Tokens>,
}

impl Store for StorageInfo {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(self.used.store_into(builder, context));
        // storage_extra_none$000
        ok!(builder.store_small_uint(0b000, 3));
        ok!(builder.store_u32(self.last_paid));
        self.due_payment.store_into(builder, context)
    }
}

impl Load<'_> for StorageInfo {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        let used = ok!(StorageUsed::load_from(slice));
        match ok!(slice.load_small_uint(3)) {
            0b000 => {}
            0b001 => {
                // storage_extra_info$001 dict_hash:uint256
                ok!(slice.skip_first(256, 0));
            }
            _ => return Err(Error::InvalidTag),
        }
        Ok(Self {
            used,
            last_paid: ok!(slice.load_u32()),
            due_payment: ok!(Option::<Tokens>::load_from(slice)),
        })
    }
}

/// A deployed (or frozen, or uninitialized) account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub address: IntAddr,
    pub storage_stat: StorageInfo,
    pub last_trans_lt: u64,
    pub balance: CurrencyCollection,
    pub state: AccountState,
}

impl Store for Account {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_bit_one()); // account$1
        ok!(self.address.store_into(builder, context));
        ok!(self.storage_stat.store_into(builder, context));
        ok!(builder.store_u64(self.last_trans_lt));
        ok!(self.balance.store_into(builder, context));
        self.state.store_into(builder, context)
    }
}

impl Load<'_> for Account {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        if !ok!(slice.load_bit()) {
            return Err(Error::InvalidTag);
        }
        Ok(Self {
            address: ok!(IntAddr::load_from(slice)),
            storage_stat: ok!(StorageInfo::load_from(slice)),
            last_trans_lt: ok!(slice.load_u64()),
            balance: ok!(CurrencyCollection::load_from(slice)),
            state: ok!(AccountState::load_from(slice)),
        })
    }
}

/// Account slot of a shard state: the account cell (possibly
/// `account_none$0`) plus the hash and LT of its last transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAccount {
    pub account: Option<Account>,
    pub last_trans_hash: HashBytes,
    pub last_trans_lt: u64,
}

impl ShardAccount {
    pub const EMPTY: Self = Self {
        account: None,
        last_trans_hash: HashBytes::ZERO,
        last_trans_lt: 0,
    };
}

impl Store for ShardAccount {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        let mut account = CellBuilder::new();
        match &self.account {
            Some(state) => ok!(state.store_into(&mut account, context)),
            None => ok!(account.store_bit_zero()),
        }
        ok!(builder.store_reference(ok!(account.build_ext(context))));
        ok!(builder.store_u256(&self.last_trans_hash));
        builder.store_u64(self.last_trans_lt)
    }
}

impl Load<'_> for ShardAccount {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        let account_cell = ok!(slice.load_reference());
        let mut cs = ok!(account_cell.as_slice());
        let account = if ok!(cs.get_bit(0)) {
            Some(ok!(Account::load_from(&mut cs)))
        } else {
            None
        };
        Ok(Self {
            account,
            last_trans_hash: ok!(slice.load_u256()),
            last_trans_lt: ok!(slice.load_u64()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::EmptyCellContext;
    use crate::models::address::StdAddr;

    fn round_trip<T>(value: &T) -> T
    where
        T: Store + for<'a> Load<'a>,
    {
        let mut b = CellBuilder::new();
        value.store_into(&mut b, &mut EmptyCellContext).unwrap();
        b.build().unwrap().parse().unwrap()
    }

    #[test]
    fn active_account_round_trip() {
        let account = Account {
            address: StdAddr::new(0, HashBytes([0x77; 32])).into(),
            storage_stat: StorageInfo {
                used: StorageUsed {
                    cells: VarUint56::new(10),
                    bits: VarUint56::new(2000),
                },
                last_paid: 1_700_000_000,
                due_payment: None,
            },
            last_trans_lt: 100_500,
            balance: CurrencyCollection::new(1_000_000_000),
            state: AccountState::Active(StateInit {
                split_depth: None,
                special: None,
                code: Some(Cell::empty_cell()),
                data: Some(Cell::empty_cell()),
                libraries: Dict::new(),
            }),
        };
        assert_eq!(round_trip(&account), account);
    }

    #[test]
    fn frozen_and_uninit_states() {
        for state in [
            AccountState::Uninit,
            AccountState::Frozen(HashBytes([0xaa; 32])),
        ] {
            assert_eq!(round_trip(&state), state);
        }
    }

    #[test]
    fn shard_account_with_empty_account() {
        let shard_account = ShardAccount::EMPTY;
        assert_eq!(round_trip(&shard_account), shard_account);
    }
}
