use std::rc::Rc;

use num_bigint::BigInt;
use num_bigint::Sign;
use sha2::{Digest, Sha256};
use tonkit_types::cell::{Cell, HashBytes};
use tonkit_types::models::{CurrencyCollection, IntAddr};
use tonkit_types::num::Tokens;

use crate::stack::{RcStackValue, Stack, Tuple};
use crate::util::OwnedCellSlice;

/// Values of the smart contract context tuple, `c7[0]`.
#[derive(Debug, Clone)]
pub struct SmcInfo {
    pub unix_time: u32,
    pub block_lt: u64,
    pub tx_lt: u64,
    pub rand_seed: HashBytes,
    pub balance: CurrencyCollection,
    pub addr: IntAddr,
    pub config: Option<Cell>,
    pub mycode: Cell,
    pub in_msg_value: CurrencyCollection,
    pub storage_fee: Tokens,
    pub prev_blocks: Option<RcStackValue>,
}

impl Default for SmcInfo {
    fn default() -> Self {
        Self {
            unix_time: 0,
            block_lt: 0,
            tx_lt: 0,
            rand_seed: HashBytes::ZERO,
            balance: CurrencyCollection::ZERO,
            addr: IntAddr::default(),
            config: None,
            mycode: Cell::empty_cell(),
            in_msg_value: CurrencyCollection::ZERO,
            storage_fee: Tokens::ZERO,
            prev_blocks: None,
        }
    }
}

impl SmcInfo {
    pub const MAGIC: u32 = 0x076ef1ea;

    pub const ACTIONS_IDX: usize = 1;
    pub const MSGS_SENT_IDX: usize = 2;
    pub const UNIX_TIME_IDX: usize = 3;
    pub const BLOCK_LT_IDX: usize = 4;
    pub const TX_LT_IDX: usize = 5;
    pub const RANDSEED_IDX: usize = 6;
    pub const BALANCE_IDX: usize = 7;
    pub const MYADDR_IDX: usize = 8;
    pub const CONFIG_IDX: usize = 9;
    pub const MYCODE_IDX: usize = 10;
    pub const IN_MSG_VALUE_IDX: usize = 11;
    pub const STORAGE_FEE_IDX: usize = 12;
    pub const PREV_BLOCKS_IDX: usize = 13;

    pub fn with_now(mut self, unix_time: u32) -> Self {
        self.unix_time = unix_time;
        self
    }

    pub fn with_block_lt(mut self, block_lt: u64) -> Self {
        self.block_lt = block_lt;
        self
    }

    pub fn with_tx_lt(mut self, tx_lt: u64) -> Self {
        self.tx_lt = tx_lt;
        self
    }

    pub fn with_rand_seed(mut self, rand_seed: HashBytes) -> Self {
        self.rand_seed = rand_seed;
        self
    }

    /// Seeds the random generator with `sha256(block_seed . account)`,
    /// a zero block seed is left as is.
    pub fn with_mixed_rand_seed(mut self, block_seed: &HashBytes, account: &HashBytes) -> Self {
        self.rand_seed = if *block_seed == HashBytes::ZERO {
            HashBytes::ZERO
        } else {
            let mut hasher = Sha256::new();
            hasher.update(block_seed.as_slice());
            hasher.update(account.as_slice());
            HashBytes(hasher.finalize().into())
        };
        self
    }

    pub fn with_account_balance(mut self, balance: CurrencyCollection) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_account_addr(mut self, addr: IntAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, config: Option<Cell>) -> Self {
        self.config = config;
        self
    }

    pub fn with_mycode(mut self, code: Cell) -> Self {
        self.mycode = code;
        self
    }

    pub fn with_msg_value(mut self, value: CurrencyCollection) -> Self {
        self.in_msg_value = value;
        self
    }

    pub fn with_storage_fee(mut self, fee: Tokens) -> Self {
        self.storage_fee = fee;
        self
    }

    fn balance_as_tuple(balance: &CurrencyCollection) -> RcStackValue {
        let tokens: RcStackValue =
            Rc::new(BigInt::from(balance.tokens.into_inner()));
        let other: RcStackValue = match &balance.other {
            Some(dict) => Rc::new(dict.clone()),
            None => Stack::make_null(),
        };
        Rc::new(vec![tokens, other])
    }

    fn myaddr_as_slice(&self) -> OwnedCellSlice {
        // a standard address always fits into a fresh builder
        match tonkit_types::cell::make_cell(&self.addr) {
            Ok(cell) => OwnedCellSlice::new(cell),
            Err(_) => OwnedCellSlice::default(),
        }
    }

    /// Builds the outer c7 tuple, `[t1]`.
    pub fn build_c7(&self) -> Rc<Tuple> {
        let t1: Tuple = vec![
            Rc::new(BigInt::from(Self::MAGIC)),
            Stack::make_zero(),
            Stack::make_zero(),
            Rc::new(BigInt::from(self.unix_time)),
            Rc::new(BigInt::from(self.block_lt)),
            Rc::new(BigInt::from(self.tx_lt)),
            Rc::new(BigInt::from_bytes_be(Sign::Plus, self.rand_seed.as_slice())),
            Self::balance_as_tuple(&self.balance),
            Rc::new(self.myaddr_as_slice()),
            match &self.config {
                Some(config) => Rc::new(config.clone()) as RcStackValue,
                None => Stack::make_null(),
            },
            Rc::new(self.mycode.clone()),
            Self::balance_as_tuple(&self.in_msg_value),
            Rc::new(BigInt::from(self.storage_fee.into_inner())),
            match &self.prev_blocks {
                Some(blocks) => blocks.clone(),
                None => Stack::make_null(),
            },
        ];
        Rc::new(vec![Rc::new(t1) as RcStackValue])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackValue;

    #[test]
    fn c7_layout() {
        let info = SmcInfo::default()
            .with_now(1700000000)
            .with_block_lt(1000)
            .with_tx_lt(1001)
            .with_account_balance(CurrencyCollection::new(1_000_000_000));

        let c7 = info.build_c7();
        assert_eq!(c7.len(), 1);
        let t1 = c7[0].as_tuple().unwrap();
        assert_eq!(t1.len(), 14);
        assert_eq!(t1[0].as_int(), Some(&BigInt::from(SmcInfo::MAGIC)));
        assert_eq!(
            t1[SmcInfo::UNIX_TIME_IDX].as_int(),
            Some(&BigInt::from(1700000000u32))
        );
        let balance = t1[SmcInfo::BALANCE_IDX].as_tuple().unwrap();
        assert_eq!(balance[0].as_int(), Some(&BigInt::from(1_000_000_000u64)));
    }

    #[test]
    fn mixed_rand_seed_is_stable() {
        let block_seed = HashBytes([1; 32]);
        let account = HashBytes([2; 32]);
        let a = SmcInfo::default().with_mixed_rand_seed(&block_seed, &account);
        let b = SmcInfo::default().with_mixed_rand_seed(&block_seed, &account);
        assert_eq!(a.rand_seed, b.rand_seed);
        assert_ne!(a.rand_seed, HashBytes::ZERO);

        let zero = SmcInfo::default().with_mixed_rand_seed(&HashBytes::ZERO, &account);
        assert_eq!(zero.rand_seed, HashBytes::ZERO);
    }
}
