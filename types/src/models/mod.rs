//! TL-B models for accounts, messages, transactions and config records.

pub use self::account::{
    Account, AccountState, AccountStatus, CurrencyCollection, ShardAccount, SimpleLib, StateInit,
    StorageInfo, StorageUsed, TickTock,
};
pub use self::address::{ExtAddr, IntAddr, StdAddr};
pub use self::config::{
    shift_ceil_price, GasLimitsPrices, MsgForwardPrices, SizeLimitsConfig, StoragePrices,
};
pub use self::message::{
    ExtInMsgInfo, ExtOutMsgInfo, IntMsgInfo, MessageLayout, MsgInfo, OwnedMessage,
};
pub use self::transaction::{
    AccStatusChange, ActionPhase, BouncePhase, ComputePhase, ComputePhaseSkipReason, CreditPhase,
    ExecutedComputePhase, HashUpdate, OrdinaryTxInfo, StoragePhase, StorageUsedShort,
    TickTockTxInfo, Transaction, TxInfo, Uint15,
};

mod account;
mod address;
mod config;
mod message;
mod transaction;
