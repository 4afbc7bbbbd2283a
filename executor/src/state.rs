use tonkit_types::cell::{Cell, CellSliceParts, HashBytes};
use tonkit_types::dict::Dict;
use tonkit_types::models::{
    AccountState, AccountStatus, CurrencyCollection, SimpleLib, StateInit, StdAddr, StorageInfo,
};
use tonkit_types::num::Tokens;
use tonkit_vm::BehaviourModifiers;

use crate::config::ParsedConfig;

/// Block-level environment shared by all transactions executed in it.
#[derive(Default, Clone)]
pub struct ExecutorParams {
    /// Public libraries visible to every contract.
    pub libraries: Dict<HashBytes, SimpleLib>,
    pub rand_seed: HashBytes,
    pub block_unixtime: u32,
    pub block_lt: u64,
    /// Verbosity of the per-run VM log (0 disables it).
    pub vm_verbosity: u8,
    pub modifiers: BehaviourModifiers,
}

/// Mutable account state threaded through the transaction phases.
///
/// Starts as a copy of the on-chain state and accumulates the effect of
/// each phase. The final values are serialized back into a shard account
/// and a transaction record.
pub struct ExecutorState<'a> {
    pub params: &'a ExecutorParams,
    pub config: &'a ParsedConfig,

    pub is_special: bool,

    pub address: StdAddr,
    pub storage_stat: StorageInfo,
    pub balance: CurrencyCollection,
    pub state: AccountState,

    pub orig_status: AccountStatus,
    pub end_status: AccountStatus,

    pub start_lt: u64,
    pub end_lt: u64,

    pub out_msgs: Vec<Cell>,
    pub total_fees: Tokens,

    /// Log collected by the last VM run.
    pub vm_log: String,
}

/// An inbound message after the receive phase.
pub struct ReceivedMessage {
    pub root: Cell,
    /// Parsed `StateInit` together with the hash of the cell it came from.
    pub init: Option<MsgStateInit>,
    pub body: CellSliceParts,

    pub is_external: bool,
    pub bounce_enabled: bool,

    /// Message value still attached to the message. Fees charged before the
    /// compute phase are subtracted from here.
    pub balance_remaining: CurrencyCollection,
}

pub struct MsgStateInit {
    pub hash: HashBytes,
    pub parsed: StateInit,
}

/// What triggered the transaction.
pub enum TransactionInput<'m> {
    Ordinary(&'m ReceivedMessage),
    TickTock { is_tock: bool },
}
