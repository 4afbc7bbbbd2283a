//! Offline transaction executor.
//!
//! Replays a single transaction against an account snapshot: the inbound
//! message (or a tick-tock trigger) goes through the receive, storage,
//! credit, compute, action and bounce phases, producing a serialized
//! transaction record and the updated shard account.

use anyhow::{Context, Result};
use tonkit_types::cell::{Cell, CellBuilder, EmptyCellContext, Store};
use tonkit_types::dict::Dict;
use tonkit_types::models::{
    Account, AccountState, AccountStatus, CurrencyCollection, HashUpdate, IntAddr, ShardAccount,
    StdAddr, StorageInfo, StorageUsed, Transaction, TxInfo, Uint15,
};
use tonkit_types::num::Tokens;

pub use self::config::ParsedConfig;
pub use self::error::{TxError, TxResult};
pub use self::state::{
    ExecutorParams, ExecutorState, MsgStateInit, ReceivedMessage, TransactionInput,
};
use self::util::{new_varuint56_truncate, ExtStorageStat, StorageStatLimits};

pub mod config;
pub mod error;
pub mod phase;
pub mod state;
mod tx;
mod util;

/// Transaction executor over a parsed config and block-level params.
pub struct Executor<'a> {
    params: &'a ExecutorParams,
    config: &'a ParsedConfig,
}

/// Everything produced by a single executed transaction.
#[derive(Debug)]
pub struct ExecutorOutput {
    /// Serialized `Transaction` record.
    pub transaction: Cell,
    pub transaction_meta: TransactionMeta,
    /// Account state after the transaction.
    pub new_state: ShardAccount,
    pub vm_log: String,
}

/// Parsed highlights of the transaction for callers which do not want to
/// unpack the record cell.
#[derive(Debug)]
pub struct TransactionMeta {
    pub lt: u64,
    pub now: u32,
    pub total_fees: Tokens,
    /// Exit code of the compute phase, if it ran.
    pub exit_code: Option<i32>,
    pub aborted: bool,
    pub destroyed: bool,
    pub out_msgs: Vec<Cell>,
}

impl<'a> Executor<'a> {
    pub fn new(params: &'a ExecutorParams, config: &'a ParsedConfig) -> Self {
        Self { params, config }
    }

    /// Executes an ordinary transaction triggered by an inbound message.
    pub fn run_ordinary(
        &self,
        address: &StdAddr,
        is_external: bool,
        msg_root: Cell,
        account: &ShardAccount,
    ) -> TxResult<ExecutorOutput> {
        let mut state = self.begin(address, account).map_err(TxError::Fatal)?;
        let info = state.run_ordinary_transaction(is_external, msg_root.clone())?;
        self.finalize(state, account, Some(msg_root), TxInfo::Ordinary(info))
            .map_err(TxError::Fatal)
    }

    /// Executes a tick or tock transaction on a special account.
    pub fn run_ticktock(
        &self,
        address: &StdAddr,
        is_tock: bool,
        account: &ShardAccount,
    ) -> TxResult<ExecutorOutput> {
        let mut state = self.begin(address, account).map_err(TxError::Fatal)?;
        let info = state.run_tick_tock_transaction(is_tock)?;
        self.finalize(state, account, None, TxInfo::TickTock(info))
            .map_err(TxError::Fatal)
    }

    fn begin(&self, address: &StdAddr, prev: &ShardAccount) -> Result<ExecutorState<'a>> {
        let (storage_stat, balance, acc_state, orig_status, end_status) = match &prev.account {
            Some(account) => {
                anyhow::ensure!(
                    account.address.as_std() == address,
                    "account address mismatch"
                );
                let status = match &account.state {
                    AccountState::Active(..) => AccountStatus::Active,
                    AccountState::Frozen(..) => AccountStatus::Frozen,
                    AccountState::Uninit => AccountStatus::Uninit,
                };
                (
                    account.storage_stat.clone(),
                    account.balance.clone(),
                    account.state.clone(),
                    status,
                    status,
                )
            }
            // a missing account becomes a stub which may be initialized
            // or credited by this transaction
            None => (
                StorageInfo::default(),
                CurrencyCollection::ZERO,
                AccountState::Uninit,
                AccountStatus::NotExists,
                AccountStatus::Uninit,
            ),
        };

        let start_lt = std::cmp::max(self.params.block_lt, prev.last_trans_lt + 1);

        Ok(ExecutorState {
            params: self.params,
            config: self.config,
            is_special: false,
            address: address.clone(),
            storage_stat,
            balance,
            state: acc_state,
            orig_status,
            end_status,
            start_lt,
            end_lt: start_lt + 1,
            out_msgs: Vec::new(),
            total_fees: Tokens::ZERO,
            vm_log: String::new(),
        })
    }

    fn finalize(
        &self,
        mut state: ExecutorState<'_>,
        prev: &ShardAccount,
        in_msg: Option<Cell>,
        info: TxInfo,
    ) -> Result<ExecutorOutput> {
        let (exit_code, aborted, destroyed) = match &info {
            TxInfo::Ordinary(info) => (
                compute_exit_code(&info.compute_phase),
                info.aborted,
                info.destroyed,
            ),
            TxInfo::TickTock(info) => (
                compute_exit_code(&info.compute_phase),
                info.aborted,
                info.destroyed,
            ),
        };

        let old_account_cell = build_account_cell(&prev.account)?;

        let new_account = match state.end_status {
            AccountStatus::NotExists => None,
            status => {
                let acc_state = std::mem::replace(&mut state.state, AccountState::Uninit);
                let acc_state = if status == AccountStatus::Frozen {
                    match acc_state {
                        AccountState::Active(state_init) => {
                            let mut b = CellBuilder::new();
                            state_init.store_into(&mut b, &mut EmptyCellContext)?;
                            AccountState::Frozen(*b.build()?.repr_hash())
                        }
                        other => other,
                    }
                } else {
                    acc_state
                };

                // refresh the storage stats the next storage phase is
                // charged for
                let state_cell = {
                    let mut b = CellBuilder::new();
                    acc_state.store_into(&mut b, &mut EmptyCellContext)?;
                    b.build()?
                };
                let mut stats = ExtStorageStat::with_limits(StorageStatLimits {
                    bit_count: u32::MAX,
                    cell_count: u32::MAX,
                });
                if stats.add_cell(&state_cell) {
                    let stats = stats.stats();
                    state.storage_stat.used = StorageUsed {
                        cells: new_varuint56_truncate(stats.cell_count),
                        bits: new_varuint56_truncate(stats.bit_count),
                    };
                }
                state.storage_stat.due_payment = state.storage_stat.due_payment.filter(|t| !t.is_zero());

                Some(Account {
                    address: IntAddr::Std(state.address.clone()),
                    storage_stat: state.storage_stat.clone(),
                    last_trans_lt: state.end_lt,
                    balance: state.balance.clone(),
                    state: acc_state,
                })
            }
        };
        let new_account_cell = build_account_cell(&new_account)?;

        let mut out_msgs = Dict::<Uint15, Cell>::new();
        for (i, msg) in state.out_msgs.iter().enumerate() {
            out_msgs.set(&Uint15::new(i as u16), msg)?;
        }

        let info_cell = {
            let mut b = CellBuilder::new();
            info.store_into(&mut b, &mut EmptyCellContext)?;
            b.build()?
        };

        let transaction = Transaction {
            account: state.address.address,
            lt: state.start_lt,
            prev_trans_hash: prev.last_trans_hash,
            prev_trans_lt: prev.last_trans_lt,
            now: self.params.block_unixtime,
            out_msg_count: state.out_msgs.len() as u16,
            orig_status: state.orig_status,
            end_status: state.end_status,
            in_msg,
            out_msgs,
            total_fees: CurrencyCollection::new(state.total_fees.into_inner()),
            state_update: HashUpdate {
                old: *old_account_cell.repr_hash(),
                new: *new_account_cell.repr_hash(),
            },
            info: info_cell,
        };

        let tx_cell = {
            let mut b = CellBuilder::new();
            transaction
                .store_into(&mut b, &mut EmptyCellContext)
                .context("failed to serialize the transaction")?;
            b.build()?
        };

        Ok(ExecutorOutput {
            transaction_meta: TransactionMeta {
                lt: state.start_lt,
                now: self.params.block_unixtime,
                total_fees: state.total_fees,
                exit_code,
                aborted,
                destroyed,
                out_msgs: state.out_msgs,
            },
            new_state: ShardAccount {
                account: new_account,
                last_trans_hash: *tx_cell.repr_hash(),
                last_trans_lt: state.start_lt,
            },
            transaction: tx_cell,
            vm_log: std::mem::take(&mut state.vm_log),
        })
    }
}

fn compute_exit_code(phase: &tonkit_types::models::ComputePhase) -> Option<i32> {
    match phase {
        tonkit_types::models::ComputePhase::Executed(phase) => Some(phase.exit_code),
        tonkit_types::models::ComputePhase::Skipped(_) => None,
    }
}

fn build_account_cell(account: &Option<Account>) -> Result<Cell> {
    let mut b = CellBuilder::new();
    match account {
        Some(account) => account.store_into(&mut b, &mut EmptyCellContext)?,
        // account_none$0
        None => b.store_bit_zero()?,
    }
    Ok(b.build()?)
}

#[cfg(test)]
pub(crate) mod tests {
    use tonkit_types::cell::{CellBuilder, EmptyCellContext, HashBytes, Load, Store};
    use tonkit_types::dict::Dict;
    use tonkit_types::models::{
        BouncePhase, ComputePhase, ComputePhaseSkipReason, GasLimitsPrices, IntMsgInfo,
        MsgForwardPrices, MsgInfo, StateInit, StoragePrices, TxInfo,
    };

    use super::*;

    pub fn make_default_config() -> ParsedConfig {
        fn param<T: Store>(value: &T) -> Cell {
            let mut b = CellBuilder::new();
            value.store_into(&mut b, &mut EmptyCellContext).unwrap();
            b.build().unwrap()
        }

        let gas_prices = GasLimitsPrices {
            gas_price: 26_214_400,
            gas_limit: 1_000_000,
            special_gas_limit: 100_000_000,
            gas_credit: 10_000,
            block_gas_limit: 10_000_000,
            freeze_due_limit: 100_000_000,
            delete_due_limit: 1_000_000_000,
            flat_gas_limit: 100,
            flat_gas_price: 40_000,
        };
        let fwd_prices = MsgForwardPrices {
            lump_price: 400_000,
            bit_price: 26_214_400,
            cell_price: 2_621_440_000,
            ihr_price_factor: 98_304,
            first_frac: 21_845,
            next_frac: 21_845,
        };
        let storage_prices = StoragePrices {
            utime_since: 0,
            bit_price_ps: 1,
            cell_price_ps: 500,
            mc_bit_price_ps: 1000,
            mc_cell_price_ps: 500_000,
        };

        let mut storage_dict = Dict::<u32, StoragePrices>::new();
        storage_dict.set(&0, &storage_prices).unwrap();

        let mut dict = Dict::<u32, Cell>::new();
        dict.set(&18, storage_dict.root().as_ref().unwrap()).unwrap();
        dict.set(&19, &{
            let mut b = CellBuilder::new();
            b.store_u32(42).unwrap();
            b.build().unwrap()
        })
        .unwrap();
        dict.set(&20, &param(&gas_prices)).unwrap();
        dict.set(&21, &param(&gas_prices)).unwrap();
        dict.set(&24, &param(&fwd_prices)).unwrap();
        dict.set(&25, &param(&fwd_prices)).unwrap();

        ParsedConfig::parse(dict.root().as_ref().unwrap().clone()).unwrap()
    }

    pub fn make_default_params() -> ExecutorParams {
        ExecutorParams {
            block_unixtime: 1_700_000_000,
            block_lt: 1_000_000,
            ..Default::default()
        }
    }

    pub fn make_message(info: MsgInfo, init: Option<StateInit>, body: Option<CellBuilder>) -> Cell {
        let mut b = CellBuilder::new();
        info.store_into(&mut b, &mut EmptyCellContext).unwrap();
        match init {
            Some(init) => {
                // init:(Maybe (Either StateInit ^StateInit)) -> just right$1
                b.store_bit_one().unwrap();
                b.store_bit_one().unwrap();
                let mut child = CellBuilder::new();
                init.store_into(&mut child, &mut EmptyCellContext).unwrap();
                b.store_reference(child.build().unwrap()).unwrap();
            }
            None => b.store_bit_zero().unwrap(),
        }
        match body {
            Some(body) => {
                // body:(Either X ^X) -> right$1
                b.store_bit_one().unwrap();
                b.store_reference(body.build().unwrap()).unwrap();
            }
            None => b.store_bit_zero().unwrap(),
        }
        b.build().unwrap()
    }

    pub fn make_uninit_account(address: &StdAddr, balance: u128) -> ShardAccount {
        ShardAccount {
            account: Some(Account {
                address: address.clone().into(),
                storage_stat: StorageInfo::default(),
                last_trans_lt: 0,
                balance: CurrencyCollection::new(balance),
                state: AccountState::Uninit,
            }),
            last_trans_hash: HashBytes([0x11; 32]),
            last_trans_lt: 1000,
        }
    }

    #[test]
    fn transfer_to_missing_account_creates_a_stub() {
        let config = make_default_config();
        let params = make_default_params();

        let src = StdAddr::new(0, HashBytes([0x01; 32]));
        let dst = StdAddr::new(0, HashBytes([0x02; 32]));

        let msg = make_message(
            MsgInfo::Int(IntMsgInfo {
                src: src.clone().into(),
                dst: dst.clone().into(),
                value: CurrencyCollection::new(1_000_000_000),
                bounce: false,
                created_lt: 500,
                ..Default::default()
            }),
            None,
            None,
        );

        let output = Executor::new(&params, &config)
            .run_ordinary(&dst, false, msg, &ShardAccount::EMPTY)
            .unwrap();

        // the value stays on the new uninitialized account
        let account = output.new_state.account.expect("account must exist");
        assert_eq!(account.balance.tokens, Tokens::new(1_000_000_000));
        assert_eq!(account.state, AccountState::Uninit);
        assert_eq!(account.last_trans_lt, output.transaction_meta.lt + 1);

        let tx = output.transaction.parse::<Transaction>().unwrap();
        assert_eq!(tx.orig_status, AccountStatus::NotExists);
        assert_eq!(tx.end_status, AccountStatus::Uninit);
        assert_eq!(tx.out_msg_count, 0);
        assert!(tx.in_msg.is_some());
        assert_eq!(output.new_state.last_trans_hash, *output.transaction.repr_hash());

        let TxInfo::Ordinary(info) = tx.load_info().unwrap() else {
            panic!("expected an ordinary transaction");
        };
        assert!(info.credit_first);
        assert!(info.aborted);
        assert!(info.bounce_phase.is_none());
        assert!(matches!(
            info.compute_phase,
            ComputePhase::Skipped(ComputePhaseSkipReason::NoState)
        ));
    }

    #[test]
    fn transfer_with_bounce_returns_the_value() {
        let config = make_default_config();
        let params = make_default_params();

        let src = StdAddr::new(0, HashBytes([0x01; 32]));
        let dst = StdAddr::new(0, HashBytes([0x02; 32]));

        let msg = make_message(
            MsgInfo::Int(IntMsgInfo {
                src: src.clone().into(),
                dst: dst.clone().into(),
                value: CurrencyCollection::new(1_000_000_000),
                bounce: true,
                created_lt: 500,
                ..Default::default()
            }),
            None,
            None,
        );

        let output = Executor::new(&params, &config)
            .run_ordinary(&dst, false, msg, &ShardAccount::EMPTY)
            .unwrap();

        // nothing of the message value stays on the account
        let account = output.new_state.account.expect("account must exist");
        assert_eq!(account.balance.tokens, Tokens::ZERO);
        assert_eq!(output.transaction_meta.out_msgs.len(), 1);

        let tx = output.transaction.parse::<Transaction>().unwrap();
        assert_eq!(tx.out_msg_count, 1);

        let TxInfo::Ordinary(info) = tx.load_info().unwrap() else {
            panic!("expected an ordinary transaction");
        };
        assert!(!info.credit_first);
        let Some(BouncePhase::Executed { msg_fees, fwd_fees, .. }) = info.bounce_phase else {
            panic!("expected an executed bounce phase");
        };

        // the full forwarding fee is split between this transaction and
        // the bounced message
        let full_fwd_fee = config.fwd_prices.compute_fwd_fee(0, 0);
        assert_eq!(msg_fees.saturating_add(fwd_fees), full_fwd_fee);
        assert_eq!(tx.total_fees.tokens, msg_fees);

        // the bounced message carries the rest of the value
        let bounced = output.transaction_meta.out_msgs.first().unwrap();
        let mut cs = bounced.as_slice().unwrap();
        let MsgInfo::Int(info) = MsgInfo::load_from(&mut cs).unwrap() else {
            panic!("expected an internal message");
        };
        assert!(info.bounced);
        assert!(!info.bounce);
        assert_eq!(*info.dst.as_std(), src);
        assert_eq!(*info.src.as_std(), dst);
        assert_eq!(
            info.value.tokens,
            Tokens::new(1_000_000_000).saturating_sub(full_fwd_fee)
        );
    }

    #[test]
    fn external_message_to_missing_account_is_skipped() {
        let config = make_default_config();
        let params = make_default_params();

        let dst = StdAddr::new(0, HashBytes([0x02; 32]));
        let msg = make_message(
            MsgInfo::ExtIn(tonkit_types::models::ExtInMsgInfo {
                src: None,
                dst: dst.clone().into(),
                import_fee: Tokens::ZERO,
            }),
            None,
            None,
        );

        let err = Executor::new(&params, &config)
            .run_ordinary(&dst, true, msg, &ShardAccount::EMPTY)
            .unwrap_err();
        assert!(matches!(err, TxError::Skipped));
    }

    #[test]
    fn ticktock_skips_inactive_accounts() {
        let config = make_default_config();
        let params = make_default_params();

        let addr = StdAddr::new(-1, HashBytes([0x03; 32]));
        let account = make_uninit_account(&addr, 1_000_000_000);

        let err = Executor::new(&params, &config)
            .run_ticktock(&addr, false, &account)
            .unwrap_err();
        assert!(matches!(err, TxError::Skipped));
    }
}
