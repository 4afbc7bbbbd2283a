//! Transactions and their phase descriptions.

use crate::cell::{Cell, CellBuilder, CellContext, CellSlice, HashBytes, Load, Store};
use crate::dict::{Dict, DictKey};
use crate::error::Error;
use crate::models::account::{AccountStatus, CurrencyCollection};
use crate::num::{Tokens, VarUint24, VarUint56};

/// 15-bit output message index.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Uint15(u16);

impl Uint15 {
    pub const fn new(value: u16) -> Self {
        Self(value & 0x7fff)
    }

    pub const fn into_inner(self) -> u16 {
        self.0
    }
}

impl DictKey for Uint15 {
    const BITS: u16 = 15;

    fn serialize_key(&self, builder: &mut CellBuilder) -> Result<(), Error> {
        builder.store_uint(self.0 as u64, 15)
    }

    fn deserialize_key(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self(ok!(slice.load_uint(15)) as u16))
    }
}

/// `update_hashes#72`: account state hash before and after the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashUpdate {
    pub old: HashBytes,
    pub new: HashBytes,
}

impl Store for HashUpdate {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        ok!(builder.store_u8(0x72));
        ok!(builder.store_u256(&self.old));
        builder.store_u256(&self.new)
    }
}

impl Load<'_> for HashUpdate {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        if ok!(slice.load_u8()) != 0x72 {
            return Err(Error::InvalidTag);
        }
        Ok(Self {
            old: ok!(slice.load_u256()),
            new: ok!(slice.load_u256()),
        })
    }
}

/// `acst_unchanged$0`, `acst_frozen$10`, `acst_deleted$11`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AccStatusChange {
    #[default]
    Unchanged,
    Frozen,
    Deleted,
}

impl Store for AccStatusChange {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        match self {
            Self::Unchanged => builder.store_bit_zero(),
            Self::Frozen => builder.store_small_uint(0b10, 2),
            Self::Deleted => builder.store_small_uint(0b11, 2),
        }
    }
}

impl Load<'_> for AccStatusChange {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(if !ok!(slice.load_bit()) {
            Self::Unchanged
        } else if !ok!(slice.load_bit()) {
            Self::Frozen
        } else {
            Self::Deleted
        })
    }
}

/// Storage phase outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoragePhase {
    pub storage_fees_collected: Tokens,
    pub storage_fees_due: Option<Tokens>,
    pub status_change: AccStatusChange,
}

impl Store for StoragePhase {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(self.storage_fees_collected.store_into(builder, context));
        ok!(self.storage_fees_due.store_into(builder, context));
        self.status_change.store_into(builder, context)
    }
}

impl Load<'_> for StoragePhase {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self {
            storage_fees_collected: ok!(Tokens::load_from(slice)),
            storage_fees_due: ok!(Option::<Tokens>::load_from(slice)),
            status_change: ok!(AccStatusChange::load_from(slice)),
        })
    }
}

/// Credit phase outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CreditPhase {
    pub due_fees_collected: Option<Tokens>,
    pub credit: CurrencyCollection,
}

impl Store for CreditPhase {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(self.due_fees_collected.store_into(builder, context));
        self.credit.store_into(builder, context)
    }
}

impl Load<'_> for CreditPhase {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self {
            due_fees_collected: ok!(Option::<Tokens>::load_from(slice)),
            credit: ok!(CurrencyCollection::load_from(slice)),
        })
    }
}

/// Why the compute phase never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputePhaseSkipReason {
    NoState,
    BadState,
    NoGas,
}

/// Executed compute phase details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedComputePhase {
    pub success: bool,
    pub msg_state_used: bool,
    pub account_activated: bool,
    pub gas_fees: Tokens,
    pub gas_used: VarUint56,
    pub gas_limit: VarUint56,
    pub gas_credit: Option<VarUint24>,
    pub mode: i8,
    pub exit_code: i32,
    pub exit_arg: Option<i32>,
    pub vm_steps: u32,
    pub vm_init_state_hash: HashBytes,
    pub vm_final_state_hash: HashBytes,
}

/// `tr_phase_compute_skipped$0` or `tr_phase_compute_vm$1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputePhase {
    Skipped(ComputePhaseSkipReason),
    Executed(ExecutedComputePhase),
}

impl Store for ComputePhase {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        match self {
            Self::Skipped(reason) => {
                ok!(builder.store_bit_zero());
                builder.store_small_uint(
                    match reason {
                        ComputePhaseSkipReason::NoState => 0b00,
                        ComputePhaseSkipReason::BadState => 0b01,
                        ComputePhaseSkipReason::NoGas => 0b10,
                    },
                    2,
                )
            }
            Self::Executed(phase) => {
                ok!(builder.store_bit_one());
                ok!(builder.store_bit(phase.success));
                ok!(builder.store_bit(phase.msg_state_used));
                ok!(builder.store_bit(phase.account_activated));
                ok!(phase.gas_fees.store_into(builder, context));

                let mut child = CellBuilder::new();
                ok!(phase.gas_used.store_into(&mut child, context));
                ok!(phase.gas_limit.store_into(&mut child, context));
                match phase.gas_credit {
                    Some(credit) => {
                        ok!(child.store_bit_one());
                        ok!(credit.store_into(&mut child, context));
                    }
                    None => ok!(child.store_bit_zero()),
                }
                ok!(child.store_u8(phase.mode as u8));
                ok!(child.store_u32(phase.exit_code as u32));
                match phase.exit_arg {
                    Some(arg) => {
                        ok!(child.store_bit_one());
                        ok!(child.store_u32(arg as u32));
                    }
                    None => ok!(child.store_bit_zero()),
                }
                ok!(child.store_u32(phase.vm_steps));
                ok!(child.store_u256(&phase.vm_init_state_hash));
                ok!(child.store_u256(&phase.vm_final_state_hash));
                builder.store_reference(ok!(child.build_ext(context)))
            }
        }
    }
}

impl Load<'_> for ComputePhase {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        if !ok!(slice.load_bit()) {
            return Ok(Self::Skipped(match ok!(slice.load_small_uint(2)) {
                0b00 => ComputePhaseSkipReason::NoState,
                0b01 => ComputePhaseSkipReason::BadState,
                0b10 => ComputePhaseSkipReason::NoGas,
                _ => return Err(Error::InvalidTag),
            }));
        }
        let success = ok!(slice.load_bit());
        let msg_state_used = ok!(slice.load_bit());
        let account_activated = ok!(slice.load_bit());
        let gas_fees = ok!(Tokens::load_from(slice));

        let child = ok!(slice.load_reference());
        let mut cs = ok!(child.as_slice());
        Ok(Self::Executed(ExecutedComputePhase {
            success,
            msg_state_used,
            account_activated,
            gas_fees,
            gas_used: ok!(VarUint56::load_from(&mut cs)),
            gas_limit: ok!(VarUint56::load_from(&mut cs)),
            gas_credit: match ok!(cs.load_bit()) {
                true => Some(ok!(VarUint24::load_from(&mut cs))),
                false => None,
            },
            mode: ok!(cs.load_u8()) as i8,
            exit_code: ok!(cs.load_u32()) as i32,
            exit_arg: match ok!(cs.load_bit()) {
                true => Some(ok!(cs.load_u32()) as i32),
                false => None,
            },
            vm_steps: ok!(cs.load_u32()),
            vm_init_state_hash: ok!(cs.load_u256()),
            vm_final_state_hash: ok!(cs.load_u256()),
        }))
    }
}

/// Short message-size statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageUsedShort {
    pub cells: VarUint56,
    pub bits: VarUint56,
}

impl Store for StorageUsedShort {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(self.cells.store_into(builder, context));
        self.bits.store_into(builder, context)
    }
}

impl Load<'_> for StorageUsedShort {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self {
            cells: ok!(VarUint56::load_from(slice)),
            bits: ok!(VarUint56::load_from(slice)),
        })
    }
}

/// Action phase outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActionPhase {
    pub success: bool,
    pub valid: bool,
    pub no_funds: bool,
    pub status_change: AccStatusChange,
    pub total_fwd_fees: Option<Tokens>,
    pub total_action_fees: Option<Tokens>,
    pub result_code: i32,
    pub result_arg: Option<i32>,
    pub total_actions: u16,
    pub special_actions: u16,
    pub skipped_actions: u16,
    pub messages_created: u16,
    pub action_list_hash: HashBytes,
    pub total_message_size: StorageUsedShort,
}

impl Store for ActionPhase {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_bit(self.success));
        ok!(builder.store_bit(self.valid));
        ok!(builder.store_bit(self.no_funds));
        ok!(self.status_change.store_into(builder, context));
        ok!(self.total_fwd_fees.store_into(builder, context));
        ok!(self.total_action_fees.store_into(builder, context));
        ok!(builder.store_u32(self.result_code as u32));
        match self.result_arg {
            Some(arg) => {
                ok!(builder.store_bit_one());
                ok!(builder.store_u32(arg as u32));
            }
            None => ok!(builder.store_bit_zero()),
        }
        ok!(builder.store_u16(self.total_actions));
        ok!(builder.store_u16(self.special_actions));
        ok!(builder.store_u16(self.skipped_actions));
        ok!(builder.store_u16(self.messages_created));
        ok!(builder.store_u256(&self.action_list_hash));
        self.total_message_size.store_into(builder, context)
    }
}

impl Load<'_> for ActionPhase {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self {
            success: ok!(slice.load_bit()),
            valid: ok!(slice.load_bit()),
            no_funds: ok!(slice.load_bit()),
            status_change: ok!(AccStatusChange::load_from(slice)),
            total_fwd_fees: ok!(Option::<Tokens>::load_from(slice)),
            total_action_fees: ok!(Option::<Tokens>::load_from(slice)),
            result_code: ok!(slice.load_u32()) as i32,
            result_arg: match ok!(slice.load_bit()) {
                true => Some(ok!(slice.load_u32()) as i32),
                false => None,
            },
            total_actions: ok!(slice.load_u16()),
            special_actions: ok!(slice.load_u16()),
            skipped_actions: ok!(slice.load_u16()),
            messages_created: ok!(slice.load_u16()),
            action_list_hash: ok!(slice.load_u256()),
            total_message_size: ok!(StorageUsedShort::load_from(slice)),
        })
    }
}

/// Bounce phase outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BouncePhase {
    /// `tr_phase_bounce_negfunds$00`.
    NegativeFunds,
    /// `tr_phase_bounce_nofunds$01`.
    NoFunds {
        msg_size: StorageUsedShort,
        req_fwd_fees: Tokens,
    },
    /// `tr_phase_bounce_ok$1`.
    Executed {
        msg_size: StorageUsedShort,
        msg_fees: Tokens,
        fwd_fees: Tokens,
    },
}

impl Store for BouncePhase {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        match self {
            Self::NegativeFunds => builder.store_small_uint(0b00, 2),
            Self::NoFunds {
                msg_size,
                req_fwd_fees,
            } => {
                ok!(builder.store_small_uint(0b01, 2));
                ok!(msg_size.store_into(builder, context));
                req_fwd_fees.store_into(builder, context)
            }
            Self::Executed {
                msg_size,
                msg_fees,
                fwd_fees,
            } => {
                ok!(builder.store_bit_one());
                ok!(msg_size.store_into(builder, context));
                ok!(msg_fees.store_into(builder, context));
                fwd_fees.store_into(builder, context)
            }
        }
    }
}

impl Load<'_> for BouncePhase {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(if ok!(slice.load_bit()) {
            Self::Executed {
                msg_size: ok!(StorageUsedShort::load_from(slice)),
                msg_fees: ok!(Tokens::load_from(slice)),
                fwd_fees: ok!(Tokens::load_from(slice)),
            }
        } else if ok!(slice.load_bit()) {
            Self::NoFunds {
                msg_size: ok!(StorageUsedShort::load_from(slice)),
                req_fwd_fees: ok!(Tokens::load_from(slice)),
            }
        } else {
            Self::NegativeFunds
        })
    }
}

/// `trans_ord$0000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdinaryTxInfo {
    pub credit_first: bool,
    pub storage_phase: Option<StoragePhase>,
    pub credit_phase: Option<CreditPhase>,
    pub compute_phase: ComputePhase,
    pub action_phase: Option<ActionPhase>,
    pub aborted: bool,
    pub bounce_phase: Option<BouncePhase>,
    pub destroyed: bool,
}

/// `trans_tick_tock$001`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickTockTxInfo {
    pub is_tock: bool,
    pub storage_phase: StoragePhase,
    pub compute_phase: ComputePhase,
    pub action_phase: Option<ActionPhase>,
    pub aborted: bool,
    pub destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxInfo {
    Ordinary(OrdinaryTxInfo),
    TickTock(TickTockTxInfo),
}

impl Store for TxInfo {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        match self {
            Self::Ordinary(info) => {
                ok!(builder.store_small_uint(0b0000, 4));
                ok!(builder.store_bit(info.credit_first));
                ok!(info.storage_phase.store_into(builder, context));
                ok!(info.credit_phase.store_into(builder, context));
                ok!(info.compute_phase.store_into(builder, context));
                match &info.action_phase {
                    Some(phase) => {
                        ok!(builder.store_bit_one());
                        let mut child = CellBuilder::new();
                        ok!(phase.store_into(&mut child, context));
                        ok!(builder.store_reference(ok!(child.build_ext(context))));
                    }
                    None => ok!(builder.store_bit_zero()),
                }
                ok!(builder.store_bit(info.aborted));
                ok!(info.bounce_phase.store_into(builder, context));
                builder.store_bit(info.destroyed)
            }
            Self::TickTock(info) => {
                ok!(builder.store_small_uint(0b001, 3));
                ok!(builder.store_bit(info.is_tock));
                ok!(info.storage_phase.store_into(builder, context));
                ok!(info.compute_phase.store_into(builder, context));
                match &info.action_phase {
                    Some(phase) => {
                        ok!(builder.store_bit_one());
                        let mut child = CellBuilder::new();
                        ok!(phase.store_into(&mut child, context));
                        ok!(builder.store_reference(ok!(child.build_ext(context))));
                    }
                    None => ok!(builder.store_bit_zero()),
                }
                ok!(builder.store_bit(info.aborted));
                builder.store_bit(info.destroyed)
            }
        }
    }
}

impl Load<'_> for TxInfo {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(if ok!(slice.get_small_uint(0, 3)) == 0b001 {
            ok!(slice.skip_first(3, 0));
            TxInfo::TickTock(TickTockTxInfo {
                is_tock: ok!(slice.load_bit()),
                storage_phase: ok!(StoragePhase::load_from(slice)),
                compute_phase: ok!(ComputePhase::load_from(slice)),
                action_phase: match ok!(slice.load_bit()) {
                    true => Some(ok!(ok!(slice.load_reference()).parse::<ActionPhase>())),
                    false => None,
                },
                aborted: ok!(slice.load_bit()),
                destroyed: ok!(slice.load_bit()),
            })
        } else {
            if ok!(slice.load_small_uint(4)) != 0b0000 {
                return Err(Error::InvalidTag);
            }
            TxInfo::Ordinary(OrdinaryTxInfo {
                credit_first: ok!(slice.load_bit()),
                storage_phase: ok!(Option::<StoragePhase>::load_from(slice)),
                credit_phase: ok!(Option::<CreditPhase>::load_from(slice)),
                compute_phase: ok!(ComputePhase::load_from(slice)),
                action_phase: match ok!(slice.load_bit()) {
                    true => Some(ok!(ok!(slice.load_reference()).parse::<ActionPhase>())),
                    false => None,
                },
                aborted: ok!(slice.load_bit()),
                bounce_phase: ok!(Option::<BouncePhase>::load_from(slice)),
                destroyed: ok!(slice.load_bit()),
            })
        })
    }
}

/// `transaction$0111`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub account: HashBytes,
    pub lt: u64,
    pub prev_trans_hash: HashBytes,
    pub prev_trans_lt: u64,
    pub now: u32,
    pub out_msg_count: u16,
    pub orig_status: AccountStatus,
    pub end_status: AccountStatus,
    pub in_msg: Option<Cell>,
    pub out_msgs: Dict<Uint15, Cell>,
    pub total_fees: CurrencyCollection,
    pub state_update: HashUpdate,
    pub info: Cell,
}

impl Transaction {
    /// Parses the description cell.
    pub fn load_info(&self) -> Result<TxInfo, Error> {
        self.info.parse::<TxInfo>()
    }
}

impl Store for Transaction {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_small_uint(0b0111, 4));
        ok!(builder.store_u256(&self.account));
        ok!(builder.store_u64(self.lt));
        ok!(builder.store_u256(&self.prev_trans_hash));
        ok!(builder.store_u64(self.prev_trans_lt));
        ok!(builder.store_u32(self.now));
        ok!(builder.store_uint(self.out_msg_count as u64, 15));
        ok!(self.orig_status.store_into(builder, context));
        ok!(self.end_status.store_into(builder, context));

        let mut msgs = CellBuilder::new();
        match &self.in_msg {
            Some(in_msg) => {
                ok!(msgs.store_bit_one());
                ok!(msgs.store_reference(in_msg.clone()));
            }
            None => ok!(msgs.store_bit_zero()),
        }
        ok!(self.out_msgs.store_into(&mut msgs, context));
        ok!(builder.store_reference(ok!(msgs.build_ext(context))));

        ok!(self.total_fees.store_into(builder, context));

        let mut state_update = CellBuilder::new();
        ok!(self.state_update.store_into(&mut state_update, context));
        ok!(builder.store_reference(ok!(state_update.build_ext(context))));

        builder.store_reference(self.info.clone())
    }
}

impl Load<'_> for Transaction {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        if ok!(slice.load_small_uint(4)) != 0b0111 {
            return Err(Error::InvalidTag);
        }
        let account = ok!(slice.load_u256());
        let lt = ok!(slice.load_u64());
        let prev_trans_hash = ok!(slice.load_u256());
        let prev_trans_lt = ok!(slice.load_u64());
        let now = ok!(slice.load_u32());
        let out_msg_count = ok!(slice.load_uint(15)) as u16;
        let orig_status = ok!(AccountStatus::load_from(slice));
        let end_status = ok!(AccountStatus::load_from(slice));

        let msgs = ok!(slice.load_reference());
        let mut msgs = ok!(msgs.as_slice());
        let in_msg = ok!(Option::<Cell>::load_from(&mut msgs));
        let out_msgs = ok!(Dict::load_from(&mut msgs));

        let total_fees = ok!(CurrencyCollection::load_from(slice));
        let state_update = ok!(ok!(slice.load_reference()).parse::<HashUpdate>());
        let info = ok!(slice.load_reference_cloned());

        Ok(Self {
            account,
            lt,
            prev_trans_hash,
            prev_trans_lt,
            now,
            out_msg_count,
            orig_status,
            end_status,
            in_msg,
            out_msgs,
            total_fees,
            state_update,
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::EmptyCellContext;

    fn round_trip<T>(value: &T) -> T
    where
        T: Store + for<'a> Load<'a>,
    {
        let mut b = CellBuilder::new();
        value.store_into(&mut b, &mut EmptyCellContext).unwrap();
        b.build().unwrap().parse().unwrap()
    }

    fn sample_compute_phase() -> ComputePhase {
        ComputePhase::Executed(ExecutedComputePhase {
            success: true,
            msg_state_used: false,
            account_activated: false,
            gas_fees: Tokens::new(10_000),
            gas_used: VarUint56::new(5_000),
            gas_limit: VarUint56::new(1_000_000),
            gas_credit: None,
            mode: 0,
            exit_code: 0,
            exit_arg: None,
            vm_steps: 44,
            vm_init_state_hash: HashBytes::ZERO,
            vm_final_state_hash: HashBytes::ZERO,
        })
    }

    #[test]
    fn ordinary_tx_info_round_trip() {
        let info = TxInfo::Ordinary(OrdinaryTxInfo {
            credit_first: true,
            storage_phase: Some(StoragePhase {
                storage_fees_collected: Tokens::new(111),
                storage_fees_due: None,
                status_change: AccStatusChange::Unchanged,
            }),
            credit_phase: Some(CreditPhase {
                due_fees_collected: None,
                credit: CurrencyCollection::new(1_000_000_000),
            }),
            compute_phase: sample_compute_phase(),
            action_phase: Some(ActionPhase {
                success: true,
                valid: true,
                result_code: 0,
                total_actions: 1,
                messages_created: 1,
                ..Default::default()
            }),
            aborted: false,
            bounce_phase: None,
            destroyed: false,
        });
        assert_eq!(round_trip(&info), info);
    }

    #[test]
    fn skipped_compute_phase_round_trip() {
        for reason in [
            ComputePhaseSkipReason::NoState,
            ComputePhaseSkipReason::BadState,
            ComputePhaseSkipReason::NoGas,
        ] {
            let phase = ComputePhase::Skipped(reason);
            assert_eq!(round_trip(&phase), phase);
        }
    }

    #[test]
    fn tick_tock_tx_info_round_trip() {
        let info = TxInfo::TickTock(TickTockTxInfo {
            is_tock: true,
            storage_phase: StoragePhase::default(),
            compute_phase: sample_compute_phase(),
            action_phase: None,
            aborted: false,
            destroyed: false,
        });
        assert_eq!(round_trip(&info), info);
    }

    #[test]
    fn transaction_round_trip() {
        let mut info = CellBuilder::new();
        TxInfo::TickTock(TickTockTxInfo {
            is_tock: false,
            storage_phase: StoragePhase::default(),
            compute_phase: sample_compute_phase(),
            action_phase: None,
            aborted: false,
            destroyed: false,
        })
        .store_into(&mut info, &mut EmptyCellContext)
        .unwrap();

        let tx = Transaction {
            account: HashBytes([0x42; 32]),
            lt: 1_000_001,
            prev_trans_hash: HashBytes([0x17; 32]),
            prev_trans_lt: 1_000_000,
            now: 1_700_000_000,
            out_msg_count: 0,
            orig_status: AccountStatus::Active,
            end_status: AccountStatus::Active,
            in_msg: None,
            out_msgs: Dict::new(),
            total_fees: CurrencyCollection::new(12345),
            state_update: HashUpdate {
                old: HashBytes([1; 32]),
                new: HashBytes([2; 32]),
            },
            info: info.build().unwrap(),
        };
        assert_eq!(round_trip(&tx), tx);
    }
}
