use std::rc::Rc;

use anyhow::{Context, Result};
use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;
use tonkit_types::cell::{Cell, HashBytes};
use tonkit_types::dict::Dict;
use tonkit_types::models::{
    AccountState, AccountStatus, ComputePhase, ComputePhaseSkipReason, ExecutedComputePhase,
    SimpleLib, StateInit,
};
use tonkit_types::num::Tokens;
use tonkit_vm::util::OwnedCellSlice;
use tonkit_vm::{RcStackValue, SmcInfo, Stack, VmLog, VmState};

use crate::state::{ExecutorState, TransactionInput};
use crate::util::{new_varuint24_truncate, new_varuint56_truncate};

pub struct ComputePhaseContext<'m> {
    pub input: TransactionInput<'m>,
    pub storage_fee: Tokens,
}

/// Result of the compute phase together with the uncommitted pieces the
/// action phase needs.
pub struct ComputePhaseFull {
    pub compute_phase: ComputePhase,
    pub accepted: bool,
    /// Account balance before the message value arrived.
    pub original_balance: Tokens,
    pub new_state: StateInit,
    /// Committed `c5` register, the action list root.
    pub actions: Cell,
    pub vm_log: String,
}

impl ExecutorState<'_> {
    /// Runs the contract code in the virtual machine.
    ///
    /// Never touches the persistent account state itself: the committed
    /// data and actions are returned for the action phase to apply.
    pub fn compute_phase(&mut self, ctx: ComputePhaseContext<'_>) -> Result<ComputePhaseFull> {
        let is_masterchain = self.address.is_masterchain();
        let is_ordinary = matches!(ctx.input, TransactionInput::Ordinary(..));

        let (msg_balance, is_external) = match &ctx.input {
            TransactionInput::Ordinary(msg) => (msg.balance_remaining.tokens, msg.is_external),
            TransactionInput::TickTock { .. } => (Tokens::ZERO, false),
        };

        let mut res = ComputePhaseFull {
            compute_phase: ComputePhase::Skipped(ComputePhaseSkipReason::NoState),
            accepted: false,
            original_balance: self.balance.tokens.saturating_sub(msg_balance),
            new_state: StateInit::default(),
            actions: Cell::empty_cell(),
            vm_log: String::new(),
        };

        let gas = self.config.compute_gas_params(
            self.balance.tokens,
            msg_balance,
            self.is_special,
            is_masterchain,
            is_ordinary,
            is_external,
        );
        if gas.limit == 0 && gas.credit == 0 {
            res.compute_phase = ComputePhase::Skipped(ComputePhaseSkipReason::NoGas);
            return Ok(res);
        }

        let msg_state = match &ctx.input {
            TransactionInput::Ordinary(msg) => msg.init.as_ref(),
            TransactionInput::TickTock { .. } => None,
        };

        // resolve which state init the code and data come from
        let mut msg_libs = None;
        let msg_state_used = match (msg_state, &self.state) {
            (None, AccountState::Uninit) => {
                res.compute_phase = ComputePhase::Skipped(ComputePhaseSkipReason::NoState);
                return Ok(res);
            }
            (None, AccountState::Frozen(..)) => {
                res.compute_phase = ComputePhase::Skipped(ComputePhaseSkipReason::BadState);
                return Ok(res);
            }
            (None, AccountState::Active(state)) => {
                res.new_state = state.clone();
                false
            }
            (Some(from_msg), AccountState::Uninit | AccountState::Frozen(..)) => {
                let target_hash = match &self.state {
                    AccountState::Frozen(hash) => hash,
                    _ => &self.address.address,
                };
                if from_msg.hash != *target_hash || from_msg.parsed.split_depth.is_some() {
                    res.compute_phase = ComputePhase::Skipped(ComputePhaseSkipReason::BadState);
                    return Ok(res);
                }
                res.new_state = from_msg.parsed.clone();
                msg_libs = Some(from_msg.parsed.libraries.clone());
                true
            }
            (Some(from_msg), AccountState::Active(state)) => {
                // a deploy retry for an already deployed account
                if is_external && from_msg.hash != self.address.address {
                    res.compute_phase = ComputePhase::Skipped(ComputePhaseSkipReason::BadState);
                    return Ok(res);
                }
                res.new_state = state.clone();
                false
            }
        };

        let code = res.new_state.code.clone().unwrap_or_else(Cell::empty_cell);
        let data = res.new_state.data.clone().unwrap_or_else(Cell::empty_cell);

        let mut libraries: Vec<Dict<HashBytes, SimpleLib>> = Vec::new();
        if let Some(libs) = msg_libs {
            libraries.push(libs);
        }
        libraries.push(res.new_state.libraries.clone());
        libraries.push(self.params.libraries.clone());

        let smc_info = SmcInfo::default()
            .with_now(self.params.block_unixtime)
            .with_block_lt(self.params.block_lt)
            .with_tx_lt(self.start_lt)
            .with_mixed_rand_seed(&self.params.rand_seed, &self.address.address)
            .with_account_balance(self.balance.clone())
            .with_account_addr(self.address.clone().into())
            .with_config(Some(self.config.raw.clone()))
            .with_mycode(code.clone())
            .with_msg_value(match &ctx.input {
                TransactionInput::Ordinary(msg) => msg.balance_remaining.clone(),
                TransactionInput::TickTock { .. } => Default::default(),
            })
            .with_storage_fee(ctx.storage_fee);

        let stack = self.prepare_vm_stack(&ctx.input);

        let mut vm = VmState::builder()
            .with_code(code)
            .with_data(data)
            .with_stack(stack)
            .with_smc_info(&smc_info)
            .with_gas(gas)
            .with_libraries(Box::new(libraries))
            .with_modifiers(self.params.modifiers)
            .with_log(VmLog::new(self.params.vm_verbosity))
            .build();

        let exit_code = vm.run();
        res.vm_log = std::mem::take(&mut vm.log).finish();

        let accepted = vm.gas.gas_credit() == 0;
        let success = accepted && vm.commited_state.is_some();
        res.accepted = accepted;

        let gas_used = std::cmp::min(vm.gas.gas_consumed(), vm.gas.gas_limit());
        let gas_fees = if accepted && !self.is_special {
            self.config
                .gas_prices(is_masterchain)
                .compute_gas_fee(gas_used)
        } else {
            // unused gas is returned to the credit
            Tokens::ZERO
        };

        let account_activated =
            accepted && msg_state_used && self.orig_status != AccountStatus::Active;
        if account_activated {
            self.end_status = AccountStatus::Active;
        }

        if let Some(commited) = vm.commited_state.take() {
            if accepted {
                res.new_state.data = Some(commited.c4);
                res.actions = commited.c5;
            }
        }

        self.balance.tokens = self
            .balance
            .tokens
            .checked_sub(gas_fees)
            .context("failed to deduct gas fees")?;
        self.total_fees = self.total_fees.saturating_add(gas_fees);

        res.compute_phase = ComputePhase::Executed(ExecutedComputePhase {
            success,
            msg_state_used,
            account_activated,
            gas_fees,
            gas_used: new_varuint56_truncate(gas_used),
            gas_limit: new_varuint56_truncate(vm.gas.gas_limit()),
            gas_credit: (vm.gas.gas_credit() != 0)
                .then(|| new_varuint24_truncate(vm.gas.gas_credit())),
            mode: 0,
            exit_code,
            exit_arg: if success {
                None
            } else {
                get_exit_arg(&vm.stack).filter(|arg| *arg != 0)
            },
            vm_steps: vm.steps as u32,
            vm_init_state_hash: HashBytes::default(),
            vm_final_state_hash: HashBytes::default(),
        });
        Ok(res)
    }

    fn prepare_vm_stack(&self, input: &TransactionInput<'_>) -> Vec<RcStackValue> {
        match input {
            TransactionInput::Ordinary(msg) => {
                vec![
                    Rc::new(BigInt::from(self.balance.tokens.into_inner())),
                    Rc::new(BigInt::from(msg.balance_remaining.tokens.into_inner())),
                    Rc::new(msg.root.clone()),
                    Rc::new(OwnedCellSlice::from(msg.body.clone())),
                    Rc::new(BigInt::from(if msg.is_external { -1 } else { 0 })),
                ]
            }
            TransactionInput::TickTock { is_tock } => {
                vec![
                    Rc::new(BigInt::from(self.balance.tokens.into_inner())),
                    Rc::new(BigInt::from_bytes_be(
                        Sign::Plus,
                        self.address.address.as_slice(),
                    )),
                    Rc::new(BigInt::from(if *is_tock { -1 } else { 0 })),
                    Rc::new(BigInt::from(-2)),
                ]
            }
        }
    }
}

fn get_exit_arg(stack: &Stack) -> Option<i32> {
    let value = stack.items.last()?;
    value.as_int().and_then(|int| int.to_i32())
}
