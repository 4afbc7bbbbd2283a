use anyhow::Context;
use tonkit_types::models::{AccountStatus, ComputePhase, TickTockTxInfo};

use crate::error::{TxError, TxResult};
use crate::phase::{
    ActionPhaseContext, ComputePhaseContext, ComputePhaseFull, StoragePhaseContext,
};
use crate::state::{ExecutorState, TransactionInput};

impl ExecutorState<'_> {
    pub fn run_tick_tock_transaction(&mut self, is_tock: bool) -> TxResult<TickTockTxInfo> {
        // only active accounts run on the block boundaries
        if self.orig_status != AccountStatus::Active {
            return Err(TxError::Skipped);
        }

        let storage_phase = self
            .storage_phase(StoragePhaseContext {
                adjust_msg_balance: false,
                received_message: None,
            })
            .context("storage phase failed")?;

        let ComputePhaseFull {
            compute_phase,
            original_balance,
            new_state,
            actions,
            vm_log,
            ..
        } = self
            .compute_phase(ComputePhaseContext {
                input: TransactionInput::TickTock { is_tock },
                storage_fee: storage_phase.storage_fees_collected,
            })
            .context("compute phase failed")?;
        self.vm_log = vm_log;

        let mut aborted = true;
        let mut action_phase = None;
        if let ComputePhase::Executed(compute_phase) = &compute_phase {
            if compute_phase.success {
                let res = self
                    .action_phase(ActionPhaseContext {
                        received_message: None,
                        original_balance,
                        new_state,
                        actions,
                        compute_gas_fees: compute_phase.gas_fees,
                    })
                    .context("action phase failed")?;

                aborted = !res.action_phase.success;
                action_phase = Some(res.action_phase);
            }
        }

        Ok(TickTockTxInfo {
            is_tock,
            storage_phase,
            compute_phase,
            action_phase,
            aborted,
            destroyed: self.end_status == AccountStatus::NotExists,
        })
    }
}
