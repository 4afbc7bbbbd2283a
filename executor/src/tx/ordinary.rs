use anyhow::{anyhow, Context};
use tonkit_types::cell::Cell;
use tonkit_types::models::{AccountStatus, ComputePhase, OrdinaryTxInfo};
use tonkit_types::num::Tokens;

use crate::error::{TxError, TxResult};
use crate::phase::{
    ActionPhaseContext, BouncePhaseContext, ComputePhaseContext, ComputePhaseFull,
    StoragePhaseContext,
};
use crate::state::{ExecutorState, TransactionInput};

impl ExecutorState<'_> {
    pub fn run_ordinary_transaction(
        &mut self,
        is_external: bool,
        msg_root: Cell,
    ) -> TxResult<OrdinaryTxInfo> {
        let mut msg = match self.receive_in_msg(msg_root) {
            Ok(msg) if msg.is_external == is_external => msg,
            Ok(_) => {
                return Err(TxError::Fatal(anyhow!(
                    "received an unexpected inbound message"
                )))
            }
            // invalid external messages are simply not imported
            Err(_) if is_external => return Err(TxError::Skipped),
            Err(e) => return Err(TxError::Fatal(e)),
        };

        // the bounce flag decides whether the message value can be spent
        // on the storage fee
        let storage_phase;
        let credit_phase;
        if msg.bounce_enabled {
            storage_phase = self
                .storage_phase(StoragePhaseContext {
                    adjust_msg_balance: false,
                    received_message: Some(&mut msg),
                })
                .context("storage phase failed")?;

            credit_phase = if is_external {
                None
            } else {
                Some(self.credit_phase(&msg).context("credit phase failed")?)
            };
        } else {
            credit_phase = if is_external {
                None
            } else {
                Some(self.credit_phase(&msg).context("credit phase failed")?)
            };

            storage_phase = self
                .storage_phase(StoragePhaseContext {
                    adjust_msg_balance: true,
                    received_message: Some(&mut msg),
                })
                .context("storage phase failed")?;
        }

        let ComputePhaseFull {
            compute_phase,
            accepted,
            original_balance,
            new_state,
            actions,
            vm_log,
        } = self
            .compute_phase(ComputePhaseContext {
                input: TransactionInput::Ordinary(&msg),
                storage_fee: storage_phase.storage_fees_collected,
            })
            .context("compute phase failed")?;
        self.vm_log = vm_log;

        if is_external && !accepted {
            return Err(match &compute_phase {
                ComputePhase::Executed(phase) => TxError::NotAccepted {
                    exit_code: phase.exit_code,
                    vm_log: std::mem::take(&mut self.vm_log),
                },
                ComputePhase::Skipped(_) => TxError::Skipped,
            });
        }

        let mut aborted = true;
        let mut state_exceeds_limits = false;
        let mut bounce_required = false;
        let mut action_fine = Tokens::ZERO;
        let mut destroyed = false;

        let mut action_phase = None;
        if let ComputePhase::Executed(compute_phase) = &compute_phase {
            if compute_phase.success {
                let res = self
                    .action_phase(ActionPhaseContext {
                        received_message: Some(&mut msg),
                        original_balance,
                        new_state,
                        actions,
                        compute_gas_fees: compute_phase.gas_fees,
                    })
                    .context("action phase failed")?;

                aborted = !res.action_phase.success;
                state_exceeds_limits = res.state_exceeds_limits;
                bounce_required = res.bounce;
                action_fine = res.action_fine;
                destroyed = self.end_status == AccountStatus::NotExists;

                action_phase = Some(res.action_phase);
            }
        }

        // return the message value to the sender if something failed
        let mut bounce_phase = None;
        if msg.bounce_enabled
            && (!matches!(&compute_phase, ComputePhase::Executed(p) if p.success)
                || state_exceeds_limits
                || bounce_required)
        {
            debug_assert!(!is_external);

            let gas_fees = match &compute_phase {
                ComputePhase::Executed(phase) => phase.gas_fees,
                ComputePhase::Skipped(_) => Tokens::ZERO,
            };

            bounce_phase = Some(
                self.bounce_phase(BouncePhaseContext {
                    gas_fees,
                    action_fine,
                    received_message: &msg,
                })
                .context("bounce phase failed")?,
            );
        }

        Ok(OrdinaryTxInfo {
            credit_first: !msg.bounce_enabled,
            storage_phase: Some(storage_phase),
            credit_phase,
            compute_phase,
            action_phase,
            aborted,
            bounce_phase,
            destroyed,
        })
    }
}
