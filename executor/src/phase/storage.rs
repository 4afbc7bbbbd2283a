use anyhow::Result;
use tonkit_types::models::{AccStatusChange, AccountState, AccountStatus, StoragePhase};
use tonkit_types::num::Tokens;

use crate::state::{ExecutorState, ReceivedMessage};

pub struct StoragePhaseContext<'m> {
    /// Clamp the remaining message balance to the account balance after
    /// the fee is collected. Used when the credit phase ran first.
    pub adjust_msg_balance: bool,
    pub received_message: Option<&'m mut ReceivedMessage>,
}

impl ExecutorState<'_> {
    /// Collects the storage fee accumulated since the previous transaction
    /// and freezes or deletes the account when the debt grows too large.
    pub fn storage_phase(&mut self, ctx: StoragePhaseContext<'_>) -> Result<StoragePhase> {
        anyhow::ensure!(
            self.params.block_unixtime >= self.storage_stat.last_paid,
            "current unixtime is less than the account last_paid"
        );

        let is_masterchain = self.address.is_masterchain();

        let mut to_pay = self.config.compute_storage_fees(
            &self.storage_stat,
            self.params.block_unixtime,
            self.is_special,
            is_masterchain,
        );
        if let Some(due) = self.storage_stat.due_payment {
            to_pay = to_pay.saturating_add(due);
        }

        self.storage_stat.last_paid = if self.is_special {
            0
        } else {
            self.params.block_unixtime
        };

        let collected;
        let phase = if to_pay.is_zero() {
            collected = Tokens::ZERO;
            StoragePhase {
                storage_fees_collected: Tokens::ZERO,
                storage_fees_due: None,
                status_change: AccStatusChange::Unchanged,
            }
        } else if let Some(remaining) = self.balance.tokens.checked_sub(to_pay) {
            collected = to_pay;
            self.balance.tokens = remaining;
            self.storage_stat.due_payment = None;
            StoragePhase {
                storage_fees_collected: to_pay,
                storage_fees_due: None,
                status_change: AccStatusChange::Unchanged,
            }
        } else {
            // the whole balance is collected and the rest becomes a debt
            collected = self.balance.tokens;
            let fees_due = to_pay.saturating_sub(self.balance.tokens);
            self.balance.tokens = Tokens::ZERO;

            let prices = self.config.gas_prices(is_masterchain);
            let status_change = if self.is_special {
                AccStatusChange::Unchanged
            } else {
                match &self.state {
                    AccountState::Uninit | AccountState::Frozen(..)
                        if fees_due.into_inner() > prices.delete_due_limit as u128
                            && self.balance.other.is_none() =>
                    {
                        self.end_status = AccountStatus::NotExists;
                        AccStatusChange::Deleted
                    }
                    AccountState::Active(..)
                        if fees_due.into_inner() > prices.freeze_due_limit as u128 =>
                    {
                        self.end_status = AccountStatus::Frozen;
                        AccStatusChange::Frozen
                    }
                    _ => AccStatusChange::Unchanged,
                }
            };

            if !self.is_special {
                self.storage_stat.due_payment = Some(fees_due);
            }

            StoragePhase {
                storage_fees_collected: collected,
                storage_fees_due: Some(fees_due),
                status_change,
            }
        };

        if ctx.adjust_msg_balance {
            if let Some(msg) = ctx.received_message {
                msg.balance_remaining.tokens = msg.balance_remaining.tokens.min(self.balance.tokens);
            }
        }

        self.total_fees = self.total_fees.saturating_add(collected);
        Ok(phase)
    }
}
