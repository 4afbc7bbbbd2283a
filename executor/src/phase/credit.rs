use anyhow::{Context, Result};
use tonkit_types::models::CreditPhase;

use crate::state::{ExecutorState, ReceivedMessage};

impl ExecutorState<'_> {
    /// Adds the remaining message value to the account balance.
    pub fn credit_phase(&mut self, msg: &ReceivedMessage) -> Result<CreditPhase> {
        self.balance.tokens = self
            .balance
            .tokens
            .checked_add(msg.balance_remaining.tokens)
            .context("account balance overflow")?;

        // extra currencies are tracked as an opaque dictionary: an account
        // which held none before simply adopts the incoming one
        if self.balance.other.is_none() {
            self.balance.other = msg.balance_remaining.other.clone();
        }

        Ok(CreditPhase {
            due_fees_collected: None,
            credit: msg.balance_remaining.clone(),
        })
    }
}
