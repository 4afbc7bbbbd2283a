use anyhow::{Context, Result};
use tonkit_types::cell::{Cell, CellBuilder, CellSliceRange, Load};
use tonkit_types::models::{CurrencyCollection, MsgInfo, StateInit};

use crate::state::{ExecutorState, MsgStateInit, ReceivedMessage};
use crate::util::{ExtStorageStat, StorageStatLimits};

impl ExecutorState<'_> {
    /// Parses the inbound message and charges the import fee if it came
    /// from outside the blockchain.
    ///
    /// May advance the logical time when the message was created after the
    /// block started.
    pub fn receive_in_msg(&mut self, msg_root: Cell) -> Result<ReceivedMessage> {
        anyhow::ensure!(!msg_root.is_exotic(), "invalid message root");
        let mut slice = msg_root.as_slice()?;

        let (is_external, bounce_enabled, balance_remaining) = match MsgInfo::load_from(&mut slice)?
        {
            MsgInfo::Int(info) => {
                anyhow::ensure!(
                    *info.dst.as_std() == self.address,
                    "message destination address mismatch"
                );

                // IHR is disabled, the reserved fee is returned to the value
                let mut balance = info.value;
                balance.tokens = balance
                    .tokens
                    .checked_add(info.ihr_fee)
                    .context("message balance overflow")?;

                if info.created_lt >= self.start_lt {
                    self.start_lt = info.created_lt + 1;
                    self.end_lt = self.start_lt + 1;
                }

                (false, info.bounce, balance)
            }
            MsgInfo::ExtIn(info) => {
                anyhow::ensure!(
                    *info.dst.as_std() == self.address,
                    "message destination address mismatch"
                );

                // the account pays for importing the message body
                let stats = ExtStorageStat::compute_for_slice(
                    &slice,
                    StorageStatLimits {
                        bit_count: self.config.size_limits.max_msg_bits,
                        cell_count: self.config.size_limits.max_msg_cells,
                    },
                )
                .context("inbound message size exceeds limits")?;

                // the root cell is free, only referenced subtrees are paid for
                let fwd_fee = self
                    .config
                    .fwd_prices(self.address.is_masterchain())
                    .compute_fwd_fee(stats.cell_count, stats.bit_count);

                self.balance.tokens = self
                    .balance
                    .tokens
                    .checked_sub(fwd_fee)
                    .context("cannot pay for importing the external message")?;
                self.total_fees = self.total_fees.saturating_add(fwd_fee);

                (true, false, CurrencyCollection::ZERO)
            }
            MsgInfo::ExtOut(_) => anyhow::bail!("unexpected outbound message as input"),
        };

        let init = if slice.load_bit()? {
            if slice.load_bit()? {
                // init in a child cell
                let child = slice.load_reference_cloned()?;
                anyhow::ensure!(!child.is_exotic(), "invalid state init");
                let mut cs = child.as_slice()?;
                let parsed = StateInit::load_from(&mut cs)?;
                anyhow::ensure!(cs.is_empty(), "state init with extra data");
                Some(MsgStateInit {
                    hash: *child.repr_hash(),
                    parsed,
                })
            } else {
                // inline init, rebuild the prefix cell to get its hash
                let before = slice;
                let parsed = StateInit::load_from(&mut slice)?;

                let bits = before.size_bits() - slice.size_bits();
                let refs = before.size_refs() - slice.size_refs();
                let mut prefix = before;
                prefix.only_first(bits, refs)?;

                let mut b = CellBuilder::new();
                b.store_slice(&prefix)?;
                let cell = b.build()?;

                Some(MsgStateInit {
                    hash: *cell.repr_hash(),
                    parsed,
                })
            }
        } else {
            None
        };

        let body = if slice.load_bit()? {
            let child = slice.load_reference_cloned()?;
            anyhow::ensure!(slice.is_empty(), "message with extra data");
            let range = CellSliceRange::full(&child);
            (child, range)
        } else {
            let remaining = slice.load_remaining();
            (remaining.cell().clone(), remaining.range())
        };

        Ok(ReceivedMessage {
            root: msg_root,
            init,
            body,
            is_external,
            bounce_enabled,
            balance_remaining,
        })
    }
}
