use anyhow::Result;
use tonkit_types::cell::{CellBuilder, EmptyCellContext, Load, Store};
use tonkit_types::models::{BouncePhase, MsgInfo, StorageUsedShort};
use tonkit_types::num::Tokens;

use crate::state::{ExecutorState, ReceivedMessage};
use crate::util::{new_varuint56_truncate, ExtStorageStat, StorageStatLimits};

pub struct BouncePhaseContext<'m> {
    /// Gas fees charged by the compute phase, if it ran.
    pub gas_fees: Tokens,
    /// Fine collected by a failed action phase, if it ran.
    pub action_fine: Tokens,
    pub received_message: &'m ReceivedMessage,
}

impl ExecutorState<'_> {
    /// Sends the remaining message value back to the sender.
    ///
    /// Defined only for inbound internal messages. All fees are paid from
    /// the remaining message balance, the account keeps nothing of it.
    pub fn bounce_phase(&mut self, ctx: BouncePhaseContext<'_>) -> Result<BouncePhase> {
        let mut cs = ctx.received_message.root.as_slice()?;
        let MsgInfo::Int(mut info) = MsgInfo::load_from(&mut cs)? else {
            anyhow::bail!("bounce phase is defined only for internal messages");
        };

        // the message goes back where it came from
        std::mem::swap(&mut info.src, &mut info.dst);

        let mut msg_value = ctx.received_message.balance_remaining.clone();

        // the root cell is free, only the extra currency dictionary counts
        let mut stats = ExtStorageStat::with_limits(StorageStatLimits {
            bit_count: self.config.size_limits.max_msg_bits,
            cell_count: self.config.size_limits.max_msg_cells,
        });
        let within_limits = match &msg_value.other {
            Some(extra) => stats.add_cell(extra),
            None => true,
        };
        let stats = stats.stats();
        let msg_size = StorageUsedShort {
            cells: new_varuint56_truncate(stats.cell_count),
            bits: new_varuint56_truncate(stats.bit_count),
        };
        if !within_limits {
            return Ok(BouncePhase::NoFunds {
                msg_size,
                req_fwd_fees: Tokens::MAX,
            });
        }

        let use_mc_prices = self.address.is_masterchain()
            || info.dst.as_std().is_masterchain();
        let prices = self.config.fwd_prices(use_mc_prices);
        let mut fwd_fees = prices.compute_fwd_fee(stats.cell_count, stats.bit_count);

        // gas fees and fines come out of the message balance first
        msg_value.tokens = match msg_value
            .tokens
            .checked_sub(ctx.gas_fees)
            .and_then(|t| t.checked_sub(ctx.action_fine))
        {
            Some(msg_balance) if msg_balance >= fwd_fees => msg_balance,
            msg_balance => {
                return Ok(BouncePhase::NoFunds {
                    msg_size,
                    req_fwd_fees: fwd_fees.saturating_sub(msg_balance.unwrap_or_default()),
                });
            }
        };

        // take the message balance back from the account
        self.balance.tokens = self
            .balance
            .tokens
            .checked_sub(msg_value.tokens)
            .unwrap_or(Tokens::ZERO);
        if let Some(extra) = &msg_value.other {
            if let Some(held) = &self.balance.other {
                if extra.repr_hash() == held.repr_hash() {
                    self.balance.other = None;
                }
            }
        }

        msg_value.tokens = msg_value.tokens.saturating_sub(fwd_fees);

        let msg_fees = prices.get_first_part(fwd_fees);
        fwd_fees = fwd_fees.saturating_sub(msg_fees);
        self.total_fees = self.total_fees.saturating_add(msg_fees);

        info.ihr_disabled = true;
        info.bounce = false;
        info.bounced = true;
        info.value = msg_value;
        info.ihr_fee = Tokens::ZERO;
        info.fwd_fee = fwd_fees;
        info.created_lt = self.end_lt;
        info.created_at = self.params.block_unixtime;

        let msg = {
            const ROOT_BODY_BITS: u16 = 256;
            const BOUNCE_SELECTOR: u32 = u32::MAX;

            // up to 256 bits of the original body survive the bounce
            let (body_cell, body_range) = &ctx.received_message.body;
            let body = body_range.apply(body_cell)?;
            let mut body_prefix = body;
            body_prefix.only_first(std::cmp::min(ROOT_BODY_BITS, body.size_bits()), 0)?;

            let mut b = CellBuilder::new();
            MsgInfo::Int(info).store_into(&mut b, &mut EmptyCellContext)?;
            b.store_bit_zero()?; // init:(Maybe ...) -> nothing$0

            if b.has_capacity(body_prefix.size_bits() + 33, 0) {
                b.store_bit_zero()?; // body:(Either X ^X) -> left$0 X
                b.store_u32(BOUNCE_SELECTOR)?;
                b.store_slice_data(&body_prefix)?;
            } else {
                let child = {
                    let mut b = CellBuilder::new();
                    b.store_u32(BOUNCE_SELECTOR)?;
                    b.store_slice_data(&body_prefix)?;
                    b.build()?
                };

                b.store_bit_one()?; // body:(Either X ^X) -> right$1 ^X
                b.store_reference(child)?;
            }

            b.build()?
        };

        self.out_msgs.push(msg);
        self.end_lt += 1;

        Ok(BouncePhase::Executed {
            msg_size,
            msg_fees,
            fwd_fees,
        })
    }
}
