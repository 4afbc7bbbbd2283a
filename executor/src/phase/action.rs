use anyhow::Result;
use tonkit_types::cell::{Cell, CellBuilder, CellSlice, EmptyCellContext, HashBytes, Load, Store};
use tonkit_types::error::Error;
use tonkit_types::models::{
    AccStatusChange, AccountState, AccountStatus, ActionPhase, CurrencyCollection, ExtAddr,
    IntAddr, MsgInfo, IntMsgInfo, ExtOutMsgInfo, SimpleLib, StateInit, StdAddr, StorageUsedShort,
};
use tonkit_types::num::Tokens;

use crate::state::{ExecutorState, ReceivedMessage};
use crate::util::{new_varuint56_truncate, ExtStorageStat, StorageStatLimits};

const ACTION_SEND_MSG: u32 = 0x0ec3c86d;
const ACTION_RESERVE: u32 = 0x36e6b809;
const ACTION_SET_CODE: u32 = 0xad4de08e;
const ACTION_CHANGE_LIBRARY: u32 = 0x26fa1dd4;

// send message mode flags
const SEND_PAY_FEE_SEPARATELY: u8 = 0b0000_0001;
const SEND_IGNORE_ERROR: u8 = 0b0000_0010;
const SEND_BOUNCE_ON_ERROR: u8 = 0b0001_0000;
const SEND_DELETE_IF_EMPTY: u8 = 0b0010_0000;
const SEND_WITH_REMAINING_BALANCE: u8 = 0b0100_0000;
const SEND_ALL_BALANCE: u8 = 0b1000_0000;
const SEND_MASK: u8 = SEND_PAY_FEE_SEPARATELY
    | SEND_IGNORE_ERROR
    | SEND_BOUNCE_ON_ERROR
    | SEND_DELETE_IF_EMPTY
    | SEND_WITH_REMAINING_BALANCE
    | SEND_ALL_BALANCE;
const SEND_EXT_MASK: u8 = SEND_PAY_FEE_SEPARATELY | SEND_IGNORE_ERROR | SEND_BOUNCE_ON_ERROR;

// reserve mode flags
const RESERVE_ALL_BUT: u8 = 0b0001;
const RESERVE_IGNORE_ERROR: u8 = 0b0010;
const RESERVE_WITH_ORIGINAL_BALANCE: u8 = 0b0100;
const RESERVE_REVERSE: u8 = 0b1000;
const RESERVE_MASK: u8 =
    RESERVE_ALL_BUT | RESERVE_IGNORE_ERROR | RESERVE_WITH_ORIGINAL_BALANCE | RESERVE_REVERSE;

pub struct ActionPhaseContext<'m> {
    pub received_message: Option<&'m mut ReceivedMessage>,
    /// Account balance before the message value arrived.
    pub original_balance: Tokens,
    /// State init assembled by the compute phase.
    pub new_state: StateInit,
    /// Committed action list root.
    pub actions: Cell,
    pub compute_gas_fees: Tokens,
}

pub struct ActionPhaseFull {
    pub action_phase: ActionPhase,
    /// Fine collected for oversized messages when the phase fails.
    pub action_fine: Tokens,
    /// The new account state does not fit the size limits.
    pub state_exceeds_limits: bool,
    /// A failed action requested the bounce phase to run.
    pub bounce: bool,
}

impl ExecutorState<'_> {
    /// Applies the output actions committed by the compute phase.
    ///
    /// Either all actions are applied or none: on the first failure the
    /// balance and state are left as the compute phase produced them and
    /// only the accumulated fine is charged.
    pub fn action_phase(&mut self, mut ctx: ActionPhaseContext<'_>) -> Result<ActionPhaseFull> {
        const MAX_ACTIONS: u16 = 255;

        let mut res = ActionPhaseFull {
            action_phase: ActionPhase {
                success: false,
                valid: false,
                no_funds: false,
                status_change: AccStatusChange::Unchanged,
                total_fwd_fees: None,
                total_action_fees: None,
                result_code: -1,
                result_arg: None,
                total_actions: 0,
                special_actions: 0,
                skipped_actions: 0,
                messages_created: 0,
                action_list_hash: *ctx.actions.repr_hash(),
                total_message_size: StorageUsedShort::default(),
            },
            action_fine: Tokens::ZERO,
            state_exceeds_limits: false,
            bounce: false,
        };

        // unpack the action list, newest first
        let mut action_idx = 0u16;
        let mut list = Vec::new();
        let mut actions = &ctx.actions;
        loop {
            if actions.is_exotic() {
                res.action_phase.result_code = ResultCode::ActionListInvalid as i32;
                res.action_phase.result_arg = Some(action_idx as _);
                return Ok(res);
            }

            list.push(actions.clone());

            let mut cs = actions.as_slice()?;
            if cs.is_empty() {
                // the list terminates with an empty cell
                break;
            }

            actions = match cs.load_reference() {
                Ok(child) => child,
                Err(_) => {
                    // each item must link to the previous one
                    res.action_phase.result_code = ResultCode::ActionListInvalid as i32;
                    res.action_phase.result_arg = Some(action_idx as _);
                    return Ok(res);
                }
            };

            action_idx += 1;
            if action_idx > MAX_ACTIONS {
                res.action_phase.result_code = ResultCode::TooManyActions as i32;
                res.action_phase.result_arg = Some(action_idx as _);
                return Ok(res);
            }
        }

        res.action_phase.total_actions = action_idx;

        // parse items in execution order, oldest first
        let mut parsed_list = Vec::with_capacity(list.len());
        for (action_idx, item) in list.iter().rev().enumerate() {
            let mut cs = item.as_slice()?;
            if cs.is_empty() {
                continue;
            }
            cs.load_reference().ok();

            match parse_action(&mut cs) {
                Ok(action) if cs.is_empty() => {
                    parsed_list.push(Some(action));
                    continue;
                }
                _ => {}
            }

            // a malformed send can still be skipped or request a bounce
            // when its mode flags are readable
            let mut cs = item.as_slice()?;
            cs.load_reference().ok();
            if cs.size_bits() >= 40 && cs.load_u32()? == ACTION_SEND_MSG {
                let mode = cs.load_u8()?;
                if mode & SEND_IGNORE_ERROR != 0 {
                    res.action_phase.skipped_actions += 1;
                    parsed_list.push(None);
                    continue;
                } else if mode & SEND_BOUNCE_ON_ERROR != 0 {
                    res.bounce = true;
                }
            }

            res.action_phase.result_code = ResultCode::ActionInvalid as i32;
            res.action_phase.result_arg = Some(action_idx as _);
            return Ok(res);
        }

        res.action_phase.valid = true;

        let mut action_ctx = ActionContext {
            need_bounce_on_fail: false,
            received_message: ctx.received_message,
            original_balance: ctx.original_balance,
            remaining_balance: self.balance.clone(),
            reserved_tokens: Tokens::ZERO,
            action_fine: Tokens::ZERO,
            new_state: &mut ctx.new_state,
            end_lt: self.end_lt,
            out_msgs: Vec::new(),
            delete_account: false,
            compute_gas_fees: ctx.compute_gas_fees,
            phase: &mut res.action_phase,
        };

        for (action_idx, action) in parsed_list.into_iter().enumerate() {
            let Some(action) = action else {
                continue;
            };

            action_ctx.need_bounce_on_fail = false;
            action_ctx.phase.result_code = -1;
            action_ctx.phase.result_arg = Some(action_idx as _);

            let applied = match action {
                OutAction::SendMsg { mode, msg_root } => {
                    let mut rewrite = None;
                    loop {
                        match self.do_send_message(mode, &msg_root, &mut action_ctx, rewrite) {
                            Ok(SendMsgResult::Sent) => break Ok(()),
                            Ok(SendMsgResult::Rewrite(r)) => rewrite = Some(r),
                            Err(e) => break Err(e),
                        }
                    }
                }
                OutAction::SetCode { code } => {
                    action_ctx.new_state.code = Some(code);
                    action_ctx.phase.special_actions += 1;
                    Ok(())
                }
                OutAction::ReserveCurrency {
                    mode,
                    tokens,
                    extra,
                } => self.do_reserve_currency(mode, tokens, extra, &mut action_ctx),
                OutAction::ChangeLibrary { mode, lib } => {
                    self.do_change_library(mode, lib, &mut action_ctx)
                }
            };

            if applied.is_err() {
                if action_ctx.phase.result_code == -1 {
                    action_ctx.phase.result_code = ResultCode::ActionInvalid as i32;
                }
                if action_ctx.phase.result_code == ResultCode::NotEnoughBalance as i32
                    || action_ctx.phase.result_code == ResultCode::NotEnoughExtraBalance as i32
                {
                    action_ctx.phase.no_funds = true;
                }

                // only the fine is charged, everything else stays as the
                // compute phase left it
                let fine = action_ctx.action_fine.min(self.balance.tokens);
                action_ctx.phase.total_action_fees = Some(fine).filter(|t| !t.is_zero());
                res.action_fine = fine;
                res.bounce |= action_ctx.need_bounce_on_fail;

                self.balance.tokens = self.balance.tokens.saturating_sub(fine);
                self.total_fees = self.total_fees.saturating_add(fine);
                return Ok(res);
            }
        }

        if !action_ctx.action_fine.is_zero() {
            let fine = action_ctx.action_fine;
            let total = action_ctx
                .phase
                .total_action_fees
                .get_or_insert(Tokens::ZERO);
            *total = total.saturating_add(fine);
        }

        // the resulting account state must fit the size limits
        if !self.is_special && !check_state_limits(action_ctx.new_state, self) {
            action_ctx.phase.result_code = ResultCode::StateOutOfLimits as i32;
            res.state_exceeds_limits = true;
            return Ok(res);
        }

        action_ctx.remaining_balance.tokens = action_ctx
            .remaining_balance
            .tokens
            .saturating_add(action_ctx.reserved_tokens);

        action_ctx.phase.result_code = 0;
        action_ctx.phase.result_arg = None;
        action_ctx.phase.success = true;

        if action_ctx.delete_account {
            action_ctx.phase.status_change = AccStatusChange::Deleted;
            self.end_status = AccountStatus::NotExists;
        }

        if let Some(fees) = action_ctx.phase.total_action_fees {
            // forwarding fees go to the next validators, not here
            self.total_fees = self.total_fees.saturating_add(fees);
        }
        self.balance = action_ctx.remaining_balance;
        self.out_msgs = action_ctx.out_msgs;
        self.end_lt = action_ctx.end_lt;
        self.state = AccountState::Active(ctx.new_state);

        Ok(res)
    }

    fn do_send_message(
        &self,
        mode: u8,
        msg_root: &Cell,
        ctx: &mut ActionContext<'_>,
        rewrite: Option<MessageRewrite>,
    ) -> Result<SendMsgResult, ActionFailed> {
        if mode & SEND_BOUNCE_ON_ERROR != 0 {
            ctx.need_bounce_on_fail = true;
        }

        if mode & !SEND_MASK != 0
            || (mode & SEND_ALL_BALANCE != 0 && mode & SEND_WITH_REMAINING_BALANCE != 0)
        {
            return Err(ActionFailed);
        }

        let skip_invalid = mode & SEND_IGNORE_ERROR != 0;
        fn check_skip_invalid(
            skip: bool,
            code: ResultCode,
            ctx: &mut ActionContext<'_>,
        ) -> Result<SendMsgResult, ActionFailed> {
            if skip {
                ctx.phase.skipped_actions += 1;
                Ok(SendMsgResult::Sent)
            } else {
                ctx.phase.result_code = code as i32;
                Err(ActionFailed)
            }
        }

        if msg_root.is_exotic() {
            return Err(ActionFailed);
        }

        // unpack the relaxed message: the source may be empty and the fee
        // and timing fields are filled in here
        let mut cs = msg_root.as_slice()?;
        let mut info = RelaxedInfo::load(&mut cs)?;
        let mut init_part = load_prefix_part(&mut cs, PrefixKind::StateInit)?;
        let mut body_part = load_prefix_part(&mut cs, PrefixKind::Body)?;
        if !cs.is_empty() {
            return Err(ActionFailed);
        }

        let mut rewrite = rewrite;
        if let Some(MessageRewrite::StateInitToCell) = rewrite {
            if init_part.reference_count() >= 2 {
                init_part = rewrite_state_init_to_cell(&init_part)?;
            } else {
                rewrite = Some(MessageRewrite::BodyToCell);
            }
        }
        if let Some(MessageRewrite::BodyToCell) = rewrite {
            let cs = body_part.as_slice()?;
            if cs.size_bits() > 1 && !cs.get_bit(0)? {
                body_part = rewrite_body_to_cell(&body_part)?;
            }
        }

        let mut use_mc_prices = self.address.is_masterchain();
        match &mut info {
            RelaxedInfo::Int(info) => {
                if !src_is_this_account(&info.src, &self.address) {
                    ctx.phase.result_code = ResultCode::InvalidSrcAddr as i32;
                    return Err(ActionFailed);
                }
                if info.dst.workchain != 0 && info.dst.workchain != -1 {
                    return check_skip_invalid(skip_invalid, ResultCode::InvalidDstAddr, ctx);
                }
                use_mc_prices |= info.dst.is_masterchain();

                info.ihr_fee = Tokens::ZERO;
                info.fwd_fee = Tokens::ZERO;
                info.created_at = self.params.block_unixtime;
                info.created_lt = ctx.end_lt;
                info.ihr_disabled = true;
                info.bounced = false;
            }
            RelaxedInfo::ExtOut(info) => {
                if mode & !SEND_EXT_MASK != 0 {
                    return Err(ActionFailed);
                }
                if !src_is_this_account(&info.src, &self.address) {
                    ctx.phase.result_code = ResultCode::InvalidSrcAddr as i32;
                    return Err(ActionFailed);
                }
                info.created_at = self.params.block_unixtime;
                info.created_lt = ctx.end_lt;
            }
        }

        // every visited cell of an oversized message costs a fine
        let prices = self.config.fwd_prices(use_mc_prices);
        let mut max_cell_count = self.config.size_limits.max_msg_cells;
        let fine_per_cell = if self.is_special {
            0
        } else {
            (prices.cell_price >> 16) / 4
        };
        if fine_per_cell > 0 {
            let funds = ctx.remaining_balance.tokens.into_inner();
            if funds < max_cell_count as u128 * fine_per_cell as u128 {
                max_cell_count = (funds / fine_per_cell as u128)
                    .try_into()
                    .unwrap_or(u32::MAX);
            }
        }

        fn collect_fine(
            fine_per_cell: u64,
            max_cell_count: u32,
            cells: u64,
            ctx: &mut ActionContext<'_>,
        ) {
            let fine = Tokens::new(
                fine_per_cell.saturating_mul(std::cmp::min(max_cell_count as u64, cells)) as u128,
            )
            .min(ctx.remaining_balance.tokens);
            ctx.action_fine = ctx.action_fine.saturating_add(fine);
            ctx.remaining_balance.tokens = ctx.remaining_balance.tokens.saturating_sub(fine);
        }

        // the root cell of a message travels for free
        let mut stat = ExtStorageStat::with_limits(StorageStatLimits {
            bit_count: u32::MAX,
            cell_count: max_cell_count,
        });
        let mut within_limits = true;
        for part in [&init_part, &body_part] {
            for cell in part.references() {
                if !stat.add_cell(cell) {
                    within_limits = false;
                    break;
                }
            }
        }
        if within_limits {
            if let RelaxedInfo::Int(info) = &info {
                if let Some(extra) = &info.value.other {
                    within_limits &= stat.add_cell(extra);
                }
            }
        }
        let stats = stat.stats();
        if !within_limits {
            collect_fine(fine_per_cell, max_cell_count, stats.cell_count, ctx);
            return check_skip_invalid(skip_invalid, ResultCode::MessageOutOfLimits, ctx);
        }

        let fwd_fee = if self.is_special {
            Tokens::ZERO
        } else {
            prices.compute_fwd_fee(stats.cell_count, stats.bit_count)
        };

        let msg;
        let fees_collected;
        match info {
            RelaxedInfo::Int(mut info) => {
                let value_to_pay = match rewrite_message_value(&mut info, mode, fwd_fee, ctx) {
                    Ok(total) => total,
                    Err(code) => {
                        collect_fine(fine_per_cell, max_cell_count, stats.cell_count, ctx);
                        return check_skip_invalid(skip_invalid, code, ctx);
                    }
                };

                if ctx.remaining_balance.tokens < value_to_pay {
                    collect_fine(fine_per_cell, max_cell_count, stats.cell_count, ctx);
                    return check_skip_invalid(skip_invalid, ResultCode::NotEnoughBalance, ctx);
                }

                // extra currencies leave the account only as a whole
                let remaining_other = match (&info.value.other, &ctx.remaining_balance.other) {
                    (None, other) => other.clone(),
                    (Some(sent), Some(held)) if sent.repr_hash() == held.repr_hash() => None,
                    (Some(_), _) => {
                        collect_fine(fine_per_cell, max_cell_count, stats.cell_count, ctx);
                        return check_skip_invalid(
                            skip_invalid,
                            ResultCode::NotEnoughExtraBalance,
                            ctx,
                        );
                    }
                };

                fees_collected = prices.get_first_part(fwd_fee);
                info.fwd_fee = fwd_fee.saturating_sub(fees_collected);

                let header = MsgInfo::Int(IntMsgInfo {
                    ihr_disabled: info.ihr_disabled,
                    bounce: info.bounce,
                    bounced: info.bounced,
                    src: IntAddr::Std(self.address.clone()),
                    dst: IntAddr::Std(info.dst),
                    value: info.value,
                    ihr_fee: info.ihr_fee,
                    fwd_fee: info.fwd_fee,
                    created_lt: info.created_lt,
                    created_at: info.created_at,
                });
                msg = match build_message(&header, &init_part, &body_part) {
                    Ok(msg) => msg,
                    Err(_) => match MessageRewrite::next(rewrite) {
                        Some(rewrite) => return Ok(SendMsgResult::Rewrite(rewrite)),
                        None => {
                            return check_skip_invalid(
                                skip_invalid,
                                ResultCode::FailedToFitMessage,
                                ctx,
                            )
                        }
                    },
                };

                if mode & (SEND_ALL_BALANCE | SEND_WITH_REMAINING_BALANCE) != 0 {
                    if let Some(received) = &mut ctx.received_message {
                        received.balance_remaining = CurrencyCollection::ZERO;
                    }
                }

                ctx.remaining_balance.tokens =
                    ctx.remaining_balance.tokens.saturating_sub(value_to_pay);
                ctx.remaining_balance.other = remaining_other;
            }
            RelaxedInfo::ExtOut(info) => {
                if ctx.remaining_balance.tokens < fwd_fee {
                    collect_fine(fine_per_cell, max_cell_count, stats.cell_count, ctx);
                    return check_skip_invalid(skip_invalid, ResultCode::NotEnoughBalance, ctx);
                }

                let header = MsgInfo::ExtOut(ExtOutMsgInfo {
                    src: IntAddr::Std(self.address.clone()),
                    dst: info.dst,
                    created_lt: info.created_lt,
                    created_at: info.created_at,
                });
                msg = match build_message(&header, &init_part, &body_part) {
                    Ok(msg) => msg,
                    Err(_) => match MessageRewrite::next(rewrite) {
                        Some(rewrite) => return Ok(SendMsgResult::Rewrite(rewrite)),
                        None => {
                            return check_skip_invalid(
                                skip_invalid,
                                ResultCode::FailedToFitMessage,
                                ctx,
                            )
                        }
                    },
                };

                ctx.remaining_balance.tokens = ctx.remaining_balance.tokens.saturating_sub(fwd_fee);
                fees_collected = fwd_fee;
            }
        }

        let size = &mut ctx.phase.total_message_size;
        size.cells = size
            .cells
            .checked_add(new_varuint56_truncate(stats.cell_count + 1))
            .unwrap_or(size.cells);
        size.bits = size
            .bits
            .checked_add(new_varuint56_truncate(
                stats.bit_count + msg.bit_len() as u64,
            ))
            .unwrap_or(size.bits);

        ctx.phase.messages_created += 1;
        ctx.end_lt += 1;
        ctx.out_msgs.push(msg);

        let action_fees = ctx.phase.total_action_fees.get_or_insert(Tokens::ZERO);
        *action_fees = action_fees.saturating_add(fees_collected);
        let fwd_fees = ctx.phase.total_fwd_fees.get_or_insert(Tokens::ZERO);
        *fwd_fees = fwd_fees.saturating_add(fwd_fee);

        if mode & SEND_DELETE_IF_EMPTY != 0 {
            ctx.delete_account = ctx.reserved_tokens.is_zero();
        }

        Ok(SendMsgResult::Sent)
    }

    fn do_reserve_currency(
        &self,
        mode: u8,
        mut reserve: Tokens,
        extra: Option<Cell>,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionFailed> {
        if mode & !RESERVE_MASK != 0 || extra.is_some() {
            return Err(ActionFailed);
        }

        if mode & RESERVE_WITH_ORIGINAL_BALANCE != 0 {
            if mode & RESERVE_REVERSE != 0 {
                reserve = match ctx.original_balance.checked_sub(reserve) {
                    Some(tokens) => tokens,
                    None => return Err(ActionFailed),
                };
            } else {
                reserve = reserve.saturating_add(ctx.original_balance);
            }
        } else if mode & RESERVE_REVERSE != 0 {
            return Err(ActionFailed);
        }

        if mode & RESERVE_IGNORE_ERROR != 0 {
            reserve = reserve.min(ctx.remaining_balance.tokens);
        }

        let mut new_remaining = match ctx.remaining_balance.tokens.checked_sub(reserve) {
            Some(tokens) => tokens,
            None => {
                ctx.phase.result_code = ResultCode::NotEnoughBalance as i32;
                return Err(ActionFailed);
            }
        };

        // leave only the requested amount, reserve everything else
        if mode & RESERVE_ALL_BUT != 0 {
            std::mem::swap(&mut new_remaining, &mut reserve);
        }

        ctx.remaining_balance.tokens = new_remaining;
        ctx.reserved_tokens = ctx.reserved_tokens.saturating_add(reserve);
        ctx.phase.special_actions += 1;
        Ok(())
    }

    fn do_change_library(
        &self,
        mode: u8,
        lib: LibRef,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionFailed> {
        const MODE_REMOVE: u8 = 0;
        const MODE_ADD_PRIVATE: u8 = 1;
        const MODE_ADD_PUBLIC: u8 = 2;

        if mode > MODE_ADD_PUBLIC {
            return Err(ActionFailed);
        }

        let hash = match &lib {
            LibRef::Cell(cell) => *cell.repr_hash(),
            LibRef::Hash(hash) => *hash,
        };

        if mode == MODE_REMOVE {
            if ctx.new_state.libraries.remove(&hash).is_err() {
                ctx.phase.result_code = ResultCode::InvalidLibrariesDict as i32;
                return Err(ActionFailed);
            }
            ctx.phase.special_actions += 1;
            return Ok(());
        }

        let public = mode == MODE_ADD_PUBLIC;
        if let Ok(Some(prev)) = ctx.new_state.libraries.get(&hash) {
            if prev.public == public {
                ctx.phase.special_actions += 1;
                return Ok(());
            }
        }

        let LibRef::Cell(root) = lib else {
            ctx.phase.result_code = ResultCode::NoLibCode as i32;
            return Err(ActionFailed);
        };

        let mut stats = ExtStorageStat::with_limits(StorageStatLimits {
            bit_count: u32::MAX,
            cell_count: self.config.size_limits.max_library_cells,
        });
        if !stats.add_cell(&root) {
            ctx.phase.result_code = ResultCode::LibOutOfLimits as i32;
            return Err(ActionFailed);
        }

        if ctx
            .new_state
            .libraries
            .set(&hash, &SimpleLib { public, root })
            .is_err()
        {
            ctx.phase.result_code = ResultCode::InvalidLibrariesDict as i32;
            return Err(ActionFailed);
        }

        ctx.phase.special_actions += 1;
        Ok(())
    }
}

struct ActionContext<'a> {
    need_bounce_on_fail: bool,
    received_message: Option<&'a mut ReceivedMessage>,
    original_balance: Tokens,
    remaining_balance: CurrencyCollection,
    reserved_tokens: Tokens,
    action_fine: Tokens,
    new_state: &'a mut StateInit,
    end_lt: u64,
    out_msgs: Vec<Cell>,
    delete_account: bool,
    compute_gas_fees: Tokens,
    phase: &'a mut ActionPhase,
}

/// Rewrites the message value per the mode flags and returns how many
/// tokens leave the account in total.
fn rewrite_message_value(
    info: &mut RelaxedIntInfo,
    mode: u8,
    fwd_fee: Tokens,
    ctx: &mut ActionContext<'_>,
) -> Result<Tokens, ResultCode> {
    let mut pay_separately = mode & SEND_PAY_FEE_SEPARATELY != 0;

    if mode & SEND_ALL_BALANCE != 0 {
        info.value = ctx.remaining_balance.clone();
        pay_separately = false;
    } else if mode & SEND_WITH_REMAINING_BALANCE != 0 {
        if let Some(received) = &ctx.received_message {
            info.value.tokens = info
                .value
                .tokens
                .checked_add(received.balance_remaining.tokens)
                .ok_or(ResultCode::NotEnoughBalance)?;
        }
        if !pay_separately {
            info.value.tokens = info
                .value
                .tokens
                .checked_sub(ctx.compute_gas_fees)
                .and_then(|t| t.checked_sub(ctx.action_fine))
                .ok_or(ResultCode::NotEnoughBalance)?;
        }
    }

    if pay_separately {
        info.value
            .tokens
            .checked_add(fwd_fee)
            .ok_or(ResultCode::NotEnoughBalance)
    } else {
        info.value.tokens = info
            .value
            .tokens
            .checked_sub(fwd_fee)
            .ok_or(ResultCode::NotEnoughBalance)?;
        Ok(info
            .value
            .tokens
            .checked_add(fwd_fee)
            .ok_or(ResultCode::NotEnoughBalance)?)
    }
}

enum OutAction {
    SendMsg { mode: u8, msg_root: Cell },
    SetCode { code: Cell },
    ReserveCurrency {
        mode: u8,
        tokens: Tokens,
        extra: Option<Cell>,
    },
    ChangeLibrary { mode: u8, lib: LibRef },
}

enum LibRef {
    Hash(HashBytes),
    Cell(Cell),
}

fn parse_action(cs: &mut CellSlice<'_>) -> Result<OutAction, Error> {
    Ok(match cs.load_u32()? {
        ACTION_SEND_MSG => OutAction::SendMsg {
            mode: cs.load_u8()?,
            msg_root: cs.load_reference_cloned()?,
        },
        ACTION_SET_CODE => OutAction::SetCode {
            code: cs.load_reference_cloned()?,
        },
        ACTION_RESERVE => OutAction::ReserveCurrency {
            mode: cs.load_u8()?,
            tokens: Tokens::load_from(cs)?,
            extra: if cs.load_bit()? {
                Some(cs.load_reference_cloned()?)
            } else {
                None
            },
        },
        ACTION_CHANGE_LIBRARY => {
            let raw = cs.load_u8()?;
            let lib = if raw & 1 != 0 {
                LibRef::Cell(cs.load_reference_cloned()?)
            } else {
                LibRef::Hash(cs.load_u256()?)
            };
            OutAction::ChangeLibrary {
                mode: raw >> 1,
                lib,
            }
        }
        _ => return Err(Error::InvalidTag),
    })
}

/// Relaxed message headers: the source address may still be empty.
enum RelaxedInfo {
    Int(RelaxedIntInfo),
    ExtOut(RelaxedExtOutInfo),
}

struct RelaxedIntInfo {
    ihr_disabled: bool,
    bounce: bool,
    bounced: bool,
    src: Option<StdAddr>,
    dst: StdAddr,
    value: CurrencyCollection,
    ihr_fee: Tokens,
    fwd_fee: Tokens,
    created_lt: u64,
    created_at: u32,
}

struct RelaxedExtOutInfo {
    src: Option<StdAddr>,
    dst: Option<ExtAddr>,
    created_lt: u64,
    created_at: u32,
}

impl RelaxedInfo {
    fn load(cs: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(if !cs.load_bit()? {
            Self::Int(RelaxedIntInfo {
                ihr_disabled: cs.load_bit()?,
                bounce: cs.load_bit()?,
                bounced: cs.load_bit()?,
                src: load_opt_src(cs)?,
                dst: StdAddr::load_from(cs)?,
                value: CurrencyCollection::load_from(cs)?,
                ihr_fee: Tokens::load_from(cs)?,
                fwd_fee: Tokens::load_from(cs)?,
                created_lt: cs.load_u64()?,
                created_at: cs.load_u32()?,
            })
        } else if !cs.load_bit()? {
            // inbound external headers cannot appear in the output
            return Err(Error::InvalidTag);
        } else {
            Self::ExtOut(RelaxedExtOutInfo {
                src: load_opt_src(cs)?,
                dst: match cs.get_small_uint(0, 2)? {
                    0b00 => {
                        cs.skip_first(2, 0)?;
                        None
                    }
                    _ => Some(ExtAddr::load_from(cs)?),
                },
                created_lt: cs.load_u64()?,
                created_at: cs.load_u32()?,
            })
        })
    }
}

fn load_opt_src(cs: &mut CellSlice<'_>) -> Result<Option<StdAddr>, Error> {
    match cs.get_small_uint(0, 2)? {
        0b00 => {
            cs.skip_first(2, 0)?;
            Ok(None)
        }
        _ => Ok(Some(StdAddr::load_from(cs)?)),
    }
}

fn src_is_this_account(src: &Option<StdAddr>, address: &StdAddr) -> bool {
    match src {
        None => true,
        Some(src) => src == address,
    }
}

enum PrefixKind {
    StateInit,
    Body,
}

/// Cuts the `init` or `body` segment out of the message root and keeps it
/// as a standalone cell with the exact same bits and references.
fn load_prefix_part(cs: &mut CellSlice<'_>, kind: PrefixKind) -> Result<Cell, Error> {
    let before = *cs;
    match kind {
        PrefixKind::StateInit => {
            if cs.load_bit()? {
                if cs.load_bit()? {
                    let root = cs.load_reference()?;
                    if root.is_exotic() {
                        return Err(Error::InvalidData);
                    }
                    let mut inner = root.as_slice()?;
                    StateInit::load_from(&mut inner)?;
                    if !inner.is_empty() {
                        return Err(Error::CellOverflow);
                    }
                } else {
                    StateInit::load_from(cs)?;
                }
            }
        }
        PrefixKind::Body => {
            if cs.load_bit()? {
                cs.skip_first(0, 1)?;
            } else {
                cs.load_remaining();
            }
        }
    }

    let mut part = before;
    part.only_first(
        before.size_bits() - cs.size_bits(),
        before.size_refs() - cs.size_refs(),
    )?;

    let mut b = CellBuilder::new();
    b.store_slice(&part)?;
    b.build()
}

fn rewrite_state_init_to_cell(part: &Cell) -> Result<Cell, Error> {
    let mut cs = part.as_slice()?;
    // just$1 left$0
    cs.skip_first(2, 0)?;

    let mut inner = CellBuilder::new();
    inner.store_slice(&cs)?;
    let inner = inner.build()?;

    let mut b = CellBuilder::new();
    b.store_small_uint(0b11, 2)?;
    b.store_reference(inner)?;
    b.build()
}

fn rewrite_body_to_cell(part: &Cell) -> Result<Cell, Error> {
    let mut cs = part.as_slice()?;
    // left$0
    cs.skip_first(1, 0)?;

    let mut inner = CellBuilder::new();
    inner.store_slice(&cs)?;
    let inner = inner.build()?;

    let mut b = CellBuilder::new();
    b.store_bit_one()?;
    b.store_reference(inner)?;
    b.build()
}

fn build_message(info: &MsgInfo, init_part: &Cell, body_part: &Cell) -> Result<Cell, Error> {
    let mut b = CellBuilder::new();
    info.store_into(&mut b, &mut EmptyCellContext)?;
    b.store_slice(&init_part.as_slice()?)?;
    b.store_slice(&body_part.as_slice()?)?;
    b.build()
}

fn check_state_limits(state: &StateInit, exec: &ExecutorState<'_>) -> bool {
    let limits = &exec.config.size_limits;
    let mut stats = ExtStorageStat::with_limits(StorageStatLimits {
        bit_count: limits.max_acc_state_bits,
        cell_count: limits.max_acc_state_cells,
    });
    for cell in [&state.code, &state.data] {
        if let Some(cell) = cell {
            if !stats.add_cell(cell) {
                return false;
            }
        }
    }
    if let Some(root) = state.libraries.root() {
        if !stats.add_cell(root) {
            return false;
        }
    }
    true
}

#[repr(i32)]
#[derive(Debug, Clone, Copy)]
enum ResultCode {
    ActionListInvalid = 32,
    TooManyActions = 33,
    ActionInvalid = 34,
    InvalidSrcAddr = 35,
    InvalidDstAddr = 36,
    NotEnoughBalance = 37,
    NotEnoughExtraBalance = 38,
    FailedToFitMessage = 39,
    MessageOutOfLimits = 40,
    NoLibCode = 41,
    InvalidLibrariesDict = 42,
    LibOutOfLimits = 43,
    StateOutOfLimits = 50,
}

struct ActionFailed;

impl From<Error> for ActionFailed {
    #[inline]
    fn from(_: Error) -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy)]
enum SendMsgResult {
    Sent,
    Rewrite(MessageRewrite),
}

#[derive(Debug, Clone, Copy)]
enum MessageRewrite {
    StateInitToCell,
    BodyToCell,
}

impl MessageRewrite {
    fn next(rewrite: Option<Self>) -> Option<Self> {
        match rewrite {
            None => Some(Self::StateInitToCell),
            Some(Self::StateInitToCell) => Some(Self::BodyToCell),
            Some(Self::BodyToCell) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParsedConfig;
    use crate::state::ExecutorParams;
    use crate::tests::{make_default_config, make_default_params};

    fn make_state<'a>(
        params: &'a ExecutorParams,
        config: &'a ParsedConfig,
        balance: u128,
    ) -> ExecutorState<'a> {
        ExecutorState {
            params,
            config,
            is_special: false,
            address: StdAddr::new(0, HashBytes([0x02; 32])),
            storage_stat: Default::default(),
            balance: CurrencyCollection::new(balance),
            state: AccountState::Uninit,
            orig_status: AccountStatus::Active,
            end_status: AccountStatus::Active,
            start_lt: 1_000_000,
            end_lt: 1_000_001,
            out_msgs: Vec::new(),
            total_fees: Tokens::ZERO,
            vm_log: String::new(),
        }
    }

    fn relaxed_int_msg(dst: &StdAddr, value: u128) -> Cell {
        let mut b = CellBuilder::new();
        // int_msg_info$0 ihr_disabled:true bounce:false bounced:false
        b.store_small_uint(0b0100, 4).unwrap();
        // src:addr_none$00
        b.store_small_uint(0b00, 2).unwrap();
        dst.store_into(&mut b, &mut EmptyCellContext).unwrap();
        CurrencyCollection::new(value)
            .store_into(&mut b, &mut EmptyCellContext)
            .unwrap();
        Tokens::ZERO.store_into(&mut b, &mut EmptyCellContext).unwrap();
        Tokens::ZERO.store_into(&mut b, &mut EmptyCellContext).unwrap();
        b.store_u64(0).unwrap();
        b.store_u32(0).unwrap();
        // init:nothing$0 body:left$0 (empty)
        b.store_bit_zero().unwrap();
        b.store_bit_zero().unwrap();
        b.build().unwrap()
    }

    fn run_actions(state: &mut ExecutorState<'_>, actions: Cell) -> ActionPhaseFull {
        let original_balance = state.balance.tokens;
        state
            .action_phase(ActionPhaseContext {
                received_message: None,
                original_balance,
                new_state: StateInit::default(),
                actions,
                compute_gas_fees: Tokens::ZERO,
            })
            .unwrap()
    }

    #[test]
    fn send_message_pays_fees_separately() {
        let params = make_default_params();
        let config = make_default_config();
        let mut state = make_state(&params, &config, 1_000_000_000);

        let dst = StdAddr::new(0, HashBytes([0x07; 32]));
        let msg = relaxed_int_msg(&dst, 100_000_000);

        let actions = {
            let mut b = CellBuilder::new();
            b.store_reference(Cell::empty_cell()).unwrap();
            b.store_u32(ACTION_SEND_MSG).unwrap();
            b.store_u8(SEND_PAY_FEE_SEPARATELY).unwrap();
            b.store_reference(msg).unwrap();
            b.build().unwrap()
        };

        let res = run_actions(&mut state, actions);
        assert!(res.action_phase.success);
        assert!(res.action_phase.valid);
        assert_eq!(res.action_phase.result_code, 0);
        assert_eq!(res.action_phase.total_actions, 1);
        assert_eq!(res.action_phase.messages_created, 1);
        assert_eq!(state.out_msgs.len(), 1);
        assert_eq!(state.end_lt, 1_000_002);

        // the message has no child cells, only the lump price is charged
        let fwd_fee = config.fwd_prices.compute_fwd_fee(0, 0);
        let first_part = config.fwd_prices.get_first_part(fwd_fee);
        assert_eq!(res.action_phase.total_fwd_fees, Some(fwd_fee));
        assert_eq!(res.action_phase.total_action_fees, Some(first_part));
        assert_eq!(state.total_fees, first_part);
        assert_eq!(
            state.balance.tokens,
            Tokens::new(1_000_000_000 - 100_000_000).saturating_sub(fwd_fee)
        );

        // the source address and the remaining fee are rewritten
        let sent = state.out_msgs.first().unwrap();
        let mut cs = sent.as_slice().unwrap();
        let MsgInfo::Int(info) = MsgInfo::load_from(&mut cs).unwrap() else {
            panic!("expected an internal message");
        };
        assert_eq!(*info.src.as_std(), state.address);
        assert_eq!(*info.dst.as_std(), dst);
        assert_eq!(info.value.tokens, Tokens::new(100_000_000));
        assert_eq!(info.fwd_fee, fwd_fee.saturating_sub(first_part));
        assert_eq!(info.created_lt, 1_000_001);
        assert_eq!(info.created_at, params.block_unixtime);
    }

    #[test]
    fn send_message_without_funds_fails() {
        let params = make_default_params();
        let config = make_default_config();
        let mut state = make_state(&params, &config, 1_000_000);

        let dst = StdAddr::new(0, HashBytes([0x07; 32]));
        let msg = relaxed_int_msg(&dst, 100_000_000);

        let actions = {
            let mut b = CellBuilder::new();
            b.store_reference(Cell::empty_cell()).unwrap();
            b.store_u32(ACTION_SEND_MSG).unwrap();
            b.store_u8(SEND_BOUNCE_ON_ERROR).unwrap();
            b.store_reference(msg).unwrap();
            b.build().unwrap()
        };

        let res = run_actions(&mut state, actions);
        assert!(!res.action_phase.success);
        assert!(res.action_phase.valid);
        assert!(res.action_phase.no_funds);
        assert_eq!(
            res.action_phase.result_code,
            ResultCode::NotEnoughBalance as i32
        );
        assert!(res.bounce);

        // nothing is sent and the balance stays intact
        assert!(state.out_msgs.is_empty());
        assert_eq!(state.balance.tokens, Tokens::new(1_000_000));
    }

    #[test]
    fn reserve_then_send_keeps_the_reserve() {
        let params = make_default_params();
        let config = make_default_config();
        let mut state = make_state(&params, &config, 1_000_000_000);

        let dst = StdAddr::new(0, HashBytes([0x07; 32]));
        let msg = relaxed_int_msg(&dst, 0);

        // reserve everything except 500_000_000, then send the rest
        let reserve = {
            let mut b = CellBuilder::new();
            b.store_reference(Cell::empty_cell()).unwrap();
            b.store_u32(ACTION_RESERVE).unwrap();
            b.store_u8(RESERVE_ALL_BUT).unwrap();
            Tokens::new(500_000_000)
                .store_into(&mut b, &mut EmptyCellContext)
                .unwrap();
            b.store_bit_zero().unwrap();
            b.build().unwrap()
        };
        let actions = {
            let mut b = CellBuilder::new();
            b.store_reference(reserve).unwrap();
            b.store_u32(ACTION_SEND_MSG).unwrap();
            b.store_u8(SEND_ALL_BALANCE).unwrap();
            b.store_reference(msg).unwrap();
            b.build().unwrap()
        };

        let res = run_actions(&mut state, actions);
        assert!(res.action_phase.success);
        assert_eq!(res.action_phase.total_actions, 2);
        assert_eq!(res.action_phase.special_actions, 1);
        assert_eq!(res.action_phase.messages_created, 1);

        // the reserved half is returned to the balance afterwards
        assert_eq!(state.balance.tokens, Tokens::new(500_000_000));

        let sent = state.out_msgs.first().unwrap();
        let mut cs = sent.as_slice().unwrap();
        let MsgInfo::Int(info) = MsgInfo::load_from(&mut cs).unwrap() else {
            panic!("expected an internal message");
        };
        let fwd_fee = config.fwd_prices.compute_fwd_fee(0, 0);
        assert_eq!(
            info.value.tokens,
            Tokens::new(500_000_000).saturating_sub(fwd_fee)
        );
    }

    #[test]
    fn set_code_updates_the_state() {
        let params = make_default_params();
        let config = make_default_config();
        let mut state = make_state(&params, &config, 1_000_000_000);

        let code = {
            let mut b = CellBuilder::new();
            b.store_u32(0xdeadbeef).unwrap();
            b.build().unwrap()
        };

        let actions = {
            let mut b = CellBuilder::new();
            b.store_reference(Cell::empty_cell()).unwrap();
            b.store_u32(ACTION_SET_CODE).unwrap();
            b.store_reference(code.clone()).unwrap();
            b.build().unwrap()
        };

        let res = run_actions(&mut state, actions);
        assert!(res.action_phase.success);
        assert_eq!(res.action_phase.special_actions, 1);

        let AccountState::Active(state_init) = &state.state else {
            panic!("expected an active account");
        };
        assert_eq!(state_init.code.as_ref(), Some(&code));
    }

    #[test]
    fn malformed_action_list_is_rejected() {
        let params = make_default_params();
        let config = make_default_config();
        let mut state = make_state(&params, &config, 1_000_000_000);

        // a non-empty node without a link to the previous one
        let actions = {
            let mut b = CellBuilder::new();
            b.store_u32(0x12345678).unwrap();
            b.build().unwrap()
        };

        let res = run_actions(&mut state, actions);
        assert!(!res.action_phase.valid);
        assert_eq!(
            res.action_phase.result_code,
            ResultCode::ActionListInvalid as i32
        );
        assert_eq!(state.balance.tokens, Tokens::new(1_000_000_000));
    }
}
