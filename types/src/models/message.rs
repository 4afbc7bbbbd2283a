//! Messages: the only way value and code enter or leave an account.

use crate::cell::{
    Cell, CellBuilder, CellContext, CellSlice, CellSliceRange, Load, Store,
};
use crate::error::Error;
use crate::models::account::{CurrencyCollection, StateInit};
use crate::models::address::{load_opt_ext_addr, store_opt_ext_addr, ExtAddr, IntAddr};
use crate::num::Tokens;

/// `int_msg_info$0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntMsgInfo {
    pub ihr_disabled: bool,
    pub bounce: bool,
    pub bounced: bool,
    pub src: IntAddr,
    pub dst: IntAddr,
    pub value: CurrencyCollection,
    pub ihr_fee: Tokens,
    pub fwd_fee: Tokens,
    pub created_lt: u64,
    pub created_at: u32,
}

impl Default for IntMsgInfo {
    fn default() -> Self {
        Self {
            ihr_disabled: true,
            bounce: false,
            bounced: false,
            src: IntAddr::default(),
            dst: IntAddr::default(),
            value: CurrencyCollection::ZERO,
            ihr_fee: Tokens::ZERO,
            fwd_fee: Tokens::ZERO,
            created_lt: 0,
            created_at: 0,
        }
    }
}

/// `ext_in_msg_info$10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtInMsgInfo {
    pub src: Option<ExtAddr>,
    pub dst: IntAddr,
    pub import_fee: Tokens,
}

/// `ext_out_msg_info$11`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtOutMsgInfo {
    pub src: IntAddr,
    pub dst: Option<ExtAddr>,
    pub created_lt: u64,
    pub created_at: u32,
}

/// Header of any message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgInfo {
    Int(IntMsgInfo),
    ExtIn(ExtInMsgInfo),
    ExtOut(ExtOutMsgInfo),
}

impl MsgInfo {
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub const fn is_external_in(&self) -> bool {
        matches!(self, Self::ExtIn(_))
    }
}

impl Store for MsgInfo {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        match self {
            Self::Int(info) => {
                ok!(builder.store_bit_zero());
                ok!(builder.store_bit(info.ihr_disabled));
                ok!(builder.store_bit(info.bounce));
                ok!(builder.store_bit(info.bounced));
                ok!(info.src.store_into(builder, context));
                ok!(info.dst.store_into(builder, context));
                ok!(info.value.store_into(builder, context));
                ok!(info.ihr_fee.store_into(builder, context));
                ok!(info.fwd_fee.store_into(builder, context));
                ok!(builder.store_u64(info.created_lt));
                builder.store_u32(info.created_at)
            }
            Self::ExtIn(info) => {
                ok!(builder.store_small_uint(0b10, 2));
                ok!(store_opt_ext_addr(&info.src, builder, context));
                ok!(info.dst.store_into(builder, context));
                info.import_fee.store_into(builder, context)
            }
            Self::ExtOut(info) => {
                ok!(builder.store_small_uint(0b11, 2));
                ok!(info.src.store_into(builder, context));
                ok!(store_opt_ext_addr(&info.dst, builder, context));
                ok!(builder.store_u64(info.created_lt));
                builder.store_u32(info.created_at)
            }
        }
    }
}

impl Load<'_> for MsgInfo {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(if !ok!(slice.load_bit()) {
            Self::Int(IntMsgInfo {
                ihr_disabled: ok!(slice.load_bit()),
                bounce: ok!(slice.load_bit()),
                bounced: ok!(slice.load_bit()),
                src: ok!(IntAddr::load_from(slice)),
                dst: ok!(IntAddr::load_from(slice)),
                value: ok!(CurrencyCollection::load_from(slice)),
                ihr_fee: ok!(Tokens::load_from(slice)),
                fwd_fee: ok!(Tokens::load_from(slice)),
                created_lt: ok!(slice.load_u64()),
                created_at: ok!(slice.load_u32()),
            })
        } else if !ok!(slice.load_bit()) {
            Self::ExtIn(ExtInMsgInfo {
                src: ok!(load_opt_ext_addr(slice)),
                dst: ok!(IntAddr::load_from(slice)),
                import_fee: ok!(Tokens::load_from(slice)),
            })
        } else {
            Self::ExtOut(ExtOutMsgInfo {
                src: ok!(IntAddr::load_from(slice)),
                dst: ok!(load_opt_ext_addr(slice)),
                created_lt: ok!(slice.load_u64()),
                created_at: ok!(slice.load_u32()),
            })
        })
    }
}

/// A fully parsed message with the body kept as a window into the original
/// cell, so re-serialization and hashing stay byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    pub info: MsgInfo,
    pub init: Option<StateInit>,
    pub body: (Cell, CellSliceRange),
    /// Whether `init` and `body` were stored in child cells.
    pub layout: MessageLayout,
}

/// Placement of `init` and `body`: inline in the root cell or in a ref.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageLayout {
    pub init_to_ref: bool,
    pub body_to_ref: bool,
}

impl OwnedMessage {
    pub fn empty_body() -> (Cell, CellSliceRange) {
        (Cell::empty_cell(), CellSliceRange::empty())
    }
}

impl Store for OwnedMessage {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(self.info.store_into(builder, context));
        match &self.init {
            Some(init) => {
                ok!(builder.store_bit_one());
                if self.layout.init_to_ref {
                    ok!(builder.store_bit_one());
                    let mut child = CellBuilder::new();
                    ok!(init.store_into(&mut child, context));
                    ok!(builder.store_reference(ok!(child.build_ext(context))));
                } else {
                    ok!(builder.store_bit_zero());
                    ok!(init.store_into(builder, context));
                }
            }
            None => ok!(builder.store_bit_zero()),
        }
        let (body_cell, body_range) = &self.body;
        let body = body_range.apply_unchecked(body_cell);
        if self.layout.body_to_ref {
            ok!(builder.store_bit_one());
            let mut child = CellBuilder::new();
            ok!(child.store_slice(&body));
            builder.store_reference(ok!(child.build_ext(context)))
        } else {
            ok!(builder.store_bit_zero());
            builder.store_slice(&body)
        }
    }
}

impl Load<'_> for OwnedMessage {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        let info = ok!(MsgInfo::load_from(slice));
        let mut layout = MessageLayout::default();
        let init = if ok!(slice.load_bit()) {
            layout.init_to_ref = ok!(slice.load_bit());
            if layout.init_to_ref {
                let cell = ok!(slice.load_reference());
                Some(ok!(cell.parse::<StateInit>()))
            } else {
                Some(ok!(StateInit::load_from(slice)))
            }
        } else {
            None
        };
        layout.body_to_ref = ok!(slice.load_bit());
        let body = if layout.body_to_ref {
            let cell = ok!(slice.load_reference_cloned());
            let range = CellSliceRange::full(&cell);
            (cell, range)
        } else {
            let remaining = slice.load_remaining();
            (remaining.cell().clone(), remaining.range())
        };
        Ok(Self {
            info,
            init,
            body,
            layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::EmptyCellContext;
    use crate::models::address::StdAddr;
    use crate::cell::HashBytes;

    fn build(msg: &OwnedMessage) -> Cell {
        let mut b = CellBuilder::new();
        msg.store_into(&mut b, &mut EmptyCellContext).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn internal_message_round_trip() {
        let mut body = CellBuilder::new();
        body.store_u32(0xdead_beef).unwrap();
        let body = body.build().unwrap();
        let range = CellSliceRange::full(&body);

        let msg = OwnedMessage {
            info: MsgInfo::Int(IntMsgInfo {
                bounce: true,
                src: StdAddr::new(0, HashBytes([1; 32])).into(),
                dst: StdAddr::new(0, HashBytes([2; 32])).into(),
                value: CurrencyCollection::new(1_500_000_000),
                created_lt: 42,
                created_at: 1_700_000_000,
                ..Default::default()
            }),
            init: None,
            body: (body, range),
            layout: MessageLayout {
                init_to_ref: false,
                body_to_ref: true,
            },
        };
        let cell = build(&msg);
        let parsed = cell.parse::<OwnedMessage>().unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn external_message_round_trip() {
        let msg = OwnedMessage {
            info: MsgInfo::ExtIn(ExtInMsgInfo {
                src: None,
                dst: StdAddr::new(0, HashBytes([3; 32])).into(),
                import_fee: Tokens::ZERO,
            }),
            init: Some(StateInit {
                code: Some(Cell::empty_cell()),
                ..Default::default()
            }),
            body: OwnedMessage::empty_body(),
            layout: MessageLayout {
                init_to_ref: true,
                body_to_ref: false,
            },
        };
        let cell = build(&msg);
        let parsed = cell.parse::<OwnedMessage>().unwrap();
        assert_eq!(parsed.info, msg.info);
        assert_eq!(parsed.init, msg.init);
    }
}
