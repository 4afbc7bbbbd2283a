//! Cell and bag-of-cells primitives shared by the whole workspace.
//!
//! Everything a TON-like ledger persists is a DAG of [`Cell`]s: up to 1023
//! data bits and up to 4 references per node, identified by a recursive
//! representation hash. This crate owns that data model, the binary
//! bag-of-cells codec, dictionary (HashmapE) access and the TL-B models for
//! accounts, messages and transactions.
//!
//! [`Cell`]: cell::Cell

/// Prevents using `From::from` for plain error conversion.
macro_rules! ok {
    ($e:expr $(,)?) => {
        match $e {
            core::result::Result::Ok(val) => val,
            core::result::Result::Err(err) => return core::result::Result::Err(err),
        }
    };
}

pub mod boc;
pub mod cell;
pub mod dict;
pub mod error;
pub mod models;
pub mod num;

pub mod prelude {
    pub use crate::boc::Boc;
    pub use crate::cell::{
        Cell, CellBuilder, CellContext, CellDescriptor, CellParts, CellSlice, CellSliceParts,
        CellSliceRange, CellType, EmptyCellContext, HashBytes, LevelMask, Load, LoadMode, Store,
        MAX_BIT_LEN, MAX_REF_COUNT,
    };
    pub use crate::dict::{Dict, DictKey, RawDict};
    pub use crate::error::Error;
    pub use crate::num::Tokens;
}

pub use self::error::Error;
