//! JSON transport encoding of VM stack values.

use std::rc::Rc;
use std::str::FromStr;

use anyhow::{Context, Result};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use tonkit_types::boc::Boc;
use tonkit_types::cell::CellBuilder;
use tonkit_vm::util::OwnedCellSlice;
use tonkit_vm::{RcStackValue, Stack, StackValue, StackValueType, Tuple};

/// One stack value in the transport encoding.
///
/// Cells and slices travel as Base64-encoded bags of cells, numbers as
/// decimal strings and tuples as nested entry arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StackEntry {
    Null,
    Cell(String),
    CellSlice(String),
    Number(String),
    Tuple(Vec<StackEntry>),
}

impl StackEntry {
    pub fn to_stack_value(&self) -> Result<RcStackValue> {
        Ok(match self {
            Self::Null => Stack::make_null(),
            Self::Cell(boc) => {
                let cell = Boc::decode_base64(boc).context("invalid cell")?;
                Rc::new(cell)
            }
            Self::CellSlice(boc) => {
                let cell = Boc::decode_base64(boc).context("invalid cell slice")?;
                Rc::new(OwnedCellSlice::new(cell))
            }
            Self::Number(dec) => {
                let int = BigInt::from_str(dec).context("invalid number")?;
                Rc::new(int)
            }
            Self::Tuple(entries) => {
                let mut tuple = Tuple::with_capacity(entries.len());
                for entry in entries {
                    tuple.push(entry.to_stack_value()?);
                }
                Rc::new(tuple)
            }
        })
    }

    pub fn from_stack_value(value: &dyn StackValue) -> Result<Self> {
        Ok(match value.ty() {
            StackValueType::Null => Self::Null,
            StackValueType::Int => {
                let int = value.as_int().context("expected an integer")?;
                Self::Number(int.to_string())
            }
            StackValueType::Cell => {
                let cell = value.as_cell().context("expected a cell")?;
                Self::Cell(Boc::encode_base64(cell))
            }
            StackValueType::Slice => {
                let slice = value.as_slice().context("expected a slice")?;
                let mut b = CellBuilder::new();
                b.store_slice(&slice.apply()?)?;
                Self::CellSlice(Boc::encode_base64(&b.build()?))
            }
            StackValueType::Tuple => {
                let items = value.as_tuple().context("expected a tuple")?;
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    entries.push(Self::from_stack_value(item.as_ref())?);
                }
                Self::Tuple(entries)
            }
            ty => anyhow::bail!("stack value of type {ty:?} has no transport encoding"),
        })
    }
}

/// Converts transport entries into VM stack items, bottom first.
pub fn decode_stack(entries: &[StackEntry]) -> Result<Vec<RcStackValue>> {
    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        items.push(entry.to_stack_value()?);
    }
    Ok(items)
}

/// Converts VM stack items into transport entries, bottom first.
pub fn encode_stack(items: &[RcStackValue]) -> Result<Vec<StackEntry>> {
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        entries.push(StackEntry::from_stack_value(item.as_ref())?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shape() {
        let entries = vec![
            StackEntry::Number("-123".to_owned()),
            StackEntry::Tuple(vec![StackEntry::Null, StackEntry::Number("1".to_owned())]),
        ];
        let json = serde_json::to_value(&entries).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                { "type": "number", "value": "-123" },
                { "type": "tuple", "value": [
                    { "type": "null" },
                    { "type": "number", "value": "1" },
                ] },
            ])
        );

        let parsed: Vec<StackEntry> = serde_json::from_value(json).unwrap();
        assert_eq!(serde_json::to_value(&parsed).unwrap(), serde_json::to_value(&entries).unwrap());
    }

    #[test]
    fn stack_round_trip() {
        let cell = {
            let mut b = CellBuilder::new();
            b.store_u32(0xdeadbeef).unwrap();
            b.build().unwrap()
        };

        let entries = vec![
            StackEntry::Null,
            StackEntry::Number("340282366920938463463374607431768211455".to_owned()),
            StackEntry::Cell(Boc::encode_base64(&cell)),
            StackEntry::CellSlice(Boc::encode_base64(&cell)),
            StackEntry::Tuple(vec![StackEntry::Number("42".to_owned())]),
        ];

        let items = decode_stack(&entries).unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[2].as_cell().unwrap().repr_hash(), cell.repr_hash());

        let back = encode_stack(&items).unwrap();
        assert_eq!(
            serde_json::to_value(&back).unwrap(),
            serde_json::to_value(&entries).unwrap()
        );
    }

    #[test]
    fn malformed_entries_are_rejected() {
        assert!(StackEntry::Number("12x".to_owned()).to_stack_value().is_err());
        assert!(StackEntry::Cell("???".to_owned()).to_stack_value().is_err());
    }
}
