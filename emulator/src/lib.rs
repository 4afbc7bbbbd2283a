//! Emulation facades over the transaction executor and the VM.
//!
//! Everything crossing this boundary is plain data: Base64-encoded bags
//! of cells, decimal strings and JSON-friendly result structs. Failures
//! surface as error values or error fields, never as panics.

pub use self::stack::{decode_stack, encode_stack, StackEntry};
pub use self::transaction::{TransactionEmulator, TxEmulatorOutput};
pub use self::tvm::{TvmEmulator, TvmEmulatorOutput};

mod stack;
mod transaction;
mod tvm;
