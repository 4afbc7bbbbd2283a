pub use self::action::{ActionPhaseContext, ActionPhaseFull};
pub use self::bounce::BouncePhaseContext;
pub use self::compute::{ComputePhaseContext, ComputePhaseFull};
pub use self::storage::StoragePhaseContext;

mod action;
mod bounce;
mod compute;
mod credit;
mod receive;
mod storage;
