extern crate self as tonkit_vm;

/// Prevents using `From::from` for plain error conversion.
macro_rules! ok {
    ($e:expr $(,)?) => {
        match $e {
            core::result::Result::Ok(val) => val,
            core::result::Result::Err(err) => return core::result::Result::Err(err),
        }
    };
}

macro_rules! vm_bail {
    ($($tt:tt)*) => {
        return Err(anyhow::Error::from($crate::error::VmError::$($tt)*))
    };
}

macro_rules! vm_ensure {
    ($cond:expr, $($tt:tt)*) => {
        if !($cond) {
            vm_bail!($($tt)*)
        }
    };
}

macro_rules! vm_log {
    ($st:expr, $($args:tt)*) => {{
        #[cfg(feature = "tracing")]
        tracing::trace!($($args)*);
        $st.log.write_line(format_args!($($args)*));
    }};
}

pub use self::error::{VmError, VmException, VmResult};
pub use self::gas::{GasConsumer, GasParams, LibraryProvider, NoLibraries};
pub use self::log::VmLog;
pub use self::smc_info::SmcInfo;
pub use self::stack::{RcStackValue, Stack, StackValue, StackValueType, Tuple};
pub use self::state::{BehaviourModifiers, VmState};

pub mod cont;
pub mod dispatch;
pub mod error;
pub mod gas;
pub mod instr;
pub mod log;
pub mod smc_info;
pub mod stack;
pub mod state;
pub mod util;

#[cfg(test)]
mod tests {
    use tonkit_types::prelude::*;
    use tracing_test::traced_test;

    use super::*;

    #[test]
    #[traced_test]
    fn dispatch_works() {
        // PUSHINT 2, PUSHINT 3, ADD
        let mut b = CellBuilder::new();
        b.store_u8(0x72).unwrap();
        b.store_u8(0x73).unwrap();
        b.store_u8(0xa0).unwrap();
        let code = b.build().unwrap();

        let mut vm = VmState::builder().with_code(code).build();
        let exit_code = vm.run();
        assert_eq!(exit_code, 0);
        assert_eq!(vm.stack.items.len(), 1);
        let sum = vm.stack.items[0].as_int().unwrap();
        assert_eq!(*sum, num_bigint::BigInt::from(5));
    }
}
