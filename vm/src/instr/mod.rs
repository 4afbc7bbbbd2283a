use std::sync::OnceLock;

use crate::dispatch::DispatchTable;

pub mod arithops;
pub mod cellops;
pub mod cmpops;
pub mod configops;
pub mod contops;
pub mod currencyops;
pub mod debugops;
pub mod dictops;
pub mod gasops;
pub mod hashops;
pub mod logicops;
pub mod messageops;
pub mod randops;
pub mod stackops;
pub mod tupleops;

pub fn codepage(n: u16) -> Option<&'static DispatchTable> {
    match n {
        0 => Some(codepage0()),
        _ => None,
    }
}

pub fn codepage0() -> &'static DispatchTable {
    static CP0: OnceLock<DispatchTable> = OnceLock::new();
    CP0.get_or_init(|| {
        let mut cp = DispatchTable::builder(0);
        stackops::register(&mut cp)
            .and_then(|_| tupleops::register(&mut cp))
            .and_then(|_| arithops::register(&mut cp))
            .and_then(|_| logicops::register(&mut cp))
            .and_then(|_| cmpops::register(&mut cp))
            .and_then(|_| cellops::register(&mut cp))
            .and_then(|_| contops::register(&mut cp))
            .and_then(|_| dictops::register(&mut cp))
            .and_then(|_| gasops::register(&mut cp))
            .and_then(|_| randops::register(&mut cp))
            .and_then(|_| configops::register(&mut cp))
            .and_then(|_| hashops::register(&mut cp))
            .and_then(|_| currencyops::register(&mut cp))
            .and_then(|_| messageops::register(&mut cp))
            .and_then(|_| debugops::register(&mut cp))
            .expect("codepage 0 opcode table is malformed");
        cp.build()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codepage0_builds() {
        let cp = codepage0();
        assert_eq!(cp.id(), 0);
        assert!(codepage(0).is_some());
        assert!(codepage(1).is_none());
    }
}
