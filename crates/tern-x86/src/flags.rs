//! The lazy condition-flags thunk.
//!
//! Flag-affecting instructions never compute individual flags. They record an
//! operation class, an operand width, and up to three operand values into the
//! four `cc_*` guest slots; flag readers call the external evaluator helpers
//! against whatever thunk is live. Exactly one thunk is live at any point.
//!
//! Per-class slot assignment:
//! - `Add`/`Sub`: dep1 = first operand, dep2 = second operand.
//! - `Adc`/`Sbb`: dep1 = first operand, dep2 = second ^ carry-in,
//!   ndep = carry-in.
//! - `Logic`: dep1 = result.
//! - `Inc`/`Dec`: dep1 = result, ndep = previous carry (carry is preserved
//!   across INC/DEC and must be threaded through).
//! - `UMul`/`SMul`: dep1/dep2 = the two factors.
//! - `Shl`/`Shr`: dep1 = result, dep2 = the value shifted by one less (the
//!   evaluator derives CF/OF from it). Written only under a count != 0
//!   guard.
//! - `Rol`/`Ror`: dep1 = result, ndep = previous RFLAGS (only CF/OF change).
//! - `RclC`/`RcrC`: dep1 = helper-produced result, dep2 = masked count,
//!   ndep = previous RFLAGS; the rotate itself comes from the external
//!   helper (its bit-level definition is width-dependent in a way not worth
//!   inlining).
//! - `Copy`: dep1 holds literal RFLAGS bits (POPF, SAHF, BT, FP compares).

use crate::guest::{OFF_CC_DEP1, OFF_CC_DEP2, OFF_CC_NDEP, OFF_CC_OP};
use crate::lift::Lifter;
use tern_ir::{Expr, PureHelper, Stmt, Ty, UnOp};
use tern_types::{Cond, Width};

/// RFLAGS bit positions (for `Copy`-class thunks and POPF/PUSHF masks).
pub const RF_CF: u64 = 1 << 0;
pub const RF_PF: u64 = 1 << 2;
pub const RF_AF: u64 = 1 << 4;
pub const RF_ZF: u64 = 1 << 6;
pub const RF_SF: u64 = 1 << 7;
pub const RF_DF: u64 = 1 << 10;
pub const RF_OF: u64 = 1 << 11;
/// The flags an arithmetic thunk models.
pub const RF_STATUS_MASK: u64 = RF_CF | RF_PF | RF_AF | RF_ZF | RF_SF | RF_OF;

/// Operation class of a flags thunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CcClass {
    Copy = 0,
    Add = 1,
    Sub = 2,
    Adc = 3,
    Sbb = 4,
    Logic = 5,
    Inc = 6,
    Dec = 7,
    Shl = 8,
    Shr = 9,
    Rol = 10,
    Ror = 11,
    RclC = 12,
    RcrC = 13,
    UMul = 14,
    SMul = 15,
}

fn width_code(w: Width) -> u64 {
    match w {
        Width::W8 => 0,
        Width::W16 => 1,
        Width::W32 => 2,
        Width::W64 => 3,
    }
}

/// Encoded `cc_op` slot value: class in the high bits, width in the low two.
#[must_use]
pub fn cc_encode(class: CcClass, w: Width) -> u64 {
    ((class as u64) << 2) | width_code(w)
}

/// The evaluator argument list: the four thunk components, in order.
#[must_use]
pub fn thunk_args() -> Vec<Expr> {
    vec![
        Expr::get(OFF_CC_OP, Ty::I64),
        Expr::get(OFF_CC_DEP1, Ty::I64),
        Expr::get(OFF_CC_DEP2, Ty::I64),
        Expr::get(OFF_CC_NDEP, Ty::I64),
    ]
}

/// Write a fresh thunk. Operand values are zero-extended to the slot width
/// by the caller (`Lifter::zx64`).
pub fn set_thunk(l: &mut Lifter<'_, '_>, class: CcClass, w: Width, dep1: Expr, dep2: Expr, ndep: Expr) {
    l.put(OFF_CC_OP, Expr::c64(cc_encode(class, w)));
    l.put(OFF_CC_DEP1, dep1);
    l.put(OFF_CC_DEP2, dep2);
    l.put(OFF_CC_NDEP, ndep);
}

/// Write a thunk guarded by a runtime predicate: when `guard` is false the
/// previous thunk is preserved bit-for-bit (zero-count shifts and rotates).
pub fn set_thunk_guarded(
    l: &mut Lifter<'_, '_>,
    class: CcClass,
    w: Width,
    dep1: Expr,
    dep2: Expr,
    ndep: Expr,
    guard: Expr,
) {
    let guard = l.t(guard);
    let old_op = l.t(Expr::get(OFF_CC_OP, Ty::I64));
    let old_dep1 = l.t(Expr::get(OFF_CC_DEP1, Ty::I64));
    let old_dep2 = l.t(Expr::get(OFF_CC_DEP2, Ty::I64));
    let old_ndep = l.t(Expr::get(OFF_CC_NDEP, Ty::I64));
    let op = Expr::mux(
        guard.clone(),
        Expr::c64(cc_encode(class, w)),
        old_op,
    );
    l.put(OFF_CC_OP, op);
    l.put(OFF_CC_DEP1, Expr::mux(guard.clone(), dep1, old_dep1));
    l.put(OFF_CC_DEP2, Expr::mux(guard.clone(), dep2, old_dep2));
    l.put(OFF_CC_NDEP, Expr::mux(guard, ndep, old_ndep));
}

/// Evaluate a condition code against the live thunk, as an I1.
pub fn eval_cond(l: &mut Lifter<'_, '_>, cond: Cond) -> Expr {
    let call = Expr::CallPure {
        func: PureHelper::CalcCond(cond),
        args: thunk_args(),
    };
    let v = l.t(call);
    Expr::unop(UnOp::CmpNez(Width::W64), v)
}

/// The current carry flag as an I64 0/1.
pub fn rflags_c(l: &mut Lifter<'_, '_>) -> Expr {
    let call = Expr::CallPure {
        func: PureHelper::CalcRflagsC,
        args: thunk_args(),
    };
    l.t(call)
}

/// The full materialized RFLAGS word.
pub fn rflags_all(l: &mut Lifter<'_, '_>) -> Expr {
    let call = Expr::CallPure {
        func: PureHelper::CalcRflagsAll,
        args: thunk_args(),
    };
    l.t(call)
}

/// Install an RFLAGS word verbatim as a `Copy` thunk.
pub fn set_rflags_copy(l: &mut Lifter<'_, '_>, rflags: Expr) {
    l.block.push(Stmt::Put {
        off: OFF_CC_OP,
        val: Expr::c64(cc_encode(CcClass::Copy, Width::W64)),
    });
    l.put(OFF_CC_DEP1, rflags);
    l.put(OFF_CC_DEP2, Expr::c64(0));
    l.put(OFF_CC_NDEP, Expr::c64(0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_injective() {
        let mut seen = std::collections::HashSet::new();
        for class in [
            CcClass::Copy,
            CcClass::Add,
            CcClass::Sub,
            CcClass::Adc,
            CcClass::Sbb,
            CcClass::Logic,
            CcClass::Inc,
            CcClass::Dec,
            CcClass::Shl,
            CcClass::Shr,
            CcClass::Rol,
            CcClass::Ror,
            CcClass::RclC,
            CcClass::RcrC,
            CcClass::UMul,
            CcClass::SMul,
        ] {
            for w in [Width::W8, Width::W16, Width::W32, Width::W64] {
                assert!(seen.insert(cc_encode(class, w)));
            }
        }
    }
}
