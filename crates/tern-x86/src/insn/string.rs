//! String instructions (MOVS/STOS/LODS/CMPS/SCAS) and their REP forms.
//!
//! A repeated form lifts exactly one iteration: exit to the next instruction
//! when the count is exhausted (or the REPE/REPNE condition fails), otherwise
//! loop by ending the block back at this instruction's own address. The
//! per-iteration step direction comes from the `dflag` guest slot (+1/-1).

use crate::flags::{self, CcClass};
use crate::lift::Lifter;
use crate::modrm::adjust_addr;
use crate::prefix::Prefixes;
use crate::{guest, DecodeError};
use tern_ir::{BinOp, ExitKind, Expr, Stmt, Ty, UnOp};
use tern_types::{Cond, Width};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrOp {
    Movs,
    Cmps,
    Stos,
    Lods,
    Scas,
}

impl StrOp {
    fn uses_rsi(self) -> bool {
        matches!(self, StrOp::Movs | StrOp::Cmps | StrOp::Lods)
    }

    fn uses_rdi(self) -> bool {
        !matches!(self, StrOp::Lods)
    }

    fn is_compare(self) -> bool {
        matches!(self, StrOp::Cmps | StrOp::Scas)
    }
}

/// Signed step for one element: dflag * size.
fn dir_step(w: Width) -> Expr {
    Expr::binop(
        BinOp::Mul(Width::W64),
        Expr::get(guest::OFF_DFLAG, Ty::I64),
        Expr::c64(w.bytes() as u64),
    )
}

/// A string-side address: the named pointer register, with segment/address
/// size adjustments. Overrides apply only to the RSI side.
fn str_addr(
    l: &mut Lifter<'_, '_>,
    pfx: &Prefixes,
    reg: u8,
    seg_side: bool,
) -> Result<Expr, DecodeError> {
    let base = guest::read_gpr(reg);
    let adjusted = if seg_side {
        adjust_addr(l, pfx, base)?
    } else if pfx.addr_size_override() {
        let low = Expr::unop(
            UnOp::Narrow {
                from: Width::W64,
                to: Width::W32,
            },
            base,
        );
        Expr::unop(
            UnOp::WidenU {
                from: Width::W32,
                to: Width::W64,
            },
            low,
        )
    } else {
        base
    };
    Ok(l.t(adjusted))
}

fn advance_ptr(l: &mut Lifter<'_, '_>, reg: u8, step: Expr) {
    let next = Expr::binop(BinOp::Add(Width::W64), guest::read_gpr(reg), step);
    guest::write_gpr_w(l.block, reg, Width::W64, next);
}

/// One string instruction, repeated or not. `len` is the full instruction
/// length (opcode already consumed).
pub fn string_op(
    l: &mut Lifter<'_, '_>,
    len: usize,
    pfx: &Prefixes,
    op: StrOp,
    w: Width,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let repeated = pfx.rep() || pfx.repne();
    if pfx.rep() && pfx.repne() {
        return Err(DecodeError::Invalid);
    }
    // REPNE is only meaningful on the comparing forms; hardware runs the
    // others as plain REP.
    let next = l.next_addr(len);

    let count_w = if pfx.addr_size_override() {
        Width::W32
    } else {
        Width::W64
    };

    if repeated {
        let count = guest::read_gpr_w(1, count_w);
        let exhausted = l.is_zero(count_w, count);
        l.block.push(Stmt::Exit {
            guard: exhausted,
            target: next,
            kind: ExitKind::Jump,
        });
    }

    one_iteration(l, pfx, op, w)?;

    if repeated {
        let count = guest::read_gpr_w(1, count_w);
        let dec = Expr::binop(BinOp::Sub(count_w), count, Expr::cw(count_w, 1));
        l.write_reg(pfx, 1, count_w, dec);

        if op.is_compare() {
            let cc = if pfx.rep() { Cond::Ne } else { Cond::E };
            let guard = flags::eval_cond(l, cc);
            l.block.push(Stmt::Exit {
                guard,
                target: next,
                kind: ExitKind::Jump,
            });
        }
        // Loop by re-entering this instruction.
        l.stop(Expr::c64(l.pc), ExitKind::Jump);
    }
    Ok(len)
}

fn one_iteration(
    l: &mut Lifter<'_, '_>,
    pfx: &Prefixes,
    op: StrOp,
    w: Width,
) -> Result<(), DecodeError> {
    let ty = Ty::from_width(w);
    let step = dir_step(w);
    let step = l.t(step);

    let src_addr = if op.uses_rsi() {
        Some(str_addr(l, pfx, 6, true)?)
    } else {
        None
    };
    let dst_addr = if op.uses_rdi() {
        Some(str_addr(l, pfx, 7, false)?)
    } else {
        None
    };

    match op {
        StrOp::Movs => {
            let v = l.load(ty, src_addr.clone().unwrap());
            l.store(dst_addr.clone().unwrap(), v);
        }
        StrOp::Stos => {
            let acc = l.read_reg(pfx, 0, w);
            l.store(dst_addr.clone().unwrap(), acc);
        }
        StrOp::Lods => {
            let v = l.load(ty, src_addr.clone().unwrap());
            l.write_reg(pfx, 0, w, v);
        }
        StrOp::Scas => {
            let acc = l.read_reg(pfx, 0, w);
            let acc = l.t(acc);
            let v = l.load(ty, dst_addr.clone().unwrap());
            let acc64 = l.zx64(w, acc);
            let v64 = l.zx64(w, v);
            flags::set_thunk(l, CcClass::Sub, w, acc64, v64, Expr::c64(0));
        }
        StrOp::Cmps => {
            let a = l.load(ty, src_addr.clone().unwrap());
            let b = l.load(ty, dst_addr.clone().unwrap());
            let a64 = l.zx64(w, a);
            let b64 = l.zx64(w, b);
            flags::set_thunk(l, CcClass::Sub, w, a64, b64, Expr::c64(0));
        }
    }

    if op.uses_rsi() {
        advance_ptr(l, 6, step.clone());
    }
    if op.uses_rdi() {
        advance_ptr(l, 7, step);
    }
    Ok(())
}
