//! Structural sanity checking for constructed blocks.
//!
//! Downstream consumers assume these invariants; the front end's test suite
//! runs every lifted block through [`sanity_check`]. Violations are bugs in
//! the producer, never a property of the guest bytes.
//!
//! Checked invariants:
//! - temporaries are SSA within the block: written at most once, and
//!   written before any read;
//! - every expression is well-typed under the operator conventions (shift
//!   counts are I8, divisions take a double-width numerator, Mux arms
//!   agree, pure-helper arguments are I64);
//! - statement operands have the types their slots require (I1 guards,
//!   I64 addresses and array indices).

use crate::expr::{ArrDesc, BinOp, Expr, TriOp, UnOp};
use crate::stmt::Stmt;
use crate::{Block, TempId, Ty};
use tern_types::Width;

/// Verify a finished (or in-construction) block. Returns a description of
/// the first violation found.
pub fn sanity_check(block: &Block) -> Result<(), String> {
    let mut written = vec![false; block.temp_count()];

    let check_expr = |written: &[bool], e: &Expr| -> Result<Ty, String> {
        ExprChecker { block, written }.check(e)
    };

    for (i, stmt) in block.stmts.iter().enumerate() {
        let at = |msg: String| format!("stmt {i}: {msg}");
        match stmt {
            Stmt::IMark { len, .. } => {
                if *len == 0 {
                    return Err(at("zero-length instruction mark".into()));
                }
            }
            Stmt::WrTemp { dst, val } => {
                let ty = check_expr(&written, val).map_err(&at)?;
                if block.temp_ty(*dst) != ty {
                    return Err(at(format!(
                        "temp {dst} declared {} but assigned {ty}",
                        block.temp_ty(*dst)
                    )));
                }
                mark_written(&mut written, *dst).map_err(&at)?;
            }
            Stmt::Put { val, .. } => {
                check_expr(&written, val).map_err(&at)?;
            }
            Stmt::PutArr { desc, ix, val } => {
                expect(check_expr(&written, ix).map_err(&at)?, Ty::I64, "array index")
                    .map_err(&at)?;
                expect(
                    check_expr(&written, val).map_err(&at)?,
                    desc.elem,
                    "array element",
                )
                .map_err(&at)?;
            }
            Stmt::Store { addr, val } => {
                expect(check_expr(&written, addr).map_err(&at)?, Ty::I64, "store address")
                    .map_err(&at)?;
                check_expr(&written, val).map_err(&at)?;
            }
            Stmt::Cas {
                addr,
                expected,
                new,
                old,
            } => {
                expect(check_expr(&written, addr).map_err(&at)?, Ty::I64, "cas address")
                    .map_err(&at)?;
                let e_ty = check_expr(&written, expected).map_err(&at)?;
                let n_ty = check_expr(&written, new).map_err(&at)?;
                if e_ty != n_ty {
                    return Err(at(format!("cas expected {e_ty} vs new {n_ty}")));
                }
                if block.temp_ty(*old) != e_ty {
                    return Err(at(format!(
                        "cas old temp is {} but operands are {e_ty}",
                        block.temp_ty(*old)
                    )));
                }
                mark_written(&mut written, *old).map_err(&at)?;
            }
            Stmt::DirtyCall { args, dst, .. } => {
                for a in args {
                    check_expr(&written, a).map_err(&at)?;
                }
                if let Some(dst) = dst {
                    if block.temp_ty(*dst) != Ty::I64 {
                        return Err(at("helper results are I64".into()));
                    }
                    mark_written(&mut written, *dst).map_err(&at)?;
                }
            }
            Stmt::Exit { guard, .. } => {
                expect(check_expr(&written, guard).map_err(&at)?, Ty::I1, "exit guard")
                    .map_err(&at)?;
            }
            Stmt::AbiHint { base, nia, .. } => {
                expect(check_expr(&written, base).map_err(&at)?, Ty::I64, "hint base")
                    .map_err(&at)?;
                expect(check_expr(&written, nia).map_err(&at)?, Ty::I64, "hint nia")
                    .map_err(&at)?;
            }
            Stmt::Fence => {}
        }
    }

    if let Some((target, _)) = &block.next {
        let ty = ExprChecker {
            block,
            written: &written,
        }
        .check(target)?;
        expect(ty, Ty::I64, "block exit target")?;
    }
    Ok(())
}

fn mark_written(written: &mut [bool], t: TempId) -> Result<(), String> {
    let slot = written
        .get_mut(t.index())
        .ok_or_else(|| format!("temp {t} out of range"))?;
    if *slot {
        return Err(format!("temp {t} written twice"));
    }
    *slot = true;
    Ok(())
}

fn expect(got: Ty, want: Ty, what: &str) -> Result<(), String> {
    if got != want {
        return Err(format!("{what} must be {want}, found {got}"));
    }
    Ok(())
}

struct ExprChecker<'a> {
    block: &'a Block,
    written: &'a [bool],
}

impl ExprChecker<'_> {
    fn check(&self, e: &Expr) -> Result<Ty, String> {
        match e {
            Expr::Const(c) => Ok(c.ty()),
            Expr::Temp(t) => {
                if !self
                    .written
                    .get(t.index())
                    .copied()
                    .unwrap_or(false)
                {
                    return Err(format!("temp {t} read before written"));
                }
                Ok(self.block.temp_ty(*t))
            }
            Expr::Get { ty, .. } => Ok(*ty),
            Expr::GetArr { desc, ix } => {
                expect(self.check(ix)?, Ty::I64, "array index")?;
                check_arr(desc)?;
                Ok(desc.elem)
            }
            Expr::Load { ty, addr } => {
                expect(self.check(addr)?, Ty::I64, "load address")?;
                Ok(*ty)
            }
            Expr::Unop { op, src } => {
                let src_ty = self.check(src)?;
                expect(src_ty, unop_src_ty(*op), "unop operand")?;
                Ok(op.result_ty())
            }
            Expr::Binop { op, lhs, rhs } => {
                let l = self.check(lhs)?;
                let r = self.check(rhs)?;
                let (want_l, want_r) = binop_src_tys(*op);
                expect(l, want_l, "binop lhs")?;
                expect(r, want_r, "binop rhs")?;
                Ok(op.result_ty())
            }
            Expr::Triop { op, a, b, c } => {
                expect(self.check(a)?, Ty::I32, "rounding mode")?;
                let arg = match op {
                    TriOp::AddF32 | TriOp::SubF32 | TriOp::MulF32 | TriOp::DivF32 => Ty::F32,
                    _ => Ty::F64,
                };
                expect(self.check(b)?, arg, "fp operand")?;
                expect(self.check(c)?, arg, "fp operand")?;
                Ok(op.result_ty())
            }
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                expect(self.check(cond)?, Ty::I1, "mux condition")?;
                let t = self.check(if_true)?;
                let f = self.check(if_false)?;
                if t != f {
                    return Err(format!("mux arms disagree: {t} vs {f}"));
                }
                Ok(t)
            }
            Expr::CallPure { func, args } => {
                for a in args {
                    expect(self.check(a)?, Ty::I64, "pure helper argument")?;
                }
                Ok(func.result_ty())
            }
        }
    }
}

fn check_arr(desc: &ArrDesc) -> Result<(), String> {
    if desc.nelem == 0 {
        return Err("empty guest array".into());
    }
    Ok(())
}

fn unop_src_ty(op: UnOp) -> Ty {
    use UnOp::*;
    match op {
        Not(w) | Neg(w) | Clz(w) | Ctz(w) | Bswap(w) | CmpNez(w) => Ty::from_width(w),
        WidenU { from, .. } | WidenS { from, .. } => Ty::from_width(from),
        Narrow { from, .. } => Ty::from_width(from),
        B1To(_) => Ty::I1,
        I128Lo | I128Hi => Ty::I128,
        ReinterpI32AsF32 => Ty::I32,
        ReinterpF32AsI32 => Ty::F32,
        ReinterpI64AsF64 => Ty::I64,
        ReinterpF64AsI64 => Ty::F64,
        F32ToF64 => Ty::F32,
        I32SToF64 => Ty::I32,
        NegF32 | AbsF32 => Ty::F32,
        NegF64 | AbsF64 => Ty::F64,
        I64ToV128 => Ty::I64,
        I32ToV128 => Ty::I32,
        V256ToV128Lo | V256ToV128Hi => Ty::V256,
        // Everything else consumes a V128.
        NotV128
        | V128To64Lo
        | V128To64Hi
        | GetLane8 { .. }
        | GetLane16 { .. }
        | GetLane32 { .. }
        | GetLane64 { .. }
        | MoveMask8x16
        | MoveMask32x4
        | MoveMask64x2
        | WidenULo8x16To16x8
        | WidenULo16x8To32x4
        | WidenULo32x4To64x2
        | WidenSLo8x16To16x8
        | WidenSLo16x8To32x4
        | WidenSLo32x4To64x2
        | Abs8x16
        | Abs16x8
        | Abs32x4 => Ty::V128,
    }
}

fn double_ty(w: Width) -> Ty {
    match w {
        Width::W8 => Ty::I16,
        Width::W16 => Ty::I32,
        Width::W32 => Ty::I64,
        Width::W64 => Ty::I128,
    }
}

fn binop_src_tys(op: BinOp) -> (Ty, Ty) {
    use BinOp::*;
    match op {
        Add(w) | Sub(w) | And(w) | Or(w) | Xor(w) | Mul(w) => {
            (Ty::from_width(w), Ty::from_width(w))
        }
        Shl(w) | Shr(w) | Sar(w) => (Ty::from_width(w), Ty::I8),
        MulWidenU(w) | MulWidenS(w) | Concat(w) => (Ty::from_width(w), Ty::from_width(w)),
        DivModU(w) | DivModS(w) => (double_ty(w), Ty::from_width(w)),
        CmpEq(w) | CmpNe(w) | CmpLtU(w) | CmpLtS(w) | CmpLeU(w) | CmpLeS(w) => {
            (Ty::from_width(w), Ty::from_width(w))
        }
        CmpF32 => (Ty::F32, Ty::F32),
        CmpF64 => (Ty::F64, Ty::F64),
        SqrtF32 => (Ty::I32, Ty::F32),
        SqrtF64 | RoundF64ToInt | F64ToF32 | F64ToI32S | F64ToI64S => (Ty::I32, Ty::F64),
        F32ToI32S | F32ToI64S => (Ty::I32, Ty::F32),
        I32SToF32 => (Ty::I32, Ty::I32),
        I64SToF32 | I64SToF64 => (Ty::I32, Ty::I64),
        // Packed FP sqrt threads the rounding mode like the scalar forms.
        Sqrt32Fx4 | Sqrt64Fx2 => (Ty::I32, Ty::V128),
        // Whole-register and per-lane shifts take an I8 count.
        ShlN16x8 | ShlN32x4 | ShlN64x2 | ShrN16x8 | ShrN32x4 | ShrN64x2 | SarN16x8
        | SarN32x4 | ShlV128Bytes | ShrV128Bytes => (Ty::V128, Ty::I8),
        SetLane8 { .. } => (Ty::V128, Ty::I8),
        SetLane16 { .. } => (Ty::V128, Ty::I16),
        SetLane32 { .. } => (Ty::V128, Ty::I32),
        SetLane64 { .. } => (Ty::V128, Ty::I64),
        V128HLToV256 => (Ty::V128, Ty::V128),
        V256And | V256Or | V256Xor => (Ty::V256, Ty::V256),
        // The remaining lane ops are V128 x V128.
        _ => (Ty::V128, Ty::V128),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Const;

    #[test]
    fn accepts_a_simple_block() {
        let mut b = Block::new();
        let t = b.assign(Expr::c64(1));
        b.push(Stmt::Put {
            off: 0,
            val: Expr::Temp(t),
        });
        assert_eq!(sanity_check(&b), Ok(()));
    }

    #[test]
    fn rejects_read_before_write() {
        let mut b = Block::new();
        let t = b.new_temp(Ty::I64);
        b.push(Stmt::Put {
            off: 0,
            val: Expr::Temp(t),
        });
        assert!(sanity_check(&b).is_err());
    }

    #[test]
    fn rejects_double_write() {
        let mut b = Block::new();
        let t = b.new_temp(Ty::I64);
        b.push(Stmt::WrTemp {
            dst: t,
            val: Expr::c64(1),
        });
        b.push(Stmt::WrTemp {
            dst: t,
            val: Expr::c64(2),
        });
        assert!(sanity_check(&b).is_err());
    }

    #[test]
    fn rejects_mismatched_mux_arms() {
        let mut b = Block::new();
        let e = Expr::mux(
            Expr::Const(Const::U1(true)),
            Expr::c32(1),
            Expr::c64(2),
        );
        b.push(Stmt::Put { off: 0, val: e });
        assert!(sanity_check(&b).is_err());
    }

    #[test]
    fn rejects_non_i1_guard() {
        let mut b = Block::new();
        b.push(Stmt::Exit {
            guard: Expr::c64(1),
            target: 0,
            kind: crate::ExitKind::Jump,
        });
        assert!(sanity_check(&b).is_err());
    }
}
