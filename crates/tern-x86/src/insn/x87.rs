//! The x87 floating-point stack (opcodes D8–DF).
//!
//! The register file is eight 64-bit slots plus a top-of-stack pointer and a
//! tag array, addressed indirectly through the pointer. Values are carried at
//! F64: the 80-bit extended format is approximated, which is the shipped
//! behavior the embedding relies on. A read of an empty-tagged slot yields
//! the indefinite QNaN rather than stale bits, and the FCMOV family
//! substitutes the indefinite value when its destination slot is empty.
//! Transcendental and environment operations go through external helpers
//! that own the 80-bit semantics.

use crate::flags;
use crate::lift::Lifter;
use crate::modrm::{disamode, RmOp};
use crate::prefix::Prefixes;
use crate::{bytes, guest, DecodeError};
use tern_ir::{
    BinOp, Const, EffHelper, Effects, Expr, GuestRange, MemEffect, Stmt, TriOp, Ty, UnOp,
    X87BinaryOp, X87UnaryOp,
};
use tern_types::{Cond, Width};

const F64_ONE: u64 = 0x3FF0_0000_0000_0000;
const F64_L2T: u64 = 0x400A_934F_0979_A371;
const F64_L2E: u64 = 0x3FF7_1547_652B_82FE;
const F64_PI: u64 = 0x4009_21FB_5444_2D18;
const F64_LG2: u64 = 0x3FD3_4413_509F_79FF;
const F64_LN2: u64 = 0x3FE6_2E42_FEFA_39EF;

/// The guest ranges an x87 helper may touch: the FP stack block and the
/// rounding-control slot.
fn x87_ranges() -> Vec<GuestRange> {
    vec![
        GuestRange {
            off: guest::OFF_FTOP,
            len: guest::OFF_EMNOTE - guest::OFF_FTOP,
        },
        GuestRange {
            off: guest::OFF_FPROUND,
            len: 8,
        },
    ]
}

fn rounding() -> Expr {
    Expr::unop(
        UnOp::Narrow {
            from: Width::W64,
            to: Width::W32,
        },
        Expr::get(guest::OFF_FPROUND, Ty::I64),
    )
}

/// Rotated physical index of ST(i).
fn st_index(l: &mut Lifter<'_, '_>, i: u8) -> Expr {
    let top = Expr::get(guest::OFF_FTOP, Ty::I64);
    let idx = Expr::binop(
        BinOp::And(Width::W64),
        Expr::binop(BinOp::Add(Width::W64), top, Expr::c64(i as u64)),
        Expr::c64(7),
    );
    l.t(idx)
}

fn tag_at(l: &mut Lifter<'_, '_>, idx: Expr) -> Expr {
    l.t(Expr::get_arr(guest::fptag_arr(), idx))
}

/// Read ST(i) as F64; empty slots yield the indefinite QNaN.
fn read_st(l: &mut Lifter<'_, '_>, i: u8) -> Expr {
    let idx = st_index(l, i);
    let tag = tag_at(l, idx.clone());
    let raw = Expr::get_arr(guest::fpreg_arr(), idx);
    let empty = Expr::binop(BinOp::CmpEq(Width::W8), tag, Expr::c8(0));
    let bits = Expr::mux(empty, Expr::c64(guest::X87_INDEFINITE_BITS), raw);
    l.t(Expr::unop(UnOp::ReinterpI64AsF64, bits))
}

/// Write ST(i) and mark the slot valid.
fn write_st(l: &mut Lifter<'_, '_>, i: u8, val: Expr) {
    let idx = st_index(l, i);
    let bits = Expr::unop(UnOp::ReinterpF64AsI64, val);
    l.block.push(Stmt::PutArr {
        desc: guest::fpreg_arr(),
        ix: idx.clone(),
        val: bits,
    });
    l.block.push(Stmt::PutArr {
        desc: guest::fptag_arr(),
        ix: idx,
        val: Expr::c8(1),
    });
}

fn set_top(l: &mut Lifter<'_, '_>, val: Expr) {
    l.put(guest::OFF_FTOP, val);
}

/// Decrement TOP and write the new ST0.
fn push_st(l: &mut Lifter<'_, '_>, val: Expr) {
    let top = Expr::get(guest::OFF_FTOP, Ty::I64);
    let new = Expr::binop(
        BinOp::And(Width::W64),
        Expr::binop(BinOp::Sub(Width::W64), top, Expr::c64(1)),
        Expr::c64(7),
    );
    let new = l.t(new);
    set_top(l, new);
    write_st(l, 0, val);
}

/// Mark ST0 empty and increment TOP.
fn pop_st(l: &mut Lifter<'_, '_>) {
    let idx = st_index(l, 0);
    l.block.push(Stmt::PutArr {
        desc: guest::fptag_arr(),
        ix: idx,
        val: Expr::c8(0),
    });
    let top = Expr::get(guest::OFF_FTOP, Ty::I64);
    let new = Expr::binop(
        BinOp::And(Width::W64),
        Expr::binop(BinOp::Add(Width::W64), top, Expr::c64(1)),
        Expr::c64(7),
    );
    set_top(l, new);
}

/// The six arithmetic selections shared by the D8/DA/DC/DE groups. In this
/// (first, second) operand formulation the operand order is the same across
/// all four groups; the encodings differ only in which slot receives the
/// result.
fn arith_op(sel: u8) -> Option<(TriOp, bool)> {
    // Returns (op, swap_operands).
    Some(match sel {
        0 => (TriOp::AddF64, false),
        1 => (TriOp::MulF64, false),
        4 => (TriOp::SubF64, false),
        5 => (TriOp::SubF64, true),
        6 => (TriOp::DivF64, false),
        7 => (TriOp::DivF64, true),
        _ => return None,
    })
}

/// FCOM-style compare: update the C3/C2/C0 condition bits from the 4-bit
/// unordered/less/greater/equal compare encoding.
fn fcom(l: &mut Lifter<'_, '_>, a: Expr, b: Expr) {
    let r = l.t(Expr::binop(BinOp::CmpF64, a, b));
    let r64 = l.t(Expr::unop(
        UnOp::WidenU {
            from: Width::W32,
            to: Width::W64,
        },
        r,
    ));
    // Compare bits 0/2/6 map onto C0/C2/C3 (FSW bits 8/10/14).
    let c0 = Expr::binop(
        BinOp::Shl(Width::W64),
        Expr::binop(BinOp::And(Width::W64), r64.clone(), Expr::c64(1)),
        Expr::c8(8),
    );
    let c2 = Expr::binop(
        BinOp::Shl(Width::W64),
        Expr::binop(BinOp::And(Width::W64), r64.clone(), Expr::c64(4)),
        Expr::c8(8),
    );
    let c3 = Expr::binop(
        BinOp::Shl(Width::W64),
        Expr::binop(BinOp::And(Width::W64), r64, Expr::c64(0x40)),
        Expr::c8(8),
    );
    let word = Expr::binop(
        BinOp::Or(Width::W64),
        c0,
        Expr::binop(BinOp::Or(Width::W64), c2, c3),
    );
    l.put(guest::OFF_FC3210, word);
}

/// FCOMI-style compare: ZF/PF/CF from the compare encoding (which already
/// sits in the right bit positions), other status flags cleared.
fn fcomi(l: &mut Lifter<'_, '_>, a: Expr, b: Expr) {
    let r = l.t(Expr::binop(BinOp::CmpF64, a, b));
    let r64 = Expr::unop(
        UnOp::WidenU {
            from: Width::W32,
            to: Width::W64,
        },
        r,
    );
    let rf = l.t(Expr::binop(BinOp::And(Width::W64), r64, Expr::c64(0x45)));
    flags::set_rflags_copy(l, rf);
}

fn load_f64(l: &mut Lifter<'_, '_>, addr: Expr, kind: MemKind) -> Result<Expr, DecodeError> {
    Ok(match kind {
        MemKind::F32 => {
            let v = l.load(Ty::F32, addr);
            l.t(Expr::unop(UnOp::F32ToF64, v))
        }
        MemKind::F64 => l.load(Ty::F64, addr),
        MemKind::I16 => {
            let v = l.load(Ty::I16, addr);
            let wide = Expr::unop(
                UnOp::WidenS {
                    from: Width::W16,
                    to: Width::W32,
                },
                v,
            );
            l.t(Expr::unop(UnOp::I32SToF64, wide))
        }
        MemKind::I32 => {
            let v = l.load(Ty::I32, addr);
            l.t(Expr::unop(UnOp::I32SToF64, v))
        }
        MemKind::I64 => {
            let v = l.load(Ty::I64, addr);
            let rm = rounding();
            l.t(Expr::binop(BinOp::I64SToF64, rm, v))
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemKind {
    F32,
    F64,
    I16,
    I32,
    I64,
}

/// Store ST0 to memory in the given format. `rmode` 3 forces truncation
/// (the FISTTP forms), otherwise the current x87 rounding mode applies.
fn store_st0(
    l: &mut Lifter<'_, '_>,
    addr: Expr,
    kind: MemKind,
    truncating: bool,
) -> Result<(), DecodeError> {
    let st0 = read_st(l, 0);
    let rm = if truncating {
        Expr::c32(3)
    } else {
        rounding()
    };
    match kind {
        MemKind::F32 => {
            let v = Expr::binop(BinOp::F64ToF32, rm, st0);
            l.store(addr, v);
        }
        MemKind::F64 => l.store(addr, st0),
        MemKind::I16 => {
            let v = l.t(Expr::binop(BinOp::F64ToI32S, rm, st0));
            let narrow = Expr::unop(
                UnOp::Narrow {
                    from: Width::W32,
                    to: Width::W16,
                },
                v,
            );
            l.store(addr, narrow);
        }
        MemKind::I32 => {
            let v = Expr::binop(BinOp::F64ToI32S, rm, st0);
            l.store(addr, v);
        }
        MemKind::I64 => {
            let v = Expr::binop(BinOp::F64ToI64S, rm, st0);
            l.store(addr, v);
        }
    }
    Ok(())
}

fn mem_addr(l: &mut Lifter<'_, '_>, rm: &RmOp) -> Result<Expr, DecodeError> {
    match rm {
        RmOp::Mem { addr, .. } => Ok(Expr::Temp(*addr)),
        RmOp::Reg(_) => Err(DecodeError::Invalid),
    }
}

fn env_helper(
    l: &mut Lifter<'_, '_>,
    func: EffHelper,
    addr: Expr,
    mem_len: u32,
    writes_guest: bool,
) {
    let (reads, writes, mem) = if writes_guest {
        (
            Vec::new(),
            x87_ranges(),
            MemEffect::Read {
                addr: addr.clone(),
                len: mem_len,
            },
        )
    } else {
        (
            x87_ranges(),
            Vec::new(),
            MemEffect::Write {
                addr: addr.clone(),
                len: mem_len,
            },
        )
    };
    l.block.push(Stmt::DirtyCall {
        func,
        args: vec![addr],
        dst: None,
        effects: Effects { reads, writes, mem },
    });
}

fn x87_unary_helper(l: &mut Lifter<'_, '_>, op: X87UnaryOp) {
    l.block.push(Stmt::DirtyCall {
        func: EffHelper::X87Unary(op),
        args: Vec::new(),
        dst: None,
        effects: Effects {
            reads: x87_ranges(),
            writes: x87_ranges(),
            mem: MemEffect::None,
        },
    });
}

fn x87_binary_helper(l: &mut Lifter<'_, '_>, op: X87BinaryOp) {
    l.block.push(Stmt::DirtyCall {
        func: EffHelper::X87Binary(op),
        args: Vec::new(),
        dst: None,
        effects: Effects {
            reads: x87_ranges(),
            writes: x87_ranges(),
            mem: MemEffect::None,
        },
    });
}

/// Dispatch one D8–DF instruction. `delta` points just past the opcode.
pub fn dispatch(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    opcode: u8,
) -> Result<usize, DecodeError> {
    pfx.reject_lock_rep()?;
    let modrm = bytes::u8_at(l.bytes, delta)?;

    if modrm < 0xc0 {
        let am = disamode(l, delta, pfx, 0)?;
        let len = delta + am.op.len();
        let sel = (modrm >> 3) & 7;
        let addr = mem_addr(l, &am.op)?;
        dispatch_mem(l, opcode, sel, addr)?;
        return Ok(len);
    }

    dispatch_reg(l, opcode, modrm)?;
    Ok(delta + 1)
}

fn dispatch_mem(
    l: &mut Lifter<'_, '_>,
    opcode: u8,
    sel: u8,
    addr: Expr,
) -> Result<(), DecodeError> {
    match opcode {
        // Arithmetic with a memory operand.
        0xd8 | 0xdc | 0xda | 0xde => {
            let kind = match opcode {
                0xd8 => MemKind::F32,
                0xdc => MemKind::F64,
                0xda => MemKind::I32,
                _ => MemKind::I16,
            };
            let arg = load_f64(l, addr, kind)?;
            match sel {
                2 | 3 => {
                    let st0 = read_st(l, 0);
                    fcom(l, st0, arg);
                    if sel == 3 {
                        pop_st(l);
                    }
                }
                _ => {
                    let (op, swap) = arith_op(sel).ok_or(DecodeError::Invalid)?;
                    let st0 = read_st(l, 0);
                    let rm = rounding();
                    let (a, b) = if swap { (arg, st0) } else { (st0, arg) };
                    let res = l.t(Expr::triop(op, rm, a, b));
                    write_st(l, 0, res);
                }
            }
            Ok(())
        }
        0xd9 => match sel {
            0 => {
                let v = load_f64(l, addr, MemKind::F32)?;
                push_st(l, v);
                Ok(())
            }
            2 => store_st0(l, addr, MemKind::F32, false),
            3 => {
                store_st0(l, addr, MemKind::F32, false)?;
                pop_st(l);
                Ok(())
            }
            4 => {
                env_helper(l, EffHelper::FpLoadEnv, addr, 28, true);
                Ok(())
            }
            5 => {
                // FLDCW: only the rounding-control field is modeled.
                let cw = l.load(Ty::I16, addr);
                let cw64 = Expr::unop(
                    UnOp::WidenU {
                        from: Width::W16,
                        to: Width::W64,
                    },
                    cw,
                );
                let rc = Expr::binop(
                    BinOp::And(Width::W64),
                    Expr::binop(BinOp::Shr(Width::W64), cw64, Expr::c8(10)),
                    Expr::c64(3),
                );
                l.put(guest::OFF_FPROUND, rc);
                Ok(())
            }
            6 => {
                env_helper(l, EffHelper::FpStoreEnv, addr, 28, false);
                Ok(())
            }
            7 => {
                // FNSTCW: reconstruct a control word from the rounding mode.
                let rc = Expr::binop(
                    BinOp::Shl(Width::W64),
                    Expr::get(guest::OFF_FPROUND, Ty::I64),
                    Expr::c8(10),
                );
                let cw = Expr::binop(BinOp::Or(Width::W64), rc, Expr::c64(0x037f));
                let cw = l.t(cw);
                let cw16 = l.narrow(Width::W16, cw);
                l.store(addr, cw16);
                Ok(())
            }
            _ => Err(DecodeError::Invalid),
        },
        0xdb => match sel {
            0 => {
                let v = load_f64(l, addr, MemKind::I32)?;
                push_st(l, v);
                Ok(())
            }
            1 => {
                store_st0(l, addr, MemKind::I32, true)?;
                pop_st(l);
                Ok(())
            }
            2 => store_st0(l, addr, MemKind::I32, false),
            3 => {
                store_st0(l, addr, MemKind::I32, false)?;
                pop_st(l);
                Ok(())
            }
            5 | 7 => Err(DecodeError::Unimplemented("80-bit extended load/store")),
            _ => Err(DecodeError::Invalid),
        },
        0xdd => match sel {
            0 => {
                let v = load_f64(l, addr, MemKind::F64)?;
                push_st(l, v);
                Ok(())
            }
            1 => {
                store_st0(l, addr, MemKind::I64, true)?;
                pop_st(l);
                Ok(())
            }
            2 => store_st0(l, addr, MemKind::F64, false),
            3 => {
                store_st0(l, addr, MemKind::F64, false)?;
                pop_st(l);
                Ok(())
            }
            4 => {
                env_helper(l, EffHelper::FpRestore, addr, 108, true);
                Ok(())
            }
            6 => {
                env_helper(l, EffHelper::FpSave, addr, 108, false);
                Ok(())
            }
            7 => {
                let sw = status_word(l);
                let sw16 = l.narrow(Width::W16, sw);
                l.store(addr, sw16);
                Ok(())
            }
            _ => Err(DecodeError::Invalid),
        },
        0xdf => match sel {
            0 => {
                let v = load_f64(l, addr, MemKind::I16)?;
                push_st(l, v);
                Ok(())
            }
            1 => {
                store_st0(l, addr, MemKind::I16, true)?;
                pop_st(l);
                Ok(())
            }
            2 => store_st0(l, addr, MemKind::I16, false),
            3 => {
                store_st0(l, addr, MemKind::I16, false)?;
                pop_st(l);
                Ok(())
            }
            5 => {
                let v = load_f64(l, addr, MemKind::I64)?;
                push_st(l, v);
                Ok(())
            }
            7 => {
                store_st0(l, addr, MemKind::I64, false)?;
                pop_st(l);
                Ok(())
            }
            4 | 6 => Err(DecodeError::Unimplemented("packed BCD")),
            _ => Err(DecodeError::Invalid),
        },
        _ => Err(DecodeError::Invalid),
    }
}

/// FSTSW-style status word: the condition bits plus TOP in bits 11..13.
fn status_word(l: &mut Lifter<'_, '_>) -> Expr {
    let top = Expr::binop(
        BinOp::Shl(Width::W64),
        Expr::get(guest::OFF_FTOP, Ty::I64),
        Expr::c8(11),
    );
    let word = Expr::binop(
        BinOp::Or(Width::W64),
        Expr::get(guest::OFF_FC3210, Ty::I64),
        top,
    );
    l.t(word)
}

fn dispatch_reg(l: &mut Lifter<'_, '_>, opcode: u8, modrm: u8) -> Result<(), DecodeError> {
    let i = modrm & 7;
    let sel = (modrm >> 3) & 7;

    match opcode {
        0xd8 | 0xdc => {
            let reversed = opcode == 0xdc;
            match sel {
                2 | 3 => {
                    if reversed {
                        return Err(DecodeError::Invalid);
                    }
                    let st0 = read_st(l, 0);
                    let sti = read_st(l, i);
                    fcom(l, st0, sti);
                    if sel == 3 {
                        pop_st(l);
                    }
                    Ok(())
                }
                _ => {
                    let (op, swap) = arith_op(sel).ok_or(DecodeError::Invalid)?;
                    let st0 = read_st(l, 0);
                    let sti = read_st(l, i);
                    let rm = rounding();
                    let (a, b) = if swap { (sti.clone(), st0) } else { (st0, sti.clone()) };
                    let res = l.t(Expr::triop(op, rm, a, b));
                    write_st(l, if reversed { i } else { 0 }, res);
                    Ok(())
                }
            }
        }
        0xd9 => match modrm {
            // FLD ST(i).
            0xc0..=0xc7 => {
                let v = read_st(l, i);
                push_st(l, v);
                Ok(())
            }
            // FXCH.
            0xc8..=0xcf => {
                let a = read_st(l, 0);
                let b = read_st(l, i);
                write_st(l, 0, b);
                write_st(l, i, a);
                Ok(())
            }
            0xd0 => Ok(()), // FNOP
            0xe0 => {
                let v = read_st(l, 0);
                let neg = l.t(Expr::unop(UnOp::NegF64, v));
                write_st(l, 0, neg);
                Ok(())
            }
            0xe1 => {
                let v = read_st(l, 0);
                let abs = l.t(Expr::unop(UnOp::AbsF64, v));
                write_st(l, 0, abs);
                Ok(())
            }
            // FTST: compare against +0.0.
            0xe4 => {
                let st0 = read_st(l, 0);
                let zero = Expr::Const(Const::F64Bits(0));
                fcom(l, st0, zero);
                Ok(())
            }
            0xe5 => Err(DecodeError::Unimplemented("fxam")),
            0xe8 => {
                push_const(l, F64_ONE);
                Ok(())
            }
            0xe9 => {
                push_const(l, F64_L2T);
                Ok(())
            }
            0xea => {
                push_const(l, F64_L2E);
                Ok(())
            }
            0xeb => {
                push_const(l, F64_PI);
                Ok(())
            }
            0xec => {
                push_const(l, F64_LG2);
                Ok(())
            }
            0xed => {
                push_const(l, F64_LN2);
                Ok(())
            }
            0xee => {
                push_const(l, 0);
                Ok(())
            }
            0xf0 => {
                x87_unary_helper(l, X87UnaryOp::F2xm1);
                Ok(())
            }
            0xf1 => {
                x87_binary_helper(l, X87BinaryOp::Fyl2x);
                Ok(())
            }
            0xf2 => {
                x87_binary_helper(l, X87BinaryOp::Fptan);
                Ok(())
            }
            0xf3 => {
                x87_binary_helper(l, X87BinaryOp::Fpatan);
                Ok(())
            }
            0xf4 => {
                x87_unary_helper(l, X87UnaryOp::Fxtract);
                Ok(())
            }
            0xf5 => {
                x87_binary_helper(l, X87BinaryOp::Fprem1);
                Ok(())
            }
            // FDECSTP / FINCSTP.
            0xf6 | 0xf7 => {
                let top = Expr::get(guest::OFF_FTOP, Ty::I64);
                let step = if modrm == 0xf6 {
                    Expr::binop(BinOp::Sub(Width::W64), top, Expr::c64(1))
                } else {
                    Expr::binop(BinOp::Add(Width::W64), top, Expr::c64(1))
                };
                let new = Expr::binop(BinOp::And(Width::W64), step, Expr::c64(7));
                set_top(l, new);
                Ok(())
            }
            0xf8 => {
                x87_binary_helper(l, X87BinaryOp::Fprem);
                Ok(())
            }
            0xf9 => {
                x87_binary_helper(l, X87BinaryOp::Fyl2xp1);
                Ok(())
            }
            0xfa => {
                let v = read_st(l, 0);
                let rm = rounding();
                let res = l.t(Expr::binop(BinOp::SqrtF64, rm, v));
                write_st(l, 0, res);
                Ok(())
            }
            0xfb => {
                x87_binary_helper(l, X87BinaryOp::Fsincos);
                Ok(())
            }
            0xfc => {
                let v = read_st(l, 0);
                let rm = rounding();
                let res = l.t(Expr::binop(BinOp::RoundF64ToInt, rm, v));
                write_st(l, 0, res);
                Ok(())
            }
            0xfd => {
                x87_binary_helper(l, X87BinaryOp::Fscale);
                Ok(())
            }
            0xfe => {
                x87_unary_helper(l, X87UnaryOp::Fsin);
                Ok(())
            }
            0xff => {
                x87_unary_helper(l, X87UnaryOp::Fcos);
                Ok(())
            }
            _ => Err(DecodeError::Invalid),
        },
        0xda => match modrm {
            0xc0..=0xdf => fcmov(l, i, fcmov_cond(sel)?),
            // FUCOMPP.
            0xe9 => {
                let a = read_st(l, 0);
                let b = read_st(l, 1);
                fcom(l, a, b);
                pop_st(l);
                pop_st(l);
                Ok(())
            }
            _ => Err(DecodeError::Invalid),
        },
        0xdb => match modrm {
            0xc0..=0xdf => fcmov(l, i, fcmov_cond(sel)?.negate()),
            // FNCLEX: exception state is not modeled.
            0xe2 => Ok(()),
            // FNINIT: control/tag/top reset; data slots deliberately keep
            // their bits (shipped behavior).
            0xe3 => {
                set_top(l, Expr::c64(0));
                l.put(guest::OFF_FPROUND, Expr::c64(0));
                l.put(guest::OFF_FC3210, Expr::c64(0));
                for slot in 0..8u8 {
                    l.block.push(Stmt::PutArr {
                        desc: guest::fptag_arr(),
                        ix: Expr::c64(slot as u64),
                        val: Expr::c8(0),
                    });
                }
                Ok(())
            }
            0xe8..=0xef | 0xf0..=0xf7 => {
                let a = read_st(l, 0);
                let b = read_st(l, i);
                fcomi(l, a, b);
                Ok(())
            }
            _ => Err(DecodeError::Invalid),
        },
        0xdd => match modrm {
            // FFREE.
            0xc0..=0xc7 => {
                let idx = st_index(l, i);
                l.block.push(Stmt::PutArr {
                    desc: guest::fptag_arr(),
                    ix: idx,
                    val: Expr::c8(0),
                });
                Ok(())
            }
            // FST/FSTP ST(i).
            0xd0..=0xd7 | 0xd8..=0xdf => {
                let v = read_st(l, 0);
                write_st(l, i, v);
                if modrm >= 0xd8 {
                    pop_st(l);
                }
                Ok(())
            }
            // FUCOM/FUCOMP.
            0xe0..=0xe7 | 0xe8..=0xef => {
                let a = read_st(l, 0);
                let b = read_st(l, i);
                fcom(l, a, b);
                if modrm >= 0xe8 {
                    pop_st(l);
                }
                Ok(())
            }
            _ => Err(DecodeError::Invalid),
        },
        0xde => match modrm {
            // FCOMPP.
            0xd9 => {
                let a = read_st(l, 0);
                let b = read_st(l, 1);
                fcom(l, a, b);
                pop_st(l);
                pop_st(l);
                Ok(())
            }
            0xc0..=0xff => {
                let (op, swap) = arith_op(sel).ok_or(DecodeError::Invalid)?;
                let st0 = read_st(l, 0);
                let sti = read_st(l, i);
                let rm = rounding();
                let (a, b) = if swap { (sti, st0) } else { (st0, sti) };
                let res = l.t(Expr::triop(op, rm, a, b));
                write_st(l, i, res);
                pop_st(l);
                Ok(())
            }
            _ => Err(DecodeError::Invalid),
        },
        0xdf => match modrm {
            // FNSTSW AX.
            0xe0 => {
                let sw = status_word(l);
                let sw16 = l.narrow(Width::W16, sw);
                guest::write_gpr_w(l.block, 0, Width::W16, sw16);
                Ok(())
            }
            0xe8..=0xef | 0xf0..=0xf7 => {
                let a = read_st(l, 0);
                let b = read_st(l, i);
                fcomi(l, a, b);
                pop_st(l);
                Ok(())
            }
            _ => Err(DecodeError::Invalid),
        },
        _ => unreachable!(),
    }
}

fn push_const(l: &mut Lifter<'_, '_>, bits: u64) {
    let v = Expr::Const(Const::F64Bits(bits));
    push_st(l, v);
}

fn fcmov_cond(sel: u8) -> Result<Cond, DecodeError> {
    Ok(match sel {
        0 => Cond::B,
        1 => Cond::E,
        2 => Cond::Be,
        3 => Cond::P,
        _ => return Err(DecodeError::Invalid),
    })
}

/// FCMOVcc: conditionally move ST(i) to ST0. When the destination slot is
/// tagged empty the indefinite value is written instead, and the slot
/// becomes valid either way.
fn fcmov(l: &mut Lifter<'_, '_>, i: u8, cc: Cond) -> Result<(), DecodeError> {
    let cond = flags::eval_cond(l, cc);
    let cond = l.t(cond);
    let dst_idx = st_index(l, 0);
    let dst_tag = tag_at(l, dst_idx);
    let src = read_st(l, i);
    let cur = read_st(l, 0);
    let moved = Expr::mux(cond, src, cur);
    let dst_empty = Expr::binop(BinOp::CmpEq(Width::W8), dst_tag, Expr::c8(0));
    let indefinite = Expr::unop(
        UnOp::ReinterpI64AsF64,
        Expr::c64(guest::X87_INDEFINITE_BITS),
    );
    let final_val = l.t(Expr::mux(dst_empty, indefinite, moved));
    write_st(l, 0, final_val);
    Ok(())
}
