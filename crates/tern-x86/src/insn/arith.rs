//! Integer arithmetic, logic, shift and read-modify-write handlers.
//!
//! These are the generic handlers behind the regular integer opcode space.
//! Every flag-affecting operation records a flags thunk (`flags.rs`) instead
//! of computing flags; LOCK-prefixed memory destinations go through the
//! compare-and-swap path, retrying by re-entering the instruction.

use crate::flags::{self, CcClass, RF_CF, RF_STATUS_MASK};
use crate::insn::{imm_b_sx, imm_z};
use crate::lift::Lifter;
use crate::modrm::{disamode, RmOp};
use crate::prefix::Prefixes;
use crate::{bytes, guest, DecodeError};
use tern_ir::{BinOp, ExitKind, Expr, PureHelper, Stmt, Ty, UnOp};
use tern_types::Width;

/// The eight classes of the 0x00–0x3F block, in opcode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluClass {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluClass {
    pub(crate) fn from_block(code: u8) -> AluClass {
        match code & 7 {
            0 => AluClass::Add,
            1 => AluClass::Or,
            2 => AluClass::Adc,
            3 => AluClass::Sbb,
            4 => AluClass::And,
            5 => AluClass::Sub,
            6 => AluClass::Xor,
            _ => AluClass::Cmp,
        }
    }

    fn writes_back(self) -> bool {
        self != AluClass::Cmp
    }
}

/// Compute one ALU operation and record its thunk. Returns the result to
/// write back, or `None` for CMP. Operands must already be temps.
fn alu_compute(
    l: &mut Lifter<'_, '_>,
    class: AluClass,
    w: Width,
    d: Expr,
    s: Expr,
) -> Option<Expr> {
    match class {
        AluClass::Add => {
            let res = l.t(Expr::binop(BinOp::Add(w), d.clone(), s.clone()));
            let d64 = l.zx64(w, d);
            let s64 = l.zx64(w, s);
            flags::set_thunk(l, CcClass::Add, w, d64, s64, Expr::c64(0));
            Some(res)
        }
        AluClass::Sub | AluClass::Cmp => {
            let res = l.t(Expr::binop(BinOp::Sub(w), d.clone(), s.clone()));
            let d64 = l.zx64(w, d);
            let s64 = l.zx64(w, s);
            flags::set_thunk(l, CcClass::Sub, w, d64, s64, Expr::c64(0));
            class.writes_back().then_some(res)
        }
        AluClass::Adc | AluClass::Sbb => {
            let carry = flags::rflags_c(l);
            let carry_w = l.narrow(w, carry.clone());
            let op = if class == AluClass::Adc {
                BinOp::Add(w)
            } else {
                BinOp::Sub(w)
            };
            let partial = Expr::binop(op, d.clone(), s.clone());
            let res = l.t(Expr::binop(op, partial, carry_w));
            let d64 = l.zx64(w, d);
            let s64 = l.zx64(w, s);
            let dep2 = Expr::binop(BinOp::Xor(Width::W64), s64, carry.clone());
            let cc = if class == AluClass::Adc {
                CcClass::Adc
            } else {
                CcClass::Sbb
            };
            flags::set_thunk(l, cc, w, d64, dep2, carry);
            Some(res)
        }
        AluClass::And | AluClass::Or | AluClass::Xor => {
            let op = match class {
                AluClass::And => BinOp::And(w),
                AluClass::Or => BinOp::Or(w),
                _ => BinOp::Xor(w),
            };
            let res = l.t(Expr::binop(op, d, s));
            let res64 = l.zx64(w, res.clone());
            flags::set_thunk(l, CcClass::Logic, w, res64, Expr::c64(0), Expr::c64(0));
            Some(res)
        }
    }
}

/// Emit the locked read-modify-write tail: CAS against the previously loaded
/// value, retrying at this instruction's address on contention.
pub(crate) fn cas_write(
    l: &mut Lifter<'_, '_>,
    addr: Expr,
    w: Width,
    expected: Expr,
    new: Expr,
) {
    let old = l.block.new_temp(Ty::from_width(w));
    l.block.push(Stmt::Cas {
        addr,
        expected: expected.clone(),
        new,
        old,
    });
    let guard = Expr::binop(BinOp::CmpNe(w), Expr::Temp(old), expected);
    let target = l.pc;
    l.block.push(Stmt::Exit {
        guard,
        target,
        kind: ExitKind::Jump,
    });
    l.expect_cas = true;
}

fn alu_writeback(
    l: &mut Lifter<'_, '_>,
    pfx: &Prefixes,
    rm: &RmOp,
    w: Width,
    old: Expr,
    res: Expr,
) -> Result<(), DecodeError> {
    if pfx.lock() {
        let RmOp::Mem { addr, .. } = rm else {
            // LOCK with a register destination is architecturally invalid.
            return Err(DecodeError::Invalid);
        };
        cas_write(l, Expr::Temp(*addr), w, old, res);
    } else {
        l.write_rm(pfx, rm, w, res);
    }
    Ok(())
}

/// The four reg/rm forms of the 0x00–0x3F block. `swap` selects the
/// G-to-E direction.
pub fn alu_rm_reg(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    class: AluClass,
    w: Width,
    swap: bool,
) -> Result<usize, DecodeError> {
    if pfx.rep() || pfx.repne() {
        return Err(DecodeError::Invalid);
    }
    let am = disamode(l, delta, pfx, 0)?;
    let len = delta + am.op.len();

    if pfx.lock() && (swap || !class.writes_back() || !am.op.is_mem()) {
        return Err(DecodeError::Invalid);
    }

    // Self-xor is the canonical zeroing idiom; keep the short form while
    // still producing the architectural thunk.
    if class == AluClass::Xor && !swap {
        if let RmOp::Reg(idx) = am.op {
            if idx == am.reg && w != Width::W8 {
                let zero = Expr::cw(w, 0);
                l.write_rm(pfx, &am.op, w, zero);
                flags::set_thunk(
                    l,
                    CcClass::Logic,
                    w,
                    Expr::c64(0),
                    Expr::c64(0),
                    Expr::c64(0),
                );
                return Ok(len);
            }
        }
    }

    let rm_val = l.read_rm(pfx, &am.op, w);
    let rm_val = l.t(rm_val);
    let reg_val = l.read_reg(pfx, am.reg, w);
    let reg_val = l.t(reg_val);

    let (d, s) = if swap {
        (reg_val.clone(), rm_val.clone())
    } else {
        (rm_val.clone(), reg_val.clone())
    };

    if let Some(res) = alu_compute(l, class, w, d.clone(), s) {
        if swap {
            l.write_reg(pfx, am.reg, w, res);
        } else {
            alu_writeback(l, pfx, &am.op, w, rm_val, res)?;
        }
    }
    Ok(len)
}

/// Accumulator-with-immediate forms (opcodes xx4/xx5 of the block).
pub fn alu_ax_imm(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    class: AluClass,
    w: Width,
) -> Result<usize, DecodeError> {
    pfx.reject_lock_rep()?;
    let (imm, imm_len) = if w == Width::W8 {
        (bytes::u8_at(l.bytes, delta)? as u64, 1)
    } else {
        imm_z(l.bytes, delta, w)?
    };
    let d = l.read_reg(pfx, 0, w);
    let d = l.t(d);
    if let Some(res) = alu_compute(l, class, w, d, Expr::cw(w, imm)) {
        l.write_reg(pfx, 0, w, res);
    }
    Ok(delta + imm_len)
}

/// Group 1: 0x80 (rm8,imm8), 0x81 (rmW,immz), 0x83 (rmW,imm8 sign-extended).
pub fn alu_grp1(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
    imm8: bool,
) -> Result<usize, DecodeError> {
    if pfx.rep() || pfx.repne() {
        return Err(DecodeError::Invalid);
    }
    let am = disamode(l, delta, pfx, if imm8 || w == Width::W8 { 1 } else { imm_z_len(w) })?;
    let imm_off = delta + am.op.len();
    let (imm, imm_len) = if w == Width::W8 {
        (bytes::u8_at(l.bytes, imm_off)? as u64, 1)
    } else if imm8 {
        imm_b_sx(l.bytes, imm_off, w)?
    } else {
        imm_z(l.bytes, imm_off, w)?
    };
    let class = AluClass::from_block(am.reg);
    if pfx.lock() && (!class.writes_back() || !am.op.is_mem()) {
        return Err(DecodeError::Invalid);
    }

    let d = l.read_rm(pfx, &am.op, w);
    let d = l.t(d);
    if let Some(res) = alu_compute(l, class, w, d.clone(), Expr::cw(w, imm)) {
        alu_writeback(l, pfx, &am.op, w, d, res)?;
    }
    Ok(imm_off + imm_len)
}

fn imm_z_len(w: Width) -> usize {
    if w == Width::W16 {
        2
    } else {
        4
    }
}

/// TEST rm,reg and the accumulator/immediate forms: AND semantics without
/// writeback.
pub fn test_rm_reg(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
) -> Result<usize, DecodeError> {
    pfx.reject_lock_rep()?;
    let am = disamode(l, delta, pfx, 0)?;
    let rm_val = l.read_rm(pfx, &am.op, w);
    let reg_val = l.read_reg(pfx, am.reg, w);
    let res = l.t(Expr::binop(BinOp::And(w), rm_val, reg_val));
    let res64 = l.zx64(w, res);
    flags::set_thunk(l, CcClass::Logic, w, res64, Expr::c64(0), Expr::c64(0));
    Ok(delta + am.op.len())
}

pub fn test_rm_imm(
    l: &mut Lifter<'_, '_>,
    pfx: &Prefixes,
    rm: &RmOp,
    w: Width,
    imm: u64,
) -> Result<(), DecodeError> {
    pfx.reject_lock_rep()?;
    let val = l.read_rm(pfx, rm, w);
    let res = l.t(Expr::binop(BinOp::And(w), val, Expr::cw(w, imm)));
    let res64 = l.zx64(w, res);
    flags::set_thunk(l, CcClass::Logic, w, res64, Expr::c64(0), Expr::c64(0));
    Ok(())
}

/// INC/DEC (group 4/5 arms and their locked forms). Carry is preserved, so
/// the previous carry is threaded through the thunk.
pub fn inc_dec_rm(
    l: &mut Lifter<'_, '_>,
    pfx: &Prefixes,
    rm: &RmOp,
    w: Width,
    dec: bool,
) -> Result<(), DecodeError> {
    if pfx.lock() && !rm.is_mem() {
        return Err(DecodeError::Invalid);
    }
    let d = l.read_rm(pfx, rm, w);
    let d = l.t(d);
    let op = if dec { BinOp::Sub(w) } else { BinOp::Add(w) };
    let old_carry = flags::rflags_c(l);
    let res = l.t(Expr::binop(op, d.clone(), Expr::cw(w, 1)));
    let res64 = l.zx64(w, res.clone());
    let class = if dec { CcClass::Dec } else { CcClass::Inc };
    flags::set_thunk(l, class, w, res64, Expr::c64(0), old_carry);
    alu_writeback(l, pfx, rm, w, d, res)
}

/// How group-2 shifts obtain their count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSrc {
    One,
    Cl,
    Imm8,
}

/// Group 2: ROL/ROR/RCL/RCR/SHL/SHR/SAL/SAR.
///
/// The count is masked architecturally (63 for 64-bit operands, 31
/// otherwise) and the flags thunk is written only under a runtime
/// `count != 0` guard: zero-count shifts leave both the destination value
/// and the previous thunk intact.
pub fn grp2_shift(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
    count_src: CountSrc,
) -> Result<usize, DecodeError> {
    pfx.reject_lock_rep()?;
    let trailing = if count_src == CountSrc::Imm8 { 1 } else { 0 };
    let am = disamode(l, delta, pfx, trailing)?;
    let mut len = delta + am.op.len();

    let raw_count = match count_src {
        CountSrc::One => Expr::c8(1),
        CountSrc::Cl => Expr::get(guest::gpr_off(1), Ty::I8),
        CountSrc::Imm8 => {
            let v = bytes::u8_at(l.bytes, len)?;
            len += 1;
            Expr::c8(v)
        }
    };
    let mask = if w == Width::W64 { 63u8 } else { 31u8 };
    let count = l.t(Expr::binop(BinOp::And(Width::W8), raw_count, Expr::c8(mask)));
    let nonzero = Expr::unop(UnOp::CmpNez(Width::W8), count.clone());

    let d = l.read_rm(pfx, &am.op, w);
    let d = l.t(d);

    let kind = am.reg & 7;
    match kind {
        // SHL (/4, with /6 as its undocumented alias), SHR, SAR.
        4 | 6 | 5 | 7 => {
            let (op, cc) = match kind {
                4 | 6 => (ShiftSel::Shl, CcClass::Shl),
                5 => (ShiftSel::Shr, CcClass::Shr),
                _ => (ShiftSel::Sar, CcClass::Shr),
            };
            // 8/16-bit shifts are computed at 32 bits so counts up to 31
            // behave architecturally, then truncated back.
            let wide = w.max(Width::W32);
            let d_wide = widen_for_shift(l, w, wide, d.clone(), kind == 7);
            let res_wide = l.t(Expr::binop(op_at(op, wide), d_wide.clone(), count.clone()));
            let res = narrow_from(l, wide, w, res_wide);
            let res = l.t(res);

            let count_m1 = Expr::binop(BinOp::Sub(Width::W8), count.clone(), Expr::c8(1));
            let pre_wide = Expr::binop(op_at(op, wide), d_wide, count_m1);
            let pre = narrow_from(l, wide, w, pre_wide);
            let dep1 = l.zx64(w, res.clone());
            let dep2 = l.zx64(w, pre);
            flags::set_thunk_guarded(l, cc, w, dep1, dep2, Expr::c64(0), nonzero);
            l.write_rm(pfx, &am.op, w, res);
        }
        // ROL / ROR.
        0 | 1 => {
            let bits = w.bits() as u8;
            let rot = l.t(Expr::binop(
                BinOp::And(Width::W8),
                count.clone(),
                Expr::c8(bits - 1),
            ));
            let inv = Expr::binop(
                BinOp::And(Width::W8),
                Expr::binop(BinOp::Sub(Width::W8), Expr::c8(bits), rot.clone()),
                Expr::c8(bits - 1),
            );
            let (lhs, rhs) = if kind == 0 {
                (
                    Expr::binop(BinOp::Shl(w), d.clone(), rot.clone()),
                    Expr::binop(BinOp::Shr(w), d.clone(), inv),
                )
            } else {
                (
                    Expr::binop(BinOp::Shr(w), d.clone(), rot.clone()),
                    Expr::binop(BinOp::Shl(w), d.clone(), inv),
                )
            };
            let res = l.t(Expr::binop(BinOp::Or(w), lhs, rhs));
            let old_flags = flags::rflags_all(l);
            let cc = if kind == 0 { CcClass::Rol } else { CcClass::Ror };
            let dep1 = l.zx64(w, res.clone());
            flags::set_thunk_guarded(l, cc, w, dep1, Expr::c64(0), old_flags, nonzero);
            l.write_rm(pfx, &am.op, w, res);
        }
        // RCL / RCR: width-plus-carry rotation through the external helper.
        2 | 3 => {
            let helper = if kind == 2 {
                PureHelper::Rcl(w)
            } else {
                PureHelper::Rcr(w)
            };
            let d64 = l.zx64(w, d.clone());
            let count64 = l.zx64(Width::W8, count.clone());
            let old_flags = flags::rflags_all(l);
            let packed = l.t(Expr::CallPure {
                func: helper,
                args: vec![d64, count64.clone(), old_flags.clone()],
            });
            let res = l.narrow(w, packed.clone());
            let res = l.t(res);
            let cc = if kind == 2 { CcClass::RclC } else { CcClass::RcrC };
            let dep1 = l.zx64(w, res.clone());
            flags::set_thunk_guarded(l, cc, w, dep1, count64, old_flags, nonzero);
            l.write_rm(pfx, &am.op, w, res);
        }
        _ => unreachable!(),
    }
    Ok(len)
}

#[derive(Clone, Copy)]
enum ShiftSel {
    Shl,
    Shr,
    Sar,
}

fn op_at(sel: ShiftSel, w: Width) -> BinOp {
    match sel {
        ShiftSel::Shl => BinOp::Shl(w),
        ShiftSel::Shr => BinOp::Shr(w),
        ShiftSel::Sar => BinOp::Sar(w),
    }
}

fn widen_for_shift(l: &mut Lifter<'_, '_>, from: Width, to: Width, e: Expr, signed: bool) -> Expr {
    if from == to {
        return e;
    }
    let op = if signed {
        UnOp::WidenS { from, to }
    } else {
        UnOp::WidenU { from, to }
    };
    l.t(Expr::unop(op, e))
}

fn narrow_from(l: &mut Lifter<'_, '_>, from: Width, to: Width, e: Expr) -> Expr {
    let _ = l;
    if from == to {
        e
    } else {
        Expr::unop(UnOp::Narrow { from, to }, e)
    }
}

/// SHLD/SHRD double shifts.
pub fn shld_shrd(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
    right: bool,
    count_src: CountSrc,
) -> Result<usize, DecodeError> {
    pfx.reject_lock_rep()?;
    if w == Width::W8 {
        return Err(DecodeError::Invalid);
    }
    let trailing = if count_src == CountSrc::Imm8 { 1 } else { 0 };
    let am = disamode(l, delta, pfx, trailing)?;
    let mut len = delta + am.op.len();

    let raw_count = match count_src {
        CountSrc::Cl => Expr::get(guest::gpr_off(1), Ty::I8),
        CountSrc::Imm8 => {
            let v = bytes::u8_at(l.bytes, len)?;
            len += 1;
            Expr::c8(v)
        }
        CountSrc::One => unreachable!("SHLD/SHRD have no by-one form"),
    };
    let mask = if w == Width::W64 { 63u8 } else { 31u8 };
    let count = l.t(Expr::binop(BinOp::And(Width::W8), raw_count, Expr::c8(mask)));
    let nonzero = Expr::unop(UnOp::CmpNez(Width::W8), count.clone());

    let d = l.read_rm(pfx, &am.op, w);
    let d = l.t(d);
    let s = l.read_reg(pfx, am.reg, w);
    let s = l.t(s);

    let bits = w.bits() as u8;
    let inv = Expr::binop(BinOp::Sub(Width::W8), Expr::c8(bits), count.clone());
    let (main, fill) = if right {
        (
            Expr::binop(BinOp::Shr(w), d.clone(), count.clone()),
            Expr::binop(BinOp::Shl(w), s.clone(), inv),
        )
    } else {
        (
            Expr::binop(BinOp::Shl(w), d.clone(), count.clone()),
            Expr::binop(BinOp::Shr(w), s.clone(), inv),
        )
    };
    let shifted = l.t(Expr::binop(BinOp::Or(w), main, fill));
    // Count 0 leaves the destination and flags untouched; the IR shift
    // semantics make `shifted` collapse to `d | 0` only for counts >= 1, so
    // select explicitly.
    let res = l.t(Expr::mux(nonzero.clone(), shifted, d.clone()));

    let count_m1 = Expr::binop(BinOp::Sub(Width::W8), count, Expr::c8(1));
    let pre = if right {
        Expr::binop(BinOp::Shr(w), d, count_m1)
    } else {
        Expr::binop(BinOp::Shl(w), d, count_m1)
    };
    let cc = if right { CcClass::Shr } else { CcClass::Shl };
    let dep1 = l.zx64(w, res.clone());
    let dep2 = l.zx64(w, pre);
    flags::set_thunk_guarded(l, cc, w, dep1, dep2, Expr::c64(0), nonzero);
    l.write_rm(pfx, &am.op, w, res);
    Ok(len)
}

/// Group 3 (F6/F7): TEST, NOT, NEG, MUL, IMUL, DIV, IDIV.
pub fn grp3(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
) -> Result<usize, DecodeError> {
    let modrm = bytes::u8_at(l.bytes, delta)?;
    let op = (modrm >> 3) & 7;
    let trailing = match op {
        0 | 1 => {
            if w == Width::W8 {
                1
            } else {
                imm_z_len(w)
            }
        }
        _ => 0,
    };
    let am = disamode(l, delta, pfx, trailing)?;
    let mut len = delta + am.op.len();

    match op {
        // TEST rm, imm (with /1 as its undocumented alias).
        0 | 1 => {
            let (imm, imm_len) = if w == Width::W8 {
                (bytes::u8_at(l.bytes, len)? as u64, 1)
            } else {
                imm_z(l.bytes, len, w)?
            };
            len += imm_len;
            test_rm_imm(l, pfx, &am.op, w, imm)?;
        }
        // NOT: no flags.
        2 => {
            if pfx.lock() && !am.op.is_mem() {
                return Err(DecodeError::Invalid);
            }
            let d = l.read_rm(pfx, &am.op, w);
            let d = l.t(d);
            let res = l.t(Expr::unop(UnOp::Not(w), d.clone()));
            alu_writeback(l, pfx, &am.op, w, d, res)?;
        }
        // NEG: 0 - x with a Sub thunk.
        3 => {
            if pfx.lock() && !am.op.is_mem() {
                return Err(DecodeError::Invalid);
            }
            let d = l.read_rm(pfx, &am.op, w);
            let d = l.t(d);
            let res = l.t(Expr::unop(UnOp::Neg(w), d.clone()));
            let d64 = l.zx64(w, d.clone());
            flags::set_thunk(l, CcClass::Sub, w, Expr::c64(0), d64, Expr::c64(0));
            alu_writeback(l, pfx, &am.op, w, d, res)?;
        }
        // MUL / IMUL: widening multiply into rDX:rAX (AX for byte forms).
        4 | 5 => {
            pfx.reject_lock_rep()?;
            let signed = op == 5;
            let a = l.read_reg(pfx, 0, w);
            let a = l.t(a);
            let b = l.read_rm(pfx, &am.op, w);
            let b = l.t(b);
            let mul_op = if signed {
                BinOp::MulWidenS(w)
            } else {
                BinOp::MulWidenU(w)
            };
            let wide = l.t(Expr::binop(mul_op, a.clone(), b.clone()));
            write_widened(l, pfx, w, wide);
            let a64 = l.zx64(w, a);
            let b64 = l.zx64(w, b);
            let cc = if signed { CcClass::SMul } else { CcClass::UMul };
            flags::set_thunk(l, cc, w, a64, b64, Expr::c64(0));
        }
        // DIV / IDIV.
        6 | 7 => {
            pfx.reject_lock_rep()?;
            let signed = op == 7;
            let divisor = l.read_rm(pfx, &am.op, w);
            let divisor = l.t(divisor);
            // Division by zero leaves the block for the #DE path.
            let zero = l.is_zero(w, divisor.clone());
            l.block.push(Stmt::Exit {
                guard: zero,
                target: l.pc,
                kind: ExitKind::Trap { vector: 0 },
            });
            let numerator = read_widened(l, pfx, w);
            let div_op = if signed {
                BinOp::DivModS(w)
            } else {
                BinOp::DivModU(w)
            };
            let packed = l.t(Expr::binop(div_op, numerator, divisor));
            let (quot, rem) = split_widened(l, w, packed);
            if w == Width::W8 {
                let quot8 = l.t(quot);
                let rem8 = l.t(rem);
                guest::write_reg8(l.block, 0, false, quot8);
                guest::write_reg8(l.block, 0, true, rem8);
            } else {
                l.write_reg(pfx, 0, w, quot);
                l.write_reg(pfx, 2, w, rem);
            }
            // Flags after DIV/IDIV are architecturally undefined; the thunk
            // is left as-is.
        }
        _ => unreachable!(),
    }
    Ok(len)
}

/// Write a double-width multiply result to AX (byte form) or rDX:rAX.
fn write_widened(l: &mut Lifter<'_, '_>, pfx: &Prefixes, w: Width, wide: Expr) {
    match w {
        // The byte form lands entirely in AX.
        Width::W8 => guest::write_gpr_w(l.block, 0, Width::W16, wide),
        Width::W64 => {
            let lo = Expr::unop(UnOp::I128Lo, wide.clone());
            let hi = Expr::unop(UnOp::I128Hi, wide);
            guest::write_gpr_w(l.block, 0, Width::W64, lo);
            guest::write_gpr_w(l.block, 2, Width::W64, hi);
        }
        _ => {
            let dbl = double_of(w);
            let lo = Expr::unop(UnOp::Narrow { from: dbl, to: w }, wide.clone());
            let shifted = Expr::binop(BinOp::Shr(dbl), wide, Expr::c8(w.bits() as u8));
            let hi = Expr::unop(UnOp::Narrow { from: dbl, to: w }, shifted);
            l.write_reg(pfx, 0, w, lo);
            l.write_reg(pfx, 2, w, hi);
        }
    }
}

/// Read the double-width dividend from AX (byte form) or rDX:rAX.
fn read_widened(l: &mut Lifter<'_, '_>, pfx: &Prefixes, w: Width) -> Expr {
    if w == Width::W8 {
        return Expr::get(guest::gpr_off(0), Ty::I16);
    }
    let hi = l.read_reg(pfx, 2, w);
    let lo = l.read_reg(pfx, 0, w);
    l.t(Expr::binop(BinOp::Concat(w), hi, lo))
}

fn split_widened(l: &mut Lifter<'_, '_>, w: Width, packed: Expr) -> (Expr, Expr) {
    if w == Width::W64 {
        return (
            Expr::unop(UnOp::I128Lo, packed.clone()),
            Expr::unop(UnOp::I128Hi, packed),
        );
    }
    let dbl = double_of(w);
    let quot = Expr::unop(UnOp::Narrow { from: dbl, to: w }, packed.clone());
    let shifted = Expr::binop(BinOp::Shr(dbl), packed, Expr::c8(w.bits() as u8));
    let rem = Expr::unop(UnOp::Narrow { from: dbl, to: w }, shifted);
    let quot = l.t(quot);
    let rem = l.t(rem);
    (quot, rem)
}

fn double_of(w: Width) -> Width {
    match w {
        Width::W8 => Width::W16,
        Width::W16 => Width::W32,
        Width::W32 => Width::W64,
        Width::W64 => unreachable!("64-bit double width is I128"),
    }
}

/// Two/three-operand IMUL (0F AF and 69/6B): low-half result, SMul thunk.
pub fn imul_reg_rm(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
    imm: Option<bool>,
) -> Result<usize, DecodeError> {
    pfx.reject_lock_rep()?;
    if w == Width::W8 {
        return Err(DecodeError::Invalid);
    }
    let trailing = match imm {
        None => 0,
        Some(true) => 1,
        Some(false) => imm_z_len(w),
    };
    let am = disamode(l, delta, pfx, trailing)?;
    let mut len = delta + am.op.len();

    let a = l.read_rm(pfx, &am.op, w);
    let a = l.t(a);
    let b = match imm {
        None => {
            let v = l.read_reg(pfx, am.reg, w);
            l.t(v)
        }
        Some(is8) => {
            let (v, imm_len) = if is8 {
                imm_b_sx(l.bytes, len, w)?
            } else {
                imm_z(l.bytes, len, w)?
            };
            len += imm_len;
            Expr::cw(w, v)
        }
    };
    let res = l.t(Expr::binop(BinOp::Mul(w), a.clone(), b.clone()));
    let a64 = l.zx64(w, a);
    let b64 = l.zx64(w, b);
    flags::set_thunk(l, CcClass::SMul, w, a64, b64, Expr::c64(0));
    l.write_reg(pfx, am.reg, w, res);
    Ok(len)
}

/// XCHG rm, reg. Memory forms are implicitly locked and go through CAS.
pub fn xchg_rm_reg(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
) -> Result<usize, DecodeError> {
    if pfx.rep() || pfx.repne() {
        return Err(DecodeError::Invalid);
    }
    let am = disamode(l, delta, pfx, 0)?;
    let len = delta + am.op.len();
    let rm_val = l.read_rm(pfx, &am.op, w);
    let rm_val = l.t(rm_val);
    let reg_val = l.read_reg(pfx, am.reg, w);
    let reg_val = l.t(reg_val);
    match &am.op {
        RmOp::Reg(_) => {
            pfx.reject_lock()?;
            l.write_rm(pfx, &am.op, w, reg_val);
            l.write_reg(pfx, am.reg, w, rm_val);
        }
        RmOp::Mem { addr, .. } => {
            cas_write(l, Expr::Temp(*addr), w, rm_val.clone(), reg_val);
            l.write_reg(pfx, am.reg, w, rm_val);
        }
    }
    Ok(len)
}

/// CMPXCHG (0F B0/B1).
pub fn cmpxchg(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
) -> Result<usize, DecodeError> {
    if pfx.rep() || pfx.repne() {
        return Err(DecodeError::Invalid);
    }
    let am = disamode(l, delta, pfx, 0)?;
    let len = delta + am.op.len();

    let acc = l.read_reg(pfx, 0, w);
    let acc = l.t(acc);
    let new = l.read_reg(pfx, am.reg, w);
    let new = l.t(new);

    match &am.op {
        RmOp::Reg(_) => {
            pfx.reject_lock()?;
            let d = l.read_rm(pfx, &am.op, w);
            let d = l.t(d);
            let eq = l.t(Expr::binop(BinOp::CmpEq(w), acc.clone(), d.clone()));
            let dst_val = Expr::mux(eq.clone(), new, d.clone());
            l.write_rm(pfx, &am.op, w, dst_val);
            let acc_val = Expr::mux(eq, acc.clone(), d.clone());
            l.write_reg(pfx, 0, w, acc_val);
            let acc64 = l.zx64(w, acc);
            let d64 = l.zx64(w, d);
            flags::set_thunk(l, CcClass::Sub, w, acc64, d64, Expr::c64(0));
        }
        RmOp::Mem { addr, .. } => {
            // CAS with the accumulator as the expected value: on success the
            // store happened; on failure the accumulator learns the memory
            // value. Either way the compare feeds the Sub thunk.
            let old = l.block.new_temp(Ty::from_width(w));
            l.block.push(Stmt::Cas {
                addr: Expr::Temp(*addr),
                expected: acc.clone(),
                new,
                old,
            });
            l.expect_cas = true;
            let old = Expr::Temp(old);
            l.write_reg(pfx, 0, w, old.clone());
            let acc64 = l.zx64(w, acc);
            let old64 = l.zx64(w, old);
            flags::set_thunk(l, CcClass::Sub, w, acc64, old64, Expr::c64(0));
        }
    }
    Ok(len)
}

/// XADD (0F C0/C1).
pub fn xadd(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
) -> Result<usize, DecodeError> {
    if pfx.rep() || pfx.repne() {
        return Err(DecodeError::Invalid);
    }
    let am = disamode(l, delta, pfx, 0)?;
    let len = delta + am.op.len();

    let d = l.read_rm(pfx, &am.op, w);
    let d = l.t(d);
    let s = l.read_reg(pfx, am.reg, w);
    let s = l.t(s);
    let sum = l.t(Expr::binop(BinOp::Add(w), d.clone(), s.clone()));

    let d64 = l.zx64(w, d.clone());
    let s64 = l.zx64(w, s);
    flags::set_thunk(l, CcClass::Add, w, d64, s64, Expr::c64(0));

    alu_writeback(l, pfx, &am.op, w, d.clone(), sum)?;
    l.write_reg(pfx, am.reg, w, d);
    Ok(len)
}

/// CMPXCHG8B (0F C7 /1). The 16-byte form needs a double-width CAS the IR
/// does not carry and is reported as an unimplemented recognized feature.
pub fn cmpxchg8b(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    if pfx.rex_w() {
        return Err(DecodeError::Unimplemented("cmpxchg16b"));
    }
    let am = disamode(l, delta, pfx, 0)?;
    let len = delta + am.op.len();
    let RmOp::Mem { addr, .. } = am.op else {
        return Err(DecodeError::Invalid);
    };

    let expected_hi = l.read_reg(pfx, 2, Width::W32);
    let expected_lo = l.read_reg(pfx, 0, Width::W32);
    let expected = l.t(Expr::binop(BinOp::Concat(Width::W32), expected_hi, expected_lo));
    let new_hi = l.read_reg(pfx, 1, Width::W32);
    let new_lo = l.read_reg(pfx, 3, Width::W32);
    let new = l.t(Expr::binop(BinOp::Concat(Width::W32), new_hi, new_lo));

    let old = l.block.new_temp(Ty::I64);
    l.block.push(Stmt::Cas {
        addr: Expr::Temp(addr),
        expected: expected.clone(),
        new,
        old,
    });
    l.expect_cas = true;
    let old = Expr::Temp(old);

    let eq = l.t(Expr::binop(BinOp::CmpEq(Width::W64), old.clone(), expected));
    // ZF on success; EDX:EAX learn the memory value on failure.
    let zf = Expr::mux(eq.clone(), Expr::c64(flags::RF_ZF), Expr::c64(0));
    let old_flags = flags::rflags_all(l);
    let merged = Expr::binop(
        BinOp::Or(Width::W64),
        Expr::binop(
            BinOp::And(Width::W64),
            old_flags,
            Expr::c64(!flags::RF_ZF),
        ),
        zf,
    );
    flags::set_rflags_copy(l, merged);

    let old_lo = Expr::unop(
        UnOp::Narrow {
            from: Width::W64,
            to: Width::W32,
        },
        old.clone(),
    );
    let old_hi = Expr::unop(
        UnOp::Narrow {
            from: Width::W64,
            to: Width::W32,
        },
        Expr::binop(BinOp::Shr(Width::W64), old, Expr::c8(32)),
    );
    let keep_lo = l.read_reg(pfx, 0, Width::W32);
    let keep_hi = l.read_reg(pfx, 2, Width::W32);
    let lo = Expr::mux(eq.clone(), keep_lo, old_lo);
    let hi = Expr::mux(eq, keep_hi, old_hi);
    l.write_reg(pfx, 0, Width::W32, lo);
    l.write_reg(pfx, 2, Width::W32, hi);
    Ok(len)
}

/// BT/BTS/BTR/BTC with a register or immediate bit index.
pub fn bt_family(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
    op: u8,
    imm_index: bool,
) -> Result<usize, DecodeError> {
    if pfx.rep() || pfx.repne() {
        return Err(DecodeError::Invalid);
    }
    if w == Width::W8 {
        return Err(DecodeError::Invalid);
    }
    // op: 0=BT 1=BTS 2=BTR 3=BTC (grp8 /4../7 map to these).
    if op == 0 && pfx.lock() {
        return Err(DecodeError::Invalid);
    }
    let am = disamode(l, delta, pfx, if imm_index { 1 } else { 0 })?;
    let mut len = delta + am.op.len();

    let bits = w.bits() as u64;
    let (target, index): (RmOrAdjusted, Expr) = if imm_index {
        let raw = bytes::u8_at(l.bytes, len)? as u64;
        len += 1;
        (RmOrAdjusted::Plain, Expr::cw(w, raw % bits))
    } else {
        let idx = l.read_reg(pfx, am.reg, w);
        let idx = l.t(idx);
        match &am.op {
            RmOp::Reg(_) => {
                let masked = Expr::binop(BinOp::And(w), idx, Expr::cw(w, bits - 1));
                (RmOrAdjusted::Plain, l.t(masked))
            }
            RmOp::Mem { addr, .. } => {
                // Memory forms address the containing word: the effective
                // address moves by (index >> log2(bits)) * bytes, signed.
                let idx64 = l.sx64(w, idx);
                let idx64 = l.t(idx64);
                let word = Expr::binop(
                    BinOp::Sar(Width::W64),
                    idx64.clone(),
                    Expr::c8(bits.trailing_zeros() as u8),
                );
                let byte_off = Expr::binop(
                    BinOp::Mul(Width::W64),
                    word,
                    Expr::c64(bits / 8),
                );
                let ea = l.t(Expr::binop(
                    BinOp::Add(Width::W64),
                    Expr::Temp(*addr),
                    byte_off,
                ));
                let bit = Expr::binop(BinOp::And(Width::W64), idx64, Expr::c64(bits - 1));
                let bit = l.narrow(w, bit);
                (RmOrAdjusted::Mem(ea), l.t(bit))
            }
        }
    };

    let (d, ea): (Expr, Option<Expr>) = match (&am.op, &target) {
        (_, RmOrAdjusted::Mem(ea)) => {
            let v = l.load(Ty::from_width(w), ea.clone());
            (v, Some(ea.clone()))
        }
        (RmOp::Reg(_), RmOrAdjusted::Plain) => {
            let v = l.read_rm(pfx, &am.op, w);
            (l.t(v), None)
        }
        (RmOp::Mem { addr, .. }, RmOrAdjusted::Plain) => {
            let ea = Expr::Temp(*addr);
            let v = l.load(Ty::from_width(w), ea.clone());
            (v, Some(ea))
        }
    };

    let index8 = l.to_i8(w, index.clone());
    let bit = l.t(Expr::binop(
        BinOp::And(w),
        Expr::binop(BinOp::Shr(w), d.clone(), index8.clone()),
        Expr::cw(w, 1),
    ));

    // CF := selected bit; other flags preserved.
    let old_flags = flags::rflags_all(l);
    let bit64 = l.zx64(w, bit.clone());
    let merged = Expr::binop(
        BinOp::Or(Width::W64),
        Expr::binop(BinOp::And(Width::W64), old_flags, Expr::c64(!RF_CF)),
        bit64,
    );
    let merged = l.t(merged);
    flags::set_rflags_copy(l, merged);

    if op != 0 {
        let mask = l.t(Expr::binop(BinOp::Shl(w), Expr::cw(w, 1), index8));
        let res = match op {
            1 => Expr::binop(BinOp::Or(w), d.clone(), mask),
            2 => Expr::binop(BinOp::And(w), d.clone(), Expr::unop(UnOp::Not(w), mask)),
            _ => Expr::binop(BinOp::Xor(w), d.clone(), mask),
        };
        let res = l.t(res);
        match ea {
            Some(ea) => {
                if pfx.lock() {
                    cas_write(l, ea, w, d, res);
                } else {
                    l.store(ea, res);
                }
            }
            None => {
                pfx.reject_lock()?;
                l.write_rm(pfx, &am.op, w, res);
            }
        }
    }
    Ok(len)
}

enum RmOrAdjusted {
    Plain,
    Mem(Expr),
}

/// BSF/BSR and their F3-prefixed TZCNT/LZCNT relatives.
pub fn bit_scan(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
    reverse: bool,
    count_form: bool,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    if w == Width::W8 {
        return Err(DecodeError::Invalid);
    }
    let am = disamode(l, delta, pfx, 0)?;
    let len = delta + am.op.len();

    let src = l.read_rm(pfx, &am.op, w);
    let src = l.t(src);
    let src_zero = l.t(l_is_zero(w, src.clone()));

    if count_form {
        // TZCNT/LZCNT: defined at zero (result = width), CF = src == 0,
        // ZF = result == 0.
        let count = if reverse {
            Expr::unop(UnOp::Clz(w), src.clone())
        } else {
            Expr::unop(UnOp::Ctz(w), src.clone())
        };
        let res = l.t(Expr::mux(
            src_zero.clone(),
            Expr::cw(w, w.bits() as u64),
            count,
        ));
        let res_zero = l.t(l_is_zero(w, res.clone()));
        let cf = Expr::mux(src_zero, Expr::c64(RF_CF), Expr::c64(0));
        let zf = Expr::mux(res_zero, Expr::c64(flags::RF_ZF), Expr::c64(0));
        let rf = l.t(Expr::binop(BinOp::Or(Width::W64), cf, zf));
        flags::set_rflags_copy(l, rf);
        l.write_reg(pfx, am.reg, w, res);
    } else {
        // BSF/BSR: destination unchanged when the source is zero; ZF tracks
        // the source, which a Logic thunk over the source value encodes.
        let scan = if reverse {
            // BSR returns the index of the highest set bit.
            Expr::binop(
                BinOp::Sub(w),
                Expr::cw(w, (w.bits() - 1) as u64),
                Expr::unop(UnOp::Clz(w), src.clone()),
            )
        } else {
            Expr::unop(UnOp::Ctz(w), src.clone())
        };
        let scan = l.t(scan);
        let old = l.read_reg(pfx, am.reg, w);
        let res = Expr::mux(src_zero, old, scan);
        let src64 = l.zx64(w, src);
        flags::set_thunk(l, CcClass::Logic, w, src64, Expr::c64(0), Expr::c64(0));
        l.write_reg(pfx, am.reg, w, res);
    }
    Ok(len)
}

fn l_is_zero(w: Width, e: Expr) -> Expr {
    Expr::binop(BinOp::CmpEq(w), e, Expr::cw(w, 0))
}

/// POPCNT (F3 0F B8), via the external helper.
pub fn popcnt(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    if w == Width::W8 {
        return Err(DecodeError::Invalid);
    }
    let am = disamode(l, delta, pfx, 0)?;
    let len = delta + am.op.len();
    let src = l.read_rm(pfx, &am.op, w);
    let src = l.t(src);
    let src64 = l.zx64(w, src.clone());
    let res64 = l.t(Expr::CallPure {
        func: PureHelper::PopCount(w),
        args: vec![src64],
    });
    let res = l.narrow(w, res64);
    // All status flags cleared except ZF from the source.
    let src_zero = l.t(l_is_zero(w, src));
    let rf = Expr::mux(src_zero, Expr::c64(flags::RF_ZF), Expr::c64(0));
    flags::set_rflags_copy(l, rf);
    l.write_reg(pfx, am.reg, w, res);
    Ok(len)
}

/// The status-flag toggles: CLC/STC/CMC.
pub fn carry_toggle(l: &mut Lifter<'_, '_>, mode: u8) {
    let old = flags::rflags_all(l);
    let new = match mode {
        0 => Expr::binop(BinOp::And(Width::W64), old, Expr::c64(!RF_CF)),
        1 => Expr::binop(BinOp::Or(Width::W64), old, Expr::c64(RF_CF)),
        _ => Expr::binop(BinOp::Xor(Width::W64), old, Expr::c64(RF_CF)),
    };
    let new = l.t(Expr::binop(
        BinOp::And(Width::W64),
        new,
        Expr::c64(RF_STATUS_MASK),
    ));
    flags::set_rflags_copy(l, new);
}
