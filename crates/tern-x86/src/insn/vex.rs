//! VEX-prefixed dispatchers for the 0F/0F38/0F3A opcode spaces.
//!
//! The 128-bit forms reuse the legacy handlers through a [`VCtx`] that
//! routes the extra `vvvv` source operand and switches writes to the
//! upper-lane-zeroing form. The 256-bit lane families go through the generic
//! half-splitting combinator, since the IR carries no native 256-bit lane
//! primitives. BMI's GPR instructions also live in these maps.

use crate::decode::IsaExt;
use crate::insn::sse::{self, v256_lanewise, VCtx};
use crate::insn::three_byte;
use crate::lift::Lifter;
use crate::modrm::{disamode, disavsib, RmOp};
use crate::prefix::Prefixes;
use crate::{bytes, guest, DecodeError};
use tern_ir::{BinOp, Expr, PureHelper, Ty, UnOp};
use tern_types::Width;

fn require(l: &Lifter<'_, '_>, ext: IsaExt) -> Result<(), DecodeError> {
    if l.params.isa.contains(ext) {
        Ok(())
    } else {
        Err(DecodeError::Invalid)
    }
}

/// Does this 0F-map opcode consume `vvvv` as a first source? Encodings that
/// do not must encode `vvvv` = 0b1111.
fn uses_vvvv_0f(opcode: u8, psel: u8) -> bool {
    match opcode {
        // Scalar move/merge and scalar conversions.
        0x10 | 0x11 => psel >= 2,
        // The *DUP forms are two-operand; the LPS/HPS loads take vvvv.
        0x12 | 0x16 => psel <= 1,
        0x14 | 0x15 => true,
        0x2a => psel >= 2,
        0x51 => psel >= 2,
        0x54..=0x59 | 0x5c..=0x5f => true,
        0x5a => psel >= 2,
        // The integer lane space and its shifts.
        0x60..=0x6d | 0x74..=0x76 => psel == 1,
        0x71..=0x73 => psel == 1,
        0xc2 | 0xc4 | 0xc6 => true,
        0xd1..=0xd5 | 0xd8..=0xdf | 0xe0..=0xe5 | 0xe8..=0xef | 0xf1..=0xfe => psel == 1,
        _ => false,
    }
}

fn vex_ctx(pfx: &Prefixes, uses_vvvv: bool) -> Result<VCtx, DecodeError> {
    let vex = pfx.vex.expect("vex dispatch without vex prefix");
    if uses_vvvv {
        Ok(VCtx {
            vvvv: Some(vex.vvvv),
            zero_upper: true,
        })
    } else {
        if vex.vvvv != 0 {
            // vvvv is stored decoded (inverted), so "unused" reads as 0.
            return Err(DecodeError::Invalid);
        }
        Ok(VCtx {
            vvvv: None,
            zero_upper: true,
        })
    }
}

pub fn dispatch_0f(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    require(l, IsaExt::AVX)?;
    let opcode = bytes::u8_at(l.bytes, delta)?;
    let delta = delta + 1;
    let vex = pfx.vex.expect("vex dispatch without vex prefix");

    // VZEROUPPER / VZEROALL.
    if opcode == 0x77 && pfx.psel() == 0 {
        if vex.vvvv != 0 {
            return Err(DecodeError::Invalid);
        }
        for reg in 0..16u8 {
            if vex.l256 {
                guest::write_ymm(l.block, reg, Expr::Const(tern_ir::Const::V256(0)));
            } else {
                l.put(guest::ymm_hi_off(reg), l.v128_zero());
            }
        }
        return Ok(delta);
    }

    if vex.l256 {
        return dispatch_0f_256(l, delta, pfx, opcode);
    }

    let ctx = vex_ctx(pfx, uses_vvvv_0f(opcode, pfx.psel()))?;
    sse::dispatch_0f_ctx(l, delta, pfx, opcode, ctx)
}

/// 256-bit integer lane ops usable with the splitting combinator (AVX2).
fn v256_int_binop(opcode: u8) -> Option<BinOp> {
    Some(match opcode {
        0x60 => BinOp::InterleaveLo8x16,
        0x61 => BinOp::InterleaveLo16x8,
        0x62 => BinOp::InterleaveLo32x4,
        0x64 => BinOp::CmpGtS8x16,
        0x65 => BinOp::CmpGtS16x8,
        0x66 => BinOp::CmpGtS32x4,
        0x68 => BinOp::InterleaveHi8x16,
        0x69 => BinOp::InterleaveHi16x8,
        0x6a => BinOp::InterleaveHi32x4,
        0x6c => BinOp::InterleaveLo64x2,
        0x6d => BinOp::InterleaveHi64x2,
        0x74 => BinOp::CmpEq8x16,
        0x75 => BinOp::CmpEq16x8,
        0x76 => BinOp::CmpEq32x4,
        0xd4 => BinOp::Add64x2,
        0xd5 => BinOp::Mul16x8,
        0xd8 => BinOp::QSubU8x16,
        0xd9 => BinOp::QSubU16x8,
        0xda => BinOp::Min8Ux16,
        0xdc => BinOp::QAddU8x16,
        0xdd => BinOp::QAddU16x8,
        0xde => BinOp::Max8Ux16,
        0xe0 => BinOp::Avg8Ux16,
        0xe3 => BinOp::Avg16Ux8,
        0xe4 => BinOp::MulHiU16x8,
        0xe5 => BinOp::MulHiS16x8,
        0xe8 => BinOp::QSubS8x16,
        0xe9 => BinOp::QSubS16x8,
        0xea => BinOp::Min16Sx8,
        0xec => BinOp::QAddS8x16,
        0xed => BinOp::QAddS16x8,
        0xee => BinOp::Max16Sx8,
        0xf8 => BinOp::Sub8x16,
        0xf9 => BinOp::Sub16x8,
        0xfa => BinOp::Sub32x4,
        0xfb => BinOp::Sub64x2,
        0xfc => BinOp::Add8x16,
        0xfd => BinOp::Add16x8,
        0xfe => BinOp::Add32x4,
        _ => return None,
    })
}

/// 256-bit FP/logic lane ops (AVX).
fn v256_fp_binop(opcode: u8, pd: bool) -> Option<BinOp> {
    Some(match (opcode, pd) {
        (0x54, _) => BinOp::AndV128,
        (0x56, _) => BinOp::OrV128,
        (0x57, _) => BinOp::XorV128,
        (0x58, false) => BinOp::Add32Fx4,
        (0x58, true) => BinOp::Add64Fx2,
        (0x59, false) => BinOp::Mul32Fx4,
        (0x59, true) => BinOp::Mul64Fx2,
        (0x5c, false) => BinOp::Sub32Fx4,
        (0x5c, true) => BinOp::Sub64Fx2,
        (0x5d, false) => BinOp::Min32Fx4,
        (0x5d, true) => BinOp::Min64Fx2,
        (0x5e, false) => BinOp::Div32Fx4,
        (0x5e, true) => BinOp::Div64Fx2,
        (0x5f, false) => BinOp::Max32Fx4,
        (0x5f, true) => BinOp::Max64Fx2,
        _ => return None,
    })
}

fn read_ymm_rm(l: &mut Lifter<'_, '_>, rm: &RmOp) -> Expr {
    match rm {
        RmOp::Reg(idx) => l.t(guest::read_ymm(*idx)),
        RmOp::Mem { addr, .. } => l.load(Ty::V256, Expr::Temp(*addr)),
    }
}

fn dispatch_0f_256(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    opcode: u8,
) -> Result<usize, DecodeError> {
    let vex = pfx.vex.expect("vex dispatch without vex prefix");
    let psel = pfx.psel();

    // Whole-register 256-bit moves.
    match (opcode, psel) {
        (0x10, 0) | (0x10, 1) | (0x28, 0) | (0x28, 1) | (0x6f, 1) | (0x6f, 2) => {
            if vex.vvvv != 0 {
                return Err(DecodeError::Invalid);
            }
            let am = disamode(l, delta, pfx, 0)?;
            let v = read_ymm_rm(l, &am.op);
            guest::write_ymm(l.block, am.reg, v);
            return Ok(delta + am.op.len());
        }
        (0x11, 0) | (0x11, 1) | (0x29, 0) | (0x29, 1) | (0x7f, 1) | (0x7f, 2) => {
            if vex.vvvv != 0 {
                return Err(DecodeError::Invalid);
            }
            let am = disamode(l, delta, pfx, 0)?;
            let v = l.t(guest::read_ymm(am.reg));
            match &am.op {
                RmOp::Mem { addr, .. } => l.store(Expr::Temp(*addr), v),
                RmOp::Reg(idx) => guest::write_ymm(l.block, *idx, v),
            }
            return Ok(delta + am.op.len());
        }
        _ => {}
    }

    let op = if psel == 1 {
        if let Some(op) = v256_int_binop(opcode) {
            require(l, IsaExt::AVX2)?;
            Some(op)
        } else {
            v256_fp_binop(opcode, true)
        }
    } else if psel == 0 {
        v256_fp_binop(opcode, false)
    } else {
        None
    };
    let Some(op) = op else {
        return Err(DecodeError::Unimplemented("256-bit vector form"));
    };

    let am = disamode(l, delta, pfx, 0)?;
    let src2 = read_ymm_rm(l, &am.op);
    let src1 = l.t(guest::read_ymm(vex.vvvv));
    let res = v256_lanewise(l, op, src1, src2);
    guest::write_ymm(l.block, am.reg, res);
    Ok(delta + am.op.len())
}

pub fn dispatch_0f38(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    let opcode = bytes::u8_at(l.bytes, delta)?;
    let delta = delta + 1;
    let vex = pfx.vex.expect("vex dispatch without vex prefix");
    let psel = pfx.psel();

    // The BMI GPR space shares this map.
    match (opcode, psel) {
        // ANDN.
        (0xf2, 0) => {
            require(l, IsaExt::BMI1)?;
            return bmi_andn(l, delta, pfx);
        }
        // PDEP/PEXT.
        (0xf5, 3) | (0xf5, 2) => {
            require(l, IsaExt::BMI2)?;
            return bmi_deposit(l, delta, pfx, psel == 3);
        }
        // SHLX/SARX/SHRX.
        (0xf7, 1) | (0xf7, 2) | (0xf7, 3) => {
            require(l, IsaExt::BMI2)?;
            return bmi_shiftx(l, delta, pfx, psel);
        }
        // VPGATHERDD / VGATHERDPS (dword index, dword element).
        (0x90, 1) | (0x92, 1) => {
            require(l, IsaExt::AVX2)?;
            if vex.l256 || vex.w {
                return Err(DecodeError::Unimplemented("wide gather form"));
            }
            return gather_d32(l, delta, pfx);
        }
        (0x91, 1) | (0x93, 1) => {
            return Err(DecodeError::Unimplemented("qword-index gather"));
        }
        _ => {}
    }

    require(l, IsaExt::AVX)?;
    if vex.l256 {
        return Err(DecodeError::Unimplemented("256-bit 0f38 form"));
    }

    let uses_vvvv = matches!(
        opcode,
        0x00..=0x0b | 0x28 | 0x29 | 0x2b | 0x37..=0x40 | 0xdc..=0xdf
    );
    let ctx = vex_ctx(pfx, uses_vvvv)?;
    // The helper-routed families compute in the destination slot; a distinct
    // first source is staged by copying it there first.
    if let Some(v) = ctx.vvvv {
        if matches!(opcode, 0x00..=0x0b | 0xdc..=0xdf) {
            let modrm = bytes::u8_at(l.bytes, delta)?;
            let dst = ((modrm >> 3) & 7) | if pfx.rex_r() { 8 } else { 0 };
            if v != dst {
                let src1 = l.t(guest::read_xmm(v));
                guest::write_xmm_legacy(l.block, dst, src1);
            }
        }
    }
    let len = three_byte::dispatch_38_ctx(l, delta, pfx, opcode, ctx)?;
    // Helper writes touch only the low lane; the VEX contract zeroes the
    // rest.
    if matches!(opcode, 0x00..=0x0b | 0xdc..=0xdf) {
        let modrm = bytes::u8_at(l.bytes, delta)?;
        let dst = ((modrm >> 3) & 7) | if pfx.rex_r() { 8 } else { 0 };
        l.put(guest::ymm_hi_off(dst), l.v128_zero());
    }
    Ok(len)
}

pub fn dispatch_0f3a(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    require(l, IsaExt::AVX)?;
    let opcode = bytes::u8_at(l.bytes, delta)?;
    let delta = delta + 1;
    let vex = pfx.vex.expect("vex dispatch without vex prefix");

    // VINSERTF128 / VEXTRACTF128.
    if matches!(opcode, 0x18 | 0x19) && pfx.psel() == 1 {
        let am = disamode(l, delta, pfx, 1)?;
        let imm = bytes::u8_at(l.bytes, delta + am.op.len())? & 1;
        let len = delta + am.op.len() + 1;
        if opcode == 0x18 {
            if !vex.l256 {
                return Err(DecodeError::Invalid);
            }
            let base = l.t(guest::read_ymm(vex.vvvv));
            let insert = sse::read_xmm_rm(l, &am.op);
            let insert = l.t(insert);
            let (lo, hi) = if imm == 0 {
                (insert, Expr::unop(UnOp::V256ToV128Hi, base))
            } else {
                (Expr::unop(UnOp::V256ToV128Lo, base), insert)
            };
            let res = l.t(Expr::binop(BinOp::V128HLToV256, hi, lo));
            guest::write_ymm(l.block, am.reg, res);
        } else {
            if !vex.l256 || vex.vvvv != 0 {
                return Err(DecodeError::Invalid);
            }
            let src = l.t(guest::read_ymm(am.reg));
            let half = if imm == 0 {
                Expr::unop(UnOp::V256ToV128Lo, src)
            } else {
                Expr::unop(UnOp::V256ToV128Hi, src)
            };
            let half = l.t(half);
            match &am.op {
                RmOp::Mem { addr, .. } => l.store(Expr::Temp(*addr), half),
                RmOp::Reg(idx) => guest::write_xmm_zeroing(l.block, *idx, half),
            }
        }
        return Ok(len);
    }

    if vex.l256 {
        return Err(DecodeError::Unimplemented("256-bit 0f3a form"));
    }
    let uses_vvvv = matches!(opcode, 0x0f | 0x44 | 0x0a | 0x0b);
    let ctx = vex_ctx(pfx, uses_vvvv)?;
    if let Some(v) = ctx.vvvv {
        if matches!(opcode, 0x44 | 0x0a | 0x0b) {
            let modrm = bytes::u8_at(l.bytes, delta)?;
            let dst = ((modrm >> 3) & 7) | if pfx.rex_r() { 8 } else { 0 };
            if v != dst {
                let src1 = l.t(guest::read_xmm(v));
                guest::write_xmm_legacy(l.block, dst, src1);
            }
        }
    }
    three_byte::dispatch_3a_ctx(l, delta, pfx, opcode, ctx)
}

/// ANDN: dst = ~src1 & src2, with a Logic-class thunk.
fn bmi_andn(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    let vex = pfx.vex.expect("vex dispatch without vex prefix");
    let w = if vex.w { Width::W64 } else { Width::W32 };
    let am = disamode(l, delta, pfx, 0)?;
    let src2 = l.read_rm(pfx, &am.op, w);
    let src2 = l.t(src2);
    let src1 = l.read_reg(pfx, vex.vvvv, w);
    let inverted = Expr::unop(UnOp::Not(w), src1);
    let res = l.t(Expr::binop(BinOp::And(w), inverted, src2));
    let res64 = l.zx64(w, res.clone());
    crate::flags::set_thunk(
        l,
        crate::flags::CcClass::Logic,
        w,
        res64,
        Expr::c64(0),
        Expr::c64(0),
    );
    l.write_reg(pfx, am.reg, w, res);
    Ok(delta + am.op.len())
}

/// PDEP/PEXT through their pure helpers; no flags.
fn bmi_deposit(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    deposit: bool,
) -> Result<usize, DecodeError> {
    let vex = pfx.vex.expect("vex dispatch without vex prefix");
    let w = if vex.w { Width::W64 } else { Width::W32 };
    let am = disamode(l, delta, pfx, 0)?;
    let src = l.read_reg(pfx, vex.vvvv, w);
    let src = l.t(src);
    let mask = l.read_rm(pfx, &am.op, w);
    let mask = l.t(mask);
    let src64 = l.zx64(w, src);
    let mask64 = l.zx64(w, mask);
    let func = if deposit {
        PureHelper::Pdep(w)
    } else {
        PureHelper::Pext(w)
    };
    let res = l.t(Expr::CallPure {
        func,
        args: vec![src64, mask64],
    });
    let res = l.narrow(w, res);
    l.write_reg(pfx, am.reg, w, res);
    Ok(delta + am.op.len())
}

/// SHLX/SARX/SHRX: flagless shifts with the count in `vvvv`.
fn bmi_shiftx(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    psel: u8,
) -> Result<usize, DecodeError> {
    let vex = pfx.vex.expect("vex dispatch without vex prefix");
    let w = if vex.w { Width::W64 } else { Width::W32 };
    let am = disamode(l, delta, pfx, 0)?;
    let val = l.read_rm(pfx, &am.op, w);
    let val = l.t(val);
    let count = l.read_reg(pfx, vex.vvvv, w);
    let count8 = l.to_i8(w, count);
    let mask = if w == Width::W64 { 63u8 } else { 31u8 };
    let count8 = l.t(Expr::binop(BinOp::And(Width::W8), count8, Expr::c8(mask)));
    let op = match psel {
        1 => BinOp::Shl(w),
        2 => BinOp::Sar(w),
        _ => BinOp::Shr(w),
    };
    let res = Expr::binop(op, val, count8);
    l.write_reg(pfx, am.reg, w, res);
    Ok(delta + am.op.len())
}

/// VPGATHERDD/VGATHERDPS xmm form: four guarded dword loads through the
/// vector-indexed addressing decoder. Lanes whose mask sign bit is clear
/// keep the old destination value; the mask register is cleared afterwards.
fn gather_d32(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    let vex = pfx.vex.expect("vex dispatch without vex prefix");
    let (vsib, dst_reg) = disavsib(l, delta, pfx)?;
    let mask_reg = vex.vvvv;
    // The three registers must be pairwise distinct.
    if dst_reg == mask_reg || dst_reg == vsib.index_reg || mask_reg == vsib.index_reg {
        return Err(DecodeError::Invalid);
    }

    let index = l.t(guest::read_xmm(vsib.index_reg));
    let mask = l.t(guest::read_xmm(mask_reg));
    let old = l.t(guest::read_xmm(dst_reg));
    let base = Expr::Temp(vsib.base);

    let mut res = old.clone();
    for lane in 0..4u8 {
        let mask_lane = Expr::unop(UnOp::GetLane32 { idx: lane }, mask.clone());
        let active = Expr::binop(BinOp::CmpLtS(Width::W32), mask_lane, Expr::c32(0));
        let idx_lane = Expr::unop(UnOp::GetLane32 { idx: lane }, index.clone());
        let idx64 = Expr::unop(
            UnOp::WidenS {
                from: Width::W32,
                to: Width::W64,
            },
            idx_lane,
        );
        let scaled = Expr::binop(
            BinOp::Shl(Width::W64),
            idx64,
            Expr::c8(vsib.scale.trailing_zeros() as u8),
        );
        let addr = l.t(Expr::binop(BinOp::Add(Width::W64), base.clone(), scaled));
        let loaded = Expr::load(Ty::I32, addr);
        let old_lane = Expr::unop(UnOp::GetLane32 { idx: lane }, old.clone());
        let lane_val = l.t(Expr::mux(active, loaded, old_lane));
        res = Expr::binop(BinOp::SetLane32 { idx: lane }, res, lane_val);
    }
    let res = l.t(res);
    guest::write_xmm_zeroing(l.block, dst_reg, res);
    // Completed gathers clear the mask register.
    let zero = l.v128_zero();
    guest::write_xmm_zeroing(l.block, mask_reg, zero);
    Ok(delta + vsib.len)
}
