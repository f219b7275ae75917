//! SSE/SSE2 vector and scalar-FP handlers (the 0F map's vector space).
//!
//! Instruction meaning is selected by (opcode, embedded prefix, width). The
//! regular per-lane space lowers to inline IR; the irregular space (PSADBW,
//! MASKMOV, the SSSE3 horizontal family) routes through annotated helper
//! calls, staging memory operands in the guest scratch slot. Legacy 128-bit
//! writes leave the upper YMM lane untouched; the VEX entry points in
//! `vex.rs` reuse these handlers with the zeroing write instead.
//!
//! MMX forms of the shared opcodes are recognized and reported as
//! unimplemented rather than misdecoded.

use crate::flags;
use crate::lift::Lifter;
use crate::modrm::{disamode, RmOp};
use crate::prefix::Prefixes;
use crate::{bytes, guest, DecodeError};
use tern_ir::{
    BinOp, Const, EffHelper, Effects, ExitKind, Expr, FCmpKind, GuestRange, MemEffect, Stmt, Ty,
    UnOp,
};
use tern_types::Width;

/// Vector-operand write context: legacy (upper lane preserved) or VEX
/// (upper lane zeroed, optional extra source register).
#[derive(Debug, Clone, Copy)]
pub(crate) struct VCtx {
    pub vvvv: Option<u8>,
    pub zero_upper: bool,
}

impl VCtx {
    pub(crate) fn legacy() -> VCtx {
        VCtx {
            vvvv: None,
            zero_upper: false,
        }
    }

    pub(crate) fn write128(self, l: &mut Lifter<'_, '_>, reg: u8, val: Expr) {
        if self.zero_upper {
            guest::write_xmm_zeroing(l.block, reg, val);
        } else {
            guest::write_xmm_legacy(l.block, reg, val);
        }
    }

    /// The first source operand: VEX three-operand forms read `vvvv`,
    /// legacy forms read the destination.
    fn src1(self, reg: u8) -> u8 {
        self.vvvv.unwrap_or(reg)
    }
}

pub(crate) fn read_xmm_rm(l: &mut Lifter<'_, '_>, rm: &RmOp) -> Expr {
    match rm {
        RmOp::Reg(idx) => l.t(guest::read_xmm(*idx)),
        RmOp::Mem { addr, .. } => l.load(Ty::V128, Expr::Temp(*addr)),
    }
}

/// Stage the r/m operand where a helper can see it: registers pass their
/// own slot, memory operands are copied into the scratch slot.
fn stage_rm(l: &mut Lifter<'_, '_>, rm: &RmOp) -> u16 {
    match rm {
        RmOp::Reg(idx) => guest::ymm_off(*idx),
        RmOp::Mem { addr, .. } => {
            let v = Expr::load(Ty::V128, Expr::Temp(*addr));
            l.stage_v128(v)
        }
    }
}

/// Two-operand helper-routed vector op: `dst = helper(dst, src, imm)`.
pub(crate) fn vec_helper2(
    l: &mut Lifter<'_, '_>,
    func: EffHelper,
    dst_reg: u8,
    src: &RmOp,
    imm: Option<u8>,
) {
    let src_off = stage_rm(l, src);
    let dst_off = guest::ymm_off(dst_reg);
    let mut args = vec![Expr::c64(dst_off as u64), Expr::c64(src_off as u64)];
    if let Some(imm) = imm {
        args.push(Expr::c64(imm as u64));
    }
    l.block.push(Stmt::DirtyCall {
        func,
        args,
        dst: None,
        effects: Effects {
            reads: vec![
                GuestRange { off: dst_off, len: 16 },
                GuestRange { off: src_off, len: 16 },
            ],
            writes: vec![GuestRange { off: dst_off, len: 16 }],
            mem: MemEffect::None,
        },
    });
}

/// The 66-prefixed integer lane binops of the 0F map that need nothing but a
/// single IR op. Keyed by opcode.
fn int_binop(opcode: u8) -> Option<BinOp> {
    Some(match opcode {
        0x60 => BinOp::InterleaveLo8x16,
        0x61 => BinOp::InterleaveLo16x8,
        0x62 => BinOp::InterleaveLo32x4,
        0x63 => BinOp::PackS16x8,
        0x64 => BinOp::CmpGtS8x16,
        0x65 => BinOp::CmpGtS16x8,
        0x66 => BinOp::CmpGtS32x4,
        0x67 => BinOp::PackU16x8,
        0x68 => BinOp::InterleaveHi8x16,
        0x69 => BinOp::InterleaveHi16x8,
        0x6a => BinOp::InterleaveHi32x4,
        0x6b => BinOp::PackS32x4,
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
        0xdb => BinOp::AndV128,
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
        0xeb => BinOp::OrV128,
        0xec => BinOp::QAddS8x16,
        0xed => BinOp::QAddS16x8,
        0xee => BinOp::Max16Sx8,
        0xef => BinOp::XorV128,
        0xf4 => BinOp::MulEvenU32x4,
        0xf5 => BinOp::MAddS16x8,
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

/// The packed-FP binops at 0x54-0x5F, keyed by (opcode, pd?).
fn fp_packed_binop(opcode: u8, pd: bool) -> Option<BinOp> {
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
        (0x14, false) => BinOp::InterleaveLo32x4,
        (0x14, true) => BinOp::InterleaveLo64x2,
        (0x15, false) => BinOp::InterleaveHi32x4,
        (0x15, true) => BinOp::InterleaveHi64x2,
        _ => return None,
    })
}

/// The scalar (lowest-lane) FP binops, keyed by (opcode, sd?).
fn fp_scalar_binop(opcode: u8, sd: bool) -> Option<BinOp> {
    Some(match (opcode, sd) {
        (0x58, false) => BinOp::Add32F0x4,
        (0x58, true) => BinOp::Add64F0x2,
        (0x59, false) => BinOp::Mul32F0x4,
        (0x59, true) => BinOp::Mul64F0x2,
        (0x5c, false) => BinOp::Sub32F0x4,
        (0x5c, true) => BinOp::Sub64F0x2,
        (0x5d, false) => BinOp::Min32F0x4,
        (0x5d, true) => BinOp::Min64F0x2,
        (0x5e, false) => BinOp::Div32F0x4,
        (0x5e, true) => BinOp::Div64F0x2,
        (0x5f, false) => BinOp::Max32F0x4,
        (0x5f, true) => BinOp::Max64F0x2,
        _ => return None,
    })
}

fn sse_round() -> Expr {
    Expr::unop(
        UnOp::Narrow {
            from: Width::W64,
            to: Width::W32,
        },
        Expr::get(guest::OFF_SSEROUND, Ty::I64),
    )
}

/// A generic two-operand lane op with the destination as first source.
fn binop2(
    l: &mut Lifter<'_, '_>,
    pfx: &Prefixes,
    ctx: VCtx,
    delta: usize,
    op: BinOp,
    swap: bool,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let am = disamode(l, delta, pfx, 0)?;
    let src2 = read_xmm_rm(l, &am.op);
    let src1 = l.t(guest::read_xmm(ctx.src1(am.reg)));
    let (a, b) = if swap { (src2, src1) } else { (src1, src2) };
    let res = l.t(Expr::binop(op, a, b));
    ctx.write128(l, am.reg, res);
    Ok(delta + am.op.len())
}

/// Legacy dispatcher for the 0F-map vector space. `delta` points just past
/// the opcode byte; `psel` is the embedded prefix selector.
pub fn dispatch_0f(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    opcode: u8,
) -> Result<usize, DecodeError> {
    dispatch_0f_ctx(l, delta, pfx, opcode, VCtx::legacy())
}

pub(crate) fn dispatch_0f_ctx(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    opcode: u8,
    ctx: VCtx,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let psel = pfx.psel();

    // The big regular families first.
    if psel == 1 {
        if let Some(op) = int_binop(opcode) {
            return binop2(l, pfx, ctx, delta, op, false);
        }
    }
    if matches!(opcode, 0x54..=0x5f | 0x14 | 0x15) {
        match psel {
            0 | 1 => {
                if opcode == 0x55 {
                    // ANDN: result = !dst & src.
                    return binop2(l, pfx, ctx, delta, BinOp::AndNotV128, true);
                }
                if let Some(op) = fp_packed_binop(opcode, psel == 1) {
                    return binop2(l, pfx, ctx, delta, op, false);
                }
            }
            2 | 3 => {
                if let Some(op) = fp_scalar_binop(opcode, psel == 3) {
                    return scalar_fp_binop(l, pfx, ctx, delta, op, psel == 3);
                }
            }
            _ => {}
        }
    }

    match (opcode, psel) {
        // MOVUPS/MOVUPD/MOVAPS/MOVAPD register/load forms. Alignment faults
        // are not modeled, so the aligned and unaligned forms coincide.
        (0x10, 0) | (0x10, 1) | (0x28, 0) | (0x28, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let v = read_xmm_rm(l, &am.op);
            ctx.write128(l, am.reg, v);
            Ok(delta + am.op.len())
        }
        (0x11, 0) | (0x11, 1) | (0x29, 0) | (0x29, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let v = l.t(guest::read_xmm(am.reg));
            write_xmm_rm(l, ctx, &am.op, v);
            Ok(delta + am.op.len())
        }
        // MOVSS/MOVSD load/register forms.
        (0x10, 2) | (0x10, 3) => {
            let am = disamode(l, delta, pfx, 0)?;
            let sd = psel == 3;
            let v = match &am.op {
                RmOp::Mem { addr, .. } => {
                    // Memory loads zero the remaining lanes.
                    if sd {
                        let v = l.load(Ty::I64, Expr::Temp(*addr));
                        l.t(Expr::unop(UnOp::I64ToV128, v))
                    } else {
                        let v = l.load(Ty::I32, Expr::Temp(*addr));
                        l.t(Expr::unop(UnOp::I32ToV128, v))
                    }
                }
                RmOp::Reg(idx) => {
                    // Register forms merge the low lane. VEX forms take the
                    // upper lanes from vvvv instead of the destination.
                    let base = l.t(guest::read_xmm(ctx.src1(am.reg)));
                    let src = l.t(guest::read_xmm(*idx));
                    merge_low_lane(l, base, src, sd)
                }
            };
            ctx.write128(l, am.reg, v);
            Ok(delta + am.op.len())
        }
        // MOVSS/MOVSD store forms.
        (0x11, 2) | (0x11, 3) => {
            let am = disamode(l, delta, pfx, 0)?;
            let sd = psel == 3;
            match &am.op {
                RmOp::Mem { addr, .. } => {
                    let reg = l.t(guest::read_xmm(am.reg));
                    if sd {
                        let lo = Expr::unop(UnOp::V128To64Lo, reg);
                        l.store(Expr::Temp(*addr), lo);
                    } else {
                        let lo = Expr::unop(UnOp::GetLane32 { idx: 0 }, reg);
                        l.store(Expr::Temp(*addr), lo);
                    }
                }
                RmOp::Reg(idx) => {
                    let base = l.t(guest::read_xmm(ctx.src1(*idx)));
                    let src = l.t(guest::read_xmm(am.reg));
                    let v = merge_low_lane(l, base, src, sd);
                    ctx.write128(l, *idx, v);
                }
            }
            Ok(delta + am.op.len())
        }
        // MOVLPS/MOVLPD load; MOVHLPS register form; MOVDDUP/MOVSLDUP.
        (0x12, 0) | (0x12, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let dst = l.t(guest::read_xmm(ctx.src1(am.reg)));
            let lo = match &am.op {
                RmOp::Mem { addr, .. } => l.load(Ty::I64, Expr::Temp(*addr)),
                RmOp::Reg(idx) => {
                    if psel == 1 {
                        return Err(DecodeError::Invalid);
                    }
                    // MOVHLPS: low lane := high lane of the source.
                    let v = l.t(guest::read_xmm(*idx));
                    l.t(Expr::unop(UnOp::V128To64Hi, v))
                }
            };
            let res = l.t(Expr::binop(BinOp::SetLane64 { idx: 0 }, dst, lo));
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        (0x12, 3) => {
            // MOVDDUP: broadcast the low 64 bits.
            if !l.params.isa.contains(crate::decode::IsaExt::SSE3) {
                return Err(DecodeError::Invalid);
            }
            let am = disamode(l, delta, pfx, 0)?;
            let lo = match &am.op {
                RmOp::Mem { addr, .. } => l.load(Ty::I64, Expr::Temp(*addr)),
                RmOp::Reg(idx) => {
                    let v = l.t(guest::read_xmm(*idx));
                    l.t(Expr::unop(UnOp::V128To64Lo, v))
                }
            };
            let zero = l.v128_zero();
            let low = Expr::binop(BinOp::SetLane64 { idx: 0 }, zero, lo.clone());
            let res = l.t(Expr::binop(BinOp::SetLane64 { idx: 1 }, low, lo));
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        // MOVLPS/MOVLPD store.
        (0x13, 0) | (0x13, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let RmOp::Mem { addr, .. } = am.op else {
                return Err(DecodeError::Invalid);
            };
            let v = l.t(guest::read_xmm(am.reg));
            let lo = Expr::unop(UnOp::V128To64Lo, v);
            l.store(Expr::Temp(addr), lo);
            Ok(delta + am.op.len())
        }
        // MOVHPS/MOVHPD load; MOVLHPS register form.
        (0x16, 0) | (0x16, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let dst = l.t(guest::read_xmm(ctx.src1(am.reg)));
            let hi = match &am.op {
                RmOp::Mem { addr, .. } => l.load(Ty::I64, Expr::Temp(*addr)),
                RmOp::Reg(idx) => {
                    if psel == 1 {
                        return Err(DecodeError::Invalid);
                    }
                    let v = l.t(guest::read_xmm(*idx));
                    l.t(Expr::unop(UnOp::V128To64Lo, v))
                }
            };
            let res = l.t(Expr::binop(BinOp::SetLane64 { idx: 1 }, dst, hi));
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        (0x17, 0) | (0x17, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let RmOp::Mem { addr, .. } = am.op else {
                return Err(DecodeError::Invalid);
            };
            let v = l.t(guest::read_xmm(am.reg));
            let hi = Expr::unop(UnOp::V128To64Hi, v);
            l.store(Expr::Temp(addr), hi);
            Ok(delta + am.op.len())
        }
        // CVTSI2SS/SD from a GPR.
        (0x2a, 2) | (0x2a, 3) => {
            let am = disamode(l, delta, pfx, 0)?;
            let gw = if pfx.rex_w() { Width::W64 } else { Width::W32 };
            let src = l.read_rm(pfx, &am.op, gw);
            let src = l.t(src);
            let rm = sse_round();
            let dst = l.t(guest::read_xmm(ctx.src1(am.reg)));
            let res = if psel == 2 {
                let f = if gw == Width::W64 {
                    Expr::binop(BinOp::I64SToF32, rm, src)
                } else {
                    Expr::binop(BinOp::I32SToF32, rm, src)
                };
                let bits = Expr::unop(UnOp::ReinterpF32AsI32, f);
                Expr::binop(BinOp::SetLane32 { idx: 0 }, dst, bits)
            } else {
                let f = if gw == Width::W64 {
                    Expr::binop(BinOp::I64SToF64, rm, src)
                } else {
                    Expr::unop(UnOp::I32SToF64, src)
                };
                let bits = Expr::unop(UnOp::ReinterpF64AsI64, f);
                Expr::binop(BinOp::SetLane64 { idx: 0 }, dst, bits)
            };
            let res = l.t(res);
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        // MOVNTPS/MOVNTPD: non-temporal stores are plain stores here.
        (0x2b, 0) | (0x2b, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let RmOp::Mem { addr, .. } = am.op else {
                return Err(DecodeError::Invalid);
            };
            let v = l.t(guest::read_xmm(am.reg));
            l.store(Expr::Temp(addr), v);
            Ok(delta + am.op.len())
        }
        // CVT(T)SS2SI / CVT(T)SD2SI.
        (0x2c, 2) | (0x2c, 3) | (0x2d, 2) | (0x2d, 3) => {
            let am = disamode(l, delta, pfx, 0)?;
            let sd = psel == 3;
            let gw = if pfx.rex_w() { Width::W64 } else { Width::W32 };
            let src = scalar_fp_rm(l, &am.op, sd);
            let rm = if opcode == 0x2c {
                Expr::c32(3)
            } else {
                sse_round()
            };
            let res = match (sd, gw) {
                (false, Width::W32) => Expr::binop(BinOp::F32ToI32S, rm, src),
                (false, Width::W64) => Expr::binop(BinOp::F32ToI64S, rm, src),
                (true, Width::W32) => Expr::binop(BinOp::F64ToI32S, rm, src),
                (true, Width::W64) => Expr::binop(BinOp::F64ToI64S, rm, src),
                _ => unreachable!(),
            };
            let res = l.t(res);
            l.write_reg(pfx, am.reg, gw, res);
            Ok(delta + am.op.len())
        }
        // UCOMIS/COMIS: ZF/PF/CF from the compare, rest cleared.
        (0x2e, 0) | (0x2f, 0) | (0x2e, 1) | (0x2f, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let sd = psel == 1;
            let a = scalar_fp_reg(l, am.reg, sd);
            let b = scalar_fp_rm(l, &am.op, sd);
            let cmp = if sd { BinOp::CmpF64 } else { BinOp::CmpF32 };
            let r = l.t(Expr::binop(cmp, a, b));
            let r64 = Expr::unop(
                UnOp::WidenU {
                    from: Width::W32,
                    to: Width::W64,
                },
                r,
            );
            let rf = l.t(Expr::binop(BinOp::And(Width::W64), r64, Expr::c64(0x45)));
            flags::set_rflags_copy(l, rf);
            Ok(delta + am.op.len())
        }
        // MOVMSKPS/PD.
        (0x50, 0) | (0x50, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let RmOp::Reg(idx) = am.op else {
                return Err(DecodeError::Invalid);
            };
            let v = l.t(guest::read_xmm(idx));
            let op = if psel == 1 {
                UnOp::MoveMask64x2
            } else {
                UnOp::MoveMask32x4
            };
            let mask = l.t(Expr::unop(op, v));
            let wide = Expr::unop(
                UnOp::WidenU {
                    from: Width::W32,
                    to: Width::W64,
                },
                mask,
            );
            guest::write_gpr_w(l.block, am.reg, Width::W64, wide);
            Ok(delta + am.op.len())
        }
        // SQRT forms.
        (0x51, 0) | (0x51, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let src = read_xmm_rm(l, &am.op);
            let rm = sse_round();
            let op = if psel == 1 {
                BinOp::Sqrt64Fx2
            } else {
                BinOp::Sqrt32Fx4
            };
            let res = l.t(Expr::binop(op, rm, src));
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        (0x51, 2) | (0x51, 3) => {
            let am = disamode(l, delta, pfx, 0)?;
            let sd = psel == 3;
            let src = scalar_fp_rm(l, &am.op, sd);
            let rm = sse_round();
            let root = if sd {
                Expr::binop(BinOp::SqrtF64, rm, src)
            } else {
                Expr::binop(BinOp::SqrtF32, rm, src)
            };
            let root = l.t(root);
            let dst = l.t(guest::read_xmm(ctx.src1(am.reg)));
            let res = set_scalar_lane(l, dst, root, sd);
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        (0x52, _) | (0x53, _) => Err(DecodeError::Unimplemented("rcp/rsqrt estimate")),
        // CVTPS2PD / CVTPD2PS / CVTSS2SD / CVTSD2SS.
        (0x5a, 0) => {
            let am = disamode(l, delta, pfx, 0)?;
            let src = read_xmm_rm(l, &am.op);
            let src = l.t(src);
            let zero = l.v128_zero();
            let mut res = zero;
            for i in 0..2u8 {
                let f32bits = Expr::unop(UnOp::GetLane32 { idx: i }, src.clone());
                let f = Expr::unop(UnOp::F32ToF64, Expr::unop(UnOp::ReinterpI32AsF32, f32bits));
                let bits = Expr::unop(UnOp::ReinterpF64AsI64, f);
                res = Expr::binop(BinOp::SetLane64 { idx: i }, res, bits);
            }
            let res = l.t(res);
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        (0x5a, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let src = read_xmm_rm(l, &am.op);
            let src = l.t(src);
            let rm = sse_round();
            let mut res = l.v128_zero();
            for i in 0..2u8 {
                let f64bits = Expr::unop(UnOp::GetLane64 { idx: i }, src.clone());
                let f = Expr::binop(
                    BinOp::F64ToF32,
                    rm.clone(),
                    Expr::unop(UnOp::ReinterpI64AsF64, f64bits),
                );
                let bits = Expr::unop(UnOp::ReinterpF32AsI32, f);
                res = Expr::binop(BinOp::SetLane32 { idx: i }, res, bits);
            }
            let res = l.t(res);
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        (0x5a, 2) | (0x5a, 3) => {
            let am = disamode(l, delta, pfx, 0)?;
            let sd = psel == 3;
            let src = scalar_fp_rm(l, &am.op, sd);
            let rm = sse_round();
            let dst = l.t(guest::read_xmm(ctx.src1(am.reg)));
            let res = if sd {
                // CVTSD2SS.
                let f = l.t(Expr::binop(BinOp::F64ToF32, rm, src));
                set_scalar_lane(l, dst, f, false)
            } else {
                // CVTSS2SD (exact).
                let f = l.t(Expr::unop(UnOp::F32ToF64, src));
                set_scalar_lane(l, dst, f, true)
            };
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        // CVTDQ2PS / CVTPS2DQ / CVTTPS2DQ.
        (0x5b, 0) | (0x5b, 1) | (0x5b, 2) => {
            let am = disamode(l, delta, pfx, 0)?;
            let src = read_xmm_rm(l, &am.op);
            let src = l.t(src);
            let rm = if psel == 2 { Expr::c32(3) } else { sse_round() };
            let mut res = l.v128_zero();
            for i in 0..4u8 {
                let lane = Expr::unop(UnOp::GetLane32 { idx: i }, src.clone());
                let out = if psel == 0 {
                    Expr::unop(
                        UnOp::ReinterpF32AsI32,
                        Expr::binop(BinOp::I32SToF32, rm.clone(), lane),
                    )
                } else {
                    Expr::binop(
                        BinOp::F32ToI32S,
                        rm.clone(),
                        Expr::unop(UnOp::ReinterpI32AsF32, lane),
                    )
                };
                res = Expr::binop(BinOp::SetLane32 { idx: i }, res, out);
            }
            let res = l.t(res);
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        // MOVD/MOVQ gpr -> xmm.
        (0x6e, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let gw = if pfx.rex_w() { Width::W64 } else { Width::W32 };
            let src = l.read_rm(pfx, &am.op, gw);
            let src = l.t(src);
            let v = if gw == Width::W64 {
                Expr::unop(UnOp::I64ToV128, src)
            } else {
                Expr::unop(UnOp::I32ToV128, src)
            };
            let v = l.t(v);
            ctx.write128(l, am.reg, v);
            Ok(delta + am.op.len())
        }
        // MOVDQA/MOVDQU load.
        (0x6f, 1) | (0x6f, 2) => {
            let am = disamode(l, delta, pfx, 0)?;
            let v = read_xmm_rm(l, &am.op);
            ctx.write128(l, am.reg, v);
            Ok(delta + am.op.len())
        }
        // PSHUFD / PSHUFLW / PSHUFHW.
        (0x70, 1) | (0x70, 2) | (0x70, 3) => {
            let am = disamode(l, delta, pfx, 1)?;
            let imm = bytes::u8_at(l.bytes, delta + am.op.len())?;
            let src = read_xmm_rm(l, &am.op);
            let op = match psel {
                1 => BinOp::Shuf32x4(imm),
                2 => BinOp::ShufHi16x8(imm),
                _ => BinOp::ShufLo16x8(imm),
            };
            let src = l.t(src);
            let res = l.t(Expr::binop(op, src.clone(), src));
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len() + 1)
        }
        // Immediate shift groups.
        (0x71, 1) | (0x72, 1) | (0x73, 1) => {
            let am = disamode(l, delta, pfx, 1)?;
            let RmOp::Reg(idx) = am.op else {
                return Err(DecodeError::Invalid);
            };
            let imm = bytes::u8_at(l.bytes, delta + am.op.len())?;
            let dst_reg = ctx.vvvv.unwrap_or(idx);
            let v = l.t(guest::read_xmm(idx));
            let res = imm_shift(l, opcode, am.reg & 7, v, imm)?;
            ctx.write128(l, dst_reg, res);
            Ok(delta + am.op.len() + 1)
        }
        // EMMS: every x87/MMX slot becomes empty.
        (0x77, 0) => {
            for slot in 0..8u8 {
                l.block.push(Stmt::PutArr {
                    desc: guest::fptag_arr(),
                    ix: Expr::c64(slot as u64),
                    val: Expr::c8(0),
                });
            }
            l.put(guest::OFF_FTOP, Expr::c64(0));
            Ok(delta)
        }
        // MOVD/MOVQ xmm -> gpr; MOVQ xmm load (F3).
        (0x7e, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let gw = if pfx.rex_w() { Width::W64 } else { Width::W32 };
            let v = l.t(guest::read_xmm(am.reg));
            let out = if gw == Width::W64 {
                Expr::unop(UnOp::V128To64Lo, v)
            } else {
                Expr::unop(UnOp::GetLane32 { idx: 0 }, v)
            };
            let out = l.t(out);
            l.write_rm(pfx, &am.op, gw, out);
            Ok(delta + am.op.len())
        }
        (0x7e, 2) => {
            let am = disamode(l, delta, pfx, 0)?;
            let lo = match &am.op {
                RmOp::Mem { addr, .. } => l.load(Ty::I64, Expr::Temp(*addr)),
                RmOp::Reg(idx) => {
                    let v = l.t(guest::read_xmm(*idx));
                    l.t(Expr::unop(UnOp::V128To64Lo, v))
                }
            };
            let res = l.t(Expr::unop(UnOp::I64ToV128, lo));
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        // MOVDQA/MOVDQU store.
        (0x7f, 1) | (0x7f, 2) => {
            let am = disamode(l, delta, pfx, 0)?;
            let v = l.t(guest::read_xmm(am.reg));
            write_xmm_rm(l, ctx, &am.op, v);
            Ok(delta + am.op.len())
        }
        // CMPPS/CMPPD/CMPSS/CMPSD.
        (0xc2, _) => {
            let am = disamode(l, delta, pfx, 1)?;
            let imm = bytes::u8_at(l.bytes, delta + am.op.len())?;
            if imm > 7 {
                return Err(DecodeError::Unimplemented("extended compare predicate"));
            }
            let kind = FCmpKind::from_imm3(imm).ok_or(DecodeError::Invalid)?;
            let len = delta + am.op.len() + 1;
            match psel {
                0 | 1 => {
                    let src2 = read_xmm_rm(l, &am.op);
                    let src1 = l.t(guest::read_xmm(ctx.src1(am.reg)));
                    let op = if psel == 1 {
                        BinOp::CmpF64x2(kind)
                    } else {
                        BinOp::CmpF32x4(kind)
                    };
                    let res = l.t(Expr::binop(op, src1, src2));
                    ctx.write128(l, am.reg, res);
                }
                _ => {
                    let sd = psel == 3;
                    let src1 = l.t(guest::read_xmm(ctx.src1(am.reg)));
                    let src2v = match &am.op {
                        RmOp::Reg(idx) => l.t(guest::read_xmm(*idx)),
                        RmOp::Mem { addr, .. } => {
                            if sd {
                                let v = l.load(Ty::I64, Expr::Temp(*addr));
                                l.t(Expr::unop(UnOp::I64ToV128, v))
                            } else {
                                let v = l.load(Ty::I32, Expr::Temp(*addr));
                                l.t(Expr::unop(UnOp::I32ToV128, v))
                            }
                        }
                    };
                    let op = if sd {
                        BinOp::CmpF64x2(kind)
                    } else {
                        BinOp::CmpF32x4(kind)
                    };
                    let full = l.t(Expr::binop(op, src1.clone(), src2v));
                    let res = if sd {
                        let lane = Expr::unop(UnOp::V128To64Lo, full);
                        let lane = l.t(lane);
                        l.t(Expr::binop(BinOp::SetLane64 { idx: 0 }, src1, lane))
                    } else {
                        let lane = Expr::unop(UnOp::GetLane32 { idx: 0 }, full);
                        let lane = l.t(lane);
                        l.t(Expr::binop(BinOp::SetLane32 { idx: 0 }, src1, lane))
                    };
                    ctx.write128(l, am.reg, res);
                }
            }
            Ok(len)
        }
        // PINSRW.
        (0xc4, 1) => {
            let am = disamode(l, delta, pfx, 1)?;
            let imm = bytes::u8_at(l.bytes, delta + am.op.len())? & 7;
            let src = match &am.op {
                RmOp::Reg(idx) => {
                    let v = l.read_reg(pfx, *idx, Width::W32);
                    let v = l.t(v);
                    l.t(Expr::unop(
                        UnOp::Narrow {
                            from: Width::W32,
                            to: Width::W16,
                        },
                        v,
                    ))
                }
                RmOp::Mem { addr, .. } => l.load(Ty::I16, Expr::Temp(*addr)),
            };
            let dst = l.t(guest::read_xmm(ctx.src1(am.reg)));
            let res = l.t(Expr::binop(BinOp::SetLane16 { idx: imm }, dst, src));
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len() + 1)
        }
        // PEXTRW (register destination form).
        (0xc5, 1) => {
            let am = disamode(l, delta, pfx, 1)?;
            let RmOp::Reg(idx) = am.op else {
                return Err(DecodeError::Invalid);
            };
            let imm = bytes::u8_at(l.bytes, delta + am.op.len())? & 7;
            let v = l.t(guest::read_xmm(idx));
            let lane = Expr::unop(UnOp::GetLane16 { idx: imm }, v);
            let wide = Expr::unop(
                UnOp::WidenU {
                    from: Width::W16,
                    to: Width::W64,
                },
                lane,
            );
            guest::write_gpr_w(l.block, am.reg, Width::W64, wide);
            Ok(delta + am.op.len() + 1)
        }
        // SHUFPS/SHUFPD.
        (0xc6, 0) | (0xc6, 1) => {
            let am = disamode(l, delta, pfx, 1)?;
            let imm = bytes::u8_at(l.bytes, delta + am.op.len())?;
            let src2 = read_xmm_rm(l, &am.op);
            let src1 = l.t(guest::read_xmm(ctx.src1(am.reg)));
            let op = if psel == 1 {
                BinOp::Shuf64x2x2(imm)
            } else {
                BinOp::Shuf32x4x2(imm)
            };
            let res = l.t(Expr::binop(op, src1, src2));
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len() + 1)
        }
        // Shifts by the low quadword of an XMM register.
        (0xd1, 1) | (0xd2, 1) | (0xd3, 1) | (0xe1, 1) | (0xe2, 1) | (0xf1, 1) | (0xf2, 1)
        | (0xf3, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let cnt_src = read_xmm_rm(l, &am.op);
            let count = l.t(Expr::unop(UnOp::V128To64Lo, cnt_src));
            let dst_reg = ctx.src1(am.reg);
            let v = l.t(guest::read_xmm(dst_reg));
            let res = var_shift(l, opcode, v, count)?;
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        // MOVQ store form.
        (0xd6, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let v = l.t(guest::read_xmm(am.reg));
            let lo = l.t(Expr::unop(UnOp::V128To64Lo, v));
            match &am.op {
                RmOp::Mem { addr, .. } => l.store(Expr::Temp(*addr), lo),
                RmOp::Reg(idx) => {
                    let res = l.t(Expr::unop(UnOp::I64ToV128, lo));
                    ctx.write128(l, *idx, res);
                }
            }
            Ok(delta + am.op.len())
        }
        // PMOVMSKB.
        (0xd7, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let RmOp::Reg(idx) = am.op else {
                return Err(DecodeError::Invalid);
            };
            let v = l.t(guest::read_xmm(idx));
            let mask = l.t(Expr::unop(UnOp::MoveMask8x16, v));
            let wide = Expr::unop(
                UnOp::WidenU {
                    from: Width::W32,
                    to: Width::W64,
                },
                mask,
            );
            guest::write_gpr_w(l.block, am.reg, Width::W64, wide);
            Ok(delta + am.op.len())
        }
        // CVT between packed dword and double forms (E6).
        (0xe6, 1) | (0xe6, 2) | (0xe6, 3) => {
            let am = disamode(l, delta, pfx, 0)?;
            let src = read_xmm_rm(l, &am.op);
            let src = l.t(src);
            let res = if psel == 2 {
                // CVTDQ2PD (exact).
                let mut res = l.v128_zero();
                for i in 0..2u8 {
                    let lane = Expr::unop(UnOp::GetLane32 { idx: i }, src.clone());
                    let f = Expr::unop(UnOp::I32SToF64, lane);
                    let bits = Expr::unop(UnOp::ReinterpF64AsI64, f);
                    res = Expr::binop(BinOp::SetLane64 { idx: i }, res, bits);
                }
                l.t(res)
            } else {
                // CVTPD2DQ (F2) / CVTTPD2DQ (66): low two dwords, upper zero.
                let rm = if psel == 1 { Expr::c32(3) } else { sse_round() };
                let mut res = l.v128_zero();
                for i in 0..2u8 {
                    let bits = Expr::unop(UnOp::GetLane64 { idx: i }, src.clone());
                    let out = Expr::binop(
                        BinOp::F64ToI32S,
                        rm.clone(),
                        Expr::unop(UnOp::ReinterpI64AsF64, bits),
                    );
                    res = Expr::binop(BinOp::SetLane32 { idx: i }, res, out);
                }
                l.t(res)
            };
            ctx.write128(l, am.reg, res);
            Ok(delta + am.op.len())
        }
        // MOVNTDQ.
        (0xe7, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            let RmOp::Mem { addr, .. } = am.op else {
                return Err(DecodeError::Invalid);
            };
            let v = l.t(guest::read_xmm(am.reg));
            l.store(Expr::Temp(addr), v);
            Ok(delta + am.op.len())
        }
        // PSADBW via its helper.
        (0xf6, 1) => {
            let am = disamode(l, delta, pfx, 0)?;
            vec_helper2(l, EffHelper::Psadbw, am.reg, &am.op, None);
            Ok(delta + am.op.len())
        }
        (0xf7, 1) => Err(DecodeError::Unimplemented("maskmovdqu")),
        // MMX forms of shared opcodes land here.
        (0x10..=0x17, _) | (0x28..=0x2f, _) | (0x50..=0x76, _) | (0x7e..=0x7f, _)
        | (0xc2..=0xc6, _) | (0xd0..=0xfe, _) => {
            Err(DecodeError::Unimplemented("mmx or misprefixed vector form"))
        }
        _ => Err(DecodeError::Invalid),
    }
}

/// The aligned/unaligned store path, shared by MOVUPS/MOVAPS/MOVDQx stores.
fn write_xmm_rm(l: &mut Lifter<'_, '_>, ctx: VCtx, rm: &RmOp, val: Expr) {
    match rm {
        RmOp::Mem { addr, .. } => l.store(Expr::Temp(*addr), val),
        RmOp::Reg(idx) => ctx.write128(l, *idx, val),
    }
}

/// Lowest-lane FP value of an r/m operand.
fn scalar_fp_rm(l: &mut Lifter<'_, '_>, rm: &RmOp, sd: bool) -> Expr {
    match rm {
        RmOp::Mem { addr, .. } => {
            let ty = if sd { Ty::F64 } else { Ty::F32 };
            l.load(ty, Expr::Temp(*addr))
        }
        RmOp::Reg(idx) => scalar_fp_reg(l, *idx, sd),
    }
}

fn scalar_fp_reg(l: &mut Lifter<'_, '_>, reg: u8, sd: bool) -> Expr {
    let v = l.t(guest::read_xmm(reg));
    if sd {
        let bits = Expr::unop(UnOp::V128To64Lo, v);
        l.t(Expr::unop(UnOp::ReinterpI64AsF64, bits))
    } else {
        let bits = Expr::unop(UnOp::GetLane32 { idx: 0 }, v);
        l.t(Expr::unop(UnOp::ReinterpI32AsF32, bits))
    }
}

fn set_scalar_lane(l: &mut Lifter<'_, '_>, base: Expr, val: Expr, sd: bool) -> Expr {
    if sd {
        let bits = Expr::unop(UnOp::ReinterpF64AsI64, val);
        l.t(Expr::binop(BinOp::SetLane64 { idx: 0 }, base, bits))
    } else {
        let bits = Expr::unop(UnOp::ReinterpF32AsI32, val);
        l.t(Expr::binop(BinOp::SetLane32 { idx: 0 }, base, bits))
    }
}

/// Merge the low 32/64-bit lane of `src` into `base`.
fn merge_low_lane(l: &mut Lifter<'_, '_>, base: Expr, src: Expr, sd: bool) -> Expr {
    if sd {
        let lo = Expr::unop(UnOp::V128To64Lo, src);
        l.t(Expr::binop(BinOp::SetLane64 { idx: 0 }, base, lo))
    } else {
        let lo = Expr::unop(UnOp::GetLane32 { idx: 0 }, src);
        l.t(Expr::binop(BinOp::SetLane32 { idx: 0 }, base, lo))
    }
}

/// The lowest-lane scalar FP arithmetic forms: the rounding mode is the
/// guest's SSE rounding field, applied by the downstream engine through the
/// lane op itself.
fn scalar_fp_binop(
    l: &mut Lifter<'_, '_>,
    pfx: &Prefixes,
    ctx: VCtx,
    delta: usize,
    op: BinOp,
    sd: bool,
) -> Result<usize, DecodeError> {
    let am = disamode(l, delta, pfx, 0)?;
    let src1 = l.t(guest::read_xmm(ctx.src1(am.reg)));
    let src2 = match &am.op {
        RmOp::Reg(idx) => l.t(guest::read_xmm(*idx)),
        RmOp::Mem { addr, .. } => {
            if sd {
                let v = l.load(Ty::I64, Expr::Temp(*addr));
                l.t(Expr::unop(UnOp::I64ToV128, v))
            } else {
                let v = l.load(Ty::I32, Expr::Temp(*addr));
                l.t(Expr::unop(UnOp::I32ToV128, v))
            }
        }
    };
    let res = l.t(Expr::binop(op, src1, src2));
    ctx.write128(l, am.reg, res);
    Ok(delta + am.op.len())
}

/// PSRLW-class immediate shifts (0F 71/72/73 groups).
fn imm_shift(
    l: &mut Lifter<'_, '_>,
    opcode: u8,
    sel: u8,
    v: Expr,
    imm: u8,
) -> Result<Expr, DecodeError> {
    let lane_bits: u8 = match opcode {
        0x71 => 16,
        0x72 => 32,
        _ => 64,
    };
    let out = match (opcode, sel) {
        (0x73, 3) => {
            // PSRLDQ: whole-register byte shift.
            if imm >= 16 {
                l.v128_zero()
            } else {
                Expr::binop(BinOp::ShrV128Bytes, v, Expr::c8(imm))
            }
        }
        (0x73, 7) => {
            if imm >= 16 {
                l.v128_zero()
            } else {
                Expr::binop(BinOp::ShlV128Bytes, v, Expr::c8(imm))
            }
        }
        (_, 2) => {
            if imm >= lane_bits {
                l.v128_zero()
            } else {
                let op = match opcode {
                    0x71 => BinOp::ShrN16x8,
                    0x72 => BinOp::ShrN32x4,
                    _ => BinOp::ShrN64x2,
                };
                Expr::binop(op, v, Expr::c8(imm))
            }
        }
        (_, 6) => {
            if imm >= lane_bits {
                l.v128_zero()
            } else {
                let op = match opcode {
                    0x71 => BinOp::ShlN16x8,
                    0x72 => BinOp::ShlN32x4,
                    _ => BinOp::ShlN64x2,
                };
                Expr::binop(op, v, Expr::c8(imm))
            }
        }
        (0x71, 4) | (0x72, 4) => {
            // PSRAW/PSRAD saturate their count at lane-width - 1.
            let count = imm.min(lane_bits - 1);
            let op = if opcode == 0x71 {
                BinOp::SarN16x8
            } else {
                BinOp::SarN32x4
            };
            Expr::binop(op, v, Expr::c8(count))
        }
        _ => return Err(DecodeError::Invalid),
    };
    Ok(l.t(out))
}

/// PSRLW-class shifts with the count in an XMM register's low quadword.
fn var_shift(
    l: &mut Lifter<'_, '_>,
    opcode: u8,
    v: Expr,
    count: Expr,
) -> Result<Expr, DecodeError> {
    let (op, lane_bits, arith): (BinOp, u8, bool) = match opcode {
        0xd1 => (BinOp::ShrN16x8, 16, false),
        0xd2 => (BinOp::ShrN32x4, 32, false),
        0xd3 => (BinOp::ShrN64x2, 64, false),
        0xe1 => (BinOp::SarN16x8, 16, true),
        0xe2 => (BinOp::SarN32x4, 32, true),
        0xf1 => (BinOp::ShlN16x8, 16, false),
        0xf2 => (BinOp::ShlN32x4, 32, false),
        0xf3 => (BinOp::ShlN64x2, 64, false),
        _ => return Err(DecodeError::Invalid),
    };
    let in_range = Expr::binop(
        BinOp::CmpLtU(Width::W64),
        count.clone(),
        Expr::c64(lane_bits as u64),
    );
    let count8 = Expr::unop(
        UnOp::Narrow {
            from: Width::W64,
            to: Width::W8,
        },
        count.clone(),
    );
    let shifted = Expr::binop(op, v.clone(), count8);
    let overflow = if arith {
        // Arithmetic shifts saturate at lane-width - 1.
        let sat_op = if opcode == 0xe1 {
            BinOp::SarN16x8
        } else {
            BinOp::SarN32x4
        };
        Expr::binop(sat_op, v, Expr::c8(lane_bits - 1))
    } else {
        Expr::Const(Const::V128(0))
    };
    Ok(l.t(Expr::mux(in_range, shifted, overflow)))
}

/// Build a V256 lane op from a 128-bit op applied to both halves: the
/// recurring AVX splitting pattern in one place.
pub(crate) fn v256_lanewise(
    l: &mut Lifter<'_, '_>,
    op: BinOp,
    a: Expr,
    b: Expr,
) -> Expr {
    let a = l.t(a);
    let b = l.t(b);
    let lo = Expr::binop(
        op,
        Expr::unop(UnOp::V256ToV128Lo, a.clone()),
        Expr::unop(UnOp::V256ToV128Lo, b.clone()),
    );
    let hi = Expr::binop(
        op,
        Expr::unop(UnOp::V256ToV128Hi, a),
        Expr::unop(UnOp::V256ToV128Hi, b),
    );
    l.t(Expr::binop(BinOp::V128HLToV256, hi, lo))
}

/// LDMXCSR/STMXCSR and the fence/CLFLUSH group (0F AE).
pub fn grp15(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let modrm = bytes::u8_at(l.bytes, delta)?;
    let sel = (modrm >> 3) & 7;

    if modrm >= 0xc0 {
        return match sel {
            // LFENCE/MFENCE/SFENCE.
            5 | 6 | 7 => {
                l.block.push(Stmt::Fence);
                Ok(delta + 1)
            }
            _ => Err(DecodeError::Invalid),
        };
    }

    let am = disamode(l, delta, pfx, 0)?;
    let len = delta + am.op.len();
    let RmOp::Mem { addr, .. } = am.op else {
        return Err(DecodeError::Invalid);
    };
    let addr = Expr::Temp(addr);
    match sel {
        // FXSAVE/FXRSTOR.
        0 | 1 => {
            let ranges = vec![
                GuestRange {
                    off: guest::OFF_FTOP,
                    len: guest::OFF_EMNOTE - guest::OFF_FTOP,
                },
                GuestRange {
                    off: guest::OFF_FPROUND,
                    len: 8,
                },
                GuestRange {
                    off: guest::OFF_SSEROUND,
                    len: 8,
                },
                GuestRange {
                    off: guest::OFF_YMM0,
                    len: 16 * 32,
                },
            ];
            let (func, reads, writes, mem) = if sel == 0 {
                (
                    EffHelper::FxSave,
                    ranges,
                    Vec::new(),
                    MemEffect::Write {
                        addr: addr.clone(),
                        len: 512,
                    },
                )
            } else {
                (
                    EffHelper::FxRestore,
                    Vec::new(),
                    ranges,
                    MemEffect::Read {
                        addr: addr.clone(),
                        len: 512,
                    },
                )
            };
            l.block.push(Stmt::DirtyCall {
                func,
                args: vec![addr],
                dst: None,
                effects: Effects { reads, writes, mem },
            });
            Ok(len)
        }
        // LDMXCSR: only the rounding field is modeled.
        2 => {
            let v = l.load(Ty::I32, addr);
            let v64 = Expr::unop(
                UnOp::WidenU {
                    from: Width::W32,
                    to: Width::W64,
                },
                v,
            );
            let rc = Expr::binop(
                BinOp::And(Width::W64),
                Expr::binop(BinOp::Shr(Width::W64), v64, Expr::c8(13)),
                Expr::c64(3),
            );
            l.put(guest::OFF_SSEROUND, rc);
            Ok(len)
        }
        // STMXCSR: reconstruct from the rounding field, exceptions masked.
        3 => {
            let rc = Expr::binop(
                BinOp::Shl(Width::W64),
                Expr::get(guest::OFF_SSEROUND, Ty::I64),
                Expr::c8(13),
            );
            let word = Expr::binop(BinOp::Or(Width::W64), rc, Expr::c64(0x1f80));
            let word = l.t(word);
            let word32 = l.narrow(Width::W32, word);
            l.store(addr, word32);
            Ok(len)
        }
        // CLFLUSH: record the flushed range and leave the block so the
        // embedding can invalidate translations.
        7 => {
            l.put(guest::OFF_CMSTART, addr.clone());
            l.put(guest::OFF_CMLEN, Expr::c64(64));
            let next = l.next_addr(len);
            l.stop(Expr::c64(next), ExitKind::FlushICache);
            Ok(len)
        }
        _ => Err(DecodeError::Unimplemented("0f ae form")),
    }
}
