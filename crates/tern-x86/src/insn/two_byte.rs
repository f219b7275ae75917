//! 0F-map dispatcher (legacy prefixes).

use crate::decode::IsaExt;
use crate::flags;
use crate::insn::arith::{self, CountSrc};
use crate::insn::{ctrl, sse};
use crate::lift::Lifter;
use crate::modrm::{disamode, disamode_len};
use crate::prefix::Prefixes;
use crate::{bytes, guest, DecodeError};
use tern_ir::{EffHelper, Effects, Expr, GuestRange, MemEffect, Stmt, Ty, UnOp};
use tern_types::{Cond, Width};

pub fn dispatch(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    let opcode = bytes::u8_at(l.bytes, delta)?;
    let delta = delta + 1;
    let w = pfx.operand_width();

    match opcode {
        // Group 7 carries the system table ops plus RDTSCP (0F 01 F9).
        0x01 => {
            let modrm = bytes::u8_at(l.bytes, delta)?;
            if modrm == 0xf9 {
                if !l.params.isa.contains(IsaExt::RDTSCP) {
                    return Err(DecodeError::Invalid);
                }
                rdtsc_common(l, true);
                return Ok(delta + 1);
            }
            Err(DecodeError::Unimplemented("system table op"))
        }
        0x05 => ctrl::syscall(l, delta),
        0x0b => ctrl::ud2(l, delta),
        // Reserved-NOP / prefetch space: consume the addressing form, do
        // nothing.
        0x0d | 0x18..=0x1f => {
            pfx.reject_lock()?;
            let len = disamode_len(l.bytes, delta)?;
            Ok(delta + len)
        }
        0x30 => Err(DecodeError::Unimplemented("wrmsr")),
        0x31 => {
            pfx.reject_lock_rep()?;
            rdtsc_common(l, false);
            Ok(delta)
        }
        0x32 => Err(DecodeError::Unimplemented("rdmsr")),
        0x33 => Err(DecodeError::Unimplemented("rdpmc")),
        0x34 | 0x35 => Err(DecodeError::Invalid),
        // CMOVcc.
        0x40..=0x4f => {
            pfx.reject_lock_rep()?;
            let cc = Cond::from_cc(opcode & 0xf).unwrap();
            let am = disamode(l, delta, pfx, 0)?;
            let src = l.read_rm(pfx, &am.op, w);
            let src = l.t(src);
            let old = l.read_reg(pfx, am.reg, w);
            let old = l.t(old);
            let cond = flags::eval_cond(l, cc);
            // The destination is written either way (a 32-bit CMOV always
            // zero-extends, condition true or not).
            let val = Expr::mux(cond, src, old);
            l.write_reg(pfx, am.reg, w, val);
            Ok(delta + am.op.len())
        }
        // Jcc rel32.
        0x80..=0x8f => {
            let cc = Cond::from_cc(opcode & 0xf).unwrap();
            ctrl::jcc_rel(l, delta, pfx, cc, false)
        }
        // SETcc.
        0x90..=0x9f => {
            pfx.reject_lock_rep()?;
            let cc = Cond::from_cc(opcode & 0xf).unwrap();
            let am = disamode(l, delta, pfx, 0)?;
            let cond = flags::eval_cond(l, cc);
            let val = Expr::mux(cond, Expr::c8(1), Expr::c8(0));
            let val = l.t(val);
            l.write_rm(pfx, &am.op, Width::W8, val);
            Ok(delta + am.op.len())
        }
        0xa0 | 0xa1 | 0xa8 | 0xa9 => Err(DecodeError::Unimplemented("segment push/pop")),
        // CPUID.
        0xa2 => {
            pfx.reject_lock_rep()?;
            let gprs = |idx: u8| GuestRange {
                off: guest::gpr_off(idx),
                len: 8,
            };
            l.block.push(Stmt::DirtyCall {
                func: EffHelper::Cpuid,
                args: Vec::new(),
                dst: None,
                effects: Effects {
                    reads: vec![gprs(0), gprs(1)],
                    writes: vec![gprs(0), gprs(1), gprs(2), gprs(3)],
                    mem: MemEffect::None,
                },
            });
            Ok(delta)
        }
        0xa3 => arith::bt_family(l, delta, pfx, w, 0, false),
        0xa4 => arith::shld_shrd(l, delta, pfx, w, false, CountSrc::Imm8),
        0xa5 => arith::shld_shrd(l, delta, pfx, w, false, CountSrc::Cl),
        0xab => arith::bt_family(l, delta, pfx, w, 1, false),
        0xac => arith::shld_shrd(l, delta, pfx, w, true, CountSrc::Imm8),
        0xad => arith::shld_shrd(l, delta, pfx, w, true, CountSrc::Cl),
        0xae => sse::grp15(l, delta, pfx),
        0xaf => arith::imul_reg_rm(l, delta, pfx, w, None),
        0xb0 => arith::cmpxchg(l, delta, pfx, Width::W8),
        0xb1 => arith::cmpxchg(l, delta, pfx, w),
        0xb3 => arith::bt_family(l, delta, pfx, w, 2, false),
        // MOVZX.
        0xb6 | 0xb7 => {
            pfx.reject_lock_rep()?;
            let from = if opcode == 0xb6 {
                Width::W8
            } else {
                Width::W16
            };
            movx(l, delta, pfx, w, from, false)
        }
        0xb8 => {
            if pfx.rep() {
                if !l.params.isa.contains(IsaExt::POPCNT) {
                    return Err(DecodeError::Invalid);
                }
                return arith::popcnt(l, delta, pfx, w);
            }
            Err(DecodeError::Invalid)
        }
        // Group 8: BT-family with an immediate index.
        0xba => {
            let modrm = bytes::u8_at(l.bytes, delta)?;
            let sel = (modrm >> 3) & 7;
            if sel < 4 {
                return Err(DecodeError::Invalid);
            }
            arith::bt_family(l, delta, pfx, w, sel - 4, true)
        }
        0xbb => arith::bt_family(l, delta, pfx, w, 3, false),
        0xbc => {
            if pfx.rep() {
                if !l.params.isa.contains(IsaExt::BMI1) {
                    return Err(DecodeError::Invalid);
                }
                return arith::bit_scan(l, delta, pfx, w, false, true);
            }
            arith::bit_scan(l, delta, pfx, w, false, false)
        }
        0xbd => {
            if pfx.rep() {
                if !l.params.isa.contains(IsaExt::LZCNT) {
                    return Err(DecodeError::Invalid);
                }
                return arith::bit_scan(l, delta, pfx, w, true, true);
            }
            arith::bit_scan(l, delta, pfx, w, true, false)
        }
        // MOVSX.
        0xbe | 0xbf => {
            pfx.reject_lock_rep()?;
            let from = if opcode == 0xbe {
                Width::W8
            } else {
                Width::W16
            };
            movx(l, delta, pfx, w, from, true)
        }
        0xc0 => arith::xadd(l, delta, pfx, Width::W8),
        0xc1 => arith::xadd(l, delta, pfx, w),
        // MOVNTI: a plain store here.
        0xc3 => {
            pfx.reject_lock_rep()?;
            let am = disamode(l, delta, pfx, 0)?;
            if !am.op.is_mem() {
                return Err(DecodeError::Invalid);
            }
            let v = l.read_reg(pfx, am.reg, w);
            let v = l.t(v);
            l.write_rm(pfx, &am.op, w, v);
            Ok(delta + am.op.len())
        }
        // Group 9: CMPXCHG8B/16B.
        0xc7 => {
            let modrm = bytes::u8_at(l.bytes, delta)?;
            if modrm >= 0xc0 {
                return Err(DecodeError::Unimplemented("rdrand/rdseed group"));
            }
            if (modrm >> 3) & 7 != 1 {
                return Err(DecodeError::Invalid);
            }
            arith::cmpxchg8b(l, delta, pfx)
        }
        // BSWAP.
        0xc8..=0xcf => {
            pfx.reject_lock_rep()?;
            if w == Width::W16 {
                return Err(DecodeError::Invalid);
            }
            let reg = (opcode - 0xc8) | if pfx.rex_b() { 8 } else { 0 };
            let v = l.read_reg(pfx, reg, w);
            let res = Expr::unop(UnOp::Bswap(w), v);
            l.write_reg(pfx, reg, w, res);
            Ok(delta)
        }
        // Everything else in this map is the vector space.
        _ => sse::dispatch_0f(l, delta, pfx, opcode),
    }
}

fn movx(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    to: Width,
    from: Width,
    signed: bool,
) -> Result<usize, DecodeError> {
    if from > to {
        return Err(DecodeError::Invalid);
    }
    let am = disamode(l, delta, pfx, 0)?;
    let src = l.read_rm(pfx, &am.op, from);
    let val = if from == to {
        // MOVZX r16, r/m16 under the 66 prefix degenerates to a move.
        src
    } else if signed {
        Expr::unop(UnOp::WidenS { from, to }, src)
    } else {
        Expr::unop(UnOp::WidenU { from, to }, src)
    };
    l.write_reg(pfx, am.reg, to, val);
    Ok(delta + am.op.len())
}

fn rdtsc_common(l: &mut Lifter<'_, '_>, with_aux: bool) {
    let dst = l.block.new_temp(Ty::I64);
    let mut writes = vec![
        GuestRange {
            off: guest::gpr_off(0),
            len: 8,
        },
        GuestRange {
            off: guest::gpr_off(2),
            len: 8,
        },
    ];
    if with_aux {
        writes.push(GuestRange {
            off: guest::gpr_off(1),
            len: 8,
        });
    }
    let func = if with_aux {
        EffHelper::Rdtscp
    } else {
        EffHelper::Rdtsc
    };
    l.block.push(Stmt::DirtyCall {
        func,
        args: Vec::new(),
        dst: Some(dst),
        effects: Effects {
            reads: Vec::new(),
            writes,
            mem: MemEffect::None,
        },
    });
    // The counter comes back as one 64-bit value; EDX:EAX receive the
    // halves (zero-extending their upper words).
    let v = Expr::Temp(dst);
    let lo = Expr::unop(
        UnOp::Narrow {
            from: Width::W64,
            to: Width::W32,
        },
        v.clone(),
    );
    guest::write_gpr_w(l.block, 0, Width::W32, lo);
    let hi = Expr::unop(
        UnOp::Narrow {
            from: Width::W64,
            to: Width::W32,
        },
        Expr::binop(tern_ir::BinOp::Shr(Width::W64), v, Expr::c8(32)),
    );
    guest::write_gpr_w(l.block, 2, Width::W32, hi);
}
