//! Control-transfer handlers: branches, calls, returns, loops, traps.
//!
//! Direct branches consult the caller's chase policy to decide between
//! resteering (keep decoding at the target inside the same block) and
//! stopping. Conditional branches use the backward-taken / forward-not-taken
//! heuristic; when a branch is statically assumed, the *unlikely* arm gets a
//! guarded side exit and decoding resteers to the likely arm.

use crate::flags;
use crate::insn::imm_z;
use crate::lift::Lifter;
use crate::modrm::disamode;
use crate::prefix::Prefixes;
use crate::{bytes, guest, DecodeError};
use tern_ir::{BinOp, ExitKind, Expr, Stmt, Ty, UnOp};
use tern_types::{Cond, Width};

/// Push a value of the stack width (decrement RSP, store).
pub fn push_w(l: &mut Lifter<'_, '_>, w: Width, val: Expr) {
    let step = w.bytes() as u64;
    let sp = l.t(Expr::binop(
        BinOp::Sub(Width::W64),
        guest::read_gpr(4),
        Expr::c64(step),
    ));
    guest::write_gpr_w(l.block, 4, Width::W64, sp.clone());
    l.store(sp, val);
}

/// Pop a value of the stack width (load, increment RSP).
pub fn pop_w(l: &mut Lifter<'_, '_>, w: Width) -> Expr {
    let sp = l.t(guest::read_gpr(4));
    let val = l.load(Ty::from_width(w), sp.clone());
    let step = w.bytes() as u64;
    let sp2 = Expr::binop(BinOp::Add(Width::W64), sp, Expr::c64(step));
    guest::write_gpr_w(l.block, 4, Width::W64, sp2);
    val
}

/// JMP rel8/rel32.
pub fn jmp_rel(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    rel8: bool,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let (disp, len) = rel_disp(l.bytes, delta, rel8)?;
    let fall = l.next_addr(len);
    let target = fall.wrapping_add(disp as u64);
    if l.chase(target) {
        l.resteer_u(target);
    } else {
        l.stop(Expr::c64(target), ExitKind::Jump);
    }
    Ok(len)
}

/// CALL rel32: push the return address, hint the red zone, then chase or
/// stop.
pub fn call_rel(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let (disp, len) = rel_disp(l.bytes, delta, false)?;
    let ret = l.next_addr(len);
    let target = ret.wrapping_add(disp as u64);

    push_w(l, Width::W64, Expr::c64(ret));
    let sp = guest::read_gpr(4);
    l.redzone_hint(sp, Expr::c64(target));

    if l.chase(target) {
        l.resteer_u(target);
    } else {
        l.stop(Expr::c64(target), ExitKind::Call);
    }
    Ok(len)
}

/// Jcc rel8/rel32.
pub fn jcc_rel(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    cc: Cond,
    rel8: bool,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let (disp, len) = rel_disp(l.bytes, delta, rel8)?;
    let fall = l.next_addr(len);
    let taken = fall.wrapping_add(disp as u64);

    let backward = taken <= l.pc;
    if l.params.chasing_allowed {
        if backward && l.chase(taken) {
            // Assume taken: guard the fall-through arm, keep decoding at the
            // target.
            let guard = flags::eval_cond(l, cc.negate());
            l.block.push(Stmt::Exit {
                guard,
                target: fall,
                kind: ExitKind::Jump,
            });
            l.resteer_c(taken);
            return Ok(len);
        }
        if !backward && l.chase(fall) {
            // Assume not taken: guard the taken arm, keep decoding at the
            // fall-through.
            let guard = flags::eval_cond(l, cc);
            l.block.push(Stmt::Exit {
                guard,
                target: taken,
                kind: ExitKind::Jump,
            });
            l.resteer_c(fall);
            return Ok(len);
        }
    }

    let guard = flags::eval_cond(l, cc);
    l.block.push(Stmt::Exit {
        guard,
        target: taken,
        kind: ExitKind::Jump,
    });
    l.stop(Expr::c64(fall), ExitKind::Jump);
    Ok(len)
}

/// Group 5 CALL/JMP through a register or memory operand. No static target,
/// so the block always stops.
pub fn call_jmp_indirect(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    is_call: bool,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let am = disamode(l, delta, pfx, 0)?;
    let len = delta + am.op.len();
    let target = l.read_rm(pfx, &am.op, Width::W64);
    let target = l.t(target);

    if is_call {
        let ret = l.next_addr(len);
        push_w(l, Width::W64, Expr::c64(ret));
        let sp = guest::read_gpr(4);
        l.redzone_hint(sp, target.clone());
        l.stop(target, ExitKind::Call);
    } else {
        l.stop(target, ExitKind::Jump);
    }
    Ok(len)
}

/// RET (C3) and RET imm16 (C2): pop the return address, release the extra
/// bytes, hint, stop.
pub fn ret_near(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    with_imm: bool,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let (extra, len) = if with_imm {
        (bytes::u16_at(l.bytes, delta)? as u64, delta + 2)
    } else {
        (0, delta)
    };
    let sp = l.t(guest::read_gpr(4));
    let target = l.load(Ty::I64, sp.clone());
    let sp2 = Expr::binop(
        BinOp::Add(Width::W64),
        sp,
        Expr::c64(8 + extra),
    );
    let sp2 = l.t(sp2);
    guest::write_gpr_w(l.block, 4, Width::W64, sp2.clone());
    l.redzone_hint(sp2, target.clone());
    l.stop(target, ExitKind::Ret);
    Ok(len)
}

/// LOOP/LOOPE/LOOPNE (E0–E2) and JRCXZ (E3). These emit side exits and fall
/// through: the block keeps going.
pub fn loop_family(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    opcode: u8,
) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let disp = bytes::i8_at(l.bytes, delta)?;
    let len = delta + 1;
    let fall = l.next_addr(len);
    let target = fall.wrapping_add(disp as u64);

    // The address-size override narrows the counter to ECX.
    let w = if pfx.addr_size_override() {
        Width::W32
    } else {
        Width::W64
    };

    if opcode == 0xe3 {
        let count = guest::read_gpr_w(1, w);
        let guard = l.is_zero(w, count);
        l.block.push(Stmt::Exit {
            guard,
            target,
            kind: ExitKind::Jump,
        });
        return Ok(len);
    }

    let count = guest::read_gpr_w(1, w);
    let count = l.t(Expr::binop(BinOp::Sub(w), count, Expr::cw(w, 1)));
    l.write_reg(pfx, 1, w, count.clone());

    match opcode {
        // LOOP: branch while the counter is nonzero.
        0xe2 => {
            let guard = Expr::unop(UnOp::CmpNez(w), count);
            l.block.push(Stmt::Exit {
                guard,
                target,
                kind: ExitKind::Jump,
            });
        }
        // LOOPE/LOOPNE additionally require ZF (or its negation). Two
        // back-to-back exits keep the flag-evaluation count identical on
        // every path.
        0xe0 | 0xe1 => {
            let exhausted = l.is_zero(w, count);
            l.block.push(Stmt::Exit {
                guard: exhausted,
                target: fall,
                kind: ExitKind::Jump,
            });
            let cc = if opcode == 0xe1 { Cond::E } else { Cond::Ne };
            let guard = flags::eval_cond(l, cc);
            l.block.push(Stmt::Exit {
                guard,
                target,
                kind: ExitKind::Jump,
            });
        }
        _ => unreachable!(),
    }
    Ok(len)
}

/// INT3 / INT imm8 / INT1: record the resume address, stop with the trap
/// kind.
pub fn int_trap(
    l: &mut Lifter<'_, '_>,
    len: usize,
    vector: u8,
) -> Result<usize, DecodeError> {
    let next = l.next_addr(len);
    l.put(guest::OFF_RIP, Expr::c64(next));
    l.stop(Expr::c64(next), ExitKind::Trap { vector });
    Ok(len)
}

/// SYSCALL (0F 05): the resume address goes to the `rip` slot first; RCX and
/// R11 receive the return address and flags per the architecture.
pub fn syscall(l: &mut Lifter<'_, '_>, len: usize) -> Result<usize, DecodeError> {
    let next = l.next_addr(len);
    guest::write_gpr_w(l.block, 1, Width::W64, Expr::c64(next));
    let rf = flags::rflags_all(l);
    guest::write_gpr_w(l.block, 11, Width::W64, rf);
    l.put(guest::OFF_RIP, Expr::c64(next));
    l.stop(Expr::c64(next), ExitKind::Syscall);
    Ok(len)
}

/// The always-undefined opcodes (UD2): a *successful* decode that reports
/// the illegal-instruction kind, with the faulting address recorded.
pub fn ud2(l: &mut Lifter<'_, '_>, len: usize) -> Result<usize, DecodeError> {
    l.put(guest::OFF_RIP, Expr::c64(l.pc));
    l.stop(Expr::c64(l.pc), ExitKind::NoDecode);
    Ok(len)
}

/// PUSHF: materialize RFLAGS (status thunk + DF/ID/AC + the always-set
/// bit 1) and push it.
pub fn pushf(l: &mut Lifter<'_, '_>, delta: usize, pfx: &Prefixes) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let status = flags::rflags_all(l);
    let df = Expr::mux(
        Expr::binop(
            BinOp::CmpEq(Width::W64),
            Expr::get(guest::OFF_DFLAG, Ty::I64),
            Expr::c64(u64::MAX),
        ),
        Expr::c64(flags::RF_DF),
        Expr::c64(0),
    );
    let id = Expr::binop(
        BinOp::Shl(Width::W64),
        Expr::get(guest::OFF_IDFLAG, Ty::I64),
        Expr::c8(21),
    );
    let ac = Expr::binop(
        BinOp::Shl(Width::W64),
        Expr::get(guest::OFF_ACFLAG, Ty::I64),
        Expr::c8(18),
    );
    let word = Expr::binop(
        BinOp::Or(Width::W64),
        Expr::binop(
            BinOp::Or(Width::W64),
            Expr::binop(BinOp::Or(Width::W64), status, df),
            Expr::binop(BinOp::Or(Width::W64), id, ac),
        ),
        Expr::c64(2),
    );
    let word = l.t(word);
    let w = pfx.stack_width();
    let val = l.narrow(w, word);
    push_w(l, w, val);
    Ok(delta)
}

/// POPF: install the popped word as a Copy thunk and unpack DF/ID/AC.
pub fn popf(l: &mut Lifter<'_, '_>, delta: usize, pfx: &Prefixes) -> Result<usize, DecodeError> {
    pfx.reject_lock()?;
    let w = pfx.stack_width();
    let val = pop_w(l, w);
    let val = l.zx64(w, val);
    let val = l.t(val);
    let status = Expr::binop(
        BinOp::And(Width::W64),
        val.clone(),
        Expr::c64(flags::RF_STATUS_MASK),
    );
    let status = l.t(status);
    flags::set_rflags_copy(l, status);
    let df_set = Expr::unop(
        UnOp::CmpNez(Width::W64),
        Expr::binop(
            BinOp::And(Width::W64),
            val.clone(),
            Expr::c64(flags::RF_DF),
        ),
    );
    let dflag = Expr::mux(df_set, Expr::c64(u64::MAX), Expr::c64(1));
    l.put(guest::OFF_DFLAG, dflag);
    if w == Width::W64 {
        // The 16-bit form cannot see ID/AC; leave them alone there.
        let id = Expr::binop(
            BinOp::And(Width::W64),
            Expr::binop(BinOp::Shr(Width::W64), val.clone(), Expr::c8(21)),
            Expr::c64(1),
        );
        l.put(guest::OFF_IDFLAG, id);
        let ac = Expr::binop(
            BinOp::And(Width::W64),
            Expr::binop(BinOp::Shr(Width::W64), val, Expr::c8(18)),
            Expr::c64(1),
        );
        l.put(guest::OFF_ACFLAG, ac);
    }
    Ok(delta)
}

fn rel_disp(buf: &[u8], delta: usize, rel8: bool) -> Result<(i64, usize), DecodeError> {
    if rel8 {
        Ok((bytes::i8_at(buf, delta)?, delta + 1))
    } else {
        Ok((bytes::i32_at(buf, delta)?, delta + 4))
    }
}

/// LEAVE (C9): RSP := RBP, then pop RBP.
pub fn leave(l: &mut Lifter<'_, '_>, delta: usize, pfx: &Prefixes) -> Result<usize, DecodeError> {
    pfx.reject_lock_rep()?;
    let rbp = l.t(guest::read_gpr(5));
    guest::write_gpr_w(l.block, 4, Width::W64, rbp);
    let new_rbp = pop_w(l, Width::W64);
    guest::write_gpr_w(l.block, 5, Width::W64, new_rbp);
    Ok(delta)
}

/// The `imm_z`-sized MOV immediate forms share this helper for C6/C7.
pub fn mov_rm_imm(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    w: Width,
) -> Result<usize, DecodeError> {
    pfx.reject_lock_rep()?;
    let trailing = if w == Width::W8 {
        1
    } else if w == Width::W16 {
        2
    } else {
        4
    };
    let am = disamode(l, delta, pfx, trailing)?;
    if am.reg & 7 != 0 {
        return Err(DecodeError::Invalid);
    }
    let mut len = delta + am.op.len();
    let (imm, imm_len) = if w == Width::W8 {
        (bytes::u8_at(l.bytes, len)? as u64, 1)
    } else {
        imm_z(l.bytes, len, w)?
    };
    len += imm_len;
    l.write_rm(pfx, &am.op, w, Expr::cw(w, imm));
    Ok(len)
}
