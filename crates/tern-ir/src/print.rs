//! Text rendering of blocks, statements and expressions.
//!
//! Output is for humans and tests; it is not a stable format.

use crate::expr::{Const, Expr};
use crate::helper::MemEffect;
use crate::stmt::{ExitKind, Stmt};
use crate::Block;
use core::fmt;

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::U1(b) => write!(f, "{}:i1", *b as u8),
            Const::U8(v) => write!(f, "0x{v:x}:i8"),
            Const::U16(v) => write!(f, "0x{v:x}:i16"),
            Const::U32(v) => write!(f, "0x{v:x}:i32"),
            Const::U64(v) => write!(f, "0x{v:x}:i64"),
            Const::V128(v) => write!(f, "0x{v:04x}:v128"),
            Const::V256(v) => write!(f, "0x{v:08x}:v256"),
            Const::F32Bits(v) => write!(f, "f32:0x{v:08x}"),
            Const::F64Bits(v) => write!(f, "f64:0x{v:016x}"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Temp(t) => write!(f, "{t}"),
            Expr::Get { off, ty } => write!(f, "get:{ty}(g{off})"),
            Expr::GetArr { desc, ix } => {
                write!(f, "getarr:{}(g{}[{ix}%{}])", desc.elem, desc.base, desc.nelem)
            }
            Expr::Load { ty, addr } => write!(f, "ld:{ty}[{addr}]"),
            Expr::Unop { op, src } => write!(f, "{op:?}({src})"),
            Expr::Binop { op, lhs, rhs } => write!(f, "{op:?}({lhs},{rhs})"),
            Expr::Triop { op, a, b, c } => write!(f, "{op:?}({a},{b},{c})"),
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => write!(f, "mux({cond},{if_true},{if_false})"),
            Expr::CallPure { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Jump => f.write_str("jump"),
            ExitKind::Call => f.write_str("call"),
            ExitKind::Ret => f.write_str("ret"),
            ExitKind::Syscall => f.write_str("syscall"),
            ExitKind::Trap { vector } => write!(f, "trap#{vector}"),
            ExitKind::NoDecode => f.write_str("nodecode"),
            ExitKind::Yield => f.write_str("yield"),
            ExitKind::FlushICache => f.write_str("flush-icache"),
            ExitKind::HostHook => f.write_str("host-hook"),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::IMark { addr, len } => write!(f, "---- imark 0x{addr:x},{len}"),
            Stmt::WrTemp { dst, val } => write!(f, "{dst} = {val}"),
            Stmt::Put { off, val } => write!(f, "put(g{off}) = {val}"),
            Stmt::PutArr { desc, ix, val } => {
                write!(f, "putarr(g{}[{ix}%{}]) = {val}", desc.base, desc.nelem)
            }
            Stmt::Store { addr, val } => write!(f, "st[{addr}] = {val}"),
            Stmt::Cas {
                addr,
                expected,
                new,
                old,
            } => write!(f, "{old} = cas[{addr}] {expected} -> {new}"),
            Stmt::DirtyCall {
                func,
                args,
                dst,
                effects,
            } => {
                if let Some(dst) = dst {
                    write!(f, "{dst} = ")?;
                }
                write!(f, "dirty {func}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")?;
                for r in &effects.reads {
                    write!(f, " R[g{}+{}]", r.off, r.len)?;
                }
                for w in &effects.writes {
                    write!(f, " W[g{}+{}]", w.off, w.len)?;
                }
                match &effects.mem {
                    MemEffect::None => {}
                    MemEffect::Read { addr, len } => write!(f, " Rm[{addr}+{len}]")?,
                    MemEffect::Write { addr, len } => write!(f, " Wm[{addr}+{len}]")?,
                }
                Ok(())
            }
            Stmt::Exit {
                guard,
                target,
                kind,
            } => write!(f, "if ({guard}) exit-{kind} 0x{target:x}"),
            Stmt::AbiHint { base, len, nia } => {
                write!(f, "abihint [{base}+{len}] nia={nia}")
            }
            Stmt::Fence => f.write_str("fence"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.stmts {
            writeln!(f, "  {s}")?;
        }
        match &self.next {
            Some((target, kind)) => writeln!(f, "  next: {target} ({kind})"),
            None => writeln!(f, "  next: <open>"),
        }
    }
}
