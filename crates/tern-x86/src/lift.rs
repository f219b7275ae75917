//! The per-instruction lifter context.
//!
//! All transient decode state lives here, threaded explicitly through every
//! dispatcher call; there are no process-wide variables anywhere in the
//! crate.

use crate::decode::{LiftParams, Verdict};
use crate::guest;
use crate::modrm::RmOp;
use crate::prefix::Prefixes;
use tern_ir::{BinOp, Block, Const, ExitKind, Expr, Stmt, Ty, UnOp};
use tern_types::Width;

pub struct Lifter<'a, 'b> {
    /// Window starting at the instruction's first byte (at most 15 bytes).
    pub bytes: &'a [u8],
    /// Guest address of `bytes[0]`.
    pub pc: u64,
    pub params: &'a LiftParams<'a>,
    pub block: &'b mut Block,
    pub verdict: Verdict,
    pub kind: Option<ExitKind>,
    pub expect_cas: bool,
}

impl<'a, 'b> Lifter<'a, 'b> {
    pub fn new(
        bytes: &'a [u8],
        pc: u64,
        params: &'a LiftParams<'a>,
        block: &'b mut Block,
    ) -> Self {
        Lifter {
            bytes,
            pc,
            params,
            block,
            verdict: Verdict::Continue,
            kind: None,
            expect_cas: false,
        }
    }

    /// Name a value: emit `t = e` and use the temp from here on. Everything
    /// consumed more than once must go through this.
    pub fn t(&mut self, e: Expr) -> Expr {
        Expr::Temp(self.block.assign(e))
    }

    pub fn put(&mut self, off: u16, val: Expr) {
        self.block.push(Stmt::Put { off, val });
    }

    pub fn store(&mut self, addr: Expr, val: Expr) {
        self.block.push(Stmt::Store { addr, val });
    }

    pub fn load(&mut self, ty: Ty, addr: Expr) -> Expr {
        self.t(Expr::load(ty, addr))
    }

    /// Guest address of the instruction following this one.
    pub fn next_addr(&self, len: usize) -> u64 {
        self.pc.wrapping_add(len as u64)
    }

    // ---- Verdict plumbing ----------------------------------------------

    /// End the block: record the final transfer and stop.
    pub fn stop(&mut self, target: Expr, kind: ExitKind) {
        self.block.set_next(target, kind);
        self.verdict = Verdict::Stop;
        self.kind = Some(kind);
    }

    pub fn resteer_u(&mut self, to: u64) {
        self.verdict = Verdict::ResteerU { to };
    }

    pub fn resteer_c(&mut self, to: u64) {
        self.verdict = Verdict::ResteerC { to };
    }

    /// Should decoding statically follow a branch to `target`?
    pub fn chase(&self, target: u64) -> bool {
        self.params.chase(target)
    }

    // ---- Width-polymorphic operand access ------------------------------

    /// Resolve an 8-bit register number to (slot index, high-byte?) under
    /// the REX-presence rule.
    pub fn reg8(&self, pfx: &Prefixes, idx: u8) -> (u8, bool) {
        if !pfx.rex_present() && (4..8).contains(&idx) {
            (idx - 4, true)
        } else {
            (idx, false)
        }
    }

    /// Read a GPR operand at width `w` (register number already extended).
    pub fn read_reg(&mut self, pfx: &Prefixes, idx: u8, w: Width) -> Expr {
        if w == Width::W8 {
            let (slot, high) = self.reg8(pfx, idx);
            guest::read_reg8(slot, high)
        } else {
            guest::read_gpr_w(idx, w)
        }
    }

    pub fn write_reg(&mut self, pfx: &Prefixes, idx: u8, w: Width, val: Expr) {
        if w == Width::W8 {
            let (slot, high) = self.reg8(pfx, idx);
            guest::write_reg8(self.block, slot, high, val);
        } else {
            guest::write_gpr_w(self.block, idx, w, val);
        }
    }

    /// Read a ModRM r/m operand at width `w`.
    pub fn read_rm(&mut self, pfx: &Prefixes, rm: &RmOp, w: Width) -> Expr {
        match rm {
            RmOp::Reg(idx) => self.read_reg(pfx, *idx, w),
            RmOp::Mem { addr, .. } => self.load(Ty::from_width(w), Expr::Temp(*addr)),
        }
    }

    pub fn write_rm(&mut self, pfx: &Prefixes, rm: &RmOp, w: Width, val: Expr) {
        match rm {
            RmOp::Reg(idx) => self.write_reg(pfx, *idx, w, val),
            RmOp::Mem { addr, .. } => self.store(Expr::Temp(*addr), val),
        }
    }

    // ---- Common expression shorthand -----------------------------------

    /// Zero-extend a width-sized value to I64 for thunk slots.
    pub fn zx64(&mut self, w: Width, e: Expr) -> Expr {
        if w == Width::W64 {
            e
        } else {
            Expr::unop(
                UnOp::WidenU {
                    from: w,
                    to: Width::W64,
                },
                e,
            )
        }
    }

    /// Sign-extend a width-sized value to I64.
    pub fn sx64(&mut self, w: Width, e: Expr) -> Expr {
        if w == Width::W64 {
            e
        } else {
            Expr::unop(
                UnOp::WidenS {
                    from: w,
                    to: Width::W64,
                },
                e,
            )
        }
    }

    /// Truncate an I64 down to width `w`.
    pub fn narrow(&mut self, w: Width, e: Expr) -> Expr {
        if w == Width::W64 {
            e
        } else {
            Expr::unop(
                UnOp::Narrow {
                    from: Width::W64,
                    to: w,
                },
                e,
            )
        }
    }

    /// Truncate a width-sized value to I8 (shift-count position).
    pub fn to_i8(&mut self, w: Width, e: Expr) -> Expr {
        if w == Width::W8 {
            e
        } else {
            Expr::unop(
                UnOp::Narrow {
                    from: w,
                    to: Width::W8,
                },
                e,
            )
        }
    }

    /// `e == 0` at width `w`, as I1.
    pub fn is_zero(&mut self, w: Width, e: Expr) -> Expr {
        Expr::binop(BinOp::CmpEq(w), e, Expr::cw(w, 0))
    }

    /// Emit the advisory red-zone hint below `sp` for a transfer to `nia`.
    pub fn redzone_hint(&mut self, sp: Expr, nia: Expr) {
        let size = self.params.redzone;
        if size == 0 {
            return;
        }
        let base = Expr::binop(BinOp::Sub(Width::W64), sp, Expr::c64(size as u64));
        self.block.push(Stmt::AbiHint {
            base,
            len: size,
            nia,
        });
    }

    /// Stage a V128 value in the scratch guest slot for helper calls and
    /// return the slot offset.
    pub fn stage_v128(&mut self, val: Expr) -> u16 {
        debug_assert_eq!(self.block.ty_of(&val), Ty::V128);
        self.put(guest::OFF_VSCRATCH, val);
        guest::OFF_VSCRATCH
    }

    /// All-zero V128.
    pub fn v128_zero(&self) -> Expr {
        Expr::Const(Const::V128(0))
    }
}
