//! The statement-list accumulator the lifter appends to.

use crate::expr::Expr;
use crate::stmt::{ExitKind, Stmt};
use crate::{TempId, Ty};

/// One linear block of IR under construction.
///
/// The front end appends statements for one instruction at a time; the block
/// is finished when `next` is set (the block's final control transfer). The
/// caller owns the block exclusively for the duration of a decode call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    temps: Vec<Ty>,
    /// Final transfer: target expression and kind. `None` while the block is
    /// still open (the driver keeps decoding).
    pub next: Option<(Expr, ExitKind)>,
}

impl Block {
    #[must_use]
    pub fn new() -> Block {
        Block::default()
    }

    /// Allocate a fresh temporary of type `ty`.
    pub fn new_temp(&mut self, ty: Ty) -> TempId {
        let id = TempId(u32::try_from(self.temps.len()).expect("temp space exhausted"));
        self.temps.push(ty);
        id
    }

    #[must_use]
    pub fn temp_ty(&self, t: TempId) -> Ty {
        self.temps[t.index()]
    }

    #[must_use]
    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    /// Append `WrTemp(new_temp) = val` and return the temp, the one-step
    /// "name this value" idiom the lifter uses everywhere.
    pub fn assign(&mut self, val: Expr) -> TempId {
        let ty = self.ty_of(&val);
        let dst = self.new_temp(ty);
        self.push(Stmt::WrTemp { dst, val });
        dst
    }

    pub fn set_next(&mut self, target: Expr, kind: ExitKind) {
        debug_assert!(self.next.is_none(), "block terminated twice");
        self.next = Some((target, kind));
    }

    /// The type of an expression in this block's temp environment.
    ///
    /// Panics on an ill-typed tree; that is an internal lifter bug, not a
    /// decode failure.
    #[must_use]
    pub fn ty_of(&self, e: &Expr) -> Ty {
        match e {
            Expr::Const(c) => c.ty(),
            Expr::Temp(t) => self.temp_ty(*t),
            Expr::Get { ty, .. } => *ty,
            Expr::GetArr { desc, .. } => desc.elem,
            Expr::Load { ty, .. } => *ty,
            Expr::Unop { op, .. } => op.result_ty(),
            Expr::Binop { op, .. } => op.result_ty(),
            Expr::Triop { op, .. } => op.result_ty(),
            Expr::Mux { if_true, .. } => self.ty_of(if_true),
            Expr::CallPure { func, .. } => func.result_ty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, Const};
    use tern_types::Width;

    #[test]
    fn assign_allocates_typed_temps() {
        let mut b = Block::new();
        let t = b.assign(Expr::c64(7));
        assert_eq!(b.temp_ty(t), Ty::I64);
        assert_eq!(b.temp_count(), 1);

        let sum = b.assign(Expr::binop(
            BinOp::Add(Width::W32),
            Expr::c32(1),
            Expr::c32(2),
        ));
        assert_eq!(b.temp_ty(sum), Ty::I32);
    }

    #[test]
    fn ty_of_follows_mux_arms() {
        let mut b = Block::new();
        let e = Expr::mux(
            Expr::Const(Const::U1(true)),
            Expr::c16(1),
            Expr::c16(2),
        );
        assert_eq!(b.ty_of(&e), Ty::I16);
        let t = b.assign(e);
        assert_eq!(b.temp_ty(t), Ty::I16);
    }
}
