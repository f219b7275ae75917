//! Statement nodes and block-exit kinds.

use crate::expr::Expr;
use crate::helper::{EffHelper, Effects};
use crate::TempId;

/// Why a block (or a guarded side path out of it) transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Ordinary jump, including resteer-failure retries and fall-throughs.
    Jump,
    Call,
    Ret,
    /// SYSCALL entry; the resume address has been written to the `rip` slot.
    Syscall,
    /// Software interrupt / trap (INT n, INT3, INT1). The vector is the
    /// guest interrupt number.
    Trap { vector: u8 },
    /// The bytes at the exit target do not decode; the embedding synthesizes
    /// an illegal-instruction fault there.
    NoDecode,
    /// PAUSE-style scheduling hint.
    Yield,
    /// Self-modifying-code flush hint; the flushed range is in the
    /// `cmstart`/`cmlen` guest slots.
    FlushICache,
    /// Host-runtime control hook (magic byte sequence).
    HostHook,
}

/// One side-effecting step. Statements execute in order within a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Instruction boundary marker: the guest address and byte length of the
    /// instruction whose statements follow. Informational (disassembly,
    /// precise fault attribution); no semantic effect.
    IMark { addr: u64, len: u8 },
    /// Write a temporary (SSA within the block: each temp written once).
    WrTemp { dst: TempId, val: Expr },
    /// Write guest state at a byte offset.
    Put { off: u16, val: Expr },
    /// Write a guest-state array element at a runtime index (I64).
    PutArr {
        desc: crate::expr::ArrDesc,
        ix: Expr,
        val: Expr,
    },
    /// Little-endian store.
    Store { addr: Expr, val: Expr },
    /// Atomic compare-and-swap: load `addr`, compare with `expected`;
    /// if equal store `new`. `old` always receives the loaded value.
    Cas {
        addr: Expr,
        expected: Expr,
        new: Expr,
        old: TempId,
    },
    /// Call an effectful external helper; `dst` receives its I64 result when
    /// the helper produces one. `effects` must name every guest range and
    /// memory region the helper touches.
    DirtyCall {
        func: EffHelper,
        args: Vec<Expr>,
        dst: Option<TempId>,
        effects: Effects,
    },
    /// Guarded side exit: if `guard` (I1) holds, leave the block for the
    /// constant `target` with the given kind. Execution otherwise falls
    /// through to the next statement.
    Exit {
        guard: Expr,
        target: u64,
        kind: ExitKind,
    },
    /// Advisory hint: the `len` bytes at `base` are about to be written by
    /// the callee (red zone / freshly pushed frame); `nia` is the
    /// next-instruction address. No semantic effect.
    AbiHint { base: Expr, len: u32, nia: Expr },
    /// Memory fence (MFENCE/LFENCE/SFENCE and locked-op ordering).
    Fence,
}
