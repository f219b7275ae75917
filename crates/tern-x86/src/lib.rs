//! x86-64 machine-code decoder and IR lifter.
//!
//! [`decode_one`] reads one instruction from a byte window, appends its
//! semantics to a [`tern_ir::Block`], and reports how many bytes it consumed
//! together with a continuation verdict for the caller's block-building loop.
//! The decoder holds no process-wide state: everything lives in the per-call
//! [`lift::Lifter`], so independent callers may decode concurrently.
//!
//! Decode failure is a *result*, never a panic: undecodable bytes produce a
//! zero-length [`Outcome`] carrying [`tern_ir::ExitKind::NoDecode`], after the
//! faulting address has been written to the guest `rip` slot so the embedding
//! can synthesize a precise illegal-instruction trap.

pub mod bytes;
pub mod decode;
pub mod flags;
pub mod guest;
pub mod hooks;
pub mod insn;
pub mod lift;
pub mod modrm;
pub mod prefix;

pub use decode::{decode_one, IsaExt, LiftParams, Outcome, Verdict};
pub use prefix::{OpcodeMap, Prefixes};

use thiserror::Error;

/// Maximum x86 instruction length (architectural limit).
pub const MAX_INST_LEN: usize = 15;

/// Internal decode error. Dispatchers propagate this with `?`; the top-level
/// driver converts every variant into the uniform failure outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The byte window ended before the instruction was complete.
    #[error("unexpected end of instruction bytes")]
    UnexpectedEof,
    /// The bytes do not encode any instruction in the active prefix/map
    /// context, or encode one that is architecturally invalid.
    #[error("invalid instruction")]
    Invalid,
    /// Recognized but deliberately not carried (known gap, not bad input).
    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),
}
