//! Per-opcode-map instruction dispatchers.
//!
//! `one_byte`/`two_byte`/`three_byte` are the legacy-prefix entry points for
//! the primary, 0F, 0F38 and 0F3A maps; `vex` holds the VEX-prefixed
//! variants of the same opcode spaces. The regular integer encodings go
//! through the generic handlers in `arith`/`ctrl`; the irregular spaces
//! (strings, x87, the helper-routed vector ops) keep explicit arms.

pub mod arith;
pub mod ctrl;
pub mod one_byte;
pub mod sse;
pub mod string;
pub mod three_byte;
pub mod two_byte;
pub mod vex;
pub mod x87;

use crate::{bytes, DecodeError};
use tern_types::Width;

/// Read a z-immediate (16 bits under the 66 prefix, else 32 bits
/// sign-extended to the operand width). Returns the value truncated to `w`
/// and the byte count consumed.
pub(crate) fn imm_z(buf: &[u8], off: usize, w: Width) -> Result<(u64, usize), DecodeError> {
    if w == Width::W16 {
        Ok((bytes::u16_at(buf, off)? as u64, 2))
    } else {
        let v = bytes::i32_at(buf, off)?;
        Ok((w.truncate(v as u64), 4))
    }
}

/// Read a full-width immediate (the B8+r MOV family: 2/4/8 bytes).
pub(crate) fn imm_v(buf: &[u8], off: usize, w: Width) -> Result<(u64, usize), DecodeError> {
    let len = w.bytes();
    Ok((bytes::uint_at(buf, off, len)?, len))
}

/// Read an 8-bit immediate sign-extended to `w`.
pub(crate) fn imm_b_sx(buf: &[u8], off: usize, w: Width) -> Result<(u64, usize), DecodeError> {
    let v = bytes::i8_at(buf, off)?;
    Ok((w.truncate(v as u64), 1))
}
