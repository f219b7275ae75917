//! Host-runtime control hooks.
//!
//! A fixed 16-byte preamble (four `rol $imm, %rdi` encodings whose rotate
//! amounts 3, 13, 61, 51 compose to a no-op) acts as a signature no
//! compiler emits naturally, followed by one 3-byte selector choosing the
//! hook. The byte patterns are a wire contract with the embedding and must
//! match exactly. A preamble without a recognized selector is not an error:
//! the bytes are real instructions and decode normally.

use crate::decode::Verdict;
use crate::guest;
use crate::lift::Lifter;
use crate::DecodeError;
use tern_ir::{ExitKind, Expr, Ty};
use tern_types::Width;

/// `rol $3, %rdi ; rol $13, %rdi ; rol $61, %rdi ; rol $51, %rdi`
pub const PREAMBLE: [u8; 16] = [
    0x48, 0xc1, 0xc7, 0x03, //
    0x48, 0xc1, 0xc7, 0x0d, //
    0x48, 0xc1, 0xc7, 0x3d, //
    0x48, 0xc1, 0xc7, 0x33,
];

/// `xchg %rbx, %rbx`: pass control to the host runtime (request code and
/// result travel in the designated registers).
pub const SEL_HOST_CALL: [u8; 3] = [0x48, 0x87, 0xdb];
/// `xchg %rcx, %rcx`: load the host-runtime address slot into RAX.
pub const SEL_LOAD_NRADDR: [u8; 3] = [0x48, 0x87, 0xc9];
/// `xchg %rdx, %rdx`: call through RAX without redirection interception.
pub const SEL_CALL_NOREDIR: [u8; 3] = [0x48, 0x87, 0xd2];
/// `xchg %rsi, %rsi`: inject a host-defined diagnostic no-op IR block.
pub const SEL_IR_NOP: [u8; 3] = [0x48, 0x87, 0xf6];

pub const HOOK_LEN: usize = PREAMBLE.len() + 3;

/// Recognize and lift a hook sequence at the start of the window.
/// Returns `Ok(None)` when no hook is present.
pub fn try_lift(l: &mut Lifter<'_, '_>) -> Result<Option<usize>, DecodeError> {
    if l.bytes.len() < HOOK_LEN || l.bytes[..16] != PREAMBLE {
        return Ok(None);
    }
    let sel: [u8; 3] = [l.bytes[16], l.bytes[17], l.bytes[18]];
    let next = l.next_addr(HOOK_LEN);

    if sel == SEL_HOST_CALL {
        // The embedding services the request and resumes at `next`.
        l.put(guest::OFF_RIP, Expr::c64(next));
        l.stop(Expr::c64(next), ExitKind::HostHook);
        return Ok(Some(HOOK_LEN));
    }
    if sel == SEL_LOAD_NRADDR {
        let val = Expr::get(guest::OFF_NRADDR, Ty::I64);
        guest::write_gpr_w(l.block, 0, Width::W64, val);
        return Ok(Some(HOOK_LEN));
    }
    if sel == SEL_CALL_NOREDIR {
        // Call through RAX, bypassing any host-side redirection tables:
        // push the return address and leave with the hook kind so the
        // embedding dispatches the target unredirected.
        let ret = Expr::c64(next);
        let sp = l.t(Expr::binop(
            tern_ir::BinOp::Sub(Width::W64),
            guest::read_gpr(4),
            Expr::c64(8),
        ));
        guest::write_gpr_w(l.block, 4, Width::W64, sp.clone());
        l.store(sp.clone(), ret);
        l.redzone_hint(sp, Expr::c64(next));
        let target = l.t(guest::read_gpr(0));
        l.stop(target, ExitKind::HostHook);
        return Ok(Some(HOOK_LEN));
    }
    if sel == SEL_IR_NOP {
        // Deliberately empty: the mark itself is the diagnostic.
        debug_assert_eq!(l.verdict, Verdict::Continue);
        return Ok(Some(HOOK_LEN));
    }

    Ok(None)
}
