//! Top-level per-instruction driver.

use crate::guest;
use crate::lift::Lifter;
use crate::prefix::{self, OpcodeMap};
use crate::{hooks, insn, DecodeError, MAX_INST_LEN};
use bitflags::bitflags;
use tern_ir::{Block, ExitKind, Expr, Stmt};

bitflags! {
    /// Optional instruction-set extensions the embedding reports as present.
    /// Opcodes gated on an absent extension fail to decode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IsaExt: u32 {
        const SSE3 = 1 << 0;
        const SSSE3 = 1 << 1;
        const SSE41 = 1 << 2;
        const SSE42 = 1 << 3;
        const POPCNT = 1 << 4;
        const AES = 1 << 5;
        const PCLMUL = 1 << 6;
        const AVX = 1 << 7;
        const AVX2 = 1 << 8;
        const BMI1 = 1 << 9;
        const BMI2 = 1 << 10;
        const LZCNT = 1 << 11;
        const MOVBE = 1 << 12;
        const RDTSCP = 1 << 13;
        const CX16 = 1 << 14;
    }
}

impl IsaExt {
    /// A plain SSE2-era machine.
    #[must_use]
    pub fn baseline() -> IsaExt {
        IsaExt::empty()
    }
}

/// Host/guest facts and policy knobs for one decode call.
pub struct LiftParams<'a> {
    pub isa: IsaExt,
    /// Bytes below the stack pointer the ABI guarantees untouched; used for
    /// the advisory red-zone hints on call/ret.
    pub redzone: u32,
    /// Whether FS/GS segment overrides may be lowered to constant-base adds
    /// from the corresponding guest slots.
    pub fs_base_const: bool,
    pub gs_base_const: bool,
    /// Master switch for static branch chasing (resteering).
    pub chasing_allowed: bool,
    /// Per-target chase policy, consulted only when chasing is allowed.
    pub chase_ok: Option<&'a dyn Fn(u64) -> bool>,
    /// Echo per-instruction diagnostics through `tracing`.
    pub verbose: bool,
}

impl Default for LiftParams<'_> {
    fn default() -> Self {
        LiftParams {
            isa: IsaExt::all(),
            redzone: 128,
            fs_base_const: true,
            gs_base_const: false,
            chasing_allowed: false,
            chase_ok: None,
            verbose: false,
        }
    }
}

impl LiftParams<'_> {
    pub(crate) fn chase(&self, target: u64) -> bool {
        self.chasing_allowed && self.chase_ok.map_or(false, |f| f(target))
    }
}

/// Block-continuation verdict for the calling block builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Fall through to the next instruction.
    Continue,
    /// An unconditional branch was followed statically; continue decoding at
    /// `to` within the same block.
    ResteerU { to: u64 },
    /// A conditional branch was assumed; continue decoding at `to`, with the
    /// other arm covered by an emitted side exit.
    ResteerC { to: u64 },
    /// The block ends at this instruction.
    Stop,
}

/// Result of decoding one instruction. `len == 0` signals total failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub len: usize,
    pub verdict: Verdict,
    /// Control-transfer kind when stopping.
    pub kind: Option<ExitKind>,
    /// The statically known transfer target, when there is one.
    pub target: Option<u64>,
    /// Driver self-check: a compare-and-swap was emitted and the caller
    /// should expect one in the statement stream.
    pub expect_cas: bool,
}

/// Decode and lift exactly one instruction.
///
/// `bytes` is a read-only window starting at the instruction's first byte;
/// `pc` is the guest address of that byte. Statements are appended to
/// `block`. On failure the uniform no-decode outcome is produced and the
/// faulting address is written to the guest `rip` slot; this function never
/// panics on input bytes.
pub fn decode_one(
    bytes: &[u8],
    pc: u64,
    params: &LiftParams<'_>,
    block: &mut Block,
) -> Outcome {
    // The window is not pre-truncated: the host-hook signatures are longer
    // than the 15-byte instruction limit, and ordinary decodes are capped
    // below instead.
    let imark_at = block.stmts.len();

    let mut lifter = Lifter::new(bytes, pc, params, block);
    match lift_instr(&mut lifter) {
        Ok(len) => {
            debug_assert!(len > 0);
            let verdict = lifter.verdict;
            let kind = lifter.kind;
            let expect_cas = lifter.expect_cas;
            block.stmts.insert(
                imark_at,
                Stmt::IMark {
                    addr: pc,
                    len: len as u8,
                },
            );
            if params.verbose {
                tracing::trace!(pc, len, "lifted instruction");
            }
            let target = match &block.next {
                Some((expr, _)) => expr.const_value(),
                None => None,
            };
            Outcome {
                len,
                verdict,
                kind,
                target,
                expect_cas,
            }
        }
        Err(e) => {
            if let DecodeError::Unimplemented(what) = e {
                tracing::warn!(pc, what, "instruction recognized but not implemented");
            }
            // Partially emitted statements are deliberately left in place:
            // the embedding abandons the whole block and re-enters at `pc`
            // through its fault path, so they are never executed.
            block.push(Stmt::Put {
                off: guest::OFF_RIP,
                val: Expr::c64(pc),
            });
            if block.next.is_none() {
                block.set_next(Expr::c64(pc), ExitKind::NoDecode);
            }
            Outcome {
                len: 0,
                verdict: Verdict::Stop,
                kind: Some(ExitKind::NoDecode),
                target: Some(pc),
                expect_cas: false,
            }
        }
    }
}

fn lift_instr(l: &mut Lifter<'_, '_>) -> Result<usize, DecodeError> {
    // Host-hook signatures bypass the ordinary scanner entirely (and are
    // exempt from the 15-byte limit: they are multi-instruction sequences).
    if let Some(len) = hooks::try_lift(l)? {
        return Ok(len);
    }

    let (pfx, map, delta) = prefix::scan(l.bytes)?;
    let len = match (map, pfx.vex.is_some()) {
        (OpcodeMap::Primary, false) => insn::one_byte::dispatch(l, delta, &pfx),
        (OpcodeMap::Primary, true) => unreachable!("VEX always selects an escape map"),
        (OpcodeMap::Map0F, false) => insn::two_byte::dispatch(l, delta, &pfx),
        (OpcodeMap::Map0F38, false) => insn::three_byte::dispatch_38(l, delta, &pfx),
        (OpcodeMap::Map0F3A, false) => insn::three_byte::dispatch_3a(l, delta, &pfx),
        (OpcodeMap::Map0F, true) => insn::vex::dispatch_0f(l, delta, &pfx),
        (OpcodeMap::Map0F38, true) => insn::vex::dispatch_0f38(l, delta, &pfx),
        (OpcodeMap::Map0F3A, true) => insn::vex::dispatch_0f3a(l, delta, &pfx),
    }?;

    if len <= delta || len > MAX_INST_LEN {
        // A dispatcher that made no forward progress is treated as failure.
        return Err(DecodeError::Invalid);
    }
    Ok(len)
}
