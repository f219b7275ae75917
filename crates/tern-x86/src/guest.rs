//! Guest-state layout and register accessors.
//!
//! The guest CPU state is an external structure the lifter addresses purely
//! by byte offset. The offsets here are the wire contract with the embedding;
//! the `const` assertions at the bottom keep the table internally consistent.
//!
//! Partial-register write rules (architectural, load-bearing):
//! - writing a 32-bit view zero-extends into the full 64-bit register;
//! - writing an 8- or 16-bit view leaves the remaining bytes untouched;
//! - the legacy high-byte registers (AH/CH/DH/BH) live at sub-offset 1 of
//!   RAX/RCX/RDX/RBX and are only encodable when no REX prefix is present.

use tern_ir::{ArrDesc, Block, Const, Expr, Stmt, Ty, UnOp};
use tern_types::Width;

// Flags thunk (see `flags.rs` for the encoding of `cc_op`).
pub const OFF_CC_OP: u16 = 0;
pub const OFF_CC_DEP1: u16 = 8;
pub const OFF_CC_DEP2: u16 = 16;
pub const OFF_CC_NDEP: u16 = 24;
/// Direction flag, stored as +1 / -1.
pub const OFF_DFLAG: u16 = 32;
pub const OFF_RIP: u16 = 40;
pub const OFF_GPR0: u16 = 48;
pub const OFF_FS_BASE: u16 = 176;
pub const OFF_GS_BASE: u16 = 184;
/// ID flag (CPUID toggle) as 0/1.
pub const OFF_IDFLAG: u16 = 192;
/// Alignment-check flag as 0/1.
pub const OFF_ACFLAG: u16 = 200;
/// SSE rounding mode, low two bits of MXCSR.RC.
pub const OFF_SSEROUND: u16 = 208;
/// x87 rounding mode, low two bits of FPCW.RC.
pub const OFF_FPROUND: u16 = 216;
pub const OFF_YMM0: u16 = 224;
/// Staging slot for vector helper calls with memory operands.
pub const OFF_VSCRATCH: u16 = 736;
/// x87 top-of-stack pointer, 0..7.
pub const OFF_FTOP: u16 = 768;
pub const OFF_FPREG0: u16 = 776;
/// Tag array: 0 = empty, 1 = valid.
pub const OFF_FPTAG0: u16 = 840;
/// x87 C3..C0 condition bits, in their FSW positions.
pub const OFF_FC3210: u16 = 848;
/// Emulation-note slot (downstream diagnostic channel).
pub const OFF_EMNOTE: u16 = 856;
/// Self-modifying-code flush range for `ExitKind::FlushICache`.
pub const OFF_CMSTART: u16 = 864;
pub const OFF_CMLEN: u16 = 872;
/// Host-hook address slot.
pub const OFF_NRADDR: u16 = 880;
pub const GUEST_SIZE: u16 = 888;

/// The architecturally-defined "indefinite" QNaN an empty x87 slot yields.
pub const X87_INDEFINITE_BITS: u64 = 0xFFF8_0000_0000_0000;

#[must_use]
pub fn gpr_off(idx: u8) -> u16 {
    assert!(idx < 16, "gpr index {idx}");
    OFF_GPR0 + 8 * idx as u16
}

#[must_use]
pub fn ymm_off(idx: u8) -> u16 {
    assert!(idx < 16, "vector register index {idx}");
    OFF_YMM0 + 32 * idx as u16
}

/// Offset of the upper 128-bit lane of a YMM register.
#[must_use]
pub fn ymm_hi_off(idx: u8) -> u16 {
    ymm_off(idx) + 16
}

/// Offset of one 64-bit lane of a vector register (lane < 4).
#[must_use]
pub fn ymm_lane64_off(idx: u8, lane: u8) -> u16 {
    assert!(lane < 4, "ymm 64-bit lane {lane}");
    ymm_off(idx) + 8 * lane as u16
}

/// Offset of the high-byte alias (AH/CH/DH/BH) of GPR `idx`.
///
/// Only RAX/RCX/RDX/RBX have such an alias, and only in REX-less encodings;
/// asking for any other register is a bug in the calling dispatcher.
#[must_use]
pub fn high8_off(idx: u8) -> u16 {
    assert!(idx < 4, "high-byte alias of gpr {idx} does not exist");
    gpr_off(idx) + 1
}

#[must_use]
pub fn fpreg_arr() -> ArrDesc {
    ArrDesc {
        base: OFF_FPREG0,
        elem: Ty::I64,
        nelem: 8,
    }
}

#[must_use]
pub fn fptag_arr() -> ArrDesc {
    ArrDesc {
        base: OFF_FPTAG0,
        elem: Ty::I8,
        nelem: 8,
    }
}

/// Full 64-bit GPR read.
#[must_use]
pub fn read_gpr(idx: u8) -> Expr {
    Expr::get(gpr_off(idx), Ty::I64)
}

/// Width-sized GPR read (low bits).
#[must_use]
pub fn read_gpr_w(idx: u8, w: Width) -> Expr {
    match w {
        Width::W64 => read_gpr(idx),
        Width::W8 => Expr::get(gpr_off(idx), Ty::I8),
        Width::W16 => Expr::get(gpr_off(idx), Ty::I16),
        Width::W32 => Expr::get(gpr_off(idx), Ty::I32),
    }
}

/// 8-bit register read; `high` selects the AH-class alias.
#[must_use]
pub fn read_reg8(idx: u8, high: bool) -> Expr {
    if high {
        Expr::get(high8_off(idx), Ty::I8)
    } else {
        Expr::get(gpr_off(idx), Ty::I8)
    }
}

/// Width-sized GPR write with the architectural merge/zero-extend rules.
pub fn write_gpr_w(block: &mut Block, idx: u8, w: Width, val: Expr) {
    debug_assert_eq!(block.ty_of(&val), Ty::from_width(w), "gpr write width");
    match w {
        Width::W64 => block.push(Stmt::Put {
            off: gpr_off(idx),
            val,
        }),
        Width::W32 => {
            // 32-bit writes zero-extend; store the full 64-bit value.
            let wide = Expr::unop(
                UnOp::WidenU {
                    from: Width::W32,
                    to: Width::W64,
                },
                val,
            );
            block.push(Stmt::Put {
                off: gpr_off(idx),
                val: wide,
            });
        }
        // 8/16-bit writes touch only their own bytes of the slot.
        Width::W16 | Width::W8 => block.push(Stmt::Put {
            off: gpr_off(idx),
            val,
        }),
    }
}

/// 8-bit register write; `high` selects the AH-class alias.
pub fn write_reg8(block: &mut Block, idx: u8, high: bool, val: Expr) {
    debug_assert_eq!(block.ty_of(&val), Ty::I8, "reg8 write type");
    let off = if high { high8_off(idx) } else { gpr_off(idx) };
    block.push(Stmt::Put { off, val });
}

#[must_use]
pub fn read_xmm(idx: u8) -> Expr {
    Expr::get(ymm_off(idx), Ty::V128)
}

#[must_use]
pub fn read_ymm(idx: u8) -> Expr {
    Expr::get(ymm_off(idx), Ty::V256)
}

/// One 64-bit lane of an XMM register.
#[must_use]
pub fn read_xmm_lane64(idx: u8, lane: u8) -> Expr {
    Expr::get(ymm_lane64_off(idx, lane), Ty::I64)
}

/// Legacy (non-VEX) 128-bit write: the upper YMM lane is left untouched.
pub fn write_xmm_legacy(block: &mut Block, idx: u8, val: Expr) {
    debug_assert_eq!(block.ty_of(&val), Ty::V128);
    block.push(Stmt::Put {
        off: ymm_off(idx),
        val,
    });
}

/// VEX 128-bit write: the upper YMM lane is zeroed.
pub fn write_xmm_zeroing(block: &mut Block, idx: u8, val: Expr) {
    debug_assert_eq!(block.ty_of(&val), Ty::V128);
    block.push(Stmt::Put {
        off: ymm_off(idx),
        val,
    });
    block.push(Stmt::Put {
        off: ymm_hi_off(idx),
        val: Expr::Const(Const::V128(0)),
    });
}

pub fn write_ymm(block: &mut Block, idx: u8, val: Expr) {
    debug_assert_eq!(block.ty_of(&val), Ty::V256);
    block.push(Stmt::Put {
        off: ymm_off(idx),
        val,
    });
}

/// One 64-bit lane write into an XMM register (other lanes untouched).
pub fn write_xmm_lane64(block: &mut Block, idx: u8, lane: u8, val: Expr) {
    debug_assert_eq!(block.ty_of(&val), Ty::I64);
    block.push(Stmt::Put {
        off: ymm_lane64_off(idx, lane),
        val,
    });
}

const _: () = {
    // GPR file is contiguous and 8-byte stepped.
    assert!(OFF_FS_BASE == OFF_GPR0 + 16 * 8);
    // Vector file is 32-byte aligned and contiguous.
    assert!(OFF_YMM0 % 32 == 0);
    assert!(OFF_VSCRATCH == OFF_YMM0 + 16 * 32);
    // x87 data and tag arrays hold eight entries each.
    assert!(OFF_FPTAG0 == OFF_FPREG0 + 8 * 8);
    assert!(OFF_FC3210 == OFF_FPTAG0 + 8);
    // Thunk slots are the first four quadwords, in evaluator-argument order.
    assert!(OFF_CC_OP == 0 && OFF_CC_DEP1 == 8 && OFF_CC_DEP2 == 16 && OFF_CC_NDEP == 24);
    assert!(GUEST_SIZE == OFF_NRADDR + 8);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_writes_follow_merge_rules() {
        let mut b = Block::new();
        // 32-bit write becomes a full-width zero-extended Put.
        write_gpr_w(&mut b, 0, Width::W32, Expr::c32(0x1234));
        match &b.stmts[0] {
            Stmt::Put { off, val } => {
                assert_eq!(*off, gpr_off(0));
                assert_eq!(b.ty_of(val), Ty::I64);
            }
            other => panic!("unexpected stmt {other:?}"),
        }

        // 16-bit write stays narrow (merge-preserving).
        write_gpr_w(&mut b, 3, Width::W16, Expr::c16(0xbeef));
        match &b.stmts[1] {
            Stmt::Put { off, val } => {
                assert_eq!(*off, gpr_off(3));
                assert_eq!(b.ty_of(val), Ty::I16);
            }
            other => panic!("unexpected stmt {other:?}"),
        }
    }

    #[test]
    fn high_byte_alias_offsets() {
        assert_eq!(high8_off(0), gpr_off(0) + 1);
        assert_eq!(high8_off(3), gpr_off(3) + 1);
    }

    #[test]
    #[should_panic(expected = "high-byte alias")]
    fn high_byte_alias_of_rsp_is_a_bug() {
        let _ = high8_off(4);
    }

    #[test]
    fn vex_write_zeroes_upper_lane() {
        let mut b = Block::new();
        write_xmm_zeroing(&mut b, 2, Expr::Const(Const::V128(0xffff)));
        assert_eq!(b.stmts.len(), 2);
        match &b.stmts[1] {
            Stmt::Put { off, val } => {
                assert_eq!(*off, ymm_hi_off(2));
                assert_eq!(*val, Expr::Const(Const::V128(0)));
            }
            other => panic!("unexpected stmt {other:?}"),
        }
    }
}
