//! ModRM/SIB/displacement decoding.
//!
//! Three variants share one decomposition:
//! - [`disamode`] builds the effective-address expression;
//! - [`disamode_len`] computes only the byte length, and must agree with
//!   [`disamode`] for every encoding;
//! - [`disavsib`] is the vector-indexed (gather) form.
//!
//! RIP-relative addressing needs the address of the *next* instruction, so
//! callers with trailing immediate bytes must declare how many remain after
//! the addressing form (`trailing`).

use crate::lift::Lifter;
use crate::prefix::Prefixes;
use crate::{bytes, guest, DecodeError};
use tern_ir::{BinOp, Expr, TempId, Ty, UnOp};
use tern_types::{Seg, Width};

/// A decoded r/m operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmOp {
    /// Register-direct; number already folded with the REX/VEX B extension.
    Reg(u8),
    /// Memory; `addr` is the computed effective address, `len` the number of
    /// bytes the addressing form occupied (ModRM + SIB + displacement).
    Mem { addr: TempId, len: usize },
}

impl RmOp {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RmOp::Reg(_) => 1,
            RmOp::Mem { len, .. } => *len,
        }
    }

    #[must_use]
    pub fn is_mem(&self) -> bool {
        matches!(self, RmOp::Mem { .. })
    }
}

/// The raw mod/reg/rm decomposition with extension bits folded in.
#[derive(Debug, Clone, Copy)]
pub struct ModRm {
    pub mod_: u8,
    pub reg: u8,
    pub rm: u8,
}

pub fn parse_modrm(byte: u8, pfx: &Prefixes) -> ModRm {
    ModRm {
        mod_: byte >> 6,
        reg: ((byte >> 3) & 7) | if pfx.rex_r() { 8 } else { 0 },
        rm: (byte & 7) | if pfx.rex_b() { 8 } else { 0 },
    }
}

struct SibParts {
    scale: u8,
    /// `None` = no index register (encoding 100 with no X extension).
    index: Option<u8>,
    /// `None` = no base register (encoding 101 under mod 00).
    base: Option<u8>,
}

fn parse_sib(byte: u8, mod_: u8, pfx: &Prefixes) -> SibParts {
    let scale = 1u8 << (byte >> 6);
    let index_code = ((byte >> 3) & 7) | if pfx.rex_x() { 8 } else { 0 };
    let base_code = (byte & 7) | if pfx.rex_b() { 8 } else { 0 };
    SibParts {
        scale,
        index: if index_code == 4 { None } else { Some(index_code) },
        base: if (base_code & 7) == 5 && mod_ == 0 {
            None
        } else {
            Some(base_code)
        },
    }
}

/// Apply segment-override and address-size adjustments to a raw address.
pub(crate) fn adjust_addr(
    l: &mut Lifter<'_, '_>,
    pfx: &Prefixes,
    addr: Expr,
) -> Result<Expr, DecodeError> {
    let addr = match pfx.segment()? {
        None => addr,
        Some(Seg::Fs) if l.params.fs_base_const => Expr::binop(
            BinOp::Add(Width::W64),
            Expr::get(guest::OFF_FS_BASE, Ty::I64),
            addr,
        ),
        Some(Seg::Gs) if l.params.gs_base_const => Expr::binop(
            BinOp::Add(Width::W64),
            Expr::get(guest::OFF_GS_BASE, Ty::I64),
            addr,
        ),
        Some(_) => return Err(DecodeError::Unimplemented("segment override")),
    };
    if pfx.addr_size_override() {
        let low = Expr::unop(
            UnOp::Narrow {
                from: Width::W64,
                to: Width::W32,
            },
            addr,
        );
        Ok(Expr::unop(
            UnOp::WidenU {
                from: Width::W32,
                to: Width::W64,
            },
            low,
        ))
    } else {
        Ok(addr)
    }
}

fn add_opt(sum: Option<Expr>, term: Expr) -> Expr {
    match sum {
        None => term,
        Some(s) => Expr::binop(BinOp::Add(Width::W64), s, term),
    }
}

/// A fully decoded ModRM operand position: the r/m operand, the (extended)
/// reg field, and a disassembly fragment (informational only).
pub struct Amode {
    pub op: RmOp,
    pub reg: u8,
    pub dis: String,
}

/// Decode the addressing form at `delta` and build its address expression.
///
/// `trailing` is the count of immediate bytes that will follow the
/// addressing form (needed only for RIP-relative resolution).
pub fn disamode(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    trailing: usize,
) -> Result<Amode, DecodeError> {
    disamode_inner(l, delta, pfx, trailing, true)
}

/// LEA variant: the address is computed but never used to access memory, so
/// segment overrides are ignored rather than applied or rejected.
pub fn disamode_lea(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    trailing: usize,
) -> Result<Amode, DecodeError> {
    disamode_inner(l, delta, pfx, trailing, false)
}

fn disamode_inner(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    trailing: usize,
    apply_segment: bool,
) -> Result<Amode, DecodeError> {
    let modrm_byte = bytes::u8_at(l.bytes, delta)?;
    let m = parse_modrm(modrm_byte, pfx);

    if m.mod_ == 3 {
        return Ok(Amode {
            op: RmOp::Reg(m.rm),
            reg: m.reg,
            dis: format!("%r{}", m.rm),
        });
    }

    let rm_low = m.rm & 7;
    let (raw, len, dis): (Expr, usize, String) = if rm_low == 4 {
        // SIB byte follows.
        let sib = parse_sib(bytes::u8_at(l.bytes, delta + 1)?, m.mod_, pfx);
        let mut sum: Option<Expr> = None;
        let mut dis = String::from("(");
        if let Some(base) = sib.base {
            sum = Some(guest::read_gpr(base));
            dis.push_str(&format!("%r{base}"));
        }
        if let Some(index) = sib.index {
            let scaled = if sib.scale == 1 {
                guest::read_gpr(index)
            } else {
                Expr::binop(
                    BinOp::Shl(Width::W64),
                    guest::read_gpr(index),
                    Expr::c8(sib.scale.trailing_zeros() as u8),
                )
            };
            sum = Some(add_opt(sum, scaled));
            dis.push_str(&format!(",%r{index},{}", sib.scale));
        }
        let (disp, len) = match (m.mod_, sib.base) {
            (0, None) => (bytes::i32_at(l.bytes, delta + 2)?, 6),
            (0, Some(_)) => (0, 2),
            (1, _) => (bytes::i8_at(l.bytes, delta + 2)?, 3),
            (2, _) => (bytes::i32_at(l.bytes, delta + 2)?, 6),
            _ => unreachable!(),
        };
        let sum = if disp != 0 || sum.is_none() {
            add_opt(sum, Expr::c64(disp as u64))
        } else {
            sum.unwrap()
        };
        dis.push(')');
        (sum, len, format!("{disp:#x}{dis}"))
    } else if rm_low == 5 && m.mod_ == 0 {
        // RIP-relative: displacement against the end of the instruction.
        let disp = bytes::i32_at(l.bytes, delta + 1)?;
        let next = l
            .pc
            .wrapping_add((delta + 5 + trailing) as u64)
            .wrapping_add(disp as u64);
        (Expr::c64(next), 5, format!("{disp:#x}(%rip)"))
    } else {
        let base = guest::read_gpr(m.rm);
        let (disp, len) = match m.mod_ {
            0 => (0, 1),
            1 => (bytes::i8_at(l.bytes, delta + 1)?, 2),
            2 => (bytes::i32_at(l.bytes, delta + 1)?, 5),
            _ => unreachable!(),
        };
        let e = if disp != 0 {
            Expr::binop(BinOp::Add(Width::W64), base, Expr::c64(disp as u64))
        } else {
            base
        };
        (e, len, format!("{:#x}(%r{})", disp, m.rm))
    };

    let adjusted = if apply_segment {
        adjust_addr(l, pfx, raw)?
    } else if pfx.addr_size_override() {
        let low = Expr::unop(
            UnOp::Narrow {
                from: Width::W64,
                to: Width::W32,
            },
            raw,
        );
        Expr::unop(
            UnOp::WidenU {
                from: Width::W32,
                to: Width::W64,
            },
            low,
        )
    } else {
        raw
    };
    let addr = l.block.assign(adjusted);
    Ok(Amode {
        op: RmOp::Mem { addr, len },
        reg: m.reg,
        dis,
    })
}

/// Byte length of the addressing form at `delta`, without building IR.
/// Must agree with [`disamode`] for every mod/rm/SIB combination.
pub fn disamode_len(buf: &[u8], delta: usize) -> Result<usize, DecodeError> {
    let modrm_byte = bytes::u8_at(buf, delta)?;
    let mod_ = modrm_byte >> 6;
    let rm_low = modrm_byte & 7;

    if mod_ == 3 {
        return Ok(1);
    }
    if rm_low == 4 {
        let sib = bytes::u8_at(buf, delta + 1)?;
        let base_low = sib & 7;
        return Ok(match (mod_, base_low) {
            (0, 5) => 6,
            (0, _) => 2,
            (1, _) => 3,
            (2, _) => 6,
            _ => unreachable!(),
        });
    }
    if rm_low == 5 && mod_ == 0 {
        return Ok(5);
    }
    Ok(match mod_ {
        0 => 1,
        1 => 2,
        2 => 5,
        _ => unreachable!(),
    })
}

/// A decoded vector-indexed (VSIB) memory operand for gathers.
pub struct VsibOp {
    /// Scalar part of the address (base + displacement), before the
    /// per-lane scaled vector index.
    pub base: TempId,
    /// The vector register providing per-lane indices.
    pub index_reg: u8,
    pub scale: u8,
    pub len: usize,
}

/// Decode the gather addressing form. Gather addressing requires a memory
/// operand with a SIB byte and a (vector) index register; any other shape is
/// a decode failure, not an internal error.
pub fn disavsib(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<(VsibOp, u8), DecodeError> {
    let modrm_byte = bytes::u8_at(l.bytes, delta)?;
    let m = parse_modrm(modrm_byte, pfx);
    if m.mod_ == 3 || (m.rm & 7) != 4 {
        return Err(DecodeError::Invalid);
    }
    let sib = bytes::u8_at(l.bytes, delta + 1)?;
    let scale = 1u8 << (sib >> 6);
    // Unlike the scalar form, index code 100 is a real vector register.
    let index_reg = ((sib >> 3) & 7) | if pfx.rex_x() { 8 } else { 0 };
    let base_code = (sib & 7) | if pfx.rex_b() { 8 } else { 0 };

    let (base_expr, len): (Expr, usize) = if (base_code & 7) == 5 && m.mod_ == 0 {
        let disp = bytes::i32_at(l.bytes, delta + 2)?;
        (Expr::c64(disp as u64), 6)
    } else {
        let base = guest::read_gpr(base_code);
        let (disp, len) = match m.mod_ {
            0 => (0, 2),
            1 => (bytes::i8_at(l.bytes, delta + 2)?, 3),
            2 => (bytes::i32_at(l.bytes, delta + 2)?, 6),
            _ => unreachable!(),
        };
        let e = if disp != 0 {
            Expr::binop(BinOp::Add(Width::W64), base, Expr::c64(disp as u64))
        } else {
            base
        };
        (e, len)
    };

    let adjusted = adjust_addr(l, pfx, base_expr)?;
    let base = l.block.assign(adjusted);
    Ok((
        VsibOp {
            base,
            index_reg,
            scale,
            len,
        },
        m.reg,
    ))
}
