//! Expression nodes.
//!
//! Integer ops are parameterized by [`Width`]; vector ops name their lane
//! shape explicitly (`Add32x4` = four 32-bit lanes in a 128-bit value).
//! Floating-point arithmetic threads an explicit rounding-mode operand (an
//! `I32` in the encoding of the guest's rounding-control field) through
//! [`TriOp`] nodes, so rounding behavior is visible to downstream consumers.

use crate::{helper::PureHelper, TempId, Ty};
use tern_types::Width;

/// A fixed guest-state array accessed with a runtime index (the x87 register
/// file and its tag array, rotated through the top-of-stack pointer).
/// Indices are taken modulo `nelem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrDesc {
    pub base: u16,
    pub elem: Ty,
    pub nelem: u8,
}

/// Typed constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Const {
    U1(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /// 128-bit vector constant: each bit expands to one byte, 1 -> 0xFF.
    V128(u16),
    /// 256-bit vector constant, same per-byte expansion rule.
    V256(u32),
    F32Bits(u32),
    F64Bits(u64),
}

impl Const {
    #[must_use]
    pub fn ty(self) -> Ty {
        match self {
            Const::U1(_) => Ty::I1,
            Const::U8(_) => Ty::I8,
            Const::U16(_) => Ty::I16,
            Const::U32(_) => Ty::I32,
            Const::U64(_) => Ty::I64,
            Const::V128(_) => Ty::V128,
            Const::V256(_) => Ty::V256,
            Const::F32Bits(_) => Ty::F32,
            Const::F64Bits(_) => Ty::F64,
        }
    }

    /// Integer constant of the given width.
    #[must_use]
    pub fn of_width(w: Width, v: u64) -> Const {
        match w {
            Width::W8 => Const::U8(v as u8),
            Width::W16 => Const::U16(v as u16),
            Width::W32 => Const::U32(v as u32),
            Width::W64 => Const::U64(v),
        }
    }

    /// The numeric value of an integer constant, zero-extended.
    #[must_use]
    pub fn as_u64(self) -> Option<u64> {
        match self {
            Const::U1(b) => Some(b as u64),
            Const::U8(v) => Some(v as u64),
            Const::U16(v) => Some(v as u64),
            Const::U32(v) => Some(v as u64),
            Const::U64(v) => Some(v),
            _ => None,
        }
    }
}

/// Unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not(Width),
    Neg(Width),
    /// Count leading zeros; undefined-input cases are resolved by the lifter.
    Clz(Width),
    /// Count trailing zeros.
    Ctz(Width),
    /// Zero-extend `from` to `to`. `from < to`.
    WidenU { from: Width, to: Width },
    /// Sign-extend `from` to `to`. `from < to`.
    WidenS { from: Width, to: Width },
    /// Truncate `from` down to `to`. `from > to`.
    Narrow { from: Width, to: Width },
    /// Byte-swap.
    Bswap(Width),
    /// Low half of an I128.
    I128Lo,
    /// High half of an I128.
    I128Hi,
    /// Is the value nonzero? Produces I1.
    CmpNez(Width),
    /// I1 -> integer 0/1 of the given width.
    B1To(Width),

    ReinterpI32AsF32,
    ReinterpF32AsI32,
    ReinterpI64AsF64,
    ReinterpF64AsI64,
    F32ToF64,
    /// Exact conversion, no rounding involved.
    I32SToF64,
    NegF32,
    NegF64,
    AbsF32,
    AbsF64,

    NotV128,
    /// Low/high 64 bits of a V128.
    V128To64Lo,
    V128To64Hi,
    /// Zero-extend a 64-bit (or 32-bit) scalar into lane 0 of a V128.
    I64ToV128,
    I32ToV128,
    /// Lane extraction to scalar; `idx` is the lane number.
    GetLane8 { idx: u8 },
    GetLane16 { idx: u8 },
    GetLane32 { idx: u8 },
    GetLane64 { idx: u8 },
    /// Per-byte/word/dword sign-bit mask, as in MOVMSK/PMOVMSKB. Produces I32.
    MoveMask8x16,
    MoveMask32x4,
    MoveMask64x2,
    /// Halves of a V256.
    V256ToV128Lo,
    V256ToV128Hi,
    /// Per-lane widening from the low half of a V128 (PMOVZX/PMOVSX shapes).
    WidenULo8x16To16x8,
    WidenULo16x8To32x4,
    WidenULo32x4To64x2,
    WidenSLo8x16To16x8,
    WidenSLo16x8To32x4,
    WidenSLo32x4To64x2,
    /// Per-lane absolute value (SSSE3 PABS*).
    Abs8x16,
    Abs16x8,
    Abs32x4,
}

/// Floating-point compare selector for the CMPPS/CMPPD immediate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FCmpKind {
    Eq,
    Lt,
    Le,
    Unord,
    Neq,
    Nlt,
    Nle,
    Ord,
}

impl FCmpKind {
    #[must_use]
    pub fn from_imm3(imm: u8) -> Option<FCmpKind> {
        Some(match imm & 0x7 {
            0 => FCmpKind::Eq,
            1 => FCmpKind::Lt,
            2 => FCmpKind::Le,
            3 => FCmpKind::Unord,
            4 => FCmpKind::Neq,
            5 => FCmpKind::Nlt,
            6 => FCmpKind::Nle,
            7 => FCmpKind::Ord,
            _ => return None,
        })
    }
}

/// Binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add(Width),
    Sub(Width),
    And(Width),
    Or(Width),
    Xor(Width),
    /// Shift count is an I8. Counts >= width are well-defined: Shl/Shr
    /// produce 0 and Sar produces all-sign-bits (the front end's rotate and
    /// double-shift formulas rely on this).
    Shl(Width),
    Shr(Width),
    Sar(Width),
    /// Low-half multiply.
    Mul(Width),
    /// Widening multiplies: (W, W) -> result of twice the width
    /// (`W64` widens to I128).
    MulWidenU(Width),
    MulWidenS(Width),
    /// Division of a double-width numerator by a `W` denominator, producing a
    /// double-width packed (remainder : quotient) value, remainder in the
    /// high half.
    DivModU(Width),
    DivModS(Width),
    /// (hi, lo) -> value of twice the width.
    Concat(Width),
    /// Comparisons produce I1.
    CmpEq(Width),
    CmpNe(Width),
    CmpLtU(Width),
    CmpLtS(Width),
    CmpLeU(Width),
    CmpLeS(Width),

    /// Scalar FP compare producing the 4-bit unordered/less/greater/equal
    /// encoding 0x45 / 0x01 / 0x00 / 0x40 in an I32.
    CmpF32,
    CmpF64,
    /// (rounding-mode I32, value) forms.
    SqrtF32,
    SqrtF64,
    F64ToF32,
    /// (rounding-mode I32, F64/F32) -> signed integer, rounding per mode.
    F64ToI32S,
    F64ToI64S,
    F32ToI32S,
    F32ToI64S,
    /// (rounding-mode I32, signed integer) -> FP.
    I32SToF32,
    I64SToF32,
    I64SToF64,
    /// (rounding-mode I32, F64) -> integral-valued F64 (FRNDINT shape).
    RoundF64ToInt,

    AndV128,
    OrV128,
    XorV128,
    /// lhs & !rhs (ANDN operand order of PANDN: !lhs & rhs is expressed by
    /// swapping at the call site).
    AndNotV128,
    Add8x16,
    Add16x8,
    Add32x4,
    Add64x2,
    Sub8x16,
    Sub16x8,
    Sub32x4,
    Sub64x2,
    QAddU8x16,
    QAddS8x16,
    QAddU16x8,
    QAddS16x8,
    QSubU8x16,
    QSubS8x16,
    QSubU16x8,
    QSubS16x8,
    Mul16x8,
    Mul32x4,
    MulHiU16x8,
    MulHiS16x8,
    /// PMULUDQ/PMULDQ: multiply even 32-bit lanes into 64-bit lanes.
    MulEvenU32x4,
    MulEvenS32x4,
    /// PMADDWD.
    MAddS16x8,
    Avg8Ux16,
    Avg16Ux8,
    Max8Ux16,
    Max8Sx16,
    Max16Sx8,
    Max16Ux8,
    Max32Sx4,
    Max32Ux4,
    Min8Ux16,
    Min8Sx16,
    Min16Sx8,
    Min16Ux8,
    Min32Sx4,
    Min32Ux4,
    CmpEq8x16,
    CmpEq16x8,
    CmpEq32x4,
    CmpEq64x2,
    CmpGtS8x16,
    CmpGtS16x8,
    CmpGtS32x4,
    CmpGtS64x2,
    /// Vector shifts by an I8 scalar count (already masked by the lifter).
    ShlN16x8,
    ShlN32x4,
    ShlN64x2,
    ShrN16x8,
    ShrN32x4,
    ShrN64x2,
    SarN16x8,
    SarN32x4,
    /// Whole-register byte shifts (PSLLDQ/PSRLDQ), count in bytes.
    ShlV128Bytes,
    ShrV128Bytes,
    InterleaveLo8x16,
    InterleaveLo16x8,
    InterleaveLo32x4,
    InterleaveLo64x2,
    InterleaveHi8x16,
    InterleaveHi16x8,
    InterleaveHi32x4,
    InterleaveHi64x2,
    /// Saturating pack of (hi-source, lo-source) lane pairs.
    PackS16x8,
    PackU16x8,
    PackS32x4,
    PackU32x4,
    /// Single-source lane shuffle with an embedded selector immediate
    /// (PSHUFD shape).
    Shuf32x4(u8),
    /// Two-source lane shuffle (SHUFPS shape): low two lanes select from lhs,
    /// high two from rhs.
    Shuf32x4x2(u8),
    Shuf64x2x2(u8),
    /// PSHUFLW/PSHUFHW shapes.
    ShufLo16x8(u8),
    ShufHi16x8(u8),
    /// Insert a scalar into the given lane of lhs.
    SetLane8 { idx: u8 },
    SetLane16 { idx: u8 },
    SetLane32 { idx: u8 },
    SetLane64 { idx: u8 },
    /// Per-lane FP arithmetic, all four/two lanes. The rounding mode is the
    /// guest's current SSE rounding field, threaded by the lifter as lhs of
    /// a TriOp for the scalar forms; packed forms use round-to-nearest-even
    /// semantics of the downstream engine.
    Add32Fx4,
    Sub32Fx4,
    Mul32Fx4,
    Div32Fx4,
    Max32Fx4,
    Min32Fx4,
    Add64Fx2,
    Sub64Fx2,
    Mul64Fx2,
    Div64Fx2,
    Max64Fx2,
    Min64Fx2,
    /// Lowest-lane-only FP arithmetic; remaining lanes pass through from lhs.
    Add32F0x4,
    Sub32F0x4,
    Mul32F0x4,
    Div32F0x4,
    Max32F0x4,
    Min32F0x4,
    Add64F0x2,
    Sub64F0x2,
    Mul64F0x2,
    Div64F0x2,
    Max64F0x2,
    Min64F0x2,
    Sqrt32Fx4,
    Sqrt64Fx2,
    /// Per-lane FP compares producing all-ones/all-zero lanes.
    CmpF32x4(FCmpKind),
    CmpF64x2(FCmpKind),
    /// Halves to a V256.
    V128HLToV256,

    /// 80-bit x87 arithmetic is approximated at F64; (rounding mode, a) forms
    /// use TriOp below. Scalar FP min/max follow x86 ordered semantics
    /// (second operand wins on NaN), resolved by the downstream engine.
    V256And,
    V256Or,
    V256Xor,
}

/// Ternary operations (all FP, first operand is the rounding mode as I32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriOp {
    AddF32,
    SubF32,
    MulF32,
    DivF32,
    AddF64,
    SubF64,
    MulF64,
    DivF64,
}

/// Expression tree. Pure: evaluating an expression has no side effects
/// (loads observe memory but do not change it).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Const),
    Temp(TempId),
    /// Read guest state at a byte offset.
    Get { off: u16, ty: Ty },
    /// Read a guest-state array element at a runtime index (I64).
    GetArr { desc: ArrDesc, ix: Box<Expr> },
    /// Little-endian memory load at an I64 address.
    Load { ty: Ty, addr: Box<Expr> },
    Unop { op: UnOp, src: Box<Expr> },
    Binop { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Triop { op: TriOp, a: Box<Expr>, b: Box<Expr>, c: Box<Expr> },
    /// `cond` is I1; arms have identical type.
    Mux { cond: Box<Expr>, if_true: Box<Expr>, if_false: Box<Expr> },
    /// Call to an external pure helper (no guest/memory side effects).
    CallPure { func: PureHelper, args: Vec<Expr> },
}

impl Expr {
    #[must_use]
    pub fn c8(v: u8) -> Expr {
        Expr::Const(Const::U8(v))
    }

    #[must_use]
    pub fn c16(v: u16) -> Expr {
        Expr::Const(Const::U16(v))
    }

    #[must_use]
    pub fn c32(v: u32) -> Expr {
        Expr::Const(Const::U32(v))
    }

    #[must_use]
    pub fn c64(v: u64) -> Expr {
        Expr::Const(Const::U64(v))
    }

    #[must_use]
    pub fn cw(w: Width, v: u64) -> Expr {
        Expr::Const(Const::of_width(w, v))
    }

    #[must_use]
    pub fn true_() -> Expr {
        Expr::Const(Const::U1(true))
    }

    #[must_use]
    pub fn temp(t: TempId) -> Expr {
        Expr::Temp(t)
    }

    #[must_use]
    pub fn unop(op: UnOp, src: Expr) -> Expr {
        Expr::Unop { op, src: Box::new(src) }
    }

    #[must_use]
    pub fn binop(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binop {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    #[must_use]
    pub fn triop(op: TriOp, a: Expr, b: Expr, c: Expr) -> Expr {
        Expr::Triop {
            op,
            a: Box::new(a),
            b: Box::new(b),
            c: Box::new(c),
        }
    }

    #[must_use]
    pub fn mux(cond: Expr, if_true: Expr, if_false: Expr) -> Expr {
        Expr::Mux {
            cond: Box::new(cond),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    #[must_use]
    pub fn load(ty: Ty, addr: Expr) -> Expr {
        Expr::Load {
            ty,
            addr: Box::new(addr),
        }
    }

    #[must_use]
    pub fn get(off: u16, ty: Ty) -> Expr {
        Expr::Get { off, ty }
    }

    #[must_use]
    pub fn get_arr(desc: ArrDesc, ix: Expr) -> Expr {
        Expr::GetArr {
            desc,
            ix: Box::new(ix),
        }
    }

    /// The constant value, if this is an integer constant.
    #[must_use]
    pub fn const_value(&self) -> Option<u64> {
        match self {
            Expr::Const(c) => c.as_u64(),
            _ => None,
        }
    }
}

impl UnOp {
    /// Result type given the (already type-checked) operand.
    #[must_use]
    pub fn result_ty(self) -> Ty {
        match self {
            UnOp::Not(w) | UnOp::Neg(w) | UnOp::Clz(w) | UnOp::Ctz(w) | UnOp::Bswap(w) => {
                Ty::from_width(w)
            }
            UnOp::WidenU { to, .. } | UnOp::WidenS { to, .. } | UnOp::Narrow { to, .. } => {
                Ty::from_width(to)
            }
            UnOp::I128Lo | UnOp::I128Hi => Ty::I64,
            UnOp::CmpNez(_) => Ty::I1,
            UnOp::B1To(w) => Ty::from_width(w),
            UnOp::ReinterpI32AsF32 => Ty::F32,
            UnOp::ReinterpF32AsI32 => Ty::I32,
            UnOp::ReinterpI64AsF64 => Ty::F64,
            UnOp::ReinterpF64AsI64 => Ty::I64,
            UnOp::F32ToF64 => Ty::F64,
            UnOp::I32SToF64 => Ty::F64,
            UnOp::NegF32 | UnOp::AbsF32 => Ty::F32,
            UnOp::NegF64 | UnOp::AbsF64 => Ty::F64,
            UnOp::NotV128 => Ty::V128,
            UnOp::V128To64Lo | UnOp::V128To64Hi => Ty::I64,
            UnOp::I64ToV128 | UnOp::I32ToV128 => Ty::V128,
            UnOp::GetLane8 { .. } => Ty::I8,
            UnOp::GetLane16 { .. } => Ty::I16,
            UnOp::GetLane32 { .. } => Ty::I32,
            UnOp::GetLane64 { .. } => Ty::I64,
            UnOp::MoveMask8x16 | UnOp::MoveMask32x4 | UnOp::MoveMask64x2 => Ty::I32,
            UnOp::V256ToV128Lo | UnOp::V256ToV128Hi => Ty::V128,
            UnOp::WidenULo8x16To16x8
            | UnOp::WidenULo16x8To32x4
            | UnOp::WidenULo32x4To64x2
            | UnOp::WidenSLo8x16To16x8
            | UnOp::WidenSLo16x8To32x4
            | UnOp::WidenSLo32x4To64x2
            | UnOp::Abs8x16
            | UnOp::Abs16x8
            | UnOp::Abs32x4 => Ty::V128,
        }
    }
}

impl BinOp {
    /// Result type given (already type-checked) operands.
    #[must_use]
    pub fn result_ty(self) -> Ty {
        use BinOp::*;
        match self {
            Add(w) | Sub(w) | And(w) | Or(w) | Xor(w) | Shl(w) | Shr(w) | Sar(w) | Mul(w) => {
                Ty::from_width(w)
            }
            MulWidenU(w) | MulWidenS(w) | DivModU(w) | DivModS(w) | Concat(w) => match w {
                Width::W8 => Ty::I16,
                Width::W16 => Ty::I32,
                Width::W32 => Ty::I64,
                Width::W64 => Ty::I128,
            },
            CmpEq(_) | CmpNe(_) | CmpLtU(_) | CmpLtS(_) | CmpLeU(_) | CmpLeS(_) => Ty::I1,
            CmpF32 | CmpF64 => Ty::I32,
            SqrtF32 => Ty::F32,
            SqrtF64 => Ty::F64,
            F64ToF32 => Ty::F32,
            F64ToI32S | F32ToI32S => Ty::I32,
            F64ToI64S | F32ToI64S => Ty::I64,
            I32SToF32 | I64SToF32 => Ty::F32,
            I64SToF64 | RoundF64ToInt => Ty::F64,
            V128HLToV256 | V256And | V256Or | V256Xor => Ty::V256,
            _ => Ty::V128,
        }
    }
}

impl TriOp {
    #[must_use]
    pub fn result_ty(self) -> Ty {
        match self {
            TriOp::AddF32 | TriOp::SubF32 | TriOp::MulF32 | TriOp::DivF32 => Ty::F32,
            TriOp::AddF64 | TriOp::SubF64 | TriOp::MulF64 | TriOp::DivF64 => Ty::F64,
        }
    }
}
