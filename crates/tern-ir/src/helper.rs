//! External helper routine descriptors.
//!
//! The lifter never implements these; it emits *calls* to them with fixed
//! argument lists. Pure helpers ([`PureHelper`]) read nothing but their
//! arguments. Effectful helpers ([`EffHelper`]) additionally carry an
//! [`Effects`] annotation naming the guest-state byte ranges they read and
//! write and at most one memory region they touch; downstream dependency
//! analysis relies on these annotations being exact.

use crate::expr::Expr;
use core::fmt;
use tern_types::{Cond, Width};

/// Pure (argument-only) helper routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PureHelper {
    /// Evaluate one condition code against the live flags thunk.
    /// Args: (cc_op, cc_dep1, cc_dep2, cc_ndep). Returns I64 0/1.
    /// One function per condition code.
    CalcCond(Cond),
    /// Recover just the carry flag from the live thunk, for ADC/SBB/INC/DEC
    /// threading. Args: (cc_op, cc_dep1, cc_dep2, cc_ndep). Returns I64 0/1.
    CalcRflagsC,
    /// Materialize the full RFLAGS word from the live thunk (PUSHF/LAHF/
    /// SETcc spill paths). Same args. Returns I64.
    CalcRflagsAll,
    /// Rotate-through-carry. Args: (value, masked count, rflags-in). Returns
    /// the rotated result in the low `width` bits; the new CF/OF are
    /// recovered by the flags evaluator from the rotate thunk classes.
    Rcl(Width),
    Rcr(Width),
    /// CRC32 accumulate step. Args: (acc I64, data I64). Returns I64.
    Crc32(Width),
    /// POPCNT. Args: (value I64). Returns I64.
    PopCount(Width),
    /// BMI2 bit scatter/gather. Args: (source, mask). Returns I64.
    Pdep(Width),
    Pext(Width),
}

impl PureHelper {
    /// Stable external symbol name; part of the embedding contract.
    #[must_use]
    pub fn name(self) -> String {
        match self {
            PureHelper::CalcCond(cond) => format!("tern_calc_cond_{cond}"),
            PureHelper::CalcRflagsC => "tern_calc_rflags_c".to_string(),
            PureHelper::CalcRflagsAll => "tern_calc_rflags_all".to_string(),
            PureHelper::Rcl(w) => format!("tern_rcl{}", w.bits()),
            PureHelper::Rcr(w) => format!("tern_rcr{}", w.bits()),
            PureHelper::Crc32(w) => format!("tern_crc32_{}", w.bits()),
            PureHelper::PopCount(w) => format!("tern_popcnt{}", w.bits()),
            PureHelper::Pdep(w) => format!("tern_pdep{}", w.bits()),
            PureHelper::Pext(w) => format!("tern_pext{}", w.bits()),
        }
    }

    /// All pure helpers return I64 in the current contract.
    #[must_use]
    pub fn result_ty(self) -> crate::Ty {
        crate::Ty::I64
    }
}

/// Transcendental / remainder x87 operations on ST0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum X87UnaryOp {
    F2xm1,
    Fsin,
    Fcos,
    Fxtract,
}

impl X87UnaryOp {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            X87UnaryOp::F2xm1 => "tern_x87_f2xm1",
            X87UnaryOp::Fsin => "tern_x87_fsin",
            X87UnaryOp::Fcos => "tern_x87_fcos",
            X87UnaryOp::Fxtract => "tern_x87_fxtract",
        }
    }
}

/// x87 operations on ST0/ST1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum X87BinaryOp {
    Fyl2x,
    Fyl2xp1,
    Fpatan,
    Fptan,
    Fprem,
    Fprem1,
    Fscale,
    Fsincos,
}

impl X87BinaryOp {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            X87BinaryOp::Fyl2x => "tern_x87_fyl2x",
            X87BinaryOp::Fyl2xp1 => "tern_x87_fyl2xp1",
            X87BinaryOp::Fpatan => "tern_x87_fpatan",
            X87BinaryOp::Fptan => "tern_x87_fptan",
            X87BinaryOp::Fprem => "tern_x87_fprem",
            X87BinaryOp::Fprem1 => "tern_x87_fprem1",
            X87BinaryOp::Fscale => "tern_x87_fscale",
            X87BinaryOp::Fsincos => "tern_x87_fsincos",
        }
    }
}

/// A byte range within guest state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestRange {
    pub off: u16,
    pub len: u16,
}

/// Memory touched by an effectful helper, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum MemEffect {
    None,
    Read { addr: Expr, len: u32 },
    Write { addr: Expr, len: u32 },
}

/// Guest-state/memory effect annotation for one helper call.
#[derive(Debug, Clone, PartialEq)]
pub struct Effects {
    pub reads: Vec<GuestRange>,
    pub writes: Vec<GuestRange>,
    pub mem: MemEffect,
}

impl Effects {
    #[must_use]
    pub fn none() -> Effects {
        Effects {
            reads: Vec::new(),
            writes: Vec::new(),
            mem: MemEffect::None,
        }
    }
}

/// Effectful helper routines (read/write guest state and/or memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffHelper {
    /// CPUID: reads the RAX/RCX slots, writes RAX/RBX/RCX/RDX.
    Cpuid,
    /// RDTSC: returns the 64-bit counter; the lifter splits it into
    /// EDX:EAX. RDTSCP additionally writes the RCX slot.
    Rdtsc,
    Rdtscp,
    /// Horizontal/byte-wise SSSE3 class ops on guest vector slots.
    /// Args: (dst guest offset, src guest offset or scratch, imm).
    Pshufb,
    Phadd16,
    Phadd32,
    PhaddSat16,
    Phsub16,
    Phsub32,
    PhsubSat16,
    Pmaddubsw,
    Psign8,
    Psign16,
    Psign32,
    Pmulhrsw,
    /// AES round family, operating on guest vector slots.
    AesEnc,
    AesEncLast,
    AesDec,
    AesDecLast,
    AesImc,
    AesKeygenAssist,
    /// PCLMULQDQ.
    Pclmulqdq,
    /// PSADBW (horizontal byte-difference sums).
    Psadbw,
    /// SSE4.1 ROUND* family (rounding-control immediate passed as an arg).
    RoundPs,
    RoundPd,
    RoundSs,
    RoundSd,
    /// x87 operations whose 80-bit semantics are not economically inlined.
    /// They operate on the guest FP stack in place.
    X87Unary(X87UnaryOp),
    X87Binary(X87BinaryOp),
    /// SSE4.2 string compares; return the packed (flags:32 | result:32).
    PcmpIstri,
    PcmpIstrm,
    PcmpEstri,
    PcmpEstrm,
    /// x87 environment / full-state transfer.
    FpStoreEnv,
    FpLoadEnv,
    FpSave,
    FpRestore,
    FxSave,
    FxRestore,
}

impl EffHelper {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EffHelper::Cpuid => "tern_cpuid",
            EffHelper::Rdtsc => "tern_rdtsc",
            EffHelper::Rdtscp => "tern_rdtscp",
            EffHelper::Pshufb => "tern_pshufb",
            EffHelper::Phadd16 => "tern_phadd16",
            EffHelper::Phadd32 => "tern_phadd32",
            EffHelper::PhaddSat16 => "tern_phadds16",
            EffHelper::Phsub16 => "tern_phsub16",
            EffHelper::Phsub32 => "tern_phsub32",
            EffHelper::PhsubSat16 => "tern_phsubs16",
            EffHelper::Pmaddubsw => "tern_pmaddubsw",
            EffHelper::Psign8 => "tern_psign8",
            EffHelper::Psign16 => "tern_psign16",
            EffHelper::Psign32 => "tern_psign32",
            EffHelper::Pmulhrsw => "tern_pmulhrsw",
            EffHelper::AesEnc => "tern_aesenc",
            EffHelper::AesEncLast => "tern_aesenclast",
            EffHelper::AesDec => "tern_aesdec",
            EffHelper::AesDecLast => "tern_aesdeclast",
            EffHelper::AesImc => "tern_aesimc",
            EffHelper::AesKeygenAssist => "tern_aeskeygenassist",
            EffHelper::Pclmulqdq => "tern_pclmulqdq",
            EffHelper::Psadbw => "tern_psadbw",
            EffHelper::RoundPs => "tern_roundps",
            EffHelper::RoundPd => "tern_roundpd",
            EffHelper::RoundSs => "tern_roundss",
            EffHelper::RoundSd => "tern_roundsd",
            EffHelper::X87Unary(op) => op.name(),
            EffHelper::X87Binary(op) => op.name(),
            EffHelper::PcmpIstri => "tern_pcmpistri",
            EffHelper::PcmpIstrm => "tern_pcmpistrm",
            EffHelper::PcmpEstri => "tern_pcmpestri",
            EffHelper::PcmpEstrm => "tern_pcmpestrm",
            EffHelper::FpStoreEnv => "tern_fp_store_env",
            EffHelper::FpLoadEnv => "tern_fp_load_env",
            EffHelper::FpSave => "tern_fp_save",
            EffHelper::FpRestore => "tern_fp_restore",
            EffHelper::FxSave => "tern_fxsave",
            EffHelper::FxRestore => "tern_fxrstor",
        }
    }
}

impl fmt::Display for EffHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
