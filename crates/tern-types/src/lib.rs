//! Leaf types shared by the IR and the x86 front end.
//!
//! Everything here is a small, dependency-free value type. The lifter and the
//! IR both speak in terms of these, so they live below either crate.

use core::fmt;

/// Integer operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    #[must_use]
    pub fn bits(self) -> u32 {
        match self {
            Width::W8 => 8,
            Width::W16 => 16,
            Width::W32 => 32,
            Width::W64 => 64,
        }
    }

    #[must_use]
    pub fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    /// All-ones mask for this width, zero-extended to 64 bits.
    #[must_use]
    pub fn mask(self) -> u64 {
        match self {
            Width::W64 => u64::MAX,
            w => (1u64 << w.bits()) - 1,
        }
    }

    /// Sign bit of a value of this width, as a 64-bit constant.
    #[must_use]
    pub fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }

    #[must_use]
    pub fn truncate(self, v: u64) -> u64 {
        v & self.mask()
    }

    /// Sign-extend the low `bits()` bits of `v` to 64 bits.
    #[must_use]
    pub fn sign_extend(self, v: u64) -> u64 {
        let shift = 64 - self.bits();
        (((v << shift) as i64) >> shift) as u64
    }

    #[must_use]
    pub fn from_bytes(bytes: usize) -> Option<Width> {
        match bytes {
            1 => Some(Width::W8),
            2 => Some(Width::W16),
            4 => Some(Width::W32),
            8 => Some(Width::W64),
            _ => None,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Width::W8 => "b",
            Width::W16 => "w",
            Width::W32 => "l",
            Width::W64 => "q",
        };
        f.write_str(s)
    }
}

/// General-purpose register, numbered the way the hardware numbers them
/// (RAX=0 .. RDI=7, R8=8 .. R15=15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    #[must_use]
    pub fn from_u4(code: u8) -> Option<Gpr> {
        Some(match code {
            0 => Gpr::Rax,
            1 => Gpr::Rcx,
            2 => Gpr::Rdx,
            3 => Gpr::Rbx,
            4 => Gpr::Rsp,
            5 => Gpr::Rbp,
            6 => Gpr::Rsi,
            7 => Gpr::Rdi,
            8 => Gpr::R8,
            9 => Gpr::R9,
            10 => Gpr::R10,
            11 => Gpr::R11,
            12 => Gpr::R12,
            13 => Gpr::R13,
            14 => Gpr::R14,
            15 => Gpr::R15,
            _ => return None,
        })
    }

    #[must_use]
    pub fn index(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Gpr::Rax => "rax",
            Gpr::Rcx => "rcx",
            Gpr::Rdx => "rdx",
            Gpr::Rbx => "rbx",
            Gpr::Rsp => "rsp",
            Gpr::Rbp => "rbp",
            Gpr::Rsi => "rsi",
            Gpr::Rdi => "rdi",
            Gpr::R8 => "r8",
            Gpr::R9 => "r9",
            Gpr::R10 => "r10",
            Gpr::R11 => "r11",
            Gpr::R12 => "r12",
            Gpr::R13 => "r13",
            Gpr::R14 => "r14",
            Gpr::R15 => "r15",
        };
        f.write_str(s)
    }
}

/// x86 condition codes in hardware encoding order (the low nibble of
/// `Jcc`/`SETcc`/`CMOVcc` opcodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    O = 0,
    No = 1,
    B = 2,
    Ae = 3,
    E = 4,
    Ne = 5,
    Be = 6,
    A = 7,
    S = 8,
    Ns = 9,
    P = 10,
    Np = 11,
    L = 12,
    Ge = 13,
    Le = 14,
    G = 15,
}

impl Cond {
    #[must_use]
    pub fn from_cc(cc: u8) -> Option<Cond> {
        Some(match cc {
            0 => Cond::O,
            1 => Cond::No,
            2 => Cond::B,
            3 => Cond::Ae,
            4 => Cond::E,
            5 => Cond::Ne,
            6 => Cond::Be,
            7 => Cond::A,
            8 => Cond::S,
            9 => Cond::Ns,
            10 => Cond::P,
            11 => Cond::Np,
            12 => Cond::L,
            13 => Cond::Ge,
            14 => Cond::Le,
            15 => Cond::G,
            _ => return None,
        })
    }

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// The opposite condition (flip the low encoding bit).
    #[must_use]
    pub fn negate(self) -> Cond {
        Cond::from_cc(self.code() ^ 1).unwrap()
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::O => "o",
            Cond::No => "no",
            Cond::B => "b",
            Cond::Ae => "ae",
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::Be => "be",
            Cond::A => "a",
            Cond::S => "s",
            Cond::Ns => "ns",
            Cond::P => "p",
            Cond::Np => "np",
            Cond::L => "l",
            Cond::Ge => "ge",
            Cond::Le => "le",
            Cond::G => "g",
        };
        f.write_str(s)
    }
}

/// Segment registers, in prefix-byte discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Seg {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Seg::Es => "es",
            Seg::Cs => "cs",
            Seg::Ss => "ss",
            Seg::Ds => "ds",
            Seg::Fs => "fs",
            Seg::Gs => "gs",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_masks() {
        assert_eq!(Width::W8.mask(), 0xff);
        assert_eq!(Width::W16.mask(), 0xffff);
        assert_eq!(Width::W32.mask(), 0xffff_ffff);
        assert_eq!(Width::W64.mask(), u64::MAX);
    }

    #[test]
    fn width_sign_extend() {
        assert_eq!(Width::W8.sign_extend(0x80), 0xffff_ffff_ffff_ff80);
        assert_eq!(Width::W8.sign_extend(0x7f), 0x7f);
        assert_eq!(Width::W32.sign_extend(0x8000_0000), 0xffff_ffff_8000_0000);
    }

    #[test]
    fn cond_negation_flips_low_bit() {
        for cc in 0..16u8 {
            let cond = Cond::from_cc(cc).unwrap();
            assert_eq!(cond.negate().code(), cc ^ 1);
            assert_eq!(cond.negate().negate(), cond);
        }
    }

    #[test]
    fn gpr_round_trips_through_index() {
        for code in 0..16u8 {
            let gpr = Gpr::from_u4(code).unwrap();
            assert_eq!(gpr.index(), code);
        }
        assert!(Gpr::from_u4(16).is_none());
    }
}
