//! Legacy-prefix, REX and VEX scanning.
//!
//! One pass accumulates legacy prefixes (last-wins within a group), then
//! decodes at most one of {REX, VEX} (the two are mutually exclusive), and
//! finally resolves the opcode map from the escape bytes or the VEX `mmmmm`
//! field. Duplicate REP or segment prefixes are *not* rejected here: the bits
//! accumulate and the individual instruction handlers reject combinations
//! they cannot accept.

use crate::{bytes, DecodeError};
use bitflags::bitflags;
use tern_types::{Seg, Width};

/// Hard cap on prefix bytes before the opcode; exceeding it is a decode
/// failure regardless of the 15-byte instruction limit.
pub const MAX_PREFIX_BYTES: usize = 8;

bitflags! {
    /// Legacy prefix bits. Segment bits are one-hot per prefix byte seen;
    /// validity of combinations is checked per instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Legacy: u16 {
        const OPSIZE = 1 << 0;
        const ADDRSIZE = 1 << 1;
        const LOCK = 1 << 2;
        const REPNE = 1 << 3;
        const REP = 1 << 4;
        const SEG_ES = 1 << 5;
        const SEG_CS = 1 << 6;
        const SEG_SS = 1 << 7;
        const SEG_DS = 1 << 8;
        const SEG_FS = 1 << 9;
        const SEG_GS = 1 << 10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rex {
    pub w: bool,
    pub r: bool,
    pub x: bool,
    pub b: bool,
}

impl Rex {
    fn from_byte(b: u8) -> Rex {
        debug_assert!((0x40..=0x4f).contains(&b));
        Rex {
            w: b & 0x08 != 0,
            r: b & 0x04 != 0,
            x: b & 0x02 != 0,
            b: b & 0x01 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vex {
    pub w: bool,
    pub r: bool,
    pub x: bool,
    pub b: bool,
    /// The extra (inverted-in-encoding, stored decoded) vector operand.
    pub vvvv: u8,
    /// 256-bit register set selected.
    pub l256: bool,
    /// The embedded 66/F3/F2 equivalent: 0=none 1=66 2=F3 3=F2.
    pub pp: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeMap {
    Primary,
    Map0F,
    Map0F38,
    Map0F3A,
}

/// Normalized per-instruction prefix state. Built once by [`scan`], read-only
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Prefixes {
    pub legacy: Legacy,
    pub rex: Option<Rex>,
    pub vex: Option<Vex>,
}

impl Prefixes {
    #[must_use]
    pub fn rex_w(&self) -> bool {
        match (self.rex, self.vex) {
            (Some(r), None) => r.w,
            (None, Some(v)) => v.w,
            (None, None) => false,
            (Some(_), Some(_)) => unreachable!("REX and VEX both present"),
        }
    }

    #[must_use]
    pub fn rex_r(&self) -> bool {
        match (self.rex, self.vex) {
            (Some(r), None) => r.r,
            (None, Some(v)) => v.r,
            (None, None) => false,
            (Some(_), Some(_)) => unreachable!("REX and VEX both present"),
        }
    }

    #[must_use]
    pub fn rex_x(&self) -> bool {
        match (self.rex, self.vex) {
            (Some(r), None) => r.x,
            (None, Some(v)) => v.x,
            (None, None) => false,
            (Some(_), Some(_)) => unreachable!("REX and VEX both present"),
        }
    }

    #[must_use]
    pub fn rex_b(&self) -> bool {
        match (self.rex, self.vex) {
            (Some(r), None) => r.b,
            (None, Some(v)) => v.b,
            (None, None) => false,
            (Some(_), Some(_)) => unreachable!("REX and VEX both present"),
        }
    }

    /// Any REX byte present (affects 8-bit register naming even when all
    /// extension bits are clear).
    #[must_use]
    pub fn rex_present(&self) -> bool {
        self.rex.is_some()
    }

    /// Effective integer operand width (64-bit mode rules).
    #[must_use]
    pub fn operand_width(&self) -> Width {
        if self.rex_w() {
            Width::W64
        } else if self.legacy.contains(Legacy::OPSIZE) {
            Width::W16
        } else {
            Width::W32
        }
    }

    /// Operand width for the push/pop/call family, which defaults to 64.
    #[must_use]
    pub fn stack_width(&self) -> Width {
        if self.legacy.contains(Legacy::OPSIZE) {
            Width::W16
        } else {
            Width::W64
        }
    }

    #[must_use]
    pub fn addr_size_override(&self) -> bool {
        self.legacy.contains(Legacy::ADDRSIZE)
    }

    #[must_use]
    pub fn lock(&self) -> bool {
        self.legacy.contains(Legacy::LOCK)
    }

    #[must_use]
    pub fn rep(&self) -> bool {
        self.legacy.contains(Legacy::REP)
    }

    #[must_use]
    pub fn repne(&self) -> bool {
        self.legacy.contains(Legacy::REPNE)
    }

    /// The embedded SSE prefix selector: 0=none 1=66 2=F3 3=F2. VEX encodes
    /// it directly; legacy instructions derive it from the prefix bits, with
    /// F2/F3 taking precedence over 66 as on hardware.
    #[must_use]
    pub fn psel(&self) -> u8 {
        if let Some(v) = self.vex {
            return v.pp;
        }
        if self.rep() {
            2
        } else if self.repne() {
            3
        } else if self.legacy.contains(Legacy::OPSIZE) {
            1
        } else {
            0
        }
    }

    /// The single active segment override, if any. More than one segment
    /// prefix bit set is an invalid combination, rejected at use.
    pub fn segment(&self) -> Result<Option<Seg>, DecodeError> {
        let pairs = [
            (Legacy::SEG_ES, Seg::Es),
            (Legacy::SEG_CS, Seg::Cs),
            (Legacy::SEG_SS, Seg::Ss),
            (Legacy::SEG_DS, Seg::Ds),
            (Legacy::SEG_FS, Seg::Fs),
            (Legacy::SEG_GS, Seg::Gs),
        ];
        let mut found = None;
        for (bit, seg) in pairs {
            if self.legacy.contains(bit) {
                if found.is_some() {
                    return Err(DecodeError::Invalid);
                }
                found = Some(seg);
            }
        }
        Ok(found)
    }

    /// Reject the prefix bits most instructions cannot carry. Called by
    /// handlers that accept none of LOCK/REP/REPNE.
    pub fn reject_lock_rep(&self) -> Result<(), DecodeError> {
        if self.lock() || self.rep() || self.repne() {
            return Err(DecodeError::Invalid);
        }
        Ok(())
    }

    pub fn reject_lock(&self) -> Result<(), DecodeError> {
        if self.lock() {
            return Err(DecodeError::Invalid);
        }
        Ok(())
    }
}

fn legacy_bit(b: u8) -> Option<Legacy> {
    Some(match b {
        0x66 => Legacy::OPSIZE,
        0x67 => Legacy::ADDRSIZE,
        0xf0 => Legacy::LOCK,
        0xf2 => Legacy::REPNE,
        0xf3 => Legacy::REP,
        0x26 => Legacy::SEG_ES,
        0x2e => Legacy::SEG_CS,
        0x36 => Legacy::SEG_SS,
        0x3e => Legacy::SEG_DS,
        0x64 => Legacy::SEG_FS,
        0x65 => Legacy::SEG_GS,
        _ => return None,
    })
}

/// Scan prefixes and escapes from the start of an instruction.
///
/// Returns the prefix state, the selected opcode map, and the offset of the
/// first opcode byte of that map.
pub fn scan(bytes_: &[u8]) -> Result<(Prefixes, OpcodeMap, usize), DecodeError> {
    let mut idx = 0usize;
    let mut pfx = Prefixes::default();

    loop {
        let b = bytes::u8_at(bytes_, idx)?;
        let is_rex = (0x40..=0x4f).contains(&b);
        let bit = legacy_bit(b);
        if bit.is_none() && !is_rex {
            break;
        }
        if idx >= MAX_PREFIX_BYTES {
            return Err(DecodeError::Invalid);
        }
        if let Some(bit) = bit {
            pfx.legacy |= bit;
            // A REX byte only takes effect immediately before the opcode;
            // one followed by another legacy prefix is ignored.
            pfx.rex = None;
        } else {
            pfx.rex = Some(Rex::from_byte(b));
        }
        idx += 1;
    }

    let b = bytes::u8_at(bytes_, idx)?;

    if b == 0xc4 || b == 0xc5 {
        // VEX. Mutually exclusive with REX and with the legacy bits it
        // re-encodes (66/F2/F3/LOCK).
        if pfx.rex.is_some() {
            return Err(DecodeError::Invalid);
        }
        if pfx
            .legacy
            .intersects(Legacy::OPSIZE | Legacy::REP | Legacy::REPNE | Legacy::LOCK)
        {
            return Err(DecodeError::Invalid);
        }

        if b == 0xc5 {
            let b1 = bytes::u8_at(bytes_, idx + 1)?;
            pfx.vex = Some(Vex {
                w: false,
                r: b1 & 0x80 == 0,
                x: false,
                b: false,
                vvvv: (!(b1 >> 3)) & 0xf,
                l256: b1 & 0x04 != 0,
                pp: b1 & 0x03,
            });
            return Ok((pfx, OpcodeMap::Map0F, idx + 2));
        }

        let b1 = bytes::u8_at(bytes_, idx + 1)?;
        let b2 = bytes::u8_at(bytes_, idx + 2)?;
        let map = match b1 & 0x1f {
            1 => OpcodeMap::Map0F,
            2 => OpcodeMap::Map0F38,
            3 => OpcodeMap::Map0F3A,
            _ => return Err(DecodeError::Invalid),
        };
        pfx.vex = Some(Vex {
            w: b2 & 0x80 != 0,
            r: b1 & 0x80 == 0,
            x: b1 & 0x40 == 0,
            b: b1 & 0x20 == 0,
            vvvv: (!(b2 >> 3)) & 0xf,
            l256: b2 & 0x04 != 0,
            pp: b2 & 0x03,
        });
        return Ok((pfx, map, idx + 3));
    }

    if b == 0x0f {
        let b1 = bytes::u8_at(bytes_, idx + 1)?;
        return Ok(match b1 {
            0x38 => (pfx, OpcodeMap::Map0F38, idx + 2),
            0x3a => (pfx, OpcodeMap::Map0F3A, idx + 2),
            _ => (pfx, OpcodeMap::Map0F, idx + 1),
        });
    }

    Ok((pfx, OpcodeMap::Primary, idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_legacy_prefixes_and_rex() {
        // 64 66 67 4C 8B ...
        let b = [0x64, 0x66, 0x67, 0x4c, 0x8b, 0x00];
        let (pfx, map, off) = scan(&b).unwrap();
        assert_eq!(map, OpcodeMap::Primary);
        assert_eq!(off, 4);
        assert!(pfx.legacy.contains(Legacy::OPSIZE));
        assert!(pfx.addr_size_override());
        assert_eq!(pfx.segment().unwrap(), Some(Seg::Fs));
        let rex = pfx.rex.unwrap();
        assert!(rex.w && rex.r && !rex.x && !rex.b);
    }

    #[test]
    fn escape_bytes_select_maps() {
        let (_, map, off) = scan(&[0x0f, 0xaf, 0xc0]).unwrap();
        assert_eq!((map, off), (OpcodeMap::Map0F, 1));
        let (_, map, off) = scan(&[0x0f, 0x38, 0x00, 0xc0]).unwrap();
        assert_eq!((map, off), (OpcodeMap::Map0F38, 2));
        let (_, map, off) = scan(&[0x66, 0x0f, 0x3a, 0x0f, 0xc0, 0x04]).unwrap();
        assert_eq!((map, off), (OpcodeMap::Map0F3A, 3));
    }

    #[test]
    fn vex2_implies_0f_map() {
        // C5 F8 77 = vzeroupper
        let (pfx, map, off) = scan(&[0xc5, 0xf8, 0x77]).unwrap();
        assert_eq!((map, off), (OpcodeMap::Map0F, 2));
        let vex = pfx.vex.unwrap();
        assert!(!vex.l256);
        assert_eq!(vex.pp, 0);
        assert_eq!(vex.vvvv, 0);
    }

    #[test]
    fn vex3_map_field() {
        // C4 E2 71 00 C2 = vpshufb xmm0, xmm1, xmm2
        let (pfx, map, off) = scan(&[0xc4, 0xe2, 0x71, 0x00, 0xc2]).unwrap();
        assert_eq!((map, off), (OpcodeMap::Map0F38, 3));
        let vex = pfx.vex.unwrap();
        assert_eq!(vex.vvvv, 1);
        assert_eq!(vex.pp, 1);
        assert!(!vex.w);
    }

    #[test]
    fn vex3_reserved_map_rejected() {
        // mmmmm = 4 is reserved.
        let err = scan(&[0xc4, 0xe4, 0x71, 0x00, 0xc2]).unwrap_err();
        assert_eq!(err, DecodeError::Invalid);
    }

    #[test]
    fn rex_then_vex_collides() {
        let err = scan(&[0x48, 0xc5, 0xf8, 0x77]).unwrap_err();
        assert_eq!(err, DecodeError::Invalid);
    }

    #[test]
    fn prefix_run_capped_at_eight() {
        let ok = [0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x90];
        assert!(scan(&ok).is_ok());
        let over = [
            0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x90,
        ];
        assert_eq!(scan(&over).unwrap_err(), DecodeError::Invalid);
    }

    #[test]
    fn duplicate_segments_tolerated_until_use() {
        let (pfx, _, _) = scan(&[0x64, 0x65, 0x90]).unwrap();
        assert_eq!(pfx.segment().unwrap_err(), DecodeError::Invalid);
    }
}
