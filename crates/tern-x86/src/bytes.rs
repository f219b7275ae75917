//! Primitive little-endian readers over the instruction window.
//!
//! All readers take an explicit offset and keep no cursor; calling one twice
//! with the same arguments returns the same value. Reading past the window is
//! reported as [`DecodeError::UnexpectedEof`] so that a truncated buffer
//! surfaces as an ordinary decode failure.

use crate::DecodeError;

pub fn u8_at(bytes: &[u8], off: usize) -> Result<u8, DecodeError> {
    bytes.get(off).copied().ok_or(DecodeError::UnexpectedEof)
}

pub fn u16_at(bytes: &[u8], off: usize) -> Result<u16, DecodeError> {
    let b = bytes
        .get(off..off + 2)
        .ok_or(DecodeError::UnexpectedEof)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub fn u32_at(bytes: &[u8], off: usize) -> Result<u32, DecodeError> {
    let b = bytes
        .get(off..off + 4)
        .ok_or(DecodeError::UnexpectedEof)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn u64_at(bytes: &[u8], off: usize) -> Result<u64, DecodeError> {
    let b = bytes
        .get(off..off + 8)
        .ok_or(DecodeError::UnexpectedEof)?;
    Ok(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

/// Sign-extended 8-bit read.
pub fn i8_at(bytes: &[u8], off: usize) -> Result<i64, DecodeError> {
    Ok(u8_at(bytes, off)? as i8 as i64)
}

/// Sign-extended 16-bit read.
pub fn i16_at(bytes: &[u8], off: usize) -> Result<i64, DecodeError> {
    Ok(u16_at(bytes, off)? as i16 as i64)
}

/// Sign-extended 32-bit read.
pub fn i32_at(bytes: &[u8], off: usize) -> Result<i64, DecodeError> {
    Ok(u32_at(bytes, off)? as i32 as i64)
}

/// Unsigned read of `len` bytes (1, 2, 4 or 8), little-endian.
pub fn uint_at(bytes: &[u8], off: usize, len: usize) -> Result<u64, DecodeError> {
    match len {
        1 => Ok(u8_at(bytes, off)? as u64),
        2 => Ok(u16_at(bytes, off)? as u64),
        4 => Ok(u32_at(bytes, off)? as u64),
        8 => u64_at(bytes, off),
        _ => unreachable!("immediate length {len}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_and_idempotent() {
        let b = [0x78, 0x56, 0x34, 0x12, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert_eq!(u32_at(&b, 0).unwrap(), 0x12345678);
        assert_eq!(u32_at(&b, 0).unwrap(), 0x12345678);
        assert_eq!(u16_at(&b, 1).unwrap(), 0x3456);
        assert_eq!(u64_at(&b, 1).unwrap(), 0x01ffffffff123456);
        assert_eq!(i8_at(&b, 4).unwrap(), -1);
        assert_eq!(i32_at(&b, 4).unwrap(), -1);
    }

    #[test]
    fn short_reads_fail_cleanly() {
        let b = [0x90];
        assert_eq!(u16_at(&b, 0), Err(DecodeError::UnexpectedEof));
        assert_eq!(u8_at(&b, 1), Err(DecodeError::UnexpectedEof));
        assert_eq!(u8_at(&b, 0), Ok(0x90));
    }
}
