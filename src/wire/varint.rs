//! LEB128-style unsigned varint encode/decode for the segment record format
//! Vanga-specific; no pack example or existing dependency supplies exactly
//! this wire shape, so it is hand-written rather than pulled from a crate.

use std::io::{self, Read, Write};

use crate::error::VangaError;

/// Appends `value` to `out` as an unsigned LEB128 varint.
pub fn write_u64<W: Write>(out: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.write_all(&[byte])?;
        if value == 0 {
            break;
        }
    }
    Ok(())
}

pub fn write_u32<W: Write>(out: &mut W, value: u32) -> io::Result<()> {
    write_u64(out, value as u64)
}

/// Reads one unsigned LEB128 varint from `input`.
///
/// Rejects encodings that would overflow a `u64` (more than 10 continuation
/// bytes) as `VangaError::ParseError`, treating it the same as any other
/// corrupted segment record.
pub fn read_u64<R: Read>(input: &mut R) -> Result<u64, VangaError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if shift >= 64 {
            return Err(VangaError::ParseError("varint too long".into()));
        }
        let mut byte = [0u8; 1];
        input
            .read_exact(&mut byte)
            .map_err(|e| VangaError::ParseError(format!("truncated varint: {e}")))?;
        let byte = byte[0];
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

pub fn read_u32<R: Read>(input: &mut R) -> Result<u32, VangaError> {
    let value = read_u64(input)?;
    u32::try_from(value).map_err(|_| VangaError::ParseError("varint overflows u32".into()))
}
