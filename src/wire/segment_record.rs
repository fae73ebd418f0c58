//! Segment profile on-disk record format.
//!
//! ```text
//! record  := key(8 bytes, big-endian u64) len(4 bytes, u32) payload(len bytes)
//! payload := n_segments(varint) segment*
//! segment := segment_id(varint u32) n_ts(varint) timestamp*
//! ```
//!
//! A level file is a sequence of records prefixed by a 16-byte header
//! (`"VANGA-SEGLVL\0"` plus a u32 level number) and followed by an 8-byte
//! big-endian record count trailer.

use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::VangaError;
use crate::segment::profile::{SegmentEntry, SegmentProfile};
use crate::wire::varint;

const LEVEL_MAGIC: &[u8; 13] = b"VANGA-SEGLVL\0";

/// Encodes `(key, profile)` as one `record` per §6.2, appended to `out`.
pub fn encode_record<W: Write>(out: &mut W, key: u64, profile: &SegmentProfile) -> io::Result<()> {
    out.write_u64::<BigEndian>(key)?;
    let mut payload = Vec::new();
    varint::write_u64(&mut payload, profile.entries().len() as u64)?;
    for entry in profile.entries() {
        varint::write_u32(&mut payload, entry.segment_id)?;
        varint::write_u64(&mut payload, entry.timestamps.len() as u64)?;
        for &ts in &entry.timestamps {
            varint::write_u64(&mut payload, ts)?;
        }
    }
    out.write_u32::<BigEndian>(payload.len() as u32)?;
    out.write_all(&payload)?;
    Ok(())
}

/// Decodes one `(key, profile)` record from `input`, or `Ok(None)` at a
/// clean end-of-stream (no bytes consumed before the key's first byte).
pub fn decode_record<R: Read>(input: &mut R) -> Result<Option<(u64, SegmentProfile)>, VangaError> {
    let key = match input.read_u64::<BigEndian>() {
        Ok(value) => value,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(VangaError::ParseError(format!("record key: {err}"))),
    };
    let len = input
        .read_u32::<BigEndian>()
        .map_err(|e| VangaError::ParseError(format!("record length: {e}")))?;
    let mut payload = vec![0u8; len as usize];
    input
        .read_exact(&mut payload)
        .map_err(|e| VangaError::ParseError(format!("record payload: {e}")))?;
    let mut cursor = Cursor::new(payload);

    let n_segments = varint::read_u64(&mut cursor)?;
    let mut entries = Vec::with_capacity(n_segments as usize);
    for _ in 0..n_segments {
        let segment_id = varint::read_u32(&mut cursor)?;
        let n_ts = varint::read_u64(&mut cursor)?;
        let mut timestamps = Vec::with_capacity(n_ts as usize);
        for _ in 0..n_ts {
            timestamps.push(varint::read_u64(&mut cursor)?);
        }
        entries.push(SegmentEntry {
            segment_id,
            timestamps,
        });
    }
    Ok(Some((key, SegmentProfile::from_entries(entries))))
}

/// Writes a level file header: magic plus the level number.
pub fn write_level_header<W: Write>(out: &mut W, level: u32) -> io::Result<()> {
    out.write_all(LEVEL_MAGIC)?;
    out.write_u32::<BigEndian>(level)?;
    Ok(())
}

/// Reads and validates a level file header, returning the level number.
pub fn read_level_header<R: Read>(input: &mut R) -> Result<u32, VangaError> {
    let mut magic = [0u8; 13];
    input
        .read_exact(&mut magic)
        .map_err(|e| VangaError::ParseError(format!("level header: {e}")))?;
    if &magic != LEVEL_MAGIC {
        return Err(VangaError::ParseError(
            "bad level file magic".to_string(),
        ));
    }
    input
        .read_u32::<BigEndian>()
        .map_err(|e| VangaError::ParseError(format!("level number: {e}")))
}

pub fn write_level_trailer<W: Write>(out: &mut W, record_count: u64) -> io::Result<()> {
    out.write_u64::<BigEndian>(record_count)
}

pub fn read_level_trailer<R: Read>(input: &mut R) -> Result<u64, VangaError> {
    input
        .read_u64::<BigEndian>()
        .map_err(|e| VangaError::ParseError(format!("level trailer: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::profile::SegmentEntry;

    fn sample_profile() -> SegmentProfile {
        SegmentProfile::from_entries(vec![
            SegmentEntry {
                segment_id: 1,
                timestamps: vec![10, 20, 30],
            },
            SegmentEntry {
                segment_id: 7,
                timestamps: vec![5],
            },
        ])
    }

    #[test]
    fn record_round_trips() {
        let mut buf = Vec::new();
        encode_record(&mut buf, 42, &sample_profile()).unwrap();
        let mut cursor = Cursor::new(buf);
        let (key, profile) = decode_record(&mut cursor).unwrap().unwrap();
        assert_eq!(key, 42);
        assert_eq!(profile, sample_profile());
    }

    #[test]
    fn decode_at_clean_eof_returns_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(decode_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn multiple_records_decode_in_sequence() {
        let mut buf = Vec::new();
        encode_record(&mut buf, 1, &sample_profile()).unwrap();
        encode_record(&mut buf, 2, &SegmentProfile::empty()).unwrap();
        let mut cursor = Cursor::new(buf);
        let (k1, _) = decode_record(&mut cursor).unwrap().unwrap();
        let (k2, p2) = decode_record(&mut cursor).unwrap().unwrap();
        assert_eq!(k1, 1);
        assert_eq!(k2, 2);
        assert!(p2.is_empty());
        assert!(decode_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn level_header_round_trips_and_rejects_bad_magic() {
        let mut buf = Vec::new();
        write_level_header(&mut buf, 3).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_level_header(&mut cursor).unwrap(), 3);

        let mut bad = Cursor::new(vec![0u8; 17]);
        assert!(read_level_header(&mut bad).is_err());
    }

    #[test]
    fn level_trailer_round_trips() {
        let mut buf = Vec::new();
        write_level_trailer(&mut buf, 12345).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_level_trailer(&mut cursor).unwrap(), 12345);
    }
}
