//! Bounds-checked little-endian reads over an in-memory container.
//!
//! The container format is seek-heavy: sections reference each other by
//! absolute offset, several header fields are relative to their own position,
//! and chunk bodies are skipped by end offset rather than consumed. [`Cursor`]
//! keeps that navigation explicit; flat fixed-shape records are sliced out
//! with [`Cursor::read_bytes`] and decoded by winnow field parsers living
//! next to each consumer.

use winnow::error::{ContextError, ErrMode};

use crate::error::{DecodeError, Result};

/// Common result type for winnow field parsers.
pub(crate) type WResult<T> = std::result::Result<T, ErrMode<ContextError>>;

/// Map a winnow record-parse failure to a container error at `offset`.
pub(crate) fn record_error(offset: usize, what: &str, err: ErrMode<ContextError>) -> DecodeError {
    DecodeError::MalformedContainer {
        offset,
        detail: format!("{what}: {err}"),
    }
}

/// Little-endian reader with an explicit position over the full container
/// slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current absolute offset.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Total buffer length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Seek to an absolute offset. Seeking exactly to the end is allowed;
    /// any read from there fails.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(DecodeError::InvalidOffset {
                offset: offset as i64,
                len: self.data.len(),
            });
        }
        self.pos = offset;
        Ok(())
    }

    /// Seek relative to the current position; `delta` may be negative.
    pub fn skip(&mut self, delta: i64) -> Result<()> {
        self.pos = self.offset_of(self.pos, delta)?;
        Ok(())
    }

    /// Advance to the next multiple of `pad`; no-op when already aligned.
    pub fn align(&mut self, pad: usize) -> Result<()> {
        let rem = self.pos % pad;
        if rem != 0 {
            self.seek(self.pos + (pad - rem))?;
        }
        Ok(())
    }

    /// Resolve `anchor + delta` into an absolute offset, validating that it
    /// lands inside the buffer. The format stores many offsets relative to
    /// the field holding them; callers read the field and resolve against
    /// the field's own position.
    pub fn offset_of(&self, anchor: usize, delta: i64) -> Result<usize> {
        let target = anchor as i64 + delta;
        if target < 0 || target as usize > self.data.len() {
            return Err(DecodeError::InvalidOffset {
                offset: target,
                len: self.data.len(),
            });
        }
        Ok(target as usize)
    }

    /// Borrow `n` bytes at the current position and advance past them.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodeError::OutOfBounds {
                offset: self.pos,
                need: n,
                len: self.data.len(),
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Read a 4-byte tag as raw bytes.
    pub fn read_tag(&mut self) -> Result<[u8; 4]> {
        self.read_array()
    }

    /// Read `n` raw bytes as a string, stripping trailing NULs.
    pub fn read_fixed_string(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n)?;
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Read bytes up to a NUL terminator (which is consumed), failing if the
    /// buffer ends before one is found.
    pub fn read_cstring(&mut self) -> Result<String> {
        let remaining = &self.data[self.pos..];
        let end = remaining
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::OutOfBounds {
                offset: self.pos,
                need: remaining.len() + 1,
                len: self.data.len(),
            })?;
        let out = String::from_utf8_lossy(&remaining[..end]).into_owned();
        self.pos += end + 1;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_little_endian() {
        let data = [0x01u8, 0x00, 0x00, 0x80, 0x00, 0x00, 0x80, 0x3F];
        let mut cur = Cursor::new(&data);
        assert_eq!(cur.read_i32().unwrap(), i32::MIN | 1);
        assert_eq!(cur.read_f32().unwrap(), 1.0);
        assert_eq!(cur.tell(), 8);
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let mut cur = Cursor::new(&[0u8; 3]);
        let err = cur.read_u32().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::OutOfBounds {
                offset: 0,
                need: 4,
                len: 3
            }
        ));
        // a failed read does not move the cursor
        assert_eq!(cur.tell(), 0);
    }

    #[test]
    fn seek_and_skip_validate_bounds() {
        let mut cur = Cursor::new(&[0u8; 8]);
        cur.seek(8).unwrap();
        assert!(matches!(
            cur.seek(9),
            Err(DecodeError::InvalidOffset { offset: 9, len: 8 })
        ));
        cur.skip(-3).unwrap();
        assert_eq!(cur.tell(), 5);
        assert!(matches!(
            cur.skip(-6),
            Err(DecodeError::InvalidOffset { offset: -1, len: 8 })
        ));
    }

    #[test]
    fn align_is_a_no_op_on_boundaries() {
        let mut cur = Cursor::new(&[0u8; 32]);
        cur.seek(16).unwrap();
        cur.align(0x10).unwrap();
        assert_eq!(cur.tell(), 16);
        cur.seek(17).unwrap();
        cur.align(0x10).unwrap();
        assert_eq!(cur.tell(), 32);
    }

    #[test]
    fn fixed_strings_strip_trailing_nuls_only() {
        let mut cur = Cursor::new(b"GPR\0\0\0\0\0BRNTREx86Ver2.00");
        assert_eq!(cur.read_fixed_string(8).unwrap(), "GPR");
        assert_eq!(cur.read_fixed_string(16).unwrap(), "BRNTREx86Ver2.00");
    }

    #[test]
    fn cstring_requires_a_terminator() {
        let mut cur = Cursor::new(b"mesh01\0tail");
        assert_eq!(cur.read_cstring().unwrap(), "mesh01");
        assert_eq!(cur.tell(), 7);
        assert!(matches!(
            cur.read_cstring(),
            Err(DecodeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn offset_of_rejects_negative_targets() {
        let cur = Cursor::new(&[0u8; 16]);
        assert_eq!(cur.offset_of(8, -8).unwrap(), 0);
        assert_eq!(cur.offset_of(8, 8).unwrap(), 16);
        assert!(cur.offset_of(8, -9).is_err());
        assert!(cur.offset_of(8, 9).is_err());
    }
}
