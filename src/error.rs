use thiserror::Error;

/// Fatal decode failures. Any of these aborts the whole decode; problems the
/// parser can work around are reported as [`Anomaly`](crate::anomaly::Anomaly)
/// records on the decoded model instead.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("read of {need} byte(s) at 0x{offset:X} runs past the end of the buffer (len 0x{len:X})")]
    OutOfBounds {
        offset: usize,
        need: usize,
        len: usize,
    },
    #[error("seek target {offset} is outside the buffer (len 0x{len:X})")]
    InvalidOffset { offset: i64, len: usize },
    #[error("malformed container at 0x{offset:X}: {detail}")]
    MalformedContainer { offset: usize, detail: String },
    #[error("unsupported platform tag \"{}\"", fourcc(.tag))]
    UnsupportedPlatform { tag: [u8; 4] },
}

/// Printable form of a 4-byte tag for diagnostics.
pub fn fourcc(tag: &[u8; 4]) -> String {
    tag.iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}

pub type Result<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_masks_non_printable_bytes() {
        assert_eq!(fourcc(b"MESH"), "MESH");
        assert_eq!(fourcc(b"GPR\0"), "GPR.");
        assert_eq!(fourcc(&[0x00, 0xFF, b'A', 0x7F]), "..A.");
    }

    #[test]
    fn errors_render_offsets_in_hex() {
        let err = DecodeError::OutOfBounds {
            offset: 0x40,
            need: 4,
            len: 0x42,
        };
        assert_eq!(
            err.to_string(),
            "read of 4 byte(s) at 0x40 runs past the end of the buffer (len 0x42)"
        );
    }
}
