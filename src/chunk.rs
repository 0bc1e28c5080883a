//! Tagged-chunk framing used by the mesh metadata section.
//!
//! Every chunk is a 4-byte ASCII tag followed by a `u32` body size. The
//! walker hands each chunk body to a handler and then seeks to the chunk end
//! no matter how much the handler consumed, so unknown tags and trailing
//! padding inside known ones are skipped for free.

use crate::cursor::Cursor;
use crate::error::Result;

/// Chunk tags the mesh section is known to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkTag {
    /// `STRB`, the string bank every other chunk indexes into.
    StringBank,
    /// `SAMP`, a texture sampler slot.
    Sampler,
    /// `SSTV`, one sampler view inside a `SAMP` body.
    SamplerView,
    /// `MATE`, a material record.
    Material,
    /// `VARI`, a primitive group for one layout variant.
    PrimitiveGroup,
    /// `PRIM`, one primitive inside a `VARI` body.
    Primitive,
    /// `BONE`, the bone name table.
    Bones,
    /// `BOIF`, one bone entry inside a `BONE` body.
    BoneInfo,
    /// `VERS`, the container version string.
    Version,
    Unknown([u8; 4]),
}

impl ChunkTag {
    pub fn from_tag(tag: [u8; 4]) -> Self {
        match &tag {
            b"STRB" => Self::StringBank,
            b"SAMP" => Self::Sampler,
            b"SSTV" => Self::SamplerView,
            b"MATE" => Self::Material,
            b"VARI" => Self::PrimitiveGroup,
            b"PRIM" => Self::Primitive,
            b"BONE" => Self::Bones,
            b"BOIF" => Self::BoneInfo,
            b"VERS" => Self::Version,
            _ => Self::Unknown(tag),
        }
    }
}

/// One framed chunk: its tag and the absolute offset just past its body.
#[derive(Debug, Clone, Copy)]
pub struct Chunk {
    pub tag: ChunkTag,
    /// Absolute end offset of the body. Handlers may read less; the walker
    /// seeks here afterwards.
    pub end: usize,
}

/// Iterates chunks from the current cursor position up to a fixed end offset.
#[derive(Debug, Clone, Copy)]
pub struct ChunkWalker {
    end: usize,
}

impl ChunkWalker {
    /// `end` is the absolute offset at which the chunk stream stops, usually
    /// the end of the enclosing section or parent chunk.
    pub fn new(end: usize) -> Self {
        Self { end }
    }

    /// Walk chunks, invoking `handler` with each chunk header and the cursor
    /// positioned at the start of the body. After the handler returns the
    /// cursor is moved to the chunk end, regardless of what it consumed.
    pub fn walk<F>(&self, cursor: &mut Cursor<'_>, mut handler: F) -> Result<()>
    where
        F: FnMut(Chunk, &mut Cursor<'_>) -> Result<()>,
    {
        while cursor.tell() < self.end {
            let tag = ChunkTag::from_tag(cursor.read_tag()?);
            let size = cursor.read_u32()?;
            let chunk = Chunk {
                tag,
                end: cursor.tell() + size as usize,
            };
            handler(chunk, cursor)?;
            cursor.seek(chunk.end)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn walker_restores_position_after_partial_reads() {
        let mut data = chunk(b"VERS", b"MDLv2.00\0junkjunk");
        data.extend(chunk(b"MATE", &[0u8; 4]));
        let mut cur = Cursor::new(&data);
        let mut seen = Vec::new();
        ChunkWalker::new(data.len())
            .walk(&mut cur, |chunk, cursor| {
                if chunk.tag == ChunkTag::Version {
                    // consume only part of the body
                    cursor.read_cstring()?;
                }
                seen.push(chunk.tag);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![ChunkTag::Version, ChunkTag::Material]);
        assert_eq!(cur.tell(), data.len());
    }

    #[test]
    fn unknown_chunks_are_skipped_whole() {
        let mut data = chunk(b"XXXX", &[0xAAu8; 12]);
        data.extend(chunk(b"BONE", &[0u8; 8]));
        let mut cur = Cursor::new(&data);
        let mut tags = Vec::new();
        ChunkWalker::new(data.len())
            .walk(&mut cur, |chunk, _| {
                tags.push(chunk.tag);
                Ok(())
            })
            .unwrap();
        assert_eq!(tags, vec![ChunkTag::Unknown(*b"XXXX"), ChunkTag::Bones]);
    }

    #[test]
    fn walker_stops_at_the_given_end() {
        let mut data = chunk(b"MATE", &[0u8; 4]);
        let stop = data.len();
        data.extend(chunk(b"MATE", &[0u8; 4]));
        let mut cur = Cursor::new(&data);
        let mut count = 0;
        ChunkWalker::new(stop)
            .walk(&mut cur, |_, _| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(cur.tell(), stop);
    }

    #[test]
    fn truncated_header_is_an_error() {
        let data = b"MAT"; // not even a full tag
        let mut cur = Cursor::new(data);
        assert!(
            ChunkWalker::new(data.len())
                .walk(&mut cur, |_, _| Ok(()))
                .is_err()
        );
    }
}
