//! Parsers for the two skeleton sections.
//!
//! Skinned containers carry a `BRNTRE` remap section, translating the
//! mesh-local bone indices found in vertex skin bytes into skeleton bone
//! ids, and a `60SE` hierarchy section holding the skeleton itself: bone
//! names, parent links, and local rest transforms. Both sections are
//! optional as a pair; a container without them decodes as a static model.

use std::collections::HashMap;

use winnow::Parser;
use winnow::binary::{le_f32, le_i16, le_u32};
use winnow::token::take;

use crate::cursor::{Cursor, WResult, record_error};
use crate::error::{DecodeError, Result};

const REMAP_RECORD_LEN: usize = 0x58;
const TRANSFORM_RECORD_LEN: usize = 0x30;

/// Mesh-local bone index to skeleton bone id.
#[derive(Debug, Clone, Default)]
pub struct BoneRemapTable {
    pub(crate) map: HashMap<i16, i16>,
}

impl BoneRemapTable {
    /// Skeleton bone id for a mesh-local bone index, when one is mapped.
    pub fn skeleton_id(&self, mesh_bone: u8) -> Option<i16> {
        self.map.get(&i16::from(mesh_bone)).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One skeleton bone in hierarchy order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Bone {
    pub name: String,
    /// Index of the parent bone, `-1` for the root.
    pub parent: i32,
    /// Rest rotation as a quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub translation: [f32; 3],
}

impl Bone {
    /// Column-major local rest matrix built from the rotation and
    /// translation.
    pub fn local_matrix(&self) -> [[f32; 4]; 4] {
        let [x, y, z, w] = self.rotation;
        let [tx, ty, tz] = self.translation;
        [
            [
                1.0 - 2.0 * (y * y + z * z),
                2.0 * (x * y + w * z),
                2.0 * (x * z - w * y),
                0.0,
            ],
            [
                2.0 * (x * y - w * z),
                1.0 - 2.0 * (x * x + z * z),
                2.0 * (y * z + w * x),
                0.0,
            ],
            [
                2.0 * (x * z + w * y),
                2.0 * (y * z - w * x),
                1.0 - 2.0 * (x * x + y * y),
                0.0,
            ],
            [tx, ty, tz, 1.0],
        ]
    }
}

fn parse_remap_fields(input: &mut &[u8]) -> WResult<(i16, i16)> {
    let _ = le_u32.parse_next(input)?;
    let _name: &[u8] = take(16usize).parse_next(input)?;
    let id = le_i16.parse_next(input)?;
    let _pair: &[u8] = take(4usize).parse_next(input)?;
    let mesh_id = le_i16.parse_next(input)?;
    let _pad: &[u8] = take(0x3Cusize).parse_next(input)?;
    Ok((id, mesh_id))
}

fn parse_transform_fields(input: &mut &[u8]) -> WResult<([f32; 4], [f32; 3])> {
    let mut rotation = [0.0f32; 4];
    for v in &mut rotation {
        *v = le_f32.parse_next(input)?;
    }
    let mut translation = [0.0f32; 3];
    for v in &mut translation {
        *v = le_f32.parse_next(input)?;
    }
    let _pad: &[u8] = take(0x14usize).parse_next(input)?;
    Ok((rotation, translation))
}

/// Parse the `BRNTRE` remap section at `offset`. Records whose mesh id is
/// `-1` belong to the skeleton only and are left out of the table.
pub(crate) fn parse_remap_section(cursor: &mut Cursor<'_>, offset: usize) -> Result<BoneRemapTable> {
    cursor.seek(offset)?;
    let magic = cursor.read_bytes(16)?;
    if !magic.starts_with(b"BRNTRE") {
        return Err(DecodeError::MalformedContainer {
            offset,
            detail: "expected a BRNTRE bone remap section".to_owned(),
        });
    }
    let bone_count = cursor.read_u32()? as usize;
    let _mesh_mapped = cursor.read_u32()?;
    cursor.skip(8)?;

    let table_start = cursor.tell();
    let table = cursor.read_bytes(bone_count * REMAP_RECORD_LEN)?;
    let mut remap = BoneRemapTable::default();
    for (idx, record) in table.chunks_exact(REMAP_RECORD_LEN).enumerate() {
        let mut input = record;
        let (id, mesh_id) = parse_remap_fields(&mut input).map_err(|e| {
            record_error(
                table_start + idx * REMAP_RECORD_LEN,
                "bone remap record",
                e,
            )
        })?;
        if mesh_id != -1 {
            remap.map.insert(mesh_id, id);
        }
    }
    Ok(remap)
}

/// Parse the `60SE` hierarchy section at `offset` into bones in table
/// order.
pub(crate) fn parse_hierarchy_section(cursor: &mut Cursor<'_>, offset: usize) -> Result<Vec<Bone>> {
    cursor.seek(offset)?;
    let tag = cursor.read_tag()?;
    if &tag != b"60SE" {
        return Err(DecodeError::MalformedContainer {
            offset,
            detail: "expected a 60SE skeleton hierarchy section".to_owned(),
        });
    }
    cursor.skip(0xC)?;
    let bone_count = cursor.read_u32()? as usize;
    let _ = cursor.read_u32()?;
    let anchor = cursor.tell();
    let rel = cursor.read_i32()?;
    let matrix_offset = cursor.offset_of(anchor, rel.into())?;
    cursor.skip(0x14)?;
    let anchor = cursor.tell();
    let rel = cursor.read_i32()?;
    let names_header = cursor.offset_of(anchor, rel.into())?;
    cursor.skip(8)?;
    let pair_count = cursor.read_u32()? as usize;
    cursor.skip(8)?;
    let pairs = cursor.read_bytes(pair_count * 4)?;

    // Name entries are self-relative offsets, one per bone.
    cursor.seek(cursor.offset_of(names_header, 0x1C)?)?;
    let mut name_offsets = Vec::new();
    for _ in 0..bone_count {
        let anchor = cursor.tell();
        let rel = cursor.read_i32()?;
        name_offsets.push(cursor.offset_of(anchor, rel.into())?);
    }
    let mut names = Vec::with_capacity(name_offsets.len());
    for name_offset in name_offsets {
        cursor.seek(name_offset)?;
        names.push(cursor.read_cstring()?);
    }

    cursor.seek(matrix_offset)?;
    let table = cursor.read_bytes(bone_count * TRANSFORM_RECORD_LEN)?;

    let mut parents = vec![-1i32; bone_count];
    for pair in pairs.chunks_exact(4) {
        let child = pair[0] as usize;
        if child < bone_count {
            parents[child] = if pair[0] == pair[2] {
                -1
            } else {
                i32::from(pair[2])
            };
        }
    }

    let mut bones = Vec::with_capacity(bone_count);
    for (idx, ((name, parent), record)) in names
        .into_iter()
        .zip(parents)
        .zip(table.chunks_exact(TRANSFORM_RECORD_LEN))
        .enumerate()
    {
        let mut input = record;
        let (rotation, translation) = parse_transform_fields(&mut input).map_err(|e| {
            record_error(
                matrix_offset + idx * TRANSFORM_RECORD_LEN,
                "bone transform record",
                e,
            )
        })?;
        bones.push(Bone {
            name,
            parent,
            rotation,
            translation,
        });
    }
    Ok(bones)
}
