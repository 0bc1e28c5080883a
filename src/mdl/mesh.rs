//! Parser for the mesh metadata section.
//!
//! Section 0 of a container is a `MESH` chunk stream describing everything
//! except the raw geometry: the string bank, material and primitive records,
//! texture sampler assignments, and the bone name table. All cross references
//! between records go through string bank indices (sids).

use std::collections::HashMap;

use tracing::debug;
use winnow::Parser;
use winnow::binary::le_i32;
use winnow::token::take;

use crate::chunk::{ChunkTag, ChunkWalker};
use crate::cursor::{Cursor, WResult, record_error};
use crate::error::{DecodeError, Result, fourcc};

/// The shared string table all other chunks index into.
#[derive(Debug, Clone, Default)]
pub struct StringBank {
    pub(crate) strings: Vec<String>,
}

impl StringBank {
    /// Look up a string by sid. Negative and out-of-range sids resolve to
    /// `None`; the format uses `-1` for "no string".
    pub fn get(&self, sid: i32) -> Option<&str> {
        usize::try_from(sid)
            .ok()
            .and_then(|i| self.strings.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// One texture reference inside a sampler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerEntry {
    /// Sid of the role name, e.g. `Albedo0` or `Normal0`.
    pub role_sid: i32,
    /// Sid of the stored texture path.
    pub path_sid: i32,
    /// Sid of a path prefix, `-1` when absent.
    pub prefix_sid: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialRecord {
    pub material_id: i32,
    pub name_sid: i32,
    pub name2_sid: i32,
    /// Sampler slot carrying this material's textures, `-1` for none.
    pub texture_slot: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveRecord {
    pub mesh_id: i32,
    pub geom_name_sid: i32,
    pub name_sid: i32,
    pub material_id: i32,
}

/// Everything decoded from the mesh metadata section.
#[derive(Debug, Clone, Default)]
pub struct MeshMetadata {
    pub strings: StringBank,
    pub materials: Vec<MaterialRecord>,
    pub primitives: Vec<PrimitiveRecord>,
    /// Sampler entries grouped by slot id.
    pub samplers: HashMap<i32, Vec<SamplerEntry>>,
    pub bones_present: bool,
    /// Bone id to name, from the `BONE` table.
    pub bone_names: HashMap<i32, String>,
    /// Container version string, when a `VERS` chunk is present.
    pub version: Option<String>,
}

fn parse_sampler_fields(input: &mut &[u8]) -> WResult<SamplerEntry> {
    let role_sid = le_i32.parse_next(input)?;
    let path_sid = le_i32.parse_next(input)?;
    let prefix_sid = le_i32.parse_next(input)?;
    Ok(SamplerEntry {
        role_sid,
        path_sid,
        prefix_sid,
    })
}

fn parse_material_fields(input: &mut &[u8]) -> WResult<MaterialRecord> {
    let material_id = le_i32.parse_next(input)?;
    let name_sid = le_i32.parse_next(input)?;
    let name2_sid = le_i32.parse_next(input)?;
    let _unknown: &[u8] = take(12usize).parse_next(input)?;
    let _related_slot = le_i32.parse_next(input)?;
    let texture_slot = le_i32.parse_next(input)?;
    Ok(MaterialRecord {
        material_id,
        name_sid,
        name2_sid,
        texture_slot,
    })
}

fn parse_primitive_fields(input: &mut &[u8]) -> WResult<PrimitiveRecord> {
    let mesh_id = le_i32.parse_next(input)?;
    let geom_name_sid = le_i32.parse_next(input)?;
    let name_sid = le_i32.parse_next(input)?;
    let _unknown: &[u8] = take(8usize).parse_next(input)?;
    let material_id = le_i32.parse_next(input)?;
    let _unknown2 = le_i32.parse_next(input)?;
    Ok(PrimitiveRecord {
        mesh_id,
        geom_name_sid,
        name_sid,
        material_id,
    })
}

const SAMPLER_VIEW_LEN: usize = 12;
const MATERIAL_LEN: usize = 32;
const PRIMITIVE_LEN: usize = 28;

/// Parse the metadata section starting at `offset`.
pub(crate) fn parse_mesh_section(cursor: &mut Cursor<'_>, offset: usize) -> Result<MeshMetadata> {
    cursor.seek(offset)?;
    let tag = cursor.read_tag()?;
    if &tag != b"MESH" {
        return Err(DecodeError::MalformedContainer {
            offset,
            detail: format!("expected a MESH section, found \"{}\"", fourcc(&tag)),
        });
    }
    let size = cursor.read_u32()?;
    let end = cursor.tell() + size as usize;

    let mut mesh = MeshMetadata::default();
    ChunkWalker::new(end).walk(cursor, |chunk, cursor| {
        match chunk.tag {
            ChunkTag::StringBank => parse_string_bank(cursor, &mut mesh.strings)?,
            ChunkTag::Sampler => {
                let slot = cursor.read_i32()?;
                let mut entries = Vec::new();
                ChunkWalker::new(chunk.end).walk(cursor, |view, cursor| {
                    if view.tag == ChunkTag::SamplerView {
                        let record_offset = cursor.tell();
                        let mut input = cursor.read_bytes(SAMPLER_VIEW_LEN)?;
                        let entry = parse_sampler_fields(&mut input)
                            .map_err(|e| record_error(record_offset, "sampler view record", e))?;
                        entries.push(entry);
                    }
                    Ok(())
                })?;
                mesh.samplers.entry(slot).or_default().extend(entries);
            }
            ChunkTag::Material => {
                let record_offset = cursor.tell();
                let mut input = cursor.read_bytes(MATERIAL_LEN)?;
                let record = parse_material_fields(&mut input)
                    .map_err(|e| record_error(record_offset, "material record", e))?;
                mesh.materials.push(record);
            }
            ChunkTag::PrimitiveGroup => {
                cursor.skip(16)?;
                ChunkWalker::new(chunk.end).walk(cursor, |prim, cursor| {
                    if prim.tag == ChunkTag::Primitive {
                        let record_offset = cursor.tell();
                        let mut input = cursor.read_bytes(PRIMITIVE_LEN)?;
                        let record = parse_primitive_fields(&mut input)
                            .map_err(|e| record_error(record_offset, "primitive record", e))?;
                        mesh.primitives.push(record);
                    }
                    Ok(())
                })?;
            }
            ChunkTag::Bones => {
                mesh.bones_present = true;
                let _ = cursor.read_i32()?;
                ChunkWalker::new(chunk.end).walk(cursor, |info, cursor| {
                    if info.tag == ChunkTag::BoneInfo {
                        let name_sid = cursor.read_i32()?;
                        let id = cursor.read_i32()?;
                        if let Some(name) = mesh.strings.get(name_sid) {
                            mesh.bone_names.insert(id, name.to_owned());
                        }
                    }
                    Ok(())
                })?;
            }
            ChunkTag::Version => {
                mesh.version = Some(cursor.read_cstring()?);
            }
            // Stray sub-chunks outside their parents carry nothing useful.
            ChunkTag::SamplerView | ChunkTag::Primitive | ChunkTag::BoneInfo => {}
            ChunkTag::Unknown(tag) => {
                debug!("skipping unrecognized mesh chunk \"{}\"", fourcc(&tag));
            }
        }
        Ok(())
    })?;

    debug!(
        "mesh metadata: {} strings, {} materials, {} primitives",
        mesh.strings.len(),
        mesh.materials.len(),
        mesh.primitives.len()
    );
    Ok(mesh)
}

fn parse_string_bank(cursor: &mut Cursor<'_>, bank: &mut StringBank) -> Result<()> {
    let count = cursor.read_i32()?;
    let marker = cursor.read_tag()?;
    if &marker != b"STRL" {
        return Err(DecodeError::MalformedContainer {
            offset: cursor.tell() - 4,
            detail: format!("expected STRL in string bank, found \"{}\"", fourcc(&marker)),
        });
    }
    cursor.skip(4)?;
    for _ in 0..count {
        bank.strings.push(cursor.read_cstring()?);
    }
    Ok(())
}
