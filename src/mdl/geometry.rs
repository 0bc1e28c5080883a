//! Parser for the geometry section.
//!
//! The section is a resource heap: a descriptor table names every buffer
//! twice, once in a "near" region holding small headers (counts, strides)
//! and once in a "far" region holding the bulk data. Vertex buffers
//! (`VXBF`), index buffers (`IXBF`), and stream descriptors (`VXST`) pair
//! up positionally, and the *i*-th pair is the *i*-th primitive of the mesh
//! metadata. Mismatched buffer counts are repaired rather than rejected;
//! every repair leaves an [`Anomaly`] behind.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use itertools::Itertools;
use tracing::{debug, warn};
use winnow::Parser;
use winnow::binary::le_u32;
use winnow::token::take;

use crate::anomaly::Anomaly;
use crate::cursor::{Cursor, WResult, record_error};
use crate::error::{DecodeError, Result, fourcc};
use crate::mdl::mesh::MeshMetadata;
use crate::mdl::skeleton::BoneRemapTable;
use crate::mdl::vertex_format::{VertexAttributes, decode_positions_only, decode_vertex_buffer};
use crate::mdl::{DecodeConfig, DecodedPrimitive, SkinBuffer};
use crate::platform::{IndexTopology, PlatformProfile, alt_layout_offsets};

const STRIP_RESTART: u16 = 0xFFFF;
/// Smallest stride that can still carry a position and a UV pair. Buffers
/// below this are header debris, the first candidates for count repair.
const MIN_VIABLE_STRIDE: u32 = 20;
const DESCRIPTOR_LEN: usize = 0x20;

/// One 0x20-byte resource descriptor from the heap header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionDescriptor {
    pub tag: [u8; 4],
    pub id: u32,
    pub near_offset: u32,
    pub near_size: u32,
    pub far_offset: u32,
    pub far_size: u32,
    pub flags: u32,
}

fn parse_descriptor_fields(input: &mut &[u8]) -> WResult<SectionDescriptor> {
    let tag: &[u8] = take(4usize).parse_next(input)?;
    let id = le_u32.parse_next(input)?;
    let _unused = le_u32.parse_next(input)?;
    let near_offset = le_u32.parse_next(input)?;
    let near_size = le_u32.parse_next(input)?;
    let far_offset = le_u32.parse_next(input)?;
    let far_size = le_u32.parse_next(input)?;
    let flags = le_u32.parse_next(input)?;
    Ok(SectionDescriptor {
        tag: [tag[0], tag[1], tag[2], tag[3]],
        id,
        near_offset,
        near_size,
        far_offset,
        far_size,
        flags,
    })
}

struct VertexBuffer {
    des: SectionDescriptor,
    count: u32,
    stride: u32,
}

/// Parse the geometry section at `offset`, returning the model name and the
/// decoded primitives in pair order.
pub(crate) fn parse_geometry_section(
    cursor: &mut Cursor<'_>,
    offset: usize,
    mesh: &MeshMetadata,
    profile: &PlatformProfile,
    remap: Option<&BoneRemapTable>,
    config: &DecodeConfig,
    anomalies: &mut Vec<Anomaly>,
) -> Result<(String, Vec<DecodedPrimitive>)> {
    cursor.seek(offset)?;
    let marker = cursor.read_cstring()?;
    if marker != "GPR" {
        return Err(DecodeError::MalformedContainer {
            offset,
            detail: format!("expected a GPR geometry section, found {marker:?}"),
        });
    }

    // The far region base is anchored at +0x10 and displaced by the u32 at
    // +0x28.
    let far_anchor = cursor.offset_of(offset, 0x10)?;
    let far_field = cursor.offset_of(offset, 0x28)?;
    cursor.seek(far_field)?;
    let far_delta = cursor.read_u32()?;
    let far_base = cursor.offset_of(far_anchor, far_delta.into())?;

    let heap_offset = cursor.offset_of(offset, 0x40)?;
    cursor.seek(heap_offset)?;
    let heap_tag = cursor.read_tag()?;
    if &heap_tag != b"HEAP" {
        return Err(DecodeError::MalformedContainer {
            offset: heap_offset,
            detail: format!("expected a HEAP header, found \"{}\"", fourcc(&heap_tag)),
        });
    }
    let _ = cursor.read_u32()?;
    let _ = cursor.read_u32()?;
    let _table_size = cursor.read_u32()?;
    let _ = cursor.read_u32()?;
    let heap_size = cursor.read_u32()?;
    let _ = cursor.read_u32()?;
    let descriptor_count = cursor.read_u32()? as usize;

    let table_start = cursor.tell();
    let table = cursor.read_bytes(descriptor_count * DESCRIPTOR_LEN)?;
    let mut descriptors = Vec::with_capacity(descriptor_count);
    for (idx, record) in table.chunks_exact(DESCRIPTOR_LEN).enumerate() {
        let mut input = record;
        let des = parse_descriptor_fields(&mut input)
            .map_err(|e| record_error(table_start + idx * DESCRIPTOR_LEN, "section descriptor", e))?;
        descriptors.push(des);
    }

    cursor.skip(heap_size.into())?;
    let model_name = cursor.read_cstring()?;
    cursor.align(0x10)?;
    let near_base = cursor.tell();
    debug!(
        "geometry \"{model_name}\": near base 0x{near_base:X}, far base 0x{far_base:X}, {} descriptors",
        descriptors.len()
    );

    let mut index_descs = Vec::new();
    let mut stream_descs = Vec::new();
    let mut vertex_descs = Vec::new();
    for des in &descriptors {
        match &des.tag {
            b"IXBF" => index_descs.push(*des),
            b"VXBF" => vertex_descs.push(*des),
            b"VXST" => stream_descs.push(*des),
            _ => {}
        }
    }

    let mut declared_counts = Vec::with_capacity(stream_descs.len());
    for des in &stream_descs {
        let pos = cursor.offset_of(
            near_base,
            i64::from(des.near_offset) + profile.stream_count_offset as i64,
        )?;
        cursor.seek(pos)?;
        declared_counts.push(cursor.read_u32()?);
    }

    let mut vertex_buffers = Vec::with_capacity(vertex_descs.len());
    for des in vertex_descs {
        let pos = cursor.offset_of(near_base, i64::from(des.near_offset) + 0x8)?;
        cursor.seek(pos)?;
        let count = cursor.read_u32()?;
        let stride = cursor.read_u32()?;
        vertex_buffers.push(VertexBuffer { des, count, stride });
    }

    if vertex_buffers.len() != index_descs.len() {
        warn!(
            "vertex/index buffer counts diverge: {} vertex, {} index",
            vertex_buffers.len(),
            index_descs.len()
        );
        anomalies.push(Anomaly::BufferCountMismatch {
            vertex_buffers: vertex_buffers.len(),
            index_buffers: index_descs.len(),
        });
    }
    if vertex_buffers.len() > index_descs.len() {
        let excess = vertex_buffers.len() - index_descs.len();
        let mut dropped = 0;
        let mut kept = Vec::new();
        for (idx, buffer) in vertex_buffers.into_iter().enumerate() {
            if dropped < excess && buffer.stride < MIN_VIABLE_STRIDE {
                warn!(
                    "dropping vertex buffer {idx} (stride {}) to realign with index buffers",
                    buffer.stride
                );
                anomalies.push(Anomaly::DroppedVertexBuffer {
                    descriptor: idx,
                    stride: buffer.stride,
                });
                dropped += 1;
            } else {
                kept.push(buffer);
            }
        }
        vertex_buffers = kept;
    }

    let pair_count = vertex_buffers.len().min(index_descs.len());
    let mut primitives = Vec::with_capacity(pair_count);
    for (i, buffer) in vertex_buffers.iter().take(pair_count).enumerate() {
        let record = mesh.primitives.get(i);
        let name = record
            .and_then(|p| mesh.strings.get(p.geom_name_sid))
            .map(str::to_owned)
            .unwrap_or_else(|| format!("primitive_{i}"));
        let material_index = record
            .and_then(|p| usize::try_from(p.material_id).ok())
            .filter(|&m| m < mesh.materials.len());

        let vert_offset = cursor.offset_of(far_base, i64::from(buffer.des.far_offset))?;
        cursor.seek(vert_offset)?;
        let vert_data = cursor.read_bytes(buffer.des.far_size as usize)?;
        let count = buffer.count as usize;
        let alt = alt_layout_offsets(&model_name).contains(&buffer.des.far_offset);
        let attrs = match profile.stride_layout(buffer.stride, alt) {
            Some(layout) => decode_vertex_buffer(vert_data, count, &layout, remap.is_some())?,
            None => {
                warn!(
                    "unknown vertex stride {} on primitive {i}, decoding positions only",
                    buffer.stride
                );
                anomalies.push(Anomaly::UnknownVertexStride {
                    primitive: i,
                    stride: buffer.stride,
                });
                VertexAttributes {
                    positions: decode_positions_only(vert_data, count, buffer.stride as usize)?,
                    ..Default::default()
                }
            }
        };

        let skin = match (attrs.skin_indices, attrs.skin_weights, remap) {
            (Some(indices), Some(weights), Some(remap)) => {
                Some(remap_skin(i, &indices, weights, remap, anomalies))
            }
            _ => None,
        };

        let declared = declared_counts.get(i).copied().unwrap_or(0);
        let idx_offset = cursor.offset_of(far_base, i64::from(index_descs[i].far_offset))?;
        cursor.seek(idx_offset)?;
        let triangles = match profile.index_topology {
            IndexTopology::StripRestart => decode_strip(cursor, declared)?,
            IndexTopology::TriangleList => decode_list(cursor, declared)?,
        };

        let mut primitive = DecodedPrimitive {
            name,
            material_index,
            positions: attrs.positions,
            uvs: attrs.uvs,
            colors: attrs.colors,
            skin,
            triangles,
        };
        if profile.flip_uv {
            if let Some(uvs) = primitive.uvs.as_mut() {
                for uv in uvs {
                    uv[1] = -uv[1];
                }
            }
        }
        if config.optimize.unwrap_or(profile.optimize) {
            optimize_primitive(&mut primitive);
        }
        debug!(
            "primitive {i} \"{}\": {} vertices, {} triangles",
            primitive.name,
            primitive.positions.len(),
            primitive.triangles.len()
        );
        primitives.push(primitive);
    }

    Ok((model_name, primitives))
}

/// Remap skin indices from mesh-local to skeleton ids. Zero-weight
/// influences keep their raw index untouched; a nonzero-weight miss
/// substitutes bone 0.
fn remap_skin(
    primitive: usize,
    indices: &[[u8; 4]],
    weights: Vec<[f32; 4]>,
    remap: &BoneRemapTable,
    anomalies: &mut Vec<Anomaly>,
) -> SkinBuffer {
    let mut out = Vec::with_capacity(indices.len());
    for (vertex, weight_row) in indices.iter().zip(&weights) {
        let mut row = [0u16; 4];
        for (slot, (&mesh_bone, &weight)) in vertex.iter().zip(weight_row).enumerate() {
            row[slot] = if weight == 0.0 {
                u16::from(mesh_bone)
            } else {
                match remap.skeleton_id(mesh_bone) {
                    Some(id) => id as u16,
                    None => {
                        warn!("no skeleton mapping for mesh bone {mesh_bone} on primitive {primitive}");
                        anomalies.push(Anomaly::MissingBoneRemap {
                            primitive,
                            mesh_bone,
                        });
                        0
                    }
                }
            };
        }
        out.push(row);
    }
    SkinBuffer {
        indices: out,
        weights,
    }
}

struct IndexStream<'c, 'a> {
    cursor: &'c mut Cursor<'a>,
    consumed: u32,
}

impl IndexStream<'_, '_> {
    fn next_index(&mut self) -> Result<u16> {
        self.consumed += 1;
        self.cursor.read_u16()
    }
}

/// Decode a restart-marked triangle strip. `declared` counts indices, not
/// triangles; fewer than three declared indices decode to no triangles.
fn decode_strip(cursor: &mut Cursor<'_>, declared: u32) -> Result<Vec<[u16; 3]>> {
    if declared < 3 {
        return Ok(Vec::new());
    }
    let mut stream = IndexStream {
        cursor,
        consumed: 0,
    };
    let mut triangles = Vec::new();
    let mut f1 = stream.next_index()?;
    let mut f2 = stream.next_index()?;
    let mut flipped = true;
    while stream.consumed < declared {
        let f3 = stream.next_index()?;
        if f3 == STRIP_RESTART {
            f1 = stream.next_index()?;
            f2 = stream.next_index()?;
            flipped = true;
        } else {
            flipped = !flipped;
            if f1 != f2 && f2 != f3 && f3 != f1 {
                triangles.push(if flipped { [f1, f3, f2] } else { [f1, f2, f3] });
            }
            f1 = f2;
            f2 = f3;
        }
    }
    Ok(triangles)
}

/// Decode a flat index list, three indices per triangle. A trailing partial
/// triple is dropped.
fn decode_list(cursor: &mut Cursor<'_>, declared: u32) -> Result<Vec<[u16; 3]>> {
    let data = cursor.read_bytes(declared as usize * 2)?;
    Ok(data
        .chunks_exact(2)
        .map(|raw| u16::from_le_bytes([raw[0], raw[1]]))
        .tuples()
        .map(|(a, b, c)| [a, b, c])
        .collect())
}

fn gather<T: Copy>(values: &[T], keep: &[usize]) -> Vec<T> {
    keep.iter().map(|&v| values[v]).collect()
}

/// Merge vertices whose attributes are bit-identical and rebuild the
/// triangle list against the compacted order.
fn optimize_primitive(primitive: &mut DecodedPrimitive) {
    let vertex_count = primitive.positions.len();
    let mut seen: HashMap<Vec<u8>, u16> = HashMap::new();
    let mut remap = Vec::with_capacity(vertex_count);
    let mut keep = Vec::new();
    for vertex in 0..vertex_count {
        match seen.entry(vertex_key(primitive, vertex)) {
            Entry::Occupied(slot) => remap.push(*slot.get()),
            Entry::Vacant(slot) => {
                let compacted = keep.len() as u16;
                slot.insert(compacted);
                keep.push(vertex);
                remap.push(compacted);
            }
        }
    }
    if keep.len() == vertex_count {
        return;
    }
    debug!(
        "optimize pass: {} of {vertex_count} vertices kept",
        keep.len()
    );

    let positions = std::mem::take(&mut primitive.positions);
    primitive.positions = gather(&positions, &keep);
    if let Some(uvs) = primitive.uvs.take() {
        primitive.uvs = Some(gather(&uvs, &keep));
    }
    if let Some(colors) = primitive.colors.take() {
        primitive.colors = Some(gather(&colors, &keep));
    }
    if let Some(skin) = primitive.skin.take() {
        primitive.skin = Some(SkinBuffer {
            indices: gather(&skin.indices, &keep),
            weights: gather(&skin.weights, &keep),
        });
    }
    for triangle in &mut primitive.triangles {
        for index in triangle {
            *index = remap.get(*index as usize).copied().unwrap_or(*index);
        }
    }
}

fn vertex_key(primitive: &DecodedPrimitive, vertex: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(48);
    for v in primitive.positions[vertex] {
        key.extend_from_slice(&v.to_bits().to_le_bytes());
    }
    if let Some(uvs) = &primitive.uvs {
        for v in uvs[vertex] {
            key.extend_from_slice(&v.to_bits().to_le_bytes());
        }
    }
    if let Some(colors) = &primitive.colors {
        key.extend_from_slice(&colors[vertex]);
    }
    if let Some(skin) = &primitive.skin {
        for b in skin.indices[vertex] {
            key.extend_from_slice(&b.to_le_bytes());
        }
        for w in skin.weights[vertex] {
            key.extend_from_slice(&w.to_bits().to_le_bytes());
        }
    }
    key
}
