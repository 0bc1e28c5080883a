//! Per-platform vertex record layouts and attribute decoding.
//!
//! A vertex buffer is `count` packed records of a fixed stride. The stride
//! alone identifies which attributes a record carries and at which offsets;
//! the tables live in [`crate::platform`]. Positions are always three `f32`
//! at offset 0, UVs are a pair of IEEE half-floats, colors are RGBA bytes,
//! and skinning is four index bytes followed by four weight bytes.

use half::f16;

use crate::error::{DecodeError, Result};

/// Offsets of the two skinning attributes inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkinLayout {
    pub indices: usize,
    pub weights: usize,
}

/// Attribute offsets for one vertex stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: usize,
    pub uv_offset: usize,
    pub color_offset: Option<usize>,
    pub skin: Option<SkinLayout>,
}

impl VertexLayout {
    pub(crate) const fn new(stride: usize) -> Self {
        Self {
            stride,
            uv_offset: 0,
            color_offset: None,
            skin: None,
        }
    }

    pub(crate) const fn uv(mut self, offset: usize) -> Self {
        self.uv_offset = offset;
        self
    }

    pub(crate) const fn color(mut self, offset: usize) -> Self {
        self.color_offset = Some(offset);
        self
    }

    pub(crate) const fn skin(mut self, indices: usize, weights: usize) -> Self {
        self.skin = Some(SkinLayout { indices, weights });
        self
    }
}

/// Decoded vertex attributes, one entry per vertex in buffer order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexAttributes {
    pub positions: Vec<[f32; 3]>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub colors: Option<Vec<[u8; 4]>>,
    pub skin_indices: Option<Vec<[u8; 4]>>,
    pub skin_weights: Option<Vec<[f32; 4]>>,
}

fn f32_at(record: &[u8], offset: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&record[offset..offset + 4]);
    f32::from_le_bytes(raw)
}

fn f16_at(record: &[u8], offset: usize) -> f32 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&record[offset..offset + 2]);
    f16::from_bits(u16::from_le_bytes(raw)).to_f32()
}

fn check_extent(buffer: &[u8], count: usize, stride: usize) -> Result<usize> {
    count
        .checked_mul(stride)
        .filter(|&need| need <= buffer.len())
        .ok_or(DecodeError::OutOfBounds {
            offset: 0,
            need: count.saturating_mul(stride),
            len: buffer.len(),
        })
}

/// Decode every attribute the layout describes. Skin attributes are only
/// produced when `decode_skin` is set; layouts with skin offsets show up on
/// models whose skeleton sections are absent, and there the bytes are
/// meaningless.
pub(crate) fn decode_vertex_buffer(
    buffer: &[u8],
    count: usize,
    layout: &VertexLayout,
    decode_skin: bool,
) -> Result<VertexAttributes> {
    let extent = check_extent(buffer, count, layout.stride)?;
    let skin = layout.skin.filter(|_| decode_skin);
    let mut attrs = VertexAttributes {
        positions: Vec::with_capacity(count),
        uvs: Some(Vec::with_capacity(count)),
        colors: layout.color_offset.map(|_| Vec::with_capacity(count)),
        skin_indices: skin.map(|_| Vec::with_capacity(count)),
        skin_weights: skin.map(|_| Vec::with_capacity(count)),
    };
    for record in buffer[..extent].chunks_exact(layout.stride) {
        attrs
            .positions
            .push([f32_at(record, 0), f32_at(record, 4), f32_at(record, 8)]);
        if let Some(uvs) = attrs.uvs.as_mut() {
            uvs.push([
                f16_at(record, layout.uv_offset),
                f16_at(record, layout.uv_offset + 2),
            ]);
        }
        if let Some(offset) = layout.color_offset {
            if let Some(colors) = attrs.colors.as_mut() {
                let mut rgba = [0u8; 4];
                rgba.copy_from_slice(&record[offset..offset + 4]);
                colors.push(rgba);
            }
        }
        if let Some(skin) = skin {
            let mut indices = [0u8; 4];
            indices.copy_from_slice(&record[skin.indices..skin.indices + 4]);
            let mut weights = [0.0f32; 4];
            for (weight, &raw) in weights
                .iter_mut()
                .zip(&record[skin.weights..skin.weights + 4])
            {
                *weight = raw as f32 / 255.0;
            }
            if let Some(out) = attrs.skin_indices.as_mut() {
                out.push(indices);
            }
            if let Some(out) = attrs.skin_weights.as_mut() {
                out.push(weights);
            }
        }
    }
    Ok(attrs)
}

/// Fallback for strides with no known layout: positions are still at offset
/// 0, so salvage those. Strides too small to hold a position decode to
/// nothing.
pub(crate) fn decode_positions_only(
    buffer: &[u8],
    count: usize,
    stride: usize,
) -> Result<Vec<[f32; 3]>> {
    if stride < 12 {
        return Ok(Vec::new());
    }
    let extent = check_extent(buffer, count, stride)?;
    let mut positions = Vec::with_capacity(count);
    for record in buffer[..extent].chunks_exact(stride) {
        positions.push([f32_at(record, 0), f32_at(record, 4), f32_at(record, 8)]);
    }
    Ok(positions)
}
