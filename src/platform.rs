//! Platform detection and per-platform decode profiles.
//!
//! The same container shell carries three geometry flavors. The geometry
//! section names its platform with a 4-byte tag, and everything that differs
//! downstream (index topology, header layout, vertex strides, texture
//! formats) hangs off the [`PlatformProfile`] selected from that tag.

use std::fmt;

use crate::error::{DecodeError, Result};
use crate::mdl::vertex_format::VertexLayout;

/// Hardware target a container was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Platform {
    Win,
    Psp,
    Vita,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Win => write!(f, "Windows"),
            Platform::Psp => write!(f, "PSP"),
            Platform::Vita => write!(f, "Vita"),
        }
    }
}

/// How an index buffer encodes triangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTopology {
    /// Triangle strips with `0xFFFF` restart markers.
    StripRestart,
    /// A flat list of three indices per triangle.
    TriangleList,
}

/// On-disk texture container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TextureFormat {
    Dds,
    Gim,
    Gxt,
}

impl TextureFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextureFormat::Dds => "dds",
            TextureFormat::Gim => "gim",
            TextureFormat::Gxt => "gxt",
        }
    }
}

/// Everything platform-specific the decoder consults.
#[derive(Debug, Clone, Copy)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub index_topology: IndexTopology,
    /// Offset of the stream count inside a vertex-stream descriptor.
    pub stream_count_offset: usize,
    /// Extensions tried when resolving texture paths, in preference order.
    pub texture_extensions: [&'static str; 2],
    pub texture_format: TextureFormat,
    /// Whether decoded V coordinates must be negated.
    pub flip_uv: bool,
    /// Whether decoded primitives get the vertex dedup pass by default.
    pub optimize: bool,
    /// Sampler roles skipped during material resolution.
    pub ignored_roles: &'static [&'static str],
}

impl PlatformProfile {
    /// Pick the profile for a geometry platform tag. Handheld containers
    /// share one tag; the newer revision is told apart by its version
    /// string.
    pub fn select(tag: [u8; 4], version: Option<&str>) -> Result<Self> {
        match &tag {
            b"WIN\0" => Ok(Self::win()),
            b"PSP\0" => {
                if version.is_some_and(|v| v.starts_with("MDLv2")) {
                    Ok(Self::vita())
                } else {
                    Ok(Self::psp())
                }
            }
            _ => Err(DecodeError::UnsupportedPlatform { tag }),
        }
    }

    fn win() -> Self {
        Self {
            platform: Platform::Win,
            index_topology: IndexTopology::StripRestart,
            stream_count_offset: 0x18,
            texture_extensions: [".mds", ".dds"],
            texture_format: TextureFormat::Dds,
            flip_uv: false,
            optimize: false,
            ignored_roles: &["Outline0", "Custom0"],
        }
    }

    fn psp() -> Self {
        Self {
            platform: Platform::Psp,
            index_topology: IndexTopology::TriangleList,
            stream_count_offset: 0x14,
            texture_extensions: [".gim", ".tm2"],
            texture_format: TextureFormat::Gim,
            flip_uv: true,
            optimize: true,
            ignored_roles: &["Outline0", "Custom0", "Occlusion0", "Emissive0"],
        }
    }

    fn vita() -> Self {
        Self {
            platform: Platform::Vita,
            texture_extensions: [".gxt", ".dds"],
            texture_format: TextureFormat::Gxt,
            ..Self::psp()
        }
    }

    /// Attribute layout for a vertex stride, or `None` when the stride is
    /// not one this platform is known to emit. `alt` selects the alternate
    /// 44-byte layout some desktop models use.
    pub(crate) fn stride_layout(&self, stride: u32, alt: bool) -> Option<VertexLayout> {
        match self.platform {
            Platform::Win => win_stride_layout(stride, alt),
            Platform::Psp | Platform::Vita => handheld_stride_layout(stride),
        }
    }
}

fn win_stride_layout(stride: u32, alt: bool) -> Option<VertexLayout> {
    let layout = match stride {
        24 => VertexLayout::new(24).uv(0x14),
        28 => VertexLayout::new(28).uv(0x18),
        32 => VertexLayout::new(32).uv(0x18),
        36 => VertexLayout::new(36).uv(0x18).color(0x20),
        40 => VertexLayout::new(40).uv(0x18).skin(0x20, 0x24),
        44 if alt => VertexLayout::new(44).uv(0x18).skin(0x24, 0x28),
        44 => VertexLayout::new(44).uv(0x18).skin(0x20, 0x24).color(0x28),
        48 => VertexLayout::new(48).uv(0x18).color(0x2C),
        _ => return None,
    };
    Some(layout)
}

fn handheld_stride_layout(stride: u32) -> Option<VertexLayout> {
    let layout = match stride {
        20 => VertexLayout::new(20).uv(0x0C),
        24 => VertexLayout::new(24).uv(0x10).color(0x14),
        28 => VertexLayout::new(28).uv(0x10).skin(0x14, 0x18),
        32 => VertexLayout::new(32).uv(0x10).skin(0x14, 0x18).color(0x1C),
        _ => return None,
    };
    Some(layout)
}

/// Vertex-buffer far offsets at which a model uses the alternate 44-byte
/// layout. Keyed by model name; only a handful of desktop models do this.
pub(crate) fn alt_layout_offsets(model_name: &str) -> &'static [u32] {
    match model_name {
        "SV1310_PS4" => &[0x47A70],
        "SV0803_PS4" => &[0x592C0],
        _ => &[],
    }
}
