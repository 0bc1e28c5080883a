//! Decoder for the chunked model container.
//!
//! A container is a small section table followed by independent sections:
//! mesh metadata in section 0, platform geometry in section 1, and, on
//! skinned models, a bone remap table in section 3 plus the skeleton
//! hierarchy in section 4. [`decode_model`] stitches them into a
//! [`DecodedModel`]; [`decode_model_file`] is the memory-mapping front door
//! for whole files.

pub mod geometry;
pub mod mesh;
pub mod skeleton;
pub mod vertex_format;

use std::fs::File;
use std::path::{Path, PathBuf};

use bon::Builder;
use memmap2::MmapOptions;
use rootcause::prelude::*;
use tracing::{debug, warn};

use self::skeleton::Bone;
use crate::anomaly::Anomaly;
use crate::cursor::Cursor;
use crate::error::{DecodeError, Result, fourcc};
use crate::platform::{Platform, PlatformProfile};
use crate::texture::{self, Material};

/// Every container opens with these bytes.
const CONTAINER_MAGIC: [u8; 4] = *b"KPKy";
/// The geometry section names its platform at this offset.
const PLATFORM_TAG_OFFSET: i64 = 0x4;

/// Options steering a decode.
#[derive(Builder, Debug, Clone, Default)]
pub struct DecodeConfig {
    /// Directory searched for texture files. [`decode_model_file`] defaults
    /// this to the container's own directory.
    pub texture_dir: Option<PathBuf>,
    /// Skip texture resolution entirely; materials come back name-only.
    #[builder(default)]
    pub skip_textures: bool,
    /// Resolve only the albedo slot of each material.
    #[builder(default)]
    pub albedo_only: bool,
    /// Force the vertex dedup pass on or off instead of taking the platform
    /// default.
    pub optimize: Option<bool>,
    /// Sampler roles to skip, replacing the platform's ignore list.
    pub ignored_roles: Option<Vec<String>>,
}

/// A fully decoded container.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DecodedModel {
    pub platform: Platform,
    /// Name embedded in the geometry section.
    pub model_name: String,
    pub materials: Vec<Material>,
    /// Skeleton in hierarchy order, empty for unskinned models.
    pub bones: Vec<Bone>,
    pub primitives: Vec<DecodedPrimitive>,
    /// Recoverable oddities encountered during the decode.
    pub anomalies: Vec<Anomaly>,
}

/// One renderable primitive with its decoded attributes.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DecodedPrimitive {
    pub name: String,
    /// Index into [`DecodedModel::materials`], when the primitive record
    /// names a valid one.
    pub material_index: Option<usize>,
    pub positions: Vec<[f32; 3]>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub colors: Option<Vec<[u8; 4]>>,
    pub skin: Option<SkinBuffer>,
    pub triangles: Vec<[u16; 3]>,
}

/// Per-vertex skinning data with indices already remapped to skeleton bone
/// ids.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SkinBuffer {
    pub indices: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
}

/// Read the section offset table at the head of a container.
fn parse_section_table(cursor: &mut Cursor<'_>) -> Result<Vec<u32>> {
    let magic = cursor.read_tag()?;
    if magic != CONTAINER_MAGIC {
        return Err(DecodeError::MalformedContainer {
            offset: 0,
            detail: format!("bad container magic \"{}\"", fourcc(&magic)),
        });
    }
    let count = cursor.read_u32()? as usize;
    let _reserved = cursor.read_u32()?;
    let table = cursor.read_bytes(count * 4)?;
    let offsets = table
        .chunks_exact(4)
        .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .collect();
    // the size table that follows is not needed for decoding
    cursor.skip(count as i64 * 4)?;
    Ok(offsets)
}

/// Decode a container held in memory.
pub fn decode_model(data: &[u8], config: &DecodeConfig) -> Result<DecodedModel> {
    let mut cursor = Cursor::new(data);
    let offsets = parse_section_table(&mut cursor)?;
    if offsets.len() < 2 {
        return Err(DecodeError::MalformedContainer {
            offset: 0,
            detail: format!(
                "container has {} section(s), need mesh and geometry",
                offsets.len()
            ),
        });
    }
    debug!("container with {} sections", offsets.len());

    let mut anomalies = Vec::new();
    let mesh = mesh::parse_mesh_section(&mut cursor, offsets[0] as usize)?;

    let tag_pos = cursor.offset_of(offsets[1] as usize, PLATFORM_TAG_OFFSET)?;
    cursor.seek(tag_pos)?;
    let tag = cursor.read_tag()?;
    let profile = PlatformProfile::select(tag, mesh.version.as_deref())?;
    debug!("decoding {} geometry", profile.platform);

    let materials = texture::resolve_materials(&mesh, &profile, config, &mut anomalies);

    let (remap, bones) = if mesh.bones_present {
        match offsets[..] {
            [_, _, _, remap_offset, hierarchy_offset, ..] => {
                let remap = skeleton::parse_remap_section(&mut cursor, remap_offset as usize)?;
                let bones =
                    skeleton::parse_hierarchy_section(&mut cursor, hierarchy_offset as usize)?;
                (Some(remap), bones)
            }
            _ => {
                warn!(
                    "model declares bones but the container only has {} sections",
                    offsets.len()
                );
                anomalies.push(Anomaly::SkeletonSectionsMissing {
                    sections: offsets.len(),
                });
                (None, Vec::new())
            }
        }
    } else {
        (None, Vec::new())
    };

    let (model_name, primitives) = geometry::parse_geometry_section(
        &mut cursor,
        offsets[1] as usize,
        &mesh,
        &profile,
        remap.as_ref(),
        config,
        &mut anomalies,
    )?;

    Ok(DecodedModel {
        platform: profile.platform,
        model_name,
        materials,
        bones,
        primitives,
        anomalies,
    })
}

/// Decode a container file. The file is memory mapped, and when the config
/// names no texture directory the file's own directory is searched.
pub fn decode_model_file(
    path: &Path,
    config: &DecodeConfig,
) -> std::result::Result<DecodedModel, Report> {
    let file = File::open(path).context_with(|| format!("could not open {}", path.display()))?;
    let data = unsafe { MmapOptions::new().map(&file) }
        .context_with(|| format!("could not map {}", path.display()))?;
    let mut config = config.clone();
    if config.texture_dir.is_none() && !config.skip_textures {
        config.texture_dir = path.parent().map(Path::to_path_buf);
    }
    let model = decode_model(&data, &config)
        .context_with(|| format!("could not decode {}", path.display()))?;
    Ok(model)
}
