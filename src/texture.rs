//! Material assembly and on-disk texture resolution.
//!
//! The container stores texture references as authoring-time paths; only the
//! basename survives into the shipped file layout. Resolution tries each of
//! the profile's extensions in the container's directory first, then in the
//! shared `mdltex` directory one level up. Sampler roles map onto the four
//! material slots; roles the profile (or the config) marks ignored are
//! skipped before any filesystem probing.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::anomaly::Anomaly;
use crate::mdl::DecodeConfig;
use crate::mdl::mesh::{MeshMetadata, SamplerEntry};
use crate::platform::{PlatformProfile, TextureFormat};

/// Sibling directory holding textures shared between containers.
pub(crate) const SHARED_TEXTURE_DIR: &str = "mdltex";

/// Semantic slot a sampler role maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureRole {
    Albedo,
    Normal,
    Specular,
    Environment,
}

impl TextureRole {
    /// `Speculer0` is the engine's own spelling; `Diffuse0` is the handheld
    /// alias for the albedo slot.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Albedo0" | "Diffuse0" => Some(Self::Albedo),
            "Normal0" => Some(Self::Normal),
            "Speculer0" => Some(Self::Specular),
            "envTexture" => Some(Self::Environment),
            _ => None,
        }
    }
}

/// A resolved texture file, handed to the external texture decoder as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TextureRef {
    pub path: PathBuf,
    pub format: TextureFormat,
}

/// One material with its resolved texture slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Material {
    pub name: String,
    pub albedo: Option<TextureRef>,
    pub normal: Option<TextureRef>,
    pub specular: Option<TextureRef>,
    pub environment: Option<TextureRef>,
}

/// Build the material list, resolving textures when a search directory is
/// available. With `skip_textures` set or no directory configured the
/// materials come back name-only.
pub(crate) fn resolve_materials(
    mesh: &MeshMetadata,
    profile: &PlatformProfile,
    config: &DecodeConfig,
    anomalies: &mut Vec<Anomaly>,
) -> Vec<Material> {
    let search_dir = if config.skip_textures {
        None
    } else {
        config.texture_dir.as_deref()
    };
    let mut materials = Vec::with_capacity(mesh.materials.len());
    for record in &mesh.materials {
        let name = mesh
            .strings
            .get(record.name_sid)
            .unwrap_or_default()
            .to_owned();
        let mut material = Material {
            name,
            ..Default::default()
        };
        if let Some(dir) = search_dir {
            if record.texture_slot >= 0 {
                if let Some(entries) = mesh.samplers.get(&record.texture_slot) {
                    for entry in entries {
                        apply_sampler(&mut material, entry, mesh, profile, config, dir, anomalies);
                    }
                }
            }
        }
        materials.push(material);
    }
    materials
}

/// Resolve one sampler entry into a material slot. Later entries for the
/// same role overwrite earlier ones.
fn apply_sampler(
    material: &mut Material,
    entry: &SamplerEntry,
    mesh: &MeshMetadata,
    profile: &PlatformProfile,
    config: &DecodeConfig,
    dir: &Path,
    anomalies: &mut Vec<Anomaly>,
) {
    let Some(role_name) = mesh.strings.get(entry.role_sid) else {
        return;
    };
    let ignored = match &config.ignored_roles {
        Some(roles) => roles.iter().any(|r| r == role_name),
        None => profile.ignored_roles.iter().any(|r| *r == role_name),
    };
    if ignored {
        return;
    }
    let Some(role) = TextureRole::from_name(role_name) else {
        return;
    };
    if config.albedo_only && role != TextureRole::Albedo {
        return;
    }
    let Some(stored) = mesh.strings.get(entry.path_sid) else {
        return;
    };
    match resolve_texture_path(dir, stored, &profile.texture_extensions) {
        Some(path) => {
            let texture = TextureRef {
                path,
                format: profile.texture_format,
            };
            match role {
                TextureRole::Albedo => material.albedo = Some(texture),
                TextureRole::Normal => material.normal = Some(texture),
                TextureRole::Specular => material.specular = Some(texture),
                TextureRole::Environment => material.environment = Some(texture),
            }
        }
        None => {
            warn!(
                "no texture file found for \"{stored}\" (material \"{}\")",
                material.name
            );
            anomalies.push(Anomaly::UnresolvedTexture {
                material: material.name.clone(),
                path: stored.to_owned(),
            });
        }
    }
}

/// Stored paths keep authoring-time directories and extensions; only the
/// stem matters on disk.
fn normalized_basename(stored: &str) -> &str {
    let name = stored.rsplit(['/', '\\']).next().unwrap_or(stored);
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

fn resolve_texture_path(dir: &Path, stored: &str, extensions: &[&str; 2]) -> Option<PathBuf> {
    let base = normalized_basename(stored);
    let shared = dir.parent().map(|p| p.join(SHARED_TEXTURE_DIR));
    for dir in [Some(dir.to_path_buf()), shared].iter().flatten() {
        for ext in extensions {
            let candidate = dir.join(format!("{base}{ext}"));
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    use crate::mdl::mesh::{MaterialRecord, StringBank};

    fn touch(path: &Path) {
        fs::write(path, b"tex").unwrap();
    }

    fn win_profile() -> PlatformProfile {
        PlatformProfile::select(*b"WIN\0", None).unwrap()
    }

    fn mesh_with(
        strings: &[&str],
        materials: Vec<MaterialRecord>,
        samplers: HashMap<i32, Vec<SamplerEntry>>,
    ) -> MeshMetadata {
        MeshMetadata {
            strings: StringBank {
                strings: strings.iter().map(|s| s.to_string()).collect(),
            },
            materials,
            samplers,
            ..Default::default()
        }
    }

    fn material(texture_slot: i32) -> MaterialRecord {
        MaterialRecord {
            material_id: 0,
            name_sid: 0,
            name2_sid: 0,
            texture_slot,
        }
    }

    fn sampler(role_sid: i32, path_sid: i32) -> SamplerEntry {
        SamplerEntry {
            role_sid,
            path_sid,
            prefix_sid: -1,
        }
    }

    #[test]
    fn candidates_prefer_container_dir_over_shared() {
        let root = tempfile::tempdir().unwrap();
        let model_dir = root.path().join("model");
        let shared = root.path().join("mdltex");
        fs::create_dir_all(&model_dir).unwrap();
        fs::create_dir_all(&shared).unwrap();
        touch(&model_dir.join("face.dds"));
        touch(&shared.join("face.mds"));
        let profile = win_profile();
        let path =
            resolve_texture_path(&model_dir, "art\\chr\\face.tga", &profile.texture_extensions)
                .unwrap();
        // the secondary extension in the container dir beats the primary in
        // the shared dir
        assert_eq!(path, model_dir.join("face.dds"));
    }

    #[test]
    fn candidates_fall_back_to_shared_dir_in_extension_order() {
        let root = tempfile::tempdir().unwrap();
        let model_dir = root.path().join("model");
        let shared = root.path().join("mdltex");
        fs::create_dir_all(&model_dir).unwrap();
        fs::create_dir_all(&shared).unwrap();
        touch(&shared.join("eye.mds"));
        touch(&shared.join("eye.dds"));
        let profile = win_profile();
        let path =
            resolve_texture_path(&model_dir, "eye.tga", &profile.texture_extensions).unwrap();
        assert_eq!(path, shared.join("eye.mds"));
        assert!(
            resolve_texture_path(&model_dir, "missing.tga", &profile.texture_extensions).is_none()
        );
    }

    #[test]
    fn resolves_roles_into_material_slots() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("model");
        fs::create_dir_all(&dir).unwrap();
        touch(&dir.join("body.mds"));
        touch(&dir.join("body_n.mds"));
        let mesh = mesh_with(
            &["mat", "Albedo0", "Normal0", "body.tga", "body_n.tga"],
            vec![material(0)],
            HashMap::from([(0, vec![sampler(1, 3), sampler(2, 4)])]),
        );
        let config = DecodeConfig {
            texture_dir: Some(dir.clone()),
            ..Default::default()
        };
        let mut anomalies = Vec::new();
        let materials = resolve_materials(&mesh, &win_profile(), &config, &mut anomalies);
        assert_eq!(materials.len(), 1);
        let mat = &materials[0];
        assert_eq!(mat.name, "mat");
        assert_eq!(mat.albedo.as_ref().unwrap().path, dir.join("body.mds"));
        assert_eq!(mat.albedo.as_ref().unwrap().format, TextureFormat::Dds);
        assert_eq!(mat.normal.as_ref().unwrap().path, dir.join("body_n.mds"));
        // roles absent from the sampler list stay empty
        assert!(mat.specular.is_none());
        assert!(mat.environment.is_none());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn unresolved_textures_record_an_anomaly() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("model");
        fs::create_dir_all(&dir).unwrap();
        let mesh = mesh_with(
            &["mat", "Albedo0", "gone.tga"],
            vec![material(0)],
            HashMap::from([(0, vec![sampler(1, 2)])]),
        );
        let config = DecodeConfig {
            texture_dir: Some(dir),
            ..Default::default()
        };
        let mut anomalies = Vec::new();
        let materials = resolve_materials(&mesh, &win_profile(), &config, &mut anomalies);
        assert!(materials[0].albedo.is_none());
        assert_eq!(
            anomalies,
            vec![Anomaly::UnresolvedTexture {
                material: "mat".to_owned(),
                path: "gone.tga".to_owned(),
            }]
        );
    }

    #[test]
    fn ignored_roles_are_skipped_before_probing() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("model");
        fs::create_dir_all(&dir).unwrap();
        touch(&dir.join("line.mds"));
        let mesh = mesh_with(
            &["mat", "Outline0", "line.tga", "Normal0"],
            vec![material(0)],
            HashMap::from([(0, vec![sampler(1, 2), sampler(3, 2)])]),
        );
        // profile default ignores Outline0; the override ignores Normal0
        // instead
        let default_config = DecodeConfig {
            texture_dir: Some(dir.clone()),
            ..Default::default()
        };
        let mut anomalies = Vec::new();
        let materials = resolve_materials(&mesh, &win_profile(), &default_config, &mut anomalies);
        assert!(materials[0].normal.is_some());
        assert!(anomalies.is_empty());

        let override_config = DecodeConfig {
            texture_dir: Some(dir),
            ignored_roles: Some(vec!["Normal0".to_owned()]),
            ..Default::default()
        };
        let materials = resolve_materials(&mesh, &win_profile(), &override_config, &mut anomalies);
        assert!(materials[0].normal.is_none());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn albedo_only_restricts_resolution() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("model");
        fs::create_dir_all(&dir).unwrap();
        touch(&dir.join("body.mds"));
        touch(&dir.join("body_n.mds"));
        let mesh = mesh_with(
            &["mat", "Albedo0", "Normal0", "body.tga", "body_n.tga"],
            vec![material(0)],
            HashMap::from([(0, vec![sampler(1, 3), sampler(2, 4)])]),
        );
        let config = DecodeConfig {
            texture_dir: Some(dir),
            albedo_only: true,
            ..Default::default()
        };
        let mut anomalies = Vec::new();
        let materials = resolve_materials(&mesh, &win_profile(), &config, &mut anomalies);
        assert!(materials[0].albedo.is_some());
        assert!(materials[0].normal.is_none());
    }

    #[test]
    fn unslotted_materials_stay_name_only() {
        let mesh = mesh_with(
            &["mat", "Albedo0", "body.tga"],
            vec![material(-1)],
            HashMap::from([(0, vec![sampler(1, 2)])]),
        );
        let config = DecodeConfig {
            texture_dir: Some(PathBuf::from("/nonexistent")),
            ..Default::default()
        };
        let mut anomalies = Vec::new();
        let materials = resolve_materials(&mesh, &win_profile(), &config, &mut anomalies);
        assert_eq!(materials[0], Material {
            name: "mat".to_owned(),
            ..Default::default()
        });
        assert!(anomalies.is_empty());
    }

    #[test]
    fn skip_textures_short_circuits_resolution() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("model");
        fs::create_dir_all(&dir).unwrap();
        touch(&dir.join("body.mds"));
        let mesh = mesh_with(
            &["mat", "Albedo0", "body.tga"],
            vec![material(0)],
            HashMap::from([(0, vec![sampler(1, 2)])]),
        );
        let config = DecodeConfig {
            texture_dir: Some(dir),
            skip_textures: true,
            ..Default::default()
        };
        let mut anomalies = Vec::new();
        let materials = resolve_materials(&mesh, &win_profile(), &config, &mut anomalies);
        assert!(materials[0].albedo.is_none());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn basenames_strip_directories_and_extensions() {
        assert_eq!(normalized_basename("art\\chr\\face.tga"), "face");
        assert_eq!(normalized_basename("tex/sub/eye.gim"), "eye");
        assert_eq!(normalized_basename("plain"), "plain");
        assert_eq!(normalized_basename("dotted.name.dds"), "dotted.name");
    }
}
