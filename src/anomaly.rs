//! Recoverable data-quality diagnostics.
//!
//! The decoder never aborts on problems it can work around. Each workaround
//! leaves one of these records on the decoded model so callers can audit how
//! much of the output degraded. Structural problems that make continuing
//! meaningless are fatal [`DecodeError`](crate::error::DecodeError)s instead.

use std::fmt;

/// One recoverable problem found during a decode.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Anomaly {
    /// Vertex- and index-buffer descriptor counts disagree.
    BufferCountMismatch {
        vertex_buffers: usize,
        index_buffers: usize,
    },
    /// A sub-viability vertex buffer was dropped to realign the descriptor
    /// counts.
    DroppedVertexBuffer { descriptor: usize, stride: u32 },
    /// A stride missing from the platform's layout table; only positions were
    /// decoded for this primitive.
    UnknownVertexStride { primitive: usize, stride: u32 },
    /// A skinned vertex referenced a bone the remap table does not cover;
    /// bone 0 was substituted.
    MissingBoneRemap { primitive: usize, mesh_bone: u8 },
    /// No candidate file exists for a referenced texture.
    UnresolvedTexture { material: String, path: String },
    /// The mesh declares bones but the container carries no skeleton
    /// sections.
    SkeletonSectionsMissing { sections: usize },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferCountMismatch {
                vertex_buffers,
                index_buffers,
            } => write!(
                f,
                "{vertex_buffers} vertex buffer(s) against {index_buffers} index buffer(s)"
            ),
            Self::DroppedVertexBuffer { descriptor, stride } => {
                write!(f, "vertex buffer {descriptor} dropped (stride {stride})")
            }
            Self::UnknownVertexStride { primitive, stride } => {
                write!(f, "primitive {primitive}: unknown vertex stride {stride}")
            }
            Self::MissingBoneRemap {
                primitive,
                mesh_bone,
            } => write!(
                f,
                "primitive {primitive}: no remap entry for mesh bone {mesh_bone}"
            ),
            Self::UnresolvedTexture { material, path } => {
                write!(f, "material {material:?}: no texture file for {path:?}")
            }
            Self::SkeletonSectionsMissing { sections } => write!(
                f,
                "bones declared but the container has only {sections} section(s)"
            ),
        }
    }
}
