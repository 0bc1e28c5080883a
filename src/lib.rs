/// Client for the animation frame service and `.mtb` clip directories.
pub mod anim;
/// Recoverable oddities the decoder reports instead of failing.
pub mod anomaly;
/// Tagged chunk framing used by the metadata sections.
pub mod chunk;
/// Bounds-checked little-endian reader over raw container bytes.
pub mod cursor;
/// Error definitions
pub mod error;
/// The container decoder: section table, mesh metadata, geometry, skeleton.
pub mod mdl;
/// Per-platform decode profiles and vertex stride tables.
pub mod platform;
/// Material assembly and on-disk texture resolution.
pub mod texture;
