//! # Avatar Export
//!
//! Combines independently authored avatar parts into one drawable model with
//! a single texture atlas, and writes it as GLB or as a VRM humanoid avatar.
//!
//! ## Overview
//!
//! An export runs four stages in sequence:
//!
//! 1. [`AtlasPacker`] places every part's texture in one square atlas.
//! 2. [`GeometryMerger`] concatenates part meshes, rewrites UVs into atlas
//!    space and rebinds skins to one combined skeleton.
//! 3. [`SceneGraphBuilder`] assembles the glTF document, with the VRM
//!    extension for the avatar format.
//! 4. [`BinaryEncoder`] writes the container.
//!
//! ## Quick Start
//!
//! ```ignore
//! use avatar_export::{export, load_avatar, ExportFormat};
//!
//! let avatar = load_avatar("path/to/avatar.zip")?;
//! let out = export(&avatar, ExportFormat::Avatar, 2048)?;
//! std::fs::write(out.suggested_file_name(), &out.bytes)?;
//! ```
//!
//! ## Building avatars in code
//!
//! ```ignore
//! use avatar_export::{AvatarNode, Part, PartMesh, PartMaterial, TextureData};
//!
//! let body = Part::new(
//!     PartMesh::new(positions, indices).with_uvs(uvs),
//!     PartMaterial::new(TextureData::new(256, 256, pixels)),
//! );
//! let avatar = AvatarNode::new("avatar").with_child(AvatarNode::new("body").with_part(body));
//! ```

pub mod atlas;
pub mod avatar;
pub mod error;
pub mod export;
pub mod merge;
pub mod pipeline;
pub mod types;

// Re-export main types for convenience
pub use atlas::{AtlasConfig, AtlasLayout, AtlasPacker, TextureAtlas};
pub use avatar::{
    AvatarMeta, AvatarNode, BodyProportions, Bone, HumanBone, HumanoidMetadata, Part,
    PartMaterial, PartMesh, PartSkin, TextureData,
};
pub use error::{ErrorKind, ExportError, Result};
pub use export::{read_container, BinaryEncoder, DecodedContainer, SceneDocument, SceneGraphBuilder};
pub use merge::{CombinedSkeleton, GeometryMerger, MergedMesh};
pub use pipeline::{
    export, export_with_config, ExportBuffer, ExportConfig, ExportFormat, ExportKind, Exporter,
    GltfContainer,
};
pub use types::{BoundingBox, Rgb, Transform};

/// Load an avatar pack from a file path (ZIP or directory).
pub fn load_avatar<P: AsRef<std::path::Path>>(path: P) -> Result<AvatarNode> {
    avatar::loader::load_from_path(path)
}

/// Load an avatar pack from ZIP bytes (for WASM compatibility).
pub fn load_avatar_from_bytes(data: &[u8]) -> Result<AvatarNode> {
    avatar::loader::load_from_bytes(data)
}

#[cfg(feature = "wasm")]
pub mod wasm;
