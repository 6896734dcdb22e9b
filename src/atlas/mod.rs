//! Texture atlas building.
//!
//! This module packs every part's textures into one square atlas and
//! produces the UV transform that moves each part into its cell.

mod packer;

pub use packer::{
    AtlasConfig, AtlasLayout, AtlasPacker, AtlasRect, AtlasSource, Placement, TextureAtlas,
    UvTransform, DEFAULT_METALLIC_ROUGHNESS, FLAT_NORMAL,
};
