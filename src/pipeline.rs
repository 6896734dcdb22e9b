//! The export entry point: pack, merge, build, encode.

use crate::atlas::{AtlasConfig, AtlasPacker};
use crate::avatar::{AvatarNode, HumanoidMetadata};
use crate::error::{ExportError, Result};
use crate::export::{BinaryEncoder, SceneDocument, SceneGraphBuilder};
use crate::merge::GeometryMerger;
use crate::types::Rgb;
use std::fmt;
use std::str::FromStr;

/// Filename stem used when none is configured.
pub const DEFAULT_FILE_NAME: &str = "AvatarCreatorModel";

const MIN_ATLAS_SIZE: u32 = 256;
const MAX_ATLAS_SIZE: u32 = 8192;

/// Target asset format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// Plain glTF 2.0.
    #[default]
    Generic,
    /// glTF with the VRM humanoid extension and chunk.
    Avatar,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" | "glb" | "gltf" => Ok(ExportFormat::Generic),
            "avatar" | "vrm" => Ok(ExportFormat::Avatar),
            other => Err(ExportError::InvalidConfiguration(format!(
                "unknown export format '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Generic => write!(f, "generic"),
            ExportFormat::Avatar => write!(f, "avatar"),
        }
    }
}

/// How a generic export is packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GltfContainer {
    /// One binary `.glb`.
    #[default]
    Binary,
    /// A `.gltf` text document plus a `.bin` buffer.
    Separate,
}

impl FromStr for GltfContainer {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "glb" => Ok(GltfContainer::Binary),
            "separate" | "gltf" => Ok(GltfContainer::Separate),
            other => Err(ExportError::InvalidConfiguration(format!(
                "unknown container '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for GltfContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GltfContainer::Binary => write!(f, "binary"),
            GltfContainer::Separate => write!(f, "separate"),
        }
    }
}

/// Configuration for an export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// Atlas width and height; a power of two in [256, 8192].
    pub atlas_size: u32,
    pub format: ExportFormat,
    /// Color treated as background in transparent parts.
    pub chroma_key: Rgb,
    /// RGB distance within which a pixel matches the chroma key.
    pub chroma_tolerance: f32,
    /// Longest side any one part's texture may occupy in the atlas.
    pub max_texture_size: u32,
    /// Gutter between atlas cells.
    pub padding: u32,
    /// Largest difference at which two bind poses are the same.
    pub bind_pose_tolerance: f32,
    pub container: GltfContainer,
    /// Largest single binary container, in bytes.
    pub container_limit: u64,
    /// Filename stem of the produced artifacts.
    pub file_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            atlas_size: 4096,
            format: ExportFormat::Generic,
            chroma_key: Rgb::default(),
            chroma_tolerance: 0.0,
            max_texture_size: 1024,
            padding: 2,
            bind_pose_tolerance: 1e-5,
            container: GltfContainer::Binary,
            container_limit: u32::MAX as u64,
            file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }
}

impl ExportConfig {
    pub fn with_atlas_size(mut self, size: u32) -> Self {
        self.atlas_size = size;
        self
    }

    /// Set the format. The last call wins.
    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_chroma_key(mut self, key: Rgb, tolerance: f32) -> Self {
        self.chroma_key = key;
        self.chroma_tolerance = tolerance;
        self
    }

    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }

    pub fn with_padding(mut self, padding: u32) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_bind_pose_tolerance(mut self, tolerance: f32) -> Self {
        self.bind_pose_tolerance = tolerance;
        self
    }

    pub fn with_container(mut self, container: GltfContainer) -> Self {
        self.container = container;
        self
    }

    pub fn with_container_limit(mut self, limit: u64) -> Self {
        self.container_limit = limit;
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Check every field, reporting the first bad one.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ExportError::InvalidConfiguration(msg));

        if !self.atlas_size.is_power_of_two()
            || !(MIN_ATLAS_SIZE..=MAX_ATLAS_SIZE).contains(&self.atlas_size)
        {
            return invalid(format!(
                "atlas size {} must be a power of two in [{}, {}]",
                self.atlas_size, MIN_ATLAS_SIZE, MAX_ATLAS_SIZE
            ));
        }
        if !self.chroma_tolerance.is_finite() || self.chroma_tolerance < 0.0 {
            return invalid(format!(
                "chroma tolerance {} must be finite and non-negative",
                self.chroma_tolerance
            ));
        }
        if self.max_texture_size == 0 {
            return invalid("max texture size must be at least 1".to_string());
        }
        if self.padding >= self.atlas_size {
            return invalid(format!(
                "padding {} must be smaller than the {} pixel atlas",
                self.padding, self.atlas_size
            ));
        }
        if !self.bind_pose_tolerance.is_finite() || self.bind_pose_tolerance < 0.0 {
            return invalid(format!(
                "bind pose tolerance {} must be finite and non-negative",
                self.bind_pose_tolerance
            ));
        }
        if self.container_limit == 0 {
            return invalid("container limit must be positive".to_string());
        }
        Ok(())
    }

    /// The configured stem, or the default when empty.
    pub fn effective_file_name(&self) -> &str {
        let trimmed = self.file_name.trim();
        if trimmed.is_empty() {
            DEFAULT_FILE_NAME
        } else {
            trimmed
        }
    }

    fn atlas_config(&self) -> AtlasConfig {
        AtlasConfig {
            size: self.atlas_size,
            padding: self.padding,
            max_texture_size: self.max_texture_size.min(self.atlas_size),
            chroma_key: self.chroma_key,
            chroma_tolerance: self.chroma_tolerance,
        }
    }
}

/// Kind of artifact an export produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Glb,
    /// `.gltf` text with a `.bin` sidecar.
    Gltf,
    Vrm,
}

impl ExportKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportKind::Glb => "model/gltf-binary",
            ExportKind::Gltf => "model/gltf+json",
            ExportKind::Vrm => "application/octet-stream",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportKind::Glb => "glb",
            ExportKind::Gltf => "gltf",
            ExportKind::Vrm => "vrm",
        }
    }
}

/// The bytes of one export, owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBuffer {
    pub kind: ExportKind,
    /// Filename stem; see [`suggested_file_name`](Self::suggested_file_name).
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// The external buffer of a [`ExportKind::Gltf`] export.
    pub sidecar: Option<Vec<u8>>,
}

impl ExportBuffer {
    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn suggested_file_name(&self) -> String {
        format!("{}.{}", self.file_name, self.kind.extension())
    }

    pub fn sidecar_file_name(&self) -> Option<String> {
        self.sidecar.as_ref().map(|_| format!("{}.bin", self.file_name))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Runs the export pipeline with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    config: ExportConfig,
}

impl Exporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Validate, pack, merge and build, stopping short of encoding.
    pub fn build_document(&self, avatar: &AvatarNode) -> Result<SceneDocument> {
        self.config.validate()?;

        let parts = avatar.parts();
        if parts.is_empty() {
            return Err(ExportError::MalformedInput(format!(
                "avatar '{}' has no parts with geometry",
                avatar.name
            )));
        }
        for part in &parts {
            part.part.mesh.validate(part.name)?;
            part.part.material.validate(part.name)?;
        }
        if parts.iter().all(|p| p.part.mesh.indices.is_empty()) {
            return Err(ExportError::MalformedInput(format!(
                "avatar '{}' has no triangles",
                avatar.name
            )));
        }

        let humanoid = self.humanoid_for_format(avatar)?;

        let materials: Vec<_> = parts.iter().map(|p| &p.part.material).collect();
        let atlas = AtlasPacker::new(self.config.atlas_config()).build(&materials)?;

        let merged = GeometryMerger::new(self.config.bind_pose_tolerance)
            .merge(&parts, &atlas.layout)?;

        SceneGraphBuilder::new(root_name(avatar)).build(&merged, &atlas, humanoid)
    }

    /// Run the whole pipeline. Nothing is returned unless every stage succeeds.
    pub fn export(&self, avatar: &AvatarNode) -> Result<ExportBuffer> {
        let doc = self.build_document(avatar)?;
        let encoder = BinaryEncoder::new().with_container_limit(self.config.container_limit);
        let file_name = self.config.effective_file_name().to_string();

        let separate = match self.config.format {
            ExportFormat::Avatar => false,
            ExportFormat::Generic => match self.config.container {
                GltfContainer::Separate => true,
                GltfContainer::Binary if !encoder.fits(&doc)? => {
                    log::warn!(
                        "scene exceeds the {} byte container limit; writing a separate buffer",
                        encoder.container_limit()
                    );
                    true
                }
                GltfContainer::Binary => false,
            },
        };

        let buffer = if separate {
            let out = encoder.encode_separate(&doc, &format!("{}.bin", file_name))?;
            ExportBuffer {
                kind: ExportKind::Gltf,
                file_name,
                bytes: out.gltf,
                sidecar: Some(out.bin),
            }
        } else {
            let kind = match self.config.format {
                ExportFormat::Generic => ExportKind::Glb,
                ExportFormat::Avatar => ExportKind::Vrm,
            };
            ExportBuffer {
                kind,
                file_name,
                bytes: encoder.encode_glb(&doc)?,
                sidecar: None,
            }
        };

        log::debug!(
            "exported {} ({} bytes, {})",
            buffer.suggested_file_name(),
            buffer.len(),
            buffer.mime_type()
        );
        Ok(buffer)
    }

    fn humanoid_for_format<'a>(&self, avatar: &'a AvatarNode) -> Result<Option<&'a HumanoidMetadata>> {
        match self.config.format {
            ExportFormat::Generic => Ok(None),
            ExportFormat::Avatar => SceneGraphBuilder::select_humanoid(avatar)
                .map(Some)
                .ok_or_else(|| {
                    ExportError::InvalidConfiguration(
                        "the avatar format needs humanoid metadata on some node".to_string(),
                    )
                }),
        }
    }
}

fn root_name(avatar: &AvatarNode) -> &str {
    if avatar.name.is_empty() {
        "Avatar"
    } else {
        &avatar.name
    }
}

/// Export `avatar` in `format` with a square atlas of `atlas_size` pixels.
pub fn export(avatar: &AvatarNode, format: ExportFormat, atlas_size: u32) -> Result<ExportBuffer> {
    export_with_config(
        avatar,
        &ExportConfig::default()
            .with_format(format)
            .with_atlas_size(atlas_size),
    )
}

/// Export `avatar` with a full configuration.
pub fn export_with_config(avatar: &AvatarNode, config: &ExportConfig) -> Result<ExportBuffer> {
    Exporter::with_config(config.clone()).export(avatar)
}
