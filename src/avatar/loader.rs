//! Avatar pack loading from ZIP files and directories.
//!
//! A pack holds an `avatar.json` describing the node hierarchy (geometry is
//! inline, textures are referenced by path) plus the referenced PNG files.

use super::{
    load_texture_from_bytes, AvatarNode, Bone, HumanoidMetadata, Part, PartMaterial, PartMesh,
    PartSkin, TextureData,
};
use crate::error::{ExportError, Result};
use crate::types::Transform;
use glam::{Mat4, Quat, Vec3};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Component, Path};

/// File name of the hierarchy document inside a pack.
pub const AVATAR_DOCUMENT: &str = "avatar.json";

/// Load an avatar pack from a file path.
///
/// Supports both ZIP files and directories.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<AvatarNode> {
    let path = path.as_ref();

    if path.is_dir() {
        load_from_directory(path)
    } else {
        let data = std::fs::read(path)?;
        load_from_bytes(&data)
    }
}

/// Load an avatar pack from bytes (ZIP data).
pub fn load_from_bytes(data: &[u8]) -> Result<AvatarNode> {
    let cursor = std::io::Cursor::new(data);
    let mut archive = zip::ZipArchive::new(cursor)?;

    let mut files: HashMap<String, Vec<u8>> = HashMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = normalize_path(file.name());
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        files.insert(name, contents);
    }
    log::debug!("avatar pack archive holds {} files", files.len());

    let document = files.get(AVATAR_DOCUMENT).ok_or_else(|| {
        ExportError::MalformedInput(format!("pack has no {}", AVATAR_DOCUMENT))
    })?;
    let root: NodeDoc = serde_json::from_slice(document)?;

    let mut textures = TextureCache::default();
    root.resolve(&mut |path: &str| {
        textures.get(path, |p| {
            files
                .get(p)
                .cloned()
                .ok_or_else(|| ExportError::MalformedInput(format!("texture '{}' not in pack", p)))
        })
    })
}

/// Load an avatar pack from a directory.
fn load_from_directory(path: &Path) -> Result<AvatarNode> {
    let document_path = path.join(AVATAR_DOCUMENT);
    if !document_path.exists() {
        return Err(ExportError::MalformedInput(format!(
            "No {} found in {}",
            AVATAR_DOCUMENT,
            path.display()
        )));
    }

    let contents = std::fs::read_to_string(&document_path)?;
    let root: NodeDoc = serde_json::from_str(&contents)?;

    let mut textures = TextureCache::default();
    root.resolve(&mut |texture_path: &str| {
        textures.get(texture_path, |p| Ok(std::fs::read(path.join(p))?))
    })
}

fn normalize_path(path: &str) -> String {
    path.trim_start_matches("./").replace('\\', "/")
}

/// Decodes each referenced texture once.
#[derive(Default)]
struct TextureCache {
    decoded: HashMap<String, TextureData>,
}

impl TextureCache {
    fn get<F>(&mut self, path: &str, read: F) -> Result<TextureData>
    where
        F: FnOnce(&str) -> Result<Vec<u8>>,
    {
        let key = normalize_path(path);
        let inside_pack = Path::new(&key)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !inside_pack {
            return Err(ExportError::MalformedInput(format!(
                "texture path '{}' leaves the pack",
                path
            )));
        }
        if let Some(texture) = self.decoded.get(&key) {
            return Ok(texture.clone());
        }
        let bytes = read(&key)?;
        let texture = load_texture_from_bytes(&bytes)?;
        self.decoded.insert(key, texture.clone());
        Ok(texture)
    }
}

type TextureFetch<'a> = dyn FnMut(&str) -> Result<TextureData> + 'a;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeDoc {
    name: String,
    #[serde(default)]
    transform: TransformDoc,
    #[serde(default)]
    part: Option<PartDoc>,
    #[serde(default)]
    humanoid: Option<HumanoidMetadata>,
    #[serde(default)]
    children: Vec<NodeDoc>,
}

impl NodeDoc {
    fn resolve(&self, fetch: &mut TextureFetch<'_>) -> Result<AvatarNode> {
        let part = match &self.part {
            Some(part) => Some(part.resolve(&self.name, fetch)?),
            None => None,
        };
        let children = self
            .children
            .iter()
            .map(|child| child.resolve(fetch))
            .collect::<Result<Vec<_>>>()?;

        Ok(AvatarNode {
            name: self.name.clone(),
            transform: self.transform.to_transform(&self.name)?,
            part,
            humanoid: self.humanoid.clone(),
            children,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TransformDoc {
    translation: [f32; 3],
    rotation: [f32; 4],
    scale: [f32; 3],
}

impl Default for TransformDoc {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
        }
    }
}

impl TransformDoc {
    fn to_transform(&self, owner: &str) -> Result<Transform> {
        let rotation = Quat::from_array(self.rotation);
        if rotation.length() <= f32::EPSILON {
            return Err(ExportError::MalformedInput(format!(
                "'{}' has a zero rotation quaternion",
                owner
            )));
        }
        Ok(Transform {
            translation: Vec3::from(self.translation),
            rotation: rotation.normalize(),
            scale: Vec3::from(self.scale),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PartDoc {
    mesh: MeshDoc,
    material: MaterialDoc,
}

impl PartDoc {
    fn resolve(&self, owner: &str, fetch: &mut TextureFetch<'_>) -> Result<Part> {
        let skin = match &self.mesh.skin {
            Some(skin) => Some(skin.resolve(owner)?),
            None => None,
        };
        let mesh = PartMesh {
            positions: self.mesh.positions.clone(),
            normals: self.mesh.normals.clone(),
            uvs: self.mesh.uvs.clone(),
            indices: self.mesh.indices.clone(),
            skin,
        };

        let material = PartMaterial {
            base_color: fetch(&self.material.base_color)?,
            normal: self.material.normal.as_deref().map(&mut *fetch).transpose()?,
            metallic_roughness: self
                .material
                .metallic_roughness
                .as_deref()
                .map(&mut *fetch)
                .transpose()?,
            transparent: self.material.transparent,
        };

        Ok(Part::new(mesh, material))
    }
}

#[derive(Debug, Deserialize)]
struct MeshDoc {
    positions: Vec<[f32; 3]>,
    #[serde(default)]
    normals: Option<Vec<[f32; 3]>>,
    #[serde(default)]
    uvs: Option<Vec<[f32; 2]>>,
    indices: Vec<u32>,
    #[serde(default)]
    skin: Option<SkinDoc>,
}

#[derive(Debug, Deserialize)]
struct SkinDoc {
    bones: Vec<BoneDoc>,
    joints: Vec<[u16; 4]>,
    weights: Vec<[f32; 4]>,
}

impl SkinDoc {
    fn resolve(&self, owner: &str) -> Result<PartSkin> {
        let by_name: HashMap<&str, usize> = self
            .bones
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name.as_str(), i))
            .collect();

        let mut bones = Vec::with_capacity(self.bones.len());
        for doc in &self.bones {
            let parent = match &doc.parent {
                Some(name) => Some(*by_name.get(name.as_str()).ok_or_else(|| {
                    ExportError::MalformedInput(format!(
                        "bone '{}' of part '{}' names unknown parent '{}'",
                        doc.name, owner, name
                    ))
                })?),
                None => None,
            };
            bones.push(Bone::new(&doc.name, parent, doc.transform.to_transform(&doc.name)?));
        }

        let mut skin = PartSkin::new(bones, self.joints.clone(), self.weights.clone());
        skin.compute_inverse_binds()?;
        for (bone, doc) in skin.bones.iter_mut().zip(&self.bones) {
            if let Some(matrix) = doc.inverse_bind {
                bone.inverse_bind = Mat4::from_cols_array(&matrix);
            }
        }
        Ok(skin)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoneDoc {
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    transform: TransformDoc,
    /// Column-major, as in glTF.
    #[serde(default)]
    inverse_bind: Option<[f32; 16]>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaterialDoc {
    base_color: String,
    #[serde(default)]
    normal: Option<String>,
    #[serde(default)]
    metallic_roughness: Option<String>,
    #[serde(default)]
    transparent: bool,
}
