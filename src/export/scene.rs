//! Assembly of the glTF document for a merged avatar.

use super::buffer::BufferBuilder;
use super::vrm::{
    self, VrmBlendShapeMaster, VrmExtension, VrmFirstPerson, VrmHumanBone, VrmHumanoid,
    VrmMaterialProperty, VrmMeshAnnotation, VrmSecondaryAnimation, VrmVec3,
};
use crate::atlas::TextureAtlas;
use crate::avatar::{AvatarNode, HumanBone, HumanoidMetadata};
use crate::error::{ExportError, Result};
use crate::merge::{CombinedSkeleton, MergeOutput};
use crate::types::Transform;
use gltf_json as json;
use json::validation::Checked::Valid;
use std::collections::BTreeMap;

/// Index of the scene root node.
pub const ROOT_NODE: u32 = 0;
/// Index of the node carrying the merged mesh.
pub const MESH_NODE: u32 = 1;
/// Index of the first skeleton bone node; bone `i` is node `FIRST_BONE_NODE + i`.
pub const FIRST_BONE_NODE: u32 = 2;

const MATERIAL_NAME: &str = "AvatarAtlas";
const ALPHA_CUTOFF: f32 = 0.5;

/// The logical document plus the binary buffer its accessors point into.
#[derive(Debug, Clone)]
pub struct SceneDocument {
    pub root: json::Root,
    pub buffer: Vec<u8>,
    /// Humanoid extension, present for the avatar format.
    pub vrm: Option<VrmExtension>,
}

impl SceneDocument {
    pub fn node_count(&self) -> usize {
        self.root.nodes.len()
    }

    pub fn accessor_count(&self) -> usize {
        self.root.accessors.len()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// The document as JSON, with the humanoid extension spliced in.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(&self.root)?;
        if let Some(vrm) = &self.vrm {
            let Some(object) = value.as_object_mut() else {
                return Err(ExportError::EncodingFailure(
                    "glTF root did not serialize to an object".to_string(),
                ));
            };
            let extensions = object
                .entry("extensions")
                .or_insert_with(|| serde_json::Value::Object(Default::default()));
            match extensions.as_object_mut() {
                Some(map) => {
                    map.insert(vrm::EXTENSION_NAME.to_string(), serde_json::to_value(vrm)?);
                }
                None => {
                    return Err(ExportError::EncodingFailure(
                        "glTF extensions is not an object".to_string(),
                    ))
                }
            }
        }
        Ok(value)
    }
}

/// Builds the [`SceneDocument`] from merged geometry, the atlas and the skeleton.
///
/// Node layout is fixed: node 0 is the scene root, node 1 carries the mesh
/// (and skin), and nodes 2.. mirror the combined skeleton in bone order.
#[derive(Debug, Clone)]
pub struct SceneGraphBuilder {
    name: String,
}

impl SceneGraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The humanoid metadata to emit: the first declared in traversal order.
    ///
    /// Later declarations are ignored with a warning rather than merged.
    pub fn select_humanoid(avatar: &AvatarNode) -> Option<&HumanoidMetadata> {
        let declarations = avatar.humanoid_declarations();
        let (first_node, first) = declarations.first().copied()?;
        for (node, _) in declarations.iter().skip(1) {
            log::warn!(
                "ignoring humanoid metadata on '{}'; using the rig declared on '{}'",
                node,
                first_node
            );
        }
        Some(first)
    }

    /// Build the document. Passing `humanoid` adds the VRM extension.
    pub fn build(
        &self,
        merged: &MergeOutput,
        atlas: &TextureAtlas,
        humanoid: Option<&HumanoidMetadata>,
    ) -> Result<SceneDocument> {
        let mesh = &merged.mesh;
        let skeleton = &merged.skeleton;
        if mesh.is_empty() {
            return Err(ExportError::MalformedInput(
                "merged mesh has no vertices".to_string(),
            ));
        }
        if mesh.indices.is_empty() {
            return Err(ExportError::MalformedInput(
                "merged mesh has no triangles".to_string(),
            ));
        }

        let mut buffers = BufferBuilder::new();

        let mut attributes = BTreeMap::new();
        attributes.insert(
            Valid(json::mesh::Semantic::Positions),
            buffers.pack_positions(&mesh.positions).as_json_index(),
        );
        attributes.insert(
            Valid(json::mesh::Semantic::Normals),
            buffers.pack_vec3(&mesh.normals, "NORMAL").as_json_index(),
        );
        attributes.insert(
            Valid(json::mesh::Semantic::TexCoords(0)),
            buffers.pack_vec2(&mesh.uvs, "TEXCOORD_0").as_json_index(),
        );
        if let (Some(joints), Some(weights)) = (&mesh.joints, &mesh.weights) {
            attributes.insert(
                Valid(json::mesh::Semantic::Joints(0)),
                buffers.pack_joints(joints).as_json_index(),
            );
            attributes.insert(
                Valid(json::mesh::Semantic::Weights(0)),
                buffers.pack_vec4(weights, "WEIGHTS_0").as_json_index(),
            );
        }
        let indices = buffers.pack_indices_u32(&mesh.indices);

        let skin_accessor = if skeleton.is_empty() {
            None
        } else {
            let matrices: Vec<[f32; 16]> = skeleton
                .bones()
                .iter()
                .map(|b| b.inverse_bind.to_cols_array())
                .collect();
            Some(buffers.pack_mat4(&matrices, "inverseBindMatrices"))
        };

        // Atlas images follow the vertex data.
        let mut images = Vec::new();
        let mut textures = Vec::new();
        let mut add_texture = |buffers: &mut BufferBuilder, name: &str, png: Vec<u8>| {
            let view = buffers.pack_image(&png, name);
            images.push(json::Image {
                buffer_view: Some(json::Index::new(view)),
                mime_type: Some(json::image::MimeType("image/png".to_string())),
                name: Some(name.to_string()),
                uri: None,
                extensions: Default::default(),
                extras: Default::default(),
            });
            let index = textures.len() as u32;
            textures.push(json::Texture {
                name: Some(name.to_string()),
                sampler: Some(json::Index::new(0)),
                source: json::Index::new(images.len() as u32 - 1),
                extensions: Default::default(),
                extras: Default::default(),
            });
            index
        };

        let base_color = add_texture(&mut buffers, "baseColor", atlas.base_color.to_png()?);
        let normal = match &atlas.normal {
            Some(map) => Some(add_texture(&mut buffers, "normal", map.to_png()?)),
            None => None,
        };
        let metallic_roughness = match &atlas.metallic_roughness {
            Some(map) => Some(add_texture(&mut buffers, "metallicRoughness", map.to_png()?)),
            None => None,
        };

        let material = create_material(
            base_color,
            normal,
            metallic_roughness,
            atlas.has_transparency,
        );

        let nodes = self.build_nodes(skeleton, skin_accessor.is_some());
        let skins = match skin_accessor {
            Some(accessor) => {
                let roots = skeleton.roots();
                vec![json::Skin {
                    extensions: Default::default(),
                    extras: Default::default(),
                    inverse_bind_matrices: Some(accessor.as_json_index()),
                    joints: (0..skeleton.len() as u32)
                        .map(|i| json::Index::new(FIRST_BONE_NODE + i))
                        .collect(),
                    name: Some(format!("{}.skin", self.name)),
                    skeleton: match roots.as_slice() {
                        [root] => Some(json::Index::new(FIRST_BONE_NODE + *root as u32)),
                        _ => None,
                    },
                }]
            }
            None => Vec::new(),
        };

        let vrm = match humanoid {
            Some(humanoid) => Some(build_vrm_extension(
                humanoid,
                skeleton,
                atlas.has_transparency,
            )?),
            None => None,
        };

        let (buffer, buffer_views, accessors) = buffers.finish();

        let root = json::Root {
            accessors,
            asset: json::Asset {
                generator: Some(format!("avatar-export {}", env!("CARGO_PKG_VERSION"))),
                ..Default::default()
            },
            buffers: vec![json::Buffer {
                byte_length: buffer.len().into(),
                extensions: Default::default(),
                extras: Default::default(),
                name: None,
                uri: None,
            }],
            buffer_views,
            extensions_used: if vrm.is_some() {
                vec![vrm::EXTENSION_NAME.to_string()]
            } else {
                Vec::new()
            },
            images,
            samplers: vec![json::texture::Sampler {
                mag_filter: Some(Valid(json::texture::MagFilter::Linear)),
                min_filter: Some(Valid(json::texture::MinFilter::Linear)),
                name: None,
                wrap_s: Valid(json::texture::WrappingMode::ClampToEdge),
                wrap_t: Valid(json::texture::WrappingMode::ClampToEdge),
                extensions: Default::default(),
                extras: Default::default(),
            }],
            textures,
            materials: vec![material],
            meshes: vec![json::Mesh {
                extensions: Default::default(),
                extras: Default::default(),
                name: Some(self.name.clone()),
                primitives: vec![json::mesh::Primitive {
                    attributes,
                    extensions: Default::default(),
                    extras: Default::default(),
                    indices: Some(indices.as_json_index()),
                    material: Some(json::Index::new(0)),
                    mode: Valid(json::mesh::Mode::Triangles),
                    targets: None,
                }],
                weights: None,
            }],
            nodes,
            skins,
            scenes: vec![json::Scene {
                extensions: Default::default(),
                extras: Default::default(),
                name: Some(self.name.clone()),
                nodes: vec![json::Index::new(ROOT_NODE)],
            }],
            scene: Some(json::Index::new(0)),
            ..Default::default()
        };

        log::debug!(
            "built scene: {} nodes, {} accessors, {} buffer bytes",
            root.nodes.len(),
            root.accessors.len(),
            buffer.len()
        );

        Ok(SceneDocument { root, buffer, vrm })
    }

    fn build_nodes(&self, skeleton: &CombinedSkeleton, skinned: bool) -> Vec<json::Node> {
        let mut root_children = vec![json::Index::new(MESH_NODE)];
        root_children.extend(
            skeleton
                .roots()
                .into_iter()
                .map(|b| json::Index::new(FIRST_BONE_NODE + b as u32)),
        );

        let mut nodes = vec![
            plain_node(self.name.clone(), &Transform::IDENTITY, Some(root_children)),
            json::Node {
                mesh: Some(json::Index::new(0)),
                skin: skinned.then(|| json::Index::new(0)),
                ..plain_node(format!("{}.mesh", self.name), &Transform::IDENTITY, None)
            },
        ];

        for (index, bone) in skeleton.bones().iter().enumerate() {
            let children: Vec<_> = skeleton
                .children(index)
                .into_iter()
                .map(|c| json::Index::new(FIRST_BONE_NODE + c as u32))
                .collect();
            nodes.push(plain_node(
                bone.name.clone(),
                &bone.rest,
                (!children.is_empty()).then_some(children),
            ));
        }
        nodes
    }
}

/// A node with a name, TRS and children; default components are omitted.
fn plain_node(
    name: String,
    transform: &Transform,
    children: Option<Vec<json::Index<json::Node>>>,
) -> json::Node {
    let translation = transform.translation.to_array();
    let rotation = transform.rotation.to_array();
    let scale = transform.scale.to_array();
    json::Node {
        camera: None,
        children,
        extensions: Default::default(),
        extras: Default::default(),
        matrix: None,
        mesh: None,
        name: Some(name),
        rotation: (rotation != [0.0, 0.0, 0.0, 1.0]).then_some(json::scene::UnitQuaternion(rotation)),
        scale: (scale != [1.0, 1.0, 1.0]).then_some(scale),
        translation: (translation != [0.0, 0.0, 0.0]).then_some(translation),
        skin: None,
        weights: None,
    }
}

/// The single atlas material.
fn create_material(
    base_color: u32,
    normal: Option<u32>,
    metallic_roughness: Option<u32>,
    alpha_tested: bool,
) -> json::Material {
    let texture_info = |index: u32| json::texture::Info {
        index: json::Index::new(index),
        tex_coord: 0,
        extensions: Default::default(),
        extras: Default::default(),
    };
    json::Material {
        pbr_metallic_roughness: json::material::PbrMetallicRoughness {
            base_color_texture: Some(texture_info(base_color)),
            base_color_factor: json::material::PbrBaseColorFactor([1.0, 1.0, 1.0, 1.0]),
            metallic_factor: json::material::StrengthFactor(if metallic_roughness.is_some() {
                1.0
            } else {
                0.0
            }),
            roughness_factor: json::material::StrengthFactor(1.0),
            metallic_roughness_texture: metallic_roughness.map(texture_info),
            extensions: Default::default(),
            extras: Default::default(),
        },
        alpha_mode: Valid(if alpha_tested {
            json::material::AlphaMode::Mask
        } else {
            json::material::AlphaMode::Opaque
        }),
        alpha_cutoff: alpha_tested.then_some(json::material::AlphaCutoff(ALPHA_CUTOFF)),
        double_sided: false,
        name: Some(MATERIAL_NAME.to_string()),
        normal_texture: normal.map(|index| json::material::NormalTexture {
            index: json::Index::new(index),
            scale: 1.0,
            tex_coord: 0,
            extensions: Default::default(),
            extras: Default::default(),
        }),
        occlusion_texture: None,
        emissive_texture: None,
        emissive_factor: json::material::EmissiveFactor([0.0, 0.0, 0.0]),
        extensions: Default::default(),
        extras: Default::default(),
    }
}

/// Resolve humanoid roles to bone nodes and assemble the VRM block.
fn build_vrm_extension(
    humanoid: &HumanoidMetadata,
    skeleton: &CombinedSkeleton,
    alpha_tested: bool,
) -> Result<VrmExtension> {
    let mut human_bones = Vec::with_capacity(humanoid.bones.len());
    for (&role, bone_name) in &humanoid.bones {
        let index = skeleton.index_of(bone_name).ok_or_else(|| {
            ExportError::MalformedInput(format!(
                "humanoid bone {:?} maps to '{}', which is not in the merged skeleton",
                role, bone_name
            ))
        })?;
        human_bones.push(VrmHumanBone {
            bone: role,
            node: FIRST_BONE_NODE + index as u32,
            use_default_values: true,
        });
    }

    let head = human_bones
        .iter()
        .find(|b| b.bone == HumanBone::Head)
        .map(|b| b.node as i64)
        .unwrap_or(-1);

    Ok(VrmExtension {
        exporter_version: format!("avatar-export-{}", env!("CARGO_PKG_VERSION")),
        spec_version: "0.0".to_string(),
        meta: humanoid.meta.clone(),
        humanoid: VrmHumanoid {
            human_bones,
            proportions: humanoid.proportions,
        },
        first_person: VrmFirstPerson {
            first_person_bone: head,
            first_person_bone_offset: VrmVec3 {
                x: 0.0,
                y: 0.06,
                z: 0.0,
            },
            mesh_annotations: vec![VrmMeshAnnotation {
                mesh: 0,
                first_person_flag: "Auto".to_string(),
            }],
            look_at_type_name: "Bone".to_string(),
        },
        material_properties: vec![VrmMaterialProperty::gltf_material(MATERIAL_NAME, alpha_tested)],
        blend_shape_master: VrmBlendShapeMaster::default(),
        secondary_animation: VrmSecondaryAnimation::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::{AtlasConfig, AtlasPacker};
    use crate::avatar::{Bone, Part, PartMaterial, PartMesh, PartSkin, TextureData};
    use crate::merge::GeometryMerger;
    use glam::Vec3;

    fn quad(texture: TextureData, skin: Option<PartSkin>) -> Part {
        let mut mesh = PartMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2, 0, 2, 3],
        );
        mesh.skin = skin;
        Part::new(mesh, PartMaterial::new(texture))
    }

    fn rig() -> PartSkin {
        let mut skin = PartSkin::new(
            vec![
                Bone::new("hips", None, Transform::from_translation(Vec3::new(0.0, 1.0, 0.0))),
                Bone::new("head", Some(0), Transform::from_translation(Vec3::new(0.0, 0.5, 0.0))),
            ],
            vec![[0, 1, 0, 0]; 4],
            vec![[0.5, 0.5, 0.0, 0.0]; 4],
        );
        skin.compute_inverse_binds().unwrap();
        skin
    }

    fn build(avatar: &AvatarNode, humanoid: Option<&HumanoidMetadata>) -> Result<SceneDocument> {
        let parts = avatar.parts();
        let materials: Vec<_> = parts.iter().map(|p| &p.part.material).collect();
        let atlas = AtlasPacker::new(AtlasConfig {
            size: 256,
            max_texture_size: 256,
            ..Default::default()
        })
        .build(&materials)?;
        let merged = GeometryMerger::default().merge(&parts, &atlas.layout)?;
        SceneGraphBuilder::new("Avatar").build(&merged, &atlas, humanoid)
    }

    #[test]
    fn test_mesh_without_indices_is_rejected() {
        let mut loose = quad(TextureData::solid(16, 16, [255; 4]), None);
        loose.mesh.indices.clear();
        let avatar = AvatarNode::new("root").with_child(AvatarNode::new("a").with_part(loose));
        assert!(matches!(build(&avatar, None), Err(ExportError::MalformedInput(_))));
    }

    #[test]
    fn test_single_material_for_many_parts() {
        let avatar = AvatarNode::new("root")
            .with_child(AvatarNode::new("a").with_part(quad(TextureData::solid(32, 32, [255, 0, 0, 255]), None)))
            .with_child(AvatarNode::new("b").with_part(quad(TextureData::solid(32, 32, [0, 255, 0, 255]), None)))
            .with_child(AvatarNode::new("c").with_part(quad(TextureData::solid(32, 32, [0, 0, 255, 255]), None)));
        let doc = build(&avatar, None).unwrap();

        assert_eq!(doc.root.materials.len(), 1);
        assert_eq!(doc.root.textures.len(), 1);
        assert_eq!(doc.root.meshes.len(), 1);
        assert_eq!(doc.root.meshes[0].primitives.len(), 1);
        assert_eq!(doc.node_count(), 2);
        // POSITION, NORMAL, TEXCOORD_0, indices
        assert_eq!(doc.accessor_count(), 4);
        assert!(doc.root.skins.is_empty());
        assert_eq!(doc.buffer_len() % 4, 0);
        assert_eq!(doc.root.buffers[0].byte_length.0 as usize, doc.buffer_len());
    }

    #[test]
    fn test_accessors_resolve_inside_buffer() {
        let avatar = AvatarNode::new("root").with_child(
            AvatarNode::new("body").with_part(quad(TextureData::solid(16, 16, [9; 4]), Some(rig()))),
        );
        let doc = build(&avatar, None).unwrap();
        for accessor in &doc.root.accessors {
            let view = &doc.root.buffer_views[accessor.buffer_view.unwrap().value()];
            let start = view.byte_offset.map(|o| o.0).unwrap_or(0);
            assert!(start % 4 == 0);
            assert!(start + view.byte_length.0 <= doc.buffer_len() as u64);
        }
    }

    #[test]
    fn test_skeleton_nodes_mirror_bones() {
        let avatar = AvatarNode::new("root").with_child(
            AvatarNode::new("body").with_part(quad(TextureData::solid(16, 16, [9; 4]), Some(rig()))),
        );
        let doc = build(&avatar, None).unwrap();

        assert_eq!(doc.node_count(), 4);
        assert_eq!(doc.root.nodes[2].name.as_deref(), Some("hips"));
        assert_eq!(doc.root.nodes[3].translation, Some([0.0, 0.5, 0.0]));
        let root_children = doc.root.nodes[0].children.as_ref().unwrap();
        assert_eq!(root_children.len(), 2);
        assert_eq!(doc.root.nodes[1].skin.map(|s| s.value()), Some(0));

        let skin = &doc.root.skins[0];
        assert_eq!(skin.joints.len(), 2);
        assert_eq!(skin.skeleton.map(|s| s.value()), Some(2));
        // + JOINTS_0, WEIGHTS_0, inverseBindMatrices
        assert_eq!(doc.accessor_count(), 7);
    }

    #[test]
    fn test_humanoid_roles_map_to_bone_nodes() {
        let avatar = AvatarNode::new("root").with_child(
            AvatarNode::new("body").with_part(quad(TextureData::solid(16, 16, [9; 4]), Some(rig()))),
        );
        let humanoid = HumanoidMetadata::new()
            .with_bone(HumanBone::Hips, "hips")
            .with_bone(HumanBone::Head, "head");
        let doc = build(&avatar, Some(&humanoid)).unwrap();

        let vrm = doc.vrm.as_ref().unwrap();
        assert_eq!(vrm.humanoid.node_for(HumanBone::Hips), Some(2));
        assert_eq!(vrm.humanoid.node_for(HumanBone::Head), Some(3));
        assert_eq!(vrm.first_person.first_person_bone, 3);
        assert_eq!(doc.root.extensions_used, vec!["VRM".to_string()]);

        let value = doc.to_json_value().unwrap();
        assert_eq!(value["extensions"]["VRM"]["humanoid"]["humanBones"][0]["bone"], "hips");
        assert_eq!(value["extensions"]["VRM"]["specVersion"], "0.0");
    }

    #[test]
    fn test_unresolved_humanoid_bone_fails() {
        let avatar = AvatarNode::new("root").with_child(
            AvatarNode::new("body").with_part(quad(TextureData::solid(16, 16, [9; 4]), Some(rig()))),
        );
        let humanoid = HumanoidMetadata::new().with_bone(HumanBone::LeftHand, "hand_l");
        assert!(matches!(
            build(&avatar, Some(&humanoid)),
            Err(ExportError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_transparent_part_masks_material() {
        let mut part = quad(TextureData::solid(16, 16, [255; 4]), None);
        part.material = part.material.with_transparency(true);
        let avatar = AvatarNode::new("root").with_child(AvatarNode::new("veil").with_part(part));
        let doc = build(&avatar, None).unwrap();

        let material = &doc.root.materials[0];
        assert!(matches!(
            material.alpha_mode,
            Valid(json::material::AlphaMode::Mask)
        ));
        assert_eq!(material.alpha_cutoff.as_ref().map(|c| c.0), Some(ALPHA_CUTOFF));
    }

    #[test]
    fn test_normal_map_adds_texture() {
        let mut part = quad(TextureData::solid(16, 16, [255; 4]), None);
        part.material = part.material.with_normal(TextureData::solid(16, 16, [128, 128, 255, 255]));
        let avatar = AvatarNode::new("root").with_child(AvatarNode::new("a").with_part(part));
        let doc = build(&avatar, None).unwrap();

        assert_eq!(doc.root.textures.len(), 2);
        assert_eq!(doc.root.images.len(), 2);
        assert!(doc.root.materials[0].normal_texture.is_some());
    }

    #[test]
    fn test_select_first_humanoid() {
        let first = HumanoidMetadata::new().with_bone(HumanBone::Hips, "a");
        let avatar = AvatarNode::new("root")
            .with_humanoid(first.clone())
            .with_child(AvatarNode::new("x").with_humanoid(HumanoidMetadata::new()));
        assert_eq!(SceneGraphBuilder::select_humanoid(&avatar), Some(&first));
        assert_eq!(SceneGraphBuilder::select_humanoid(&AvatarNode::new("empty")), None);
    }
}
