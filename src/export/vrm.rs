//! VRM 0.x extension block.
//!
//! Field names follow the VRM 0.x schema, including its historical
//! spellings (`violentUssageName` and friends).

use crate::avatar::{AvatarMeta, BodyProportions, HumanBone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the extension inside the glTF `extensions` object.
pub const EXTENSION_NAME: &str = "VRM";

/// Shader name telling VRM loaders to use the plain glTF material.
pub const GLTF_SHADER: &str = "VRM_USE_GLTFSHADER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrmExtension {
    pub exporter_version: String,
    pub spec_version: String,
    pub meta: AvatarMeta,
    pub humanoid: VrmHumanoid,
    pub first_person: VrmFirstPerson,
    pub material_properties: Vec<VrmMaterialProperty>,
    pub blend_shape_master: VrmBlendShapeMaster,
    pub secondary_animation: VrmSecondaryAnimation,
}

/// Role to node mapping plus body proportions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrmHumanoid {
    pub human_bones: Vec<VrmHumanBone>,
    #[serde(flatten)]
    pub proportions: BodyProportions,
}

impl VrmHumanoid {
    /// Node index bound to `role`, if mapped.
    pub fn node_for(&self, role: HumanBone) -> Option<u32> {
        self.human_bones.iter().find(|b| b.bone == role).map(|b| b.node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrmHumanBone {
    pub bone: HumanBone,
    pub node: u32,
    pub use_default_values: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrmFirstPerson {
    /// Node of the head bone, or -1 when the rig has none.
    pub first_person_bone: i64,
    pub first_person_bone_offset: VrmVec3,
    pub mesh_annotations: Vec<VrmMeshAnnotation>,
    pub look_at_type_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VrmVec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrmMeshAnnotation {
    pub mesh: u32,
    pub first_person_flag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrmMaterialProperty {
    pub name: String,
    pub shader: String,
    pub render_queue: u32,
    pub float_properties: BTreeMap<String, f32>,
    pub vector_properties: BTreeMap<String, Vec<f32>>,
    pub texture_properties: BTreeMap<String, u32>,
    pub keyword_map: BTreeMap<String, bool>,
    pub tag_map: BTreeMap<String, String>,
}

impl VrmMaterialProperty {
    /// A property deferring to the glTF material of the same name.
    pub fn gltf_material(name: &str, alpha_tested: bool) -> Self {
        let mut tag_map = BTreeMap::new();
        tag_map.insert(
            "RenderType".to_string(),
            if alpha_tested { "TransparentCutout" } else { "Opaque" }.to_string(),
        );
        Self {
            name: name.to_string(),
            shader: GLTF_SHADER.to_string(),
            render_queue: if alpha_tested { 2450 } else { 2000 },
            float_properties: BTreeMap::new(),
            vector_properties: BTreeMap::new(),
            texture_properties: BTreeMap::new(),
            keyword_map: BTreeMap::new(),
            tag_map,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrmBlendShapeMaster {
    pub blend_shape_groups: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrmSecondaryAnimation {
    pub bone_groups: Vec<serde_json::Value>,
    pub collider_groups: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanoid_flattens_proportions() {
        let humanoid = VrmHumanoid {
            human_bones: vec![VrmHumanBone {
                bone: HumanBone::Hips,
                node: 2,
                use_default_values: true,
            }],
            proportions: BodyProportions::default(),
        };
        let value = serde_json::to_value(&humanoid).unwrap();
        assert_eq!(value["humanBones"][0]["bone"], "hips");
        assert_eq!(value["humanBones"][0]["useDefaultValues"], true);
        assert_eq!(value["hasTranslationDoF"], false);
        assert!(value.get("proportions").is_none());

        let back: VrmHumanoid = serde_json::from_value(value).unwrap();
        assert_eq!(back.node_for(HumanBone::Hips), Some(2));
        assert_eq!(back.node_for(HumanBone::Head), None);
    }

    #[test]
    fn test_cutout_material_queue() {
        let cutout = VrmMaterialProperty::gltf_material("atlas", true);
        assert_eq!(cutout.render_queue, 2450);
        assert_eq!(cutout.tag_map["RenderType"], "TransparentCutout");
        assert_eq!(VrmMaterialProperty::gltf_material("atlas", false).render_queue, 2000);
    }
}
