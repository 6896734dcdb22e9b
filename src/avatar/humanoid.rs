//! Humanoid rig metadata declared by avatar parts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Humanoid bone roles (VRM 0.x naming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HumanBone {
    Hips,
    Spine,
    Chest,
    UpperChest,
    Neck,
    Head,
    LeftEye,
    RightEye,
    Jaw,
    LeftShoulder,
    LeftUpperArm,
    LeftLowerArm,
    LeftHand,
    RightShoulder,
    RightUpperArm,
    RightLowerArm,
    RightHand,
    LeftUpperLeg,
    LeftLowerLeg,
    LeftFoot,
    LeftToes,
    RightUpperLeg,
    RightLowerLeg,
    RightFoot,
    RightToes,
    LeftThumbProximal,
    LeftThumbIntermediate,
    LeftThumbDistal,
    LeftIndexProximal,
    LeftIndexIntermediate,
    LeftIndexDistal,
    LeftMiddleProximal,
    LeftMiddleIntermediate,
    LeftMiddleDistal,
    LeftRingProximal,
    LeftRingIntermediate,
    LeftRingDistal,
    LeftLittleProximal,
    LeftLittleIntermediate,
    LeftLittleDistal,
    RightThumbProximal,
    RightThumbIntermediate,
    RightThumbDistal,
    RightIndexProximal,
    RightIndexIntermediate,
    RightIndexDistal,
    RightMiddleProximal,
    RightMiddleIntermediate,
    RightMiddleDistal,
    RightRingProximal,
    RightRingIntermediate,
    RightRingDistal,
    RightLittleProximal,
    RightLittleIntermediate,
    RightLittleDistal,
}

/// Body proportion and twist parameters of the humanoid rig.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BodyProportions {
    pub arm_stretch: f32,
    pub leg_stretch: f32,
    pub upper_arm_twist: f32,
    pub lower_arm_twist: f32,
    pub upper_leg_twist: f32,
    pub lower_leg_twist: f32,
    pub feet_spacing: f32,
    #[serde(rename = "hasTranslationDoF")]
    pub has_translation_dof: bool,
}

impl Default for BodyProportions {
    fn default() -> Self {
        Self {
            arm_stretch: 0.05,
            leg_stretch: 0.05,
            upper_arm_twist: 0.5,
            lower_arm_twist: 0.5,
            upper_leg_twist: 0.5,
            lower_leg_twist: 0.5,
            feet_spacing: 0.0,
            has_translation_dof: false,
        }
    }
}

/// Descriptive and licensing metadata of the avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AvatarMeta {
    pub title: String,
    pub version: String,
    pub author: String,
    pub contact_information: String,
    pub reference: String,
    pub allowed_user_name: String,
    pub violent_ussage_name: String,
    pub sexual_ussage_name: String,
    pub commercial_ussage_name: String,
    pub other_permission_url: String,
    pub license_name: String,
    pub other_license_url: String,
}

impl Default for AvatarMeta {
    fn default() -> Self {
        Self {
            title: "Avatar".to_string(),
            version: "1.0".to_string(),
            author: String::new(),
            contact_information: String::new(),
            reference: String::new(),
            allowed_user_name: "OnlyAuthor".to_string(),
            violent_ussage_name: "Disallow".to_string(),
            sexual_ussage_name: "Disallow".to_string(),
            commercial_ussage_name: "Disallow".to_string(),
            other_permission_url: String::new(),
            license_name: "Redistribution_Prohibited".to_string(),
            other_license_url: String::new(),
        }
    }
}

/// Humanoid rig description attached to an avatar node.
///
/// Only the first node in traversal order that declares one is used; a
/// humanoid rig must be singular.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HumanoidMetadata {
    /// Role to bone name. Names are resolved against the merged skeleton.
    pub bones: BTreeMap<HumanBone, String>,
    pub meta: AvatarMeta,
    pub proportions: BodyProportions,
}

impl HumanoidMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bone(mut self, role: HumanBone, bone_name: impl Into<String>) -> Self {
        self.bones.insert(role, bone_name.into());
        self
    }

    pub fn with_meta(mut self, meta: AvatarMeta) -> Self {
        self.meta = meta;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bone_names_are_camel_case() {
        let json = serde_json::to_string(&HumanBone::LeftUpperArm).unwrap();
        assert_eq!(json, "\"leftUpperArm\"");
        let bone: HumanBone = serde_json::from_str("\"rightLittleDistal\"").unwrap();
        assert_eq!(bone, HumanBone::RightLittleDistal);
    }

    #[test]
    fn test_deserialize_partial_metadata() {
        let humanoid: HumanoidMetadata = serde_json::from_str(
            r#"{ "bones": { "hips": "J_Hips", "head": "J_Head" }, "meta": { "title": "Test" } }"#,
        )
        .unwrap();
        assert_eq!(humanoid.bones.len(), 2);
        assert_eq!(humanoid.bones[&HumanBone::Hips], "J_Hips");
        assert_eq!(humanoid.meta.title, "Test");
        assert_eq!(humanoid.meta.license_name, "Redistribution_Prohibited");
        assert_eq!(humanoid.proportions, BodyProportions::default());
    }
}
