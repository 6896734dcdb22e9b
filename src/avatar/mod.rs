//! The in-memory avatar hierarchy supplied by the caller.
//!
//! An avatar is a tree of named nodes. Any node may carry a [`Part`]
//! (geometry plus material) and any node may declare [`HumanoidMetadata`].
//! The pipeline only ever borrows this tree.

pub mod humanoid;
pub mod loader;
pub mod material;
pub mod mesh;

pub use humanoid::{AvatarMeta, BodyProportions, HumanBone, HumanoidMetadata};
pub use material::{load_texture_from_bytes, PartMaterial, TextureData};
pub use mesh::{Bone, PartMesh, PartSkin};

use crate::types::Transform;
use glam::Mat4;

/// One independently authored sub-model: geometry and its surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub mesh: PartMesh,
    pub material: PartMaterial,
}

impl Part {
    pub fn new(mesh: PartMesh, material: PartMaterial) -> Self {
        Self { mesh, material }
    }
}

/// A named node of the avatar hierarchy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AvatarNode {
    pub name: String,
    pub transform: Transform,
    pub part: Option<Part>,
    pub humanoid: Option<HumanoidMetadata>,
    pub children: Vec<AvatarNode>,
}

/// A part found while walking the hierarchy, with its placement.
#[derive(Debug, Clone)]
pub struct PartRef<'a> {
    /// Name of the node carrying the part.
    pub name: &'a str,
    pub part: &'a Part,
    /// Accumulated transform from the avatar root to this node.
    pub world: Mat4,
    /// Names of the enclosing nodes, nearest first.
    pub ancestors: Vec<&'a str>,
}

impl AvatarNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.part = Some(part);
        self
    }

    pub fn with_humanoid(mut self, humanoid: HumanoidMetadata) -> Self {
        self.humanoid = Some(humanoid);
        self
    }

    pub fn with_child(mut self, child: AvatarNode) -> Self {
        self.children.push(child);
        self
    }

    /// All parts in depth-first pre-order, children in declaration order.
    pub fn parts(&self) -> Vec<PartRef<'_>> {
        let mut out = Vec::new();
        let mut ancestors = Vec::new();
        self.collect_parts(Mat4::IDENTITY, &mut ancestors, &mut out);
        out
    }

    fn collect_parts<'a>(
        &'a self,
        parent_world: Mat4,
        ancestors: &mut Vec<&'a str>,
        out: &mut Vec<PartRef<'a>>,
    ) {
        let world = parent_world * self.transform.to_matrix();
        if let Some(part) = &self.part {
            out.push(PartRef {
                name: &self.name,
                part,
                world,
                ancestors: ancestors.iter().rev().copied().collect(),
            });
        }
        ancestors.push(&self.name);
        for child in &self.children {
            child.collect_parts(world, ancestors, out);
        }
        ancestors.pop();
    }

    /// Every humanoid declaration in traversal order, with the declaring node's name.
    pub fn humanoid_declarations(&self) -> Vec<(&str, &HumanoidMetadata)> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let Some(humanoid) = &node.humanoid {
                out.push((node.name.as_str(), humanoid));
            }
        });
        out
    }

    /// Count of nodes in the tree, this one included.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    fn visit<'a, F: FnMut(&'a AvatarNode)>(&'a self, f: &mut F) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn quad_part() -> Part {
        let mesh = PartMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2, 0, 2, 3],
        );
        Part::new(mesh, PartMaterial::new(TextureData::solid(4, 4, [255; 4])))
    }

    #[test]
    fn test_parts_pre_order_with_world_transform() {
        let avatar = AvatarNode::new("root")
            .with_transform(Transform::from_translation(Vec3::new(0.0, 1.0, 0.0)))
            .with_child(
                AvatarNode::new("body")
                    .with_part(quad_part())
                    .with_child(AvatarNode::new("hat").with_part(quad_part())),
            )
            .with_child(AvatarNode::new("shoes").with_part(quad_part()));

        let parts = avatar.parts();
        let names: Vec<_> = parts.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["body", "hat", "shoes"]);
        assert_eq!(parts[1].ancestors, vec!["body", "root"]);
        let origin = parts[0].world.transform_point3(Vec3::ZERO);
        assert_eq!(origin, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(avatar.node_count(), 4);
    }

    #[test]
    fn test_humanoid_declarations_in_pre_order() {
        let first = HumanoidMetadata::new().with_bone(HumanBone::Hips, "hips_a");
        let second = HumanoidMetadata::new().with_bone(HumanBone::Hips, "hips_b");
        let avatar = AvatarNode::new("root")
            .with_child(AvatarNode::new("a").with_humanoid(first.clone()))
            .with_child(AvatarNode::new("b").with_humanoid(second));

        let declared = avatar.humanoid_declarations();
        assert_eq!(declared.len(), 2);
        assert_eq!(declared[0], ("a", &first));
    }
}
