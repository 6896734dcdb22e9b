//! Concatenation of part meshes into one atlas-mapped mesh.

use super::skeleton::CombinedSkeleton;
use crate::atlas::AtlasLayout;
use crate::avatar::{PartRef, PartSkin};
use crate::error::{ExportError, Result};
use crate::types::{normal_matrix, Transform};
use glam::{Mat4, Vec3};

/// The vertex and index span one part occupies in the merged mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRange {
    pub name: String,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub first_index: u32,
    pub index_count: u32,
}

/// All parts' geometry in one set of buffers.
///
/// Vertex data is stored in structure-of-arrays layout, one array per glTF
/// attribute stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    /// Texture coordinates in atlas space.
    pub uvs: Vec<[f32; 2]>,
    /// Combined-skeleton joint indices; present when any part is skinned.
    pub joints: Option<Vec<[u16; 4]>>,
    pub weights: Option<Vec<[f32; 4]>>,
    /// Triangle indices (three per triangle).
    pub indices: Vec<u32>,
    pub parts: Vec<PartRange>,
}

impl MergedMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn is_skinned(&self) -> bool {
        self.joints.is_some()
    }
}

/// Output of a merge: the mesh and the skeleton its joints index into.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub mesh: MergedMesh,
    pub skeleton: CombinedSkeleton,
}

/// Merges part meshes, rewriting UVs into atlas space.
#[derive(Debug, Clone)]
pub struct GeometryMerger {
    bind_pose_tolerance: f32,
}

impl Default for GeometryMerger {
    fn default() -> Self {
        Self::new(1e-5)
    }
}

impl GeometryMerger {
    pub fn new(bind_pose_tolerance: f32) -> Self {
        Self {
            bind_pose_tolerance,
        }
    }

    /// Merge `parts`, whose atlas cells are `layout.placements` in the same order.
    ///
    /// Every part is baked into avatar space by its node transform. For a
    /// skinned part the same transform is applied to its root bones and
    /// folded into its inverse bind matrices, so bind pose stays consistent.
    /// Rigid parts in a skinned result are bound to the nearest ancestor node
    /// that names a merged bone, or to joint 0.
    pub fn merge(&self, parts: &[PartRef<'_>], layout: &AtlasLayout) -> Result<MergeOutput> {
        if parts.len() != layout.placements.len() {
            return Err(ExportError::MalformedInput(format!(
                "{} parts but {} atlas placements",
                parts.len(),
                layout.placements.len()
            )));
        }

        let mut skeleton = CombinedSkeleton::new(self.bind_pose_tolerance);
        let mut remaps: Vec<Option<Vec<u16>>> = Vec::with_capacity(parts.len());
        for part in parts {
            remaps.push(match &part.part.mesh.skin {
                Some(skin) if part.world == Mat4::IDENTITY => Some(skeleton.add_skin(part.name, skin)?),
                Some(skin) => {
                    let placed = place_skin(part.name, skin, &part.world)?;
                    Some(skeleton.add_skin(part.name, &placed)?)
                }
                None => None,
            });
        }
        let skinned = !skeleton.is_empty();

        let total_vertices: usize = parts.iter().map(|p| p.part.mesh.vertex_count()).sum();
        let total_indices: usize = parts.iter().map(|p| p.part.mesh.indices.len()).sum();
        if total_vertices > u32::MAX as usize || total_indices > u32::MAX as usize {
            return Err(ExportError::EncodingFailure(format!(
                "{} vertices / {} indices exceed 32-bit index range",
                total_vertices, total_indices
            )));
        }

        let mut mesh = MergedMesh {
            positions: Vec::with_capacity(total_vertices),
            normals: Vec::with_capacity(total_vertices),
            uvs: Vec::with_capacity(total_vertices),
            joints: skinned.then(|| Vec::with_capacity(total_vertices)),
            weights: skinned.then(|| Vec::with_capacity(total_vertices)),
            indices: Vec::with_capacity(total_indices),
            parts: Vec::with_capacity(parts.len()),
        };

        for ((part, placement), remap) in parts.iter().zip(&layout.placements).zip(&remaps) {
            let source = &part.part.mesh;
            let offset = mesh.positions.len() as u32;
            let first_index = mesh.indices.len() as u32;
            let normals = source.normals_or_generated();

            if part.world != Mat4::IDENTITY {
                let normal_to_world = normal_matrix(&part.world);
                mesh.positions.extend(
                    source
                        .positions
                        .iter()
                        .map(|&p| part.world.transform_point3(Vec3::from(p)).to_array()),
                );
                mesh.normals.extend(normals.iter().map(|&n| {
                    (normal_to_world * Vec3::from(n))
                        .try_normalize()
                        .unwrap_or(Vec3::Y)
                        .to_array()
                }));
            } else {
                mesh.positions.extend_from_slice(&source.positions);
                mesh.normals.extend_from_slice(&normals);
            }

            match &source.uvs {
                Some(uvs) => mesh.uvs.extend(uvs.iter().map(|&uv| placement.uv.apply(uv))),
                None => mesh
                    .uvs
                    .extend(std::iter::repeat(placement.uv.apply([0.0, 0.0])).take(source.vertex_count())),
            }

            mesh.indices.extend(source.indices.iter().map(|&i| i + offset));

            if let (Some(joints), Some(weights)) = (mesh.joints.as_mut(), mesh.weights.as_mut()) {
                match (&source.skin, remap) {
                    (Some(skin), Some(remap)) => {
                        append_skin(skin, remap, joints, weights);
                    }
                    _ => {
                        let attach = part
                            .ancestors
                            .iter()
                            .find_map(|name| skeleton.index_of(name))
                            .unwrap_or(0) as u16;
                        joints.extend(std::iter::repeat([attach, 0, 0, 0]).take(source.vertex_count()));
                        weights.extend(
                            std::iter::repeat([1.0, 0.0, 0.0, 0.0]).take(source.vertex_count()),
                        );
                    }
                }
            }

            mesh.parts.push(PartRange {
                name: part.name.to_string(),
                first_vertex: offset,
                vertex_count: source.vertex_count() as u32,
                first_index,
                index_count: source.indices.len() as u32,
            });
        }

        log::debug!(
            "merged {} parts: {} vertices, {} triangles, {} bones",
            parts.len(),
            mesh.vertex_count(),
            mesh.triangle_count(),
            skeleton.len()
        );

        Ok(MergeOutput { mesh, skeleton })
    }
}

/// Move a skin into avatar space: root bones take `world` on top of their
/// rest transform and every inverse bind absorbs its inverse.
fn place_skin(part_name: &str, skin: &PartSkin, world: &Mat4) -> Result<PartSkin> {
    if world.determinant().abs() <= f32::EPSILON {
        return Err(ExportError::MalformedInput(format!(
            "skinned part '{}' sits under a singular node transform",
            part_name
        )));
    }
    let inverse = world.inverse();
    let bones = skin
        .bones
        .iter()
        .map(|bone| {
            let mut placed = bone.clone();
            if bone.parent.is_none() {
                placed.rest = Transform::from_matrix(&(*world * bone.rest.to_matrix()));
            }
            placed.inverse_bind = bone.inverse_bind * inverse;
            placed
        })
        .collect();
    Ok(PartSkin::new(bones, skin.joints.clone(), skin.weights.clone()))
}

/// Rebind one part's influences to the combined skeleton.
fn append_skin(
    skin: &PartSkin,
    remap: &[u16],
    joints: &mut Vec<[u16; 4]>,
    weights: &mut Vec<[f32; 4]>,
) {
    for (local_joints, local_weights) in skin.joints.iter().zip(&skin.weights) {
        let (j, w) = remap_influences(local_joints, local_weights, remap);
        joints.push(j);
        weights.push(w);
    }
}

/// Map four influences into combined joint space.
///
/// When two slots land on the same combined joint their weights are summed
/// and the set is renormalized to 1; otherwise weights are kept as given.
fn remap_influences(joints: &[u16; 4], weights: &[f32; 4], remap: &[u16]) -> ([u16; 4], [f32; 4]) {
    let mut out_joints = [0u16; 4];
    let mut out_weights = [0f32; 4];
    let mut used = 0;
    let mut collapsed = false;

    for (&joint, &weight) in joints.iter().zip(weights) {
        if weight <= 0.0 {
            continue;
        }
        let combined = remap.get(joint as usize).copied().unwrap_or(0);
        match out_joints[..used].iter().position(|&j| j == combined) {
            Some(slot) => {
                out_weights[slot] += weight;
                collapsed = true;
            }
            None => {
                out_joints[used] = combined;
                out_weights[used] = weight;
                used += 1;
            }
        }
    }

    if collapsed {
        let total: f32 = out_weights.iter().sum();
        if total > 0.0 {
            for w in &mut out_weights {
                *w /= total;
            }
        }
    }

    (out_joints, out_weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::{AtlasConfig, AtlasPacker};
    use crate::avatar::{AvatarNode, Bone, Part, PartMaterial, PartMesh, TextureData};

    fn quad(skin: Option<PartSkin>) -> Part {
        let mut mesh = PartMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2, 0, 2, 3],
        )
        .with_uvs(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        mesh.skin = skin;
        Part::new(mesh, PartMaterial::new(TextureData::solid(64, 64, [200; 4])))
    }

    fn single_bone_skin(name: &str) -> PartSkin {
        PartSkin::new(
            vec![Bone::new(name, None, Transform::IDENTITY)],
            vec![[0; 4]; 4],
            vec![[1.0, 0.0, 0.0, 0.0]; 4],
        )
    }

    fn merge(avatar: &AvatarNode) -> Result<MergeOutput> {
        let parts = avatar.parts();
        let packer = AtlasPacker::new(AtlasConfig {
            size: 256,
            max_texture_size: 256,
            ..Default::default()
        });
        let sizes: Vec<_> = parts
            .iter()
            .map(|p| (p.part.material.base_color.width, p.part.material.base_color.height))
            .collect();
        let layout = packer.pack(&sizes)?;
        GeometryMerger::default().merge(&parts, &layout)
    }

    #[test]
    fn test_vertex_count_is_conserved() {
        let avatar = AvatarNode::new("root")
            .with_child(AvatarNode::new("a").with_part(quad(None)))
            .with_child(AvatarNode::new("b").with_part(quad(None)))
            .with_child(AvatarNode::new("c").with_part(quad(None)));
        let output = merge(&avatar).unwrap();
        assert_eq!(output.mesh.vertex_count(), 12);
        assert_eq!(output.mesh.triangle_count(), 6);
        assert!(!output.mesh.is_skinned());
    }

    #[test]
    fn test_indices_are_offset() {
        let avatar = AvatarNode::new("root")
            .with_child(AvatarNode::new("a").with_part(quad(None)))
            .with_child(AvatarNode::new("b").with_part(quad(None)));
        let mesh = merge(&avatar).unwrap().mesh;
        assert_eq!(&mesh.indices[6..], &[4, 5, 6, 4, 6, 7]);
        assert_eq!(mesh.parts[1].first_vertex, 4);
        assert_eq!(mesh.parts[1].first_index, 6);
    }

    #[test]
    fn test_uvs_are_remapped_into_cells() {
        let avatar = AvatarNode::new("root")
            .with_child(AvatarNode::new("a").with_part(quad(None)))
            .with_child(AvatarNode::new("b").with_part(quad(None)));
        let mesh = merge(&avatar).unwrap().mesh;

        // 64px cells in a 256px atlas, 2px gutter: second cell starts at 66.
        assert_eq!(mesh.uvs[2], [0.25, 0.25]);
        assert_eq!(mesh.uvs[4], [66.0 / 256.0, 0.0]);
        for uv in &mesh.uvs {
            assert!((0.0..=1.0).contains(&uv[0]) && (0.0..=1.0).contains(&uv[1]));
        }
    }

    #[test]
    fn test_rigid_part_is_baked() {
        let avatar = AvatarNode::new("root").with_child(
            AvatarNode::new("hat")
                .with_transform(Transform::from_translation(Vec3::new(0.0, 2.0, 0.0)))
                .with_part(quad(None)),
        );
        let mesh = merge(&avatar).unwrap().mesh;
        assert_eq!(mesh.positions[0], [0.0, 2.0, 0.0]);
        assert_eq!(mesh.normals[0], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_root_transform_applies_to_skinned_and_rigid_parts() {
        let mut skin = single_bone_skin("spine");
        skin.bones[0].rest = Transform::from_translation(Vec3::new(0.0, 1.0, 0.0));
        skin.compute_inverse_binds().unwrap();
        let avatar = AvatarNode::new("root")
            .with_transform(Transform::IDENTITY.with_scale(Vec3::splat(2.0)))
            .with_child(AvatarNode::new("body").with_part(quad(Some(skin))))
            .with_child(AvatarNode::new("hat").with_part(quad(None)));
        let output = merge(&avatar).unwrap();

        // Same source vertex, same placement for both parts.
        assert_eq!(output.mesh.positions[1], [2.0, 0.0, 0.0]);
        assert_eq!(output.mesh.positions[5], [2.0, 0.0, 0.0]);

        let bone = &output.skeleton.bones()[0];
        assert!((bone.rest.translation - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
        assert!((bone.rest.scale - Vec3::splat(2.0)).length() < 1e-5);

        // Joint matrix times inverse bind is identity at rest.
        let skinning = bone.rest.to_matrix() * bone.inverse_bind;
        assert!(skinning.abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }

    #[test]
    fn test_singular_transform_over_skinned_part_is_rejected() {
        let avatar = AvatarNode::new("root")
            .with_transform(Transform::IDENTITY.with_scale(Vec3::ZERO))
            .with_child(AvatarNode::new("body").with_part(quad(Some(single_bone_skin("spine")))));
        assert!(matches!(merge(&avatar), Err(ExportError::MalformedInput(_))));
    }

    #[test]
    fn test_shared_bone_merges_to_one_joint() {
        let avatar = AvatarNode::new("root")
            .with_child(AvatarNode::new("body").with_part(quad(Some(single_bone_skin("spine")))))
            .with_child(AvatarNode::new("shirt").with_part(quad(Some(single_bone_skin("spine")))));
        let output = merge(&avatar).unwrap();
        assert_eq!(output.skeleton.len(), 1);
        let joints = output.mesh.joints.unwrap();
        assert!(joints.iter().all(|j| j[0] == 0));
    }

    #[test]
    fn test_rigid_part_binds_to_ancestor_bone() {
        let skin = PartSkin::new(
            vec![
                Bone::new("hips", None, Transform::IDENTITY),
                Bone::new("head", Some(0), Transform::IDENTITY),
            ],
            vec![[0; 4]; 4],
            vec![[1.0, 0.0, 0.0, 0.0]; 4],
        );
        let avatar = AvatarNode::new("root")
            .with_child(AvatarNode::new("body").with_part(quad(Some(skin))))
            .with_child(AvatarNode::new("head").with_child(AvatarNode::new("glasses").with_part(quad(None))));
        let output = merge(&avatar).unwrap();
        let joints = output.mesh.joints.unwrap();
        let weights = output.mesh.weights.unwrap();
        assert_eq!(joints[4], [1, 0, 0, 0]);
        assert_eq!(weights[4], [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_conflicting_bind_pose_fails_merge() {
        let mut other = single_bone_skin("spine");
        other.bones[0].rest = Transform::from_translation(Vec3::new(0.0, 1.0, 0.0));
        other.compute_inverse_binds().unwrap();
        let avatar = AvatarNode::new("root")
            .with_child(AvatarNode::new("body").with_part(quad(Some(single_bone_skin("spine")))))
            .with_child(AvatarNode::new("shirt").with_part(quad(Some(other))));
        assert!(matches!(
            merge(&avatar),
            Err(ExportError::SkeletonMergeConflict { .. })
        ));
    }

    #[test]
    fn test_collapsed_influences_are_renormalized() {
        let (joints, weights) =
            remap_influences(&[0, 1, 2, 0], &[0.25, 0.25, 0.25, 0.0], &[0, 0, 1]);
        assert_eq!(joints, [0, 1, 0, 0]);
        assert!((weights[0] - 2.0 / 3.0).abs() < 1e-6);
        assert!((weights[1] - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(weights[2], 0.0);
    }

    #[test]
    fn test_distinct_influences_kept_verbatim() {
        let (joints, weights) = remap_influences(&[0, 1, 0, 0], &[0.7, 0.3, 0.0, 0.0], &[3, 5]);
        assert_eq!(joints, [3, 5, 0, 0]);
        assert_eq!(weights, [0.7, 0.3, 0.0, 0.0]);
    }
}
