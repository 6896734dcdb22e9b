//! Part geometry and skinning data.

use crate::error::{ExportError, Result};
use crate::types::Transform;
use glam::{Mat4, Vec3};

/// A bone of a part's skeleton.
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    /// Bone name. Bones are matched across parts by this name.
    pub name: String,
    /// Index of the parent bone within the same [`PartSkin`].
    pub parent: Option<usize>,
    /// Rest transform relative to the parent bone.
    pub rest: Transform,
    /// Inverse of the bone's avatar-space bind matrix.
    pub inverse_bind: Mat4,
}

impl Bone {
    /// Create a bone; the inverse bind matrix is identity until
    /// [`PartSkin::compute_inverse_binds`] runs.
    pub fn new(name: impl Into<String>, parent: Option<usize>, rest: Transform) -> Self {
        Self {
            name: name.into(),
            parent,
            rest,
            inverse_bind: Mat4::IDENTITY,
        }
    }

    pub fn with_inverse_bind(mut self, inverse_bind: Mat4) -> Self {
        self.inverse_bind = inverse_bind;
        self
    }
}

/// Skinning data for one part: its own skeleton plus per-vertex influences.
#[derive(Debug, Clone, PartialEq)]
pub struct PartSkin {
    pub bones: Vec<Bone>,
    /// Four bone indices per vertex, into `bones`.
    pub joints: Vec<[u16; 4]>,
    /// Four weights per vertex, matching `joints`.
    pub weights: Vec<[f32; 4]>,
}

impl PartSkin {
    pub fn new(bones: Vec<Bone>, joints: Vec<[u16; 4]>, weights: Vec<[f32; 4]>) -> Self {
        Self {
            bones,
            joints,
            weights,
        }
    }

    /// Avatar-space rest matrix of every bone.
    pub fn world_matrices(&self) -> Result<Vec<Mat4>> {
        let mut world: Vec<Option<Mat4>> = vec![None; self.bones.len()];
        for i in 0..self.bones.len() {
            resolve_world(&self.bones, i, &mut world, 0)?;
        }
        Ok(world.into_iter().map(|m| m.unwrap_or(Mat4::IDENTITY)).collect())
    }

    /// Derive every bone's inverse bind matrix from the rest hierarchy.
    pub fn compute_inverse_binds(&mut self) -> Result<()> {
        let world = self.world_matrices()?;
        for (bone, matrix) in self.bones.iter_mut().zip(world) {
            bone.inverse_bind = matrix.inverse();
        }
        Ok(())
    }

    fn validate(&self, part_name: &str, vertex_count: usize) -> Result<()> {
        if self.joints.len() != vertex_count || self.weights.len() != vertex_count {
            return Err(ExportError::MalformedInput(format!(
                "part '{}' has {} vertices but {} joint and {} weight entries",
                part_name,
                vertex_count,
                self.joints.len(),
                self.weights.len()
            )));
        }
        if self.bones.len() > u16::MAX as usize {
            return Err(ExportError::MalformedInput(format!(
                "part '{}' has {} bones",
                part_name,
                self.bones.len()
            )));
        }
        for (i, bone) in self.bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= self.bones.len() || parent == i {
                    return Err(ExportError::MalformedInput(format!(
                        "bone '{}' of part '{}' has invalid parent {}",
                        bone.name, part_name, parent
                    )));
                }
            }
        }
        // Surfaces parent cycles.
        self.world_matrices()?;

        for (v, (joints, weights)) in self.joints.iter().zip(&self.weights).enumerate() {
            let mut total = 0.0;
            for (&joint, &weight) in joints.iter().zip(weights) {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(ExportError::MalformedInput(format!(
                        "vertex {} of part '{}' has weight {}",
                        v, part_name, weight
                    )));
                }
                if weight > 0.0 && joint as usize >= self.bones.len() {
                    return Err(ExportError::MalformedInput(format!(
                        "vertex {} of part '{}' references joint {} of {}",
                        v,
                        part_name,
                        joint,
                        self.bones.len()
                    )));
                }
                total += weight;
            }
            if total <= f32::EPSILON {
                return Err(ExportError::MalformedInput(format!(
                    "vertex {} of part '{}' has no skin weight",
                    v, part_name
                )));
            }
        }
        Ok(())
    }
}

fn resolve_world(
    bones: &[Bone],
    index: usize,
    world: &mut [Option<Mat4>],
    depth: usize,
) -> Result<Mat4> {
    if let Some(matrix) = world[index] {
        return Ok(matrix);
    }
    if depth > bones.len() {
        return Err(ExportError::MalformedInput(format!(
            "bone '{}' is part of a parent cycle",
            bones[index].name
        )));
    }
    let local = bones[index].rest.to_matrix();
    let matrix = match bones[index].parent {
        Some(parent) if parent < bones.len() => {
            resolve_world(bones, parent, world, depth + 1)? * local
        }
        _ => local,
    };
    world[index] = Some(matrix);
    Ok(matrix)
}

/// Geometry of one avatar part.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    /// Triangle indices (3 per triangle).
    pub indices: Vec<u32>,
    pub skin: Option<PartSkin>,
}

impl PartMesh {
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            ..Default::default()
        }
    }

    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn with_uvs(mut self, uvs: Vec<[f32; 2]>) -> Self {
        self.uvs = Some(uvs);
        self
    }

    pub fn with_skin(mut self, skin: PartSkin) -> Self {
        self.skin = Some(skin);
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Check attribute lengths, index ranges and skin consistency.
    pub fn validate(&self, part_name: &str) -> Result<()> {
        let count = self.vertex_count();
        if count == 0 {
            return Err(ExportError::MalformedInput(format!(
                "part '{}' has no vertices",
                part_name
            )));
        }
        if let Some(normals) = &self.normals {
            if normals.len() != count {
                return Err(ExportError::MalformedInput(format!(
                    "part '{}' has {} positions but {} normals",
                    part_name,
                    count,
                    normals.len()
                )));
            }
        }
        if let Some(uvs) = &self.uvs {
            if uvs.len() != count {
                return Err(ExportError::MalformedInput(format!(
                    "part '{}' has {} positions but {} uvs",
                    part_name,
                    count,
                    uvs.len()
                )));
            }
        }
        if self.indices.len() % 3 != 0 {
            return Err(ExportError::MalformedInput(format!(
                "part '{}' has {} indices, not a multiple of 3",
                part_name,
                self.indices.len()
            )));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(ExportError::MalformedInput(format!(
                "part '{}' index {} is out of range for {} vertices",
                part_name, bad, count
            )));
        }
        if let Some(skin) = &self.skin {
            skin.validate(part_name, count)?;
        }
        Ok(())
    }

    /// The part's normals, or area-weighted face normals when it has none.
    pub fn normals_or_generated(&self) -> Vec<[f32; 3]> {
        if let Some(normals) = &self.normals {
            return normals.clone();
        }

        let mut accum = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let pa = Vec3::from(self.positions[a]);
            let pb = Vec3::from(self.positions[b]);
            let pc = Vec3::from(self.positions[c]);
            // Unnormalized cross product weights by triangle area.
            let face = (pb - pa).cross(pc - pa);
            accum[a] += face;
            accum[b] += face;
            accum[c] += face;
        }
        accum
            .into_iter()
            .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> PartMesh {
        PartMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn test_generated_normals_face_forward() {
        let normals = triangle().normals_or_generated();
        for n in normals {
            assert!((n[2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_validate_out_of_range_index() {
        let mut mesh = triangle();
        mesh.indices = vec![0, 1, 3];
        assert!(matches!(
            mesh.validate("tri"),
            Err(ExportError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_validate_uv_length_mismatch() {
        let mesh = triangle().with_uvs(vec![[0.0, 0.0]]);
        assert!(mesh.validate("tri").is_err());
    }

    #[test]
    fn test_skin_parent_cycle_rejected() {
        let bones = vec![
            Bone::new("a", Some(1), Transform::IDENTITY),
            Bone::new("b", Some(0), Transform::IDENTITY),
        ];
        let skin = PartSkin::new(bones, vec![[0; 4]; 3], vec![[1.0, 0.0, 0.0, 0.0]; 3]);
        let mesh = triangle().with_skin(skin);
        assert!(matches!(
            mesh.validate("tri"),
            Err(ExportError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_skin_zero_weight_rejected() {
        let bones = vec![Bone::new("root", None, Transform::IDENTITY)];
        let skin = PartSkin::new(bones, vec![[0; 4]; 3], vec![[0.0; 4]; 3]);
        assert!(triangle().with_skin(skin).validate("tri").is_err());
    }

    #[test]
    fn test_compute_inverse_binds() {
        let bones = vec![
            Bone::new("hips", None, Transform::from_translation(Vec3::new(0.0, 1.0, 0.0))),
            Bone::new("spine", Some(0), Transform::from_translation(Vec3::new(0.0, 0.5, 0.0))),
        ];
        let mut skin = PartSkin::new(bones, Vec::new(), Vec::new());
        skin.compute_inverse_binds().unwrap();

        let spine_origin = skin.bones[1].inverse_bind.transform_point3(Vec3::new(0.0, 1.5, 0.0));
        assert!(spine_origin.abs_diff_eq(Vec3::ZERO, 1e-6));
    }
}
