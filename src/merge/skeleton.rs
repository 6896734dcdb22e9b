//! Union of all part skeletons, deduplicated by bone name.

use crate::avatar::PartSkin;
use crate::error::{ExportError, Result};
use crate::types::Transform;
use glam::Mat4;
use std::collections::HashMap;

/// A bone of the merged skeleton.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonBone {
    pub name: String,
    /// Index into [`CombinedSkeleton::bones`].
    pub parent: Option<usize>,
    pub rest: Transform,
    pub inverse_bind: Mat4,
}

/// The single skeleton all skinned parts are rebound to.
///
/// Bones keep first-seen order and a parent always precedes its children.
#[derive(Debug, Clone, Default)]
pub struct CombinedSkeleton {
    bones: Vec<SkeletonBone>,
    by_name: HashMap<String, usize>,
    tolerance: f32,
}

impl CombinedSkeleton {
    /// Create an empty skeleton that treats bind poses within `tolerance` as equal.
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance,
            ..Default::default()
        }
    }

    pub fn bones(&self) -> &[SkeletonBone] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Bones without a parent, in order.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.bones.len())
            .filter(|&i| self.bones[i].parent.is_none())
            .collect()
    }

    /// Direct children of `index`, in order.
    pub fn children(&self, index: usize) -> Vec<usize> {
        (0..self.bones.len())
            .filter(|&i| self.bones[i].parent == Some(index))
            .collect()
    }

    /// Merge a part's bones in and return the combined index of each local bone.
    ///
    /// A bone whose name is already present must agree on rest transform,
    /// inverse bind matrix and parent name, otherwise the merge fails with
    /// [`ExportError::SkeletonMergeConflict`].
    pub fn add_skin(&mut self, part_name: &str, skin: &PartSkin) -> Result<Vec<u16>> {
        let mut remap: Vec<Option<usize>> = vec![None; skin.bones.len()];
        for local in 0..skin.bones.len() {
            self.insert(part_name, skin, local, &mut remap, 0)?;
        }
        remap
            .into_iter()
            .map(|combined| {
                let combined = combined.unwrap_or(0);
                u16::try_from(combined).map_err(|_| {
                    ExportError::EncodingFailure(format!(
                        "merged skeleton exceeds {} bones",
                        u16::MAX
                    ))
                })
            })
            .collect()
    }

    fn insert(
        &mut self,
        part_name: &str,
        skin: &PartSkin,
        local: usize,
        remap: &mut [Option<usize>],
        depth: usize,
    ) -> Result<usize> {
        if let Some(combined) = remap[local] {
            return Ok(combined);
        }
        let bone = &skin.bones[local];
        if depth > skin.bones.len() {
            return Err(ExportError::MalformedInput(format!(
                "bone '{}' of part '{}' is part of a parent cycle",
                bone.name, part_name
            )));
        }

        let parent = match bone.parent {
            Some(p) => Some(self.insert(part_name, skin, p, remap, depth + 1)?),
            None => None,
        };

        let combined = match self.by_name.get(&bone.name) {
            Some(&existing) => {
                self.check_compatible(existing, part_name, &bone.rest, &bone.inverse_bind, parent)?;
                existing
            }
            None => {
                let index = self.bones.len();
                self.bones.push(SkeletonBone {
                    name: bone.name.clone(),
                    parent,
                    rest: bone.rest,
                    inverse_bind: bone.inverse_bind,
                });
                self.by_name.insert(bone.name.clone(), index);
                index
            }
        };

        remap[local] = Some(combined);
        Ok(combined)
    }

    fn check_compatible(
        &self,
        existing: usize,
        part_name: &str,
        rest: &Transform,
        inverse_bind: &Mat4,
        parent: Option<usize>,
    ) -> Result<()> {
        let bone = &self.bones[existing];
        let conflict = |reason: String| ExportError::SkeletonMergeConflict {
            bone: bone.name.clone(),
            reason: format!("part '{}': {}", part_name, reason),
        };

        if !bone.rest.approx_eq(rest, self.tolerance) {
            return Err(conflict(format!(
                "rest transform differs beyond {}",
                self.tolerance
            )));
        }
        if !bone.inverse_bind.abs_diff_eq(*inverse_bind, self.tolerance) {
            return Err(conflict(format!(
                "inverse bind matrix differs beyond {}",
                self.tolerance
            )));
        }
        let name_of = |i: Option<usize>| i.map(|i| self.bones[i].name.as_str());
        if name_of(bone.parent) != name_of(parent) {
            return Err(conflict(format!(
                "parent {:?} does not match {:?}",
                name_of(parent),
                name_of(bone.parent)
            )));
        }
        Ok(())
    }
}
