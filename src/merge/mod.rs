//! Merging every part into one mesh bound to one skeleton.

mod geometry;
mod skeleton;

pub use geometry::{GeometryMerger, MergeOutput, MergedMesh, PartRange};
pub use skeleton::{CombinedSkeleton, SkeletonBone};
