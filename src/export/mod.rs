//! Scene graph assembly and container encoding.
//!
//! [`SceneGraphBuilder`] turns merged geometry into a glTF document and
//! [`BinaryEncoder`] writes that document as GLB, as GLB with the VRM
//! humanoid chunk, or as a `.gltf` text file with a sidecar buffer.

pub mod buffer;
pub mod container;
pub mod scene;
pub mod vrm;

pub use buffer::{AccessorIndex, BufferBuilder};
pub use container::{read_container, BinaryEncoder, Chunk, DecodedContainer, SeparateOutput};
pub use scene::{SceneDocument, SceneGraphBuilder};
pub use vrm::{VrmExtension, VrmHumanBone, VrmHumanoid};
