//! Binary buffer packing with 4-byte alignment and accessor creation.

use crate::types::BoundingBox;
use gltf_json as json;
use json::validation::Checked::Valid;

/// Pad `buffer` with zeros to the next 4-byte boundary.
pub fn align_buffer(buffer: &mut Vec<u8>) {
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
}

/// Index of an accessor created by [`BufferBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessorIndex(pub u32);

impl AccessorIndex {
    pub fn as_json_index(&self) -> json::Index<json::Accessor> {
        json::Index::new(self.0)
    }
}

/// Builds the single binary buffer of a document along with its views and accessors.
///
/// Every block starts on a 4-byte boundary.
#[derive(Debug, Default)]
pub struct BufferBuilder {
    buffer: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn views(&self) -> &[json::buffer::View] {
        &self.views
    }

    pub fn accessors(&self) -> &[json::Accessor] {
        &self.accessors
    }

    /// Consume the builder, returning buffer bytes, views and accessors.
    pub fn finish(self) -> (Vec<u8>, Vec<json::buffer::View>, Vec<json::Accessor>) {
        (self.buffer, self.views, self.accessors)
    }

    /// Append raw bytes as a new view and return the view index.
    fn push_view(
        &mut self,
        bytes: &[u8],
        target: Option<json::buffer::Target>,
        name: Option<String>,
    ) -> u32 {
        let offset = self.buffer.len();
        self.buffer.extend_from_slice(bytes);
        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: bytes.len().into(),
            byte_offset: Some((offset as u64).into()),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name,
            target: target.map(Valid),
        });
        align_buffer(&mut self.buffer);
        self.views.len() as u32 - 1
    }

    #[allow(clippy::too_many_arguments)]
    fn push_accessor(
        &mut self,
        view: u32,
        count: usize,
        type_: json::accessor::Type,
        component_type: json::accessor::ComponentType,
        min: Option<json::Value>,
        max: Option<json::Value>,
        name: &str,
    ) -> AccessorIndex {
        let index = self.accessors.len() as u32;
        self.accessors.push(json::Accessor {
            buffer_view: Some(json::Index::new(view)),
            byte_offset: Some(0u64.into()),
            count: count.into(),
            component_type: Valid(json::accessor::GenericComponentType(component_type)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min,
            max,
            name: Some(name.to_string()),
            normalized: false,
            sparse: None,
        });
        AccessorIndex(index)
    }

    /// Pack Vec3 positions with the min/max bounds glTF requires.
    pub fn pack_positions(&mut self, positions: &[[f32; 3]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(positions),
            Some(json::buffer::Target::ArrayBuffer),
            None,
        );
        let (min, max) = BoundingBox::from_points(positions.iter().copied())
            .map(|b| (b.min, b.max))
            .unwrap_or(([0.0; 3], [0.0; 3]));
        self.push_accessor(
            view,
            positions.len(),
            json::accessor::Type::Vec3,
            json::accessor::ComponentType::F32,
            Some(json::Value::from(min.to_vec())),
            Some(json::Value::from(max.to_vec())),
            "POSITION",
        )
    }

    pub fn pack_vec3(&mut self, data: &[[f32; 3]], name: &str) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(data),
            Some(json::buffer::Target::ArrayBuffer),
            None,
        );
        self.push_accessor(
            view,
            data.len(),
            json::accessor::Type::Vec3,
            json::accessor::ComponentType::F32,
            None,
            None,
            name,
        )
    }

    pub fn pack_vec2(&mut self, data: &[[f32; 2]], name: &str) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(data),
            Some(json::buffer::Target::ArrayBuffer),
            None,
        );
        self.push_accessor(
            view,
            data.len(),
            json::accessor::Type::Vec2,
            json::accessor::ComponentType::F32,
            None,
            None,
            name,
        )
    }

    pub fn pack_vec4(&mut self, data: &[[f32; 4]], name: &str) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(data),
            Some(json::buffer::Target::ArrayBuffer),
            None,
        );
        self.push_accessor(
            view,
            data.len(),
            json::accessor::Type::Vec4,
            json::accessor::ComponentType::F32,
            None,
            None,
            name,
        )
    }

    /// Pack joint indices as unsigned shorts.
    pub fn pack_joints(&mut self, joints: &[[u16; 4]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(joints),
            Some(json::buffer::Target::ArrayBuffer),
            None,
        );
        self.push_accessor(
            view,
            joints.len(),
            json::accessor::Type::Vec4,
            json::accessor::ComponentType::U16,
            None,
            None,
            "JOINTS_0",
        )
    }

    pub fn pack_indices_u32(&mut self, indices: &[u32]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(indices),
            Some(json::buffer::Target::ElementArrayBuffer),
            None,
        );
        self.push_accessor(
            view,
            indices.len(),
            json::accessor::Type::Scalar,
            json::accessor::ComponentType::U32,
            None,
            None,
            "indices",
        )
    }

    /// Pack column-major matrices (inverse bind matrices).
    pub fn pack_mat4(&mut self, matrices: &[[f32; 16]], name: &str) -> AccessorIndex {
        let view = self.push_view(bytemuck::cast_slice(matrices), None, None);
        self.push_accessor(
            view,
            matrices.len(),
            json::accessor::Type::Mat4,
            json::accessor::ComponentType::F32,
            None,
            None,
            name,
        )
    }

    /// Embed an encoded image and return the index of its buffer view.
    pub fn pack_image(&mut self, bytes: &[u8], name: &str) -> u32 {
        self.push_view(bytes, None, Some(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_buffer() {
        let mut buffer = vec![1, 2, 3];
        align_buffer(&mut buffer);
        assert_eq!(buffer, vec![1, 2, 3, 0]);

        let mut aligned = vec![1, 2, 3, 4];
        align_buffer(&mut aligned);
        assert_eq!(aligned.len(), 4);
    }

    #[test]
    fn test_position_bounds() {
        let mut builder = BufferBuilder::new();
        builder.pack_positions(&[[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [-1.0, -2.0, -3.0]]);
        let accessor = &builder.accessors()[0];
        assert_eq!(accessor.min, Some(serde_json::json!([-1.0, -2.0, -3.0])));
        assert_eq!(accessor.max, Some(serde_json::json!([1.0, 2.0, 3.0])));
    }

    #[test]
    fn test_pack_positions() {
        let mut builder = BufferBuilder::new();
        let idx = builder.pack_positions(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]]);
        assert_eq!(idx, AccessorIndex(0));
        assert_eq!(builder.views().len(), 1);
        assert_eq!(builder.data().len(), 36);
        assert!(builder.accessors()[0].min.is_some());
    }

    #[test]
    fn test_image_is_padded_before_next_view() {
        let mut builder = BufferBuilder::new();
        let view = builder.pack_image(&[1, 2, 3, 4, 5], "atlas");
        assert_eq!(view, 0);
        builder.pack_indices_u32(&[0, 1, 2]);

        assert_eq!(builder.data().len(), 8 + 12);
        let offset = builder.views()[1].byte_offset.map(|o| o.0).unwrap();
        assert_eq!(offset, 8);
        assert_eq!(builder.views()[0].byte_length.0, 5);
    }

    #[test]
    fn test_joints_are_unsigned_short() {
        let mut builder = BufferBuilder::new();
        builder.pack_joints(&[[0, 1, 2, 3], [4, 5, 6, 7]]);
        assert_eq!(builder.data().len(), 16);
        assert_eq!(&builder.data()[..4], &[0, 0, 1, 0]);
    }
}
