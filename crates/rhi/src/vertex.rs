//! Vertex format used by the object shader.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Position and RGB color.
///
/// - location 0: position (vec3), offset 0
/// - location 1: color (vec3), offset 12
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    /// Binding 0, advanced per vertex.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

/// A colored quad of side `size` centred on the origin in the XY plane,
/// counter-clockwise when viewed from +Z.
pub fn quad(size: f32) -> ([Vertex; 4], [u32; 6]) {
    let h = size * 0.5;
    let vertices = [
        Vertex::new(Vec3::new(-h, -h, 0.0), Vec3::new(1.0, 0.0, 0.0)),
        Vertex::new(Vec3::new(h, -h, 0.0), Vec3::new(0.0, 1.0, 0.0)),
        Vertex::new(Vec3::new(h, h, 0.0), Vec3::new(0.0, 0.0, 1.0)),
        Vertex::new(Vec3::new(-h, h, 0.0), Vec3::new(1.0, 1.0, 1.0)),
    ];
    let indices = [0, 1, 2, 2, 3, 0];
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(Vertex::binding_description().stride, 24);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].location, 1);
    }

    #[test]
    fn test_quad_is_counter_clockwise() {
        let (vertices, indices) = quad(2.0);
        assert_eq!(indices.len(), 6);

        for triangle in indices.chunks_exact(3) {
            let a = vertices[triangle[0] as usize].position;
            let b = vertices[triangle[1] as usize].position;
            let c = vertices[triangle[2] as usize].position;
            let normal = (b - a).cross(c - a);
            assert!(normal.z > 0.0);
        }
    }
}
