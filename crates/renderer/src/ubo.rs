//! Uniform buffer object definitions for shaders.
//!
//! These structures must match the GLSL uniform block layouts in
//! `assets/shaders` exactly. All structures use `#[repr(C)]` for predictable
//! memory layout and implement `Pod` and `Zeroable` for safe byte casting.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Per-frame global data, bound at set 0, binding 0.
///
/// # Memory Layout
///
/// - Offset 0: projection matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Offset 128: view position, w unused (16 bytes)
/// - Offset 144: ambient colour (16 bytes)
/// - Offset 160: debug mode (4 bytes) + padding (12 bytes)
/// - Offset 176: reserved (80 bytes)
/// - Total size: 256 bytes, a multiple of every uniform offset alignment
///   drivers report
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GlobalUniform {
    pub projection: Mat4,
    pub view: Mat4,
    pub view_position: Vec4,
    pub ambient_colour: Vec4,
    pub mode: i32,
    pub _padding: [i32; 3],
    pub _reserved: [Vec4; 5],
}

impl GlobalUniform {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(
        projection: Mat4,
        view: Mat4,
        view_position: Vec3,
        ambient_colour: Vec4,
        mode: i32,
    ) -> Self {
        Self {
            projection,
            view,
            view_position: view_position.extend(1.0),
            ambient_colour,
            mode,
            _padding: [0; 3],
            _reserved: [Vec4::ZERO; 5],
        }
    }
}

impl Default for GlobalUniform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO, Vec4::ONE, 0)
    }
}

/// Size of the per-object push constant block (one `mat4`).
pub const OBJECT_PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<Mat4>() as u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_uniform_size() {
        assert_eq!(GlobalUniform::SIZE, 256);
        assert_eq!(std::mem::offset_of!(GlobalUniform, view), 64);
        assert_eq!(std::mem::offset_of!(GlobalUniform, view_position), 128);
        assert_eq!(std::mem::offset_of!(GlobalUniform, mode), 160);
    }

    #[test]
    fn test_object_push_constant_size() {
        assert_eq!(OBJECT_PUSH_CONSTANT_SIZE, 64);
    }

    #[test]
    fn test_global_uniform_new() {
        let uniform = GlobalUniform::new(
            Mat4::IDENTITY,
            Mat4::from_translation(Vec3::new(0.0, 0.0, -30.0)),
            Vec3::new(0.0, 0.0, 30.0),
            Vec4::new(0.25, 0.25, 0.25, 1.0),
            0,
        );
        assert_eq!(uniform.view_position, Vec4::new(0.0, 0.0, 30.0, 1.0));
        assert_eq!(uniform.view.w_axis.z, -30.0);
    }
}
