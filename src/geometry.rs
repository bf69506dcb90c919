// Quad geometry and its per-frame transform
//
// The quad lives in clip space (-0.5..0.5) so no camera is needed; the only
// per-frame input is a push-constant matrix built here.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::mem::{offset_of, size_of};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Corners from top-left going clockwise on screen (Vulkan clip space is y-down)
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex { position: [-0.5, -0.5], uv: [0.0, 0.0] },
    Vertex { position: [0.5, -0.5], uv: [1.0, 0.0] },
    Vertex { position: [0.5, 0.5], uv: [1.0, 1.0] },
    Vertex { position: [-0.5, 0.5], uv: [0.0, 1.0] },
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Size of the push-constant block read by the vertex shader
pub const PUSH_CONSTANT_SIZE: u32 = size_of::<Mat4>() as u32;

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        let position = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(offset_of!(Vertex, position) as u32)
            .build();

        let uv = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(offset_of!(Vertex, uv) as u32)
            .build();

        [position, uv]
    }
}

/// Rotation about the view axis followed by an aspect-ratio correction that
/// keeps the quad square on non-square surfaces.
pub fn quad_transform(elapsed_secs: f32, rotation_speed: f32, aspect: f32) -> Mat4 {
    let angle = elapsed_secs * rotation_speed;

    let correction = if !aspect.is_finite() || aspect <= 0.0 {
        Vec3::ONE
    } else if aspect >= 1.0 {
        Vec3::new(1.0 / aspect, 1.0, 1.0)
    } else {
        Vec3::new(1.0, aspect, 1.0)
    };

    Mat4::from_scale(correction) * Mat4::from_rotation_z(angle)
}

pub fn aspect_ratio(extent: vk::Extent2D) -> f32 {
    if extent.height == 0 {
        return 1.0;
    }
    extent.width as f32 / extent.height as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn approx(a: Vec4, b: Vec4) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(size_of::<Vertex>(), 16);

        let binding = Vertex::binding_description();
        assert_eq!(binding.stride, 16);

        let [position, uv] = Vertex::attribute_descriptions();
        assert_eq!((position.location, position.offset), (0, 0));
        assert_eq!((uv.location, uv.offset), (1, 8));
    }

    #[test]
    fn indices_cover_both_triangles() {
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < QUAD_VERTICES.len()));
        let mut used: Vec<u16> = QUAD_INDICES.to_vec();
        used.sort_unstable();
        used.dedup();
        assert_eq!(used, vec![0, 1, 2, 3]);
    }

    #[test]
    fn push_constant_fits_one_matrix() {
        assert_eq!(PUSH_CONSTANT_SIZE, 64);
        assert_eq!(bytemuck::bytes_of(&Mat4::IDENTITY).len(), 64);
    }

    #[test]
    fn static_quad_on_square_surface_is_identity() {
        assert_eq!(quad_transform(10.0, 0.0, 1.0), Mat4::IDENTITY);
    }

    #[test]
    fn wide_surface_squeezes_x() {
        let m = quad_transform(0.0, 1.0, 2.0);
        let corner = m * Vec4::new(0.5, 0.5, 0.0, 1.0);
        assert!(approx(corner, Vec4::new(0.25, 0.5, 0.0, 1.0)));
    }

    #[test]
    fn tall_surface_squeezes_y() {
        let m = quad_transform(0.0, 1.0, 0.5);
        let corner = m * Vec4::new(0.5, 0.5, 0.0, 1.0);
        assert!(approx(corner, Vec4::new(0.5, 0.25, 0.0, 1.0)));
    }

    #[test]
    fn rotation_advances_with_time() {
        let quarter_turn = std::f32::consts::FRAC_PI_2;
        let m = quad_transform(2.0, quarter_turn / 2.0, 1.0);
        let p = m * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(approx(p, Vec4::new(0.0, 1.0, 0.0, 1.0)));
    }

    #[test]
    fn degenerate_aspect_is_ignored() {
        assert_eq!(quad_transform(0.0, 0.0, 0.0), Mat4::IDENTITY);
        assert_eq!(aspect_ratio(vk::Extent2D { width: 640, height: 0 }), 1.0);
        assert_eq!(aspect_ratio(vk::Extent2D { width: 640, height: 320 }), 2.0);
    }
}
