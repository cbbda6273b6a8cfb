//! Backend-agnostic mesh data and renderable kinds
//!
//! Vertex input state for the GPU lives in
//! [`vertex_layout`](crate::render::vulkan::rendering::vertex_layout); this module stays free of
//! Vulkan types.

use nalgebra::{Matrix4, Vector3};
use std::borrow::Cow;

use crate::assets::TextureData;

/// Interleaved vertex as uploaded to the vertex buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    /// Position in model space
    pub position: [f32; 3],
    /// Unit normal
    pub normal: [f32; 3],
    /// Texture coordinates
    pub texcoord: [f32; 2],
    /// Linear vertex color
    pub color: [f32; 3],
}

impl Vertex {
    /// White vertex
    pub const fn new(position: [f32; 3], normal: [f32; 3], texcoord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            texcoord,
            color: [1.0, 1.0, 1.0],
        }
    }
}

/// Flattened triangle list with `u32` indices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    /// Vertex data
    pub vertices: Vec<Vertex>,
    /// Index data for triangles
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Create a new mesh
    pub const fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Check that the mesh is a non-empty triangle list with in-range indices
    pub fn validate(&self) -> Result<(), String> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err("mesh has no geometry".to_string());
        }
        if self.indices.len() % 3 != 0 {
            return Err(format!("index count {} is not a multiple of 3", self.indices.len()));
        }
        let count = self.vertices.len();
        match self.indices.iter().find(|&&i| i as usize >= count) {
            Some(i) => Err(format!("index {i} out of range for {count} vertices")),
            None => Ok(()),
        }
    }

    /// Multiply every vertex color by `color`
    pub fn tinted(mut self, color: [f32; 3]) -> Self {
        for vertex in &mut self.vertices {
            for (channel, tint) in vertex.color.iter_mut().zip(color) {
                *channel *= tint;
            }
        }
        self
    }

    /// Cube spanning -1..1 on each axis with per-face normals, counter-clockwise outward
    pub fn cube() -> Self {
        let faces = [
            (Vector3::z(), Vector3::x(), Vector3::y()),
            (-Vector3::z(), -Vector3::x(), Vector3::y()),
            (Vector3::x(), -Vector3::z(), Vector3::y()),
            (-Vector3::x(), Vector3::z(), Vector3::y()),
            (Vector3::y(), Vector3::x(), -Vector3::z()),
            (-Vector3::y(), Vector3::x(), Vector3::z()),
        ];
        let mut mesh = Self::default();
        for (normal, u, v) in faces {
            mesh.push_quad(normal, normal, u, v);
        }
        mesh
    }

    /// Plane spanning -1..1 on X and Z, facing +Y
    pub fn plane() -> Self {
        let mut mesh = Self::default();
        mesh.push_quad(Vector3::zeros(), Vector3::y(), Vector3::x(), -Vector3::z());
        mesh
    }

    fn push_quad(&mut self, center: Vector3<f32>, normal: Vector3<f32>, u: Vector3<f32>, v: Vector3<f32>) {
        let base = self.vertices.len() as u32;
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (su, sv) in corners {
            let p = center + u * su + v * sv;
            self.vertices.push(Vertex::new(
                [p.x, p.y, p.z],
                [normal.x, normal.y, normal.z],
                [(su + 1.0) * 0.5, 1.0 - (sv + 1.0) * 0.5],
            ));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
}

/// Built-in shapes tessellated on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveShape {
    /// Unit cube
    Cube,
    /// Unit ground plane
    Plane,
}

impl PrimitiveShape {
    /// Tessellate the shape
    pub fn tessellate(self) -> MeshData {
        match self {
            Self::Cube => MeshData::cube(),
            Self::Plane => MeshData::plane(),
        }
    }
}

/// Everything the renderer knows how to draw
#[derive(Debug, Clone)]
pub enum Renderable {
    /// Imported geometry
    Mesh {
        /// Triangle data
        mesh: MeshData,
        /// Base color texture; a checker pattern is used when absent
        texture: Option<TextureData>,
        /// Model matrix
        transform: Matrix4<f32>,
    },
    /// Built-in shape
    Primitive {
        /// Shape to tessellate
        shape: PrimitiveShape,
        /// Vertex color multiplier
        color: [f32; 3],
        /// Model matrix
        transform: Matrix4<f32>,
    },
}

impl Renderable {
    /// Geometry to upload
    pub fn mesh_data(&self) -> Cow<'_, MeshData> {
        match self {
            Self::Mesh { mesh, .. } => Cow::Borrowed(mesh),
            Self::Primitive { shape, color, .. } => Cow::Owned(shape.tessellate().tinted(*color)),
        }
    }

    /// Base color texture, if the renderable carries one
    pub const fn texture(&self) -> Option<&TextureData> {
        match self {
            Self::Mesh { texture, .. } => texture.as_ref(),
            Self::Primitive { .. } => None,
        }
    }

    /// Model matrix
    pub const fn transform(&self) -> &Matrix4<f32> {
        match self {
            Self::Mesh { transform, .. } | Self::Primitive { transform, .. } => transform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_outward_winding(mesh: &MeshData) {
        for tri in mesh.indices.chunks(3) {
            let p = |i: u32| Vector3::from(mesh.vertices[i as usize].position);
            let face = (p(tri[1]) - p(tri[0])).cross(&(p(tri[2]) - p(tri[0])));
            let normal = Vector3::from(mesh.vertices[tri[0] as usize].normal);
            assert!(face.dot(&normal) > 0.0, "triangle {tri:?} winds against its normal");
        }
    }

    #[test]
    fn test_cube_mesh_structure() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        cube.validate().unwrap();
        for vertex in &cube.vertices {
            assert_relative_eq!(Vector3::from(vertex.normal).norm(), 1.0);
            assert!(vertex.position.iter().all(|c| c.abs() <= 1.0));
        }
        assert_outward_winding(&cube);
    }

    #[test]
    fn test_plane_faces_up() {
        let plane = MeshData::plane();
        assert_eq!(plane.indices.len(), 6);
        assert!(plane.vertices.iter().all(|v| v.position[1] == 0.0 && v.normal == [0.0, 1.0, 0.0]));
        assert_outward_winding(&plane);
    }

    #[test]
    fn test_validate_rejects_bad_indices() {
        let mut mesh = MeshData::plane();
        mesh.indices.push(99);
        assert!(mesh.validate().is_err());
        mesh.indices.extend_from_slice(&[0, 1]);
        assert!(mesh.validate().unwrap_err().contains("out of range"));
        assert!(MeshData::default().validate().is_err());
    }

    #[test]
    fn test_renderable_dispatch() {
        let primitive = Renderable::Primitive {
            shape: PrimitiveShape::Cube,
            color: [0.5, 1.0, 1.0],
            transform: Matrix4::identity(),
        };
        let mesh = primitive.mesh_data();
        assert_eq!(mesh.indices.len(), 36);
        assert_relative_eq!(mesh.vertices[0].color[0], 0.5);
        assert!(primitive.texture().is_none());

        let imported = Renderable::Mesh {
            mesh: MeshData::plane(),
            texture: None,
            transform: Matrix4::new_scaling(2.0),
        };
        assert!(matches!(imported.mesh_data(), Cow::Borrowed(_)));
        assert_relative_eq!(imported.transform()[(0, 0)], 2.0);
    }

    #[test]
    fn test_vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 44);
        let plane = MeshData::plane();
        let bytes: &[u8] = bytemuck::cast_slice(&plane.vertices);
        assert_eq!(bytes.len(), 4 * 44);
    }
}
