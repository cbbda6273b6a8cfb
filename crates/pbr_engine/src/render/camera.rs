//! Perspective camera and the per-frame scene uniform block

use nalgebra::{Matrix4, Point3, Vector3};

/// Right-handed, Y-up perspective camera
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Eye position in world space
    pub position: Point3<f32>,
    /// Point the camera looks at
    pub target: Point3<f32>,
    /// Up direction
    pub up: Vector3<f32>,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Near clipping distance
    pub near: f32,
    /// Far clipping distance
    pub far: f32,
}

impl Camera {
    /// Camera at `position` looking at the origin
    pub fn perspective(position: Point3<f32>, fov_degrees: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Point3::origin(),
            up: Vector3::y(),
            fov_y: fov_degrees.to_radians(),
            near,
            far,
        }
    }

    /// Point the camera at `target`
    pub fn look_at(&mut self, target: Point3<f32>) {
        self.target = target;
        log::trace!("Camera target updated to {target}");
    }

    /// World to view transform
    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(&self.position, &self.target, &self.up)
    }

    /// View to clip transform for Vulkan clip space: Y down, depth in `0..1`
    pub fn projection_matrix(&self, aspect: f32) -> Matrix4<f32> {
        let f = 1.0 / (self.fov_y * 0.5).tan();
        let depth = self.near - self.far;
        #[rustfmt::skip]
        let projection = Matrix4::new(
            f / aspect, 0.0, 0.0,                   0.0,
            0.0,        -f,  0.0,                   0.0,
            0.0,        0.0, self.far / depth,      self.near * self.far / depth,
            0.0,        0.0, -1.0,                  0.0,
        );
        projection
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(Point3::new(2.5, 2.0, 4.0), 60.0, 0.1, 100.0)
    }
}

/// Directional light with a simple metallic-roughness material factor set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneLighting {
    /// Direction the light travels, world space
    pub direction: Vector3<f32>,
    /// Linear light color times intensity
    pub color: Vector3<f32>,
    /// Ambient term
    pub ambient: Vector3<f32>,
    /// Metallic factor applied to every mesh
    pub metallic: f32,
    /// Roughness factor applied to every mesh
    pub roughness: f32,
}

impl Default for SceneLighting {
    fn default() -> Self {
        Self {
            direction: Vector3::new(-0.4, -1.0, -0.6).normalize(),
            color: Vector3::new(3.0, 2.9, 2.7),
            ambient: Vector3::new(0.03, 0.03, 0.035),
            metallic: 0.1,
            roughness: 0.5,
        }
    }
}

/// Uniform block bound at set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneUniform {
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip
    pub projection: [[f32; 4]; 4],
    /// Eye position, w unused
    pub camera_position: [f32; 4],
    /// Light direction, w unused
    pub light_direction: [f32; 4],
    /// Light color, w unused
    pub light_color: [f32; 4],
    /// Ambient color, w unused
    pub ambient: [f32; 4],
    /// Metallic, roughness, unused, unused
    pub material: [f32; 4],
}

impl SceneUniform {
    /// Fill the block for a viewport of `width` x `height` pixels
    pub fn new(camera: &Camera, lighting: &SceneLighting, width: u32, height: u32) -> Self {
        let aspect = width as f32 / height.max(1) as f32;
        let p = camera.position;
        Self {
            view: camera.view_matrix().into(),
            projection: camera.projection_matrix(aspect).into(),
            camera_position: [p.x, p.y, p.z, 1.0],
            light_direction: lighting.direction.push(0.0).into(),
            light_color: lighting.color.push(0.0).into(),
            ambient: lighting.ambient.push(0.0).into(),
            material: [lighting.metallic, lighting.roughness, 0.0, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn test_projection_depth_range() {
        let camera = Camera::perspective(Point3::origin(), 90.0, 0.5, 50.0);
        let projection = camera.projection_matrix(1.0);

        let near = projection * Vector4::new(0.0, 0.0, -0.5, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-6);

        let far = projection * Vector4::new(0.0, 0.0, -50.0, 1.0);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::perspective(Point3::origin(), 90.0, 0.1, 10.0);
        let up = camera.projection_matrix(1.0) * Vector4::new(0.0, 1.0, -1.0, 1.0);
        assert!(up.y / up.w < 0.0);
    }

    #[test]
    fn test_view_moves_target_onto_negative_z() {
        let camera = Camera::default();
        let target = camera.view_matrix().transform_point(&camera.target);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target.y, 0.0, epsilon = 1e-5);
        assert!(target.z < 0.0);
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<SceneUniform>(), 2 * 64 + 5 * 16);
        let uniform = SceneUniform::new(&Camera::default(), &SceneLighting::default(), 1280, 720);
        assert_eq!(uniform.camera_position, [2.5, 2.0, 4.0, 1.0]);
        assert_relative_eq!(uniform.material[1], 0.5);
    }
}
