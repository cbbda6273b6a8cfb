//! Engine: window, GPU context, frame loop and scene wired together

use nalgebra::{Matrix4, Vector3};
use std::time::Instant;
use thiserror::Error;

use crate::assets::{self, AssetError, TextureData};
use crate::config::{ConfigError, EngineConfig};
use crate::foundation::logging::LoggingContext;
use crate::render::mesh::{MeshData, PrimitiveShape, Renderable};
use crate::render::scene::{MeshKey, SceneRenderer};
use crate::render::vulkan::error::VulkanError;
use crate::render::vulkan::initialization::GpuContext;
use crate::render::vulkan::rendering::shader::ShaderModule;
use crate::render::vulkan::state::frame::{FrameOutcome, FrameScheduler, OverlayRecorder};
use crate::render::window::{Window, WindowError};

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// GPU failure
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Window system failure
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Model or texture could not be loaded
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),
}

/// Running renderer instance.
///
/// Field order is teardown order: the frame scheduler waits for the device to go idle and
/// releases the swapchain, then scene resources go, then the device, surface and instance,
/// and finally the window.
pub struct Engine {
    frames: FrameScheduler,
    scene: SceneRenderer,
    gpu: GpuContext,
    window: Window,
    config: EngineConfig,
}

impl Engine {
    /// Open the window and bring up the renderer
    pub fn new(config: EngineConfig, logging: &LoggingContext) -> Result<Self, EngineError> {
        config.validate()?;
        log::info!("Initializing engine...");

        let mut window = Window::new(&config.window)?;
        let gpu = GpuContext::new(&mut window, &config.renderer, logging)?;
        let device = gpu.device();

        let shaders = &config.renderer.shaders;
        let vertex = ShaderModule::from_file(device.clone(), &shaders.vertex_shader_path)?;
        let fragment = ShaderModule::from_file(device.clone(), &shaders.fragment_shader_path)?;

        let frames = FrameScheduler::new(device.clone(), config.frame_settings())?;
        let mut scene = SceneRenderer::new(
            device,
            frames.frames_in_flight(),
            vertex,
            fragment,
            config.renderer.fence_timeout_ns,
        )?;
        scene.clear_color = config.renderer.clear_color;

        log::info!("Engine ready on {}", gpu.adapter_name());
        Ok(Self {
            frames,
            scene,
            gpu,
            window,
            config,
        })
    }

    /// Upload the configured model and texture, or the procedural fallbacks, on a ground plane
    pub fn load_default_scene(&mut self) -> Result<(), EngineError> {
        let assets_config = &self.config.assets;
        let (mesh, transform) = match &assets_config.model_path {
            Some(path) => {
                let mesh = assets::load_obj(assets_config.resolve(path))?;
                let transform = normalizing_transform(&mesh);
                (mesh, transform)
            }
            None => (MeshData::cube(), Matrix4::identity()),
        };
        let texture = assets_config
            .texture_path
            .as_ref()
            .map(|path| TextureData::load(assets_config.resolve(path)))
            .transpose()?;

        self.scene.add(&Renderable::Mesh {
            mesh,
            texture,
            transform,
        })?;
        self.scene.add(&Renderable::Primitive {
            shape: PrimitiveShape::Plane,
            color: [0.8, 0.8, 0.8],
            transform: Matrix4::new_translation(&Vector3::new(0.0, -1.0, 0.0)) * Matrix4::new_scaling(6.0),
        })?;
        Ok(())
    }

    /// Upload a renderable
    pub fn add(&mut self, renderable: &Renderable) -> Result<MeshKey, EngineError> {
        Ok(self.scene.add(renderable)?)
    }

    /// Scene for camera, lighting and mesh transform updates
    pub fn scene_mut(&mut self) -> &mut SceneRenderer {
        &mut self.scene
    }

    /// Install an overlay recorded after the scene draws
    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayRecorder>) {
        self.scene.set_overlay(Some(overlay));
    }

    /// Frames presented so far
    pub const fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    /// Run until the window closes. `update` is called once per loop iteration with the elapsed
    /// time in seconds.
    pub fn run(&mut self, mut update: impl FnMut(&mut SceneRenderer, f32)) -> Result<(), EngineError> {
        log::info!("Starting main loop...");
        let mut last = Instant::now();

        while !self.window.should_close() {
            self.window.poll_events();
            if self.window.take_resized() {
                self.frames.request_swapchain_recreation();
            }

            let extent = self.window.framebuffer_extent();
            if extent.width == 0 || extent.height == 0 {
                // Minimized: sleep until the window system has something for us.
                self.window.wait_events();
                continue;
            }

            let now = Instant::now();
            update(&mut self.scene, now.duration_since(last).as_secs_f32());
            last = now;

            match self.frames.render_frame(extent, &mut self.scene)? {
                FrameOutcome::Presented => {}
                FrameOutcome::Skipped => log::debug!("Frame skipped, swapchain out of date"),
                FrameOutcome::TimedOut => log::warn!("Frame timed out waiting for the GPU"),
            }
        }

        log::info!("Main loop finished after {} frames", self.frames.frame_number());
        self.frames.shutdown()?;
        Ok(())
    }

    /// Device handle shared by the renderer's resources
    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }
}

/// Center `mesh` on the origin and scale it to fit a 2-unit cube
fn normalizing_transform(mesh: &MeshData) -> Matrix4<f32> {
    let mut min = Vector3::repeat(f32::MAX);
    let mut max = Vector3::repeat(f32::MIN);
    for vertex in &mesh.vertices {
        let p = Vector3::from(vertex.position);
        min = min.inf(&p);
        max = max.sup(&p);
    }
    let extent = (max - min).max();
    let scale = if extent > f32::EPSILON { 2.0 / extent } else { 1.0 };
    let center = (min + max) * 0.5;
    Matrix4::new_scaling(scale) * Matrix4::new_translation(&-center)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::mesh::Vertex;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn test_normalizing_transform() {
        let mesh = MeshData::new(
            vec![
                Vertex::new([2.0, 2.0, 2.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
                Vertex::new([6.0, 4.0, 2.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
                Vertex::new([2.0, 4.0, 3.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
            ],
            vec![0, 1, 2],
        );
        let transform = normalizing_transform(&mesh);

        let low = transform.transform_point(&Point3::new(2.0, 2.0, 2.0));
        let high = transform.transform_point(&Point3::new(6.0, 4.0, 3.0));
        assert_relative_eq!(low.x, -1.0, epsilon = 1e-6);
        assert_relative_eq!(high.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(high.y + low.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_errors_convert() {
        let err: EngineError = ConfigError::Invalid("bad".to_string()).into();
        assert!(err.to_string().contains("bad"));
        let err: EngineError = VulkanError::invalid("stale").into();
        assert!(matches!(err, EngineError::Vulkan(_)));
    }
}
