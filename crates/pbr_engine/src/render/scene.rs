//! Forward scene renderer
//!
//! Owns uploaded meshes, the forward render pass and pipeline, and the per-image framebuffers.
//! Implements [`FrameRecorder`] so the frame scheduler can drive it.

use ash::vk;
use nalgebra::Matrix4;
use slotmap::{new_key_type, SlotMap};

use super::camera::{Camera, SceneLighting, SceneUniform};
use super::mesh::Renderable;
use crate::assets::TextureData;
use crate::render::vulkan::device_api::{RenderPassBegin, SharedDevice};
use crate::render::vulkan::error::{VulkanError, VulkanResult};
use crate::render::vulkan::rendering::framebuffer::{choose_depth_format, DepthBuffer, Framebuffer};
use crate::render::vulkan::rendering::pipeline::{GraphicsPipeline, ModelPushConstants};
use crate::render::vulkan::rendering::render_pass::RenderPass;
use crate::render::vulkan::rendering::shader::ShaderModule;
use crate::render::vulkan::resources::buffer::Buffer;
use crate::render::vulkan::resources::descriptor::{DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter};
use crate::render::vulkan::resources::texture::Texture;
use crate::render::vulkan::resources::upload::UploadContext;
use crate::render::vulkan::state::frame::{FrameContext, FrameRecorder, OverlayRecorder};
use crate::render::vulkan::state::swapchain::Swapchain;

new_key_type! {
    /// Handle to a mesh uploaded with [`SceneRenderer::add`]
    pub struct MeshKey;
}

/// Mesh resident in device-local memory
pub struct GpuMesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    texture: Option<Texture>,
    /// Model matrix pushed with every draw
    pub transform: Matrix4<f32>,
}

impl GpuMesh {
    /// Number of indices drawn
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Framebuffers and depth buffer tied to one swapchain generation
struct SwapchainTargets {
    framebuffers: Vec<Framebuffer>,
    _depth: DepthBuffer,
}

/// Render pass and pipeline for one color format
struct ForwardPass {
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
}

/// Draws every uploaded mesh with the forward PBR pipeline
pub struct SceneRenderer {
    overlay: Option<Box<dyn OverlayRecorder>>,
    targets: Option<SwapchainTargets>,
    meshes: SlotMap<MeshKey, GpuMesh>,
    forward: Option<ForwardPass>,
    scene_buffers: Vec<Buffer>,
    default_texture: Texture,
    scene_layout: DescriptorSetLayout,
    material_layout: DescriptorSetLayout,
    vertex_shader: ShaderModule,
    fragment_shader: ShaderModule,
    upload: UploadContext,
    depth_format: vk::Format,
    device: SharedDevice,
    /// Camera used for the next frames
    pub camera: Camera,
    /// Light and material factors used for the next frames
    pub lighting: SceneLighting,
    /// Color attachment clear value
    pub clear_color: [f32; 4],
}

impl SceneRenderer {
    /// Create the renderer. The render pass and pipeline are built once the first swapchain
    /// reports its format.
    pub fn new(
        device: SharedDevice,
        frames_in_flight: usize,
        vertex_shader: ShaderModule,
        fragment_shader: ShaderModule,
        upload_timeout_ns: u64,
    ) -> VulkanResult<Self> {
        let upload = UploadContext::new(device.clone(), upload_timeout_ns)?;
        let scene_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build(device.clone())?;
        let material_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build(device.clone())?;

        let scene_buffers = (0..frames_in_flight)
            .map(|_| {
                Buffer::host_visible(
                    device.clone(),
                    std::mem::size_of::<SceneUniform>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let checker = TextureData::default_checker();
        let default_texture = Texture::from_rgba8(&upload, &device, checker.width, checker.height, &checker.pixels)?;
        let depth_format = choose_depth_format(&device)?;

        Ok(Self {
            overlay: None,
            targets: None,
            meshes: SlotMap::with_key(),
            forward: None,
            scene_buffers,
            default_texture,
            scene_layout,
            material_layout,
            vertex_shader,
            fragment_shader,
            upload,
            depth_format,
            device,
            camera: Camera::default(),
            lighting: SceneLighting::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        })
    }

    /// Upload a renderable and keep it in the scene
    pub fn add(&mut self, renderable: &Renderable) -> VulkanResult<MeshKey> {
        let mesh = renderable.mesh_data();
        mesh.validate().map_err(VulkanError::invalid)?;

        let vertex_buffer = self
            .upload
            .create_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, bytemuck::cast_slice(&mesh.vertices))?;
        let index_buffer = self
            .upload
            .create_buffer(vk::BufferUsageFlags::INDEX_BUFFER, bytemuck::cast_slice(&mesh.indices))?;
        let texture = renderable
            .texture()
            .map(|t| Texture::from_rgba8(&self.upload, &self.device, t.width, t.height, &t.pixels))
            .transpose()?;
        let index_count = u32::try_from(mesh.indices.len())
            .map_err(|_| VulkanError::invalid("Mesh has more than u32::MAX indices"))?;

        let key = self.meshes.insert(GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count,
            texture,
            transform: *renderable.transform(),
        });
        log::debug!("Uploaded mesh {:?} ({} indices)", key, index_count);
        Ok(key)
    }

    /// Remove a mesh. The device is waited idle first since in-flight frames may still read it.
    pub fn remove(&mut self, key: MeshKey) -> VulkanResult<bool> {
        if !self.meshes.contains_key(key) {
            return Ok(false);
        }
        self.device.wait_idle()?;
        Ok(self.meshes.remove(key).is_some())
    }

    /// Uploaded mesh
    pub fn mesh_mut(&mut self, key: MeshKey) -> Option<&mut GpuMesh> {
        self.meshes.get_mut(key)
    }

    /// Number of meshes in the scene
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Install an overlay drawn after the scene inside the same render pass
    pub fn set_overlay(&mut self, overlay: Option<Box<dyn OverlayRecorder>>) {
        self.overlay = overlay;
    }

    fn ensure_forward_pass(&mut self, color_format: vk::Format) -> VulkanResult<&ForwardPass> {
        let stale = self
            .forward
            .as_ref()
            .is_some_and(|f| f.render_pass.color_format() != color_format);
        if stale {
            self.device.wait_idle()?;
            self.forward = None;
        }

        if self.forward.is_none() {
            let render_pass = RenderPass::forward(self.device.clone(), color_format, Some(self.depth_format))?;
            let pipeline = GraphicsPipeline::forward(
                self.device.clone(),
                &render_pass,
                &[self.scene_layout.handle(), self.material_layout.handle()],
                &self.vertex_shader,
                &self.fragment_shader,
            )?;
            log::info!("Forward pipeline built for {:?}", color_format);
            self.forward = Some(ForwardPass { pipeline, render_pass });
        }

        self.forward
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("Forward pass missing after creation"))
    }
}

impl FrameRecorder for SceneRenderer {
    fn record(&mut self, ctx: &mut FrameContext<'_>) -> VulkanResult<()> {
        let (Some(forward), Some(targets)) = (self.forward.as_ref(), self.targets.as_ref()) else {
            return Err(VulkanError::invalid("Scene recorded before the swapchain targets were built"));
        };
        let framebuffer = targets
            .framebuffers
            .get(ctx.image_index as usize)
            .ok_or_else(|| VulkanError::invalid(format!("No framebuffer for image {}", ctx.image_index)))?;
        let scene_buffer = self
            .scene_buffers
            .get(ctx.frame_index)
            .ok_or_else(|| VulkanError::invalid(format!("No scene uniform for frame slot {}", ctx.frame_index)))?;

        scene_buffer.write_pod(&[SceneUniform::new(
            &self.camera,
            &self.lighting,
            ctx.extent.width,
            ctx.extent.height,
        )])?;
        let scene_set = ctx.descriptors.allocate(&self.scene_layout)?;
        DescriptorWriter::new()
            .write_buffer(
                0,
                scene_buffer.handle(),
                0,
                scene_buffer.size(),
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .update(&self.device, scene_set);

        let layout = forward.pipeline.layout();
        let pass = ctx.commands.begin_render_pass(&RenderPassBegin {
            render_pass: forward.render_pass.handle(),
            framebuffer: framebuffer.handle(),
            extent: ctx.extent,
            clear_color: self.clear_color,
            clear_depth: Some(1.0),
        });
        pass.set_viewport_scissor(ctx.extent);
        pass.bind_pipeline(forward.pipeline.handle());
        pass.bind_descriptor_sets(layout, 0, &[scene_set]);

        for mesh in self.meshes.values() {
            let texture = mesh.texture.as_ref().unwrap_or(&self.default_texture);
            let material_set = ctx.descriptors.allocate(&self.material_layout)?;
            DescriptorWriter::new()
                .write_image(
                    0,
                    texture.view(),
                    texture.sampler(),
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                )
                .update(&self.device, material_set);

            pass.bind_descriptor_sets(layout, 1, &[material_set]);
            pass.push_constants(
                layout,
                ModelPushConstants::STAGES,
                0,
                bytemuck::bytes_of(&ModelPushConstants::from_matrix(&mesh.transform)),
            );
            pass.bind_geometry(mesh.vertex_buffer.handle(), mesh.index_buffer.handle());
            pass.draw_indexed(mesh.index_count);
        }

        if let Some(overlay) = self.overlay.as_mut() {
            overlay.record_overlay(ctx)?;
        }
        Ok(())
    }

    fn release_swapchain_resources(&mut self) {
        if self.targets.take().is_some() {
            log::debug!("Released swapchain framebuffers");
        }
    }

    fn swapchain_recreated(&mut self, swapchain: &Swapchain) -> VulkanResult<()> {
        self.targets = None;
        let extent = swapchain.extent();
        let render_pass = self.ensure_forward_pass(swapchain.format().format)?.render_pass.handle();

        let depth = DepthBuffer::new(self.device.clone(), self.depth_format, extent)?;
        let framebuffers = swapchain
            .image_views()
            .into_iter()
            .map(|view| Framebuffer::new(self.device.clone(), render_pass, &[view, depth.view()], extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!(
            "Built {} framebuffers at {}x{} for swapchain generation {}",
            framebuffers.len(),
            extent.width,
            extent.height,
            swapchain.generation()
        );
        self.targets = Some(SwapchainTargets {
            framebuffers,
            _depth: depth,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::mesh::{MeshData, PrimitiveShape};
    use crate::render::vulkan::mock::MockDevice;
    use crate::render::vulkan::state::frame::{FrameOutcome, FrameScheduler, FrameSettings};
    use std::cell::Cell;
    use std::rc::Rc;

    const SPIRV_MAGIC: u32 = 0x0723_0203;
    const EXTENT: vk::Extent2D = vk::Extent2D { width: 1280, height: 720 };

    fn renderer(mock: &Rc<MockDevice>, frames: usize) -> SceneRenderer {
        let vertex = ShaderModule::from_words(mock.clone(), &[SPIRV_MAGIC]).unwrap();
        let fragment = ShaderModule::from_words(mock.clone(), &[SPIRV_MAGIC]).unwrap();
        SceneRenderer::new(mock.clone(), frames, vertex, fragment, u64::MAX).unwrap()
    }

    fn cube() -> Renderable {
        Renderable::Primitive {
            shape: PrimitiveShape::Cube,
            color: [1.0, 0.5, 0.2],
            transform: Matrix4::identity(),
        }
    }

    struct CountingOverlay(Rc<Cell<u32>>);

    impl OverlayRecorder for CountingOverlay {
        fn record_overlay(&mut self, ctx: &mut FrameContext<'_>) -> VulkanResult<()> {
            ctx.commands.draw_indexed(6);
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_meshes_uploaded_to_device_local_buffers() {
        let mock = Rc::new(MockDevice::new());
        let mut scene = renderer(&mock, 2);
        let key = scene.add(&cube()).unwrap();

        let mesh = scene.mesh_mut(key).unwrap();
        assert_eq!(mesh.index_count(), 36);
        let indices = mock.buffer_contents(mesh.index_buffer.handle()).unwrap();
        assert_eq!(indices.len(), 36 * 4);
        assert_eq!(&indices[..4], &0u32.to_ne_bytes());
    }

    #[test]
    fn test_invalid_mesh_rejected() {
        let mock = Rc::new(MockDevice::new());
        let mut scene = renderer(&mock, 2);
        let broken = Renderable::Mesh {
            mesh: MeshData::new(Vec::new(), vec![0, 1, 2]),
            texture: None,
            transform: Matrix4::identity(),
        };
        assert!(scene.add(&broken).is_err());
        assert_eq!(scene.mesh_count(), 0);
    }

    #[test]
    fn test_frames_draw_every_mesh_and_overlay() {
        let mock = Rc::new(MockDevice::new());
        let mut scheduler = FrameScheduler::new(mock.clone(), FrameSettings::default()).unwrap();
        let mut scene = renderer(&mock, scheduler.frames_in_flight());
        scene.add(&cube()).unwrap();
        scene
            .add(&Renderable::Mesh {
                mesh: MeshData::plane(),
                texture: Some(TextureData::checker(4, 2, [255; 4], [0, 0, 0, 255])),
                transform: Matrix4::new_scaling(4.0),
            })
            .unwrap();
        let overlays = Rc::new(Cell::new(0));
        scene.set_overlay(Some(Box::new(CountingOverlay(overlays.clone()))));

        for _ in 0..3 {
            assert_eq!(scheduler.render_frame(EXTENT, &mut scene).unwrap(), FrameOutcome::Presented);
        }
        // Two meshes plus one overlay draw per frame.
        assert_eq!(mock.draw_call_count(), 9);
        assert_eq!(overlays.get(), 3);
    }

    #[test]
    fn test_resize_rebuilds_framebuffers() {
        let mock = Rc::new(MockDevice::new());
        let mut scheduler = FrameScheduler::new(mock.clone(), FrameSettings::default()).unwrap();
        let mut scene = renderer(&mock, scheduler.frames_in_flight());
        scene.add(&cube()).unwrap();

        scheduler.render_frame(EXTENT, &mut scene).unwrap();
        let first = scene.targets.as_ref().unwrap().framebuffers[0].handle();

        let resized = vk::Extent2D { width: 800, height: 600 };
        mock.resize_surface(resized);
        scheduler.request_swapchain_recreation();
        assert_eq!(scheduler.render_frame(resized, &mut scene).unwrap(), FrameOutcome::Presented);

        let targets = scene.targets.as_ref().unwrap();
        assert_eq!(targets.framebuffers[0].extent(), resized);
        assert_ne!(targets.framebuffers[0].handle(), first);
        assert_eq!(targets.framebuffers.len(), scheduler.swapchain().unwrap().image_count());
    }

    #[test]
    fn test_everything_released_on_drop() {
        let mock = Rc::new(MockDevice::new());
        {
            let mut scheduler = FrameScheduler::new(mock.clone(), FrameSettings::default()).unwrap();
            let mut scene = renderer(&mock, scheduler.frames_in_flight());
            scene.add(&cube()).unwrap();
            scheduler.render_frame(EXTENT, &mut scene).unwrap();
            scheduler.shutdown().unwrap();
            drop(scene);
        }
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_remove_waits_idle() {
        let mock = Rc::new(MockDevice::new());
        let mut scene = renderer(&mock, 1);
        let key = scene.add(&cube()).unwrap();
        mock.clear_events();

        assert!(scene.remove(key).unwrap());
        assert!(!scene.remove(key).unwrap());
        assert_eq!(
            mock.events()
                .iter()
                .filter(|e| matches!(e, crate::render::vulkan::mock::MockEvent::WaitIdle))
                .count(),
            1
        );
    }
}
