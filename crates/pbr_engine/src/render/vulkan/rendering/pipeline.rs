//! Pipeline layouts and the forward graphics pipeline

use ash::vk;

use super::render_pass::RenderPass;
use super::shader::ShaderModule;
use super::vertex_layout;
use crate::render::vulkan::device_api::{GraphicsPipelineDesc, PipelineLayoutDesc, SharedDevice};
use crate::render::vulkan::error::VulkanResult;

/// Per-draw push constant block: the model matrix, column major
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelPushConstants {
    /// Model to world transform
    pub model: [[f32; 4]; 4],
}

impl ModelPushConstants {
    /// Stages that read the block
    pub const STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::VERTEX;

    /// Push constant range covering the block
    pub const fn range() -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: Self::STAGES,
            offset: 0,
            size: std::mem::size_of::<Self>() as u32,
        }
    }

    /// Block for a nalgebra model matrix
    pub fn from_matrix(model: &nalgebra::Matrix4<f32>) -> Self {
        Self { model: (*model).into() }
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: SharedDevice,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout from set layouts (indexed by set number) and push constant ranges
    pub fn new(
        device: SharedDevice,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let layout = device.create_pipeline_layout(&PipelineLayoutDesc {
            set_layouts,
            push_constant_ranges,
        })?;
        Ok(Self { device, layout })
    }

    /// Get pipeline layout handle
    pub const fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.device.destroy_pipeline_layout(self.layout);
    }
}

/// Graphics pipeline wrapper with RAII cleanup, owning its layout
pub struct GraphicsPipeline {
    device: SharedDevice,
    pipeline: vk::Pipeline,
    layout: PipelineLayout,
}

impl GraphicsPipeline {
    /// Forward pipeline drawing [`Vertex`](crate::render::mesh::Vertex) geometry with
    /// back-face culling, the model matrix as push constants and `set_layouts` bound in order
    pub fn forward(
        device: SharedDevice,
        render_pass: &RenderPass,
        set_layouts: &[vk::DescriptorSetLayout],
        vertex: &ShaderModule,
        fragment: &ShaderModule,
    ) -> VulkanResult<Self> {
        let layout = PipelineLayout::new(device.clone(), set_layouts, &[ModelPushConstants::range()])?;
        let bindings = vertex_layout::binding_descriptions();
        let attributes = vertex_layout::attribute_descriptions();

        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            vertex_module: vertex.handle(),
            fragment_module: fragment.handle(),
            layout: layout.handle(),
            render_pass: render_pass.handle(),
            vertex_bindings: &bindings,
            vertex_attributes: &attributes,
            cull_mode: vk::CullModeFlags::BACK,
            depth_test: render_pass.has_depth(),
        })?;
        log::debug!("Created forward pipeline");

        Ok(Self {
            device,
            pipeline,
            layout,
        })
    }

    /// Get pipeline handle
    pub const fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout the pipeline was created with
    pub const fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::MockDevice;
    use std::rc::Rc;

    #[test]
    fn test_push_constant_block() {
        assert_eq!(ModelPushConstants::range().size, 64);
        let block = ModelPushConstants::from_matrix(&nalgebra::Matrix4::new_translation(&nalgebra::Vector3::new(1.0, 2.0, 3.0)));
        // Column major: translation lives in the last column.
        assert_eq!(block.model[3][..3], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_forward_pipeline_lifetime() {
        let mock = Rc::new(MockDevice::new());
        let render_pass = RenderPass::forward(mock.clone(), vk::Format::B8G8R8A8_SRGB, Some(vk::Format::D32_SFLOAT)).unwrap();
        let vertex = ShaderModule::from_words(mock.clone(), &[0x0723_0203]).unwrap();
        let fragment = ShaderModule::from_words(mock.clone(), &[0x0723_0203]).unwrap();

        let pipeline = GraphicsPipeline::forward(mock.clone(), &render_pass, &[], &vertex, &fragment).unwrap();
        assert_ne!(pipeline.layout(), vk::PipelineLayout::null());
        drop(pipeline);
        drop((vertex, fragment, render_pass));
        assert_eq!(mock.live_object_count(), 0);
    }
}
