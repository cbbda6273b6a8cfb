//! Render pass management

use ash::vk;

use crate::render::vulkan::device_api::{RenderPassDesc, SharedDevice};
use crate::render::vulkan::error::VulkanResult;

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    device: SharedDevice,
    render_pass: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    /// Forward pass with a cleared color attachment and an optional depth attachment.
    ///
    /// The color attachment starts and ends in `COLOR_ATTACHMENT_OPTIMAL`; the frame loop owns
    /// the transitions from `UNDEFINED` and to `PRESENT_SRC_KHR`.
    pub fn forward(device: SharedDevice, color_format: vk::Format, depth_format: Option<vk::Format>) -> VulkanResult<Self> {
        let desc = RenderPassDesc {
            color_format,
            depth_format,
        };
        let render_pass = device.create_render_pass(&desc)?;
        Ok(Self {
            device,
            render_pass,
            desc,
        })
    }

    /// Get the render pass handle
    pub const fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Color attachment format
    pub const fn color_format(&self) -> vk::Format {
        self.desc.color_format
    }

    /// Whether the pass has a depth attachment
    pub const fn has_depth(&self) -> bool {
        self.desc.depth_format.is_some()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.device.destroy_render_pass(self.render_pass);
    }
}
