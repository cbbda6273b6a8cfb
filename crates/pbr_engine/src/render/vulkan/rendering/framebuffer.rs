//! Framebuffers and the depth attachment they share

use ash::vk;

use crate::render::vulkan::device_api::{FramebufferDesc, ImageDesc, ImageViewDesc, SharedDevice};
use crate::render::vulkan::error::{VulkanError, VulkanResult};
use crate::render::vulkan::resources::image::{Image, ImageView};

/// Depth formats in order of preference
const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First depth format usable as an optimal-tiling depth attachment
pub fn choose_depth_format(device: &SharedDevice) -> VulkanResult<vk::Format> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&format| {
            device
                .format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| VulkanError::InitializationFailed("No supported depth attachment format".to_string()))
}

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: SharedDevice,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a framebuffer over `attachments` in render pass order
    pub fn new(
        device: SharedDevice,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let framebuffer = device.create_framebuffer(&FramebufferDesc {
            render_pass,
            attachments,
            extent,
        })?;
        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    /// Get the framebuffer handle
    pub const fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Framebuffer extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.device.destroy_framebuffer(self.framebuffer);
    }
}

/// Depth image and view sized to the swapchain
pub struct DepthBuffer {
    view: ImageView,
    image: Image,
}

impl DepthBuffer {
    /// Create a depth attachment
    pub fn new(device: SharedDevice, format: vk::Format, extent: vk::Extent2D) -> VulkanResult<Self> {
        let image = Image::new(
            device.clone(),
            &ImageDesc {
                extent,
                format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            },
        )?;
        let view = ImageView::new(
            device,
            &ImageViewDesc {
                image: image.handle(),
                format,
                aspect: vk::ImageAspectFlags::DEPTH,
            },
        )?;
        Ok(Self { view, image })
    }

    /// Depth attachment view
    pub const fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    /// Depth format
    pub const fn format(&self) -> vk::Format {
        self.image.format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::MockDevice;
    use std::rc::Rc;

    #[test]
    fn test_depth_format_prefers_d32() {
        let device: SharedDevice = Rc::new(MockDevice::new());
        assert_eq!(choose_depth_format(&device).unwrap(), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_framebuffer_and_depth_released() {
        let mock = Rc::new(MockDevice::new());
        let extent = vk::Extent2D { width: 64, height: 32 };
        let depth = DepthBuffer::new(mock.clone(), vk::Format::D32_SFLOAT, extent).unwrap();
        let framebuffer = Framebuffer::new(mock.clone(), vk::RenderPass::null(), &[depth.view()], extent).unwrap();
        assert_eq!(framebuffer.extent(), extent);
        assert_eq!(depth.format(), vk::Format::D32_SFLOAT);

        drop(framebuffer);
        drop(depth);
        assert_eq!(mock.live_object_count(), 0);
    }
}
