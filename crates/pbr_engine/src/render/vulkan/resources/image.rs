//! Images, image views and layout transitions

use ash::vk;

use super::memory::DeviceMemory;
use crate::render::vulkan::device_api::{ImageBarrier, ImageDesc, ImageViewDesc, SharedDevice};
use crate::render::vulkan::error::{VulkanError, VulkanResult};

/// Barrier for one of the layout transitions the renderer performs.
///
/// Unsupported pairs are rejected rather than guessed.
pub fn layout_transition_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> VulkanResult<ImageBarrier> {
    use vk::AccessFlags as Access;
    use vk::ImageLayout as Layout;
    use vk::PipelineStageFlags as Stage;

    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (Layout::UNDEFINED, Layout::TRANSFER_DST_OPTIMAL) => {
            (Access::empty(), Access::TRANSFER_WRITE, Stage::TOP_OF_PIPE, Stage::TRANSFER)
        }
        (Layout::TRANSFER_DST_OPTIMAL, Layout::SHADER_READ_ONLY_OPTIMAL) => (
            Access::TRANSFER_WRITE,
            Access::SHADER_READ,
            Stage::TRANSFER,
            Stage::FRAGMENT_SHADER,
        ),
        (Layout::UNDEFINED, Layout::COLOR_ATTACHMENT_OPTIMAL) => (
            Access::empty(),
            Access::COLOR_ATTACHMENT_WRITE,
            Stage::COLOR_ATTACHMENT_OUTPUT,
            Stage::COLOR_ATTACHMENT_OUTPUT,
        ),
        (Layout::COLOR_ATTACHMENT_OPTIMAL, Layout::PRESENT_SRC_KHR) => (
            Access::COLOR_ATTACHMENT_WRITE,
            Access::empty(),
            Stage::COLOR_ATTACHMENT_OUTPUT,
            Stage::BOTTOM_OF_PIPE,
        ),
        (Layout::UNDEFINED, Layout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            Access::empty(),
            Access::DEPTH_STENCIL_ATTACHMENT_READ | Access::DEPTH_STENCIL_ATTACHMENT_WRITE,
            Stage::TOP_OF_PIPE,
            Stage::EARLY_FRAGMENT_TESTS,
        ),
        (old, new) => {
            return Err(VulkanError::invalid(format!(
                "Unsupported layout transition {old:?} -> {new:?}"
            )))
        }
    };

    Ok(ImageBarrier {
        image,
        aspect,
        old_layout,
        new_layout,
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Device-local 2D image with its own memory, both released on drop
pub struct Image {
    device: SharedDevice,
    image: vk::Image,
    memory: DeviceMemory,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl Image {
    /// Create an optimal-tiling image in device-local memory
    pub fn new(device: SharedDevice, desc: &ImageDesc) -> VulkanResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(VulkanError::invalid("Cannot create an image with zero extent"));
        }
        let image = device.create_image(desc)?;
        let requirements = device.image_memory_requirements(image);
        let memory = match DeviceMemory::allocate(device.clone(), requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(image);
                return Err(e);
            }
        };
        if let Err(e) = device.bind_image_memory(image, memory.handle()) {
            device.destroy_image(image);
            return Err(e);
        }
        Ok(Self {
            device,
            image,
            memory,
            extent: desc.extent,
            format: desc.format,
        })
    }

    /// Get image handle
    pub const fn handle(&self) -> vk::Image {
        self.image
    }

    /// Image extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Pixel format
    pub const fn format(&self) -> vk::Format {
        self.format
    }

    /// Bytes of device memory backing the image
    pub const fn memory_size(&self) -> vk::DeviceSize {
        self.memory.size()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.device.destroy_image(self.image);
    }
}

/// Image view, destroyed on drop
pub struct ImageView {
    device: SharedDevice,
    view: vk::ImageView,
}

impl ImageView {
    /// Create a 2D view
    pub fn new(device: SharedDevice, desc: &ImageViewDesc) -> VulkanResult<Self> {
        let view = device.create_image_view(desc)?;
        Ok(Self { device, view })
    }

    /// Get image view handle
    pub const fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.device.destroy_image_view(self.view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::MockDevice;
    use std::rc::Rc;

    #[test]
    fn test_upload_transitions() {
        let to_dst = layout_transition_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_read = layout_transition_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_present_transition() {
        let barrier = layout_transition_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .unwrap();
        assert_eq!(barrier.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn test_unsupported_transition_rejected() {
        let result = layout_transition_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_image_and_view_released() {
        let mock = Rc::new(MockDevice::new());
        let image = Image::new(
            mock.clone(),
            &ImageDesc {
                extent: vk::Extent2D { width: 4, height: 4 },
                format: vk::Format::R8G8B8A8_SRGB,
                usage: vk::ImageUsageFlags::SAMPLED,
            },
        )
        .unwrap();
        let view = ImageView::new(
            mock.clone(),
            &ImageViewDesc {
                image: image.handle(),
                format: image.format(),
                aspect: vk::ImageAspectFlags::COLOR,
            },
        )
        .unwrap();
        assert_eq!(mock.live_object_count(), 3);
        drop(view);
        drop(image);
        assert_eq!(mock.live_object_count(), 0);
    }
}
