//! Staged host to device uploads
//!
//! Every upload goes through a host-visible staging buffer, is recorded into a one-shot command
//! buffer from a dedicated transient pool, and blocks on a fence until the GPU finished the
//! copy. Only then is the staging buffer released.

use ash::vk;

use super::buffer::Buffer;
use super::image::{layout_transition_barrier, Image};
use crate::render::vulkan::device_api::{FenceStatus, ImageDesc, QueueKind, SharedDevice, SubmitDesc};
use crate::render::vulkan::error::{VulkanError, VulkanResult};
use crate::render::vulkan::rendering::commands::{CommandPool, CommandRecorder};
use crate::render::vulkan::state::sync::Fence;

/// Short-lived command context for blocking transfers on the graphics queue
pub struct UploadContext {
    device: SharedDevice,
    pool: CommandPool,
    fence: Fence,
    timeout_ns: u64,
}

impl UploadContext {
    /// Create the transient pool and fence
    pub fn new(device: SharedDevice, timeout_ns: u64) -> VulkanResult<Self> {
        let pool = CommandPool::transient(device.clone(), device.queue_families().graphics)?;
        let fence = Fence::new(device.clone(), false)?;
        Ok(Self {
            device,
            pool,
            fence,
            timeout_ns,
        })
    }

    /// Record commands with `record`, submit them and block until they completed
    pub fn immediate_submit(&self, record: impl FnOnce(&CommandRecorder<'_>)) -> VulkanResult<()> {
        let mut command_buffer = self.pool.allocate()?;
        command_buffer.begin(true)?;
        record(&command_buffer.recorder()?);
        command_buffer.end()?;

        self.fence.reset()?;
        let handles = [command_buffer.handle()];
        self.device.submit(
            QueueKind::Graphics,
            &SubmitDesc {
                command_buffers: &handles,
                wait_semaphores: &[],
                wait_stages: &[],
                signal_semaphores: &[],
                fence: self.fence.handle(),
            },
        )?;
        command_buffer.mark_submitted()?;

        match self.fence.wait(self.timeout_ns)? {
            FenceStatus::Signaled => {
                command_buffer.mark_complete();
                Ok(())
            }
            FenceStatus::TimedOut => {
                // The command buffer is freed on return and may still be executing.
                self.device.wait_idle()?;
                Err(VulkanError::invalid("Upload did not complete within the timeout"))
            }
        }
    }

    /// Create a device-local buffer initialized with `data` via a staging copy
    pub fn create_buffer(&self, usage: vk::BufferUsageFlags, data: &[u8]) -> VulkanResult<Buffer> {
        let size = data.len() as vk::DeviceSize;
        let staging = Buffer::host_visible(self.device.clone(), size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(0, data)?;

        let buffer = Buffer::device_local(self.device.clone(), size, usage | vk::BufferUsageFlags::TRANSFER_DST)?;
        self.immediate_submit(|cmd| cmd.copy_buffer(staging.handle(), buffer.handle(), size))?;

        log::trace!("Uploaded {} bytes into device-local buffer", size);
        Ok(buffer)
    }

    /// Create a sampled device-local image initialized with `pixels`.
    ///
    /// The image ends in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn create_image(&self, extent: vk::Extent2D, format: vk::Format, pixels: &[u8]) -> VulkanResult<Image> {
        let staging = Buffer::host_visible(
            self.device.clone(),
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        staging.write(0, pixels)?;

        let image = Image::new(
            self.device.clone(),
            &ImageDesc {
                extent,
                format,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            },
        )?;
        let to_transfer = layout_transition_barrier(
            image.handle(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        let to_shader = layout_transition_barrier(
            image.handle(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        self.immediate_submit(|cmd| {
            cmd.pipeline_barrier(&to_transfer);
            cmd.copy_buffer_to_image(staging.handle(), image.handle(), extent);
            cmd.pipeline_barrier(&to_shader);
        })?;

        log::trace!("Uploaded {}x{} image", extent.width, extent.height);
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::{MockDevice, MockEvent};
    use std::rc::Rc;

    #[test]
    fn test_staging_round_trip() {
        let mock = Rc::new(MockDevice::new());
        let upload = UploadContext::new(mock.clone(), u64::MAX).unwrap();
        let data: Vec<u8> = (0..=255).collect();

        let buffer = upload.create_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, &data).unwrap();
        assert_eq!(buffer.size(), 256);
        assert_eq!(mock.buffer_contents(buffer.handle()).unwrap(), data);
    }

    #[test]
    fn test_staging_released_after_upload() {
        let mock = Rc::new(MockDevice::new());
        let upload = UploadContext::new(mock.clone(), u64::MAX).unwrap();
        let baseline = mock.live_object_count();

        let buffer = upload.create_buffer(vk::BufferUsageFlags::INDEX_BUFFER, &[1, 2, 3, 4]).unwrap();
        // Only the destination buffer and its memory remain.
        assert_eq!(mock.live_object_count(), baseline + 2);
        drop(buffer);
        assert_eq!(mock.live_object_count(), baseline);
    }

    #[test]
    fn test_upload_waits_on_fence() {
        let mock = Rc::new(MockDevice::new());
        let upload = UploadContext::new(mock.clone(), u64::MAX).unwrap();
        upload
            .create_image(vk::Extent2D { width: 2, height: 2 }, vk::Format::R8G8B8A8_SRGB, &[255; 16])
            .unwrap();

        let events = mock.events();
        let submit = events
            .iter()
            .position(|e| matches!(e, MockEvent::Submit { .. }))
            .unwrap();
        assert!(events[submit..]
            .iter()
            .any(|e| matches!(e, MockEvent::WaitFence { signaled: true, .. })));
    }

    #[test]
    fn test_stalled_upload_reports_error() {
        let mock = Rc::new(MockDevice::new());
        let upload = UploadContext::new(mock.clone(), 1_000).unwrap();
        mock.hold_fences(true);
        assert!(upload.create_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, &[0; 8]).is_err());
    }
}
