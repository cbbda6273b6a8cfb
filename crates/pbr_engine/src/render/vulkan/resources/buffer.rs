//! GPU buffers

use ash::vk;

use super::memory::DeviceMemory;
use crate::render::vulkan::device_api::{BufferDesc, SharedDevice};
use crate::render::vulkan::error::{VulkanError, VulkanResult};

/// Buffer with its own memory allocation, both released on drop
pub struct Buffer {
    device: SharedDevice,
    buffer: vk::Buffer,
    memory: DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory with `properties` to it
    pub fn new(
        device: SharedDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::invalid("Cannot create a zero-sized buffer"));
        }
        let buffer = device.create_buffer(&BufferDesc { size, usage })?;
        let requirements = device.buffer_memory_requirements(buffer);
        let memory = match DeviceMemory::allocate(device.clone(), requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(buffer);
                return Err(e);
            }
        };
        if let Err(e) = device.bind_buffer_memory(buffer, memory.handle()) {
            device.destroy_buffer(buffer);
            return Err(e);
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
            usage,
        })
    }

    /// Host-visible, host-coherent buffer the CPU can write directly
    pub fn host_visible(device: SharedDevice, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        Self::new(
            device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Device-local buffer without initial contents.
    ///
    /// Use [`UploadContext::create_buffer`](super::upload::UploadContext::create_buffer) to
    /// create one filled with host data.
    pub fn device_local(device: SharedDevice, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        Self::new(device, size, usage, vk::MemoryPropertyFlags::DEVICE_LOCAL)
    }

    /// Write bytes at `offset`; the buffer must be host visible
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        self.memory.write(offset, data)
    }

    /// Write a slice of plain-old-data values at the start of the buffer
    pub fn write_pod<T: bytemuck::Pod>(&self, values: &[T]) -> VulkanResult<()> {
        self.write(0, bytemuck::cast_slice(values))
    }

    /// Read bytes at `offset`; the buffer must be host visible
    pub fn read(&self, offset: vk::DeviceSize, out: &mut [u8]) -> VulkanResult<()> {
        self.memory.read(offset, out)
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size requested at creation
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags
    pub const fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::MockDevice;
    use std::rc::Rc;

    #[test]
    fn test_host_visible_write_read() {
        let mock = Rc::new(MockDevice::new());
        let buffer = Buffer::host_visible(mock.clone(), 16, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
        buffer.write_pod(&[1.0_f32, 2.0, 3.0, 4.0]).unwrap();

        let mut out = [0u8; 16];
        buffer.read(0, &mut out).unwrap();
        let third = f32::from_ne_bytes([out[8], out[9], out[10], out[11]]);
        approx::assert_relative_eq!(third, 3.0);
        assert_eq!(buffer.size(), 16);
    }

    #[test]
    fn test_drop_releases_buffer_and_memory() {
        let mock = Rc::new(MockDevice::new());
        let buffer = Buffer::device_local(mock.clone(), 64, vk::BufferUsageFlags::VERTEX_BUFFER).unwrap();
        assert_eq!(mock.live_object_count(), 2);
        drop(buffer);
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_failed_allocation_leaks_nothing() {
        let mock = Rc::new(MockDevice::new());
        mock.fail_memory_allocations(true);
        let result = Buffer::device_local(mock.clone(), 64, vk::BufferUsageFlags::VERTEX_BUFFER);
        assert!(matches!(result, Err(VulkanError::OutOfMemory { .. })));
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mock = Rc::new(MockDevice::new());
        assert!(Buffer::host_visible(mock, 0, vk::BufferUsageFlags::TRANSFER_SRC).is_err());
    }
}
