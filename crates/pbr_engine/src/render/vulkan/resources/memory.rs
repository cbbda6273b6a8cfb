//! Device memory allocations

use ash::vk;

use crate::render::vulkan::device_api::SharedDevice;
use crate::render::vulkan::error::{VulkanError, VulkanResult};

/// Index of the first memory type allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// One device memory allocation, freed on drop
pub struct DeviceMemory {
    device: SharedDevice,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl DeviceMemory {
    /// Allocate memory satisfying `requirements` with the given property flags.
    ///
    /// Out-of-memory results are reported as [`VulkanError::OutOfMemory`].
    pub fn allocate(
        device: SharedDevice,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let type_index = find_memory_type(&device.memory_properties(), requirements.memory_type_bits, properties)?;
        let memory = device
            .allocate_memory(requirements.size, type_index)
            .map_err(|e| match e.result() {
                Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                    VulkanError::OutOfMemory {
                        requested: requirements.size,
                    }
                }
                _ => e,
            })?;
        Ok(Self {
            device,
            memory,
            size: requirements.size,
        })
    }

    /// Copy bytes into the allocation; it must be host visible and coherent
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        self.check_range(offset, data.len())?;
        self.device.write_memory(self.memory, offset, data)
    }

    /// Copy bytes out of the allocation; it must be host visible and coherent
    pub fn read(&self, offset: vk::DeviceSize, out: &mut [u8]) -> VulkanResult<()> {
        self.check_range(offset, out.len())?;
        self.device.read_memory(self.memory, offset, out)
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> VulkanResult<()> {
        let end = offset.checked_add(len as vk::DeviceSize);
        match end {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(VulkanError::invalid(format!(
                "Memory access of {len} bytes at offset {offset} exceeds allocation of {} bytes",
                self.size
            ))),
        }
    }

    /// Get memory handle
    pub const fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Allocation size in bytes
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        self.device.free_memory(self.memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::{MockDevice, DEVICE_LOCAL_TYPE, HOST_VISIBLE_TYPE};
    use crate::render::vulkan::device_api::DeviceApi;
    use std::rc::Rc;

    #[test]
    fn test_find_memory_type() {
        let props = MockDevice::new().memory_properties();
        assert_eq!(
            find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            DEVICE_LOCAL_TYPE
        );
        assert_eq!(
            find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
                .unwrap(),
            HOST_VISIBLE_TYPE
        );
    }

    #[test]
    fn test_type_filter_respected() {
        let props = MockDevice::new().memory_properties();
        assert!(matches!(
            find_memory_type(&props, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Err(VulkanError::NoSuitableMemoryType)
        ));
        assert!(find_memory_type(&props, 0, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn test_allocation_failure_is_out_of_memory() {
        let mock = Rc::new(MockDevice::new());
        mock.fail_memory_allocations(true);
        let requirements = vk::MemoryRequirements {
            size: 1024,
            alignment: 16,
            memory_type_bits: 0b11,
        };
        let result = DeviceMemory::allocate(mock.clone(), requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert!(matches!(result, Err(VulkanError::OutOfMemory { requested: 1024 })));
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_out_of_range_write_rejected() {
        let mock = Rc::new(MockDevice::new());
        let requirements = vk::MemoryRequirements {
            size: 8,
            alignment: 4,
            memory_type_bits: 0b10,
        };
        let memory = DeviceMemory::allocate(mock, requirements, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        memory.write(4, &[1, 2, 3, 4]).unwrap();
        assert!(memory.write(6, &[1, 2, 3]).is_err());

        let mut out = [0u8; 4];
        memory.read(4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
