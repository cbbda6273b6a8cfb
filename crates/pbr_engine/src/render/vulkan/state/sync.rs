//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for fences and semaphores, plus [`FrameSlot`], the per-frame bundle the
//! frame loop rotates through. Two slots never share a fence or semaphore.

use ash::vk;

use crate::render::vulkan::device_api::{FenceStatus, SharedDevice};
use crate::render::vulkan::error::VulkanResult;
use crate::render::vulkan::rendering::commands::{CommandBuffer, CommandPool};

/// Binary semaphore, destroyed on drop
pub struct Semaphore {
    device: SharedDevice,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: SharedDevice) -> VulkanResult<Self> {
        let semaphore = device.create_semaphore()?;
        Ok(Self { device, semaphore })
    }

    /// Get semaphore handle
    pub const fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
    }
}

/// Fence for CPU/GPU synchronization, destroyed on drop
pub struct Fence {
    device: SharedDevice,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: SharedDevice, signaled: bool) -> VulkanResult<Self> {
        let fence = device.create_fence(signaled)?;
        Ok(Self { device, fence })
    }

    /// Block until the fence is signaled or `timeout_ns` elapses
    pub fn wait(&self, timeout_ns: u64) -> VulkanResult<FenceStatus> {
        self.device.wait_for_fence(self.fence, timeout_ns)
    }

    /// Reset fence to unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        self.device.reset_fence(self.fence)
    }

    /// Get fence handle
    pub const fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
    }
}

/// Resources exclusively owned by one frame in flight
pub struct FrameSlot {
    /// Signaled when the acquired swapchain image is ready to be rendered to
    pub image_available: Semaphore,
    /// Signaled when this slot's rendering finished and the image may be presented
    pub render_finished: Semaphore,
    /// Signaled when the GPU finished this slot's command buffer
    pub in_flight: Fence,
    /// Command buffer recorded each time the slot comes around
    pub command_buffer: CommandBuffer,
}

impl FrameSlot {
    /// Create a slot whose fence starts signaled so the first wait returns immediately
    pub fn new(device: &SharedDevice, pool: &CommandPool) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
            command_buffer: pool.allocate()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::MockDevice;
    use std::rc::Rc;

    #[test]
    fn test_fence_lifecycle() {
        let mock = Rc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();

        let fence = Fence::new(device, true).unwrap();
        assert_eq!(fence.wait(u64::MAX).unwrap(), FenceStatus::Signaled);
        fence.reset().unwrap();
        assert_eq!(fence.wait(0).unwrap(), FenceStatus::TimedOut);
        assert_eq!(mock.live_object_count(), 1);

        drop(fence);
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_slots_do_not_share_primitives() {
        let mock = Rc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();
        let pool = CommandPool::new(device.clone(), 0).unwrap();

        let a = FrameSlot::new(&device, &pool).unwrap();
        let b = FrameSlot::new(&device, &pool).unwrap();
        assert_ne!(a.in_flight.handle(), b.in_flight.handle());
        assert_ne!(a.image_available.handle(), b.image_available.handle());
        assert_ne!(a.render_finished.handle(), b.render_finished.handle());
        assert_ne!(a.image_available.handle(), a.render_finished.handle());
        assert!(mock.is_fence_signaled(a.in_flight.handle()));
    }
}
