//! Command pools, command buffers and recording helpers
//!
//! A [`CommandBuffer`] tracks its lifecycle explicitly:
//!
//! ```text
//! Initial --begin--> Recording --end--> Executable --submit--> Pending
//!                                          ^                     |
//!                                          +---fence observed----+
//! ```
//!
//! `begin` is rejected while the buffer is `Pending`, which is how the frame loop guarantees a
//! buffer is never re-recorded before its fence was observed signaled.

use ash::vk;
use std::ops::Deref;
use std::rc::Rc;

use crate::render::vulkan::device_api::{DeviceApi, ImageBarrier, RenderPassBegin, SharedDevice};
use crate::render::vulkan::error::{VulkanError, VulkanResult};

struct PoolInner {
    device: SharedDevice,
    pool: vk::CommandPool,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
    }
}

/// Command pool bound to one queue family.
///
/// Buffers allocated from the pool keep it alive, so it is destroyed only after the last of
/// them.
pub struct CommandPool {
    inner: Rc<PoolInner>,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: SharedDevice, queue_family: u32) -> VulkanResult<Self> {
        Self::create(device, queue_family, false)
    }

    /// Create a pool for short-lived one-shot buffers
    pub fn transient(device: SharedDevice, queue_family: u32) -> VulkanResult<Self> {
        Self::create(device, queue_family, true)
    }

    fn create(device: SharedDevice, queue_family: u32, transient: bool) -> VulkanResult<Self> {
        let pool = device.create_command_pool(queue_family, transient)?;
        Ok(Self {
            inner: Rc::new(PoolInner { device, pool }),
            queue_family,
        })
    }

    /// Allocate one primary command buffer
    pub fn allocate(&self) -> VulkanResult<CommandBuffer> {
        let buffer = self
            .inner
            .device
            .allocate_command_buffers(self.inner.pool, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("vkAllocateCommandBuffers returned no buffer"))?;
        Ok(CommandBuffer {
            pool: Rc::clone(&self.inner),
            buffer,
            state: CommandBufferState::Initial,
        })
    }

    /// Queue family the pool's buffers are submitted to
    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.inner.pool
    }
}

/// Lifecycle state of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Freshly allocated or reset
    Initial,
    /// Between begin and end
    Recording,
    /// Recorded and ready to submit
    Executable,
    /// Submitted; the GPU may still be executing it
    Pending,
}

/// Primary command buffer with tracked state, freed on drop
pub struct CommandBuffer {
    pool: Rc<PoolInner>,
    buffer: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    /// Begin recording. Fails while the buffer is pending or already recording.
    pub fn begin(&mut self, one_time_submit: bool) -> VulkanResult<()> {
        match self.state {
            CommandBufferState::Pending => {
                return Err(VulkanError::invalid(
                    "Command buffer is pending execution; wait for its fence before recording",
                ))
            }
            CommandBufferState::Recording => {
                return Err(VulkanError::invalid("Command buffer already recording"));
            }
            CommandBufferState::Initial | CommandBufferState::Executable => {}
        }
        self.pool.device.begin_command_buffer(self.buffer, one_time_submit)?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Recording interface; only available between `begin` and `end`
    pub fn recorder(&self) -> VulkanResult<CommandRecorder<'_>> {
        if self.state != CommandBufferState::Recording {
            return Err(VulkanError::invalid("Command buffer not recording"));
        }
        Ok(CommandRecorder {
            device: self.pool.device.as_ref(),
            buffer: self.buffer,
        })
    }

    /// Finish recording
    pub fn end(&mut self) -> VulkanResult<()> {
        if self.state != CommandBufferState::Recording {
            return Err(VulkanError::invalid("Command buffer not recording"));
        }
        self.pool.device.end_command_buffer(self.buffer)?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Record that the buffer was handed to a queue
    pub fn mark_submitted(&mut self) -> VulkanResult<()> {
        if self.state != CommandBufferState::Executable {
            return Err(VulkanError::invalid("Only executable command buffers can be submitted"));
        }
        self.state = CommandBufferState::Pending;
        Ok(())
    }

    /// Record that the fence guarding the last submission was observed signaled
    pub fn mark_complete(&mut self) {
        if self.state == CommandBufferState::Pending {
            self.state = CommandBufferState::Executable;
        }
    }

    /// Return the buffer to the initial state. Fails while pending.
    pub fn reset(&mut self) -> VulkanResult<()> {
        if self.state == CommandBufferState::Pending {
            return Err(VulkanError::invalid("Cannot reset a pending command buffer"));
        }
        self.pool.device.reset_command_buffer(self.buffer)?;
        self.state = CommandBufferState::Initial;
        Ok(())
    }

    /// Current lifecycle state
    pub const fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Get command buffer handle
    pub const fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.pool.device.free_command_buffers(self.pool.pool, &[self.buffer]);
    }
}

/// Borrowed view of a recording command buffer
#[derive(Clone, Copy)]
pub struct CommandRecorder<'a> {
    device: &'a dyn DeviceApi,
    buffer: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    /// Command buffer being recorded
    pub const fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Record an image layout transition
    pub fn pipeline_barrier(&self, barrier: &ImageBarrier) {
        self.device.cmd_pipeline_barrier(self.buffer, barrier);
    }

    /// Copy `size` bytes from the start of `src` to the start of `dst`
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        self.device.cmd_copy_buffer(self.buffer, src, dst, size);
    }

    /// Copy tightly packed pixels from `src` into `dst`
    pub fn copy_buffer_to_image(&self, src: vk::Buffer, dst: vk::Image, extent: vk::Extent2D) {
        self.device.cmd_copy_buffer_to_image(self.buffer, src, dst, extent);
    }

    /// Begin a render pass; it ends when the returned guard is dropped
    pub fn begin_render_pass(&self, begin: &RenderPassBegin) -> ActiveRenderPass<'a> {
        self.device.cmd_begin_render_pass(self.buffer, begin);
        ActiveRenderPass { recorder: *self }
    }

    /// Cover `extent` with the dynamic viewport and scissor
    pub fn set_viewport_scissor(&self, extent: vk::Extent2D) {
        self.device.cmd_set_viewport_scissor(self.buffer, extent);
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        self.device.cmd_bind_pipeline(self.buffer, pipeline);
    }

    /// Bind descriptor sets starting at `first_set`
    pub fn bind_descriptor_sets(&self, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet]) {
        self.device.cmd_bind_descriptor_sets(self.buffer, layout, first_set, sets);
    }

    /// Update push constants
    pub fn push_constants(&self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        self.device.cmd_push_constants(self.buffer, layout, stages, offset, data);
    }

    /// Bind vertex and index buffers
    pub fn bind_geometry(&self, vertex_buffer: vk::Buffer, index_buffer: vk::Buffer) {
        self.device.cmd_bind_vertex_buffer(self.buffer, vertex_buffer);
        self.device.cmd_bind_index_buffer(self.buffer, index_buffer);
    }

    /// Draw `index_count` indices from the bound index buffer
    pub fn draw_indexed(&self, index_count: u32) {
        self.device.cmd_draw_indexed(self.buffer, index_count);
    }
}

/// RAII guard for an active render pass
pub struct ActiveRenderPass<'a> {
    recorder: CommandRecorder<'a>,
}

impl<'a> Deref for ActiveRenderPass<'a> {
    type Target = CommandRecorder<'a>;

    fn deref(&self) -> &Self::Target {
        &self.recorder
    }
}

impl Drop for ActiveRenderPass<'_> {
    fn drop(&mut self) {
        self.recorder.device.cmd_end_render_pass(self.recorder.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::MockDevice;

    fn buffer() -> (Rc<MockDevice>, CommandPool, CommandBuffer) {
        let mock = Rc::new(MockDevice::new());
        let pool = CommandPool::new(mock.clone(), 0).unwrap();
        let cmd = pool.allocate().unwrap();
        (mock, pool, cmd)
    }

    #[test]
    fn test_state_transitions() {
        let (_mock, _pool, mut cmd) = buffer();
        assert_eq!(cmd.state(), CommandBufferState::Initial);
        assert!(cmd.recorder().is_err());

        cmd.begin(false).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
        assert!(cmd.begin(false).is_err());
        cmd.recorder().unwrap().draw_indexed(3);

        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        cmd.mark_submitted().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Pending);

        cmd.mark_complete();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        cmd.begin(false).unwrap();
    }

    #[test]
    fn test_begin_rejected_while_pending() {
        let (_mock, _pool, mut cmd) = buffer();
        cmd.begin(true).unwrap();
        cmd.end().unwrap();
        cmd.mark_submitted().unwrap();

        let err = cmd.begin(true).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));
        assert!(cmd.reset().is_err());
    }

    #[test]
    fn test_submit_requires_executable() {
        let (_mock, _pool, mut cmd) = buffer();
        assert!(cmd.mark_submitted().is_err());
    }

    #[test]
    fn test_pool_outlives_buffers() {
        let (mock, pool, cmd) = buffer();
        drop(pool);
        assert_eq!(mock.live_object_count(), 1);
        drop(cmd);
        assert_eq!(mock.live_object_count(), 0);
    }
}
