//! Per-frame orchestration
//!
//! [`FrameScheduler::render_frame`] runs one iteration of the frame loop for the slot
//! `frame_number % frames_in_flight`:
//!
//! 1. recreate the swapchain if it was flagged out of date
//! 2. wait on the slot's fence
//! 3. acquire an image, signaling the slot's `image_available` semaphore
//! 4. reset the fence and the slot's descriptor pools
//! 5. record: transition to color attachment, hand over to the [`FrameRecorder`], transition
//!    to present
//! 6. submit waiting on `image_available`, signaling `render_finished` and the fence
//! 7. present waiting on `render_finished`
//!
//! Stale swapchains on acquire or present only flag recreation; the frame is skipped and the
//! loop carries on.

use ash::vk;

use super::swapchain::{Swapchain, SwapchainManager, SwapchainPolicy};
use super::sync::FrameSlot;
use crate::render::vulkan::device_api::{AcquireOutcome, FenceStatus, PresentOutcome, QueueKind, SharedDevice, SubmitDesc};
use crate::render::vulkan::error::{VulkanError, VulkanResult};
use crate::render::vulkan::rendering::commands::{CommandPool, CommandRecorder};
use crate::render::vulkan::resources::descriptor::{DescriptorAllocator, PoolSizeRatio};
use crate::render::vulkan::resources::image::layout_transition_barrier;

/// Everything a recorder may touch while recording one frame
pub struct FrameContext<'a> {
    /// Recording command buffer of the current slot
    pub commands: CommandRecorder<'a>,
    /// Slot index in `0..frames_in_flight`
    pub frame_index: usize,
    /// Frames presented so far
    pub frame_number: u64,
    /// Acquired swapchain image
    pub image_index: u32,
    /// Swapchain extent
    pub extent: vk::Extent2D,
    /// Descriptor allocator of the slot, reset once the slot's previous frame completed
    pub descriptors: &'a mut DescriptorAllocator,
}

/// Renderer hook invoked once per frame between the layout transitions of the target image
pub trait FrameRecorder {
    /// Record this frame's commands
    fn record(&mut self, ctx: &mut FrameContext<'_>) -> VulkanResult<()>;

    /// Drop anything built on the current swapchain's views. The device is idle.
    fn release_swapchain_resources(&mut self) {}

    /// Rebuild per-image resources for a new swapchain
    fn swapchain_recreated(&mut self, swapchain: &Swapchain) -> VulkanResult<()>;
}

/// Overlay/UI hook, recorded inside the scene render pass after the scene draws
pub trait OverlayRecorder {
    /// Record overlay draws
    fn record_overlay(&mut self, ctx: &mut FrameContext<'_>) -> VulkanResult<()>;
}

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Recorded, submitted and queued for presentation
    Presented,
    /// Nothing submitted; the swapchain is out of date or the window has zero area
    Skipped,
    /// The slot's fence or the image acquisition did not complete in time
    TimedOut,
}

/// Frame loop parameters
#[derive(Debug, Clone)]
pub struct FrameSettings {
    /// Number of frame slots
    pub frames_in_flight: usize,
    /// Timeout for the slot fence wait
    pub fence_timeout_ns: u64,
    /// Timeout for image acquisition
    pub acquire_timeout_ns: u64,
    /// Swapchain format and present mode preferences
    pub swapchain: SwapchainPolicy,
    /// Capacity of each slot allocator's first descriptor pool
    pub descriptor_sets_per_pool: u32,
    /// Pool growth multiplier
    pub descriptor_growth_factor: f32,
    /// Cap on the capacity of a single descriptor pool
    pub descriptor_max_sets_per_pool: u32,
    /// Descriptor type ratios
    pub descriptor_ratios: Vec<PoolSizeRatio>,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ns: 1_000_000_000,
            acquire_timeout_ns: 1_000_000_000,
            swapchain: SwapchainPolicy::default(),
            descriptor_sets_per_pool: 64,
            descriptor_growth_factor: 1.5,
            descriptor_max_sets_per_pool: 4092,
            descriptor_ratios: PoolSizeRatio::defaults(),
        }
    }
}

/// Owns the frame slots, their descriptor allocators and the swapchain
pub struct FrameScheduler {
    device: SharedDevice,
    slots: Vec<FrameSlot>,
    descriptors: Vec<DescriptorAllocator>,
    swapchain: SwapchainManager,
    _command_pool: CommandPool,
    settings: FrameSettings,
    frame_number: u64,
    notified_generation: u64,
}

impl FrameScheduler {
    /// Create `frames_in_flight` slots; the swapchain is created by the first frame
    pub fn new(device: SharedDevice, settings: FrameSettings) -> VulkanResult<Self> {
        if settings.frames_in_flight == 0 {
            return Err(VulkanError::invalid("frames_in_flight must be at least 1"));
        }
        let command_pool = CommandPool::new(device.clone(), device.queue_families().graphics)?;
        let slots = (0..settings.frames_in_flight)
            .map(|_| FrameSlot::new(&device, &command_pool))
            .collect::<VulkanResult<Vec<_>>>()?;
        let descriptors = (0..settings.frames_in_flight)
            .map(|_| {
                DescriptorAllocator::new(
                    device.clone(),
                    settings.descriptor_sets_per_pool,
                    settings.descriptor_ratios.clone(),
                    settings.descriptor_growth_factor,
                    settings.descriptor_max_sets_per_pool,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        log::info!("Frame scheduler ready with {} frames in flight", settings.frames_in_flight);
        Ok(Self {
            swapchain: SwapchainManager::new(device.clone(), settings.swapchain),
            device,
            slots,
            descriptors,
            _command_pool: command_pool,
            settings,
            frame_number: 0,
            notified_generation: 0,
        })
    }

    /// Run one iteration of the frame loop
    pub fn render_frame(
        &mut self,
        framebuffer: vk::Extent2D,
        recorder: &mut dyn FrameRecorder,
    ) -> VulkanResult<FrameOutcome> {
        if self.swapchain.needs_recreation()
            && !self
                .swapchain
                .ensure_ready(framebuffer, || recorder.release_swapchain_resources())?
        {
            return Ok(FrameOutcome::Skipped);
        }
        let swapchain = self
            .swapchain
            .swapchain()
            .ok_or_else(|| VulkanError::invalid("No swapchain after successful recreation"))?;
        if swapchain.generation() != self.notified_generation {
            recorder.swapchain_recreated(swapchain)?;
            self.notified_generation = swapchain.generation();
        }
        let swapchain_handle = swapchain.handle();
        let extent = swapchain.extent();
        let images = swapchain.images().to_vec();

        let slot_index = (self.frame_number % self.slots.len() as u64) as usize;
        let slot = &mut self.slots[slot_index];

        if slot.in_flight.wait(self.settings.fence_timeout_ns)? == FenceStatus::TimedOut {
            log::warn!("Frame slot {} still busy after {} ns", slot_index, self.settings.fence_timeout_ns);
            return Ok(FrameOutcome::TimedOut);
        }
        slot.command_buffer.mark_complete();

        let acquired = self.device.acquire_next_image(
            swapchain_handle,
            self.settings.acquire_timeout_ns,
            slot.image_available.handle(),
        )?;
        let (image_index, suboptimal) = match acquired {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                self.swapchain.mark_out_of_date();
                return Ok(FrameOutcome::Skipped);
            }
            AcquireOutcome::TimedOut => return Ok(FrameOutcome::TimedOut),
        };
        let image = *images
            .get(image_index as usize)
            .ok_or_else(|| VulkanError::invalid(format!("Acquired image index {image_index} out of range")))?;

        slot.in_flight.reset()?;
        self.descriptors[slot_index].reset_pools()?;

        slot.command_buffer.begin(true)?;
        {
            let commands = slot.command_buffer.recorder()?;
            commands.pipeline_barrier(&layout_transition_barrier(
                image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )?);

            let mut ctx = FrameContext {
                commands,
                frame_index: slot_index,
                frame_number: self.frame_number,
                image_index,
                extent,
                descriptors: &mut self.descriptors[slot_index],
            };
            recorder.record(&mut ctx)?;

            commands.pipeline_barrier(&layout_transition_barrier(
                image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            )?);
        }
        slot.command_buffer.end()?;

        let command_buffers = [slot.command_buffer.handle()];
        let wait_semaphores = [slot.image_available.handle()];
        let signal_semaphores = [slot.render_finished.handle()];
        self.device.submit(
            QueueKind::Graphics,
            &SubmitDesc {
                command_buffers: &command_buffers,
                wait_semaphores: &wait_semaphores,
                wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                signal_semaphores: &signal_semaphores,
                fence: slot.in_flight.handle(),
            },
        )?;
        slot.command_buffer.mark_submitted()?;

        let presented = self
            .device
            .present(swapchain_handle, image_index, slot.render_finished.handle())?;
        if suboptimal || presented != PresentOutcome::Presented {
            self.swapchain.mark_out_of_date();
        }

        self.frame_number += 1;
        Ok(FrameOutcome::Presented)
    }

    /// Flag the swapchain for recreation before the next frame
    pub fn request_swapchain_recreation(&mut self) {
        self.swapchain.mark_out_of_date();
    }

    /// Current swapchain, once the first frame created it
    pub const fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.swapchain()
    }

    /// Swapchain state machine
    pub const fn swapchain_manager(&self) -> &SwapchainManager {
        &self.swapchain
    }

    /// Frames presented so far
    pub const fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Wait for all submitted work and tear down the swapchain
    pub fn shutdown(&mut self) -> VulkanResult<()> {
        self.device.wait_idle()?;
        self.swapchain.destroy()
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle before releasing frame resources: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::{MockDevice, MockEvent};
    use crate::render::vulkan::resources::descriptor::{DescriptorSetLayout, DescriptorSetLayoutBuilder};
    use std::collections::HashMap;
    use std::rc::Rc;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 1280, height: 720 };

    struct TestRecorder {
        layout: DescriptorSetLayout,
        recorded: Vec<(usize, vk::Extent2D)>,
        recreated: Vec<vk::Extent2D>,
        released: usize,
    }

    impl FrameRecorder for TestRecorder {
        fn record(&mut self, ctx: &mut FrameContext<'_>) -> VulkanResult<()> {
            for _ in 0..3 {
                ctx.descriptors.allocate(&self.layout)?;
            }
            ctx.commands.draw_indexed(36);
            self.recorded.push((ctx.frame_index, ctx.extent));
            Ok(())
        }

        fn release_swapchain_resources(&mut self) {
            self.released += 1;
        }

        fn swapchain_recreated(&mut self, swapchain: &Swapchain) -> VulkanResult<()> {
            self.recreated.push(swapchain.extent());
            Ok(())
        }
    }

    fn setup() -> (Rc<MockDevice>, FrameScheduler, TestRecorder) {
        let mock = Rc::new(MockDevice::new());
        let settings = FrameSettings {
            descriptor_sets_per_pool: 4,
            ..FrameSettings::default()
        };
        let scheduler = FrameScheduler::new(mock.clone(), settings).unwrap();
        let recorder = TestRecorder {
            layout: DescriptorSetLayoutBuilder::new()
                .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
                .build(mock.clone())
                .unwrap(),
            recorded: Vec::new(),
            recreated: Vec::new(),
            released: 0,
        };
        (mock, scheduler, recorder)
    }

    #[test]
    fn test_fence_observed_before_rerecording() {
        let (mock, mut scheduler, mut recorder) = setup();
        for _ in 0..6 {
            assert_eq!(scheduler.render_frame(EXTENT, &mut recorder).unwrap(), FrameOutcome::Presented);
        }

        let mut fence_of = HashMap::new();
        let mut outstanding = HashMap::new();
        let mut begins = 0;
        for event in mock.events() {
            match event {
                MockEvent::Submit {
                    command_buffers, fence, ..
                } => {
                    for cb in command_buffers {
                        fence_of.insert(cb, fence);
                    }
                    outstanding.insert(fence, true);
                }
                MockEvent::WaitFence { fence, signaled: true } => {
                    outstanding.insert(fence, false);
                }
                MockEvent::BeginCommandBuffer(cb) => {
                    begins += 1;
                    if let Some(fence) = fence_of.get(&cb) {
                        assert!(!outstanding[fence], "command buffer re-recorded before its fence was observed");
                    }
                }
                _ => {}
            }
        }
        assert_eq!(begins, 6);
    }

    #[test]
    fn test_slots_rotate_and_never_share_fences() {
        let (mock, mut scheduler, mut recorder) = setup();
        for _ in 0..4 {
            scheduler.render_frame(EXTENT, &mut recorder).unwrap();
        }
        let fences: Vec<_> = mock
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Submit { fence, .. } => Some(fence),
                _ => None,
            })
            .collect();
        assert_eq!(fences.len(), 4);
        assert_ne!(fences[0], fences[1]);
        assert_eq!(fences[0], fences[2]);
        assert_eq!(fences[1], fences[3]);

        let slots: Vec<_> = recorder.recorded.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_slot_descriptors_reset_after_fence_wait() {
        let (mock, mut scheduler, mut recorder) = setup();
        for _ in 0..10 {
            scheduler.render_frame(EXTENT, &mut recorder).unwrap();
        }
        // Three sets per frame fit the first pool of each slot, so nothing ever grows.
        assert_eq!(mock.descriptor_pool_count(), 2);
    }

    #[test]
    fn test_resize_mid_loop_recovers() {
        let (mock, mut scheduler, mut recorder) = setup();
        assert_eq!(scheduler.render_frame(EXTENT, &mut recorder).unwrap(), FrameOutcome::Presented);

        let resized = vk::Extent2D { width: 800, height: 600 };
        mock.resize_surface(resized);
        mock.clear_events();
        assert_eq!(scheduler.render_frame(resized, &mut recorder).unwrap(), FrameOutcome::Skipped);
        assert!(!mock.events().iter().any(|e| matches!(e, MockEvent::Submit { .. } | MockEvent::ResetFence(_))));

        assert_eq!(scheduler.render_frame(resized, &mut recorder).unwrap(), FrameOutcome::Presented);
        assert_eq!(recorder.recreated, vec![EXTENT, resized]);
        assert_eq!(recorder.released, 1);
        assert_eq!(recorder.recorded.last().unwrap().1, resized);
        assert_eq!(scheduler.swapchain().unwrap().generation(), 2);
    }

    #[test]
    fn test_suboptimal_present_triggers_recreation() {
        let (mock, mut scheduler, mut recorder) = setup();
        mock.push_present_outcome(PresentOutcome::Suboptimal);
        scheduler.render_frame(EXTENT, &mut recorder).unwrap();
        assert!(scheduler.swapchain_manager().needs_recreation());

        assert_eq!(scheduler.render_frame(EXTENT, &mut recorder).unwrap(), FrameOutcome::Presented);
        assert_eq!(scheduler.swapchain().unwrap().generation(), 2);
    }

    #[test]
    fn test_minimized_window_skips_frames() {
        let (mock, mut scheduler, mut recorder) = setup();
        scheduler.render_frame(EXTENT, &mut recorder).unwrap();

        let zero = vk::Extent2D { width: 0, height: 0 };
        mock.resize_surface(zero);
        scheduler.request_swapchain_recreation();
        mock.clear_events();
        for _ in 0..3 {
            assert_eq!(scheduler.render_frame(zero, &mut recorder).unwrap(), FrameOutcome::Skipped);
        }
        assert!(mock.events().is_empty());
        assert_eq!(recorder.released, 0);
    }

    #[test]
    fn test_stalled_fence_times_out_without_recording() {
        let (mock, mut scheduler, mut recorder) = setup();
        mock.hold_fences(true);
        scheduler.render_frame(EXTENT, &mut recorder).unwrap();
        scheduler.render_frame(EXTENT, &mut recorder).unwrap();

        mock.clear_events();
        assert_eq!(scheduler.render_frame(EXTENT, &mut recorder).unwrap(), FrameOutcome::TimedOut);
        assert!(!mock
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::BeginCommandBuffer(_) | MockEvent::Acquire { .. })));
        assert_eq!(scheduler.frame_number(), 2);
    }
}
