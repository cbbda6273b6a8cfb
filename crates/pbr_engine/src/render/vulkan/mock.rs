//! In-process test backend
//!
//! `MockDevice` implements [`DeviceApi`] without a GPU. Handles are opaque monotonically
//! increasing integers, buffer memory lives in host byte vectors, recorded buffer copies execute
//! when their command buffer is submitted, and submission signals the fence immediately unless
//! fences are held. Every call relevant to frame ordering is appended to an event log that tests
//! inspect with [`MockDevice::events`].

use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use super::device_api::{
    AcquireOutcome, BufferDesc, DescriptorBinding, DescriptorWrite, DeviceApi, FenceStatus,
    FramebufferDesc, GraphicsPipelineDesc, ImageBarrier, ImageDesc, ImageViewDesc,
    PipelineLayoutDesc, PresentOutcome, QueueFamilies, QueueKind, RenderPassBegin, RenderPassDesc,
    SamplerDesc, SubmitDesc, SurfaceSupport, SwapchainParams,
};
use super::error::{VulkanError, VulkanResult};

/// Memory type index the mock reports as device local
pub const DEVICE_LOCAL_TYPE: u32 = 0;
/// Memory type index the mock reports as host visible and coherent
pub const HOST_VISIBLE_TYPE: u32 = 1;

/// Observable call recorded by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A fence wait returned
    WaitFence {
        /// Fence waited on
        fence: vk::Fence,
        /// Whether the wait observed the signaled state
        signaled: bool,
    },
    /// A fence was reset
    ResetFence(vk::Fence),
    /// Recording began
    BeginCommandBuffer(vk::CommandBuffer),
    /// Recording ended
    EndCommandBuffer(vk::CommandBuffer),
    /// Work was submitted
    Submit {
        /// Queue the work was submitted to
        queue: QueueKind,
        /// Submitted command buffers
        command_buffers: Vec<vk::CommandBuffer>,
        /// Fence signaled on completion
        fence: vk::Fence,
    },
    /// An image acquisition completed
    Acquire {
        /// Swapchain acquired from
        swapchain: vk::SwapchainKHR,
        /// Classified result
        outcome: AcquireOutcome,
    },
    /// A present completed
    Present {
        /// Swapchain presented to
        swapchain: vk::SwapchainKHR,
        /// Presented image
        image_index: u32,
        /// Classified result
        outcome: PresentOutcome,
    },
    /// A swapchain was created
    CreateSwapchain {
        /// New handle
        swapchain: vk::SwapchainKHR,
        /// Image extent
        extent: vk::Extent2D,
        /// Number of images created
        image_count: u32,
    },
    /// A swapchain was destroyed
    DestroySwapchain(vk::SwapchainKHR),
    /// An image view was created
    CreateImageView(vk::ImageView),
    /// An image view was destroyed
    DestroyImageView(vk::ImageView),
    /// A descriptor pool was created
    CreateDescriptorPool {
        /// New handle
        pool: vk::DescriptorPool,
        /// Capacity in sets
        max_sets: u32,
    },
    /// A descriptor pool was reset
    ResetDescriptorPool(vk::DescriptorPool),
    /// The device was waited idle
    WaitIdle,
}

#[derive(Debug, Default)]
struct PoolState {
    max_sets: u32,
    allocated: u32,
}

#[derive(Debug)]
struct MockState {
    next_handle: u64,
    events: Vec<MockEvent>,
    live: HashMap<u64, &'static str>,
    queue_families: QueueFamilies,
    surface: SurfaceSupport,
    fences: HashMap<vk::Fence, bool>,
    hold_fences: bool,
    fail_memory: bool,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    swapchains: HashMap<vk::SwapchainKHR, Vec<vk::Image>>,
    stale_swapchains: HashSet<vk::SwapchainKHR>,
    next_image: u32,
    memory: HashMap<vk::DeviceMemory, Vec<u8>>,
    buffer_memory: HashMap<vk::Buffer, vk::DeviceMemory>,
    buffer_sizes: HashMap<vk::Buffer, vk::DeviceSize>,
    pending_copies: HashMap<vk::CommandBuffer, Vec<(vk::Buffer, vk::Buffer, vk::DeviceSize)>>,
    descriptor_pools: HashMap<vk::DescriptorPool, PoolState>,
    set_owner: HashMap<vk::DescriptorSet, vk::DescriptorPool>,
    draw_calls: u32,
}

impl MockState {
    fn next<H: Handle>(&mut self, kind: &'static str) -> H {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        H::from_raw(self.next_handle)
    }

    fn untracked<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn release<H: Handle>(&mut self, handle: H) {
        self.live.remove(&handle.as_raw());
    }
}

/// In-process [`DeviceApi`] implementation for tests
#[derive(Debug)]
pub struct MockDevice {
    state: RefCell<MockState>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a mock with a 1280x720 surface supporting 2 to 3 images
    pub fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width: 1280, height: 720 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        };
        let surface = SurfaceSupport {
            capabilities,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };

        Self {
            state: RefCell::new(MockState {
                next_handle: 0,
                events: Vec::new(),
                live: HashMap::new(),
                queue_families: QueueFamilies { graphics: 0, present: 0 },
                surface,
                fences: HashMap::new(),
                hold_fences: false,
                fail_memory: false,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                swapchains: HashMap::new(),
                stale_swapchains: HashSet::new(),
                next_image: 0,
                memory: HashMap::new(),
                buffer_memory: HashMap::new(),
                buffer_sizes: HashMap::new(),
                pending_copies: HashMap::new(),
                descriptor_pools: HashMap::new(),
                set_owner: HashMap::new(),
                draw_calls: 0,
            }),
        }
    }

    /// Replace the reported surface capabilities
    pub fn set_surface_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        self.state.borrow_mut().surface.capabilities = capabilities;
    }

    /// Replace the reported surface formats and present modes
    pub fn set_surface_formats(&self, formats: Vec<vk::SurfaceFormatKHR>, present_modes: Vec<vk::PresentModeKHR>) {
        let mut state = self.state.borrow_mut();
        state.surface.formats = formats;
        state.surface.present_modes = present_modes;
    }

    /// Simulate a window resize: the surface reports `extent` and every existing swapchain
    /// becomes out of date.
    pub fn resize_surface(&self, extent: vk::Extent2D) {
        let mut state = self.state.borrow_mut();
        state.surface.capabilities.current_extent = extent;
        let existing: Vec<_> = state.swapchains.keys().copied().collect();
        state.stale_swapchains.extend(existing);
    }

    /// Queue an outcome returned by the next acquire instead of the default
    pub fn push_acquire_outcome(&self, outcome: AcquireOutcome) {
        self.state.borrow_mut().acquire_script.push_back(outcome);
    }

    /// Queue an outcome returned by the next present instead of the default
    pub fn push_present_outcome(&self, outcome: PresentOutcome) {
        self.state.borrow_mut().present_script.push_back(outcome);
    }

    /// When set, submissions no longer signal their fence
    pub fn hold_fences(&self, hold: bool) {
        self.state.borrow_mut().hold_fences = hold;
    }

    /// When set, every memory allocation fails with `ERROR_OUT_OF_DEVICE_MEMORY`
    pub fn fail_memory_allocations(&self, fail: bool) {
        self.state.borrow_mut().fail_memory = fail;
    }

    /// Snapshot of the event log
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.borrow().events.clone()
    }

    /// Clear the event log
    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Number of handles created and not yet destroyed
    pub fn live_object_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    /// Whether a fence is currently signaled
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.borrow().fences.get(&fence).copied().unwrap_or(false)
    }

    /// Contents of the memory bound to `buffer`, device local or not
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        let state = self.state.borrow();
        let memory = state.buffer_memory.get(&buffer)?;
        let size = usize::try_from(*state.buffer_sizes.get(&buffer)?).ok()?;
        state.memory.get(memory).map(|bytes| bytes[..size.min(bytes.len())].to_vec())
    }

    /// Sets currently allocated from `pool` since its creation or last reset
    pub fn pool_allocation_count(&self, pool: vk::DescriptorPool) -> Option<u32> {
        self.state.borrow().descriptor_pools.get(&pool).map(|p| p.allocated)
    }

    /// Pool a descriptor set was allocated from
    pub fn descriptor_set_pool(&self, set: vk::DescriptorSet) -> Option<vk::DescriptorPool> {
        self.state.borrow().set_owner.get(&set).copied()
    }

    /// Number of live descriptor pools
    pub fn descriptor_pool_count(&self) -> usize {
        self.state.borrow().descriptor_pools.len()
    }

    /// Number of indexed draws recorded
    pub fn draw_call_count(&self) -> u32 {
        self.state.borrow().draw_calls
    }

    fn out_of_memory() -> VulkanError {
        VulkanError::api("vkAllocateMemory")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
    }
}

impl DeviceApi for MockDevice {
    fn queue_families(&self) -> QueueFamilies {
        self.state.borrow().queue_families
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        self.state.borrow_mut().events.push(MockEvent::WaitIdle);
        Ok(())
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 2,
            ..Default::default()
        };
        props.memory_types[DEVICE_LOCAL_TYPE as usize] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        props.memory_types[HOST_VISIBLE_TYPE as usize] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        props.memory_heaps[0] = vk::MemoryHeap {
            size: 1 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        props.memory_heaps[1] = vk::MemoryHeap {
            size: 1 << 28,
            flags: vk::MemoryHeapFlags::empty(),
        };
        props
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let optimal_tiling_features = match format {
            vk::Format::D32_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            }
            _ => vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::COLOR_ATTACHMENT,
        };
        vk::FormatProperties {
            optimal_tiling_features,
            ..Default::default()
        }
    }

    fn max_sampler_anisotropy(&self) -> Option<f32> {
        Some(16.0)
    }

    fn surface_support(&self) -> VulkanResult<SurfaceSupport> {
        Ok(self.state.borrow().surface.clone())
    }

    fn create_swapchain(&self, params: &SwapchainParams) -> VulkanResult<vk::SwapchainKHR> {
        let mut state = self.state.borrow_mut();
        let swapchain: vk::SwapchainKHR = state.next("swapchain");
        let images: Vec<vk::Image> = (0..params.image_count).map(|_| state.untracked()).collect();
        state.swapchains.insert(swapchain, images);
        state.events.push(MockEvent::CreateSwapchain {
            swapchain,
            extent: params.extent,
            image_count: params.image_count,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        self.state
            .borrow()
            .swapchains
            .get(&swapchain)
            .cloned()
            .ok_or_else(|| VulkanError::api("vkGetSwapchainImagesKHR")(vk::Result::ERROR_SURFACE_LOST_KHR))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.borrow_mut();
        state.swapchains.remove(&swapchain);
        state.stale_swapchains.remove(&swapchain);
        state.release(swapchain);
        state.events.push(MockEvent::DestroySwapchain(swapchain));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        _semaphore: vk::Semaphore,
    ) -> VulkanResult<AcquireOutcome> {
        let mut state = self.state.borrow_mut();
        let outcome = if let Some(scripted) = state.acquire_script.pop_front() {
            scripted
        } else if state.stale_swapchains.contains(&swapchain) {
            AcquireOutcome::OutOfDate
        } else {
            let count = state.swapchains.get(&swapchain).map_or(0, Vec::len) as u32;
            if count == 0 {
                return Err(VulkanError::api("vkAcquireNextImageKHR")(vk::Result::ERROR_SURFACE_LOST_KHR));
            }
            let index = state.next_image % count;
            state.next_image = state.next_image.wrapping_add(1);
            AcquireOutcome::Acquired { index, suboptimal: false }
        };
        state.events.push(MockEvent::Acquire { swapchain, outcome });
        Ok(outcome)
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        let mut state = self.state.borrow_mut();
        let outcome = if let Some(scripted) = state.present_script.pop_front() {
            scripted
        } else if state.stale_swapchains.contains(&swapchain) {
            PresentOutcome::OutOfDate
        } else {
            PresentOutcome::Presented
        };
        state.events.push(MockEvent::Present { swapchain, image_index, outcome });
        Ok(outcome)
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let mut state = self.state.borrow_mut();
        let fence: vk::Fence = state.next("fence");
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VulkanResult<FenceStatus> {
        let mut state = self.state.borrow_mut();
        let signaled = state.fences.get(&fence).copied().unwrap_or(false);
        state.events.push(MockEvent::WaitFence { fence, signaled });
        Ok(if signaled { FenceStatus::Signaled } else { FenceStatus::TimedOut })
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        let mut state = self.state.borrow_mut();
        state.fences.insert(fence, false);
        state.events.push(MockEvent::ResetFence(fence));
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        state.fences.remove(&fence);
        state.release(fence);
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        Ok(self.state.borrow_mut().next("semaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().release(semaphore);
    }

    fn create_command_pool(&self, _queue_family: u32, _transient: bool) -> VulkanResult<vk::CommandPool> {
        Ok(self.state.borrow_mut().next("command pool"))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state.borrow_mut().release(pool);
    }

    fn allocate_command_buffers(&self, _pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.borrow_mut();
        Ok((0..count).map(|_| state.untracked()).collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.borrow_mut();
        for buffer in buffers {
            state.pending_copies.remove(buffer);
        }
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, _one_time_submit: bool) -> VulkanResult<()> {
        let mut state = self.state.borrow_mut();
        state.pending_copies.remove(&buffer);
        state.events.push(MockEvent::BeginCommandBuffer(buffer));
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.state.borrow_mut().events.push(MockEvent::EndCommandBuffer(buffer));
        Ok(())
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.state.borrow_mut().pending_copies.remove(&buffer);
        Ok(())
    }

    fn submit(&self, queue: QueueKind, desc: &SubmitDesc<'_>) -> VulkanResult<()> {
        let mut state = self.state.borrow_mut();
        for command_buffer in desc.command_buffers {
            let copies = state.pending_copies.get(command_buffer).cloned().unwrap_or_default();
            for (src, dst, size) in copies {
                let size = usize::try_from(size).unwrap_or(usize::MAX);
                let bytes = state
                    .buffer_memory
                    .get(&src)
                    .and_then(|memory| state.memory.get(memory))
                    .map(|bytes| bytes[..size.min(bytes.len())].to_vec())
                    .unwrap_or_default();
                if let Some(dst_memory) = state.buffer_memory.get(&dst).copied() {
                    if let Some(target) = state.memory.get_mut(&dst_memory) {
                        let len = bytes.len().min(target.len());
                        target[..len].copy_from_slice(&bytes[..len]);
                    }
                }
            }
        }
        if desc.fence != vk::Fence::null() && !state.hold_fences {
            state.fences.insert(desc.fence, true);
        }
        state.events.push(MockEvent::Submit {
            queue,
            command_buffers: desc.command_buffers.to_vec(),
            fence: desc.fence,
        });
        Ok(())
    }

    fn cmd_pipeline_barrier(&self, _buffer: vk::CommandBuffer, _barrier: &ImageBarrier) {}

    fn cmd_copy_buffer(&self, buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        self.state
            .borrow_mut()
            .pending_copies
            .entry(buffer)
            .or_default()
            .push((src, dst, size));
    }

    fn cmd_copy_buffer_to_image(&self, _buffer: vk::CommandBuffer, _src: vk::Buffer, _dst: vk::Image, _extent: vk::Extent2D) {}

    fn cmd_begin_render_pass(&self, _buffer: vk::CommandBuffer, _begin: &RenderPassBegin) {}

    fn cmd_end_render_pass(&self, _buffer: vk::CommandBuffer) {}

    fn cmd_set_viewport_scissor(&self, _buffer: vk::CommandBuffer, _extent: vk::Extent2D) {}

    fn cmd_bind_pipeline(&self, _buffer: vk::CommandBuffer, _pipeline: vk::Pipeline) {}

    fn cmd_bind_descriptor_sets(
        &self,
        _buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _first_set: u32,
        _sets: &[vk::DescriptorSet],
    ) {
    }

    fn cmd_push_constants(
        &self,
        _buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        _data: &[u8],
    ) {
    }

    fn cmd_bind_vertex_buffer(&self, _buffer: vk::CommandBuffer, _vertex_buffer: vk::Buffer) {}

    fn cmd_bind_index_buffer(&self, _buffer: vk::CommandBuffer, _index_buffer: vk::Buffer) {}

    fn cmd_draw_indexed(&self, _buffer: vk::CommandBuffer, _index_count: u32) {
        self.state.borrow_mut().draw_calls += 1;
    }

    fn create_buffer(&self, desc: &BufferDesc) -> VulkanResult<vk::Buffer> {
        let mut state = self.state.borrow_mut();
        let buffer: vk::Buffer = state.next("buffer");
        state.buffer_sizes.insert(buffer, desc.size);
        Ok(buffer)
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = self.state.borrow().buffer_sizes.get(&buffer).copied().unwrap_or(0);
        vk::MemoryRequirements {
            size,
            alignment: 16,
            memory_type_bits: (1 << DEVICE_LOCAL_TYPE) | (1 << HOST_VISIBLE_TYPE),
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.borrow_mut();
        state.buffer_sizes.remove(&buffer);
        state.buffer_memory.remove(&buffer);
        state.release(buffer);
    }

    fn allocate_memory(&self, size: vk::DeviceSize, _memory_type_index: u32) -> VulkanResult<vk::DeviceMemory> {
        let mut state = self.state.borrow_mut();
        if state.fail_memory {
            return Err(Self::out_of_memory());
        }
        let len = usize::try_from(size).map_err(|_| Self::out_of_memory())?;
        let memory: vk::DeviceMemory = state.next("memory");
        state.memory.insert(memory, vec![0; len]);
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.borrow_mut();
        state.memory.remove(&memory);
        state.release(memory);
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()> {
        self.state.borrow_mut().buffer_memory.insert(buffer, memory);
        Ok(())
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let mut state = self.state.borrow_mut();
        let bytes = state
            .memory
            .get_mut(&memory)
            .ok_or_else(|| VulkanError::api("vkMapMemory")(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(data.len());
        if end > bytes.len() {
            return Err(VulkanError::api("vkMapMemory")(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, out: &mut [u8]) -> VulkanResult<()> {
        let state = self.state.borrow();
        let bytes = state
            .memory
            .get(&memory)
            .ok_or_else(|| VulkanError::api("vkMapMemory")(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(out.len());
        if end > bytes.len() {
            return Err(VulkanError::api("vkMapMemory")(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        out.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn create_image(&self, _desc: &ImageDesc) -> VulkanResult<vk::Image> {
        Ok(self.state.borrow_mut().next("image"))
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: 1 << DEVICE_LOCAL_TYPE,
        }
    }

    fn bind_image_memory(&self, _image: vk::Image, _memory: vk::DeviceMemory) -> VulkanResult<()> {
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        self.state.borrow_mut().release(image);
    }

    fn create_image_view(&self, _desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let mut state = self.state.borrow_mut();
        let view: vk::ImageView = state.next("image view");
        state.events.push(MockEvent::CreateImageView(view));
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.borrow_mut();
        state.release(view);
        state.events.push(MockEvent::DestroyImageView(view));
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        Ok(self.state.borrow_mut().next("sampler"))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.borrow_mut().release(sampler);
    }

    fn create_descriptor_set_layout(&self, _bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        Ok(self.state.borrow_mut().next("descriptor set layout"))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.borrow_mut().release(layout);
    }

    fn create_descriptor_pool(&self, max_sets: u32, _sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let mut state = self.state.borrow_mut();
        let pool: vk::DescriptorPool = state.next("descriptor pool");
        state.descriptor_pools.insert(pool, PoolState { max_sets, allocated: 0 });
        state.events.push(MockEvent::CreateDescriptorPool { pool, max_sets });
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.borrow_mut();
        state.descriptor_pools.remove(&pool);
        state.set_owner.retain(|_, owner| *owner != pool);
        state.release(pool);
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(entry) = state.descriptor_pools.get_mut(&pool) {
            entry.allocated = 0;
        }
        state.set_owner.retain(|_, owner| *owner != pool);
        state.events.push(MockEvent::ResetDescriptorPool(pool));
        Ok(())
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let mut state = self.state.borrow_mut();
        let exhausted = || VulkanError::api("vkAllocateDescriptorSets")(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        let entry = state.descriptor_pools.get_mut(&pool).ok_or_else(exhausted)?;
        if entry.allocated >= entry.max_sets {
            return Err(exhausted());
        }
        entry.allocated += 1;
        let set: vk::DescriptorSet = state.untracked();
        state.set_owner.insert(set, pool);
        Ok(set)
    }

    fn update_descriptor_sets(&self, _writes: &[DescriptorWrite]) {}

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        Ok(self.state.borrow_mut().next("render pass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.borrow_mut().release(render_pass);
    }

    fn create_framebuffer(&self, _desc: &FramebufferDesc<'_>) -> VulkanResult<vk::Framebuffer> {
        Ok(self.state.borrow_mut().next("framebuffer"))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state.borrow_mut().release(framebuffer);
    }

    fn create_shader_module(&self, _code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        Ok(self.state.borrow_mut().next("shader module"))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.borrow_mut().release(module);
    }

    fn create_pipeline_layout(&self, _desc: &PipelineLayoutDesc<'_>) -> VulkanResult<vk::PipelineLayout> {
        Ok(self.state.borrow_mut().next("pipeline layout"))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.borrow_mut().release(layout);
    }

    fn create_graphics_pipeline(&self, _desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<vk::Pipeline> {
        Ok(self.state.borrow_mut().next("pipeline"))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.borrow_mut().release(pipeline);
    }
}
