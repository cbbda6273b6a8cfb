//! Device dispatch seam
//!
//! Every RAII wrapper in the renderer owns an `Rc<dyn DeviceApi>` and performs all of its GPU
//! calls through it. [`VulkanDevice`](super::initialization::VulkanDevice) implements the trait
//! on top of `ash`; [`MockDevice`](super::mock::MockDevice) implements it in-process so the
//! synchronization and pooling protocols can be exercised without a GPU.
//!
//! The parameter structs below are plain data. Implementations translate them into the
//! corresponding `vk::*CreateInfo` builders.

use ash::vk;
use std::rc::Rc;

use super::error::VulkanResult;

/// Shared handle to the device dispatch object.
///
/// The frame loop is single threaded, so reference counting does not need to be atomic.
pub type SharedDevice = Rc<dyn DeviceApi>;

/// Queue a submission targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Graphics queue, also used for transfers
    Graphics,
    /// Presentation queue (may alias the graphics queue)
    Present,
}

/// Queue family indices chosen for the logical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family used for graphics and transfer work
    pub graphics: u32,
    /// Family used for presentation
    pub present: u32,
}

impl QueueFamilies {
    /// Whether graphics and presentation share a family
    pub const fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Surface capabilities as queried at a point in time
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Min/max image count, extents and transforms
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format / color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported presentation modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Parameters for swapchain creation
#[derive(Debug, Clone, Copy)]
pub struct SwapchainParams {
    /// Chosen surface format
    pub format: vk::SurfaceFormatKHR,
    /// Chosen presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Image extent
    pub extent: vk::Extent2D,
    /// Requested minimum image count
    pub image_count: u32,
    /// Surface transform to apply
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Swapchain being replaced, or null
    pub old_swapchain: vk::SwapchainKHR,
}

/// Result of `vkAcquireNextImageKHR` after the transient codes have been classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired
    Acquired {
        /// Index into the swapchain images
        index: u32,
        /// Surface no longer matches exactly; presentation still works
        suboptimal: bool,
    },
    /// The swapchain must be recreated before further use
    OutOfDate,
    /// No image became available within the timeout
    TimedOut,
}

/// Result of `vkQueuePresentKHR` after the transient codes have been classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for presentation
    Presented,
    /// Presented, but the swapchain should be recreated
    Suboptimal,
    /// The swapchain must be recreated
    OutOfDate,
}

/// Result of waiting on a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence is signaled
    Signaled,
    /// The timeout expired first
    TimedOut,
}

/// One queue submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitDesc<'a> {
    /// Command buffers to execute
    pub command_buffers: &'a [vk::CommandBuffer],
    /// Semaphores waited on before execution
    pub wait_semaphores: &'a [vk::Semaphore],
    /// Pipeline stage at which each wait semaphore is waited on
    pub wait_stages: &'a [vk::PipelineStageFlags],
    /// Semaphores signaled on completion
    pub signal_semaphores: &'a [vk::Semaphore],
    /// Fence signaled on completion, or null
    pub fence: vk::Fence,
}

/// Image memory barrier for a layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Target image
    pub image: vk::Image,
    /// Aspect of the image affected
    pub aspect: vk::ImageAspectFlags,
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Accesses made available
    pub src_access: vk::AccessFlags,
    /// Accesses made visible
    pub dst_access: vk::AccessFlags,
    /// Source pipeline stage
    pub src_stage: vk::PipelineStageFlags,
    /// Destination pipeline stage
    pub dst_stage: vk::PipelineStageFlags,
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: vk::DeviceSize,
    /// Usage flags
    pub usage: vk::BufferUsageFlags,
}

/// 2D image creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Image extent
    pub extent: vk::Extent2D,
    /// Pixel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
}

/// Image view creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    /// Viewed image
    pub image: vk::Image,
    /// View format
    pub format: vk::Format,
    /// Aspect exposed by the view
    pub aspect: vk::ImageAspectFlags,
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    /// Magnification and minification filter
    pub filter: vk::Filter,
    /// Address mode for all coordinates
    pub address_mode: vk::SamplerAddressMode,
    /// Anisotropy level, or `None` to disable
    pub max_anisotropy: Option<f32>,
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding slot
    pub binding: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Array size
    pub count: u32,
    /// Shader stages that read the binding
    pub stages: vk::ShaderStageFlags,
}

/// Resource written into a descriptor binding
#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource {
    /// Uniform or storage buffer range
    Buffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Byte offset
        offset: vk::DeviceSize,
        /// Byte range
        range: vk::DeviceSize,
    },
    /// Sampled image
    Image {
        /// Sampler handle
        sampler: vk::Sampler,
        /// Image view handle
        view: vk::ImageView,
        /// Layout the image is in when sampled
        layout: vk::ImageLayout,
    },
}

/// One descriptor write
#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite {
    /// Destination set
    pub set: vk::DescriptorSet,
    /// Destination binding
    pub binding: u32,
    /// Descriptor type of the binding
    pub descriptor_type: vk::DescriptorType,
    /// Resource to bind
    pub resource: DescriptorResource,
}

/// Forward render pass parameters
#[derive(Debug, Clone, Copy)]
pub struct RenderPassDesc {
    /// Color attachment format (the swapchain format)
    pub color_format: vk::Format,
    /// Depth attachment format, if the pass has one
    pub depth_format: Option<vk::Format>,
}

/// Framebuffer creation parameters
#[derive(Debug, Clone, Copy)]
pub struct FramebufferDesc<'a> {
    /// Compatible render pass
    pub render_pass: vk::RenderPass,
    /// Attachment views in render pass order
    pub attachments: &'a [vk::ImageView],
    /// Framebuffer extent
    pub extent: vk::Extent2D,
}

/// Pipeline layout creation parameters
#[derive(Debug, Clone, Copy)]
pub struct PipelineLayoutDesc<'a> {
    /// Descriptor set layouts, indexed by set number
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    /// Push constant ranges
    pub push_constant_ranges: &'a [vk::PushConstantRange],
}

/// Graphics pipeline creation parameters
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    /// Vertex stage module
    pub vertex_module: vk::ShaderModule,
    /// Fragment stage module
    pub fragment_module: vk::ShaderModule,
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Render pass the pipeline is used in
    pub render_pass: vk::RenderPass,
    /// Vertex buffer bindings
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    /// Vertex attributes
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    /// Face culling mode
    pub cull_mode: vk::CullModeFlags,
    /// Whether depth testing and writing are enabled
    pub depth_test: bool,
}

/// Render pass begin parameters
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin {
    /// Render pass to begin
    pub render_pass: vk::RenderPass,
    /// Target framebuffer
    pub framebuffer: vk::Framebuffer,
    /// Render area
    pub extent: vk::Extent2D,
    /// Color attachment clear value
    pub clear_color: [f32; 4],
    /// Depth attachment clear value, if the pass has depth
    pub clear_depth: Option<f32>,
}

/// GPU dispatch interface used by all resource wrappers.
///
/// Destroy calls never fail; callers are responsible for making sure the GPU no longer
/// references the handle (fence wait or device idle) before destroying it.
pub trait DeviceApi {
    // Device queries

    /// Queue families of the logical device
    fn queue_families(&self) -> QueueFamilies;
    /// Block until the device is idle
    fn wait_idle(&self) -> VulkanResult<()>;
    /// Memory heaps and types of the physical device
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;
    /// Format properties for `format`
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;
    /// Maximum sampler anisotropy, or `None` if the feature is not enabled
    fn max_sampler_anisotropy(&self) -> Option<f32>;

    // Presentation

    /// Current surface capabilities, formats and present modes
    fn surface_support(&self) -> VulkanResult<SurfaceSupport>;
    /// Create a swapchain
    fn create_swapchain(&self, params: &SwapchainParams) -> VulkanResult<vk::SwapchainKHR>;
    /// Images owned by a swapchain
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>>;
    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Acquire the next presentable image, signaling `semaphore` when it is ready
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VulkanResult<AcquireOutcome>;
    /// Queue an image for presentation after `wait_semaphore` is signaled
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome>;

    // Synchronization

    /// Create a fence, optionally in the signaled state
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;
    /// Wait for a fence with a timeout in nanoseconds
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<FenceStatus>;
    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);
    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;
    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Command pools and buffers

    /// Create a command pool whose buffers can be reset individually
    fn create_command_pool(&self, queue_family: u32, transient: bool) -> VulkanResult<vk::CommandPool>;
    /// Destroy a command pool and every buffer allocated from it
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate primary command buffers
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>>;
    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Begin recording
    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, one_time_submit: bool) -> VulkanResult<()>;
    /// Finish recording
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Reset a command buffer to the initial state
    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Submit work to a queue
    fn submit(&self, queue: QueueKind, desc: &SubmitDesc<'_>) -> VulkanResult<()>;

    // Command recording

    /// Record an image layout transition
    fn cmd_pipeline_barrier(&self, buffer: vk::CommandBuffer, barrier: &ImageBarrier);
    /// Record a buffer to buffer copy
    fn cmd_copy_buffer(&self, buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);
    /// Record a buffer to image copy; the image must be in `TRANSFER_DST_OPTIMAL`
    fn cmd_copy_buffer_to_image(&self, buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Image, extent: vk::Extent2D);
    /// Begin a render pass with inline contents
    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, begin: &RenderPassBegin);
    /// End the current render pass
    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer);
    /// Set dynamic viewport and scissor to cover `extent`
    fn cmd_set_viewport_scissor(&self, buffer: vk::CommandBuffer, extent: vk::Extent2D);
    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    /// Bind descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    /// Update push constants
    fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    /// Bind a vertex buffer at binding 0
    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer);
    /// Bind a `u32` index buffer
    fn cmd_bind_index_buffer(&self, buffer: vk::CommandBuffer, index_buffer: vk::Buffer);
    /// Draw indexed geometry
    fn cmd_draw_indexed(&self, buffer: vk::CommandBuffer, index_count: u32);

    // Memory and buffers

    /// Create a buffer without memory
    fn create_buffer(&self, desc: &BufferDesc) -> VulkanResult<vk::Buffer>;
    /// Memory requirements of a buffer
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Allocate device memory from the given memory type
    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32) -> VulkanResult<vk::DeviceMemory>;
    /// Free device memory
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Bind memory to a buffer at offset 0
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()>;
    /// Copy bytes into host-visible, host-coherent memory
    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()>;
    /// Copy bytes out of host-visible, host-coherent memory
    fn read_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, out: &mut [u8]) -> VulkanResult<()>;

    // Images

    /// Create a 2D optimal-tiling image without memory
    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image>;
    /// Memory requirements of an image
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    /// Bind memory to an image at offset 0
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VulkanResult<()>;
    /// Destroy an image
    fn destroy_image(&self, image: vk::Image);
    /// Create an image view
    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView>;
    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Descriptors

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    /// Create a descriptor pool
    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool>;
    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Return every set of the pool to it
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()>;
    /// Allocate one set. Exhaustion surfaces as `ERROR_OUT_OF_POOL_MEMORY` or
    /// `ERROR_FRAGMENTED_POOL` in [`VulkanError::Api`](super::VulkanError::Api).
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet>;
    /// Apply descriptor writes
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // Pipelines

    /// Create a forward render pass
    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass>;
    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    /// Create a framebuffer
    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> VulkanResult<vk::Framebuffer>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    /// Create a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;
    /// Destroy a shader module
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    /// Create a pipeline layout
    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc<'_>) -> VulkanResult<vk::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    /// Create a graphics pipeline
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<vk::Pipeline>;
    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
}
