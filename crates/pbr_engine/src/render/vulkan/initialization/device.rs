//! Logical device backed by `ash`
//!
//! `VulkanDevice` is the production [`DeviceApi`] implementation. It owns the logical device,
//! its queues and the swapchain loader, and keeps the surface (and through it the instance)
//! alive until the device itself is destroyed.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::prelude::VkResult;
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;
use std::rc::Rc;

use super::physical_device::{required_device_extensions, SelectedDevice};
use super::surface::Surface;
use crate::render::vulkan::device_api::{
    AcquireOutcome, BufferDesc, DescriptorBinding, DescriptorResource, DescriptorWrite, DeviceApi,
    FenceStatus, FramebufferDesc, GraphicsPipelineDesc, ImageBarrier, ImageDesc, ImageViewDesc,
    PipelineLayoutDesc, PresentOutcome, QueueFamilies, QueueKind, RenderPassBegin, RenderPassDesc,
    SamplerDesc, SubmitDesc, SurfaceSupport, SwapchainParams,
};
use crate::render::vulkan::error::{VulkanError, VulkanResult};

const SHADER_ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Map the raw result of `vkAcquireNextImageKHR` onto [`AcquireOutcome`]
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> VulkanResult<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(AcquireOutcome::TimedOut),
        Err(result) => Err(VulkanError::api("vkAcquireNextImageKHR")(result)),
    }
}

/// Map the raw result of `vkQueuePresentKHR` onto [`PresentOutcome`]
pub fn classify_present(result: VkResult<bool>) -> VulkanResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(result) => Err(VulkanError::api("vkQueuePresentKHR")(result)),
    }
}

/// Logical device, queues and swapchain loader
pub struct VulkanDevice {
    device: ash::Device,
    swapchain_loader: SwapchainLoader,
    physical_device: vk::PhysicalDevice,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    families: QueueFamilies,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    max_anisotropy: Option<f32>,
    surface: Rc<Surface>,
}

impl VulkanDevice {
    /// Create the logical device for an already selected adapter
    pub fn new(surface: Rc<Surface>, selected: &SelectedDevice) -> VulkanResult<Self> {
        let instance = Rc::clone(surface.instance());
        let raw = instance.raw();

        let unique_families: HashSet<u32> = [selected.families.graphics, selected.families.present]
            .into_iter()
            .collect();
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let anisotropy_supported = selected.features.sampler_anisotropy == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(anisotropy_supported);
        let extension_ptrs: Vec<_> = required_device_extensions().iter().map(|e| e.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);

        let device = unsafe { raw.create_device(selected.physical_device, &create_info, None) }
            .map_err(VulkanError::api("vkCreateDevice"))?;

        let graphics_queue = unsafe { device.get_device_queue(selected.families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(selected.families.present, 0) };
        let swapchain_loader = SwapchainLoader::new(raw, &device);
        let memory_properties = unsafe { raw.get_physical_device_memory_properties(selected.physical_device) };
        let max_anisotropy =
            anisotropy_supported.then_some(selected.properties.limits.max_sampler_anisotropy);

        log::info!("Logical device created on {}", selected.name);

        Ok(Self {
            device,
            swapchain_loader,
            physical_device: selected.physical_device,
            graphics_queue,
            present_queue,
            families: selected.families,
            memory_properties,
            max_anisotropy,
            surface,
        })
    }

    const fn queue(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::Graphics => self.graphics_queue,
            QueueKind::Present => self.present_queue,
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed during shutdown: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}

impl DeviceApi for VulkanDevice {
    fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(VulkanError::api("vkDeviceWaitIdle"))
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.surface
                .instance()
                .raw()
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    fn max_sampler_anisotropy(&self) -> Option<f32> {
        self.max_anisotropy
    }

    fn surface_support(&self) -> VulkanResult<SurfaceSupport> {
        self.surface.support(self.physical_device)
    }

    fn create_swapchain(&self, params: &SwapchainParams) -> VulkanResult<vk::SwapchainKHR> {
        let family_indices = [self.families.graphics, self.families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface.handle())
            .min_image_count(params.image_count)
            .image_format(params.format.format)
            .image_color_space(params.format.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(params.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(params.present_mode)
            .clipped(true)
            .old_swapchain(params.old_swapchain);
        create_info = if self.families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(VulkanError::api("vkCreateSwapchainKHR"))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(VulkanError::api("vkGetSwapchainImagesKHR"))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VulkanResult<AcquireOutcome> {
        classify_acquire(unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
        })
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        classify_present(unsafe { self.swapchain_loader.queue_present(self.present_queue, &present_info) })
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&create_info, None) }.map_err(VulkanError::api("vkCreateFence"))
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<FenceStatus> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(result) => Err(VulkanError::api("vkWaitForFences")(result)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.map_err(VulkanError::api("vkResetFences"))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(VulkanError::api("vkCreateSemaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_command_pool(&self, queue_family: u32, transient: bool) -> VulkanResult<vk::CommandPool> {
        let mut flags = vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        if transient {
            flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        }
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);
        unsafe { self.device.create_command_pool(&create_info, None) }
            .map_err(VulkanError::api("vkCreateCommandPool"))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(VulkanError::api("vkAllocateCommandBuffers"))
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) };
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, one_time_submit: bool) -> VulkanResult<()> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.device.begin_command_buffer(buffer, &begin_info) }
            .map_err(VulkanError::api("vkBeginCommandBuffer"))
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.device.end_command_buffer(buffer) }.map_err(VulkanError::api("vkEndCommandBuffer"))
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(VulkanError::api("vkResetCommandBuffer"))
    }

    fn submit(&self, queue: QueueKind, desc: &SubmitDesc<'_>) -> VulkanResult<()> {
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(desc.wait_semaphores)
            .wait_dst_stage_mask(desc.wait_stages)
            .command_buffers(desc.command_buffers)
            .signal_semaphores(desc.signal_semaphores)
            .build();
        unsafe {
            self.device
                .queue_submit(self.queue(queue), &[submit_info], desc.fence)
        }
        .map_err(VulkanError::api("vkQueueSubmit"))
    }

    fn cmd_pipeline_barrier(&self, buffer: vk::CommandBuffer, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(barrier.old_layout)
            .new_layout(barrier.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: barrier.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access)
            .build();
        unsafe {
            self.device.cmd_pipeline_barrier(
                buffer,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
    }

    fn cmd_copy_buffer(&self, buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { self.device.cmd_copy_buffer(buffer, src, dst, &[region]) };
    }

    fn cmd_copy_buffer_to_image(&self, buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Image, extent: vk::Extent2D) {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(buffer, src, dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);
        }
    }

    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: begin.clear_color,
            },
        }];
        if let Some(depth) = begin.clear_depth {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            });
        }
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: begin.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(buffer, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(buffer) };
    }

    #[allow(clippy::cast_precision_loss)]
    fn cmd_set_viewport_scissor(&self, buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device.cmd_set_viewport(buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(buffer, 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(buffer, layout, stages, offset, data) };
    }

    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(buffer, 0, &[vertex_buffer], &[0]) };
    }

    fn cmd_bind_index_buffer(&self, buffer: vk::CommandBuffer, index_buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(buffer, index_buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn cmd_draw_indexed(&self, buffer: vk::CommandBuffer, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(buffer, index_count, 1, 0, 0, 0) };
    }

    fn create_buffer(&self, desc: &BufferDesc) -> VulkanResult<vk::Buffer> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe { self.device.create_buffer(&create_info, None) }.map_err(VulkanError::api("vkCreateBuffer"))
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32) -> VulkanResult<vk::DeviceMemory> {
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        unsafe { self.device.allocate_memory(&allocate_info, None) }
            .map_err(VulkanError::api("vkAllocateMemory"))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) };
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }
            .map_err(VulkanError::api("vkBindBufferMemory"))
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        unsafe {
            let ptr = self
                .device
                .map_memory(memory, offset, data.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::api("vkMapMemory"))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn read_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, out: &mut [u8]) -> VulkanResult<()> {
        unsafe {
            let ptr = self
                .device
                .map_memory(memory, offset, out.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::api("vkMapMemory"))?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), out.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        unsafe { self.device.create_image(&create_info, None) }.map_err(VulkanError::api("vkCreateImage"))
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VulkanResult<()> {
        unsafe { self.device.bind_image_memory(image, memory, 0) }
            .map_err(VulkanError::api("vkBindImageMemory"))
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) };
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(desc.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&create_info, None) }
            .map_err(VulkanError::api("vkCreateImageView"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);
        unsafe { self.device.create_sampler(&create_info, None) }.map_err(VulkanError::api("vkCreateSampler"))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let raw_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&raw_bindings);
        unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(VulkanError::api("vkCreateDescriptorSetLayout"))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .map_err(VulkanError::api("vkCreateDescriptorPool"))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(VulkanError::api("vkResetDescriptorPool"))
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .map_err(VulkanError::api("vkAllocateDescriptorSets"))?;
        sets.into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("vkAllocateDescriptorSets returned no set"))
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|w| match w.resource {
                DescriptorResource::Buffer { buffer, offset, range } => vk::DescriptorBufferInfo { buffer, offset, range },
                DescriptorResource::Image { .. } => vk::DescriptorBufferInfo::default(),
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .map(|w| match w.resource {
                DescriptorResource::Image { sampler, view, layout } => vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                },
                DescriptorResource::Buffer { .. } => vk::DescriptorImageInfo::default(),
            })
            .collect();
        let raw_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(w.set)
                    .dst_binding(w.binding)
                    .dst_array_element(0)
                    .descriptor_type(w.descriptor_type);
                match w.resource {
                    DescriptorResource::Buffer { .. } => {
                        builder.buffer_info(std::slice::from_ref(&buffer_infos[i])).build()
                    }
                    DescriptorResource::Image { .. } => {
                        builder.image_info(std::slice::from_ref(&image_infos[i])).build()
                    }
                }
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&raw_writes, &[]) };
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        // The color attachment stays in COLOR_ATTACHMENT_OPTIMAL; the frame loop records the
        // transitions from UNDEFINED and to PRESENT_SRC itself.
        let mut attachments = vec![vk::AttachmentDescription::builder()
            .format(desc.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_format) = desc.depth_format {
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(depth_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];
        let dependencies = [forward_subpass_dependency(desc.depth_format.is_some())];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { self.device.create_render_pass(&create_info, None) }
            .map_err(VulkanError::api("vkCreateRenderPass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> VulkanResult<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(desc.render_pass)
            .attachments(desc.attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&create_info, None) }
            .map_err(VulkanError::api("vkCreateFramebuffer"))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(VulkanError::api("vkCreateShaderModule"))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc<'_>) -> VulkanResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(desc.set_layouts)
            .push_constant_ranges(desc.push_constant_ranges);
        unsafe { self.device.create_pipeline_layout(&create_info, None) }
            .map_err(VulkanError::api("vkCreatePipelineLayout"))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<vk::Pipeline> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_module)
                .name(SHADER_ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment_module)
                .name(SHADER_ENTRY_POINT)
                .build(),
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .depth_bias_enable(false);
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, result)| VulkanError::api("vkCreateGraphicsPipelines")(result))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("vkCreateGraphicsPipelines returned no pipeline"))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }
}

/// External dependency for the single forward subpass.
///
/// The depth buffer is shared by every frame slot, so the previous frame's late depth writes
/// must complete before this frame's layout transition and clear.
pub(crate) fn forward_subpass_dependency(has_depth: bool) -> vk::SubpassDependency {
    let mut src_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut src_access = vk::AccessFlags::empty();
    let mut dst_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut dst_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    if has_depth {
        let depth_stages =
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        src_stages |= depth_stages;
        src_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        dst_stages |= depth_stages;
        dst_access |=
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(src_stages)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stages)
        .dst_access_mask(dst_access)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_dependency_orders_previous_depth_writes() {
        let dependency = forward_subpass_dependency(true);
        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dependency.dst_subpass, 0);
        assert!(dependency
            .src_stage_mask
            .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(dependency.src_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dependency
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_color_only_dependency() {
        let dependency = forward_subpass_dependency(false);
        assert_eq!(dependency.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(dependency.src_access_mask.is_empty());
        assert_eq!(dependency.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_acquire_classification() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired { index: 2, suboptimal: false }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            AcquireOutcome::Acquired { index: 0, suboptimal: true }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(classify_acquire(Err(vk::Result::TIMEOUT)).unwrap(), AcquireOutcome::TimedOut);

        let err = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert_eq!(err.operation(), Some("vkAcquireNextImageKHR"));
    }

    #[test]
    fn test_present_classification() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }
}
