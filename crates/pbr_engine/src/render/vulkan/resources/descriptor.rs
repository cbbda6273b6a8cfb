//! Descriptor set layouts, pooled descriptor allocation and descriptor writes
//!
//! [`DescriptorAllocator`] keeps its pools in two lists. Pools that may still have capacity sit
//! in `ready_pools`; pools that reported exhaustion move to `full_pools`. Sets are never freed
//! individually: all pools are reset together once the GPU no longer reads any of their sets.

use ash::vk;

use crate::render::vulkan::device_api::{DescriptorBinding, DescriptorResource, DescriptorWrite, SharedDevice};
use crate::render::vulkan::error::{VulkanError, VulkanResult};

/// Descriptor set layout builder for creating reusable layouts
#[derive(Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stages)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stages)
    }

    /// Add a storage buffer binding
    pub fn add_storage_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::STORAGE_BUFFER, stages)
    }

    fn add(mut self, binding: u32, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(DescriptorBinding {
            binding,
            descriptor_type,
            count: 1,
            stages,
        });
        self
    }

    /// Build the descriptor set layout
    pub fn build(self, device: SharedDevice) -> VulkanResult<DescriptorSetLayout> {
        let layout = device.create_descriptor_set_layout(&self.bindings)?;
        Ok(DescriptorSetLayout {
            device,
            layout,
            bindings: self.bindings,
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    device: SharedDevice,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub const fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Bindings used in this layout
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.device.destroy_descriptor_set_layout(self.layout);
    }
}

/// Descriptors of one type reserved per set in every pool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Descriptors of this type per set
    pub ratio: f32,
}

impl PoolSizeRatio {
    /// Ratio table for one camera uniform and one material texture per set
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                ratio: 1.0,
            },
            Self {
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                ratio: 1.0,
            },
            Self {
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                ratio: 0.5,
            },
        ]
    }
}

/// Pool sizes for a pool holding `max_sets` sets
pub fn pool_sizes(ratios: &[PoolSizeRatio], max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .filter(|r| r.ratio > 0.0)
        .map(|r| vk::DescriptorPoolSize {
            ty: r.descriptor_type,
            descriptor_count: ((r.ratio * max_sets as f32).ceil() as u32).max(1),
        })
        .collect()
}

/// Whether an error reports that a pool has no room left for the requested set
pub fn is_pool_exhausted(error: &VulkanError) -> bool {
    matches!(
        error.result(),
        Some(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)
    )
}

/// Growable descriptor allocator cycling through descriptor pools
pub struct DescriptorAllocator {
    device: SharedDevice,
    ratios: Vec<PoolSizeRatio>,
    ready_pools: Vec<vk::DescriptorPool>,
    full_pools: Vec<vk::DescriptorPool>,
    sets_per_pool: u32,
    growth_factor: f32,
    max_sets_per_pool: u32,
}

impl DescriptorAllocator {
    /// Create an allocator and its first pool sized for `initial_sets` sets
    pub fn new(
        device: SharedDevice,
        initial_sets: u32,
        ratios: Vec<PoolSizeRatio>,
        growth_factor: f32,
        max_sets_per_pool: u32,
    ) -> VulkanResult<Self> {
        if ratios.iter().all(|r| r.ratio <= 0.0) {
            return Err(VulkanError::invalid("Descriptor ratio table has no positive entries"));
        }
        let max_sets_per_pool = max_sets_per_pool.max(1);
        let mut allocator = Self {
            device,
            ratios,
            ready_pools: Vec::new(),
            full_pools: Vec::new(),
            sets_per_pool: initial_sets.clamp(1, max_sets_per_pool),
            growth_factor: growth_factor.max(1.0),
            max_sets_per_pool,
        };
        let pool = allocator.create_pool()?;
        allocator.ready_pools.push(pool);
        Ok(allocator)
    }

    /// Allocate one set with `layout`.
    ///
    /// An exhausted pool is moved to the full list and the allocation is retried once from
    /// another pool.
    pub fn allocate(&mut self, layout: &DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let pool = self.take_pool()?;
        match self.device.allocate_descriptor_set(pool, layout.handle()) {
            Ok(set) => {
                self.ready_pools.push(pool);
                Ok(set)
            }
            Err(e) if is_pool_exhausted(&e) => {
                self.full_pools.push(pool);
                let retry = self.take_pool()?;
                let result = self.device.allocate_descriptor_set(retry, layout.handle());
                match &result {
                    Err(e) if is_pool_exhausted(e) => self.full_pools.push(retry),
                    _ => self.ready_pools.push(retry),
                }
                result
            }
            Err(e) => {
                self.ready_pools.push(pool);
                Err(e)
            }
        }
    }

    /// Reset every pool and return all of them to the ready list.
    ///
    /// Invalidates every set allocated so far.
    pub fn reset_pools(&mut self) -> VulkanResult<()> {
        for &pool in &self.ready_pools {
            self.device.reset_descriptor_pool(pool)?;
        }
        for pool in self.full_pools.drain(..) {
            self.device.reset_descriptor_pool(pool)?;
            self.ready_pools.push(pool);
        }
        Ok(())
    }

    /// Destroy every pool
    pub fn destroy_pools(&mut self) {
        for pool in self.ready_pools.drain(..).chain(self.full_pools.drain(..)) {
            self.device.destroy_descriptor_pool(pool);
        }
    }

    /// Number of live pools, ready and full
    pub fn pool_count(&self) -> usize {
        self.ready_pools.len() + self.full_pools.len()
    }

    /// Capacity of the next pool the allocator creates
    pub const fn sets_per_pool(&self) -> u32 {
        self.sets_per_pool
    }

    fn take_pool(&mut self) -> VulkanResult<vk::DescriptorPool> {
        match self.ready_pools.pop() {
            Some(pool) => Ok(pool),
            None => self.create_pool(),
        }
    }

    fn create_pool(&mut self) -> VulkanResult<vk::DescriptorPool> {
        let max_sets = self.sets_per_pool;
        let pool = self
            .device
            .create_descriptor_pool(max_sets, &pool_sizes(&self.ratios, max_sets))?;

        let grown = (max_sets as f32 * self.growth_factor).ceil() as u32;
        self.sets_per_pool = grown.clamp(max_sets, self.max_sets_per_pool);
        log::debug!(
            "Created descriptor pool for {} sets ({} pools live)",
            max_sets,
            self.pool_count() + 1
        );
        Ok(pool)
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        self.destroy_pools();
    }
}

/// Batches descriptor writes and applies them in one update
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    writes: Vec<(u32, vk::DescriptorType, DescriptorResource)>,
}

impl DescriptorWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a buffer range
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        descriptor_type: vk::DescriptorType,
    ) -> &mut Self {
        self.writes
            .push((binding, descriptor_type, DescriptorResource::Buffer { buffer, offset, range }));
        self
    }

    /// Bind a sampled image
    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        descriptor_type: vk::DescriptorType,
    ) -> &mut Self {
        self.writes
            .push((binding, descriptor_type, DescriptorResource::Image { sampler, view, layout }));
        self
    }

    /// Number of pending writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether no writes are pending
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply the pending writes to `set` and clear them
    pub fn update(&mut self, device: &SharedDevice, set: vk::DescriptorSet) {
        let writes: Vec<DescriptorWrite> = self
            .writes
            .drain(..)
            .map(|(binding, descriptor_type, resource)| DescriptorWrite {
                set,
                binding,
                descriptor_type,
                resource,
            })
            .collect();
        if !writes.is_empty() {
            device.update_descriptor_sets(&writes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::MockDevice;
    use std::collections::HashSet;
    use std::rc::Rc;

    fn setup(initial: u32, max: u32) -> (Rc<MockDevice>, DescriptorSetLayout, DescriptorAllocator) {
        let mock = Rc::new(MockDevice::new());
        let layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(mock.clone())
            .unwrap();
        let allocator = DescriptorAllocator::new(mock.clone(), initial, PoolSizeRatio::defaults(), 1.5, max).unwrap();
        (mock, layout, allocator)
    }

    #[test]
    fn test_allocations_rotate_through_capped_pools() {
        let (mock, layout, mut allocator) = setup(4, 4);

        let sets: Vec<_> = (0..10).map(|_| allocator.allocate(&layout).unwrap()).collect();
        assert!(allocator.pool_count() >= 3);
        assert_eq!(mock.descriptor_pool_count(), allocator.pool_count());

        let pools: HashSet<_> = sets.iter().map(|&s| mock.descriptor_set_pool(s).unwrap()).collect();
        assert_eq!(pools.len(), 3);
    }

    #[test]
    fn test_pool_growth_respects_cap() {
        let (_mock, layout, mut allocator) = setup(2, 5);
        assert_eq!(allocator.sets_per_pool(), 3);

        for _ in 0..20 {
            allocator.allocate(&layout).unwrap();
        }
        assert_eq!(allocator.sets_per_pool(), 5);
    }

    #[test]
    fn test_reset_reclaims_every_pool() {
        let (mock, layout, mut allocator) = setup(4, 4);
        for _ in 0..10 {
            allocator.allocate(&layout).unwrap();
        }
        let pools_before = allocator.pool_count();

        allocator.reset_pools().unwrap();
        let set = allocator.allocate(&layout).unwrap();
        let pool = mock.descriptor_set_pool(set).unwrap();
        assert_eq!(mock.pool_allocation_count(pool), Some(1));
        assert_eq!(allocator.pool_count(), pools_before);
    }

    #[test]
    fn test_fragmented_pool_counts_as_exhausted() {
        let err = VulkanError::api("vkAllocateDescriptorSets")(vk::Result::ERROR_FRAGMENTED_POOL);
        assert!(is_pool_exhausted(&err));
        let err = VulkanError::api("vkAllocateDescriptorSets")(vk::Result::ERROR_DEVICE_LOST);
        assert!(!is_pool_exhausted(&err));
    }

    #[test]
    fn test_pool_sizes_follow_ratios() {
        let sizes = pool_sizes(&PoolSizeRatio::defaults(), 7);
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[0].descriptor_count, 7);
        assert_eq!(sizes[2].descriptor_count, 4);
    }

    #[test]
    fn test_drop_destroys_pools() {
        let (mock, layout, mut allocator) = setup(1, 1);
        allocator.allocate(&layout).unwrap();
        allocator.allocate(&layout).unwrap();
        assert_eq!(mock.descriptor_pool_count(), 2);

        drop(allocator);
        assert_eq!(mock.descriptor_pool_count(), 0);
        drop(layout);
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_writer_batches_and_clears() {
        let (mock, _layout, _allocator) = setup(1, 1);
        let device: SharedDevice = mock;
        let mut writer = DescriptorWriter::new();
        writer
            .write_buffer(0, vk::Buffer::null(), 0, 64, vk::DescriptorType::UNIFORM_BUFFER)
            .write_image(
                1,
                vk::ImageView::null(),
                vk::Sampler::null(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
        assert_eq!(writer.len(), 2);
        writer.update(&device, vk::DescriptorSet::null());
        assert!(writer.is_empty());
    }
}
