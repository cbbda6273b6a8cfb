//! Swapchain selection policy and lifecycle
//!
//! ```text
//! Uninitialized --ensure_ready--> Ready --acquire/present stale, resize--> OutOfDate
//!                                   ^                                          |
//!                                   +-------------ensure_ready-----------------+
//! any --destroy--> Destroyed
//! ```
//!
//! A swapchain is never mutated: recreation builds a new one (passing the old handle as
//! `old_swapchain`) and drops the previous one together with all of its views.

use ash::vk;

use crate::render::vulkan::device_api::{ImageViewDesc, SharedDevice, SurfaceSupport, SwapchainParams};
use crate::render::vulkan::error::{VulkanError, VulkanResult};
use crate::render::vulkan::resources::image::ImageView;

/// Preferred format and presentation mode, used when the surface supports them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPolicy {
    /// Preferred format / color space pair
    pub preferred_format: vk::SurfaceFormatKHR,
    /// Preferred presentation mode; FIFO is used when it is unavailable
    pub preferred_present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainPolicy {
    fn default() -> Self {
        Self {
            preferred_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
        }
    }
}

/// Preferred pair if available, else the first format the surface reports
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| available.first().copied())
}

/// Preferred mode if available, else FIFO which every surface supports
pub fn choose_present_mode(available: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Surface's current extent, or the framebuffer size clamped to the supported range when the
/// surface leaves the choice to the application
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: framebuffer.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One image more than the minimum, capped at the maximum (0 means unbounded)
pub const fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && desired > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        desired
    }
}

/// Presentable images with their views
pub struct Swapchain {
    device: SharedDevice,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    generation: u64,
}

impl Swapchain {
    fn create(
        device: &SharedDevice,
        support: &SurfaceSupport,
        policy: &SwapchainPolicy,
        extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
        generation: u64,
    ) -> VulkanResult<Self> {
        let format = choose_surface_format(&support.formats, policy.preferred_format)
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&support.present_modes, policy.preferred_present_mode);
        let image_count = choose_image_count(&support.capabilities);

        let handle = device.create_swapchain(&SwapchainParams {
            format,
            present_mode,
            extent,
            image_count,
            pre_transform: support.capabilities.current_transform,
            old_swapchain,
        })?;

        let mut swapchain = Self {
            device: device.clone(),
            handle,
            images: Vec::new(),
            views: Vec::new(),
            format,
            present_mode,
            extent,
            generation,
        };
        swapchain.images = device.swapchain_images(handle)?;
        for &image in &swapchain.images {
            swapchain.views.push(ImageView::new(
                device.clone(),
                &ImageViewDesc {
                    image,
                    format: format.format,
                    aspect: vk::ImageAspectFlags::COLOR,
                },
            )?);
        }

        log::info!(
            "Swapchain generation {}: {}x{}, {} images, {:?}, {:?}",
            generation,
            extent.width,
            extent.height,
            swapchain.images.len(),
            format.format,
            present_mode
        );
        Ok(swapchain)
    }

    /// Get swapchain handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Presentable images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One color view per image
    pub fn image_views(&self) -> Vec<vk::ImageView> {
        self.views.iter().map(ImageView::handle).collect()
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Chosen surface format
    pub const fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Chosen presentation mode
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Image extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Creation counter, incremented on every recreation
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.views.clear();
        self.device.destroy_swapchain(self.handle);
    }
}

/// Lifecycle state of the managed swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    /// Not created yet
    Uninitialized,
    /// Usable for acquire and present
    Ready,
    /// Must be recreated before the next frame
    OutOfDate,
    /// Torn down
    Destroyed,
}

/// Owns the current swapchain and drives its state machine
pub struct SwapchainManager {
    device: SharedDevice,
    policy: SwapchainPolicy,
    swapchain: Option<Swapchain>,
    state: SwapchainState,
    generation: u64,
}

impl SwapchainManager {
    /// Manager without a swapchain; the first [`ensure_ready`](Self::ensure_ready) creates it
    pub fn new(device: SharedDevice, policy: SwapchainPolicy) -> Self {
        Self {
            device,
            policy,
            swapchain: None,
            state: SwapchainState::Uninitialized,
            generation: 0,
        }
    }

    /// Current state
    pub const fn state(&self) -> SwapchainState {
        self.state
    }

    /// Current swapchain, if one exists
    pub const fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    /// Number of swapchains created so far
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the next [`ensure_ready`](Self::ensure_ready) will try to (re)create the swapchain
    pub fn needs_recreation(&self) -> bool {
        matches!(self.state, SwapchainState::Uninitialized | SwapchainState::OutOfDate)
    }

    /// Flag the swapchain for recreation. Repeated calls before the next frame coalesce.
    pub fn mark_out_of_date(&mut self) {
        if self.state == SwapchainState::Ready {
            log::debug!("Swapchain marked out of date");
            self.state = SwapchainState::OutOfDate;
        }
    }

    /// Make sure a usable swapchain exists, (re)creating it if needed.
    ///
    /// Returns `false` without touching anything while the surface or framebuffer has zero
    /// area. Before an existing swapchain is replaced, the device is waited idle and
    /// `release_dependents` runs so framebuffers built on the old views can be dropped first.
    pub fn ensure_ready(
        &mut self,
        framebuffer: vk::Extent2D,
        release_dependents: impl FnOnce(),
    ) -> VulkanResult<bool> {
        match self.state {
            SwapchainState::Ready => return Ok(true),
            SwapchainState::Destroyed => return Err(VulkanError::invalid("Swapchain was destroyed")),
            SwapchainState::Uninitialized | SwapchainState::OutOfDate => {}
        }

        let support = self.device.surface_support()?;
        let extent = choose_extent(&support.capabilities, framebuffer);
        if extent.width == 0 || extent.height == 0 || framebuffer.width == 0 || framebuffer.height == 0 {
            log::trace!("Surface has zero area, postponing swapchain creation");
            return Ok(false);
        }

        let old = self.swapchain.take();
        if old.is_some() {
            self.device.wait_idle()?;
            release_dependents();
        }
        let old_handle = old.as_ref().map_or_else(vk::SwapchainKHR::null, Swapchain::handle);

        let created = Swapchain::create(&self.device, &support, &self.policy, extent, old_handle, self.generation + 1);
        drop(old);
        self.swapchain = Some(created?);
        self.generation += 1;
        self.state = SwapchainState::Ready;
        Ok(true)
    }

    /// Wait for the device to go idle and destroy the swapchain
    pub fn destroy(&mut self) -> VulkanResult<()> {
        if self.swapchain.is_some() {
            self.device.wait_idle()?;
        }
        self.swapchain = None;
        self.state = SwapchainState::Destroyed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::device_api::DeviceApi;
    use crate::render::vulkan::mock::{MockDevice, MockEvent};
    use std::collections::HashSet;
    use std::rc::Rc;

    const FRAMEBUFFER: vk::Extent2D = vk::Extent2D { width: 1280, height: 720 };

    fn manager() -> (Rc<MockDevice>, SwapchainManager) {
        let mock = Rc::new(MockDevice::new());
        let manager = SwapchainManager::new(mock.clone(), SwapchainPolicy::default());
        (mock, manager)
    }

    fn created_views(events: &[MockEvent]) -> HashSet<vk::ImageView> {
        events
            .iter()
            .filter_map(|e| match e {
                MockEvent::CreateImageView(view) => Some(*view),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_format_preference_and_fallback() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb], srgb), Some(srgb));
        assert_eq!(choose_surface_format(&[unorm], srgb), Some(unorm));
        assert_eq!(choose_surface_format(&[], srgb), None);
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let mailbox = vk::PresentModeKHR::MAILBOX;
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO, mailbox], mailbox), mailbox);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], mailbox),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_and_image_count() {
        let mut caps = MockDevice::new().surface_support().unwrap().capabilities;
        assert_eq!(choose_extent(&caps, vk::Extent2D { width: 1, height: 1 }), FRAMEBUFFER);

        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        caps.max_image_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(
            choose_extent(&caps, vk::Extent2D { width: 1920, height: 300 }),
            vk::Extent2D { width: 800, height: 300 }
        );

        assert_eq!(choose_image_count(&caps), 3);
        caps.min_image_count = 3;
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 4);
    }

    #[test]
    fn test_initial_creation_matches_surface() {
        let (mock, mut manager) = manager();
        assert_eq!(manager.state(), SwapchainState::Uninitialized);
        assert!(manager.ensure_ready(FRAMEBUFFER, || {}).unwrap());

        let caps = mock.surface_support().unwrap().capabilities;
        let swapchain = manager.swapchain().unwrap();
        let count = swapchain.image_count() as u32;
        assert!(count >= caps.min_image_count && count <= caps.max_image_count);
        assert_eq!(swapchain.extent(), FRAMEBUFFER);
        assert_eq!(swapchain.format().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(swapchain.image_views().len(), swapchain.images().len());
        assert_eq!(manager.state(), SwapchainState::Ready);
    }

    #[test]
    fn test_repeated_resize_coalesces_into_one_recreation() {
        let (mock, mut manager) = manager();
        manager.ensure_ready(FRAMEBUFFER, || {}).unwrap();
        let first_views = created_views(&mock.events());
        mock.clear_events();

        let latest = vk::Extent2D { width: 1024, height: 768 };
        mock.resize_surface(vk::Extent2D { width: 800, height: 600 });
        manager.mark_out_of_date();
        mock.resize_surface(latest);
        manager.mark_out_of_date();

        let mut released = 0;
        assert!(manager.ensure_ready(latest, || released += 1).unwrap());
        assert!(manager.ensure_ready(latest, || released += 1).unwrap());
        assert_eq!(released, 1);

        let events = mock.events();
        let creations: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                MockEvent::CreateSwapchain { extent, .. } => Some(*extent),
                _ => None,
            })
            .collect();
        assert_eq!(creations, vec![latest]);
        assert_eq!(manager.generation(), 2);
        assert_eq!(manager.swapchain().unwrap().extent(), latest);
        assert!(created_views(&events).is_disjoint(&first_views));

        // The device went idle before anything of the old generation was destroyed.
        let idle = events.iter().position(|e| *e == MockEvent::WaitIdle).unwrap();
        let first_destroy = events
            .iter()
            .position(|e| matches!(e, MockEvent::DestroyImageView(_) | MockEvent::DestroySwapchain(_)))
            .unwrap();
        assert!(idle < first_destroy);
    }

    #[test]
    fn test_zero_extent_postpones_recreation() {
        let (mock, mut manager) = manager();
        manager.ensure_ready(FRAMEBUFFER, || {}).unwrap();

        mock.resize_surface(vk::Extent2D { width: 0, height: 0 });
        manager.mark_out_of_date();
        assert!(!manager.ensure_ready(vk::Extent2D { width: 0, height: 0 }, || {}).unwrap());
        assert_eq!(manager.state(), SwapchainState::OutOfDate);
        assert_eq!(manager.generation(), 1);

        mock.resize_surface(FRAMEBUFFER);
        assert!(manager.ensure_ready(FRAMEBUFFER, || {}).unwrap());
        assert_eq!(manager.generation(), 2);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (mock, mut manager) = manager();
        manager.ensure_ready(FRAMEBUFFER, || {}).unwrap();
        manager.destroy().unwrap();
        assert_eq!(manager.state(), SwapchainState::Destroyed);
        assert_eq!(mock.live_object_count(), 0);
        assert!(manager.ensure_ready(FRAMEBUFFER, || {}).is_err());
    }
}
