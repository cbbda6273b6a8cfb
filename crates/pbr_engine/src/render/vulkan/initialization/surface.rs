//! Presentation surface

use ash::extensions::khr::Surface as SurfaceLoader;
use ash::vk;
use std::rc::Rc;

use super::instance::Instance;
use crate::render::vulkan::device_api::SurfaceSupport;
use crate::render::vulkan::error::{VulkanError, VulkanResult};
use crate::render::window::Window;

/// Window surface, destroyed on drop. Keeps its instance alive.
pub struct Surface {
    loader: SurfaceLoader,
    handle: vk::SurfaceKHR,
    instance: Rc<Instance>,
}

impl Surface {
    /// Create a surface for `window`
    pub fn new(instance: Rc<Instance>, window: &mut Window) -> VulkanResult<Rc<Self>> {
        let handle = window
            .create_vulkan_surface(instance.handle())
            .map_err(VulkanError::api("glfwCreateWindowSurface"))?;
        let loader = SurfaceLoader::new(instance.entry(), instance.raw());
        Ok(Rc::new(Self { loader, handle, instance }))
    }

    /// Raw surface handle
    pub const fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Instance the surface was created from
    pub fn instance(&self) -> &Rc<Instance> {
        &self.instance
    }

    /// Whether `queue_family` of `physical_device` can present to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family: u32) -> VulkanResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.handle)
        }
        .map_err(VulkanError::api("vkGetPhysicalDeviceSurfaceSupportKHR"))
    }

    /// Query capabilities, formats and present modes
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<SurfaceSupport> {
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
                .map_err(VulkanError::api("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.handle)
                .map_err(VulkanError::api("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
                .map_err(VulkanError::api("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;
            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
