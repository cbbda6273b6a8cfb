//! GPU bring-up
//!
//! Wires instance, surface, adapter selection and the logical device together. The device keeps
//! its surface alive and the surface keeps its instance alive, so dropping the last
//! [`SharedDevice`] tears the chain down in reverse dependency order.

use std::rc::Rc;

use super::device::VulkanDevice;
use super::instance::{Instance, InstanceDesc};
use super::physical_device::SelectedDevice;
use super::surface::Surface;
use crate::config::RendererConfig;
use crate::foundation::logging::LoggingContext;
use crate::render::vulkan::device_api::SharedDevice;
use crate::render::vulkan::error::{VulkanError, VulkanResult};
use crate::render::window::Window;

/// Instance, surface and logical device for one window
pub struct GpuContext {
    device: Rc<VulkanDevice>,
    adapter: SelectedDevice,
}

impl GpuContext {
    /// Bring up Vulkan for `window`
    pub fn new(window: &mut Window, config: &RendererConfig, logging: &LoggingContext) -> VulkanResult<Self> {
        let required_extensions = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let instance = Instance::new(&InstanceDesc {
            application_name: &config.application_name,
            required_extensions: &required_extensions,
            enable_validation: config.validation_enabled(),
            log_level: logging.level(),
        })?;
        let surface = Surface::new(instance, window)?;
        let adapter = SelectedDevice::select(surface.instance(), &surface)?;
        let device = Rc::new(VulkanDevice::new(surface, &adapter)?);

        Ok(Self { device, adapter })
    }

    /// Shared dispatch handle for RAII wrappers
    pub fn device(&self) -> SharedDevice {
        self.device.clone()
    }

    /// Name of the selected adapter
    pub fn adapter_name(&self) -> &str {
        &self.adapter.name
    }
}
