//! Vulkan bring-up: instance, surface, adapter selection and logical device

pub mod context;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod surface;

pub use context::GpuContext;
pub use device::VulkanDevice;
pub use instance::{Instance, InstanceDesc};
pub use physical_device::SelectedDevice;
pub use surface::Surface;
