//! Vulkan backend
//!
//! - [`initialization`]: instance, surface, adapter and logical device
//! - [`state`]: swapchain, per-frame synchronization and the frame loop
//! - [`resources`]: memory, buffers, images, uploads and descriptors
//! - [`rendering`]: command buffers, render pass, framebuffers and pipelines

pub mod device_api;
pub mod error;
pub mod initialization;
#[cfg(any(test, feature = "mock-device"))]
pub mod mock;
pub mod rendering;
pub mod resources;
pub mod state;

pub use device_api::{DeviceApi, SharedDevice};
pub use error::{VulkanError, VulkanResult};
