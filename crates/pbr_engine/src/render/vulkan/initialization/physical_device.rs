//! Physical device selection
//!
//! Candidate adapters are first reduced to plain data ([`DeviceCandidate`]) and then judged by
//! pure functions, so the selection rule is testable without a GPU.

use ash::vk;
use std::ffi::CStr;

use super::instance::Instance;
use super::surface::Surface;
use crate::render::vulkan::device_api::QueueFamilies;
use crate::render::vulkan::error::{VulkanError, VulkanResult};

/// Device extensions the renderer cannot run without
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Facts about one adapter relevant to selection
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    /// Human readable adapter name
    pub name: String,
    /// Discrete, integrated, virtual, ...
    pub device_type: vk::PhysicalDeviceType,
    /// Capabilities of each queue family
    pub queue_flags: Vec<vk::QueueFlags>,
    /// Whether each queue family can present to the surface
    pub present_support: Vec<bool>,
    /// Supported device extensions
    pub extensions: Vec<String>,
    /// Number of surface formats offered for the surface
    pub surface_format_count: usize,
    /// Number of present modes offered for the surface
    pub present_mode_count: usize,
}

/// Pick graphics and present families for a candidate.
///
/// The present family is the graphics family when it can present, otherwise the first family
/// that can.
pub fn find_queue_families(queue_flags: &[vk::QueueFlags], present_support: &[bool]) -> Option<QueueFamilies> {
    let graphics = queue_flags
        .iter()
        .position(|flags| flags.contains(vk::QueueFlags::GRAPHICS))?;
    let present = if present_support.get(graphics).copied().unwrap_or(false) {
        graphics
    } else {
        present_support.iter().position(|supported| *supported)?
    };
    Some(QueueFamilies {
        graphics: u32::try_from(graphics).ok()?,
        present: u32::try_from(present).ok()?,
    })
}

/// Check a candidate against the renderer's requirements.
///
/// Returns the chosen queue families, or the reason it was rejected.
pub fn evaluate_candidate(candidate: &DeviceCandidate) -> Result<QueueFamilies, String> {
    for required in required_device_extensions() {
        let required = required.to_string_lossy();
        if !candidate.extensions.iter().any(|e| *e == required) {
            return Err(format!("missing extension {required}"));
        }
    }
    if candidate.surface_format_count == 0 || candidate.present_mode_count == 0 {
        return Err("surface offers no formats or present modes".to_string());
    }
    find_queue_families(&candidate.queue_flags, &candidate.present_support)
        .ok_or_else(|| "no graphics or present queue family".to_string())
}

const fn type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

/// Index and queue families of the best suitable candidate.
///
/// Discrete adapters beat integrated ones, which beat everything else; ties keep enumeration
/// order.
pub fn select_candidate(candidates: &[DeviceCandidate]) -> Option<(usize, QueueFamilies)> {
    let mut best: Option<(usize, QueueFamilies, u32)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        match evaluate_candidate(candidate) {
            Ok(families) => {
                let rank = type_rank(candidate.device_type);
                if best.map_or(true, |(_, _, best_rank)| rank > best_rank) {
                    best = Some((index, families, rank));
                }
            }
            Err(reason) => log::debug!("Skipping GPU '{}': {}", candidate.name, reason),
        }
    }
    best.map(|(index, families, _)| (index, families))
}

/// Adapter chosen for the logical device
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    /// Adapter handle (not owned)
    pub physical_device: vk::PhysicalDevice,
    /// Adapter name
    pub name: String,
    /// Chosen queue families
    pub families: QueueFamilies,
    /// Device limits and properties
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported features
    pub features: vk::PhysicalDeviceFeatures,
}

impl SelectedDevice {
    /// Enumerate adapters and select the best one for `surface`
    pub fn select(instance: &Instance, surface: &Surface) -> VulkanResult<Self> {
        let raw = instance.raw();
        let devices = unsafe { raw.enumerate_physical_devices() }
            .map_err(VulkanError::api("vkEnumeratePhysicalDevices"))?;
        if devices.is_empty() {
            return Err(VulkanError::NoSuitableDevice("no Vulkan adapters present".to_string()));
        }

        let mut candidates = Vec::with_capacity(devices.len());
        for &device in &devices {
            candidates.push(Self::describe(instance, surface, device)?);
        }

        let (index, families) = select_candidate(&candidates).ok_or_else(|| {
            VulkanError::NoSuitableDevice(format!("none of {} adapters meets the requirements", candidates.len()))
        })?;
        let physical_device = devices[index];
        let properties = unsafe { raw.get_physical_device_properties(physical_device) };
        let features = unsafe { raw.get_physical_device_features(physical_device) };

        log::info!(
            "Selected GPU: {} (graphics family {}, present family {})",
            candidates[index].name,
            families.graphics,
            families.present
        );

        Ok(Self {
            physical_device,
            name: candidates[index].name.clone(),
            families,
            properties,
            features,
        })
    }

    fn describe(instance: &Instance, surface: &Surface, device: vk::PhysicalDevice) -> VulkanResult<DeviceCandidate> {
        let raw = instance.raw();
        let properties = unsafe { raw.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let families = unsafe { raw.get_physical_device_queue_family_properties(device) };
        let queue_flags: Vec<_> = families.iter().map(|f| f.queue_flags).collect();
        let mut present_support = Vec::with_capacity(families.len());
        for index in 0..families.len() {
            let index = u32::try_from(index).map_err(|_| VulkanError::NoSuitableDevice(name.clone()))?;
            present_support.push(surface.supports_present(device, index)?);
        }

        let extensions = unsafe { raw.enumerate_device_extension_properties(device) }
            .map_err(VulkanError::api("vkEnumerateDeviceExtensionProperties"))?
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }.to_string_lossy().into_owned())
            .collect();

        let support = surface.support(device)?;

        Ok(DeviceCandidate {
            name,
            device_type: properties.device_type,
            queue_flags,
            present_support,
            extensions,
            surface_format_count: support.formats.len(),
            present_mode_count: support.present_modes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            device_type,
            queue_flags: vec![vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, vk::QueueFlags::COMPUTE],
            present_support: vec![true, false],
            extensions: vec!["VK_KHR_swapchain".to_string()],
            surface_format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn test_present_prefers_graphics_family() {
        let families = find_queue_families(
            &[vk::QueueFlags::TRANSFER, vk::QueueFlags::GRAPHICS],
            &[true, true],
        )
        .unwrap();
        assert_eq!(families, QueueFamilies { graphics: 1, present: 1 });
        assert!(families.is_shared());
    }

    #[test]
    fn test_distinct_present_family() {
        let families = find_queue_families(
            &[vk::QueueFlags::GRAPHICS, vk::QueueFlags::TRANSFER],
            &[false, true],
        )
        .unwrap();
        assert_eq!(families, QueueFamilies { graphics: 0, present: 1 });
        assert!(!families.is_shared());
    }

    #[test]
    fn test_no_present_family_rejected() {
        assert!(find_queue_families(&[vk::QueueFlags::GRAPHICS], &[false]).is_none());
    }

    #[test]
    fn test_missing_swapchain_extension_rejected() {
        let mut gpu = candidate("no swapchain", vk::PhysicalDeviceType::DISCRETE_GPU);
        gpu.extensions.clear();
        let reason = evaluate_candidate(&gpu).unwrap_err();
        assert!(reason.contains("VK_KHR_swapchain"));
    }

    #[test]
    fn test_discrete_preferred() {
        let candidates = vec![
            candidate("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("cpu", vk::PhysicalDeviceType::CPU),
        ];
        let (index, _) = select_candidate(&candidates).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_unsuitable_skipped() {
        let mut broken = candidate("discrete without formats", vk::PhysicalDeviceType::DISCRETE_GPU);
        broken.surface_format_count = 0;
        let candidates = vec![broken, candidate("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU)];
        assert_eq!(select_candidate(&candidates).map(|(i, _)| i), Some(1));
        assert!(select_candidate(&candidates[..1]).is_none());
    }
}
