//! SPIR-V shader modules

use ash::vk;
use std::fs::File;
use std::path::Path;

use crate::render::vulkan::device_api::SharedDevice;
use crate::render::vulkan::error::{VulkanError, VulkanResult};

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: SharedDevice,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V words
    pub fn from_words(device: SharedDevice, code: &[u32]) -> VulkanResult<Self> {
        if code.is_empty() {
            return Err(VulkanError::invalid("Empty SPIR-V module"));
        }
        let module = device.create_shader_module(code)?;
        Ok(Self { device, module })
    }

    /// Load a shader from a SPIR-V file
    pub fn from_file(device: SharedDevice, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let shader_load = |source| VulkanError::ShaderLoad {
            path: path.display().to_string(),
            source,
        };
        let mut file = File::open(path).map_err(shader_load)?;
        let code = ash::util::read_spv(&mut file).map_err(shader_load)?;
        log::debug!("Loaded shader {} ({} words)", path.display(), code.len());
        Self::from_words(device, &code)
    }

    /// Get shader module handle
    pub const fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.device.destroy_shader_module(self.module);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::MockDevice;
    use std::io::Write;
    use std::rc::Rc;

    #[test]
    fn test_missing_file_is_shader_load_error() {
        let device: SharedDevice = Rc::new(MockDevice::new());
        let result = ShaderModule::from_file(device, "does/not/exist.spv");
        match result {
            Err(VulkanError::ShaderLoad { path, .. }) => assert!(path.ends_with("exist.spv")),
            _ => panic!("expected a shader load error"),
        }
    }

    #[test]
    fn test_loads_spirv_words() {
        let path = std::env::temp_dir().join(format!("pbr_engine_shader_test_{}.spv", std::process::id()));
        let words: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];
        let mut file = File::create(&path).unwrap();
        for word in words {
            file.write_all(&word.to_le_bytes()).unwrap();
        }
        drop(file);

        let mock = Rc::new(MockDevice::new());
        let module = ShaderModule::from_file(mock.clone(), &path).unwrap();
        assert_ne!(module.handle(), vk::ShaderModule::null());
        drop(module);
        assert_eq!(mock.live_object_count(), 0);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_truncated_spirv_rejected() {
        let path = std::env::temp_dir().join(format!("pbr_engine_shader_bad_{}.spv", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let device: SharedDevice = Rc::new(MockDevice::new());
        assert!(matches!(
            ShaderModule::from_file(device, &path),
            Err(VulkanError::ShaderLoad { .. })
        ));
        std::fs::remove_file(path).unwrap();
    }
}
