//! Sampled textures

use ash::vk;

use super::image::{Image, ImageView};
use super::upload::UploadContext;
use crate::render::vulkan::device_api::{ImageViewDesc, SamplerDesc, SharedDevice};
use crate::render::vulkan::error::{VulkanError, VulkanResult};

/// Sampler, destroyed on drop
pub struct Sampler {
    device: SharedDevice,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear, repeating sampler with the device's maximum anisotropy when available
    pub fn linear_repeat(device: SharedDevice) -> VulkanResult<Self> {
        let desc = SamplerDesc {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: device.max_sampler_anisotropy(),
        };
        Self::new(device, &desc)
    }

    /// Create a sampler from explicit parameters
    pub fn new(device: SharedDevice, desc: &SamplerDesc) -> VulkanResult<Self> {
        let sampler = device.create_sampler(desc)?;
        Ok(Self { device, sampler })
    }

    /// Get sampler handle
    pub const fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.destroy_sampler(self.sampler);
    }
}

/// Image, view and sampler ready for shader sampling
pub struct Texture {
    sampler: Sampler,
    view: ImageView,
    image: Image,
}

impl Texture {
    /// Upload tightly packed RGBA8 sRGB pixels
    pub fn from_rgba8(upload: &UploadContext, device: &SharedDevice, width: u32, height: u32, pixels: &[u8]) -> VulkanResult<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(VulkanError::invalid(format!(
                "Texture data is {} bytes, expected {expected} for {width}x{height} RGBA8",
                pixels.len()
            )));
        }

        let format = vk::Format::R8G8B8A8_SRGB;
        let image = upload.create_image(vk::Extent2D { width, height }, format, pixels)?;
        let view = ImageView::new(
            device.clone(),
            &ImageViewDesc {
                image: image.handle(),
                format,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        )?;
        let sampler = Sampler::linear_repeat(device.clone())?;

        Ok(Self { sampler, view, image })
    }

    /// Image view for descriptor writes
    pub const fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    /// Sampler for descriptor writes
    pub const fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    /// Texture extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::mock::MockDevice;
    use std::rc::Rc;

    #[test]
    fn test_texture_from_pixels() {
        let mock = Rc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();
        let upload = UploadContext::new(device.clone(), u64::MAX).unwrap();

        let texture = Texture::from_rgba8(&upload, &device, 2, 1, &[255, 0, 0, 255, 0, 255, 0, 255]).unwrap();
        assert_eq!(texture.extent(), vk::Extent2D { width: 2, height: 1 });
        assert_ne!(texture.view(), vk::ImageView::null());
        assert_ne!(texture.sampler(), vk::Sampler::null());
    }

    #[test]
    fn test_pixel_count_mismatch_rejected() {
        let mock = Rc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();
        let upload = UploadContext::new(device.clone(), u64::MAX).unwrap();
        assert!(Texture::from_rgba8(&upload, &device, 2, 2, &[0; 8]).is_err());
    }
}
