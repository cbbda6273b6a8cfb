//! # Engine Configuration
//!
//! Window, renderer, descriptor pooling, asset and logging settings. Every section has sensible
//! defaults so a missing config file still produces a working viewer, and every section can be
//! loaded from TOML or RON through the [`Config`] trait.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{Config, ConfigError};
use crate::render::vulkan::resources::descriptor::PoolSizeRatio;
use crate::render::vulkan::state::frame::FrameSettings;
use crate::render::vulkan::state::swapchain::SwapchainPolicy;

/// Window settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "PBR Viewer".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Surface format the swapchain should prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceFormatPreference {
    /// `B8G8R8A8_SRGB` with the sRGB non-linear color space
    Bgra8Srgb,
    /// `R8G8B8A8_SRGB` with the sRGB non-linear color space
    Rgba8Srgb,
    /// `B8G8R8A8_UNORM` with the sRGB non-linear color space
    Bgra8Unorm,
}

impl SurfaceFormatPreference {
    /// Vulkan format / color space pair
    pub const fn to_vk(self) -> vk::SurfaceFormatKHR {
        let format = match self {
            Self::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            Self::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            Self::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        };
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }
}

/// Presentation mode the swapchain should prefer. FIFO is the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// Triple buffering without tearing
    Mailbox,
    /// Vertical sync
    Fifo,
    /// Vertical sync that tears when a frame is late
    FifoRelaxed,
    /// No synchronization with the display
    Immediate,
}

impl PresentModePreference {
    /// Vulkan present mode
    pub const fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Fifo => vk::PresentModeKHR::FIFO,
            Self::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

/// Shader file locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: PathBuf,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: PathBuf,
}

impl ShaderConfig {
    /// Create a shader configuration from explicit paths
    pub fn new(vertex_path: impl Into<PathBuf>, fragment_path: impl Into<PathBuf>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Look for the compiled shaders in the usual output directories, so the viewer works when
    /// started from the workspace root or from a crate directory
    pub fn with_path_resolution(vertex_file: &str, fragment_file: &str) -> Self {
        const SHADER_DIRS: [&str; 4] = ["target/shaders", "../target/shaders", "../../target/shaders", "shaders"];

        let resolve = |file: &str| {
            SHADER_DIRS
                .iter()
                .map(|dir| Path::new(dir).join(file))
                .find(|candidate| candidate.exists())
                .unwrap_or_else(|| Path::new(SHADER_DIRS[0]).join(file))
        };

        Self {
            vertex_shader_path: resolve(vertex_file),
            fragment_shader_path: resolve(fragment_file),
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("pbr.vert.spv", "pbr.frag.spv")
    }
}

/// Vulkan renderer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name reported to the driver
    pub application_name: String,
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Upper bound on a frame-slot fence wait
    pub fence_timeout_ns: u64,
    /// Upper bound on swapchain image acquisition
    pub acquire_timeout_ns: u64,
    /// Preferred swapchain format
    pub preferred_format: SurfaceFormatPreference,
    /// Preferred presentation mode
    pub preferred_present_mode: PresentModePreference,
    /// RGBA clear color of the color attachment
    pub clear_color: [f32; 4],
    /// Whether to enable validation layers. `None` enables them in debug builds.
    pub enable_validation: Option<bool>,
    /// Shader locations
    pub shaders: ShaderConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "PBR Viewer".to_string(),
            frames_in_flight: 2,
            fence_timeout_ns: 1_000_000_000,
            acquire_timeout_ns: 1_000_000_000,
            preferred_format: SurfaceFormatPreference::Bgra8Srgb,
            preferred_present_mode: PresentModePreference::Mailbox,
            clear_color: [0.02, 0.02, 0.03, 1.0],
            enable_validation: None,
            shaders: ShaderConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Whether validation layers should be enabled for this build
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Swapchain preferences in Vulkan terms
    pub const fn swapchain_policy(&self) -> SwapchainPolicy {
        SwapchainPolicy {
            preferred_format: self.preferred_format.to_vk(),
            preferred_present_mode: self.preferred_present_mode.to_vk(),
        }
    }
}

/// Descriptor type a pool ratio applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorKind {
    /// Uniform buffer
    UniformBuffer,
    /// Combined image sampler
    CombinedImageSampler,
    /// Storage buffer
    StorageBuffer,
}

impl DescriptorKind {
    /// Vulkan descriptor type
    pub const fn to_vk(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

/// Descriptors of one type reserved per set in every pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRatio {
    /// Descriptor type
    pub kind: DescriptorKind,
    /// Descriptors per set
    pub ratio: f32,
}

/// Descriptor pool growth settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Capacity of the first pool of every frame slot
    pub initial_sets_per_pool: u32,
    /// Multiplier applied to the pool capacity after each new pool
    pub growth_factor: f32,
    /// Largest capacity a single pool may have
    pub max_pool_sets: u32,
    /// Pool composition
    pub ratios: Vec<DescriptorRatio>,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            initial_sets_per_pool: 64,
            growth_factor: 1.5,
            max_pool_sets: 4092,
            ratios: vec![
                DescriptorRatio {
                    kind: DescriptorKind::UniformBuffer,
                    ratio: 1.0,
                },
                DescriptorRatio {
                    kind: DescriptorKind::CombinedImageSampler,
                    ratio: 1.0,
                },
                DescriptorRatio {
                    kind: DescriptorKind::StorageBuffer,
                    ratio: 0.5,
                },
            ],
        }
    }
}

impl DescriptorConfig {
    /// Ratios in Vulkan terms
    pub fn pool_ratios(&self) -> Vec<PoolSizeRatio> {
        self.ratios
            .iter()
            .map(|r| PoolSizeRatio {
                descriptor_type: r.kind.to_vk(),
                ratio: r.ratio,
            })
            .collect()
    }
}

/// Asset locations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Base directory relative paths are resolved against
    pub assets_dir: PathBuf,
    /// OBJ model to display. A procedural cube is shown when unset.
    pub model_path: Option<PathBuf>,
    /// PNG base-color texture. A checker pattern is used when unset.
    pub texture_path: Option<PathBuf>,
}

impl AssetConfig {
    /// Resolve `path` against the asset directory unless it is absolute
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.assets_dir.join(path)
        }
    }
}

/// Log sink settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level: `off`, `error`, `warn`, `info`, `debug` or `trace`
    pub level: String,
    /// Per-module level overrides, e.g. `pbr_engine::render::vulkan = "trace"`
    pub module_filters: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_filters: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Parsed default level
    pub fn level_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("Unknown log level '{}'", self.level)))
    }

    /// Filter directives in `env_logger` syntax
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.module_filters.iter().map(|(module, level)| format!("{module}={level}")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Descriptor pool settings
    pub descriptors: DescriptorConfig,
    /// Asset locations
    pub assets: AssetConfig,
    /// Log sink settings
    pub logging: LoggingConfig,
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Set the window title and application name
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.renderer.application_name.clone_from(&title);
        self.window.title = title;
        self
    }

    /// Set the initial window size
    pub const fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window.width = width;
        self.window.height = height;
        self
    }

    /// Set the number of frames in flight
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.renderer.frames_in_flight = frames;
        self
    }

    /// Set the preferred presentation mode
    pub const fn with_present_mode(mut self, mode: PresentModePreference) -> Self {
        self.renderer.preferred_present_mode = mode;
        self
    }

    /// Force validation layers on or off
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.renderer.enable_validation = Some(enabled);
        self
    }

    /// Set the OBJ model to display
    pub fn with_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.assets.model_path = Some(path.into());
        self
    }

    /// Set the default log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.window.width == 0 || self.window.height == 0 {
            return invalid(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            ));
        }
        if self.renderer.frames_in_flight == 0 {
            return invalid("frames_in_flight must be at least 1".to_string());
        }
        if self.renderer.fence_timeout_ns == 0 || self.renderer.acquire_timeout_ns == 0 {
            return invalid("Timeouts must be non-zero".to_string());
        }
        if self.descriptors.initial_sets_per_pool == 0 {
            return invalid("initial_sets_per_pool must be at least 1".to_string());
        }
        if self.descriptors.max_pool_sets < self.descriptors.initial_sets_per_pool {
            return invalid(format!(
                "max_pool_sets ({}) is smaller than initial_sets_per_pool ({})",
                self.descriptors.max_pool_sets, self.descriptors.initial_sets_per_pool
            ));
        }
        if !(self.descriptors.growth_factor >= 1.0) {
            return invalid(format!(
                "growth_factor must be at least 1.0, got {}",
                self.descriptors.growth_factor
            ));
        }
        if self.descriptors.ratios.is_empty() {
            return invalid("At least one descriptor ratio is required".to_string());
        }
        if let Some(r) = self.descriptors.ratios.iter().find(|r| !(r.ratio > 0.0)) {
            return invalid(format!("Descriptor ratio for {:?} must be positive", r.kind));
        }

        self.logging.level_filter()?;
        for (module, level) in &self.logging.module_filters {
            if level.parse::<log::LevelFilter>().is_err() {
                return invalid(format!("Unknown log level '{level}' for module '{module}'"));
            }
        }

        Ok(())
    }

    /// Frame loop settings derived from the renderer and descriptor sections
    pub fn frame_settings(&self) -> FrameSettings {
        FrameSettings {
            frames_in_flight: self.renderer.frames_in_flight,
            fence_timeout_ns: self.renderer.fence_timeout_ns,
            acquire_timeout_ns: self.renderer.acquire_timeout_ns,
            swapchain: self.renderer.swapchain_policy(),
            descriptor_sets_per_pool: self.descriptors.initial_sets_per_pool,
            descriptor_growth_factor: self.descriptors.growth_factor,
            descriptor_max_sets_per_pool: self.descriptors.max_pool_sets,
            descriptor_ratios: self.descriptors.pool_ratios(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pbr_engine_{}_{name}", std::process::id()))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.descriptors.max_pool_sets, 4092);
        assert_eq!(config.frame_settings().swapchain, SwapchainPolicy::default());
    }

    #[test]
    fn test_builder_chain() {
        let config = EngineConfig::default()
            .with_title("Demo")
            .with_window_size(800, 600)
            .with_frames_in_flight(3)
            .with_present_mode(PresentModePreference::Fifo)
            .with_validation(false);

        assert_eq!(config.window.title, "Demo");
        assert_eq!(config.renderer.application_name, "Demo");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert!(!config.renderer.validation_enabled());

        let settings = config.frame_settings();
        assert_eq!(settings.frames_in_flight, 3);
        assert_eq!(settings.swapchain.preferred_present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_toml_round_trip() {
        let path = temp_path("config.toml");
        let config = EngineConfig::default().with_model("models/teapot.obj").with_log_level("debug");
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let path = temp_path("config.ron");
        let mut config = EngineConfig::default();
        config
            .logging
            .module_filters
            .insert("pbr_engine::render".to_string(), "trace".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let path = temp_path("partial.toml");
        std::fs::write(&path, "[renderer]\nframes_in_flight = 3\npreferred_present_mode = \"Fifo\"\n").unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.renderer.frames_in_flight, 3);
        assert_eq!(loaded.renderer.preferred_present_mode, PresentModePreference::Fifo);
        assert_eq!(loaded.window, WindowConfig::default());
    }

    #[test]
    fn test_unsupported_extension() {
        let err = EngineConfig::default().save_to_file(temp_path("config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = EngineConfig::default().with_frames_in_flight(0);
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.descriptors.growth_factor = 0.5;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.descriptors.max_pool_sets = 8;
        assert!(config.validate().is_err());

        config = EngineConfig::default().with_log_level("loud");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_filter_directives() {
        let mut logging = LoggingConfig::default();
        logging.module_filters.insert("pbr_engine::render".to_string(), "trace".to_string());
        assert_eq!(logging.filter_directives(), "info,pbr_engine::render=trace");
        assert_eq!(logging.level_filter().unwrap(), log::LevelFilter::Info);
    }
}
