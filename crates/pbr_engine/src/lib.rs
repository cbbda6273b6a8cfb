//! # PBR Engine
//!
//! GPU resource and frame-lifecycle core for a Vulkan physically-based renderer.
//!
//! ## Layout
//!
//! - **Bring-up**: instance, validation messenger, adapter selection and logical device
//! - **Frame loop**: swapchain state machine, per-slot fences and semaphores, image layout
//!   transitions, acquire / submit / present
//! - **Resources**: memory type selection, buffers, images, staged uploads, textures and
//!   growable descriptor pools
//! - **Forward pipeline**: render pass, framebuffers, shaders and the graphics pipeline
//!
//! All GPU calls go through the [`DeviceApi`](render::vulkan::DeviceApi) trait, so everything
//! above the device can run against the in-process mock backend in tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pbr_engine::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     let config = EngineConfig::default();
//!     let logging = LoggingContext::init(&config.logging)?;
//!     let mut engine = Engine::new(config, &logging)?;
//!     engine.load_default_scene()?;
//!     engine.run(|_scene, _dt| {})
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod assets;
pub mod config;
pub mod foundation;
pub mod render;

mod engine;

pub use engine::{Engine, EngineError};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::TextureData,
        config::{Config, EngineConfig},
        foundation::logging::LoggingContext,
        render::{
            vulkan::state::frame::{FrameContext, OverlayRecorder},
            Camera, MeshData, PrimitiveShape, Renderable, SceneLighting, SceneRenderer,
        },
        Engine, EngineError,
    };
}
