//! Rendering: window, camera, mesh data, the scene renderer and the Vulkan backend

pub mod camera;
pub mod mesh;
pub mod scene;
pub mod vulkan;
pub mod window;

pub use camera::{Camera, SceneLighting};
pub use mesh::{MeshData, PrimitiveShape, Renderable, Vertex};
pub use scene::{MeshKey, SceneRenderer};
pub use window::{Window, WindowError};
