//! Per-frame state: synchronization objects, the swapchain and the frame orchestrator

pub mod frame;
pub mod swapchain;
pub mod sync;
