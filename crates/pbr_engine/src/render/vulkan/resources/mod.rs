//! GPU memory, buffers, images, staging uploads and descriptor allocation

pub mod buffer;
pub mod descriptor;
pub mod image;
pub mod memory;
pub mod texture;
pub mod upload;
