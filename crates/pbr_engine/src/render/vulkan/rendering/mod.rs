//! Command recording and the forward pipeline objects

pub mod commands;
pub mod framebuffer;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod vertex_layout;
