//! Foundation module - process-wide utilities shared by the engine and the viewer

pub mod logging;
