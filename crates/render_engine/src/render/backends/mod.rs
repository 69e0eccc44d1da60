//! Rendering backend implementations
//!
//! Each backend implements the `GraphicsBackend` capability interface from
//! `render::api`; selection happens at build/config time.

pub mod vulkan;
