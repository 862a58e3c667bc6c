//! wgpu 图形后端实现
//!
//! 本模块实现了基于 wgpu 的图形后端，wgpu 是一个跨平台的图形 API，
//! 可以在 Vulkan、Metal、DirectX 12、OpenGL 等多种后端上运行。
//!
//! # 模块结构
//!
//! - `backend` - WgpuBackend 结构（设备初始化、丢失与恢复）
//! - `buffer` - 索引缓冲区
//! - `shader` - GLSL 校验与着色器模块
//! - `texture` - 纹理存储、采样器与回读

mod backend;
mod buffer;
mod shader;
mod texture;

pub use backend::WgpuBackend;
