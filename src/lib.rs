//! DistGPU - DistRender 的设备资源层
//!
//! 在可替换的图形后端之上管理 GPU 资源，资源在设备丢失与恢复之后仍然可用。
//! 本库提供了统一的资源接口和后端实现。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理）
//! - `gfx`: 图形后端抽象层（软件后端、wgpu 后端）
//! - `renderer`: 设备资源（索引缓冲区、着色器变体、纹理）
//! - `resource`: 资源读取、图像解码和参数文件
//!
//! # 使用示例
//!
//! ```no_run
//! use std::rc::Rc;
//! use dist_gpu::gfx::{GraphicsCapabilities, SoftwareBackend};
//! use dist_gpu::renderer::{GraphicsContext, IndexBuffer};
//!
//! let context = GraphicsContext::new(Rc::new(SoftwareBackend::default()), GraphicsCapabilities::software());
//!
//! let buffer = IndexBuffer::new(&context);
//! let mut buffer = buffer.borrow_mut();
//! buffer.set_shadowed(true);
//! buffer.set_size(3, false, false).unwrap();
//! buffer.set_data(bytemuck::cast_slice(&[0u16, 1, 2])).unwrap();
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
pub mod resource;
