//! 图形后端模块
//!
//! 本模块封装了不同图形 API 的底层实现，包括：
//! - 软件后端：在 CPU 上模拟设备，用于无 GPU 环境和测试
//! - wgpu：跨平台的高层图形抽象（支持 Vulkan、Metal、DX12、OpenGL）
//!
//! 所有后端都实现了统一的 `GraphicsBackend` trait，
//! 启动时由 `create_backend` 按配置选出唯一的实现。

pub mod backend;
pub mod capabilities;
pub mod software;
pub mod types;
pub mod wgpu;

use std::rc::Rc;

use tracing::info;

use crate::core::config::{BackendKind, Config};
use crate::core::error::Result;

pub use backend::{GraphicsBackend, IndexBufferBackend, ShaderBackend, TextureBackend};
pub use capabilities::GraphicsCapabilities;
pub use software::{SoftwareBackend, SoftwareBackendOptions};
pub use types::*;
pub use self::wgpu::WgpuBackend;

/// 按配置创建图形后端
pub fn create_backend(config: &Config) -> Result<Rc<dyn GraphicsBackend>> {
    let backend: Rc<dyn GraphicsBackend> = match config.graphics.backend {
        BackendKind::Software => Rc::new(SoftwareBackend::new(SoftwareBackendOptions {
            buffer_mapping: config.graphics.buffer_mapping,
        })),
        BackendKind::Wgpu => Rc::new(WgpuBackend::new()?),
    };
    info!("Graphics backend: {}", backend.backend_name());
    Ok(backend)
}
