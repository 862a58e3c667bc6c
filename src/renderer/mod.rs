//! 设备资源层
//!
//! 与具体图形 API 无关的 GPU 资源：索引缓冲区、着色器变体、2D 纹理和立方体贴图。
//! 所有资源都通过 `GraphicsContext` 访问后端，并在设备丢失与恢复时接收广播。
//!
//! # 架构设计
//!
//! - `GraphicsContext`：持有后端和能力配置，管理绑定、程序缓存和临时缓冲区池
//! - `DeviceObject`：资源的生命周期钩子，状态由 `DeviceObjectLifecycle` 保存
//! - 具体资源在各自的模块中实现

pub mod context;
pub mod gpu_object;
pub mod index_buffer;
pub mod render_surface;
pub mod shader;
pub mod shader_variation;
pub mod shadow;
pub mod texture;
pub mod texture_2d;
pub mod texture_cube;

pub use context::{GraphicsContext, MAX_RENDER_TARGETS, MAX_TEXTURE_UNITS};
pub use gpu_object::{DeviceGeneration, DeviceObject, DeviceObjectLifecycle, DeviceObjectState, MissedTransition, ObjectId};
pub use index_buffer::{IndexBuffer, UsedVertexRange};
pub use render_surface::{RenderSurface, RenderSurfaceUpdateMode};
pub use shader::Shader;
pub use shader_variation::{assemble_source, AssembledSource, PreprocessOptions, ShaderVariation};
pub use shadow::{LockState, ShadowBuffer};
pub use texture::{Texture, TextureCoordinate};
pub use texture_2d::{Texture2D, Texture2DLoad};
pub use texture_cube::{TextureCube, TextureCubeLoad};
