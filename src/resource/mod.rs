//! 资源加载
//!
//! 纹理和着色器加载所需的外部接口：
//! - `provider`：按名称读取字节（目录 / 内存）
//! - `image`：解码后的像素与 mip 生成
//! - `parameters`：TOML 纹理参数和立方体贴图描述

pub mod image;
pub mod parameters;
pub mod provider;

pub use self::image::Image;
pub use parameters::{AddressParameters, CubeDescription, TextureParameters};
pub use provider::{DirectoryProvider, MemoryProvider, ResourceProvider};
