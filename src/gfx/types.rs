//! 后端共享的基础类型
//!
//! 句柄、着色器阶段、纹理格式与采样状态。这些类型在资源层和各个后端之间传递，
//! 不依赖任何具体的图形 API。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;

/// 后端对象句柄
///
/// 非零值，`Option<GpuHandle>` 为 `None` 表示没有 GPU 对象。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle(NonZeroU64);

impl GpuHandle {
    /// 从原始值创建，0 返回 `None`
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// 获取原始值
    pub fn raw(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for GpuHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 着色器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// 顶点着色器
    Vertex,
    /// 片段（像素）着色器
    Fragment,
}

impl ShaderStage {
    /// 区分阶段的宏名
    pub fn compile_define(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "COMPILEVS",
            ShaderStage::Fragment => "COMPILEPS",
        }
    }

    /// 阶段名称（用于日志）
    pub fn name(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

/// 纹理像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    /// 单通道 alpha
    Alpha8,
    /// 单通道亮度
    Luminance8,
    /// 亮度 + alpha
    LuminanceAlpha8,
    /// RGB 8 位
    Rgb8,
    /// RGBA 8 位
    Rgba8,
    /// RGBA 16 位浮点
    Rgba16Float,
    /// RGBA 32 位浮点
    Rgba32Float,
    /// 深度 32 位浮点
    Depth32Float,
    /// 深度 24 位 + 模板 8 位
    Depth24Stencil8,
}

impl TextureFormat {
    /// 每像素字节数
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            TextureFormat::Alpha8 | TextureFormat::Luminance8 => 1,
            TextureFormat::LuminanceAlpha8 => 2,
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Depth32Float | TextureFormat::Depth24Stencil8 => 4,
        }
    }

    /// 通道数
    pub fn components(&self) -> usize {
        match self {
            TextureFormat::Alpha8
            | TextureFormat::Luminance8
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24Stencil8 => 1,
            TextureFormat::LuminanceAlpha8 => 2,
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba8 | TextureFormat::Rgba16Float | TextureFormat::Rgba32Float => 4,
        }
    }

    /// 是否为深度格式
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float | TextureFormat::Depth24Stencil8)
    }

    /// 8 位无压缩格式对应的通道数映射
    ///
    /// 单通道图像在 `use_alpha` 为真时作为 alpha 蒙版。
    pub fn from_components(components: usize, use_alpha: bool) -> Option<Self> {
        match components {
            1 if use_alpha => Some(TextureFormat::Alpha8),
            1 => Some(TextureFormat::Luminance8),
            2 => Some(TextureFormat::LuminanceAlpha8),
            3 => Some(TextureFormat::Rgb8),
            4 => Some(TextureFormat::Rgba8),
            _ => None,
        }
    }
}

/// 纹理用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureUsage {
    /// 静态纹理
    Static,
    /// 频繁更新的纹理
    Dynamic,
    /// 渲染目标
    RenderTarget,
    /// 深度模板
    Depth,
}

impl TextureUsage {
    /// 是否需要渲染表面
    pub fn has_render_surface(&self) -> bool {
        *self >= TextureUsage::RenderTarget
    }
}

/// 纹理过滤模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Nearest,
    Bilinear,
    Trilinear,
    Anisotropic,
}

/// 纹理寻址模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
}

/// 采样状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerState {
    pub filter: FilterMode,
    /// U、V、W 三个坐标的寻址模式
    pub address: [AddressMode; 3],
    pub anisotropy: u32,
    pub srgb: bool,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            filter: FilterMode::Trilinear,
            address: [AddressMode::Wrap; 3],
            anisotropy: 4,
            srgb: false,
        }
    }
}

/// 立方体贴图的面
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeMapFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeMapFace {
    /// 全部六个面，按层索引排列
    pub const ALL: [CubeMapFace; 6] = [
        CubeMapFace::PositiveX,
        CubeMapFace::NegativeX,
        CubeMapFace::PositiveY,
        CubeMapFace::NegativeY,
        CubeMapFace::PositiveZ,
        CubeMapFace::NegativeZ,
    ];

    /// 层索引
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// 由层索引得到面
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// 纹理维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    Texture2D,
    TextureCube,
}

impl TextureKind {
    /// 数组层数
    pub fn layers(&self) -> u32 {
        match self {
            TextureKind::Texture2D => 1,
            TextureKind::TextureCube => 6,
        }
    }
}

/// 纹理创建描述
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub levels: u32,
    pub usage: TextureUsage,
    pub multisample: u32,
    pub sampler: SamplerState,
    pub label: Option<String>,
}

/// 纹理写入区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    /// 数组层（立方体贴图的面）
    pub layer: u32,
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_zero_is_none() {
        assert!(GpuHandle::new(0).is_none());
        assert_eq!(GpuHandle::new(7).unwrap().raw(), 7);
    }

    #[test]
    fn test_format_from_components() {
        assert_eq!(TextureFormat::from_components(1, true), Some(TextureFormat::Alpha8));
        assert_eq!(TextureFormat::from_components(1, false), Some(TextureFormat::Luminance8));
        assert_eq!(TextureFormat::from_components(3, false), Some(TextureFormat::Rgb8));
        assert_eq!(TextureFormat::from_components(5, false), None);
        assert_eq!(TextureFormat::Rgb8.bytes_per_pixel(), 3);
    }

    #[test]
    fn test_usage_ordering() {
        assert!(!TextureUsage::Dynamic.has_render_surface());
        assert!(TextureUsage::RenderTarget.has_render_surface());
        assert!(TextureUsage::Depth.has_render_surface());
    }

    #[test]
    fn test_cube_face_index() {
        for (i, face) in CubeMapFace::ALL.iter().enumerate() {
            assert_eq!(face.index(), i);
            assert_eq!(CubeMapFace::from_index(i), Some(*face));
        }
        assert_eq!(CubeMapFace::from_index(6), None);
    }
}
