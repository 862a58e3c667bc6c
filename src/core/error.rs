//! 错误处理模块
//!
//! 定义了设备资源层使用的统一错误类型。
//!
//! # 分类
//!
//! - `ConfigError`：配置文件读取与校验
//! - `GraphicsError`：参数越界、后端创建失败、着色器编译失败等
//! - `ResourceError`：资源读取、解码与所属关系失效
//!
//! 设备丢失本身不是错误，由生命周期状态机处理。

use std::fmt;

/// 统一的 Result 类型
pub type Result<T> = std::result::Result<T, DistGpuError>;

/// DistGPU 的错误类型
#[derive(Debug)]
pub enum DistGpuError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 资源加载错误
    Resource(ResourceError),

    /// IO 错误
    Io(std::io::Error),

    /// 初始化错误
    Initialization(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 设备不可用（无头模式或设备已丢失）
    DeviceUnavailable(String),

    /// 着色器编译失败
    ShaderCompilation(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 资源尚未创建
    NotCreated(String),

    /// 非法的数据范围或尺寸
    InvalidRange(String),

    /// 缓冲区已被锁定
    AlreadyLocked(String),

    /// 缺少 CPU 影子数据
    MissingShadowData(String),

    /// 不支持的格式
    UnsupportedFormat(String),
}

/// 资源加载相关的错误
#[derive(Debug)]
pub enum ResourceError {
    /// 资源不存在
    NotFound(String),

    /// 解码失败
    Decode(String),

    /// 参数文件无效
    InvalidParameters(String),

    /// 所属着色器已经销毁
    OwnerExpired(String),

    /// 数据与已有资源不匹配（尺寸、格式）
    Mismatch(String),
}

impl fmt::Display for DistGpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistGpuError::Config(e) => write!(f, "Configuration error: {}", e),
            DistGpuError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DistGpuError::Resource(e) => write!(f, "Resource error: {}", e),
            DistGpuError::Io(e) => write!(f, "IO error: {}", e),
            DistGpuError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            GraphicsError::ShaderCompilation(msg) => write!(f, "Shader compilation failed: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::NotCreated(msg) => write!(f, "Resource not created: {}", msg),
            GraphicsError::InvalidRange(msg) => write!(f, "Invalid range: {}", msg),
            GraphicsError::AlreadyLocked(msg) => write!(f, "Already locked: {}", msg),
            GraphicsError::MissingShadowData(msg) => write!(f, "Missing shadow data: {}", msg),
            GraphicsError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::NotFound(name) => write!(f, "Resource not found: {}", name),
            ResourceError::Decode(msg) => write!(f, "Failed to decode resource: {}", msg),
            ResourceError::InvalidParameters(msg) => write!(f, "Invalid parameter file: {}", msg),
            ResourceError::OwnerExpired(msg) => write!(f, "Owner expired: {}", msg),
            ResourceError::Mismatch(msg) => write!(f, "Resource mismatch: {}", msg),
        }
    }
}

impl std::error::Error for DistGpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DistGpuError::Io(e) => Some(e),
            DistGpuError::Config(e) => Some(e),
            DistGpuError::Graphics(e) => Some(e),
            DistGpuError::Resource(e) => Some(e),
            DistGpuError::Initialization(_) => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for ResourceError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for DistGpuError {
    fn from(err: std::io::Error) -> Self {
        DistGpuError::Io(err)
    }
}

impl From<ConfigError> for DistGpuError {
    fn from(err: ConfigError) -> Self {
        DistGpuError::Config(err)
    }
}

impl From<GraphicsError> for DistGpuError {
    fn from(err: GraphicsError) -> Self {
        DistGpuError::Graphics(err)
    }
}

impl From<ResourceError> for DistGpuError {
    fn from(err: ResourceError) -> Self {
        DistGpuError::Resource(err)
    }
}
