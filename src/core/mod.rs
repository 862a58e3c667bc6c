//! 核心功能模块
//!
//! 与具体图形 API 无关的基础设施：日志、配置与错误处理。
//!
//! - `log`：基于 tracing 的日志系统
//! - `config`：TOML 配置与命令行覆盖
//! - `error`：统一的错误类型

pub mod log;
pub mod config;
pub mod error;

// 重新导出常用类型，方便使用
pub use error::{Result, DistGpuError, ConfigError, GraphicsError, ResourceError};
pub use config::{Config, BackendKind, ShaderProfile};
