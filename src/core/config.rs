//! 配置管理模块
//!
//! 提供设备资源层配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (distgpu.toml)
//!
//! ```toml
//! [graphics]
//! backend = "wgpu"          # 或 "software"
//! headless = false
//! shader_profile = "desktop" # 或 "mobile"
//! max_bones = 128
//! buffer_mapping = true      # 仅软件后端：模拟硬件映射
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};

/// 单个蒙皮允许的最大骨骼数上限
pub const MAX_BONES_LIMIT: u32 = 256;

/// 顶层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// 无头模式：所有资源仅保留 CPU 影子数据，不调用设备
    #[serde(default)]
    pub headless: bool,

    /// 着色器目标平台
    #[serde(default = "default_profile")]
    pub shader_profile: ShaderProfile,

    /// 每个蒙皮的最大骨骼数（注入为 MAXBONES）
    #[serde(default = "default_max_bones")]
    pub max_bones: u32,

    /// 软件后端是否模拟硬件映射
    #[serde(default = "default_buffer_mapping")]
    pub buffer_mapping: bool,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CPU 模拟设备
    Software,
    /// wgpu 后端（支持 Vulkan、Metal、DX12、OpenGL）
    Wgpu,
}

/// 着色器目标平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderProfile {
    /// 桌面 GL / 现代 API
    Desktop,
    /// 移动端 GLES
    Mobile,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_backend() -> BackendKind { BackendKind::Wgpu }
fn default_profile() -> ShaderProfile { ShaderProfile::Desktop }
fn default_max_bones() -> u32 { 128 }
fn default_buffer_mapping() -> bool { true }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "distgpu.log".to_string() }

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            headless: false,
            shader_profile: default_profile(),
            max_bones: default_max_bones(),
            buffer_mapping: default_buffer_mapping(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--software` / `--wgpu`: 选择后端
    /// - `--headless`: 无头模式
    /// - `--mobile`: 使用移动端着色器配置
    /// - `--max-bones <value>`: 设置最大骨骼数
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--software") {
            self.graphics.backend = BackendKind::Software;
        }

        if args.iter().any(|a| a == "--wgpu") {
            self.graphics.backend = BackendKind::Wgpu;
        }

        if args.iter().any(|a| a == "--headless") {
            self.graphics.headless = true;
        }

        if args.iter().any(|a| a == "--mobile") {
            self.graphics.shader_profile = ShaderProfile::Mobile;
        }

        if let Some(idx) = args.iter().position(|a| a == "--max-bones") {
            if let Some(value) = args.get(idx + 1) {
                if let Ok(bones) = value.parse() {
                    self.graphics.max_bones = bones;
                }
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.graphics.max_bones == 0 || self.graphics.max_bones > MAX_BONES_LIMIT {
            return Err(ConfigError::InvalidValue {
                field: "graphics.max_bones".to_string(),
                reason: format!("Max bones must be within 1..={}", MAX_BONES_LIMIT),
            }.into());
        }

        if self.logging.file_output && self.logging.log_file.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.log_file".to_string(),
                reason: "Log file path must not be empty when file output is enabled".to_string(),
            }.into());
        }

        Ok(())
    }
}

impl BackendKind {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Software => "Software",
            BackendKind::Wgpu => "wgpu",
        }
    }
}

impl ShaderProfile {
    /// 源码中没有 `#version` 时使用的默认版本指令
    pub fn default_version_directive(&self) -> &'static str {
        match self {
            ShaderProfile::Desktop => "#version 150",
            ShaderProfile::Mobile => "#version 300 es",
        }
    }

    /// 平台能力宏
    pub fn platform_define(&self) -> &'static str {
        match self {
            ShaderProfile::Desktop => "DESKTOP_GRAPHICS",
            ShaderProfile::Mobile => "MOBILE_GRAPHICS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.graphics.backend, BackendKind::Wgpu);
        assert_eq!(config.graphics.max_bones, 128);
        assert!(!config.graphics.headless);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.graphics.max_bones = 0;
        assert!(config.validate().is_err());

        config.graphics.max_bones = MAX_BONES_LIMIT + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::from_toml_str(
            "[graphics]\nbackend = \"software\"\nshader_profile = \"mobile\"\n",
        )
        .unwrap();

        assert_eq!(config.graphics.backend, BackendKind::Software);
        assert_eq!(config.graphics.shader_profile, ShaderProfile::Mobile);
        // 未填写的字段走默认值
        assert_eq!(config.graphics.max_bones, 128);
        assert_eq!(config.logging.log_file, "distgpu.log");
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["distgpu", "--software", "--headless", "--max-bones", "64"]);

        assert_eq!(config.graphics.backend, BackendKind::Software);
        assert!(config.graphics.headless);
        assert_eq!(config.graphics.max_bones, 64);
    }

    #[test]
    fn test_profile_directives() {
        assert_eq!(ShaderProfile::Desktop.default_version_directive(), "#version 150");
        assert_eq!(ShaderProfile::Mobile.default_version_directive(), "#version 300 es");
        assert_eq!(ShaderProfile::Mobile.platform_define(), "MOBILE_GRAPHICS");
    }
}
