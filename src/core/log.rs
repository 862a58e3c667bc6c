//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! 资源层的诊断统一走 `engine_*` 宏（target 为 `distgpu::engine`），
//! 例如非法锁定范围、缺少影子数据、着色器中未使用的宏定义等。
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_gpu::core::log;
//! use dist_gpu::core::config::LogLevel;
//!
//! log::init_logger(LogLevel::Info, false, None);
//! dist_gpu::engine_info!(index_count = 36, "Index buffer created");
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use std::path::Path;

use super::config::LogLevel;

/// 初始化日志系统
///
/// 必须在程序开始时调用一次。
///
/// # 参数
///
/// * `level` - 日志级别
/// * `file_output` - 是否输出到文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "distgpu.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) {
    let filter = match level {
        LogLevel::Trace => EnvFilter::new("trace"),
        LogLevel::Debug => EnvFilter::new("debug"),
        LogLevel::Info => EnvFilter::new("info"),
        LogLevel::Warn => EnvFilter::new("warn"),
        LogLevel::Error => EnvFilter::new("error"),
    };

    if file_output {
        let log_path = log_file_path.unwrap_or("distgpu.log");
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("distgpu.log");

        // 每天滚动
        let file_appender = RollingFileAppender::new(
            Rotation::DAILY,
            directory,
            filename
        );

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(true);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(false)  // 文件不需要 ANSI 颜色
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

/// 资源层日志 - Debug 级别
#[macro_export]
macro_rules! engine_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "distgpu::engine", $($arg)*)
    };
}

/// 资源层日志 - Info 级别
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "distgpu::engine", $($arg)*)
    };
}

/// 资源层日志 - Warn 级别
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "distgpu::engine", $($arg)*)
    };
}

/// 资源层日志 - Error 级别
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "distgpu::engine", $($arg)*)
    };
}

/// 性能追踪 span
///
/// ```no_run
/// let _guard = dist_gpu::span_trace!("compile_shader").entered();
/// ```
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::span!(tracing::Level::TRACE, $name)
    };
}

/// 日志级别转换
impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}
