//! 图形后端的统一抽象接口
//!
//! 每种设备资源对应一个后端 trait：
//! - `IndexBufferBackend`：索引缓冲区的创建、写入、映射
//! - `ShaderBackend`：着色器编译与程序链接
//! - `TextureBackend`：纹理存储、上传与回读
//!
//! `GraphicsBackend` 将三者组合在一起，并负责设备丢失/恢复。
//! 启动时根据配置构造唯一的实现，注入到 `GraphicsContext` 中，
//! 资源调用时不再按 API 类型分支。
//!
//! 所有方法都接收 `&self`，实现内部自行管理可变状态；
//! 调用只发生在持有设备的线程上。

use crate::core::config::ShaderProfile;
use crate::core::error::Result;

use super::types::{GpuHandle, SamplerState, ShaderStage, TextureDesc, TextureRegion};

/// 索引缓冲区后端
pub trait IndexBufferBackend {
    /// 创建 `size` 字节的索引缓冲区，内容未定义
    fn create_index_buffer(&self, size: usize, dynamic: bool) -> Result<GpuHandle>;

    /// 写入 `[offset, offset + data.len())`
    ///
    /// `discard` 为真时，后端可以丢弃写入范围以外的旧内容。
    fn write_index_buffer(
        &self,
        handle: GpuHandle,
        offset: usize,
        data: &[u8],
        discard: bool,
    ) -> Result<()>;

    /// 映射一段缓冲区内存供 CPU 写入
    ///
    /// 不支持硬件映射时返回 `None`，调用方退回影子数据或临时缓冲区。
    fn map_index_buffer(
        &self,
        _handle: GpuHandle,
        _offset: usize,
        _size: usize,
        _discard: bool,
    ) -> Option<Vec<u8>> {
        None
    }

    /// 提交映射的内容并解除映射
    fn unmap_index_buffer(&self, handle: GpuHandle, offset: usize, data: &[u8]) -> Result<()> {
        self.write_index_buffer(handle, offset, data, false)
    }

    /// 销毁缓冲区
    fn destroy_index_buffer(&self, handle: GpuHandle);
}

/// 着色器后端
pub trait ShaderBackend {
    /// 编译一个阶段的完整源码
    ///
    /// 失败时返回编译器的诊断日志。
    fn compile_shader(&self, stage: ShaderStage, source: &str) -> std::result::Result<GpuHandle, String>;

    /// 销毁着色器
    fn destroy_shader(&self, handle: GpuHandle);

    /// 链接顶点与片段着色器
    fn link_program(
        &self,
        vertex: GpuHandle,
        fragment: GpuHandle,
    ) -> std::result::Result<GpuHandle, String>;

    /// 销毁程序
    fn destroy_program(&self, handle: GpuHandle);

    /// 源码没有 `#version` 时插入的版本指令
    fn default_version_directive(&self, profile: ShaderProfile) -> &'static str {
        profile.default_version_directive()
    }

    /// 后端特有的功能宏，追加在用户宏之后
    fn feature_defines(&self) -> &'static [&'static str] {
        &[]
    }
}

/// 纹理后端
pub trait TextureBackend {
    /// 按描述创建纹理存储
    fn create_texture(&self, desc: &TextureDesc) -> Result<GpuHandle>;

    /// 写入某一层、某一级 mip 的矩形区域，数据紧密排列
    fn write_texture(&self, handle: GpuHandle, region: &TextureRegion, data: &[u8]) -> Result<()>;

    /// 读回整级 mip，`dest` 至少为该级的大小
    fn read_texture(&self, handle: GpuHandle, layer: u32, level: u32, dest: &mut [u8]) -> Result<()>;

    /// 更新采样参数
    fn update_sampler(&self, handle: GpuHandle, sampler: &SamplerState) -> Result<()>;

    /// 销毁纹理
    fn destroy_texture(&self, handle: GpuHandle);
}

/// 图形后端的统一接口
///
/// # 设计理念
///
/// - **抽象化**：隐藏不同图形 API 的实现细节
/// - **注入**：启动时选定一个实现，资源通过上下文调用它
/// - **可扩展性**：新增后端只需实现这些 trait
pub trait GraphicsBackend: IndexBufferBackend + ShaderBackend + TextureBackend {
    /// 获取后端的名称，用于日志输出和调试
    fn backend_name(&self) -> &str;

    /// 是否支持缓冲区硬件映射
    fn supports_buffer_mapping(&self) -> bool;

    /// 设备已经丢失，丢弃所有后端对象（不调用 API）
    fn on_device_lost(&self);

    /// 重新获取设备
    fn on_device_reset(&self) -> Result<()>;
}
