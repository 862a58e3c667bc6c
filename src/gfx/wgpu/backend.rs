//! wgpu 后端设备管理
//!
//! 本模块负责 wgpu 图形设备的初始化和管理，包括：
//! - 创建 wgpu 实例
//! - 选择无窗口的图形适配器
//! - 创建逻辑设备和命令队列
//! - 设备丢失后释放全部对象，恢复时重新请求设备
//!
//! 各类资源的后端实现分别位于 `buffer`、`shader`、`texture` 模块。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info};
use wgpu;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GraphicsBackend;
use crate::gfx::types::GpuHandle;

use super::buffer::WgpuBuffer;
use super::shader::WgpuShader;
use super::texture::WgpuTexture;

/// 逻辑设备与命令队列
pub(super) struct WgpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

/// 后端持有的全部对象，设备丢失时整体丢弃
#[derive(Default)]
pub(super) struct WgpuResources {
    pub buffers: HashMap<GpuHandle, WgpuBuffer>,
    pub shaders: HashMap<GpuHandle, WgpuShader>,
    pub programs: HashMap<GpuHandle, (GpuHandle, GpuHandle)>,
    pub textures: HashMap<GpuHandle, WgpuTexture>,
}

/// wgpu 图形后端
///
/// 不创建窗口表面，只使用设备和队列完成资源的创建、上传与回读。
pub struct WgpuBackend {
    /// wgpu 实例（入口点）
    instance: wgpu::Instance,
    /// 当前设备，丢失时为 None
    device: RefCell<Option<Rc<WgpuDevice>>>,
    /// 选中的适配器名称
    adapter_name: RefCell<String>,
    pub(super) resources: RefCell<WgpuResources>,
    next_handle: Cell<u64>,
}

impl WgpuBackend {
    /// 创建 wgpu 后端实例
    ///
    /// 找不到适配器或设备创建失败时返回 `DeviceCreation` 错误。
    pub fn new() -> Result<Self> {
        info!("Initializing wgpu backend");

        // 1. 创建 wgpu 实例
        debug!("Creating wgpu instance");
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(), // 支持所有后端（Vulkan, Metal, DX12, OpenGL）
            dx12_shader_compiler: Default::default(),
            flags: wgpu::InstanceFlags::default(),
            gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
        });

        let backend = Self {
            instance,
            device: RefCell::new(None),
            adapter_name: RefCell::new(String::new()),
            resources: RefCell::new(WgpuResources::default()),
            next_handle: Cell::new(1),
        };
        backend.request_device()?;

        info!("wgpu backend initialized successfully");
        Ok(backend)
    }

    /// 选中的适配器名称
    pub fn adapter_name(&self) -> String {
        self.adapter_name.borrow().clone()
    }

    fn request_device(&self) -> Result<()> {
        // 2. 请求适配器（选择 GPU）
        debug!("Requesting adapter");
        let adapter = pollster::block_on(self.instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance, // 优先选择高性能 GPU
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| GraphicsError::DeviceCreation("Failed to find suitable adapter".to_string()))?;

        let adapter_info = adapter.get_info();
        info!("Selected adapter: {:?}", adapter_info);

        // 3. 请求设备和队列
        debug!("Requesting device and queue");
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Main Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
            },
            None, // 不跟踪 API 调用
        ))
        .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create device: {}", e)))?;

        *self.adapter_name.borrow_mut() = adapter_info.name;
        *self.device.borrow_mut() = Some(Rc::new(WgpuDevice { device, queue }));
        Ok(())
    }

    /// 获取当前设备，设备丢失时返回 `DeviceUnavailable`
    pub(super) fn device(&self) -> Result<Rc<WgpuDevice>> {
        self.device
            .borrow()
            .clone()
            .ok_or_else(|| GraphicsError::DeviceUnavailable("wgpu device is lost".to_string()).into())
    }

    pub(super) fn allocate_handle(&self) -> GpuHandle {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        GpuHandle::new(raw).unwrap_or_else(|| unreachable!("handle counter starts at 1"))
    }
}

impl GraphicsBackend for WgpuBackend {
    fn backend_name(&self) -> &str {
        "wgpu"
    }

    fn supports_buffer_mapping(&self) -> bool {
        // 队列写入代替映射
        false
    }

    fn on_device_lost(&self) {
        let mut resources = self.resources.borrow_mut();
        info!(
            buffers = resources.buffers.len(),
            textures = resources.textures.len(),
            shaders = resources.shaders.len(),
            "wgpu device lost"
        );
        *resources = WgpuResources::default();
        *self.device.borrow_mut() = None;
    }

    fn on_device_reset(&self) -> Result<()> {
        if self.device.borrow().is_some() {
            return Ok(());
        }
        self.request_device()?;
        info!("wgpu device restored");
        Ok(())
    }
}
