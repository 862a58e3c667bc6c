//! 软件（CPU 模拟）图形后端
//!
//! 在内存中保存缓冲区、纹理、着色器和程序，行为尽量贴近真实驱动：
//! - 句柄单调递增，设备丢失后旧句柄全部失效
//! - 设备不在时所有调用返回 `DeviceUnavailable`
//! - 可选模拟硬件映射
//! - 着色器经过 `glsl::check_source` 检查，失败返回驱动风格的日志
//!
//! 同时提供检查接口（缓冲区内容、纹理内容、对象数量）和创建失败注入，
//! 便于在没有 GPU 的环境中验证资源层。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tracing::{debug, info};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{GraphicsBackend, IndexBufferBackend, ShaderBackend, TextureBackend};
use crate::gfx::types::{
    GpuHandle, SamplerState, ShaderStage, TextureDesc, TextureFormat, TextureRegion,
};

use super::glsl;

/// 软件后端选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareBackendOptions {
    /// 是否模拟动态缓冲区的硬件映射
    pub buffer_mapping: bool,
}

impl Default for SoftwareBackendOptions {
    fn default() -> Self {
        Self { buffer_mapping: true }
    }
}

struct SoftBuffer {
    data: Vec<u8>,
    mapped: bool,
}

struct SoftTexture {
    format: TextureFormat,
    width: u32,
    height: u32,
    sampler: SamplerState,
    /// layers[layer][level]
    layers: Vec<Vec<Vec<u8>>>,
}

impl SoftTexture {
    fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

#[derive(Default)]
struct DeviceState {
    buffers: HashMap<GpuHandle, SoftBuffer>,
    shaders: HashMap<GpuHandle, ShaderStage>,
    programs: HashMap<GpuHandle, (GpuHandle, GpuHandle)>,
    textures: HashMap<GpuHandle, SoftTexture>,
}

impl DeviceState {
    fn object_count(&self) -> usize {
        self.buffers.len() + self.shaders.len() + self.programs.len() + self.textures.len()
    }
}

/// 软件图形后端
pub struct SoftwareBackend {
    options: SoftwareBackendOptions,
    state: RefCell<DeviceState>,
    next_handle: Cell<u64>,
    present: Cell<bool>,
    fail_creation: Cell<bool>,
}

impl SoftwareBackend {
    /// 创建软件后端
    pub fn new(options: SoftwareBackendOptions) -> Self {
        info!(buffer_mapping = options.buffer_mapping, "Software backend initialized");
        Self {
            options,
            state: RefCell::new(DeviceState::default()),
            next_handle: Cell::new(1),
            present: Cell::new(true),
            fail_creation: Cell::new(false),
        }
    }

    /// 让后续的资源创建全部失败（测试后端失败路径）
    pub fn set_creation_failure(&self, fail: bool) {
        self.fail_creation.set(fail);
    }

    /// 设备当前是否存在
    pub fn is_device_present(&self) -> bool {
        self.present.get()
    }

    /// 存活的后端对象数量
    pub fn object_count(&self) -> usize {
        self.state.borrow().object_count()
    }

    /// 读取索引缓冲区在"GPU"上的内容
    pub fn index_buffer_contents(&self, handle: GpuHandle) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&handle).map(|b| b.data.clone())
    }

    /// 读取纹理某层某级的内容
    pub fn texture_contents(&self, handle: GpuHandle, layer: u32, level: u32) -> Option<Vec<u8>> {
        let state = self.state.borrow();
        let texture = state.textures.get(&handle)?;
        texture.layers.get(layer as usize)?.get(level as usize).cloned()
    }

    /// 读取纹理当前的采样状态
    pub fn sampler_state(&self, handle: GpuHandle) -> Option<SamplerState> {
        self.state.borrow().textures.get(&handle).map(|t| t.sampler)
    }

    /// 着色器句柄是否存在
    pub fn has_shader(&self, handle: GpuHandle) -> bool {
        self.state.borrow().shaders.contains_key(&handle)
    }

    /// 程序句柄是否存在
    pub fn has_program(&self, handle: GpuHandle) -> bool {
        self.state.borrow().programs.contains_key(&handle)
    }

    fn allocate_handle(&self) -> GpuHandle {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        // raw 从 1 开始单调递增
        GpuHandle::new(raw).unwrap_or_else(|| unreachable!("handle counter starts at 1"))
    }

    fn ensure_present(&self, what: &str) -> Result<()> {
        if self.present.get() {
            Ok(())
        } else {
            Err(GraphicsError::DeviceUnavailable(format!("{} while device is lost", what)).into())
        }
    }

    fn ensure_can_create(&self, what: &str) -> Result<()> {
        self.ensure_present(what)?;
        if self.fail_creation.get() {
            return Err(GraphicsError::ResourceCreation(format!("{}: out of device memory", what)).into());
        }
        Ok(())
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new(SoftwareBackendOptions::default())
    }
}

impl IndexBufferBackend for SoftwareBackend {
    fn create_index_buffer(&self, size: usize, _dynamic: bool) -> Result<GpuHandle> {
        self.ensure_can_create("Index buffer creation")?;

        let handle = self.allocate_handle();
        self.state.borrow_mut().buffers.insert(
            handle,
            SoftBuffer {
                data: vec![0; size],
                mapped: false,
            },
        );
        debug!(%handle, size, "Software index buffer created");
        Ok(handle)
    }

    fn write_index_buffer(
        &self,
        handle: GpuHandle,
        offset: usize,
        data: &[u8],
        discard: bool,
    ) -> Result<()> {
        self.ensure_present("Index buffer write")?;

        let mut state = self.state.borrow_mut();
        let buffer = state
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| GraphicsError::NotCreated(format!("index buffer {}", handle)))?;

        let end = offset + data.len();
        if end > buffer.data.len() {
            return Err(GraphicsError::InvalidRange(format!(
                "write {}..{} exceeds buffer size {}",
                offset,
                end,
                buffer.data.len()
            ))
            .into());
        }

        if discard {
            // 丢弃范围外的旧内容
            buffer.data[..offset].fill(0);
            buffer.data[end..].fill(0);
        }
        buffer.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn map_index_buffer(
        &self,
        handle: GpuHandle,
        offset: usize,
        size: usize,
        discard: bool,
    ) -> Option<Vec<u8>> {
        if !self.options.buffer_mapping || !self.present.get() {
            return None;
        }

        let mut state = self.state.borrow_mut();
        let buffer = state.buffers.get_mut(&handle)?;
        if buffer.mapped || offset + size > buffer.data.len() {
            return None;
        }

        buffer.mapped = true;
        if discard {
            Some(vec![0; size])
        } else {
            Some(buffer.data[offset..offset + size].to_vec())
        }
    }

    fn unmap_index_buffer(&self, handle: GpuHandle, offset: usize, data: &[u8]) -> Result<()> {
        if let Some(buffer) = self.state.borrow_mut().buffers.get_mut(&handle) {
            buffer.mapped = false;
        }
        self.write_index_buffer(handle, offset, data, false)
    }

    fn destroy_index_buffer(&self, handle: GpuHandle) {
        self.state.borrow_mut().buffers.remove(&handle);
    }
}

impl ShaderBackend for SoftwareBackend {
    fn compile_shader(&self, stage: ShaderStage, source: &str) -> std::result::Result<GpuHandle, String> {
        if !self.present.get() {
            return Err("Could not create shader object: device is lost".to_string());
        }
        if self.fail_creation.get() {
            return Err("Could not create shader object".to_string());
        }

        glsl::check_source(source)?;

        let handle = self.allocate_handle();
        self.state.borrow_mut().shaders.insert(handle, stage);
        Ok(handle)
    }

    fn destroy_shader(&self, handle: GpuHandle) {
        self.state.borrow_mut().shaders.remove(&handle);
    }

    fn link_program(
        &self,
        vertex: GpuHandle,
        fragment: GpuHandle,
    ) -> std::result::Result<GpuHandle, String> {
        if !self.present.get() {
            return Err("Could not create shader program: device is lost".to_string());
        }

        {
            let state = self.state.borrow();
            match state.shaders.get(&vertex) {
                Some(ShaderStage::Vertex) => {}
                _ => return Err(format!("ERROR: link: {} is not a vertex shader", vertex)),
            }
            match state.shaders.get(&fragment) {
                Some(ShaderStage::Fragment) => {}
                _ => return Err(format!("ERROR: link: {} is not a fragment shader", fragment)),
            }
        }

        let handle = self.allocate_handle();
        self.state.borrow_mut().programs.insert(handle, (vertex, fragment));
        Ok(handle)
    }

    fn destroy_program(&self, handle: GpuHandle) {
        self.state.borrow_mut().programs.remove(&handle);
    }

    fn feature_defines(&self) -> &'static [&'static str] {
        &["GL3"]
    }
}

impl TextureBackend for SoftwareBackend {
    fn create_texture(&self, desc: &TextureDesc) -> Result<GpuHandle> {
        self.ensure_can_create("Texture creation")?;

        if desc.width == 0 || desc.height == 0 || desc.levels == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "invalid texture extent {}x{} with {} levels",
                desc.width, desc.height, desc.levels
            ))
            .into());
        }

        let bpp = desc.format.bytes_per_pixel();
        let levels: Vec<Vec<u8>> = (0..desc.levels)
            .map(|level| {
                let w = (desc.width >> level).max(1) as usize;
                let h = (desc.height >> level).max(1) as usize;
                vec![0; w * h * bpp]
            })
            .collect();

        let handle = self.allocate_handle();
        self.state.borrow_mut().textures.insert(
            handle,
            SoftTexture {
                format: desc.format,
                width: desc.width,
                height: desc.height,
                sampler: desc.sampler,
                layers: vec![levels; desc.kind.layers() as usize],
            },
        );
        debug!(%handle, width = desc.width, height = desc.height, "Software texture created");
        Ok(handle)
    }

    fn write_texture(&self, handle: GpuHandle, region: &TextureRegion, data: &[u8]) -> Result<()> {
        self.ensure_present("Texture write")?;

        let mut state = self.state.borrow_mut();
        let texture = state
            .textures
            .get_mut(&handle)
            .ok_or_else(|| GraphicsError::NotCreated(format!("texture {}", handle)))?;

        let (level_width, level_height) = texture.level_size(region.level);
        if region.x + region.width > level_width || region.y + region.height > level_height {
            return Err(GraphicsError::InvalidRange(format!(
                "region {}x{}+{}+{} outside level {}x{}",
                region.width, region.height, region.x, region.y, level_width, level_height
            ))
            .into());
        }

        let bpp = texture.format.bytes_per_pixel();
        let row_size = region.width as usize * bpp;
        if data.len() < row_size * region.height as usize {
            return Err(GraphicsError::InvalidRange("texture data shorter than region".to_string()).into());
        }

        let level = texture
            .layers
            .get_mut(region.layer as usize)
            .and_then(|layer| layer.get_mut(region.level as usize))
            .ok_or_else(|| GraphicsError::InvalidRange(format!("layer {} level {}", region.layer, region.level)))?;

        let stride = level_width as usize * bpp;
        for row in 0..region.height as usize {
            let dst = (region.y as usize + row) * stride + region.x as usize * bpp;
            let src = row * row_size;
            level[dst..dst + row_size].copy_from_slice(&data[src..src + row_size]);
        }
        Ok(())
    }

    fn read_texture(&self, handle: GpuHandle, layer: u32, level: u32, dest: &mut [u8]) -> Result<()> {
        self.ensure_present("Texture read")?;

        let state = self.state.borrow();
        let data = state
            .textures
            .get(&handle)
            .and_then(|t| t.layers.get(layer as usize))
            .and_then(|l| l.get(level as usize))
            .ok_or_else(|| GraphicsError::NotCreated(format!("texture {} layer {} level {}", handle, layer, level)))?;

        if dest.len() < data.len() {
            return Err(GraphicsError::InvalidRange(format!(
                "destination holds {} bytes, level needs {}",
                dest.len(),
                data.len()
            ))
            .into());
        }
        dest[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn update_sampler(&self, handle: GpuHandle, sampler: &SamplerState) -> Result<()> {
        self.ensure_present("Sampler update")?;

        let mut state = self.state.borrow_mut();
        let texture = state
            .textures
            .get_mut(&handle)
            .ok_or_else(|| GraphicsError::NotCreated(format!("texture {}", handle)))?;
        texture.sampler = *sampler;
        Ok(())
    }

    fn destroy_texture(&self, handle: GpuHandle) {
        self.state.borrow_mut().textures.remove(&handle);
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn backend_name(&self) -> &str {
        "Software"
    }

    fn supports_buffer_mapping(&self) -> bool {
        self.options.buffer_mapping
    }

    fn on_device_lost(&self) {
        let mut state = self.state.borrow_mut();
        info!(objects = state.object_count(), "Software device lost");
        *state = DeviceState::default();
        self.present.set(false);
    }

    fn on_device_reset(&self) -> Result<()> {
        self.present.set(true);
        info!("Software device restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::types::{TextureKind, TextureUsage};

    fn desc(kind: TextureKind, width: u32, height: u32, levels: u32) -> TextureDesc {
        TextureDesc {
            kind,
            width,
            height,
            format: TextureFormat::Rgba8,
            levels,
            usage: TextureUsage::Static,
            multisample: 1,
            sampler: SamplerState::default(),
            label: None,
        }
    }

    #[test]
    fn test_buffer_write_and_discard() {
        let backend = SoftwareBackend::default();
        let handle = backend.create_index_buffer(8, false).unwrap();

        backend.write_index_buffer(handle, 0, &[1; 8], false).unwrap();
        backend.write_index_buffer(handle, 2, &[7, 7], true).unwrap();

        assert_eq!(backend.index_buffer_contents(handle).unwrap(), vec![0, 0, 7, 7, 0, 0, 0, 0]);
        assert!(backend.write_index_buffer(handle, 6, &[1, 2, 3], false).is_err());
    }

    #[test]
    fn test_mapping_roundtrip() {
        let backend = SoftwareBackend::default();
        let handle = backend.create_index_buffer(4, true).unwrap();
        backend.write_index_buffer(handle, 0, &[1, 2, 3, 4], false).unwrap();

        let mut mapped = backend.map_index_buffer(handle, 1, 2, false).unwrap();
        assert_eq!(mapped, vec![2, 3]);
        // 已映射的缓冲区不能再次映射
        assert!(backend.map_index_buffer(handle, 0, 1, false).is_none());

        mapped[0] = 9;
        backend.unmap_index_buffer(handle, 1, &mapped).unwrap();
        assert_eq!(backend.index_buffer_contents(handle).unwrap(), vec![1, 9, 3, 4]);
    }

    #[test]
    fn test_mapping_disabled() {
        let backend = SoftwareBackend::new(SoftwareBackendOptions { buffer_mapping: false });
        let handle = backend.create_index_buffer(4, true).unwrap();
        assert!(!backend.supports_buffer_mapping());
        assert!(backend.map_index_buffer(handle, 0, 4, false).is_none());
    }

    #[test]
    fn test_device_loss_invalidates_handles() {
        let backend = SoftwareBackend::default();
        let buffer = backend.create_index_buffer(4, false).unwrap();
        assert_eq!(backend.object_count(), 1);

        backend.on_device_lost();
        assert!(!backend.is_device_present());
        assert_eq!(backend.object_count(), 0);
        assert!(backend.create_index_buffer(4, false).is_err());

        backend.on_device_reset().unwrap();
        let fresh = backend.create_index_buffer(4, false).unwrap();
        assert_ne!(buffer, fresh);
        assert!(backend.write_index_buffer(buffer, 0, &[1], false).is_err());
    }

    #[test]
    fn test_creation_failure_injection() {
        let backend = SoftwareBackend::default();
        backend.set_creation_failure(true);
        assert!(backend.create_index_buffer(4, false).is_err());
        assert!(backend.create_texture(&desc(TextureKind::Texture2D, 4, 4, 1)).is_err());
        assert!(backend.compile_shader(ShaderStage::Vertex, "#version 150\nvoid main() {}").is_err());
    }

    #[test]
    fn test_texture_region_write_and_read() {
        let backend = SoftwareBackend::default();
        let handle = backend.create_texture(&desc(TextureKind::Texture2D, 4, 2, 2)).unwrap();

        let region = TextureRegion { layer: 0, level: 0, x: 1, y: 1, width: 2, height: 1 };
        backend.write_texture(handle, &region, &[0xAA; 8]).unwrap();

        let mut level0 = vec![0; 4 * 2 * 4];
        backend.read_texture(handle, 0, 0, &mut level0).unwrap();
        assert_eq!(&level0[16..20], &[0; 4]);
        assert_eq!(&level0[20..28], &[0xAA; 8]);

        // 第 1 级为 2x1
        let mut small = vec![0; 4];
        assert!(backend.read_texture(handle, 0, 1, &mut small).is_err());
        let mut level1 = vec![0; 8];
        backend.read_texture(handle, 0, 1, &mut level1).unwrap();
    }

    #[test]
    fn test_cube_layers_are_independent() {
        let backend = SoftwareBackend::default();
        let handle = backend.create_texture(&desc(TextureKind::TextureCube, 2, 2, 1)).unwrap();

        let region = TextureRegion { layer: 3, level: 0, x: 0, y: 0, width: 2, height: 2 };
        backend.write_texture(handle, &region, &[5; 16]).unwrap();

        assert_eq!(backend.texture_contents(handle, 3, 0).unwrap(), vec![5; 16]);
        assert_eq!(backend.texture_contents(handle, 2, 0).unwrap(), vec![0; 16]);
    }

    #[test]
    fn test_link_checks_stages() {
        let backend = SoftwareBackend::default();
        let src = "#version 150\nvoid main() {}\n";
        let vs = backend.compile_shader(ShaderStage::Vertex, src).unwrap();
        let ps = backend.compile_shader(ShaderStage::Fragment, src).unwrap();

        assert!(backend.link_program(ps, vs).is_err());
        let program = backend.link_program(vs, ps).unwrap();
        assert!(backend.has_program(program));
    }
}
