//! 纹理公共部分
//!
//! `Texture` 保存 2D 纹理和立方体贴图共有的状态：尺寸、格式、用途、
//! 多重采样、mip 级数和采样参数，并负责后端存储的创建、写入和回读。
//! 纹理不保留 CPU 镜像，设备恢复后存储重新创建为空，并标记 `data_lost`。

use std::rc::Rc;

use crate::core::error::{GraphicsError, ResourceError, Result};
use crate::gfx::{
    AddressMode, FilterMode, GpuHandle, SamplerState, TextureDesc, TextureFormat, TextureKind,
    TextureRegion, TextureUsage,
};
use crate::resource::provider::replace_extension;
use crate::resource::{ResourceProvider, TextureParameters};
use crate::{engine_error, engine_warn};

use super::context::GraphicsContext;
use super::gpu_object::{DeviceObjectLifecycle, ObjectId};

/// 多重采样上限
pub const MAX_MULTISAMPLE: u32 = 16;

/// 纹理坐标轴
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureCoordinate {
    U = 0,
    V = 1,
    W = 2,
}

/// 2D 纹理与立方体贴图共有的部分
pub struct Texture {
    context: Rc<GraphicsContext>,
    lifecycle: DeviceObjectLifecycle,
    kind: TextureKind,
    width: u32,
    height: u32,
    format: TextureFormat,
    usage: TextureUsage,
    multisample: u32,
    autoresolve: bool,
    /// 0 表示完整的 mip 链
    requested_levels: u32,
    levels: u32,
    sampler: SamplerState,
    parameters_dirty: bool,
}

impl Texture {
    pub(crate) fn new(context: &Rc<GraphicsContext>, kind: TextureKind) -> Self {
        Self {
            context: context.clone(),
            lifecycle: context.new_lifecycle(),
            kind,
            width: 0,
            height: 0,
            format: TextureFormat::Rgba8,
            usage: TextureUsage::Static,
            multisample: 1,
            autoresolve: false,
            requested_levels: 0,
            levels: 0,
            sampler: SamplerState::default(),
            parameters_dirty: false,
        }
    }

    /// 给定尺寸下的 mip 级数；请求 0 或超过上限时返回完整链
    pub fn check_max_levels(width: u32, height: u32, requested: u32) -> u32 {
        let mut max_levels = 1;
        let (mut w, mut h) = (width, height);
        while w > 1 || h > 1 {
            max_levels += 1;
            w = (w >> 1).max(1);
            h = (h >> 1).max(1);
        }

        if requested == 0 || requested > max_levels {
            max_levels
        } else {
            requested
        }
    }

    pub(crate) fn context(&self) -> &Rc<GraphicsContext> {
        &self.context
    }

    pub(crate) fn lifecycle(&self) -> &DeviceObjectLifecycle {
        &self.lifecycle
    }

    pub(crate) fn lifecycle_mut(&mut self) -> &mut DeviceObjectLifecycle {
        &mut self.lifecycle
    }

    pub fn id(&self) -> ObjectId {
        self.lifecycle.id()
    }

    pub fn handle(&self) -> Option<GpuHandle> {
        self.lifecycle.handle()
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    pub fn multisample(&self) -> u32 {
        self.multisample
    }

    pub fn autoresolve(&self) -> bool {
        self.autoresolve
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn sampler(&self) -> &SamplerState {
        &self.sampler
    }

    pub fn is_data_lost(&self) -> bool {
        self.lifecycle.is_data_lost()
    }

    pub fn clear_data_lost(&mut self) {
        self.lifecycle.clear_data_lost();
    }

    pub fn is_data_pending(&self) -> bool {
        self.lifecycle.is_data_pending()
    }

    pub fn level_width(&self, level: u32) -> u32 {
        if level >= self.levels {
            0
        } else {
            (self.width >> level).max(1)
        }
    }

    pub fn level_height(&self, level: u32) -> u32 {
        if level >= self.levels {
            0
        } else {
            (self.height >> level).max(1)
        }
    }

    /// 某个尺寸的数据大小（字节）
    pub fn data_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.format.bytes_per_pixel()
    }

    pub fn level_data_size(&self, level: u32) -> usize {
        self.data_size(self.level_width(level), self.level_height(level))
    }

    /// 一个面（层）的全部 mip 数据大小
    pub fn layer_memory_use(&self) -> usize {
        (0..self.levels).map(|level| self.level_data_size(level)).sum()
    }

    /// 请求的 mip 级数，下次 `set_size` 生效；深度纹理固定为 1
    pub fn set_num_levels(&mut self, levels: u32) {
        self.requested_levels = if self.usage == TextureUsage::Depth { 1 } else { levels };
    }

    pub fn requested_levels(&self) -> u32 {
        self.requested_levels
    }

    pub fn set_filter_mode(&mut self, filter: FilterMode) {
        self.sampler.filter = filter;
        self.parameters_dirty = true;
    }

    pub fn set_address_mode(&mut self, coordinate: TextureCoordinate, mode: AddressMode) {
        self.sampler.address[coordinate as usize] = mode;
        self.parameters_dirty = true;
    }

    pub fn set_anisotropy(&mut self, anisotropy: u32) {
        self.sampler.anisotropy = anisotropy;
        self.parameters_dirty = true;
    }

    pub fn set_srgb(&mut self, enable: bool) {
        self.sampler.srgb = enable;
        self.parameters_dirty = true;
    }

    pub fn parameters_dirty(&self) -> bool {
        self.parameters_dirty
    }

    /// 把修改过的采样参数推给后端
    pub fn update_parameters(&mut self) -> Result<()> {
        if !self.parameters_dirty {
            return Ok(());
        }
        let Some(handle) = self.lifecycle.handle() else {
            return Ok(());
        };
        if self.context.is_device_lost() {
            return Ok(());
        }

        self.context.backend().update_sampler(handle, &self.sampler)?;
        self.parameters_dirty = false;
        Ok(())
    }

    /// 应用参数文件中出现的采样设置
    pub fn apply_parameters(&mut self, parameters: &TextureParameters) {
        if let Some(filter) = parameters.filter {
            self.set_filter_mode(filter);
        }
        if let Some(anisotropy) = parameters.anisotropy {
            self.set_anisotropy(anisotropy);
        }
        if let Some(srgb) = parameters.srgb {
            self.set_srgb(srgb);
        }
        let address = &parameters.address;
        for (coordinate, mode) in [
            (TextureCoordinate::U, address.u),
            (TextureCoordinate::V, address.v),
            (TextureCoordinate::W, address.w),
        ] {
            if let Some(mode) = mode {
                self.set_address_mode(coordinate, mode);
            }
        }
        if let Some(mipmap) = parameters.mipmap {
            self.set_num_levels(if mipmap { 0 } else { 1 });
        }
    }

    /// 校验并记录尺寸、格式、用途和多重采样设置
    pub(crate) fn configure(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
        multisample: u32,
        autoresolve: bool,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            engine_error!(width, height, "Zero texture dimensions");
            return Err(ResourceError::InvalidParameters(format!("texture size {}x{}", width, height)).into());
        }

        let multisample = multisample.clamp(1, MAX_MULTISAMPLE);
        if multisample > 1 && usage < TextureUsage::RenderTarget {
            engine_error!("Multisampling is only supported for rendertarget or depth-stencil textures");
            return Err(ResourceError::InvalidParameters(format!(
                "multisample {} with {:?} usage",
                multisample, usage
            ))
            .into());
        }
        let autoresolve = autoresolve && multisample > 1;

        if usage.has_render_surface() {
            self.requested_levels = 1;
            // 新建的渲染目标使用 Clamp 寻址和最近点过滤，重建时保留原有采样
            if !self.usage.has_render_surface() || self.width == 0 {
                self.sampler.address = [AddressMode::Clamp; 3];
                self.sampler.filter = FilterMode::Nearest;
            }
        }

        self.width = width;
        self.height = height;
        self.format = format;
        self.usage = usage;
        self.multisample = multisample;
        self.autoresolve = autoresolve;

        let single_level = usage == TextureUsage::Depth || (multisample > 1 && !autoresolve);
        self.levels = if single_level {
            1
        } else {
            Self::check_max_levels(width, height, self.requested_levels)
        };
        Ok(())
    }

    /// (重新)创建后端存储
    pub(crate) fn create_storage(&mut self) -> Result<()> {
        self.destroy_storage();

        if self.width == 0 || self.height == 0 || self.context.is_headless() {
            return Ok(());
        }
        if self.context.is_device_lost() {
            engine_warn!("Texture creation while device is lost");
            return Ok(());
        }

        let desc = TextureDesc {
            kind: self.kind,
            width: self.width,
            height: self.height,
            format: self.format,
            levels: self.levels,
            usage: self.usage,
            multisample: self.multisample,
            sampler: self.sampler,
            label: None,
        };
        match self.context.backend().create_texture(&desc) {
            Ok(handle) => {
                self.lifecycle.attach(handle);
                self.parameters_dirty = false;
                Ok(())
            }
            Err(e) => {
                engine_error!(width = self.width, height = self.height, "Failed to create texture: {}", e);
                Err(e)
            }
        }
    }

    /// 释放后端存储
    pub(crate) fn destroy_storage(&mut self) {
        if let Some(handle) = self.lifecycle.detach() {
            if !self.context.is_device_lost() && !self.context.is_headless() {
                self.context.backend().destroy_texture(handle);
            }
        }
    }

    /// 写入某一层、某一级的矩形区域
    pub(crate) fn write(&mut self, layer: u32, region: TextureRegion, data: &[u8]) -> Result<()> {
        if self.context.is_headless() {
            return Ok(());
        }
        if self.context.is_device_lost() && self.width > 0 {
            engine_warn!("Texture data assignment while device is lost");
            self.lifecycle.set_data_pending(true);
            return Ok(());
        }

        let Some(handle) = self.lifecycle.handle() else {
            engine_error!("No texture created, can not set data");
            return Err(GraphicsError::NotCreated("texture".to_string()).into());
        };
        if region.level >= self.levels {
            engine_error!(level = region.level, levels = self.levels, "Illegal mip level for setting data");
            return Err(GraphicsError::InvalidRange(format!("mip level {}", region.level)).into());
        }

        let level_width = self.level_width(region.level);
        let level_height = self.level_height(region.level);
        if region.width == 0
            || region.height == 0
            || region.x.checked_add(region.width).map_or(true, |right| right > level_width)
            || region.y.checked_add(region.height).map_or(true, |bottom| bottom > level_height)
        {
            engine_error!("Illegal dimensions for setting data");
            return Err(GraphicsError::InvalidRange(format!(
                "region {}x{}+{}+{} outside level {}x{}",
                region.width, region.height, region.x, region.y, level_width, level_height
            ))
            .into());
        }

        let required = self.data_size(region.width, region.height);
        if data.len() < required {
            engine_error!(required, provided = data.len(), "Texture data too short");
            return Err(GraphicsError::InvalidRange(format!(
                "texture data holds {} bytes, region needs {}",
                data.len(),
                required
            ))
            .into());
        }

        let region = TextureRegion { layer, ..region };
        self.context
            .backend()
            .write_texture(handle, &region, &data[..required])
    }

    /// 读回某一层、某一级
    pub(crate) fn read(&self, layer: u32, level: u32, dest: &mut [u8]) -> Result<()> {
        if self.lifecycle.is_stale() {
            engine_warn!("Getting texture data before it caught up with a device reset");
            return Err(GraphicsError::DeviceUnavailable("texture readback".to_string()).into());
        }
        let Some(handle) = self.lifecycle.handle() else {
            engine_error!("No texture created, can not get data");
            return Err(GraphicsError::NotCreated("texture".to_string()).into());
        };
        if level >= self.levels {
            engine_error!(level, levels = self.levels, "Illegal mip level for getting data");
            return Err(GraphicsError::InvalidRange(format!("mip level {}", level)).into());
        }
        if self.context.is_device_lost() {
            engine_warn!("Getting texture data while device is lost");
            return Err(GraphicsError::DeviceUnavailable("texture readback".to_string()).into());
        }
        if self.multisample > 1 && !self.autoresolve {
            engine_error!("Can not get data from multisampled texture without autoresolve");
            return Err(GraphicsError::UnsupportedFormat("multisampled texture".to_string()).into());
        }

        let required = self.level_data_size(level);
        if dest.len() < required {
            engine_error!(required, provided = dest.len(), "Texture data destination too short");
            return Err(GraphicsError::InvalidRange(format!(
                "destination holds {} bytes, level needs {}",
                dest.len(),
                required
            ))
            .into());
        }

        self.context
            .backend()
            .read_texture(handle, layer, level, &mut dest[..required])
    }

    /// 设备丢失
    pub(crate) fn on_device_lost(&mut self) {
        self.lifecycle.mark_lost();
    }

    /// 设备恢复后重建存储；内容无法还原
    pub(crate) fn recreate_after_reset(&mut self) {
        if self.lifecycle.handle().is_some() || self.width == 0 {
            return;
        }
        if self.create_storage().is_ok() && self.lifecycle.handle().is_some() {
            self.lifecycle.set_data_lost(true);
        }
    }
}

/// 读取与资源同名的 `.toml` 参数文件，不存在时返回 None
pub(crate) fn read_parameters(provider: &dyn ResourceProvider, name: &str) -> Result<Option<TextureParameters>> {
    let path = replace_extension(name, "toml");
    if path == name || !provider.exists(&path) {
        return Ok(None);
    }
    let bytes = provider.read(&path)?;
    let text = String::from_utf8_lossy(&bytes);
    TextureParameters::from_toml_str(&text).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{GraphicsCapabilities, SoftwareBackend};

    fn texture() -> Texture {
        let ctx = GraphicsContext::new(Rc::new(SoftwareBackend::default()), GraphicsCapabilities::software());
        Texture::new(&ctx, TextureKind::Texture2D)
    }

    #[test]
    fn test_check_max_levels() {
        assert_eq!(Texture::check_max_levels(256, 64, 0), 9);
        assert_eq!(Texture::check_max_levels(256, 64, 3), 3);
        assert_eq!(Texture::check_max_levels(1, 1, 0), 1);
        assert_eq!(Texture::check_max_levels(5, 3, 10), 3);
    }

    #[test]
    fn test_configure_validation() {
        let mut tex = texture();
        assert!(tex.configure(0, 4, TextureFormat::Rgba8, TextureUsage::Static, 1, false).is_err());
        assert!(tex.configure(4, 4, TextureFormat::Rgba8, TextureUsage::Static, 4, false).is_err());

        tex.configure(8, 8, TextureFormat::Rgba8, TextureUsage::RenderTarget, 64, true).unwrap();
        assert_eq!(tex.multisample(), MAX_MULTISAMPLE);
        assert!(tex.autoresolve());
        assert_eq!(tex.sampler().filter, FilterMode::Nearest);
        assert_eq!(tex.levels(), 1);

        tex.configure(8, 8, TextureFormat::Rgba8, TextureUsage::RenderTarget, 1, true).unwrap();
        assert!(!tex.autoresolve());
    }

    #[test]
    fn test_level_sizes() {
        let mut tex = texture();
        tex.configure(16, 4, TextureFormat::Rgb8, TextureUsage::Static, 1, false).unwrap();
        assert_eq!(tex.levels(), 5);
        assert_eq!((tex.level_width(2), tex.level_height(2)), (4, 1));
        assert_eq!(tex.level_width(5), 0);
        assert_eq!(tex.level_data_size(0), 16 * 4 * 3);
        assert_eq!(tex.layer_memory_use(), (64 + 16 + 4 + 2 + 1) * 3);
    }

    #[test]
    fn test_depth_forces_single_level() {
        let mut tex = texture();
        tex.configure(32, 32, TextureFormat::Depth32Float, TextureUsage::Depth, 1, false).unwrap();
        assert_eq!(tex.levels(), 1);
        tex.set_num_levels(4);
        assert_eq!(tex.requested_levels(), 1);
    }

    #[test]
    fn test_apply_parameters_marks_dirty() {
        let mut tex = texture();
        let params = TextureParameters::from_toml_str("filter = \"bilinear\"\nmipmap = false\n[address]\nv = \"mirror\"").unwrap();
        tex.apply_parameters(&params);

        assert!(tex.parameters_dirty());
        assert_eq!(tex.sampler().filter, FilterMode::Bilinear);
        assert_eq!(tex.sampler().address, [AddressMode::Wrap, AddressMode::Mirror, AddressMode::Wrap]);
        assert_eq!(tex.requested_levels(), 1);
    }

    #[test]
    fn test_read_parameters_next_to_resource() {
        let provider = crate::resource::MemoryProvider::new()
            .with_file("Textures/Wall.toml", "srgb = true")
            .with_file("Textures/Bad.toml", "srgb = 3");

        let params = read_parameters(&provider, "Textures/Wall.png").unwrap().unwrap();
        assert_eq!(params.srgb, Some(true));
        assert!(read_parameters(&provider, "Textures/Floor.png").unwrap().is_none());
        assert!(read_parameters(&provider, "Textures/Bad.png").is_err());
    }

    #[test]
    fn test_write_rejects_regions_past_the_level_edge() {
        let mut tex = texture();
        tex.configure(4, 4, TextureFormat::Rgba8, TextureUsage::Static, 1, false).unwrap();
        tex.create_storage().unwrap();

        let data = vec![0u8; 64];
        let region = |x, y, width, height| TextureRegion {
            layer: 0,
            level: 0,
            x,
            y,
            width,
            height,
        };
        assert!(tex.write(0, region(u32::MAX, 0, 1, 1), &data).is_err());
        assert!(tex.write(0, region(0, u32::MAX, 1, 1), &data).is_err());
        assert!(tex.write(0, region(1, 1, u32::MAX, 1), &data).is_err());
        assert!(tex.write(0, region(3, 3, 2, 1), &data).is_err());
        tex.write(0, region(2, 2, 2, 2), &data).unwrap();
    }
}
