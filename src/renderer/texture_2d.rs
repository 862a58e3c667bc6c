//! 2D 纹理
//!
//! 加载分为两步：`Texture2DLoad::decode` 只读取资源并解码，可以在任意线程执行；
//! `end_load` 在设备线程上应用参数、设置尺寸并上传所有 mip 级。
//! 设备丢失期间的加载会保留下来，在设备恢复时完成。

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::{GpuHandle, TextureFormat, TextureKind, TextureRegion, TextureUsage};
use crate::resource::{Image, ResourceProvider, TextureParameters};
use crate::{engine_debug, engine_error, engine_warn};

use super::context::GraphicsContext;
use super::gpu_object::{DeviceObject, DeviceObjectLifecycle, ObjectId};
use super::render_surface::RenderSurface;
use super::texture::{read_parameters, Texture};

/// 解码完成、等待上传的 2D 纹理
#[derive(Debug, Clone)]
pub struct Texture2DLoad {
    name: String,
    image: Image,
    parameters: Option<TextureParameters>,
}

impl Texture2DLoad {
    /// 读取并解码图像和同名参数文件，不访问设备
    pub fn decode(provider: &dyn ResourceProvider, name: &str) -> Result<Self> {
        let bytes = provider.read(name)?;
        let image = Image::decode(&bytes)?;
        let parameters = read_parameters(provider, name)?;
        Ok(Self {
            name: name.to_string(),
            image,
            parameters,
        })
    }

    pub fn from_image(name: impl Into<String>, image: Image, parameters: Option<TextureParameters>) -> Self {
        Self {
            name: name.into(),
            image,
            parameters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn parameters(&self) -> Option<&TextureParameters> {
        self.parameters.as_ref()
    }
}

/// 2D 纹理
pub struct Texture2D {
    texture: Texture,
    surface: Option<RenderSurface>,
    load: Option<Texture2DLoad>,
}

impl Texture2D {
    /// 创建空纹理并注册到上下文
    pub fn new(context: &Rc<GraphicsContext>) -> Rc<RefCell<Self>> {
        let texture = Rc::new(RefCell::new(Self {
            texture: Texture::new(context, TextureKind::Texture2D),
            surface: None,
            load: None,
        }));
        context.register_object(&texture);
        texture
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// 采样参数等公共设置
    pub fn texture_mut(&mut self) -> &mut Texture {
        &mut self.texture
    }

    pub fn render_surface(&self) -> Option<&RenderSurface> {
        self.surface.as_ref()
    }

    pub fn render_surface_mut(&mut self) -> Option<&mut RenderSurface> {
        self.surface.as_mut()
    }

    pub fn id(&self) -> ObjectId {
        self.texture.id()
    }

    pub fn handle(&self) -> Option<GpuHandle> {
        self.texture.handle()
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    pub fn is_data_lost(&self) -> bool {
        self.texture.is_data_lost()
    }

    pub fn clear_data_lost(&mut self) {
        self.texture.clear_data_lost();
    }

    pub fn is_data_pending(&self) -> bool {
        self.texture.is_data_pending()
    }

    /// 全部 mip 级占用的字节数
    pub fn memory_use(&self) -> usize {
        self.texture.layer_memory_use()
    }

    /// 设置尺寸、格式和用途并重建存储
    ///
    /// 渲染目标和深度纹理拥有一个渲染表面；改为普通用途时表面被移除。
    pub fn set_size(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
        multisample: u32,
        autoresolve: bool,
    ) -> Result<()> {
        self.sync_device();
        self.texture
            .configure(width, height, format, usage, multisample, autoresolve)?;

        if usage.has_render_surface() {
            if self.surface.is_none() {
                self.surface = Some(RenderSurface::new(self.texture.context(), None));
            }
        } else if let Some(surface) = self.surface.take() {
            self.texture.context().unbind_render_target(surface.id());
        }

        self.texture.create_storage()
    }

    /// 写入某一级的矩形区域
    pub fn set_data(&mut self, level: u32, x: u32, y: u32, width: u32, height: u32, data: &[u8]) -> Result<()> {
        self.sync_device();
        let region = TextureRegion {
            layer: 0,
            level,
            x,
            y,
            width,
            height,
        };
        self.texture.write(0, region, data)
    }

    /// 读回某一级
    pub fn get_data(&self, level: u32, dest: &mut [u8]) -> Result<()> {
        self.texture.read(0, level, dest)
    }

    /// 按图像设置尺寸并上传完整的 mip 链
    pub fn set_image(&mut self, image: &Image, use_alpha: bool) -> Result<()> {
        let usage = match self.texture.usage() {
            usage if usage.has_render_surface() => TextureUsage::Static,
            usage => usage,
        };
        self.upload_image(image, use_alpha, usage)
    }

    /// 读回第 0 级为图像，只支持 RGB8/RGBA8
    pub fn get_image(&self) -> Result<Image> {
        let format = self.texture.format();
        if !matches!(format, TextureFormat::Rgb8 | TextureFormat::Rgba8) {
            engine_error!("Unsupported texture format {:?}, can not convert to image", format);
            return Err(GraphicsError::UnsupportedFormat(format!("{:?}", format)).into());
        }

        let mut data = vec![0; self.texture.level_data_size(0)];
        self.get_data(0, &mut data)?;
        Image::from_raw(self.texture.width(), self.texture.height(), format.components(), data)
    }

    /// 在当前线程解码资源，等待 `end_load`
    pub fn begin_load(&mut self, provider: &dyn ResourceProvider, name: &str) -> Result<()> {
        if self.texture.context().is_headless() {
            return Ok(());
        }
        self.load = Some(Texture2DLoad::decode(provider, name)?);
        Ok(())
    }

    /// 在设备线程完成加载；设备丢失时推迟到恢复
    pub fn end_load(&mut self) -> Result<()> {
        if self.texture.context().is_headless() {
            self.load = None;
            return Ok(());
        }
        self.sync_device();
        let Some(load) = self.load.take() else {
            return Ok(());
        };

        if self.texture.context().is_device_lost() {
            engine_warn!(name = load.name(), "Texture load while device is lost");
            self.load = Some(load);
            self.texture.lifecycle_mut().set_data_pending(true);
            return Ok(());
        }
        self.apply_load(load)
    }

    /// 使用其他线程解码好的数据完成加载
    pub fn load(&mut self, load: Texture2DLoad) -> Result<()> {
        self.load = Some(load);
        self.end_load()
    }

    fn apply_load(&mut self, load: Texture2DLoad) -> Result<()> {
        let usage = match &load.parameters {
            Some(parameters) => {
                self.texture.apply_parameters(parameters);
                parameters.usage.unwrap_or(TextureUsage::Static)
            }
            None => TextureUsage::Static,
        };
        self.upload_image(&load.image, false, usage)?;
        engine_debug!(
            name = load.name(),
            width = load.image.width(),
            height = load.image.height(),
            "Texture loaded"
        );
        Ok(())
    }

    fn upload_image(&mut self, image: &Image, use_alpha: bool, usage: TextureUsage) -> Result<()> {
        let format = TextureFormat::from_components(image.components(), use_alpha)
            .ok_or_else(|| GraphicsError::UnsupportedFormat(format!("{} components", image.components())))?;

        self.set_size(image.width(), image.height(), format, usage, 1, false)?;

        self.set_data(0, 0, 0, image.width(), image.height(), image.data())?;
        let mut previous: Option<Image> = None;
        for level in 1..self.texture.levels() {
            let next = previous.as_ref().unwrap_or(image).next_level();
            self.set_data(level, 0, 0, next.width(), next.height(), next.data())?;
            previous = Some(next);
        }
        Ok(())
    }
}

impl DeviceObject for Texture2D {
    fn lifecycle(&self) -> &DeviceObjectLifecycle {
        self.texture.lifecycle()
    }

    fn lifecycle_mut(&mut self) -> &mut DeviceObjectLifecycle {
        self.texture.lifecycle_mut()
    }

    fn on_device_lost(&mut self) {
        self.texture.on_device_lost();
    }

    fn on_device_reset(&mut self) {
        match self.load.take() {
            Some(load) => match self.apply_load(load) {
                Ok(()) => self.texture.lifecycle_mut().set_data_lost(false),
                Err(e) => {
                    engine_error!("Failed to finish deferred texture load: {}", e);
                    self.texture.recreate_after_reset();
                }
            },
            None => self.texture.recreate_after_reset(),
        }
        self.texture.lifecycle_mut().set_data_pending(false);
    }

    fn release(&mut self) {
        let context = self.texture.context().clone();
        context.unbind_texture(self.texture.id());
        if let Some(surface) = &self.surface {
            context.unbind_render_target(surface.id());
        }
        self.texture.destroy_storage();
    }

    fn on_render_surface_update(&mut self) {
        let resize = self.surface.as_mut().and_then(RenderSurface::take_pending_resize);
        if let Some((width, height)) = resize {
            let texture = &self.texture;
            let (format, usage, multisample, autoresolve) =
                (texture.format(), texture.usage(), texture.multisample(), texture.autoresolve());
            if let Err(e) = self.set_size(width, height, format, usage, multisample, autoresolve) {
                engine_error!(width, height, "Failed to resize render surface: {}", e);
            }
        }

        let context = self.texture.context().clone();
        if let Some(surface) = self.surface.as_mut() {
            if surface.needs_update() {
                context.queue_render_surface(surface.id());
                surface.reset_update_queued();
            }
        }
    }
}

impl Drop for Texture2D {
    fn drop(&mut self) {
        self.release();
    }
}
