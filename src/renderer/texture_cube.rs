//! 立方体贴图
//!
//! 六个面共用尺寸和格式，按 +X, -X, +Y, -Y, +Z, -Z 的顺序存放为数组层。
//! 描述文件是一个 TOML 表，列出六张面图像，或给出一张横向排列六个面的长条图。

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::error::{GraphicsError, ResourceError, Result};
use crate::gfx::{CubeMapFace, GpuHandle, TextureFormat, TextureKind, TextureRegion, TextureUsage};
use crate::resource::provider::{join_path, parent_path};
use crate::resource::{CubeDescription, Image, ResourceProvider, TextureParameters};
use crate::{engine_debug, engine_error, engine_warn};

use super::context::GraphicsContext;
use super::gpu_object::{DeviceObject, DeviceObjectLifecycle, ObjectId};
use super::render_surface::RenderSurface;
use super::texture::Texture;

/// 解码完成、等待上传的立方体贴图
#[derive(Debug, Clone)]
pub struct TextureCubeLoad {
    name: String,
    faces: Vec<Image>,
    parameters: TextureParameters,
}

impl TextureCubeLoad {
    /// 读取描述文件并解码全部面，不访问设备
    pub fn decode(provider: &dyn ResourceProvider, name: &str) -> Result<Self> {
        let bytes = provider.read(name)?;
        let description = CubeDescription::from_toml_str(&String::from_utf8_lossy(&bytes))?;
        let dir = parent_path(name);

        let faces = match &description.image {
            Some(strip) => Self::split_strip(&Self::decode_image(provider, &join_path(dir, strip))?)?,
            None => description
                .faces
                .iter()
                .map(|face| Self::decode_image(provider, &join_path(dir, face)))
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            name: name.to_string(),
            faces,
            parameters: description.parameters,
        })
    }

    fn decode_image(provider: &dyn ResourceProvider, name: &str) -> Result<Image> {
        let bytes = provider.read(name)?;
        Image::decode(&bytes)
    }

    /// 横向长条图：宽度为高度的六倍
    fn split_strip(strip: &Image) -> Result<Vec<Image>> {
        let size = strip.height();
        if strip.width() != size * 6 {
            engine_error!(width = strip.width(), height = strip.height(), "Cube strip image must be six faces wide");
            return Err(ResourceError::Mismatch(format!(
                "strip image {}x{} is not six square faces",
                strip.width(),
                strip.height()
            ))
            .into());
        }
        (0..6).map(|i| strip.crop(i * size, 0, size, size)).collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 按面顺序排列的图像
    pub fn faces(&self) -> &[Image] {
        &self.faces
    }

    pub fn parameters(&self) -> &TextureParameters {
        &self.parameters
    }
}

/// 立方体贴图
pub struct TextureCube {
    texture: Texture,
    surfaces: Vec<RenderSurface>,
    face_memory_use: [usize; 6],
    load: Option<TextureCubeLoad>,
}

impl TextureCube {
    pub fn new(context: &Rc<GraphicsContext>) -> Rc<RefCell<Self>> {
        let texture = Rc::new(RefCell::new(Self {
            texture: Texture::new(context, TextureKind::TextureCube),
            surfaces: Vec::new(),
            face_memory_use: [0; 6],
            load: None,
        }));
        context.register_object(&texture);
        texture
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn texture_mut(&mut self) -> &mut Texture {
        &mut self.texture
    }

    /// 某个面的渲染表面，只有渲染目标和深度用途才有
    pub fn render_surface(&self, face: CubeMapFace) -> Option<&RenderSurface> {
        self.surfaces.get(face.index())
    }

    pub fn render_surface_mut(&mut self, face: CubeMapFace) -> Option<&mut RenderSurface> {
        self.surfaces.get_mut(face.index())
    }

    pub fn id(&self) -> ObjectId {
        self.texture.id()
    }

    pub fn handle(&self) -> Option<GpuHandle> {
        self.texture.handle()
    }

    /// 边长
    pub fn size(&self) -> u32 {
        self.texture.width()
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

    /// 某个面全部 mip 级占用的字节数
    pub fn face_memory_use(&self, face: CubeMapFace) -> usize {
        self.face_memory_use[face.index()]
    }

    pub fn memory_use(&self) -> usize {
        self.face_memory_use.iter().sum()
    }

    /// 设置边长、格式和用途；多重采样时总是自动解析
    pub fn set_size(&mut self, size: u32, format: TextureFormat, usage: TextureUsage, multisample: u32) -> Result<()> {
        self.sync_device();
        self.texture.configure(size, size, format, usage, multisample, true)?;

        if usage.has_render_surface() {
            if self.surfaces.is_empty() {
                let context = self.texture.context().clone();
                self.surfaces = CubeMapFace::ALL
                    .iter()
                    .map(|face| RenderSurface::new(&context, Some(*face)))
                    .collect();
            }
        } else {
            for surface in self.surfaces.drain(..) {
                self.texture.context().unbind_render_target(surface.id());
            }
        }

        self.face_memory_use = [self.texture.layer_memory_use(); 6];
        self.texture.create_storage()
    }

    pub fn set_data(
        &mut self,
        face: CubeMapFace,
        level: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<()> {
        self.sync_device();
        let layer = face.index() as u32;
        let region = TextureRegion {
            layer,
            level,
            x,
            y,
            width,
            height,
        };
        self.texture.write(layer, region, data)
    }

    pub fn get_data(&self, face: CubeMapFace, level: u32, dest: &mut [u8]) -> Result<()> {
        self.texture.read(face.index() as u32, level, dest)
    }

    /// 设置一个面的图像
    ///
    /// +X 面决定尺寸和格式，其他面必须与之一致；面必须是正方形。
    pub fn set_image(&mut self, face: CubeMapFace, image: &Image, use_alpha: bool) -> Result<()> {
        let usage = match self.texture.usage() {
            usage if usage.has_render_surface() => TextureUsage::Static,
            usage => usage,
        };
        self.upload_face(face, image, use_alpha, usage)
    }

    /// 读回某个面的第 0 级，只支持 RGB8/RGBA8
    pub fn get_image(&self, face: CubeMapFace) -> Result<Image> {
        let format = self.texture.format();
        if !matches!(format, TextureFormat::Rgb8 | TextureFormat::Rgba8) {
            engine_error!("Unsupported texture format {:?}, can not convert to image", format);
            return Err(GraphicsError::UnsupportedFormat(format!("{:?}", format)).into());
        }

        let mut data = vec![0; self.texture.level_data_size(0)];
        self.get_data(face, 0, &mut data)?;
        Image::from_raw(self.size(), self.size(), format.components(), data)
    }

    pub fn begin_load(&mut self, provider: &dyn ResourceProvider, name: &str) -> Result<()> {
        if self.texture.context().is_headless() {
            return Ok(());
        }
        self.load = Some(TextureCubeLoad::decode(provider, name)?);
        Ok(())
    }

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
            engine_warn!(name = load.name(), "Cube texture load while device is lost");
            self.load = Some(load);
            self.texture.lifecycle_mut().set_data_pending(true);
            return Ok(());
        }
        self.apply_load(load)
    }

    pub fn load(&mut self, load: TextureCubeLoad) -> Result<()> {
        self.load = Some(load);
        self.end_load()
    }

    fn apply_load(&mut self, load: TextureCubeLoad) -> Result<()> {
        self.texture.apply_parameters(&load.parameters);
        let usage = load.parameters.usage.unwrap_or(TextureUsage::Static);

        for (face, image) in CubeMapFace::ALL.iter().zip(&load.faces) {
            self.upload_face(*face, image, false, usage)?;
        }
        engine_debug!(name = load.name(), size = self.size(), "Cube texture loaded");
        Ok(())
    }

    fn upload_face(&mut self, face: CubeMapFace, image: &Image, use_alpha: bool, usage: TextureUsage) -> Result<()> {
        let size = image.width();
        if size != image.height() {
            engine_error!(?face, width = image.width(), height = image.height(), "Cube texture face does not have square dimensions");
            return Err(ResourceError::Mismatch(format!(
                "cube face {}x{} is not square",
                image.width(),
                image.height()
            ))
            .into());
        }
        let format = TextureFormat::from_components(image.components(), use_alpha)
            .ok_or_else(|| GraphicsError::UnsupportedFormat(format!("{} components", image.components())))?;

        if face == CubeMapFace::PositiveX {
            self.set_size(size, format, usage, 1)?;
        } else if self.texture.width() == 0 {
            engine_error!(?face, "Cube texture face 0 must be loaded first");
            return Err(ResourceError::Mismatch("cube face set before +X".to_string()).into());
        } else if size != self.texture.width() || format != self.texture.format() {
            engine_error!(?face, "Cube texture face does not match size or format of face 0");
            return Err(ResourceError::Mismatch(format!(
                "cube face {}x{} {:?} differs from {}x{} {:?}",
                size,
                size,
                format,
                self.texture.width(),
                self.texture.width(),
                self.texture.format()
            ))
            .into());
        }

        self.set_data(face, 0, 0, 0, size, size, image.data())?;
        let mut uploaded = image.data().len();
        let mut previous: Option<Image> = None;
        for level in 1..self.texture.levels() {
            let next = previous.as_ref().unwrap_or(image).next_level();
            self.set_data(face, level, 0, 0, next.width(), next.height(), next.data())?;
            uploaded += next.data().len();
            previous = Some(next);
        }
        self.face_memory_use[face.index()] = uploaded;
        Ok(())
    }
}

impl DeviceObject for TextureCube {
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
                    engine_error!("Failed to finish deferred cube texture load: {}", e);
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
        for surface in &self.surfaces {
            context.unbind_render_target(surface.id());
        }
        self.texture.destroy_storage();
    }

    fn on_render_surface_update(&mut self) {
        // 六个面尺寸相同，任意一个面的请求都会重建整个纹理
        let resize = self
            .surfaces
            .iter_mut()
            .filter_map(RenderSurface::take_pending_resize)
            .last();
        if let Some((width, _)) = resize {
            let texture = &self.texture;
            let (format, usage, multisample) = (texture.format(), texture.usage(), texture.multisample());
            if let Err(e) = self.set_size(width, format, usage, multisample) {
                engine_error!(size = width, "Failed to resize cube render surfaces: {}", e);
            }
        }

        let context = self.texture.context().clone();
        for surface in self.surfaces.iter_mut().filter(|surface| surface.needs_update()) {
            context.queue_render_surface(surface.id());
            surface.reset_update_queued();
        }
    }
}

impl Drop for TextureCube {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{GraphicsCapabilities, SoftwareBackend};
    use crate::resource::MemoryProvider;
    use image::{ImageOutputFormat, RgbaImage};
    use std::io::Cursor;

    fn context() -> (Rc<SoftwareBackend>, Rc<GraphicsContext>) {
        let backend = Rc::new(SoftwareBackend::default());
        let ctx = GraphicsContext::new(backend.clone(), GraphicsCapabilities::software());
        (backend, ctx)
    }

    fn encode(image: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn face_color(index: u32) -> image::Rgba<u8> {
        image::Rgba([index as u8 * 40, 0, 0, 255])
    }

    #[test]
    fn test_render_target_faces() {
        let (_, ctx) = context();
        let cube = TextureCube::new(&ctx);
        let mut cube = cube.borrow_mut();

        cube.set_size(16, TextureFormat::Rgba8, TextureUsage::RenderTarget, 4).unwrap();
        assert!(cube.texture().autoresolve());
        for face in CubeMapFace::ALL {
            assert_eq!(cube.render_surface(face).unwrap().face(), Some(face));
        }

        let surface = cube.render_surface(CubeMapFace::NegativeZ).unwrap().id();
        ctx.set_render_target(2, Some(surface));
        cube.set_size(16, TextureFormat::Rgba8, TextureUsage::Static, 1).unwrap();
        assert!(cube.render_surface(CubeMapFace::PositiveX).is_none());
        assert_eq!(ctx.render_target(2), None);
    }

    #[test]
    fn test_face_rules() {
        let (backend, ctx) = context();
        let cube = TextureCube::new(&ctx);
        let mut cube = cube.borrow_mut();
        let face = |value: u8| Image::from_raw(2, 2, 3, vec![value; 12]).unwrap();

        // +X 之前不能设置其他面
        assert!(cube.set_image(CubeMapFace::NegativeX, &face(1), false).is_err());
        assert!(cube
            .set_image(CubeMapFace::PositiveX, &Image::from_raw(2, 1, 3, vec![0; 6]).unwrap(), false)
            .is_err());

        for (i, f) in CubeMapFace::ALL.iter().enumerate() {
            cube.set_image(*f, &face(i as u8 * 10), false).unwrap();
        }
        assert_eq!(cube.size(), 2);
        assert_eq!(cube.texture().levels(), 2);
        assert_eq!(cube.face_memory_use(CubeMapFace::NegativeY), 12 + 3);
        assert_eq!(cube.memory_use(), (12 + 3) * 6);

        let handle = cube.handle().unwrap();
        assert_eq!(backend.texture_contents(handle, 3, 0), Some(vec![30; 12]));
        assert_eq!(cube.get_image(CubeMapFace::PositiveZ).unwrap(), face(40));

        let bigger = Image::from_raw(4, 4, 3, vec![0; 48]).unwrap();
        assert!(cube.set_image(CubeMapFace::PositiveY, &bigger, false).is_err());
        let rgba = Image::from_raw(2, 2, 4, vec![0; 16]).unwrap();
        assert!(cube.set_image(CubeMapFace::PositiveY, &rgba, false).is_err());
    }

    #[test]
    fn test_load_from_strip() {
        let (backend, ctx) = context();
        let strip = RgbaImage::from_fn(12, 2, |x, _| face_color(x / 2));
        let provider = MemoryProvider::new()
            .with_file("Textures/Sky.toml", "image = \"SkyStrip.png\"\nmipmap = false")
            .with_file("Textures/SkyStrip.png", encode(&strip));

        let cube = TextureCube::new(&ctx);
        let mut cube = cube.borrow_mut();
        cube.begin_load(&provider, "Textures/Sky.toml").unwrap();
        cube.end_load().unwrap();

        assert_eq!(cube.size(), 2);
        assert_eq!(cube.texture().levels(), 1);
        let handle = cube.handle().unwrap();
        for face in CubeMapFace::ALL {
            let contents = backend.texture_contents(handle, face.index() as u32, 0).unwrap();
            assert_eq!(&contents[..4], &face_color(face.index() as u32).0);
        }
    }

    #[test]
    fn test_load_from_face_files() {
        let (_, ctx) = context();
        let names = ["px.png", "nx.png", "py.png", "ny.png", "pz.png", "nz.png"];
        let mut provider = MemoryProvider::new();
        for (i, name) in names.iter().enumerate() {
            let face = RgbaImage::from_pixel(4, 4, face_color(i as u32));
            provider.insert(format!("Cubes/{}", name), encode(&face));
        }
        let faces = names.iter().map(|n| format!("\"{}\"", n)).collect::<Vec<_>>().join(", ");
        provider.insert("Cubes/Room.toml", format!("faces = [{}]\nfilter = \"bilinear\"", faces));

        let load = TextureCubeLoad::decode(&provider, "Cubes/Room.toml").unwrap();
        assert_eq!(load.faces().len(), 6);

        let cube = TextureCube::new(&ctx);
        let mut cube = cube.borrow_mut();
        cube.load(load).unwrap();
        assert_eq!(cube.texture().levels(), 3);
        assert_eq!(cube.get_image(CubeMapFace::NegativeY).unwrap().data()[..4], face_color(3).0);
    }

    #[test]
    fn test_strip_must_be_six_faces_wide() {
        let provider = MemoryProvider::new()
            .with_file("Bad.toml", "image = \"Bad.png\"")
            .with_file("Bad.png", encode(&RgbaImage::new(8, 2)));
        assert!(TextureCubeLoad::decode(&provider, "Bad.toml").is_err());
    }

    #[test]
    fn test_device_loss_and_release() {
        let (backend, ctx) = context();
        let cube = TextureCube::new(&ctx);
        cube.borrow_mut()
            .set_size(8, TextureFormat::Rgba8, TextureUsage::RenderTarget, 1)
            .unwrap();

        ctx.lose_device();
        assert!(cube.borrow().handle().is_none());
        ctx.restore_device().unwrap();
        assert!(cube.borrow().handle().is_some());
        assert!(cube.borrow().is_data_lost());

        let surface = cube.borrow().render_surface(CubeMapFace::PositiveY).unwrap().id();
        ctx.set_render_target(0, Some(surface));
        ctx.set_texture(0, Some(cube.borrow().id()));
        drop(cube);
        assert_eq!(ctx.render_target(0), None);
        assert_eq!(ctx.texture(0), None);
        assert_eq!(backend.object_count(), 0);
    }
}
