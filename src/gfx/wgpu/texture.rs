//! wgpu 纹理存储、上传与回读

use std::sync::mpsc;

use tracing::debug;
use wgpu;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::TextureBackend;
use crate::gfx::types::{
    AddressMode, FilterMode, GpuHandle, SamplerState, TextureDesc, TextureFormat, TextureRegion,
    TextureUsage,
};

use super::backend::WgpuBackend;

pub(super) struct WgpuTexture {
    desc: TextureDesc,
    texture: wgpu::Texture,
    #[allow(dead_code)]
    sampler: wgpu::Sampler,
}

/// 引擎格式到 wgpu 格式的映射
///
/// wgpu 没有 24 位 RGB 格式，Rgb8 以 Rgba8 存储，上传时补 alpha、回读时去掉。
fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Alpha8 | TextureFormat::Luminance8 => wgpu::TextureFormat::R8Unorm,
        TextureFormat::LuminanceAlpha8 => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgb8 | TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn gpu_bytes_per_pixel(format: TextureFormat) -> usize {
    match format {
        TextureFormat::Rgb8 => 4,
        other => other.bytes_per_pixel(),
    }
}

fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
    }
}

fn create_sampler(device: &wgpu::Device, state: &SamplerState) -> wgpu::Sampler {
    let (mag, min, mip) = match state.filter {
        FilterMode::Nearest => (
            wgpu::FilterMode::Nearest,
            wgpu::FilterMode::Nearest,
            wgpu::FilterMode::Nearest,
        ),
        FilterMode::Bilinear => (
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Nearest,
        ),
        FilterMode::Trilinear | FilterMode::Anisotropic => (
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Linear,
        ),
    };
    // 各向异性要求三个过滤器都是线性
    let anisotropy_clamp = match state.filter {
        FilterMode::Anisotropic => state.anisotropy.clamp(1, 16) as u16,
        _ => 1,
    };

    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Texture Sampler"),
        address_mode_u: address_mode(state.address[0]),
        address_mode_v: address_mode(state.address[1]),
        address_mode_w: address_mode(state.address[2]),
        mag_filter: mag,
        min_filter: min,
        mipmap_filter: mip,
        lod_min_clamp: 0.0,
        lod_max_clamp: 32.0,
        compare: None,
        anisotropy_clamp,
        border_color: None,
    })
}

impl WgpuTexture {
    fn ensure_copyable(&self) -> Result<()> {
        if self.desc.format.is_depth() || self.desc.multisample > 1 {
            return Err(GraphicsError::UnsupportedFormat(format!(
                "{:?} texture with {} samples cannot be copied",
                self.desc.format, self.desc.multisample
            ))
            .into());
        }
        Ok(())
    }

    fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.desc.width >> level).max(1), (self.desc.height >> level).max(1))
    }
}

impl TextureBackend for WgpuBackend {
    fn create_texture(&self, desc: &TextureDesc) -> Result<GpuHandle> {
        let gpu = self.device()?;

        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING;
        if desc.multisample <= 1 {
            usage |= wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC;
        }
        if desc.usage >= TextureUsage::RenderTarget {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }

        let format = wgpu_format(desc.format);
        let srgb_view = [format.add_srgb_suffix()];
        let view_formats: &[wgpu::TextureFormat] = if srgb_view[0] != format { &srgb_view } else { &[] };

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.kind.layers(),
            },
            mip_level_count: desc.levels,
            sample_count: desc.multisample.max(1),
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats,
        });
        if let Some(error) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(GraphicsError::ResourceCreation(format!("Failed to create texture: {}", error)).into());
        }

        let sampler = create_sampler(&gpu.device, &desc.sampler);
        let handle = self.allocate_handle();
        self.resources.borrow_mut().textures.insert(
            handle,
            WgpuTexture {
                desc: desc.clone(),
                texture,
                sampler,
            },
        );
        debug!(%handle, width = desc.width, height = desc.height, ?format, "wgpu texture created");
        Ok(handle)
    }

    fn write_texture(&self, handle: GpuHandle, region: &TextureRegion, data: &[u8]) -> Result<()> {
        let gpu = self.device()?;
        let resources = self.resources.borrow();
        let texture = resources
            .textures
            .get(&handle)
            .ok_or_else(|| GraphicsError::NotCreated(format!("texture {}", handle)))?;
        texture.ensure_copyable()?;

        let (level_width, level_height) = texture.level_size(region.level);
        if region.x + region.width > level_width || region.y + region.height > level_height {
            return Err(GraphicsError::InvalidRange(format!(
                "region {}x{}+{}+{} outside level {}x{}",
                region.width, region.height, region.x, region.y, level_width, level_height
            ))
            .into());
        }

        let format = texture.desc.format;
        let pixels = region.width as usize * region.height as usize;
        if data.len() < pixels * format.bytes_per_pixel() {
            return Err(GraphicsError::InvalidRange("texture data shorter than region".to_string()).into());
        }

        let upload: Vec<u8> = if format == TextureFormat::Rgb8 {
            data[..pixels * 3]
                .chunks_exact(3)
                .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
                .collect()
        } else {
            data[..pixels * format.bytes_per_pixel()].to_vec()
        };

        gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: region.level,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: region.layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &upload,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(region.width * gpu_bytes_per_pixel(format) as u32),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_texture(&self, handle: GpuHandle, layer: u32, level: u32, dest: &mut [u8]) -> Result<()> {
        let gpu = self.device()?;
        let resources = self.resources.borrow();
        let texture = resources
            .textures
            .get(&handle)
            .ok_or_else(|| GraphicsError::NotCreated(format!("texture {}", handle)))?;
        texture.ensure_copyable()?;

        let format = texture.desc.format;
        let (width, height) = texture.level_size(level);
        let row_size = width as usize * format.bytes_per_pixel();
        if dest.len() < row_size * height as usize {
            return Err(GraphicsError::InvalidRange(format!(
                "destination holds {} bytes, level needs {}",
                dest.len(),
                row_size * height as usize
            ))
            .into());
        }

        // 行对齐到 256 字节
        let gpu_row = width as usize * gpu_bytes_per_pixel(format);
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded_row = (gpu_row + align - 1) / align * align;

        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback Buffer"),
            size: (padded_row * height as usize) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Texture Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: level,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|e| GraphicsError::DeviceUnavailable(format!("Readback channel closed: {}", e)))?
            .map_err(|e| GraphicsError::DeviceUnavailable(format!("Failed to map readback buffer: {}", e)))?;

        {
            let mapped = slice.get_mapped_range();
            for row in 0..height as usize {
                let src = &mapped[row * padded_row..row * padded_row + gpu_row];
                let dst = &mut dest[row * row_size..(row + 1) * row_size];
                if format == TextureFormat::Rgb8 {
                    for (out, rgba) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
                        out.copy_from_slice(&rgba[..3]);
                    }
                } else {
                    dst.copy_from_slice(src);
                }
            }
        }
        staging.unmap();
        Ok(())
    }

    fn update_sampler(&self, handle: GpuHandle, sampler: &SamplerState) -> Result<()> {
        let gpu = self.device()?;
        let mut resources = self.resources.borrow_mut();
        let texture = resources
            .textures
            .get_mut(&handle)
            .ok_or_else(|| GraphicsError::NotCreated(format!("texture {}", handle)))?;

        texture.sampler = create_sampler(&gpu.device, sampler);
        texture.desc.sampler = *sampler;
        Ok(())
    }

    fn destroy_texture(&self, handle: GpuHandle) {
        if let Some(texture) = self.resources.borrow_mut().textures.remove(&handle) {
            texture.texture.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping() {
        assert_eq!(wgpu_format(TextureFormat::Rgb8), wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(wgpu_format(TextureFormat::LuminanceAlpha8), wgpu::TextureFormat::Rg8Unorm);
        assert_eq!(gpu_bytes_per_pixel(TextureFormat::Rgb8), 4);
        assert_eq!(gpu_bytes_per_pixel(TextureFormat::Alpha8), 1);
    }
}
