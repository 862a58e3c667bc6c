//! 解码后的图像
//!
//! 像素按行紧密排列，每个像素 1~4 个 8 位分量。
//! 解码使用 `image` crate，其他颜色类型统一转换为 RGBA8。

use image::DynamicImage;

use crate::core::error::{ResourceError, Result};

/// CPU 上的图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    components: usize,
    data: Vec<u8>,
}

impl Image {
    /// 由原始像素创建，数据长度必须与尺寸一致
    pub fn from_raw(width: u32, height: u32, components: usize, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 || !(1..=4).contains(&components) {
            return Err(ResourceError::InvalidParameters(format!(
                "invalid image {}x{} with {} components",
                width, height, components
            ))
            .into());
        }
        let expected = width as usize * height as usize * components;
        if data.len() != expected {
            return Err(ResourceError::Mismatch(format!(
                "image data holds {} bytes, expected {}",
                data.len(),
                expected
            ))
            .into());
        }
        Ok(Self {
            width,
            height,
            components,
            data,
        })
    }

    /// 解码 PNG/JPEG/BMP/TGA 等格式
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| ResourceError::Decode(format!("Failed to decode image: {}", e)))?;

        let (width, height) = (decoded.width(), decoded.height());
        let (components, data) = match decoded {
            DynamicImage::ImageLuma8(img) => (1, img.into_raw()),
            DynamicImage::ImageLumaA8(img) => (2, img.into_raw()),
            DynamicImage::ImageRgb8(img) => (3, img.into_raw()),
            DynamicImage::ImageRgba8(img) => (4, img.into_raw()),
            other => (4, other.to_rgba8().into_raw()),
        };
        Self::from_raw(width, height, components, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// 下一级 mip：2x2 盒式滤波，边长最小为 1
    pub fn next_level(&self) -> Image {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let c = self.components;
        let src_stride = self.width as usize * c;

        let mut data = Vec::with_capacity(width as usize * height as usize * c);
        for y in 0..height as usize {
            let y0 = (y * 2).min(self.height as usize - 1);
            let y1 = (y * 2 + 1).min(self.height as usize - 1);
            for x in 0..width as usize {
                let x0 = (x * 2).min(self.width as usize - 1);
                let x1 = (x * 2 + 1).min(self.width as usize - 1);
                for i in 0..c {
                    let sum = self.data[y0 * src_stride + x0 * c + i] as u32
                        + self.data[y0 * src_stride + x1 * c + i] as u32
                        + self.data[y1 * src_stride + x0 * c + i] as u32
                        + self.data[y1 * src_stride + x1 * c + i] as u32;
                    data.push(((sum + 2) / 4) as u8);
                }
            }
        }

        Image {
            width,
            height,
            components: c,
            data,
        }
    }

    /// 截取矩形区域
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Image> {
        if width == 0 || height == 0 || x + width > self.width || y + height > self.height {
            return Err(ResourceError::InvalidParameters(format!(
                "crop {}x{}+{}+{} outside image {}x{}",
                width, height, x, y, self.width, self.height
            ))
            .into());
        }

        let c = self.components;
        let src_stride = self.width as usize * c;
        let row_size = width as usize * c;
        let mut data = Vec::with_capacity(row_size * height as usize);
        for row in y as usize..(y + height) as usize {
            let start = row * src_stride + x as usize * c;
            data.extend_from_slice(&self.data[start..start + row_size]);
        }

        Ok(Image {
            width,
            height,
            components: c,
            data,
        })
    }
}
