//! 纹理参数文件（TOML）
//!
//! 与纹理同名、扩展名为 `.toml` 的文件，所有字段可选：
//!
//! ```toml
//! usage = "dynamic"
//! mipmap = true
//! srgb = false
//! filter = "anisotropic"
//! anisotropy = 8
//!
//! [address]
//! u = "clamp"
//! v = "wrap"
//! ```
//!
//! 立方体贴图的描述文件在同一张表中额外列出六个面（+X, -X, +Y, -Y, +Z, -Z），
//! 或者给出一张横向排列六个面的长条图：
//!
//! ```toml
//! faces = ["PosX.png", "NegX.png", "PosY.png", "NegY.png", "PosZ.png", "NegZ.png"]
//! # 或者
//! image = "Strip.png"
//! ```

use serde::{Deserialize, Serialize};

use crate::core::error::{ResourceError, Result};
use crate::gfx::types::{AddressMode, FilterMode, TextureUsage};

/// 每个坐标的寻址模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressParameters {
    pub u: Option<AddressMode>,
    pub v: Option<AddressMode>,
    pub w: Option<AddressMode>,
}

/// 纹理参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureParameters {
    pub usage: Option<TextureUsage>,
    /// 为 false 时只保留一级
    pub mipmap: Option<bool>,
    pub srgb: Option<bool>,
    pub filter: Option<FilterMode>,
    pub anisotropy: Option<u32>,
    pub address: AddressParameters,
}

impl TextureParameters {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| ResourceError::InvalidParameters(format!("Failed to parse texture parameters: {}", e)).into())
    }
}

/// 立方体贴图描述
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeDescription {
    /// 六个面的图像，相对于描述文件
    pub faces: Vec<String>,
    /// 横向长条图
    pub image: Option<String>,
    #[serde(flatten)]
    pub parameters: TextureParameters,
}

impl CubeDescription {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let description: Self = toml::from_str(text)
            .map_err(|e| ResourceError::InvalidParameters(format!("Failed to parse cube description: {}", e)))?;

        match (description.faces.len(), &description.image) {
            (6, None) | (0, Some(_)) => Ok(description),
            (count, image) => Err(ResourceError::InvalidParameters(format!(
                "cube description needs six faces or one image, found {} faces{}",
                count,
                if image.is_some() { " and an image" } else { "" }
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parameters() {
        let params = TextureParameters::from_toml_str(
            r#"
usage = "dynamic"
mipmap = false
filter = "nearest"
anisotropy = 8

[address]
u = "clamp"
w = "mirror"
"#,
        )
        .unwrap();

        assert_eq!(params.usage, Some(TextureUsage::Dynamic));
        assert_eq!(params.mipmap, Some(false));
        assert_eq!(params.filter, Some(FilterMode::Nearest));
        assert_eq!(params.anisotropy, Some(8));
        assert_eq!(params.address.u, Some(AddressMode::Clamp));
        assert_eq!(params.address.v, None);
        assert_eq!(params.address.w, Some(AddressMode::Mirror));
        assert_eq!(params.srgb, None);
    }

    #[test]
    fn test_empty_parameters() {
        assert_eq!(TextureParameters::from_toml_str("").unwrap(), TextureParameters::default());
        assert!(TextureParameters::from_toml_str("filter = \"blurry\"").is_err());
    }

    #[test]
    fn test_cube_description() {
        let desc = CubeDescription::from_toml_str(
            r#"
faces = ["a.png", "b.png", "c.png", "d.png", "e.png", "f.png"]
srgb = true
"#,
        )
        .unwrap();
        assert_eq!(desc.faces.len(), 6);
        assert_eq!(desc.parameters.srgb, Some(true));

        let strip = CubeDescription::from_toml_str("image = \"strip.png\"").unwrap();
        assert_eq!(strip.image.as_deref(), Some("strip.png"));

        assert!(CubeDescription::from_toml_str("faces = [\"a.png\"]").is_err());
        assert!(CubeDescription::from_toml_str("").is_err());
    }
}
