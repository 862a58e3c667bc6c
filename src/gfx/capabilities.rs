//! 图形能力配置
//!
//! 取代进程级的"当前 API"和"无头模式"全局开关：
//! 由配置生成一个 `GraphicsCapabilities` 值，交给 `GraphicsContext` 持有，
//! 资源通过上下文以引用方式读取。

use crate::core::config::{BackendKind, Config, ShaderProfile};

/// 运行期图形能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsCapabilities {
    /// 选定的后端
    pub backend: BackendKind,
    /// 无头模式：强制影子数据，不调用设备
    pub headless: bool,
    /// 着色器目标平台
    pub shader_profile: ShaderProfile,
    /// 每个蒙皮的最大骨骼数
    pub max_bones: u32,
}

impl GraphicsCapabilities {
    /// 由配置生成
    pub fn from_config(config: &Config) -> Self {
        Self {
            backend: config.graphics.backend,
            headless: config.graphics.headless,
            shader_profile: config.graphics.shader_profile,
            max_bones: config.graphics.max_bones,
        }
    }

    /// 软件后端、桌面配置
    pub fn software() -> Self {
        Self {
            backend: BackendKind::Software,
            headless: false,
            shader_profile: ShaderProfile::Desktop,
            max_bones: 128,
        }
    }

    /// 无头模式
    pub fn headless() -> Self {
        Self {
            headless: true,
            ..Self::software()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.apply_args(["--software", "--headless", "--mobile"]);

        let caps = GraphicsCapabilities::from_config(&config);
        assert_eq!(caps.backend, BackendKind::Software);
        assert!(caps.headless);
        assert_eq!(caps.shader_profile, ShaderProfile::Mobile);
        assert_eq!(caps.max_bones, 128);
    }
}
