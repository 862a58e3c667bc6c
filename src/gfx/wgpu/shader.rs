//! wgpu 着色器编译
//!
//! GLSL 先经过 naga 前端解析和验证，得到可读的诊断信息；
//! 通过后再交给 wgpu 创建着色器模块。

use std::borrow::Cow;

use wgpu;

use crate::core::config::ShaderProfile;
use crate::gfx::backend::ShaderBackend;
use crate::gfx::types::{GpuHandle, ShaderStage};

use super::backend::WgpuBackend;

pub(super) struct WgpuShader {
    stage: ShaderStage,
    #[allow(dead_code)]
    module: wgpu::ShaderModule,
}

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

/// 用 naga 解析并验证 GLSL，返回诊断日志
fn validate_glsl(stage: ShaderStage, source: &str) -> Result<(), String> {
    let options = naga::front::glsl::Options {
        stage: naga_stage(stage),
        defines: Default::default(),
    };

    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&options, source)
        .map_err(|errors| format!("GLSL parse error:\n{:?}", errors))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| format!("Shader validation error:\n{:?}", e))?;
    Ok(())
}

impl ShaderBackend for WgpuBackend {
    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<GpuHandle, String> {
        let gpu = self.device().map_err(|e| e.to_string())?;

        validate_glsl(stage, source)?;

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(stage.name()),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(source),
                stage: naga_stage(stage),
                defines: Default::default(),
            },
        });
        if let Some(error) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(error.to_string());
        }

        let handle = self.allocate_handle();
        self.resources
            .borrow_mut()
            .shaders
            .insert(handle, WgpuShader { stage, module });
        Ok(handle)
    }

    fn destroy_shader(&self, handle: GpuHandle) {
        self.resources.borrow_mut().shaders.remove(&handle);
    }

    fn link_program(&self, vertex: GpuHandle, fragment: GpuHandle) -> Result<GpuHandle, String> {
        self.device().map_err(|e| e.to_string())?;

        {
            let resources = self.resources.borrow();
            let stage_of = |handle: GpuHandle| resources.shaders.get(&handle).map(|s| s.stage);
            if stage_of(vertex) != Some(ShaderStage::Vertex) {
                return Err(format!("{} is not a vertex shader module", vertex));
            }
            if stage_of(fragment) != Some(ShaderStage::Fragment) {
                return Err(format!("{} is not a fragment shader module", fragment));
            }
        }

        // 管线在绘制时按渲染状态创建，这里只记录两个模块
        let handle = self.allocate_handle();
        self.resources.borrow_mut().programs.insert(handle, (vertex, fragment));
        Ok(handle)
    }

    fn destroy_program(&self, handle: GpuHandle) {
        self.resources.borrow_mut().programs.remove(&handle);
    }

    fn default_version_directive(&self, _profile: ShaderProfile) -> &'static str {
        // naga 的 GLSL 前端只接受 450 及以上
        "#version 450"
    }

    fn feature_defines(&self) -> &'static [&'static str] {
        &["GL3", "WGPU"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_glsl_accepts_minimal_vertex_shader() {
        let src = "#version 450\nvoid main() {\n    gl_Position = vec4(0.0, 0.0, 0.0, 1.0);\n}\n";
        assert!(validate_glsl(ShaderStage::Vertex, src).is_ok());
    }

    #[test]
    fn test_validate_glsl_reports_errors() {
        let src = "#version 450\nvoid main() {\n    undefined_call();\n}\n";
        let log = validate_glsl(ShaderStage::Fragment, src).unwrap_err();
        assert!(log.starts_with("GLSL parse error"));
    }
}
