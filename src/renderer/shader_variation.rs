//! 着色器变体
//!
//! 一个变体是某个着色器在一组宏定义下编译出的单个阶段（顶点或像素）。
//! 编译前的源码预处理顺序固定：
//!
//! 1. `#version` 指令（源码中检测到的，或后端默认值）
//! 2. 平台宏 `DESKTOP_GRAPHICS` / `MOBILE_GRAPHICS`
//! 3. 阶段宏 `COMPILEVS` / `COMPILEPS`
//! 4. `MAXBONES <n>`
//! 5. 用户宏，每个 `NAME=VALUE` 或 `NAME` 一行
//! 6. 后端功能宏
//! 7. 去掉版本指令后的原始源码

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::core::config::ShaderProfile;
use crate::core::error::{GraphicsError, ResourceError, Result};
use crate::gfx::{GpuHandle, ShaderStage};
use crate::{engine_error, engine_warn};

use super::context::GraphicsContext;
use super::gpu_object::{DeviceObject, DeviceObjectLifecycle, ObjectId};
use super::shader::Shader;

/// 版本指令之后可以出现的配置档
const VERSION_PROFILES: [&str; 3] = ["es", "core", "compatibility"];

/// 预处理的输入
#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions<'a> {
    pub stage: ShaderStage,
    pub profile: ShaderProfile,
    /// 源码没有版本指令时使用
    pub default_version: &'a str,
    pub max_bones: u32,
    /// 空格分隔的 `NAME=VALUE` / `NAME`
    pub defines: &'a str,
    pub feature_defines: &'a [&'a str],
}

/// 预处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledSource {
    pub source: String,
    /// 原始源码中从未出现的宏名
    pub unused_defines: Vec<String>,
}

/// 检测源码中的版本指令
///
/// 第一个 `#` 后紧跟 `version` 时视为版本指令，返回 (指令文本, 指令结束位置)。
fn find_version_directive(source: &str) -> Option<(&str, usize)> {
    let start = source.find('#')?;
    let rest = &source[start + 1..];
    if !rest.starts_with("version") {
        return None;
    }

    let bytes = source.as_bytes();
    let mut end = (start + 1 + "version".len()).min(source.len());
    while end < source.len() && (bytes[end] == b' ' || bytes[end] == b'\t') {
        end += 1;
    }
    while end < source.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }

    // 可选的配置档，必须在同一行
    let tail = &source[end..];
    let trimmed = tail.trim_start_matches([' ', '\t']);
    let word_len = trimmed
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    if VERSION_PROFILES.contains(&&trimmed[..word_len]) {
        end += tail.len() - trimmed.len() + word_len;
    }

    Some((&source[start..end], end))
}

/// 按固定顺序拼装最终源码
pub fn assemble_source(source: &str, options: &PreprocessOptions) -> AssembledSource {
    let mut out = String::with_capacity(source.len() + 256);
    let version = find_version_directive(source);

    match version {
        Some((directive, _)) => out.push_str(directive),
        None => out.push_str(options.default_version),
    }
    out.push('\n');

    out.push_str("#define ");
    out.push_str(options.profile.platform_define());
    out.push('\n');

    out.push_str("#define ");
    out.push_str(options.stage.compile_define());
    out.push('\n');

    out.push_str(&format!("#define MAXBONES {}\n", options.max_bones));

    let mut unused_defines = Vec::new();
    for token in options.defines.split(' ').filter(|t| !t.is_empty()) {
        let (name, value) = match token.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (token, None),
        };
        match value {
            Some(value) => out.push_str(&format!("#define {} {}\n", name, value)),
            None => out.push_str(&format!("#define {}\n", name)),
        }
        // 子串匹配，注释中出现也算
        if !source.contains(name) {
            unused_defines.push(name.to_string());
        }
    }

    for define in options.feature_defines {
        out.push_str("#define ");
        out.push_str(define);
        out.push('\n');
    }

    match version {
        Some((_, end)) => out.push_str(&source[end..]),
        None => out.push_str(source),
    }

    AssembledSource {
        source: out,
        unused_defines,
    }
}

/// 着色器变体
pub struct ShaderVariation {
    context: Rc<GraphicsContext>,
    lifecycle: DeviceObjectLifecycle,
    owner: Weak<Shader>,
    stage: ShaderStage,
    name: String,
    defines: String,
    compiler_output: String,
}

impl ShaderVariation {
    /// 创建未编译的变体并注册到上下文
    pub fn new(context: &Rc<GraphicsContext>, owner: Weak<Shader>, stage: ShaderStage) -> Rc<RefCell<Self>> {
        let variation = Rc::new(RefCell::new(Self {
            lifecycle: context.new_lifecycle(),
            context: context.clone(),
            owner,
            stage,
            name: String::new(),
            defines: String::new(),
            compiler_output: String::new(),
        }));
        context.register_object(&variation);
        variation
    }

    /// 编译
    ///
    /// 失败时 `compiler_output` 保存编译器日志，不保留句柄。
    pub fn create(&mut self) -> Result<()> {
        self.sync_device();
        self.release();

        if self.context.is_headless() || self.context.is_device_lost() {
            return Err(GraphicsError::DeviceUnavailable(format!(
                "can not compile {} without a device",
                self.full_name()
            ))
            .into());
        }

        let Some(owner) = self.owner.upgrade() else {
            self.compiler_output = "Owner shader has expired".to_string();
            engine_error!("Can not compile {}: owner shader has expired", self.full_name());
            return Err(ResourceError::OwnerExpired(self.full_name()).into());
        };

        let backend = self.context.backend();
        let assembled = assemble_source(
            owner.source_code(self.stage),
            &PreprocessOptions {
                stage: self.stage,
                profile: self.context.shader_profile(),
                default_version: backend.default_version_directive(self.context.shader_profile()),
                max_bones: self.context.max_bones(),
                defines: &self.defines,
                feature_defines: backend.feature_defines(),
            },
        );

        if cfg!(debug_assertions) {
            for define in &assembled.unused_defines {
                engine_warn!("Shader {} does not use the define {}", self.full_name(), define);
            }
        }

        match backend.compile_shader(self.stage, &assembled.source) {
            Ok(handle) => {
                self.lifecycle.attach(handle);
                self.compiler_output.clear();
                Ok(())
            }
            Err(log) => {
                self.compiler_output = log;
                Err(GraphicsError::ShaderCompilation(self.full_name()).into())
            }
        }
    }

    /// 设置名称（通常是所属着色器的名称）
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// 设置宏定义；改变时释放已编译的结果
    pub fn set_defines(&mut self, defines: impl Into<String>) {
        let defines = defines.into();
        if defines != self.defines {
            self.release();
            self.defines = defines;
        }
    }

    pub fn owner(&self) -> Option<Rc<Shader>> {
        self.owner.upgrade()
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defines(&self) -> &str {
        &self.defines
    }

    /// `name(defines)`
    pub fn full_name(&self) -> String {
        format!("{}({})", self.name, self.defines)
    }

    /// 编译成功时为空
    pub fn compiler_output(&self) -> &str {
        &self.compiler_output
    }

    pub fn handle(&self) -> Option<GpuHandle> {
        self.lifecycle.handle()
    }

    pub fn id(&self) -> ObjectId {
        self.lifecycle.id()
    }
}

impl DeviceObject for ShaderVariation {
    fn lifecycle(&self) -> &DeviceObjectLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut DeviceObjectLifecycle {
        &mut self.lifecycle
    }

    fn on_device_lost(&mut self) {
        self.lifecycle.mark_lost();
        self.compiler_output.clear();
    }

    fn on_device_reset(&mut self) {
        // 下次绑定时重新编译
    }

    fn release(&mut self) {
        if let Some(handle) = self.lifecycle.detach() {
            if !self.context.is_headless() {
                if !self.context.is_device_lost() {
                    self.context.unbind_shader(self.id());
                    self.context.backend().destroy_shader(handle);
                }
                self.context.cleanup_shader_programs(self.id());
            }
        }
        self.compiler_output.clear();
    }
}

impl Drop for ShaderVariation {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{GraphicsCapabilities, SoftwareBackend};

    fn options<'a>(stage: ShaderStage, defines: &'a str) -> PreprocessOptions<'a> {
        PreprocessOptions {
            stage,
            profile: ShaderProfile::Desktop,
            default_version: "#version 150",
            max_bones: 64,
            defines,
            feature_defines: &["GL3"],
        }
    }

    #[test]
    fn test_assemble_with_version_directive() {
        let assembled = assemble_source("#version 330\nfoo", &options(ShaderStage::Vertex, "A=1 B"));
        let lines: Vec<&str> = assembled.source.lines().collect();

        assert_eq!(lines[0], "#version 330");
        assert_eq!(
            &lines[1..7],
            &[
                "#define DESKTOP_GRAPHICS",
                "#define COMPILEVS",
                "#define MAXBONES 64",
                "#define A 1",
                "#define B",
                "#define GL3",
            ]
        );
        assert_eq!(*lines.last().unwrap(), "foo");
        assert_eq!(assembled.source.matches("#version").count(), 1);
        assert_eq!(assembled.unused_defines, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_assemble_without_version_uses_default() {
        let source = "void main() {}\n";
        let mut opts = options(ShaderStage::Fragment, "");
        opts.profile = ShaderProfile::Mobile;
        opts.default_version = "#version 300 es";

        let assembled = assemble_source(source, &opts);
        assert!(assembled.source.starts_with("#version 300 es\n#define MOBILE_GRAPHICS\n#define COMPILEPS\n"));
        assert!(assembled.source.ends_with(source));
        assert!(assembled.unused_defines.is_empty());
    }

    #[test]
    fn test_version_profile_token_is_kept() {
        let assembled = assemble_source("#version 300 es\nprecision mediump float;", &options(ShaderStage::Vertex, ""));
        assert!(assembled.source.starts_with("#version 300 es\n"));
        assert!(assembled.source.ends_with("\nprecision mediump float;"));
        assert!(!assembled.source.contains("\nes\n"));
    }

    #[test]
    fn test_used_define_not_reported() {
        let assembled = assemble_source("#ifdef SKINNED\n#endif\n", &options(ShaderStage::Vertex, "SKINNED"));
        assert!(assembled.unused_defines.is_empty());
    }

    #[test]
    fn test_version_only_detected_at_first_directive() {
        let source = "#define X\n#version 330\n";
        assert!(find_version_directive(source).is_none());
        assert_eq!(find_version_directive("  #version 410 core\nx"), Some(("#version 410 core", 19)));
    }

    #[test]
    fn test_expired_owner() {
        let backend = Rc::new(SoftwareBackend::default());
        let ctx = GraphicsContext::new(backend, GraphicsCapabilities::software());
        let variation = ShaderVariation::new(&ctx, Weak::new(), ShaderStage::Vertex);

        let mut variation = variation.borrow_mut();
        assert!(variation.create().is_err());
        assert_eq!(variation.compiler_output(), "Owner shader has expired");
        assert!(variation.handle().is_none());
    }
}
