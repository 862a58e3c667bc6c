//! 着色器
//!
//! 一份组合源码同时包含顶点入口 `VS()` 和像素入口 `PS()`。
//! 每个阶段的源码由组合源码派生：注释掉另一个阶段的入口函数，
//! 并把本阶段的入口改名为 `main`。
//!
//! 变体按 (阶段, 规范化后的宏定义) 缓存，规范化即排序并去重。

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use crate::core::error::{ResourceError, Result};
use crate::engine_error;
use crate::gfx::ShaderStage;
use crate::resource::provider::{parent_path, ResourceProvider};

use super::context::GraphicsContext;
use super::gpu_object::DeviceObject;
use super::shader_variation::ShaderVariation;

/// `#include` 的最大嵌套深度
const MAX_INCLUDE_DEPTH: usize = 8;

/// 着色器
pub struct Shader {
    context: Rc<GraphicsContext>,
    this: Weak<Shader>,
    name: String,
    vs_source: String,
    ps_source: String,
    variations: RefCell<HashMap<(ShaderStage, String), Rc<RefCell<ShaderVariation>>>>,
}

impl Shader {
    /// 由组合源码创建
    pub fn new(context: &Rc<GraphicsContext>, name: impl Into<String>, source: &str) -> Rc<Self> {
        let mut vs_source = source.to_string();
        comment_out_function(&mut vs_source, "void PS(");
        let vs_source = vs_source.replacen("void VS(", "void main(", 1);

        let mut ps_source = source.to_string();
        comment_out_function(&mut ps_source, "void VS(");
        let ps_source = ps_source.replacen("void PS(", "void main(", 1);

        let name = name.into();
        Rc::new_cyclic(|this| Self {
            context: context.clone(),
            this: this.clone(),
            name,
            vs_source,
            ps_source,
            variations: RefCell::new(HashMap::new()),
        })
    }

    /// 从资源提供者读取源码并展开 `#include`
    pub fn load(context: &Rc<GraphicsContext>, provider: &dyn ResourceProvider, name: &str) -> Result<Rc<Self>> {
        let source = read_with_includes(provider, name, 0)?;
        let shader_name = name
            .rsplit('/')
            .next()
            .and_then(|file| file.split('.').next())
            .unwrap_or(name);
        Ok(Self::new(context, shader_name, &source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 某个阶段的源码
    pub fn source_code(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vs_source,
            ShaderStage::Fragment => &self.ps_source,
        }
    }

    /// 获取（必要时创建）某组宏定义下的变体
    pub fn variation(&self, stage: ShaderStage, defines: &str) -> Rc<RefCell<ShaderVariation>> {
        let defines = normalize_defines(defines);
        let key = (stage, defines);

        if let Some(variation) = self.variations.borrow().get(&key) {
            return variation.clone();
        }

        let variation = ShaderVariation::new(&self.context, self.this.clone(), stage);
        {
            let mut v = variation.borrow_mut();
            v.set_name(self.name.clone());
            v.set_defines(key.1.clone());
        }
        self.variations.borrow_mut().insert(key, variation.clone());
        variation
    }

    pub fn variation_count(&self) -> usize {
        self.variations.borrow().len()
    }

    /// 释放所有变体的句柄，下次绑定时重新编译
    pub fn release_variations(&self) {
        for variation in self.variations.borrow().values() {
            if let Ok(mut variation) = variation.try_borrow_mut() {
                variation.release();
            }
        }
    }
}

/// 排序并去重
fn normalize_defines(defines: &str) -> String {
    defines
        .split(' ')
        .filter(|t| !t.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 用块注释包住以 `signature` 开头的函数
fn comment_out_function(code: &mut String, signature: &str) {
    let Some(start) = code.find(signature) else {
        return;
    };

    let mut depth = 0usize;
    let mut end = None;
    for (offset, ch) in code[start + signature.len()..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    end = Some(start + signature.len() + offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    if let Some(end) = end {
        code.insert_str(end, "*/");
        code.insert_str(start, "/*");
    }
}

/// 读取文件并递归展开 `#include "file"`，路径相对于包含它的文件
fn read_with_includes(provider: &dyn ResourceProvider, name: &str, depth: usize) -> Result<String> {
    if depth > MAX_INCLUDE_DEPTH {
        engine_error!("Include depth exceeded while loading {}", name);
        return Err(ResourceError::InvalidParameters(format!("include depth exceeded at {}", name)).into());
    }

    let bytes = provider.read(name)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| ResourceError::Decode(format!("{} is not valid UTF-8: {}", name, e)))?;

    let dir = parent_path(name);
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim_start();
        let include = trimmed
            .strip_prefix("#include")
            .map(str::trim)
            .and_then(|rest| rest.strip_prefix('"'))
            .and_then(|rest| rest.split('"').next());

        match include {
            Some(file) => {
                let path = if dir.is_empty() {
                    file.to_string()
                } else {
                    format!("{}/{}", dir, file)
                };
                out.push_str(&read_with_includes(provider, &path, depth + 1)?);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
    Ok(out)
}
